// Immutable point-in-time view of committed records.
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::core::record::{Record, RecordId};

pub(crate) type RecordMap = BTreeMap<RecordId, Arc<Record>>;

/// Shares the map the store had published at capture time. Writers copy the map
/// before changing it while any snapshot still holds it, so a snapshot never moves.
#[derive(Clone, Debug)]
pub struct StoreSnapshot {
    seq: u64,
    records: Arc<RecordMap>,
}

impl StoreSnapshot {
    pub(crate) fn new(seq: u64, records: Arc<RecordMap>) -> Self {
        Self { seq, records }
    }

    /// Seq of the last mutation included in the view.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Record>> {
        self.records.get(id)
    }

    /// Records in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Record>> {
        self.records.values()
    }
}

//! Purpose: Integrity guard; runs every mutation through the intent protocol and owns recovery.
//! Exports: `Guard`, `Phase`, `RecoveryReport`, `RolledBack`, `recover`.
//! Role: The only code that writes record files or journal entries.
//! Invariants: Intent is durable before the record file changes; commit is durable before success.
//! Invariants: A failed step is rolled back in-process; a failed rollback marks the guard failed.
//! Invariants: At most one unresolved intent exists, and it is the newest journal entry.
use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::error::{Error, ErrorKind};
use crate::core::files::{RecordFiles, TEMP_EXT, io_error};
use crate::core::journal::{self, Entry, Intent, Journal, Op, Prior, RecoveryWarning};
use crate::core::record::{Record, RecordId};

/// Lifecycle of an open store. `Recovering` is left exactly once, at open.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Recovering,
    Ready,
    /// A rollback could not be completed; mutations are refused until reopen.
    Failed,
    Closed,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct RolledBack {
    pub seq: u64,
    pub op: Op,
    pub id: String,
    /// Version restored by the rollback; `None` when the record did not exist before.
    pub restored_version: Option<u64>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct RecoveryReport {
    pub journal_entries: usize,
    pub rolled_back: Vec<RolledBack>,
    pub temp_files_removed: usize,
    pub warnings: Vec<RecoveryWarning>,
}

impl RecoveryReport {
    pub fn is_clean(&self) -> bool {
        self.rolled_back.is_empty() && self.warnings.is_empty() && self.temp_files_removed == 0
    }
}

pub(crate) struct Recovered {
    pub journal: Journal,
    pub records: Vec<Record>,
    pub last_seq: u64,
    pub report: RecoveryReport,
}

/// Brings the files under `journal_path`/`files` back to a committed state.
pub(crate) fn recover(journal_path: &Path, files: &RecordFiles) -> Result<Recovered, Error> {
    let mut report = RecoveryReport {
        temp_files_removed: files.clean_temp()?,
        ..RecoveryReport::default()
    };
    let journal_tmp = journal_path.with_extension(TEMP_EXT);
    if journal_tmp.exists() {
        fs::remove_file(&journal_tmp)
            .map_err(|err| io_error(err, &journal_tmp, "failed to remove temp journal"))?;
        report.temp_files_removed += 1;
    }

    let scan = journal::scan(journal_path)?;
    report.journal_entries = scan.entries.len();
    report.warnings = scan.warnings.clone();

    let pending = scan.pending();
    let mut committed_later = HashSet::new();
    for entry in scan.entries.iter().rev() {
        if let Entry::Intent(intent) = entry {
            let is_pending = pending.iter().any(|p| p.seq == intent.seq);
            if is_pending {
                if committed_later.contains(&intent.id) {
                    report.warnings.push(RecoveryWarning {
                        offset: None,
                        seq: Some(intent.seq),
                        message: format!(
                            "unresolved intent for `{}` precedes a committed mutation; left as is",
                            intent.id
                        ),
                    });
                    continue;
                }
                roll_back(files, intent)?;
                report.rolled_back.push(RolledBack {
                    seq: intent.seq,
                    op: intent.op,
                    id: intent.id.as_str().to_string(),
                    restored_version: intent.prior.as_ref().map(|prior| prior.version),
                });
            } else {
                committed_later.insert(intent.id.clone());
            }
        }
    }

    let records = files.load_all()?;
    let last_seq = records
        .iter()
        .map(Record::seq)
        .fold(scan.max_seq, u64::max);
    let journal = Journal::create(journal_path, last_seq)?;

    for warning in &report.warnings {
        warn!(
            offset = warning.offset,
            seq = warning.seq,
            "journal damage discarded during recovery: {}",
            warning.message
        );
    }
    for rolled in &report.rolled_back {
        info!(seq = rolled.seq, id = %rolled.id, op = ?rolled.op, "rolled back unfinished mutation");
    }
    debug!(
        records = records.len(),
        last_seq,
        journal_entries = report.journal_entries,
        "recovery complete"
    );

    Ok(Recovered {
        journal,
        records,
        last_seq,
        report,
    })
}

/// Restores the state an intent found. Idempotent: safe whether or not the
/// mutation reached the record file.
fn roll_back(files: &RecordFiles, intent: &Intent) -> Result<(), Error> {
    match &intent.prior {
        Some(prior) => files.write(&intent.id, prior.version, prior.seq, &prior.payload),
        None => files.remove(&intent.id).map(|_| ()),
    }
}

fn write_failed(err: Error, message: &str) -> Error {
    let err = if err.message().is_none() {
        err.with_message(message)
    } else {
        err
    };
    err.into_kind(ErrorKind::WriteFailed)
}

#[cfg(test)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum CrashPoint {
    AfterIntent,
    AfterApply,
    AfterCommit,
}

#[cfg(test)]
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Faults {
    pub crash: Option<CrashPoint>,
    pub fail_apply: bool,
    pub fail_commit: bool,
    pub fail_rollback: bool,
    pub fail_checkpoint: bool,
}

pub(crate) struct Guard {
    journal: Journal,
    files: RecordFiles,
    next_seq: u64,
    checkpoint_bytes: u64,
    failed: bool,
    #[cfg(test)]
    pub(crate) faults: Faults,
}

impl Guard {
    pub(crate) fn new(journal: Journal, files: RecordFiles, last_seq: u64, checkpoint_bytes: u64) -> Self {
        Self {
            journal,
            files,
            next_seq: last_seq + 1,
            checkpoint_bytes,
            failed: false,
            #[cfg(test)]
            faults: Faults::default(),
        }
    }

    pub(crate) fn is_failed(&self) -> bool {
        self.failed
    }

    pub(crate) fn journal_len(&self) -> u64 {
        self.journal.len()
    }

    /// Writes `payload` as the next version of `id`. Returns `(seq, version)`.
    pub(crate) fn put(
        &mut self,
        id: &RecordId,
        payload: Vec<u8>,
        prior: Option<&Record>,
    ) -> Result<(u64, u64), Error> {
        let version = prior.map_or(1, |record| record.version() + 1);
        let intent = Intent {
            seq: self.next_seq,
            op: Op::Put,
            id: id.clone(),
            version,
            payload,
            prior: prior.map(prior_of).transpose()?,
        };
        let seq = self.run(&intent)?;
        Ok((seq, version))
    }

    /// Removes `record`. Returns the seq of the delete.
    pub(crate) fn delete(&mut self, record: &Record) -> Result<u64, Error> {
        let intent = Intent {
            seq: self.next_seq,
            op: Op::Delete,
            id: record.id().clone(),
            version: record.version(),
            payload: Vec::new(),
            prior: Some(prior_of(record)?),
        };
        self.run(&intent)
    }

    fn run(&mut self, intent: &Intent) -> Result<u64, Error> {
        if self.failed {
            return Err(Error::new(ErrorKind::WriteFailed)
                .with_message("store has an unresolved mutation")
                .with_hint("Close and reopen the store to run recovery."));
        }

        // 1. intent
        if let Err(err) = self.journal.append(&Entry::Intent(intent.clone())) {
            self.failed = self.journal.is_damaged();
            return Err(write_failed(err, "failed to record intent").with_id(intent.id.as_str()));
        }
        self.next_seq = intent.seq + 1;
        self.crash_point_reached(intent, 0)?;

        // 2. apply
        if let Err(err) = self.apply(intent) {
            self.abandon(intent);
            return Err(write_failed(err, "failed to apply mutation").with_id(intent.id.as_str()));
        }
        self.crash_point_reached(intent, 1)?;

        // 3. commit
        if let Err(err) = self.commit(intent) {
            self.abandon(intent);
            return Err(write_failed(err, "failed to commit mutation").with_id(intent.id.as_str()));
        }
        self.crash_point_reached(intent, 2)?;

        debug!(seq = intent.seq, id = %intent.id, op = ?intent.op, version = intent.version, "mutation committed");
        self.maybe_checkpoint(intent.seq);
        Ok(intent.seq)
    }

    fn apply(&mut self, intent: &Intent) -> Result<(), Error> {
        #[cfg(test)]
        if self.faults.fail_apply {
            return Err(Error::new(ErrorKind::Io).with_message("injected apply failure"));
        }
        match intent.op {
            Op::Put => self
                .files
                .write(&intent.id, intent.version, intent.seq, &intent.payload),
            Op::Delete => self.files.remove(&intent.id).map(|_| ()),
        }
    }

    fn commit(&mut self, intent: &Intent) -> Result<(), Error> {
        #[cfg(test)]
        if self.faults.fail_commit {
            journal::fail_points::fail_next_journal_appends(1);
        }
        self.journal.append(&Entry::Commit(intent.seq))
    }

    /// Undoes an intent after a failed step and records the abort. Any failure
    /// here leaves the intent unresolved on disk, so the guard stops accepting work.
    fn abandon(&mut self, intent: &Intent) {
        #[cfg(test)]
        if self.faults.fail_rollback {
            self.failed = true;
            return;
        }
        if let Err(err) = roll_back(&self.files, intent) {
            warn!(seq = intent.seq, id = %intent.id, error = %err, "rollback failed; store needs recovery");
            self.failed = true;
            return;
        }
        if let Err(err) = self.journal.append(&Entry::Abort(intent.seq)) {
            warn!(seq = intent.seq, id = %intent.id, error = %err, "abort marker not written; store needs recovery");
            self.failed = true;
        }
    }

    fn maybe_checkpoint(&mut self, seq: u64) {
        if self.journal.len() < self.checkpoint_bytes {
            return;
        }
        if let Err(err) = self.checkpoint(seq) {
            warn!(seq, error = %err, "journal checkpoint failed; store needs recovery");
            self.failed = true;
        }
    }

    fn checkpoint(&mut self, seq: u64) -> Result<(), Error> {
        #[cfg(test)]
        if self.faults.fail_checkpoint {
            return Err(Error::new(ErrorKind::Io).with_message("injected checkpoint failure"));
        }
        self.journal.checkpoint(seq)
    }

    /// Final checkpoint on clean close; leaves an empty journal behind.
    pub(crate) fn shutdown(&mut self) {
        if self.failed || self.journal.is_empty() {
            return;
        }
        let last_seq = self.next_seq - 1;
        if let Err(err) = self.journal.checkpoint(last_seq) {
            warn!(error = %err, "journal checkpoint at close failed");
        }
    }

    #[cfg(test)]
    fn crash_point_reached(&mut self, intent: &Intent, step: u8) -> Result<(), Error> {
        let hit = matches!(
            (self.faults.crash, step),
            (Some(CrashPoint::AfterIntent), 0)
                | (Some(CrashPoint::AfterApply), 1)
                | (Some(CrashPoint::AfterCommit), 2)
        );
        if hit {
            self.failed = true;
            return Err(Error::new(ErrorKind::Internal)
                .with_message("simulated crash")
                .with_seq(intent.seq));
        }
        Ok(())
    }

    #[cfg(not(test))]
    #[inline]
    fn crash_point_reached(&mut self, _intent: &Intent, _step: u8) -> Result<(), Error> {
        Ok(())
    }
}

fn prior_of(record: &Record) -> Result<Prior, Error> {
    Ok(Prior {
        version: record.version(),
        seq: record.seq(),
        payload: record.encoded_payload()?,
    })
}

// Store directory creation/opening with advisory locking, recovery at open, and
// the four record operations. All mutations go through the integrity guard.
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;
use libc::{EACCES, EPERM};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::error::{Error, ErrorKind};
use crate::core::files::{RecordFiles, io_error, sync_dir};
use crate::core::guard::{self, Guard, Phase, RecoveryReport};
use crate::core::journal::Journal;
use crate::core::record::{self, DEFAULT_MAX_PAYLOAD_BYTES, Record, RecordId};
use crate::core::snapshot::{RecordMap, StoreSnapshot};

const LOCK_FILE: &str = "LOCK";
const JOURNAL_FILE: &str = "journal.rsj";
const RECORDS_DIR: &str = "records";
const LOCK_RETRY: Duration = Duration::from_millis(10);

pub const DEFAULT_CHECKPOINT_BYTES: u64 = 4 * 1024 * 1024;

#[derive(Clone, Copy, Debug)]
pub struct StoreOptions {
    pub max_payload_bytes: usize,
    /// Journal size that triggers a checkpoint after a commit.
    pub checkpoint_bytes: u64,
    /// How long open waits for another holder of the store lock before `Busy`.
    pub lock_timeout: Duration,
}

impl StoreOptions {
    pub fn new() -> Self {
        Self {
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            checkpoint_bytes: DEFAULT_CHECKPOINT_BYTES,
            lock_timeout: Duration::ZERO,
        }
    }

    pub fn with_max_payload_bytes(mut self, max_payload_bytes: usize) -> Self {
        self.max_payload_bytes = max_payload_bytes;
        self
    }

    pub fn with_checkpoint_bytes(mut self, checkpoint_bytes: u64) -> Self {
        self.checkpoint_bytes = checkpoint_bytes;
        self
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct StoreInfo {
    pub path: PathBuf,
    pub phase: Phase,
    pub records: usize,
    pub seq: u64,
    pub journal_bytes: u64,
}

/// Paths that make up a store directory.
#[derive(Clone, Debug)]
pub struct StoreLayout {
    root: PathBuf,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }

    pub fn journal_path(&self) -> PathBuf {
        self.root.join(JOURNAL_FILE)
    }

    pub fn records_dir(&self) -> PathBuf {
        self.root.join(RECORDS_DIR)
    }

    /// A directory is a store once its journal exists.
    pub fn exists(&self) -> bool {
        self.journal_path().is_file()
    }
}

pub struct StoreLock {
    file: File,
}

impl StoreLock {
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self, Error> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|err| Error::new(lock_error_kind(&err)).with_path(path).with_source(err))?;
        let deadline = Instant::now() + timeout;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(Self { file }),
                Err(err) => {
                    let kind = lock_error_kind(&err);
                    if kind == ErrorKind::Busy && Instant::now() < deadline {
                        thread::sleep(LOCK_RETRY);
                        continue;
                    }
                    let mut out = Error::new(kind).with_path(path).with_source(err);
                    if kind == ErrorKind::Busy {
                        out = out
                            .with_message("store is open in another process")
                            .with_hint("Close the other store handle, or retry with a longer --wait-ms.");
                    }
                    return Err(out);
                }
            }
        }
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

fn lock_error_kind(err: &io::Error) -> ErrorKind {
    let errno = err.raw_os_error().unwrap_or_default();
    if errno == EACCES || errno == EPERM {
        return ErrorKind::Permission;
    }
    match err.kind() {
        io::ErrorKind::WouldBlock => ErrorKind::Busy,
        io::ErrorKind::PermissionDenied => ErrorKind::Permission,
        _ => ErrorKind::Io,
    }
}

struct Published {
    phase: Phase,
    seq: u64,
    records: Arc<RecordMap>,
}

struct Writer {
    guard: Option<Guard>,
    lock: Option<StoreLock>,
}

/// An open record store. Share across threads with `Arc<Store>`.
pub struct Store {
    layout: StoreLayout,
    options: StoreOptions,
    writer: Mutex<Writer>,
    published: RwLock<Published>,
    report: RecoveryReport,
}

impl Store {
    pub fn create(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self, Error> {
        let layout = StoreLayout::new(path.as_ref());
        if layout.exists() {
            return Err(Error::new(ErrorKind::AlreadyExists)
                .with_message("store already exists")
                .with_path(layout.root()));
        }
        let records_dir = layout.records_dir();
        fs::create_dir_all(&records_dir)
            .map_err(|err| io_error(err, &records_dir, "failed to create store directory"))?;
        let lock = StoreLock::acquire(&layout.lock_path(), options.lock_timeout)?;
        // Another creator may have won the race for the lock.
        if layout.exists() {
            return Err(Error::new(ErrorKind::AlreadyExists)
                .with_message("store already exists")
                .with_path(layout.root()));
        }
        sync_dir(layout.root())?;
        Journal::create(layout.journal_path(), 0)?;
        debug!(path = %layout.root().display(), "store created");
        Self::open_locked(layout, options, lock)
    }

    pub fn open(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self, Error> {
        let layout = StoreLayout::new(path.as_ref());
        if !layout.exists() {
            return Err(Error::new(ErrorKind::NotFound)
                .with_message("store not found")
                .with_path(layout.root())
                .with_hint("Create it first with `recstore init`."));
        }
        let lock = StoreLock::acquire(&layout.lock_path(), options.lock_timeout)?;
        Self::open_locked(layout, options, lock)
    }

    pub fn open_or_create(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self, Error> {
        match Self::open(path.as_ref(), options) {
            Err(err) if err.kind() == ErrorKind::NotFound => Self::create(path, options),
            other => other,
        }
    }

    fn open_locked(layout: StoreLayout, options: StoreOptions, lock: StoreLock) -> Result<Self, Error> {
        let files = RecordFiles::new(layout.records_dir());
        let recovered = guard::recover(&layout.journal_path(), &files)?;

        let records = recovered
            .records
            .into_iter()
            .map(|record| (record.id().clone(), Arc::new(record)))
            .collect::<BTreeMap<_, _>>();
        let guard = Guard::new(
            recovered.journal,
            files,
            recovered.last_seq,
            options.checkpoint_bytes,
        );

        let store = Self {
            layout,
            options,
            writer: Mutex::new(Writer {
                guard: Some(guard),
                lock: Some(lock),
            }),
            published: RwLock::new(Published {
                phase: Phase::Recovering,
                seq: recovered.last_seq,
                records: Arc::new(records),
            }),
            report: recovered.report,
        };
        store.write_published()?.phase = Phase::Ready;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        self.layout.root()
    }

    pub fn options(&self) -> StoreOptions {
        self.options
    }

    /// What recovery found at open. Reported once; later operations never re-raise it.
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.report
    }

    pub fn phase(&self) -> Phase {
        self.read_published()
            .map(|published| published.phase)
            .unwrap_or(Phase::Failed)
    }

    pub fn put(&self, id: &str, payload: &Value) -> Result<u64, Error> {
        self.ensure_open()?;
        let id = RecordId::parse(id)?;
        let (data, encoded) = record::validate_payload(payload, self.options.max_payload_bytes)
            .map_err(|err| err.with_id(id.as_str()))?;

        let mut writer = self.lock_writer()?;
        let guard = self.ready_guard(&mut writer)?;
        let prior = self.read_published()?.records.get(&id).cloned();
        let (seq, version) = match guard.put(&id, encoded, prior.as_deref()) {
            Ok(outcome) => outcome,
            Err(err) => return Err(self.after_failure(guard, err)),
        };

        let record = Arc::new(Record::new(id.clone(), version, seq, data));
        let mut published = self.write_published()?;
        Arc::make_mut(&mut published.records).insert(id, record);
        published.seq = seq;
        self.publish_guard_phase(guard, &mut published);
        Ok(version)
    }

    pub fn get(&self, id: &str) -> Result<Arc<Record>, Error> {
        let published = self.read_published()?;
        if published.phase == Phase::Closed {
            return Err(closed_error());
        }
        published.records.get(id).cloned().ok_or_else(|| {
            Error::new(ErrorKind::NotFound)
                .with_message("record not found")
                .with_id(id)
        })
    }

    pub fn delete(&self, id: &str) -> Result<bool, Error> {
        self.ensure_open()?;
        let id = RecordId::parse(id)?;

        let mut writer = self.lock_writer()?;
        let guard = self.ready_guard(&mut writer)?;
        let Some(prior) = self.read_published()?.records.get(&id).cloned() else {
            return Ok(false);
        };
        let seq = match guard.delete(&prior) {
            Ok(seq) => seq,
            Err(err) => return Err(self.after_failure(guard, err)),
        };

        let mut published = self.write_published()?;
        Arc::make_mut(&mut published.records).remove(&id);
        published.seq = seq;
        self.publish_guard_phase(guard, &mut published);
        Ok(true)
    }

    /// Captures every committed record. Holds the writer lock only while the
    /// published map's reference count is bumped.
    pub fn snapshot(&self) -> Result<StoreSnapshot, Error> {
        let _writer = self.lock_writer()?;
        let published = self.read_published()?;
        if published.phase == Phase::Closed {
            return Err(closed_error());
        }
        Ok(StoreSnapshot::new(published.seq, Arc::clone(&published.records)))
    }

    pub fn len(&self) -> usize {
        self.read_published()
            .map(|published| published.records.len())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn seq(&self) -> u64 {
        self.read_published()
            .map(|published| published.seq)
            .unwrap_or_default()
    }

    pub fn info(&self) -> Result<StoreInfo, Error> {
        let writer = self.lock_writer()?;
        let published = self.read_published()?;
        Ok(StoreInfo {
            path: self.layout.root().to_path_buf(),
            phase: published.phase,
            records: published.records.len(),
            seq: published.seq,
            journal_bytes: writer.guard.as_ref().map_or(0, Guard::journal_len),
        })
    }

    /// Releases the journal and the store lock. Idempotent.
    pub fn close(&self) -> Result<(), Error> {
        let mut writer = self.lock_writer()?;
        if let Some(mut guard) = writer.guard.take() {
            guard.shutdown();
        }
        writer.lock = None;
        self.write_published()?.phase = Phase::Closed;
        debug!(path = %self.layout.root().display(), "store closed");
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.read_published()?.phase == Phase::Closed {
            return Err(closed_error());
        }
        Ok(())
    }

    fn ready_guard<'a>(&self, writer: &'a mut Writer) -> Result<&'a mut Guard, Error> {
        let guard = writer.guard.as_mut().ok_or_else(closed_error)?;
        if guard.is_failed() {
            return Err(Error::new(ErrorKind::WriteFailed)
                .with_message("store has an unresolved mutation")
                .with_path(self.layout.root())
                .with_hint("Close and reopen the store to run recovery."));
        }
        Ok(guard)
    }

    fn after_failure(&self, guard: &Guard, err: Error) -> Error {
        if guard.is_failed() {
            warn!(path = %self.layout.root().display(), error = %err, "store entered failed phase");
            if let Ok(mut published) = self.write_published() {
                published.phase = Phase::Failed;
            }
        }
        err
    }

    /// A committed mutation can still leave the guard failed when the checkpoint after it fails.
    fn publish_guard_phase(&self, guard: &Guard, published: &mut Published) {
        if guard.is_failed() && published.phase != Phase::Failed {
            warn!(path = %self.layout.root().display(), "store entered failed phase after checkpoint");
            published.phase = Phase::Failed;
        }
    }

    fn lock_writer(&self) -> Result<MutexGuard<'_, Writer>, Error> {
        self.writer.lock().map_err(|_| poisoned())
    }

    fn read_published(&self) -> Result<RwLockReadGuard<'_, Published>, Error> {
        self.published.read().map_err(|_| poisoned())
    }

    fn write_published(&self) -> Result<RwLockWriteGuard<'_, Published>, Error> {
        self.published.write().map_err(|_| poisoned())
    }

    #[cfg(test)]
    pub(crate) fn with_guard<T>(&self, f: impl FnOnce(&mut Guard) -> T) -> T {
        let mut writer = self.writer.lock().expect("writer lock");
        f(writer.guard.as_mut().expect("open guard"))
    }
}

fn closed_error() -> Error {
    Error::new(ErrorKind::StoreClosed).with_message("store is closed")
}

fn poisoned() -> Error {
    Error::new(ErrorKind::Internal).with_message("store lock poisoned")
}

#[cfg(test)]
mod tests {
    use super::{Store, StoreOptions, lock_error_kind};
    use crate::core::error::ErrorKind;
    use crate::core::guard::{CrashPoint, Phase};
    use serde_json::{Value, json};
    use std::fs;
    use std::path::Path;

    fn create(path: &Path) -> Store {
        Store::create(path, StoreOptions::new()).expect("create store")
    }

    fn reopen(path: &Path) -> Store {
        Store::open(path, StoreOptions::new()).expect("reopen store")
    }

    fn state(store: &Store) -> Vec<(String, u64, Value)> {
        let snapshot = store.snapshot().expect("snapshot");
        snapshot
            .iter()
            .map(|r| {
                (
                    r.id().to_string(),
                    r.version(),
                    Value::Object(r.data().clone()),
                )
            })
            .collect()
    }

    #[test]
    fn put_get_delete_example() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = create(&dir.path().join("s"));

        assert_eq!(store.put("a", &json!({"v": "x"})).unwrap(), 1);
        assert_eq!(store.put("a", &json!({"v": "y"})).unwrap(), 2);
        let record = store.get("a").unwrap();
        assert_eq!(record.data()["v"], "y");
        assert_eq!(record.version(), 2);
        assert!(store.delete("a").unwrap());
        assert_eq!(store.get("a").unwrap_err().kind(), ErrorKind::NotFound);
        assert!(!store.delete("a").unwrap());
    }

    #[test]
    fn state_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("s");
        let store = create(&path);
        store.put("a", &json!({"v": 1})).unwrap();
        store.put("a", &json!({"v": 2})).unwrap();
        store.put("b", &json!({"v": 3})).unwrap();
        store.delete("b").unwrap();
        let before = state(&store);
        let seq = store.seq();
        store.close().unwrap();

        let store = reopen(&path);
        assert!(store.recovery_report().is_clean());
        assert_eq!(state(&store), before);
        assert_eq!(store.seq(), seq);
        assert_eq!(store.put("a", &json!({"v": 4})).unwrap(), 3);
    }

    #[test]
    fn create_twice_is_already_exists() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("s");
        create(&path).close().unwrap();
        let err = Store::create(&path, StoreOptions::new()).err().expect("exists");
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[test]
    fn open_missing_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = Store::open(dir.path().join("nope"), StoreOptions::new())
            .err()
            .expect("missing");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn second_open_is_busy_until_close() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("s");
        let store = create(&path);
        let err = Store::open(&path, StoreOptions::new()).err().expect("busy");
        assert_eq!(err.kind(), ErrorKind::Busy);

        store.close().unwrap();
        reopen(&path);
    }

    #[test]
    fn closed_store_refuses_everything() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = create(&dir.path().join("s"));
        store.put("a", &json!({})).unwrap();
        store.close().unwrap();
        store.close().unwrap();

        assert_eq!(store.phase(), Phase::Closed);
        assert_eq!(store.put("a", &json!({})).unwrap_err().kind(), ErrorKind::StoreClosed);
        assert_eq!(store.get("a").unwrap_err().kind(), ErrorKind::StoreClosed);
        assert_eq!(store.delete("a").unwrap_err().kind(), ErrorKind::StoreClosed);
        assert_eq!(store.snapshot().unwrap_err().kind(), ErrorKind::StoreClosed);
    }

    #[test]
    fn closed_store_wins_over_invalid_id() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = create(&dir.path().join("s"));
        store.close().unwrap();

        assert_eq!(store.put("", &json!({})).unwrap_err().kind(), ErrorKind::StoreClosed);
        assert_eq!(store.delete("").unwrap_err().kind(), ErrorKind::StoreClosed);
        assert_eq!(store.get("").unwrap_err().kind(), ErrorKind::StoreClosed);
    }

    #[test]
    fn invalid_payload_has_no_effect() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Store::create(
            dir.path().join("s"),
            StoreOptions::new().with_max_payload_bytes(32),
        )
        .unwrap();
        let err = store.put("a", &json!([1])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidPayload);
        let err = store.put("a", &json!({"x": "y".repeat(64)})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidPayload);
        assert_eq!(err.id(), Some("a"));
        assert!(store.is_empty());
        assert_eq!(store.seq(), 0);
    }

    #[test]
    fn snapshot_excludes_later_writes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = create(&dir.path().join("s"));
        store.put("a", &json!({"v": "x"})).unwrap();
        let snapshot = store.snapshot().unwrap();
        store.put("b", &json!({"v": "z"})).unwrap();
        store.put("a", &json!({"v": "w"})).unwrap();

        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.get("b").is_none());
        assert_eq!(snapshot.get("a").unwrap().version(), 1);
        assert_eq!(snapshot.seq(), 1);
    }

    fn crash_case(point: CrashPoint, op: &str) -> (Vec<(String, u64, Value)>, Vec<(String, u64, Value)>) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("s");
        let store = create(&path);
        store.put("a", &json!({"v": "x"})).unwrap();
        store.put("b", &json!({"v": "keep"})).unwrap();
        let before = state(&store);

        store.with_guard(|guard| guard.faults.crash = Some(point));
        let err = match op {
            "put-update" => store.put("a", &json!({"v": "y"})).unwrap_err(),
            "put-create" => store.put("c", &json!({"v": "new"})).unwrap_err(),
            "delete" => store.delete("a").unwrap_err(),
            _ => unreachable!(),
        };
        assert_eq!(err.kind(), ErrorKind::Internal);
        drop(store);

        let store = reopen(&path);
        (before, state(&store))
    }

    #[test]
    fn crash_before_commit_yields_pre_state() {
        for point in [CrashPoint::AfterIntent, CrashPoint::AfterApply] {
            for op in ["put-update", "put-create", "delete"] {
                let (before, after) = crash_case(point, op);
                assert_eq!(after, before, "{point:?} {op}");
            }
        }
    }

    #[test]
    fn crash_after_commit_yields_post_state() {
        let (_, after) = crash_case(CrashPoint::AfterCommit, "put-update");
        assert_eq!(after[0], ("a".to_string(), 2, json!({"v": "y"})));
        let (_, after) = crash_case(CrashPoint::AfterCommit, "put-create");
        assert_eq!(after.len(), 3);
        let (_, after) = crash_case(CrashPoint::AfterCommit, "delete");
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].0, "b");
    }

    #[test]
    fn rollback_failure_enters_failed_phase() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("s");
        let store = create(&path);
        store.put("a", &json!({"v": 1})).unwrap();
        store.with_guard(|guard| {
            guard.faults.fail_apply = true;
            guard.faults.fail_rollback = true;
        });
        let err = store.put("a", &json!({"v": 2})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WriteFailed);
        assert_eq!(store.phase(), Phase::Failed);
        assert_eq!(store.get("a").unwrap().version(), 1);

        store.with_guard(|guard| guard.faults = Default::default());
        let err = store.put("b", &json!({})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WriteFailed);
        store.close().unwrap();

        let store = reopen(&path);
        assert_eq!(store.get("a").unwrap().version(), 1);
        assert_eq!(store.put("b", &json!({})).unwrap(), 1);
    }

    #[test]
    fn corrupt_journal_frame_is_a_warning_not_data_loss() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("s");
        let store = create(&path);
        store.put("a", &json!({"v": 1})).unwrap();
        drop(store);

        // Flip the id byte inside the intent body: journal header (64) + frame
        // header (40) + op (1) + id length prefix (4).
        let journal = path.join("journal.rsj");
        let mut bytes = fs::read(&journal).unwrap();
        bytes[64 + 40 + 1 + 4] ^= 0xFF;
        fs::write(&journal, bytes).unwrap();

        let store = reopen(&path);
        assert_eq!(store.recovery_report().warnings.len(), 1);
        assert_eq!(store.get("a").unwrap().version(), 1);
        store.close().unwrap();

        let store = reopen(&path);
        assert!(store.recovery_report().warnings.is_empty());
    }

    #[test]
    fn small_checkpoint_threshold_keeps_journal_short() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("s");
        let store = Store::create(&path, StoreOptions::new().with_checkpoint_bytes(1)).unwrap();
        for i in 0..5 {
            store.put("a", &json!({"i": i})).unwrap();
        }
        assert_eq!(store.info().unwrap().journal_bytes, 64);
        drop(store);
        let store = reopen(&path);
        assert_eq!(store.get("a").unwrap().version(), 5);
        assert_eq!(store.seq(), 5);
    }

    #[test]
    fn checkpoint_failure_after_commit_enters_failed_phase() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("s");
        let store = Store::create(&path, StoreOptions::new().with_checkpoint_bytes(1)).unwrap();
        store.put("a", &json!({"v": 1})).unwrap();
        store.with_guard(|guard| guard.faults.fail_checkpoint = true);

        // The write itself committed, so it is acknowledged and visible.
        assert_eq!(store.put("a", &json!({"v": 2})).unwrap(), 2);
        assert_eq!(store.get("a").unwrap().version(), 2);
        assert_eq!(store.phase(), Phase::Failed);
        assert_eq!(store.info().unwrap().phase, Phase::Failed);

        store.with_guard(|guard| guard.faults = Default::default());
        assert_eq!(store.put("b", &json!({})).unwrap_err().kind(), ErrorKind::WriteFailed);
        assert_eq!(store.delete("a").unwrap_err().kind(), ErrorKind::WriteFailed);
        store.close().unwrap();

        let store = reopen(&path);
        assert_eq!(store.phase(), Phase::Ready);
        assert_eq!(store.get("a").unwrap().version(), 2);
        assert_eq!(store.put("b", &json!({})).unwrap(), 1);
    }

    #[test]
    fn lock_errors_map_to_expected_kinds() {
        let err = std::io::Error::from_raw_os_error(libc::EAGAIN);
        assert_eq!(lock_error_kind(&err), ErrorKind::Busy);

        let err = std::io::Error::from_raw_os_error(libc::EWOULDBLOCK);
        assert_eq!(lock_error_kind(&err), ErrorKind::Busy);

        let err = std::io::Error::from_raw_os_error(libc::EACCES);
        assert_eq!(lock_error_kind(&err), ErrorKind::Permission);

        let err = std::io::Error::from_raw_os_error(libc::EPERM);
        assert_eq!(lock_error_kind(&err), ErrorKind::Permission);

        let err = std::io::Error::from_raw_os_error(libc::EBADF);
        assert_eq!(lock_error_kind(&err), ErrorKind::Io);
    }
}

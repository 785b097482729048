//! Purpose: Provide a serializable, read-only integrity report for a store directory.
//! Exports: `verify_store`, `VerifyReport`, `VerifyStatus`, `VerifyIssue`.
//! Role: Backs `recstore verify`; lets callers inspect damage without opening the store.
//! Invariants: Never writes or repairs; recovery at the next open does that.
//! Invariants: Holds the store lock while reading, so a live writer yields `Busy`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use crate::core::error::{Error, ErrorKind};
use crate::core::files::{RecordFiles, load_record_file};
use crate::core::journal;
use crate::core::store::{StoreLayout, StoreLock};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyStatus {
    Ok,
    /// Opening the store will roll back or clean up; no committed data is at risk.
    NeedsRecovery,
    /// Opening the store will fail.
    Corrupt,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct VerifyIssue {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl VerifyIssue {
    fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            id: None,
            seq: None,
            offset: None,
            path: None,
        }
    }

    fn from_error(code: &str, err: &Error) -> Self {
        let mut issue = Self::new(code, err.to_string());
        issue.id = err.id().map(str::to_string);
        issue.seq = err.seq();
        issue.offset = err.offset();
        issue.path = err.path().cloned();
        issue
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct VerifyReport {
    pub path: PathBuf,
    pub status: VerifyStatus,
    pub records: usize,
    pub last_seq: u64,
    pub journal_entries: usize,
    pub pending_intents: usize,
    pub temp_files: usize,
    pub issues: Vec<VerifyIssue>,
    pub remediation_hints: Vec<String>,
}

impl VerifyReport {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            status: VerifyStatus::Ok,
            records: 0,
            last_seq: 0,
            journal_entries: 0,
            pending_intents: 0,
            temp_files: 0,
            issues: Vec::new(),
            remediation_hints: Vec::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == VerifyStatus::Ok
    }

    fn push(&mut self, issue: VerifyIssue, status: VerifyStatus) {
        self.issues.push(issue);
        self.status = match (self.status, status) {
            (VerifyStatus::Corrupt, _) | (_, VerifyStatus::Corrupt) => VerifyStatus::Corrupt,
            _ => VerifyStatus::NeedsRecovery,
        };
    }

    fn finish(mut self) -> Self {
        self.remediation_hints = match self.status {
            VerifyStatus::Ok => Vec::new(),
            VerifyStatus::NeedsRecovery => vec![
                "Open the store (e.g. `recstore info <store>`) to run recovery.".to_string(),
            ],
            VerifyStatus::Corrupt => vec![
                "A record file is unreadable; restore it from backup or remove it before opening."
                    .to_string(),
            ],
        };
        self
    }
}

pub fn verify_store(path: impl AsRef<Path>, lock_timeout: Duration) -> Result<VerifyReport, Error> {
    let layout = StoreLayout::new(path.as_ref());
    if !layout.exists() {
        return Err(Error::new(ErrorKind::NotFound)
            .with_message("store not found")
            .with_path(layout.root()));
    }
    let _lock = StoreLock::acquire(&layout.lock_path(), lock_timeout)?;
    let mut report = VerifyReport::new(layout.root().to_path_buf());

    match journal::scan(&layout.journal_path()) {
        Ok(scan) => {
            report.journal_entries = scan.entries.len();
            report.last_seq = scan.max_seq;
            for warning in &scan.warnings {
                let mut issue = VerifyIssue::new("journal_damage", warning.message.clone());
                issue.seq = warning.seq;
                issue.offset = warning.offset;
                report.push(issue, VerifyStatus::NeedsRecovery);
            }
            let pending = scan.pending();
            report.pending_intents = pending.len();
            for intent in pending {
                let mut issue = VerifyIssue::new(
                    "pending_intent",
                    format!("unresolved {:?} intent will be rolled back", intent.op).to_lowercase(),
                );
                issue.id = Some(intent.id.to_string());
                issue.seq = Some(intent.seq);
                report.push(issue, VerifyStatus::NeedsRecovery);
            }
        }
        Err(err) if err.kind() == ErrorKind::Corrupt => {
            report.push(VerifyIssue::from_error("journal_unreadable", &err), VerifyStatus::Corrupt);
        }
        Err(err) => return Err(err),
    }

    let files = RecordFiles::new(layout.records_dir());
    let temp = files.temp_paths()?;
    report.temp_files = temp.len();
    for path in temp {
        let mut issue = VerifyIssue::new("temp_file", "leftover temp file from an interrupted write");
        issue.path = Some(path);
        report.push(issue, VerifyStatus::NeedsRecovery);
    }

    for path in files.record_paths()? {
        match load_record_file(&path) {
            Ok(record) => {
                report.records += 1;
                report.last_seq = report.last_seq.max(record.seq());
            }
            Err(err) if err.kind() == ErrorKind::Corrupt => {
                report.push(VerifyIssue::from_error("record_corrupt", &err), VerifyStatus::Corrupt);
            }
            Err(err) => return Err(err),
        }
    }

    Ok(report.finish())
}

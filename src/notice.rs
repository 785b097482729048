//! Purpose: Define a stable, structured schema for non-fatal stderr notices.
//! Exports: `Notice`, `notice_json`, `notice_time_now`, `recovery_notices`, `export_skip_notice`.
//! Role: Shared contract helper for CLI diagnostics (recovery findings, skipped export records).
//! Invariants: Notices are non-fatal and never alter stdout payloads.
//! Invariants: JSON schema is stable once published; fields are additive-only.
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{Map, Value, json};
use time::format_description::well_known::Rfc3339;

use crate::api::{RecordFailure, RecoveryReport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: String,
    pub time: String,
    pub cmd: String,
    pub store: String,
    pub message: String,
    pub details: Map<String, Value>,
}

pub fn notice_json(notice: &Notice) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(notice.kind));
    inner.insert("time".to_string(), json!(notice.time));
    inner.insert("cmd".to_string(), json!(notice.cmd));
    inner.insert("store".to_string(), json!(notice.store));
    inner.insert("message".to_string(), json!(notice.message));
    inner.insert("details".to_string(), Value::Object(notice.details.clone()));

    let mut outer = Map::new();
    outer.insert("notice".to_string(), Value::Object(inner));
    Value::Object(outer)
}

pub fn notice_time_now() -> Option<String> {
    let duration = SystemTime::now().duration_since(UNIX_EPOCH).ok()?;
    let ts = time::OffsetDateTime::from_unix_timestamp_nanos(duration.as_nanos() as i128).ok()?;
    ts.format(&Rfc3339).ok()
}

/// One notice per finding, in the order recovery made them.
pub fn recovery_notices(report: &RecoveryReport, cmd: &str, store: &str, time: &str) -> Vec<Notice> {
    let mut notices = Vec::new();
    for warning in &report.warnings {
        let mut details = Map::new();
        if let Some(offset) = warning.offset {
            details.insert("offset".to_string(), json!(offset));
        }
        if let Some(seq) = warning.seq {
            details.insert("seq".to_string(), json!(seq));
        }
        notices.push(Notice {
            kind: "journal_damage".to_string(),
            time: time.to_string(),
            cmd: cmd.to_string(),
            store: store.to_string(),
            message: warning.message.clone(),
            details,
        });
    }
    for rolled in &report.rolled_back {
        let mut details = Map::new();
        details.insert("seq".to_string(), json!(rolled.seq));
        details.insert("op".to_string(), json!(rolled.op));
        details.insert("id".to_string(), json!(rolled.id));
        details.insert("restored_version".to_string(), json!(rolled.restored_version));
        notices.push(Notice {
            kind: "rolled_back".to_string(),
            time: time.to_string(),
            cmd: cmd.to_string(),
            store: store.to_string(),
            message: format!("rolled back unfinished write to {}", rolled.id),
            details,
        });
    }
    notices
}

pub fn export_skip_notice(failure: &RecordFailure, store: &str, time: &str) -> Notice {
    let mut details = Map::new();
    details.insert("id".to_string(), json!(failure.id));
    details.insert("version".to_string(), json!(failure.version));
    Notice {
        kind: "export_skip".to_string(),
        time: time.to_string(),
        cmd: "export".to_string(),
        store: store.to_string(),
        message: failure.message.clone(),
        details,
    }
}

//! Purpose: Define the public Rust API boundary for recstore.
//! Exports: Store handle, records, snapshots, export pipeline, verification, errors.
//! Role: Public, additive-only surface used by the CLI and by embedding callers.
//! Invariants: This module is the supported path to storage primitives.
//! Invariants: Journal and frame internals stay behind `crate::core`.

mod validation;

#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::export::{
    ErrorPolicy, ExportFormat, ExportOptions, ExportResult, RecordFailure,
    default_export_file_name, export, export_to_path,
};
pub use crate::core::guard::{Phase, RecoveryReport, RolledBack};
pub use crate::core::journal::{Op, RecoveryWarning};
pub use crate::core::record::{DEFAULT_MAX_PAYLOAD_BYTES, MAX_ID_BYTES, Record, RecordId};
pub use crate::core::snapshot::StoreSnapshot;
pub use crate::core::store::{DEFAULT_CHECKPOINT_BYTES, Store, StoreInfo, StoreOptions};
pub use validation::{VerifyIssue, VerifyReport, VerifyStatus, verify_store};

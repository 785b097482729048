// Core modules implementing record storage, the intent journal, exports, and error modeling.
pub mod error;
pub mod export;
pub mod files;
pub mod format;
pub mod frame;
pub mod guard;
pub mod journal;
pub mod record;
pub mod snapshot;
pub mod store;

//! Persistence Module
//!
//! Durability for ledgerkv is an append-only log (AOF) of the mutating
//! commands clients issue. Reads and time-driven expiry never produce
//! records.
//!
//! ## Lifecycle
//!
//! ```text
//! startup:  read_records(path) ──> StorageEngine::restore(records)
//!                │
//!                ▼
//! runtime:  StorageEngine::set / delete ──> AppendOnlyLog::append
//!                │
//!                ▼
//! shutdown: sweeper stopped ──> AppendOnlyLog::sync
//! ```

pub mod aof;
pub mod record;

pub use aof::{AofError, AppendOnlyLog, FsyncPolicy, LoadedLog};
pub use record::{DecodeError, LogRecord};

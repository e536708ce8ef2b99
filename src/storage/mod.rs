//! Storage Engine Module
//!
//! This module provides the core storage functionality for ledgerkv: a
//! thread-safe, sharded key-value store with per-key expiry, write-ahead
//! logging of mutations, and a background expiry sweeper.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageEngine                           │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │...64    │──> AOF    │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ shards  │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!                            │ purge_expired()
//!              ┌─────────────┴─────────────┐
//!              │     ExpirySweeper         │
//!              │  (Background Tokio Task)  │
//!              └───────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use ledgerkv::storage::{StorageEngine, Value};
//! use bytes::Bytes;
//! use std::time::Duration;
//!
//! let engine = StorageEngine::new();
//!
//! engine.set(Bytes::from("name"), "Ariz".into(), None);
//! engine.set(
//!     Bytes::from("cfg"),
//!     Value::parse_json("{\"x\":1}").unwrap(),
//!     Some(Duration::from_secs(120)),
//! );
//!
//! assert_eq!(engine.get(b"cfg").unwrap().as_bytes(), &Bytes::from("{\"x\":1}"));
//! assert!(engine.delete(b"name").replaced);
//! ```

pub mod engine;
pub mod entry;
pub mod expiry;

pub use engine::{Durability, ReplayStats, StorageEngine, WriteOutcome};
pub use entry::{now_millis, Entry, Expiry, JsonDocument, Value, ValueKind};
pub use expiry::{ExpiryConfig, ExpirySweeper};

//! Command Handler Module
//!
//! This module implements the command processing layer for ledgerkv.
//! It receives decoded commands, executes them against the storage engine,
//! and returns appropriate responses.
//!
//! ## Architecture
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │  RESP Parser    │  (protocol module)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  (this module)
//! │                 │
//! │  - Dispatch     │
//! │  - Validate     │
//! │  - Execute      │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ StorageEngine   │  (storage module)
//! └─────────────────┘
//! ```
//!
//! ## Supported Commands
//!
//! - `PING`, `QUIT`, `DBSIZE`
//! - `SET`, `GET`, `DEL`, `TTL`
//! - `JSON.SET`, `JSON.GET`

pub mod handler;

use bytes::Bytes;

// Re-export the main command handler
pub use handler::{CommandHandler, DEFAULT_TTL};

/// Returns true if the command asks the server to close the connection.
pub fn is_quit(command: &[Bytes]) -> bool {
    command
        .first()
        .is_some_and(|name| name.eq_ignore_ascii_case(b"QUIT"))
}

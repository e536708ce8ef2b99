//! # ledgerkv - An In-Memory Key-Value Server with an Append-Only Log
//!
//! ledgerkv speaks a subset of the Redis wire protocol (RESP). It stores
//! plain strings and JSON documents with per-key expiry, records every
//! write in an append-only log, and replays that log on startup.
//!
//! ## Features
//!
//! - **Redis-Compatible Framing**: Any RESP client can talk to it
//! - **Sharded Storage**: 64 independently locked shards
//! - **TTL Support**: Lazy expiry on read plus a background sweeper
//! - **Durability**: Self-healing append-only log, replayed at startup
//! - **Graceful Shutdown**: Sessions, sweeper and log are stopped in order
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              ledgerkv                                   │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ TCP Server  │───>│ Connection  │───>│  Command    │                  │
//! │  │ (Listener)  │    │  Handler    │    │  Handler    │                  │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘                  │
//! │                                               │                         │
//! │                                               ▼                         │
//! │  ┌─────────────┐    ┌──────────────────────────────────────────────┐   │
//! │  │   RESP      │    │              StorageEngine                   │   │
//! │  │   Codec     │    │  ┌────────┐ ┌────────┐ ┌────────┐ ┌────────┐ │   │
//! │  │             │    │  │Shard 0 │ │Shard 1 │ │Shard 2 │ │...N    │ │   │
//! │  └─────────────┘    │  └────────┘ └────────┘ └────────┘ └────────┘ │   │
//! │                     └───────────────┬──────────────────────────────┘   │
//! │                          ▲          │ append                            │
//! │                          │          ▼                                   │
//! │        ┌─────────────────┴──┐   ┌────────────────┐                      │
//! │        │   ExpirySweeper    │   │ AppendOnlyLog  │                      │
//! │        └────────────────────┘   └────────────────┘                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use ledgerkv::{server, CommandHandler, ConnectionStats, ExpiryConfig, ExpirySweeper, StorageEngine};
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() {
//!     let storage = Arc::new(StorageEngine::new());
//!     let sweeper = ExpirySweeper::start(Arc::clone(&storage), ExpiryConfig::default());
//!
//!     let listener = TcpListener::bind("127.0.0.1:1122").await.unwrap();
//!     server::run(
//!         listener,
//!         CommandHandler::new(storage),
//!         Arc::new(ConnectionStats::new()),
//!         None,
//!         async { let _ = tokio::signal::ctrl_c().await; },
//!     )
//!     .await;
//!
//!     sweeper.shutdown().await;
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`protocol`]: RESP command decoding and reply encoding
//! - [`storage`]: Thread-safe storage engine with TTL support
//! - [`persistence`]: Append-only log and its record format
//! - [`commands`]: The command table
//! - [`connection`]: Client connection management
//! - [`server`]: Accept loop with graceful shutdown
//! - [`config`]: Command-line configuration

pub mod commands;
pub mod config;
pub mod connection;
pub mod persistence;
pub mod protocol;
pub mod server;
pub mod storage;

// Re-export commonly used types for convenience
pub use commands::CommandHandler;
pub use config::Config;
pub use connection::{handle_connection, ConnectionStats};
pub use persistence::{AppendOnlyLog, FsyncPolicy, LogRecord};
pub use protocol::{CommandReader, ParseError, RespValue};
pub use storage::{ExpiryConfig, ExpirySweeper, StorageEngine};

/// The default port ledgerkv listens on
pub const DEFAULT_PORT: u16 = 1122;

/// The default host ledgerkv binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of ledgerkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

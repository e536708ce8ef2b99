//! Command Handler Module
//!
//! This module implements the command table of ledgerkv. It receives the
//! elements of one decoded command, validates arity, runs the command
//! against the storage engine and returns the reply to encode.
//!
//! ## Supported Commands
//!
//! - `PING [message]` - Test connection
//! - `SET key value [seconds | PERSIST]` - Store a plain string
//! - `JSON.SET key json [seconds | PERSIST]` - Store a validated JSON document
//! - `GET key` - Get a key's value (JSON is returned as it was sent)
//! - `JSON.GET key` - Get a JSON document in compact form
//! - `DEL key` - Delete a key, always `+OK`
//! - `TTL key` - Remaining lifetime in seconds
//! - `DBSIZE` - Number of keys held
//! - `QUIT` - Close the connection
//!
//! When the TTL argument is omitted the handler's default TTL applies;
//! `PERSIST` stores a key that never expires.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CommandHandler                          │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │  │  execute()  │───>│  dispatch() │───>│   cmd_*()   │     │
//! │  └─────────────┘    └─────────────┘    └─────────────┘     │
//! │                                               │             │
//! │                                               ▼             │
//! │                                      StorageEngine          │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use crate::protocol::RespValue;
use crate::storage::{now_millis, Durability, StorageEngine, Value, WriteOutcome};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::{trace, warn};

/// TTL applied when SET or JSON.SET omit one.
pub const DEFAULT_TTL: Duration = Duration::from_secs(120);

/// Handles client commands by dispatching them to the storage engine.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    /// The storage engine
    storage: Arc<StorageEngine>,
    /// TTL used when a write omits one; `None` means such keys never expire
    default_ttl: Option<Duration>,
    /// Reply with an error when a write could not be logged
    strict_durability: bool,
}

impl CommandHandler {
    /// Creates a new command handler with the given storage engine.
    pub fn new(storage: Arc<StorageEngine>) -> Self {
        Self {
            storage,
            default_ttl: Some(DEFAULT_TTL),
            strict_durability: false,
        }
    }

    /// Sets the TTL applied when a write omits one.
    pub fn with_default_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// When enabled, writes whose log append failed reply with an error
    /// instead of `+OK`. The in-memory change is kept either way.
    pub fn with_strict_durability(mut self, strict: bool) -> Self {
        self.strict_durability = strict;
        self
    }

    /// Executes a command and returns the response.
    ///
    /// # Arguments
    ///
    /// * `command` - The elements of one decoded command, name first
    ///
    /// # Returns
    ///
    /// The RESP response to send back to the client.
    pub fn execute(&self, command: &[Bytes]) -> RespValue {
        let Some((name, args)) = command.split_first() else {
            return RespValue::error("ERR empty command");
        };

        let cmd_name = String::from_utf8_lossy(name).to_uppercase();
        trace!(command = %cmd_name, args = args.len(), "Executing command");

        self.dispatch(&cmd_name, args)
    }

    /// Dispatches a command to its handler.
    fn dispatch(&self, cmd: &str, args: &[Bytes]) -> RespValue {
        match cmd {
            "PING" => self.cmd_ping(args),
            "SET" => self.cmd_set(args),
            "JSON.SET" => self.cmd_json_set(args),
            "GET" => self.cmd_get(args),
            "JSON.GET" => self.cmd_json_get(args),
            "DEL" => self.cmd_del(args),
            "TTL" => self.cmd_ttl(args),
            "DBSIZE" => self.cmd_dbsize(args),
            "QUIT" => RespValue::ok(),

            // Unknown command
            _ => RespValue::error(format!("ERR unknown command '{}'", cmd)),
        }
    }

    // ========================================================================
    // Helper functions
    // ========================================================================

    /// Resolves the optional TTL argument of a write.
    fn parse_ttl(&self, arg: Option<&Bytes>) -> Result<Option<Duration>, RespValue> {
        let Some(arg) = arg else {
            return Ok(self.default_ttl);
        };

        if arg.eq_ignore_ascii_case(b"PERSIST") {
            return Ok(None);
        }

        std::str::from_utf8(arg)
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(|secs| Some(Duration::from_secs(secs)))
            .ok_or_else(|| RespValue::error("ERR invalid TTL value"))
    }

    /// Turns the outcome of a write into its reply.
    fn write_reply(&self, cmd: &str, outcome: WriteOutcome) -> RespValue {
        match outcome.durability {
            Durability::Degraded(reason) if self.strict_durability => {
                warn!(command = cmd, reason = %reason, "Rejecting write that was not logged");
                RespValue::error(format!("IOERR durability degraded: {}", reason))
            }
            _ => RespValue::ok(),
        }
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// PING [message]
    fn cmd_ping(&self, args: &[Bytes]) -> RespValue {
        match args {
            [] => RespValue::pong(),
            [msg] => RespValue::bulk_string(msg.clone()),
            _ => wrong_arity("ping"),
        }
    }

    /// SET key value [seconds | PERSIST]
    fn cmd_set(&self, args: &[Bytes]) -> RespValue {
        if !(2..=3).contains(&args.len()) {
            return wrong_arity("set");
        }

        let ttl = match self.parse_ttl(args.get(2)) {
            Ok(ttl) => ttl,
            Err(e) => return e,
        };

        let outcome = self
            .storage
            .set(args[0].clone(), Value::String(args[1].clone()), ttl);
        self.write_reply("SET", outcome)
    }

    /// JSON.SET key json [seconds | PERSIST]
    fn cmd_json_set(&self, args: &[Bytes]) -> RespValue {
        if !(2..=3).contains(&args.len()) {
            return wrong_arity("json.set");
        }

        let ttl = match self.parse_ttl(args.get(2)) {
            Ok(ttl) => ttl,
            Err(e) => return e,
        };

        let value = match Value::parse_json(args[1].clone()) {
            Ok(v) => v,
            Err(e) => return RespValue::error(format!("ERR invalid JSON: {}", e)),
        };

        let outcome = self.storage.set(args[0].clone(), value, ttl);
        self.write_reply("JSON.SET", outcome)
    }

    /// GET key
    fn cmd_get(&self, args: &[Bytes]) -> RespValue {
        let [key] = args else {
            return wrong_arity("get");
        };

        match self.storage.get(key) {
            Some(value) => RespValue::bulk_string(value.as_bytes().clone()),
            None => RespValue::null(),
        }
    }

    /// JSON.GET key
    fn cmd_json_get(&self, args: &[Bytes]) -> RespValue {
        let [key] = args else {
            return wrong_arity("json.get");
        };

        match self.storage.get(key) {
            Some(Value::Json(doc)) => match serde_json::to_vec(doc.tree()) {
                Ok(text) => RespValue::bulk_string(text),
                Err(e) => RespValue::error(format!("ERR {}", e)),
            },
            Some(Value::String(_)) => RespValue::error(
                "WRONGTYPE Operation against a key holding the wrong kind of value",
            ),
            None => RespValue::null(),
        }
    }

    /// DEL key
    fn cmd_del(&self, args: &[Bytes]) -> RespValue {
        let [key] = args else {
            return wrong_arity("del");
        };

        let outcome = self.storage.delete(key);
        self.write_reply("DEL", outcome)
    }

    /// TTL key
    fn cmd_ttl(&self, args: &[Bytes]) -> RespValue {
        let [key] = args else {
            return wrong_arity("ttl");
        };

        match self.storage.get_entry(key) {
            Some(entry) => match entry.expiry.remaining(now_millis()) {
                // Round up so a live key never reports 0
                Some(left) => RespValue::integer(left.as_millis().div_ceil(1000) as i64),
                None => RespValue::integer(-1),
            },
            None => RespValue::integer(-2),
        }
    }

    /// DBSIZE
    fn cmd_dbsize(&self, args: &[Bytes]) -> RespValue {
        if !args.is_empty() {
            return wrong_arity("dbsize");
        }
        RespValue::integer(self.storage.len() as i64)
    }
}

fn wrong_arity(cmd: &str) -> RespValue {
    RespValue::error(format!(
        "ERR wrong number of arguments for '{}' command",
        cmd
    ))
}

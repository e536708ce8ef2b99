//! Thread-Safe Storage Engine with Expiry and Write-Ahead Logging
//!
//! This module implements the authoritative in-memory key space. Every
//! mutation a client issues is appended to the [`AppendOnlyLog`] (when one is
//! attached) while the key's lock is held, so no caller can observe the new
//! in-memory state before its log record was issued.
//!
//! ## Design Decisions
//!
//! 1. **Sharded Locks**: Keys are hashed over independent `RwLock`ed shards.
//!    Each `set`/`get`/`delete` is atomic for its key.
//! 2. **Lazy + Periodic Expiry**: Reads treat expired entries as absent but
//!    never remove them. Memory is reclaimed by [`StorageEngine::purge_expired`],
//!    which the background sweeper calls, or by a later write to the key.
//! 3. **Lock Order**: The log's mutex is only ever taken inside a shard's
//!    write lock, never the reverse.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageEngine                           │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ Shard N │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ RwLock  │           │
//! │  └────┬────┘ └────┬────┘ └────┬────┘ └────┬────┘           │
//! │       └───────────┴─────┬─────┴───────────┘                 │
//! │                         ▼                                   │
//! │                  AppendOnlyLog (Mutex)                      │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use crate::persistence::{AppendOnlyLog, LogRecord};
use crate::storage::entry::{now_millis, Entry, Expiry, Value, ValueKind};
use bytes::Bytes;
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tracing::warn;

/// Number of shards for the storage engine.
const NUM_SHARDS: usize = 64;

/// Whether a mutation reached the append-only log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Durability {
    /// The log record was written
    Committed,
    /// No log is attached to the engine
    Unlogged,
    /// The log append failed; the mutation was applied in memory only
    Degraded(String),
}

/// Result of a mutating operation.
///
/// The in-memory mutation always succeeds; `durability` says whether it was
/// also logged, so callers can tell "committed" from "applied in memory".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    /// A live (unexpired) entry was overwritten or removed
    pub replaced: bool,
    pub durability: Durability,
}

/// Counters from replaying a log into the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Records applied to the key space
    pub applied: usize,
    /// SET records whose expiry had already passed
    pub expired: usize,
    /// SET records whose JSON value no longer parses
    pub invalid: usize,
}

#[derive(Debug, Default)]
struct Shard {
    data: RwLock<HashMap<Bytes, Entry>>,
}

impl Shard {
    // Every critical section is a single map operation, so a poisoned lock
    // still guards a consistent map.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<Bytes, Entry>> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Bytes, Entry>> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The main storage engine for ledgerkv.
///
/// Wrap it in an `Arc` and share it between connection tasks and the
/// expiry sweeper; all operations are thread-safe.
///
/// # Example
///
/// ```
/// use ledgerkv::storage::StorageEngine;
/// use bytes::Bytes;
/// use std::time::Duration;
///
/// let engine = StorageEngine::new();
///
/// engine.set(Bytes::from("name"), "Ariz".into(), None);
/// let value = engine.get(b"name").unwrap();
/// assert_eq!(value.as_bytes(), &Bytes::from("Ariz"));
///
/// engine.set(Bytes::from("session"), "abc123".into(), Some(Duration::from_secs(60)));
/// assert_eq!(engine.len(), 2);
/// ```
pub struct StorageEngine {
    shards: Vec<Shard>,
    log: Option<Arc<AppendOnlyLog>>,
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("shards", &self.shards.len())
            .field("keys", &self.len())
            .field("log", &self.log.as_ref().map(|log| log.path().to_path_buf()))
            .finish()
    }
}

impl Default for StorageEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine {
    /// Creates an empty engine with no log attached.
    pub fn new() -> Self {
        Self {
            shards: (0..NUM_SHARDS).map(|_| Shard::default()).collect(),
            log: None,
        }
    }

    /// Attaches the append-only log that mutations are written to.
    pub fn with_log(mut self, log: Arc<AppendOnlyLog>) -> Self {
        self.log = Some(log);
        self
    }

    #[inline]
    fn get_shard(&self, key: &[u8]) -> &Shard {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % NUM_SHARDS]
    }

    /// Inserts or overwrites `key`.
    ///
    /// The entry expires `ttl` after now, or never when `ttl` is `None`. One
    /// log record is appended.
    pub fn set(&self, key: Bytes, value: Value, ttl: Option<Duration>) -> WriteOutcome {
        let now = now_millis();
        let record = LogRecord::Set {
            key: key.clone(),
            value: value.as_bytes().clone(),
            kind: value.kind(),
            ttl,
            written_at: now,
        };
        let entry = Entry::new(value, Expiry::from_ttl(now, ttl));
        self.apply(key, Some(entry), Some(&record), now)
    }

    /// Returns the value for `key`, or `None` if it was never set, was
    /// deleted, or has expired.
    ///
    /// Expired entries are left in place; removing them is the sweeper's job.
    pub fn get(&self, key: &[u8]) -> Option<Value> {
        self.get_entry(key).map(|entry| entry.value)
    }

    /// Returns the live entry for `key`, including its expiry.
    pub fn get_entry(&self, key: &[u8]) -> Option<Entry> {
        let data = self.get_shard(key).read();
        data.get(key)
            .filter(|entry| !entry.is_expired())
            .cloned()
    }

    /// Removes `key` unconditionally and appends a log record.
    ///
    /// Deleting a missing key is not an error.
    pub fn delete(&self, key: &[u8]) -> WriteOutcome {
        let now = now_millis();
        let key = Bytes::copy_from_slice(key);
        let record = LogRecord::Del {
            key: key.clone(),
            written_at: now,
        };
        self.apply(key, None, Some(&record), now)
    }

    /// The single mutation path shared by client writes and log replay.
    ///
    /// The record, if any, is appended while the shard's write lock is held
    /// and before the map changes. A failed append still lets the mutation
    /// through and is reported as [`Durability::Degraded`].
    ///
    /// The append is blocking file I/O, including an `fsync` per record
    /// under [`FsyncPolicy::Always`](crate::persistence::FsyncPolicy), and it
    /// runs on the calling runtime worker with the shard lock held. Writers
    /// to the same shard queue behind a slow disk, and so do readers of it.
    fn apply(
        &self,
        key: Bytes,
        entry: Option<Entry>,
        record: Option<&LogRecord>,
        now: u64,
    ) -> WriteOutcome {
        let mut data = self.get_shard(&key).write();

        let durability = match (record, &self.log) {
            (Some(record), Some(log)) => match log.append(record) {
                Ok(()) => Durability::Committed,
                Err(e) => {
                    warn!(error = %e, "Append-only log write failed, durability degraded");
                    Durability::Degraded(e.to_string())
                }
            },
            _ => Durability::Unlogged,
        };

        let previous = match entry {
            Some(entry) => data.insert(key, entry),
            None => data.remove(&key),
        };
        let replaced = previous.is_some_and(|old| !old.expiry.is_expired_at(now));

        WriteOutcome {
            replaced,
            durability,
        }
    }

    /// Removes every entry whose expiry has passed and returns how many were
    /// removed.
    ///
    /// Expiry is not a client-issued write, so nothing is logged.
    pub fn purge_expired(&self) -> usize {
        let now = now_millis();
        let mut removed = 0;

        for shard in &self.shards {
            let mut data = shard.write();
            let before = data.len();
            data.retain(|_, entry| !entry.expiry.is_expired_at(now));
            removed += before - data.len();
        }

        removed
    }

    /// Rebuilds the key space from log records, in order.
    ///
    /// Each record goes through the same mutation path as a live write, but
    /// nothing is logged again. A SET whose expiry (measured from its original
    /// write time) has already passed removes the key instead.
    pub fn restore(&self, records: impl IntoIterator<Item = LogRecord>) -> ReplayStats {
        let now = now_millis();
        let mut stats = ReplayStats::default();

        for record in records {
            let expiry = record.expiry();
            let (key, entry) = match record {
                LogRecord::Set { key, .. } if expiry.is_expired_at(now) => {
                    stats.expired += 1;
                    (key, None)
                }
                LogRecord::Set {
                    key, value, kind, ..
                } => {
                    let value = match kind {
                        ValueKind::String => Value::String(value),
                        ValueKind::Json => match Value::parse_json(value) {
                            Ok(value) => value,
                            Err(e) => {
                                warn!(key = ?key, error = %e, "Skipping JSON record that no longer parses");
                                stats.invalid += 1;
                                continue;
                            }
                        },
                    };
                    (key, Some(Entry::new(value, expiry)))
                }
                LogRecord::Del { key, .. } => (key, None),
            };

            let _ = self.apply(key, entry, None, now);
            stats.applied += 1;
        }

        stats
    }

    /// Number of entries held, including expired entries not yet purged.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|shard| shard.read().is_empty())
    }
}

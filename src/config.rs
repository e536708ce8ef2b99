//! Command-Line Configuration
//!
//! All settings come from flags; there is no configuration file.

use crate::persistence::FsyncPolicy;
use crate::storage::ExpiryConfig;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// ledgerkv - an in-memory key-value server with an append-only log.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Host to bind to
    #[arg(long, default_value = crate::DEFAULT_HOST)]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = crate::DEFAULT_PORT)]
    pub port: u16,

    /// Path of the append-only log
    #[arg(long, default_value = "aof.log")]
    pub aof_path: PathBuf,

    /// Run without an append-only log
    #[arg(long)]
    pub no_aof: bool,

    /// When appended records are flushed to disk
    #[arg(long, value_enum, default_value_t = FsyncPolicy::Os)]
    pub fsync: FsyncPolicy,

    /// Start with an empty store even if the log exists
    #[arg(long)]
    pub no_replay: bool,

    /// Seconds between expiry sweeps
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u64).range(1..))]
    pub sweep_interval_secs: u64,

    /// TTL in seconds for writes that omit one (0 = never expire)
    #[arg(long, default_value_t = 120)]
    pub default_ttl_secs: u64,

    /// Close connections that send no command for this many seconds
    #[arg(long)]
    pub idle_timeout_secs: Option<u64>,

    /// Reply with an error when a write could not be logged
    #[arg(long)]
    pub strict_durability: bool,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The append-only log path, unless logging is disabled.
    pub fn aof_path(&self) -> Option<&PathBuf> {
        (!self.no_aof).then_some(&self.aof_path)
    }

    pub fn default_ttl(&self) -> Option<Duration> {
        (self.default_ttl_secs > 0).then(|| Duration::from_secs(self.default_ttl_secs))
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }

    pub fn expiry(&self) -> ExpiryConfig {
        ExpiryConfig {
            interval: Duration::from_secs(self.sweep_interval_secs),
        }
    }
}

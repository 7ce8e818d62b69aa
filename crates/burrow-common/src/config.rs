//! Configuration for a BurrowDB instance.

use crate::error::{BurrowError, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default periodic flush interval.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Default byte threshold for triggering a flush (10 MiB).
pub const DEFAULT_MAX_BUFFER_BYTES: u64 = 10 * 1024 * 1024;

/// Default flush-signal channel capacity.
pub const DEFAULT_FLUSH_CHANNEL_SIZE: usize = 10;

/// Default legacy operation-count threshold.
pub const DEFAULT_WAL_FLUSH_SIZE: usize = 1024;

/// Configuration options for opening a database.
#[derive(Debug, Clone)]
pub struct Config {
    /// File path for the WAL. Defaults to `<db-path>.wal`.
    pub wal_path: Option<PathBuf>,
    /// Period of the background flusher's timer.
    pub wal_flush_interval: Duration,
    /// Buffered-bytes threshold that signals a flush.
    pub max_buffer_bytes: u64,
    /// Capacity of the flush-signal channel. Zero selects the default.
    pub flush_channel_size: usize,
    /// Legacy operation-count threshold. Validated but not consulted by the
    /// write path; only `max_buffer_bytes` triggers flushes.
    pub wal_flush_size: usize,
    /// Call fdatasync after every WAL append. Off by default: durability is
    /// then at OS page-cache granularity until the file is naturally synced.
    pub sync_on_write: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            wal_path: None,
            wal_flush_interval: DEFAULT_FLUSH_INTERVAL,
            max_buffer_bytes: DEFAULT_MAX_BUFFER_BYTES,
            flush_channel_size: DEFAULT_FLUSH_CHANNEL_SIZE,
            wal_flush_size: DEFAULT_WAL_FLUSH_SIZE,
            sync_on_write: false,
        }
    }
}

impl Config {
    /// Fills unset fields with their defaults, resolving the WAL path
    /// relative to the database path.
    pub fn resolved(mut self, db_path: &Path) -> Self {
        if self.wal_path.is_none() {
            let mut wal = db_path.as_os_str().to_owned();
            wal.push(".wal");
            self.wal_path = Some(PathBuf::from(wal));
        }
        if self.max_buffer_bytes == 0 {
            self.max_buffer_bytes = DEFAULT_MAX_BUFFER_BYTES;
        }
        if self.flush_channel_size == 0 {
            self.flush_channel_size = DEFAULT_FLUSH_CHANNEL_SIZE;
        }
        self
    }

    /// Validates the configuration. Call after [`Config::resolved`].
    pub fn validate(&self) -> Result<()> {
        if self.wal_flush_size == 0 {
            return Err(BurrowError::ConfigInvalid {
                field: "wal_flush_size",
                value: self.wal_flush_size.to_string(),
                reason: "must be positive",
            });
        }
        if self.wal_flush_interval.is_zero() {
            return Err(BurrowError::ConfigInvalid {
                field: "wal_flush_interval",
                value: format!("{:?}", self.wal_flush_interval),
                reason: "must be positive",
            });
        }
        match &self.wal_path {
            None => {
                return Err(BurrowError::ConfigInvalid {
                    field: "wal_path",
                    value: String::new(),
                    reason: "cannot be empty",
                });
            }
            Some(path) if path.as_os_str().is_empty() => {
                return Err(BurrowError::ConfigInvalid {
                    field: "wal_path",
                    value: String::new(),
                    reason: "cannot be empty",
                });
            }
            Some(_) => {}
        }
        if self.max_buffer_bytes == 0 {
            return Err(BurrowError::ConfigInvalid {
                field: "max_buffer_bytes",
                value: self.max_buffer_bytes.to_string(),
                reason: "must be positive",
            });
        }
        Ok(())
    }
}

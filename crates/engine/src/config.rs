//! Writer configuration via `esink.toml`
//!
//! Every limit the bulk writer enforces lives in [`SinkConfig`]. It can be
//! built in code with the `with_*` setters or loaded from a TOML file; both
//! paths go through [`SinkConfig::validate`] before a writer is opened.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Config file name conventionally used for a sink
pub const CONFIG_FILE_NAME: &str = "esink.toml";

fn default_max_batch_size() -> usize {
    500
}

fn default_max_batch_size_in_bytes() -> u64 {
    5 * 1024 * 1024 // 5MB
}

fn default_max_in_flight_requests() -> usize {
    50
}

fn default_max_buffered_requests() -> usize {
    10_000
}

fn default_max_time_in_buffer_ms() -> u64 {
    5_000
}

fn default_max_record_size_in_bytes() -> u64 {
    1024 * 1024 // 1MB
}

fn default_flush_on_checkpoint() -> bool {
    true
}

fn default_retry_backoff_ms() -> u64 {
    100
}

fn default_flush_timeout_ms() -> u64 {
    30_000
}

/// Bulk writer configuration.
///
/// # Example
///
/// ```toml
/// max_batch_size = 500
/// max_batch_size_in_bytes = 5242880
/// max_in_flight_requests = 50
/// max_buffered_requests = 10000
/// max_time_in_buffer_ms = 5000
/// max_record_size_in_bytes = 1048576
/// flush_on_checkpoint = true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Maximum operations per batch.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// Maximum summed operation size per batch.
    #[serde(default = "default_max_batch_size_in_bytes")]
    pub max_batch_size_in_bytes: u64,
    /// Maximum batches awaiting a response at once.
    #[serde(default = "default_max_in_flight_requests")]
    pub max_in_flight_requests: usize,
    /// Maximum operations held in the buffer; admissions beyond it fail.
    #[serde(default = "default_max_buffered_requests")]
    pub max_buffered_requests: usize,
    /// Oldest buffered operation triggers a flush after this long.
    #[serde(default = "default_max_time_in_buffer_ms")]
    pub max_time_in_buffer_ms: u64,
    /// Operations larger than this are rejected at admission.
    #[serde(default = "default_max_record_size_in_bytes")]
    pub max_record_size_in_bytes: u64,
    /// Flush everything before taking a checkpoint snapshot.
    #[serde(default = "default_flush_on_checkpoint")]
    pub flush_on_checkpoint: bool,
    /// Pause before dispatching again after a batch had to be requeued.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Upper bound on a full flush (checkpoint or close).
    #[serde(default = "default_flush_timeout_ms")]
    pub flush_timeout_ms: u64,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            max_batch_size_in_bytes: default_max_batch_size_in_bytes(),
            max_in_flight_requests: default_max_in_flight_requests(),
            max_buffered_requests: default_max_buffered_requests(),
            max_time_in_buffer_ms: default_max_time_in_buffer_ms(),
            max_record_size_in_bytes: default_max_record_size_in_bytes(),
            flush_on_checkpoint: default_flush_on_checkpoint(),
            retry_backoff_ms: default_retry_backoff_ms(),
            flush_timeout_ms: default_flush_timeout_ms(),
        }
    }
}

impl SinkConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum batch size (builder pattern).
    pub fn with_max_batch_size(mut self, count: usize) -> Self {
        self.max_batch_size = count;
        self
    }

    /// Set maximum batch size in bytes (builder pattern).
    pub fn with_max_batch_size_in_bytes(mut self, bytes: u64) -> Self {
        self.max_batch_size_in_bytes = bytes;
        self
    }

    /// Set maximum in-flight requests (builder pattern).
    pub fn with_max_in_flight_requests(mut self, count: usize) -> Self {
        self.max_in_flight_requests = count;
        self
    }

    /// Set maximum buffered requests (builder pattern).
    pub fn with_max_buffered_requests(mut self, count: usize) -> Self {
        self.max_buffered_requests = count;
        self
    }

    /// Set maximum time in buffer (builder pattern).
    pub fn with_max_time_in_buffer_ms(mut self, ms: u64) -> Self {
        self.max_time_in_buffer_ms = ms;
        self
    }

    /// Set maximum record size (builder pattern).
    pub fn with_max_record_size_in_bytes(mut self, bytes: u64) -> Self {
        self.max_record_size_in_bytes = bytes;
        self
    }

    /// Set flush-on-checkpoint (builder pattern).
    pub fn with_flush_on_checkpoint(mut self, flush: bool) -> Self {
        self.flush_on_checkpoint = flush;
        self
    }

    /// Set retry backoff (builder pattern).
    pub fn with_retry_backoff_ms(mut self, ms: u64) -> Self {
        self.retry_backoff_ms = ms;
        self
    }

    /// Set flush timeout (builder pattern).
    pub fn with_flush_timeout_ms(mut self, ms: u64) -> Self {
        self.flush_timeout_ms = ms;
        self
    }

    /// `max_time_in_buffer_ms` as a Duration
    pub fn max_time_in_buffer(&self) -> Duration {
        Duration::from_millis(self.max_time_in_buffer_ms)
    }

    /// `retry_backoff_ms` as a Duration
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// `flush_timeout_ms` as a Duration
    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let limits = [
            ("max_batch_size", self.max_batch_size as u64),
            ("max_batch_size_in_bytes", self.max_batch_size_in_bytes),
            ("max_in_flight_requests", self.max_in_flight_requests as u64),
            ("max_buffered_requests", self.max_buffered_requests as u64),
            ("max_time_in_buffer_ms", self.max_time_in_buffer_ms),
            ("max_record_size_in_bytes", self.max_record_size_in_bytes),
            ("flush_timeout_ms", self.flush_timeout_ms),
        ];
        for (name, value) in limits {
            if value == 0 {
                return Err(ConfigError::ZeroLimit(name));
            }
        }
        if self.max_record_size_in_bytes > self.max_batch_size_in_bytes {
            return Err(ConfigError::RecordExceedsBatch {
                record: self.max_record_size_in_bytes,
                batch: self.max_batch_size_in_bytes,
            });
        }
        if self.max_batch_size > self.max_buffered_requests {
            return Err(ConfigError::BatchExceedsBuffer {
                batch: self.max_batch_size,
                buffer: self.max_buffered_requests,
            });
        }
        Ok(())
    }

    /// Create a configuration sized for tests (tiny batches, short timers).
    pub fn for_testing() -> Self {
        Self {
            max_batch_size: 10,
            max_batch_size_in_bytes: 64 * 1024,
            max_in_flight_requests: 2,
            max_buffered_requests: 100,
            max_time_in_buffer_ms: 100,
            max_record_size_in_bytes: 16 * 1024,
            flush_on_checkpoint: true,
            retry_backoff_ms: 10,
            flush_timeout_ms: 5_000,
        }
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# esink bulk writer configuration

# A batch is dispatched once it holds this many operations...
max_batch_size = 500
# ...or this many bytes of encoded operations...
max_batch_size_in_bytes = 5242880
# ...or once the oldest buffered operation has waited this long.
max_time_in_buffer_ms = 5000

# Batches awaiting a response at once. Flushes wait for a free slot.
max_in_flight_requests = 50

# Buffer capacity. Writes fail with "buffer full" beyond it.
max_buffered_requests = 10000

# Single operations larger than this are rejected.
max_record_size_in_bytes = 1048576

# Flush the whole buffer before every checkpoint snapshot.
flush_on_checkpoint = true

# Pause after a batch had to be requeued.
retry_backoff_ms = 100

# Give up on a full flush (checkpoint or close) after this long.
flush_timeout_ms = 30000
"#
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::Read(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: SinkConfig = toml::from_str(&content).map_err(|e| {
            ConfigError::Parse(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> Result<(), ConfigError> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                ConfigError::Write(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::Write(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            ConfigError::Write(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A limit that must be positive is zero.
    #[error("{0} must be greater than zero")]
    ZeroLimit(&'static str),

    /// A single record could never fit in a batch.
    #[error("max_record_size_in_bytes ({record}) cannot exceed max_batch_size_in_bytes ({batch})")]
    RecordExceedsBatch {
        /// Configured record limit
        record: u64,
        /// Configured batch byte limit
        batch: u64,
    },

    /// A full batch could never be buffered.
    #[error("max_batch_size ({batch}) cannot exceed max_buffered_requests ({buffer})")]
    BatchExceedsBuffer {
        /// Configured batch count limit
        batch: usize,
        /// Configured buffer capacity
        buffer: usize,
    },

    /// The config file could not be read.
    #[error("{0}")]
    Read(String),

    /// The config file could not be written.
    #[error("{0}")]
    Write(String),

    /// The config file is not valid TOML for this schema.
    #[error("{0}")]
    Parse(String),
}

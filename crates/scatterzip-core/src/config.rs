use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ScatterError;
use crate::types::{CompressionLevel, Result};

/// Default bounded wait for outstanding tasks when a writer finishes.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(60);

/// Settings for a [`ScatterWriter`](crate::ScatterWriter).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Number of compression workers. Must be at least one.
    pub workers: usize,
    pub compression_level: CompressionLevel,
    /// How long `write_to` waits for outstanding tasks before giving up.
    pub shutdown_timeout: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get().max(1),
            compression_level: CompressionLevel::Default,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl WriterConfig {
    pub fn new(workers: usize, compression_level: CompressionLevel) -> Self {
        Self {
            workers,
            compression_level,
            ..Self::default()
        }
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Checks every field; nothing is spawned for a config that fails here.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(ScatterError::InvalidConfiguration(
                "worker count must be at least 1".to_string(),
            ));
        }
        if self.shutdown_timeout.is_zero() {
            return Err(ScatterError::InvalidConfiguration(
                "shutdown timeout must be non-zero".to_string(),
            ));
        }
        self.compression_level.validate()
    }
}

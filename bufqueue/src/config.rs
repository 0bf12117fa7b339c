use std::path::Path;
use std::time::Duration;

use serde_derive::{Deserialize, Serialize};
use tracing::warn;

use super::errors::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Buffers seeded into the empty queue.
    pub buffer_count: usize,
    /// Capacity of each buffer in bytes.
    pub buffer_size: usize,
    pub producers: usize,
    pub consumers: usize,
    /// How long a pop waits before reporting a timeout. Readers treat a timeout as
    /// "no more data" and exit. A value too large for a deadline waits without one.
    pub pop_timeout_ms: u64,
    /// How long to run before stopping the writers. A value too large for a deadline
    /// runs until a termination signal arrives.
    pub run_for_secs: u64,
    /// Put the data source behind a lock when it is not reentrant.
    pub serialize_source: bool,
    pub serialize_sink: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            buffer_count: 3,
            buffer_size: 512,
            producers: 4,
            consumers: 2,
            pop_timeout_ms: 3_000,
            run_for_secs: 5,
            serialize_source: false,
            serialize_sink: false,
        }
    }
}

impl PipelineConfig {
    /// Loads the config at `path`, writing the defaults there if the file is missing.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<PipelineConfig, ConfigError> {
        let cfg: PipelineConfig = confy::load_path(path)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_size == 0 {
            return Err(ConfigError::Invalid("buffer_size must be positive".into()));
        }
        if self.producers == 0 || self.consumers == 0 {
            return Err(ConfigError::Invalid(
                "at least one producer and one consumer are required".into(),
            ));
        }
        if self.pop_timeout_ms == 0 {
            return Err(ConfigError::Invalid("pop_timeout_ms must be positive".into()));
        }
        if self.buffer_count == 0 {
            warn!("buffer_count is 0, producers will never get a buffer");
        }
        Ok(())
    }

    pub fn pop_timeout(&self) -> Duration {
        Duration::from_millis(self.pop_timeout_ms)
    }

    pub fn run_for(&self) -> Duration {
        Duration::from_secs(self.run_for_secs)
    }
}

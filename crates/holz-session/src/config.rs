//! Session configuration

use std::path::Path;
use std::time::Duration;

use holz_protocol::InstrumentScale;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Configuration for a [`crate::SessionManager`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Bound on each write and each reply wait (milliseconds)
    pub command_timeout_ms: u64,
    /// Bound on opening and probing a device (milliseconds)
    pub open_timeout_ms: u64,
    /// How long to wait for the HS9000 identification reply (milliseconds)
    pub probe_timeout_ms: u64,
    /// Retries for writes that failed before any byte was sent
    pub write_retries: u32,
    /// Pause between write retries (milliseconds)
    pub retry_delay_ms: u64,
    /// Consecutive decode errors that latch a device into the faulted state
    pub max_decode_errors: u32,
    /// Pending commands allowed per device before callers wait
    pub queue_depth: usize,
    /// Fixed-point scales for legacy string-form setters
    pub scale: InstrumentScale,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: 2000,
            open_timeout_ms: 3000,
            probe_timeout_ms: 500,
            write_retries: 2,
            retry_delay_ms: 20,
            max_decode_errors: 3,
            queue_depth: 32,
            scale: InstrumentScale::LEGACY,
        }
    }
}

impl SessionConfig {
    /// Parse a configuration from JSON; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

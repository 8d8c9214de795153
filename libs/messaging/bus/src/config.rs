//! Bus configuration.
//!
//! Loaded from TOML at startup or constructed programmatically; every field
//! has a default so a bare `[bus]` table (or `BusConfig::default()`) yields a
//! working configuration.
//!
//! ```toml
//! [bus]
//! queue_capacity = 1000        # per-destination bound, drop-oldest on overflow
//! history_capacity = 1000      # delivery history ring
//! dispatch_interval_ms = 10    # dispatch worker poll cadence
//! cleanup_interval_ms = 5000   # history trim cadence
//! retry_interval_ms = 1000     # failed-envelope retry cadence
//! receive_poll_ms = 50         # receive() poll bound before returning empty
//! default_max_retries = 3      # retry budget stamped on new envelopes
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{BusError, BusResult};

fn default_queue_capacity() -> usize {
    1000
}

fn default_history_capacity() -> usize {
    1000
}

fn default_dispatch_interval_ms() -> u64 {
    10
}

fn default_cleanup_interval_ms() -> u64 {
    5000
}

fn default_retry_interval_ms() -> u64 {
    1000
}

fn default_receive_poll_ms() -> u64 {
    50
}

fn default_max_retries() -> u32 {
    3
}

/// Runtime configuration for a [`crate::MessageBus`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Per-destination queue bound. The overflow policy is drop-oldest; a
    /// zero capacity rejects every put (models an unavailable destination).
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Maximum entries retained in the delivery history ring
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Poll cadence of per-destination dispatch workers
    #[serde(default = "default_dispatch_interval_ms")]
    pub dispatch_interval_ms: u64,

    /// Cadence of the history cleanup loop
    #[serde(default = "default_cleanup_interval_ms")]
    pub cleanup_interval_ms: u64,

    /// Cadence of the failed-envelope retry loop
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,

    /// Upper bound on how long `receive` polls before reporting empty
    #[serde(default = "default_receive_poll_ms")]
    pub receive_poll_ms: u64,

    /// Retry budget stamped on envelopes that do not specify their own
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            history_capacity: default_history_capacity(),
            dispatch_interval_ms: default_dispatch_interval_ms(),
            cleanup_interval_ms: default_cleanup_interval_ms(),
            retry_interval_ms: default_retry_interval_ms(),
            receive_poll_ms: default_receive_poll_ms(),
            default_max_retries: default_max_retries(),
        }
    }
}

/// Top-level TOML document wrapper (`[bus]` table)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct BusConfigFile {
    #[serde(default)]
    bus: Option<BusConfig>,
}

impl BusConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> BusResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml_str(raw: &str) -> BusResult<Self> {
        let file: BusConfigFile = toml::from_str(raw)
            .map_err(|e| BusError::Config(format!("invalid bus config: {}", e)))?;
        let config = file.bus.unwrap_or_default();
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration invariants
    pub fn validate(&self) -> BusResult<()> {
        if self.history_capacity == 0 {
            return Err(BusError::Config(
                "history_capacity must be greater than zero".to_string(),
            ));
        }
        if self.dispatch_interval_ms == 0
            || self.cleanup_interval_ms == 0
            || self.retry_interval_ms == 0
        {
            return Err(BusError::Config(
                "loop intervals must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

//! Bus configuration: timing margins, retry bounds, and housekeeping knobs.
//!
//! All durations are in milliseconds. The defaults are tuned for a journal
//! directory on network-mounted storage shared by a handful of orchestrator
//! nodes; tests shrink them to keep wall-clock time down.

use crate::error::{LockBusError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration for a [`crate::LockBus`] instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Clock-skew allowance added on top of every lease when deciding
    /// whether a subject is still locked.
    #[serde(default = "default_expiry_offset_ms")]
    pub expiry_offset_ms: u64,

    /// Extra margin past expiry before a lease counts as surely out of date
    /// and becomes eligible for sweeping and garbage collection.
    #[serde(default = "default_out_of_date_margin_ms")]
    pub out_of_date_margin_ms: u64,

    /// Upper bound on how long the watch loop blocks between passes.
    #[serde(default = "default_max_poll_interval_ms")]
    pub max_poll_interval_ms: u64,

    /// Slice the polling notifier sleeps between directory checks.
    #[serde(default = "default_poll_slice_ms")]
    pub poll_slice_ms: u64,

    /// How often an event file that exists but does not parse yet is retried
    /// before replay gives up on it.
    #[serde(default = "default_replay_trials")]
    pub replay_trials: u32,

    /// Cooldown between replay trials of the same file.
    #[serde(default = "default_replay_cooldown_ms")]
    pub replay_cooldown_ms: u64,

    /// Publish attempts before giving up under sustained contention.
    #[serde(default = "default_publish_retries")]
    pub publish_retries: u32,

    /// Base backoff between publish attempts; doubled per attempt.
    #[serde(default = "default_publish_backoff_ms")]
    pub publish_backoff_ms: u64,

    /// Cap on the publish backoff.
    #[serde(default = "default_publish_backoff_cap_ms")]
    pub publish_backoff_cap_ms: u64,

    /// Minimum number of the most recent journal files always retained,
    /// for audit and diagnostics.
    #[serde(default = "default_retain_min_events")]
    pub retain_min_events: usize,

    /// Age after which a journal file that never became readable may be
    /// deleted anyway.
    #[serde(default = "default_unreadable_max_age_ms")]
    pub unreadable_max_age_ms: u64,

    /// How often garbage collection runs.
    #[serde(default = "default_gc_interval_ms")]
    pub gc_interval_ms: u64,
}

fn default_expiry_offset_ms() -> u64 {
    500
}
fn default_out_of_date_margin_ms() -> u64 {
    30_000
}
fn default_max_poll_interval_ms() -> u64 {
    500
}
fn default_poll_slice_ms() -> u64 {
    50
}
fn default_replay_trials() -> u32 {
    5
}
fn default_replay_cooldown_ms() -> u64 {
    40
}
fn default_publish_retries() -> u32 {
    8
}
fn default_publish_backoff_ms() -> u64 {
    10
}
fn default_publish_backoff_cap_ms() -> u64 {
    640
}
fn default_retain_min_events() -> usize {
    100
}
fn default_unreadable_max_age_ms() -> u64 {
    60_000
}
fn default_gc_interval_ms() -> u64 {
    5_000
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            expiry_offset_ms: default_expiry_offset_ms(),
            out_of_date_margin_ms: default_out_of_date_margin_ms(),
            max_poll_interval_ms: default_max_poll_interval_ms(),
            poll_slice_ms: default_poll_slice_ms(),
            replay_trials: default_replay_trials(),
            replay_cooldown_ms: default_replay_cooldown_ms(),
            publish_retries: default_publish_retries(),
            publish_backoff_ms: default_publish_backoff_ms(),
            publish_backoff_cap_ms: default_publish_backoff_cap_ms(),
            retain_min_events: default_retain_min_events(),
            unreadable_max_age_ms: default_unreadable_max_age_ms(),
            gc_interval_ms: default_gc_interval_ms(),
        }
    }
}

impl BusConfig {
    /// Load config from a YAML file.
    ///
    /// Unknown fields in the YAML are silently ignored for forward
    /// compatibility; missing fields take their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path).map_err(|e| {
            LockBusError::Protocol(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        Self::from_yaml(&content)
    }

    /// Parse config from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: BusConfig = serde_yaml::from_str(yaml)
            .map_err(|e| LockBusError::Protocol(format!("failed to parse config YAML: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize config to a YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| LockBusError::Protocol(format!("failed to serialize config: {}", e)))
    }

    /// Validate config values and return an error on invalid ones.
    pub fn validate(&self) -> Result<()> {
        if self.max_poll_interval_ms == 0 {
            return Err(LockBusError::Protocol(
                "max_poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.poll_slice_ms == 0 {
            return Err(LockBusError::Protocol(
                "poll_slice_ms must be positive".to_string(),
            ));
        }
        if self.replay_trials == 0 {
            return Err(LockBusError::Protocol(
                "replay_trials must be at least 1".to_string(),
            ));
        }
        if self.publish_retries == 0 {
            return Err(LockBusError::Protocol(
                "publish_retries must be at least 1".to_string(),
            ));
        }
        if self.retain_min_events == 0 {
            return Err(LockBusError::Protocol(
                "retain_min_events must be at least 1 (the journal must never go empty)"
                    .to_string(),
            ));
        }
        if self.publish_backoff_cap_ms < self.publish_backoff_ms {
            return Err(LockBusError::Protocol(
                "publish_backoff_cap_ms must not be below publish_backoff_ms".to_string(),
            ));
        }
        Ok(())
    }
}

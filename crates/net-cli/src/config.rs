//! Agent-level tunables: the values named throughout the spec as
//! configurable defaults (minimum time since a candidate's last failure,
//! the dpc-available watchdog, the connectivity-test timeout, and the
//! heartbeat tick), loaded from an optional JSON file and overridable by
//! environment variables, in the style `nim_network_config` already uses
//! for its own on-disk formats.

use std::path::Path;
use std::time::Duration as StdDuration;

use chrono::Duration;
use serde::{Deserialize, Serialize};

fn default_min_time_since_failure_secs() -> i64 {
    300
}

fn default_watchdog_timeout_secs() -> i64 {
    60
}

fn default_connectivity_timeout_secs() -> u64 {
    15
}

fn default_heartbeat_secs() -> u64 {
    25
}

fn default_controller_url() -> String {
    String::new()
}

fn default_device_serial() -> String {
    String::new()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NimConfig {
    /// Spec §4.B "default 5 minutes".
    pub min_time_since_failure_secs: i64,
    /// Spec §4.C "(v) periodic dpc-available watchdog timer (default 60s)".
    pub watchdog_timeout_secs: i64,
    /// Spec §5 "connectivity test timeout ... default 15s".
    pub connectivity_timeout_secs: u64,
    /// Spec §5 "a still-running heartbeat (default 25s tick)".
    pub heartbeat_secs: u64,
    /// `<controller>/api/v2/edgeDevice/ping` base URL (spec §6).
    pub controller_url: String,
    /// Hardware serial sent on every probe (spec §6 "the device serial
    /// and soft-serial headers").
    pub device_serial: String,
    /// Software-derived fallback serial sent alongside `device_serial`.
    pub soft_serial: String,
}

impl Default for NimConfig {
    fn default() -> Self {
        Self {
            min_time_since_failure_secs: default_min_time_since_failure_secs(),
            watchdog_timeout_secs: default_watchdog_timeout_secs(),
            connectivity_timeout_secs: default_connectivity_timeout_secs(),
            heartbeat_secs: default_heartbeat_secs(),
            controller_url: default_controller_url(),
            device_serial: default_device_serial(),
            soft_serial: default_device_serial(),
        }
    }
}

impl NimConfig {
    /// Load from `path` if it exists, then apply `NIM_*` environment
    /// overrides; falls back to defaults when no file is present.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let body = std::fs::read_to_string(path)?;
            serde_json::from_str(&body)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("NIM_MIN_TIME_SINCE_FAILURE_SECS") {
            if let Ok(v) = v.parse() {
                self.min_time_since_failure_secs = v;
            }
        }
        if let Ok(v) = std::env::var("NIM_WATCHDOG_TIMEOUT_SECS") {
            if let Ok(v) = v.parse() {
                self.watchdog_timeout_secs = v;
            }
        }
        if let Ok(v) = std::env::var("NIM_CONNECTIVITY_TIMEOUT_SECS") {
            if let Ok(v) = v.parse() {
                self.connectivity_timeout_secs = v;
            }
        }
        if let Ok(v) = std::env::var("NIM_HEARTBEAT_SECS") {
            if let Ok(v) = v.parse() {
                self.heartbeat_secs = v;
            }
        }
        if let Ok(v) = std::env::var("NIM_CONTROLLER_URL") {
            self.controller_url = v;
        }
        if let Ok(v) = std::env::var("NIM_DEVICE_SERIAL") {
            self.device_serial = v;
        }
        if let Ok(v) = std::env::var("NIM_SOFT_SERIAL") {
            self.soft_serial = v;
        }
    }

    pub fn min_time_since_failure(&self) -> Duration {
        Duration::seconds(self.min_time_since_failure_secs)
    }

    pub fn watchdog_timeout(&self) -> Duration {
        Duration::seconds(self.watchdog_timeout_secs)
    }

    pub fn connectivity_timeout(&self) -> StdDuration {
        StdDuration::from_secs(self.connectivity_timeout_secs)
    }

    pub fn heartbeat(&self) -> StdDuration {
        StdDuration::from_secs(self.heartbeat_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        let config = NimConfig::default();
        assert_eq!(config.min_time_since_failure_secs, 300);
        assert_eq!(config.watchdog_timeout_secs, 60);
        assert_eq!(config.connectivity_timeout_secs, 15);
        assert_eq!(config.heartbeat_secs, 25);
    }

    #[test]
    fn loading_a_missing_file_falls_back_to_defaults() {
        let config = NimConfig::load("/nonexistent/nim-config.json").unwrap();
        assert_eq!(config.watchdog_timeout_secs, 60);
    }
}

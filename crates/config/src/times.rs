//! Timing configuration.
//!
//! Durations are written as whole seconds in the YAML file.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The `times` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawTimes", into = "RawTimes")]
pub struct TimesConfig {
    /// Pause before restarting a dead source.
    pub source_restart_delay: Duration,
    /// No-bytes watchdog interval; 0 disables the watchdog.
    pub source_timeout: Duration,
    /// Pause before restarting a dead sink.
    pub sink_restart_delay: Duration,
    /// Cadence of stream-server polls.
    pub server_poll_interval: Duration,
    /// Per-request HTTP timeout for server polls.
    pub server_request_timeout: Duration,
    /// Server silence after which all streams are assumed gone.
    pub server_timeout: Duration,
    /// Cadence of the idleness diagnostic; 0 disables it.
    pub idle_time: Duration,
}

impl Default for TimesConfig {
    fn default() -> Self {
        RawTimes::default().into()
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
struct RawTimes {
    source_restart_delay: u64,
    source_timeout: u64,
    sink_restart_delay: u64,
    server_poll_interval: u64,
    server_request_timeout: u64,
    server_timeout: u64,
    idle_time: u64,
}

impl Default for RawTimes {
    fn default() -> Self {
        Self {
            source_restart_delay: 3,
            source_timeout: 3,
            sink_restart_delay: 3,
            server_poll_interval: 5,
            server_request_timeout: 3,
            server_timeout: 16,
            idle_time: 0,
        }
    }
}

impl From<RawTimes> for TimesConfig {
    fn from(raw: RawTimes) -> Self {
        Self {
            source_restart_delay: Duration::from_secs(raw.source_restart_delay),
            source_timeout: Duration::from_secs(raw.source_timeout),
            sink_restart_delay: Duration::from_secs(raw.sink_restart_delay),
            server_poll_interval: Duration::from_secs(raw.server_poll_interval),
            server_request_timeout: Duration::from_secs(raw.server_request_timeout),
            server_timeout: Duration::from_secs(raw.server_timeout),
            idle_time: Duration::from_secs(raw.idle_time),
        }
    }
}

impl From<TimesConfig> for RawTimes {
    fn from(times: TimesConfig) -> Self {
        Self {
            source_restart_delay: times.source_restart_delay.as_secs(),
            source_timeout: times.source_timeout.as_secs(),
            sink_restart_delay: times.sink_restart_delay.as_secs(),
            server_poll_interval: times.server_poll_interval.as_secs(),
            server_request_timeout: times.server_request_timeout.as_secs(),
            server_timeout: times.server_timeout.as_secs(),
            idle_time: times.idle_time.as_secs(),
        }
    }
}

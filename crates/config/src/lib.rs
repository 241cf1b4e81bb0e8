//! Streamtee - Configuration
//!
//! YAML-based configuration loading with sensible defaults.
//!
//! # Parsing
//!
//! Use the `FromStr` trait to parse configuration:
//!
//! ```
//! use std::str::FromStr;
//! use streamtee_config::Config;
//!
//! let config = Config::from_str(
//!     "server:\n  type: static\n  streams: [cam1]\nflows:\n  all:\n    regexp: '.*'\n    source: cat\n",
//! )
//! .unwrap();
//! assert_eq!(config.server.streams, vec!["cam1"]);
//! ```
//!
//! # Example Config
//!
//! ```yaml
//! server:
//!   type: nginx-rtmp
//!   url: http://127.0.0.1:8080/stat
//!   app: live
//!
//! source_buffer:
//!   buffer_count: 64
//!   buffer_size: 16384
//!
//! flows:
//!   archive:
//!     regexp: '^cam'
//!     source: ffmpeg -i rtmp://127.0.0.1/live/{stream} -c copy -f flv -
//!     sinks:
//!       disk: ffmpeg -i - -c copy /srv/archive/{stream}.flv
//!
//! times:
//!   server_poll_interval: 5
//! ```

mod buffers;
mod error;
mod flows;
mod metrics;
mod misc;
mod server;
mod times;

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use buffers::{SinkBufferConfig, SourceBufferConfig};
pub use error::{ConfigError, Result};
pub use flows::FlowConfig;
pub use metrics::{InfluxConfig, MetricsConfig};
pub use misc::MiscConfig;
pub use server::{ServerConfig, ServerKind, DEFAULT_XPATH_TEMPLATE};
pub use times::TimesConfig;

/// Main configuration structure.
///
/// Every section except `server` is optional with sensible defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// If true, an interrupt panics instead of shutting down cleanly.
    #[serde(default)]
    pub debug: bool,

    /// Where the set of active streams comes from.
    pub server: ServerConfig,

    /// Metrics export.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Per-flow buffer pool dimensions.
    #[serde(default)]
    pub source_buffer: SourceBufferConfig,

    /// Per-sink channel capacity.
    #[serde(default)]
    pub sink_buffer: SinkBufferConfig,

    /// Flow rules, by name.
    #[serde(default)]
    pub flows: BTreeMap<String, FlowConfig>,

    /// Durations, in seconds.
    #[serde(default)]
    pub times: TimesConfig,

    /// Behavior toggles.
    #[serde(default)]
    pub misc: MiscConfig,
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        Self::from_str(&contents)
    }

    fn parse(s: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        self.server.validate()?;

        if self.source_buffer.buffer_count == 0 {
            return Err(ConfigError::InvalidBufferCount {
                section: "source_buffer",
            });
        }
        if self.source_buffer.buffer_size == 0 {
            return Err(ConfigError::InvalidBufferSize);
        }
        if self.sink_buffer.buffer_count == 0 {
            return Err(ConfigError::InvalidBufferCount {
                section: "sink_buffer",
            });
        }

        Ok(())
    }

    /// Re-emit the configuration as YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(ConfigError::Parse)
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

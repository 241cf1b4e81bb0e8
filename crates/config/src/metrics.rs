//! Metrics exporter configuration.

use serde::{Deserialize, Serialize};

/// The `metrics` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Optional InfluxDB exporter.
    pub influx: Option<InfluxConfig>,
}

/// Connection settings for an InfluxDB `/write` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfluxConfig {
    /// Base URL of the InfluxDB server.
    pub host: String,
    /// Target database.
    pub database: String,
    /// Basic-auth username.
    #[serde(default)]
    pub username: String,
    /// Basic-auth password.
    #[serde(default)]
    pub password: String,
}

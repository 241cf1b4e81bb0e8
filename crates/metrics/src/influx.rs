//! InfluxDB line-protocol export.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use streamtee_config::InfluxConfig;

use crate::registry::Metric;

/// Pushes registry snapshots to an InfluxDB `/write` endpoint.
pub struct InfluxExporter {
    client: reqwest::Client,
    url: String,
    username: String,
    password: String,
}

impl InfluxExporter {
    /// Build an exporter for the configured endpoint.
    pub fn new(config: &InfluxConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .expect("HTTP client construction cannot fail with static options");
        let url = format!(
            "{}/write?db={}",
            config.host.trim_end_matches('/'),
            config.database
        );

        Self {
            client,
            url,
            username: config.username.clone(),
            password: config.password.clone(),
        }
    }

    /// Write one snapshot as line protocol.
    pub async fn write(&self, snapshot: &[(String, Metric)]) -> Result<(), reqwest::Error> {
        let body = encode_lines(snapshot);
        if body.is_empty() {
            return Ok(());
        }

        self.client
            .post(&self.url)
            .basic_auth(&self.username, Some(&self.password))
            .body(body)
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }
}

fn encode_lines(snapshot: &[(String, Metric)]) -> String {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();

    let mut body = String::new();
    for (name, metric) in snapshot {
        let name = escape_measurement(name);
        match metric {
            Metric::Gauge(gauge) => {
                body.push_str(&format!("{} value={}i {}\n", name, gauge.get(), timestamp));
            }
            Metric::Meter(meter) => {
                let snap = meter.snapshot();
                body.push_str(&format!(
                    "{} count={}i,bytes={}i {}\n",
                    name, snap.marks, snap.bytes, timestamp
                ));
            }
        }
    }
    body
}

fn escape_measurement(name: &str) -> String {
    name.replace(' ', "\\ ").replace(',', "\\,")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Gauge, Meter};
    use std::sync::Arc;

    #[test]
    fn test_encode_gauge_line() {
        let gauge = Arc::new(Gauge::new());
        gauge.set(12);
        let lines = encode_lines(&[("streams".to_string(), Metric::Gauge(gauge))]);
        assert!(lines.starts_with("streams value=12i "));
        assert!(lines.ends_with('\n'));
    }

    #[test]
    fn test_encode_meter_line() {
        let meter = Arc::new(Meter::new());
        meter.mark(512);
        let lines = encode_lines(&[(
            "source.cam1.throughput".to_string(),
            Metric::Meter(meter),
        )]);
        assert!(lines.starts_with("source.cam1.throughput count=1i,bytes=512i "));
    }

    #[test]
    fn test_escape_measurement() {
        assert_eq!(escape_measurement("a b,c"), "a\\ b\\,c");
    }
}

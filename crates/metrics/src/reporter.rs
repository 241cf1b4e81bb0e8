//! Periodic metrics reporter.
//!
//! Snapshots the registry at a fixed cadence, logs the deltas and, when an
//! InfluxDB endpoint is configured, forwards the raw values as line
//! protocol.

use std::collections::HashMap;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use streamtee_config::InfluxConfig;

use crate::influx::InfluxExporter;
use crate::registry::{registry, MeterSnapshot, Metric};

/// Cadence at which the registry is snapshotted and flushed.
const FLUSH_INTERVAL: Duration = Duration::from_secs(10);

/// Periodic reporter over the process-wide registry.
pub struct Reporter {
    exporter: Option<InfluxExporter>,
    previous: HashMap<String, MeterSnapshot>,
}

impl Reporter {
    /// Create a reporter; `influx` enables forwarding to InfluxDB.
    pub fn new(influx: Option<&InfluxConfig>) -> Self {
        Self {
            exporter: influx.map(InfluxExporter::new),
            previous: HashMap::new(),
        }
    }

    /// Run until cancellation. Spawn this as a task.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(FLUSH_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The immediate first tick would report an empty interval.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => self.flush().await,
                _ = cancel.cancelled() => return,
            }
        }
    }

    async fn flush(&mut self) {
        let snapshot = registry().snapshot();
        if snapshot.is_empty() {
            return;
        }

        for (name, metric) in &snapshot {
            match metric {
                Metric::Gauge(gauge) => {
                    tracing::debug!(metric = %name, value = gauge.get(), "gauge");
                }
                Metric::Meter(meter) => {
                    let current = meter.snapshot();
                    let prior = self
                        .previous
                        .insert(name.clone(), current)
                        .unwrap_or_default();
                    let bytes = current.bytes.saturating_sub(prior.bytes);
                    let rate = bytes as f64 / FLUSH_INTERVAL.as_secs_f64();
                    tracing::debug!(
                        metric = %name,
                        marks = current.marks,
                        bytes = current.bytes,
                        bytes_per_sec = rate as u64,
                        "meter"
                    );
                }
            }
        }

        if let Some(exporter) = &self.exporter {
            if let Err(error) = exporter.write(&snapshot).await {
                tracing::warn!(error = %error, "Failed to export metrics to InfluxDB");
            }
        }
    }
}

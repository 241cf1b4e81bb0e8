//! Streamtee - Metrics
//!
//! Internal metrics collection and reporting for observability.
//!
//! # Overview
//!
//! This crate provides:
//! - Atomic gauges and throughput meters
//! - A get-or-register [`Registry`] shared by all components
//! - A periodic [`Reporter`] that logs snapshots and optionally forwards
//!   them to InfluxDB
//!
//! # Design Principles
//!
//! - **Lock-free updates**: all metric mutation is a single atomic operation
//! - **Grow-only registry**: components register under a dotted name
//!   (`bufpool.cam1.avail`, `source.cam1.throughput`) and never unregister;
//!   short-lived flows simply stop updating their entries
//! - **Pull-based reporting**: the reporter snapshots the registry on its
//!   own schedule, components never block on reporting
//!
//! # Example
//!
//! ```ignore
//! use streamtee_metrics::registry;
//!
//! let gauge = registry().gauge("streams");
//! gauge.set(3);
//!
//! let meter = registry().meter("source.cam1.throughput");
//! meter.mark(4096);
//! ```

mod influx;
mod registry;
mod reporter;

pub use influx::InfluxExporter;
pub use registry::{registry, Gauge, Meter, MeterSnapshot, Metric, Registry};
pub use reporter::Reporter;

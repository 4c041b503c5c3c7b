// SPDX-License-Identifier: Apache-2.0

//! Internal telemetry for the Phoenix pipeline.
//!
//! Components describe their self-metrics as plain structs of
//! [`instrument::Counter`] and [`instrument::Gauge`] fields annotated with
//! `#[metric_set]` (see `phoenix-telemetry-macros`), keep them behind their
//! own locks, and register a collector with the process-wide
//! [`registry::MetricsRegistryHandle`]. The pipeline's emitter collects all
//! registered sets and appends them to outgoing batches as `phoenix.*`
//! metrics; counters drain on collection (delta temporality), gauges report
//! their latest value.

pub mod descriptor;
pub mod instrument;
pub mod metrics;
pub mod registry;
pub mod render;

pub use descriptor::{Instrument, MetricValue, MetricsDescriptor, MetricsField};
pub use metrics::{MetricSet, MetricSetHandler};
pub use registry::MetricsRegistryHandle;

// SPDX-License-Identifier: Apache-2.0

//! Owned, OTLP-shaped metric data model.
//!
//! A [`MetricBatch`] is the pipeline's unit of work: a finite sequence of
//! [`ResourceMetrics`] groups, each carrying typed resource attributes and an
//! ordered list of metrics (gauges, sums, histograms). Batches are mutated in
//! place by whichever processor currently holds them; nothing in this crate
//! performs interior synchronization.
//!
//! The shapes deliberately mirror the OTLP protobuf hierarchy
//! (resource -> scope -> metric -> data point) so that batches entering or
//! leaving the pipeline map 1:1 onto wire messages, without this crate taking
//! a protobuf dependency.

pub mod attrs;
pub mod batch;
pub mod error;
pub mod metric;
pub mod testing;

pub use attrs::{AnyValue, KeyValue};
pub use batch::{
    CounterSample, MetricBatch, Resource, ResourceKey, ResourceMetrics, SELF_RESOURCE_ATTR,
    ScopeMetrics,
};
pub use error::Error;
pub use metric::{
    HistogramDataPoint, Metric, MetricData, NumberDataPoint, NumberValue, Temporality,
};

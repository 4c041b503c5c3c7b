// SPDX-License-Identifier: Apache-2.0

//! Metrics for the timeseries estimator.

use phoenix_telemetry::instrument::Gauge;
use phoenix_telemetry_macros::metric_set;

/// Metrics collected by the timeseries estimator.
#[metric_set(name = "phoenix.timeseries")]
#[derive(Debug, Default, Clone)]
pub struct TimeseriesEstimatorMetrics {
    /// Estimated unique series in the current refresh window.
    #[metric(unit = "{series}")]
    pub estimate: Gauge<f64>,

    /// Counting mode: 0 exact, 1 probabilistic.
    #[metric(unit = "{1}")]
    pub estimator_mode: Gauge<u64>,

    /// Approximate memory used by the tracking structure.
    #[metric(unit = "By")]
    pub memory_bytes: Gauge<u64>,
}

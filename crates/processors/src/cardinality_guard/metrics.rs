// SPDX-License-Identifier: Apache-2.0

//! Metrics for the cardinality guardian.

use phoenix_telemetry::instrument::{Counter, Gauge};
use phoenix_telemetry_macros::metric_set;

/// Metrics collected by the cardinality guardian.
#[metric_set(name = "phoenix.cardinality_guard")]
#[derive(Debug, Default, Clone)]
pub struct CardinalityGuardMetrics {
    /// Unique series currently tracked in the window.
    #[metric(unit = "{series}")]
    pub tracked_series: Gauge<u64>,

    /// Series mapped to overflow buckets.
    #[metric(unit = "{series}")]
    pub overflow_series: Counter<u64>,

    /// Data points rewritten with a bucket attribute.
    #[metric(unit = "{point}")]
    pub bucketed_points: Counter<u64>,

    /// Tracking-window resets.
    #[metric(unit = "{reset}")]
    pub window_resets: Counter<u64>,
}

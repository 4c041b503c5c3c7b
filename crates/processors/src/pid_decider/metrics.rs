// SPDX-License-Identifier: Apache-2.0

//! Metrics for the adaptive PID decider.

use phoenix_telemetry::instrument::Counter;
use phoenix_telemetry_macros::metric_set;

/// Metrics collected by the adaptive PID decider.
#[metric_set(name = "phoenix.pid_decider")]
#[derive(Debug, Default, Clone)]
pub struct PidDeciderMetrics {
    /// Patches emitted into the side channel.
    #[metric(unit = "{patch}")]
    pub patches_emitted: Counter<u64>,

    /// Controller ticks skipped because the KPI metric was absent.
    #[metric(unit = "{tick}")]
    pub ticks_skipped_missing_kpi: Counter<u64>,

    /// Controller ticks suppressed by the hysteresis dead band.
    #[metric(unit = "{tick}")]
    pub ticks_in_dead_band: Counter<u64>,

    /// Computations whose output hit a clamp limit.
    #[metric(unit = "{tick}")]
    pub output_clamped: Counter<u64>,
}

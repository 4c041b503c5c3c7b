// SPDX-License-Identifier: Apache-2.0

//! Metrics for the CPU histogram converter.

use phoenix_telemetry::instrument::{Counter, Gauge};
use phoenix_telemetry_macros::metric_set;

/// Metrics collected by the CPU histogram converter.
#[metric_set(name = "phoenix.cpu_histogram")]
#[derive(Debug, Default, Clone)]
pub struct CpuHistogramMetrics {
    /// Utilization samples recorded into histograms.
    #[metric(unit = "{sample}")]
    pub samples_recorded: Counter<u64>,

    /// First observations establishing a process baseline.
    #[metric(unit = "{process}")]
    pub baselines_created: Counter<u64>,

    /// Samples dropped due to cumulative CPU regression.
    #[metric(unit = "{sample}")]
    pub regressions_dropped: Counter<u64>,

    /// Process states evicted by the LRU bound.
    #[metric(unit = "{process}")]
    pub states_evicted: Counter<u64>,

    /// State-file flush failures.
    #[metric(unit = "{flush}")]
    pub flush_failures: Counter<u64>,

    /// Per-process states currently held in memory.
    #[metric(unit = "{process}")]
    pub states_in_memory: Gauge<u64>,
}

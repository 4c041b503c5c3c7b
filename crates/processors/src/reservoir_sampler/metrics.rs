// SPDX-License-Identifier: Apache-2.0

//! Metrics for the reservoir sampler.

use phoenix_telemetry::instrument::{Counter, Gauge};
use phoenix_telemetry_macros::metric_set;

/// Metrics collected by the reservoir sampler.
#[metric_set(name = "phoenix.reservoir")]
#[derive(Debug, Default, Clone)]
pub struct ReservoirSamplerMetrics {
    /// Resources kept by the weighted reservoir.
    #[metric(unit = "{resource}")]
    pub sampled: Counter<u64>,

    /// Critical resources retained outside the reservoir.
    #[metric(unit = "{resource}")]
    pub critical_bypassed: Counter<u64>,

    /// Resources dropped by the sampler.
    #[metric(unit = "{resource}")]
    pub dropped: Counter<u64>,

    /// Duplicate resource identities removed.
    #[metric(unit = "{resource}")]
    pub duplicates_removed: Counter<u64>,

    /// Current reservoir size.
    #[metric(unit = "{resource}")]
    pub reservoir_size: Gauge<u64>,
}

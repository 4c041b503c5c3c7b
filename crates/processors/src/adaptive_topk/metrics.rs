// SPDX-License-Identifier: Apache-2.0

//! Metrics for the adaptive top-k filter.

use phoenix_telemetry::instrument::{Counter, Gauge};
use phoenix_telemetry_macros::metric_set;

/// Metrics collected by the adaptive top-k filter.
///
/// The coverage KPI itself is not part of this set: the filter writes it
/// straight into the batch (`phoenix.topk.coverage`) so the decider can
/// observe it downstream within the same batch.
#[metric_set(name = "phoenix.topk")]
#[derive(Debug, Default, Clone)]
pub struct AdaptiveTopKMetrics {
    /// Resources tagged as top-k members.
    #[metric(unit = "{resource}")]
    pub resources_included: Counter<u64>,

    /// Keyed resources left for the rollup.
    #[metric(unit = "{resource}")]
    pub resources_excluded: Counter<u64>,

    /// Resources lacking the configured resource field.
    #[metric(unit = "{resource}")]
    pub resources_skipped: Counter<u64>,

    /// Current k.
    #[metric(unit = "{resource}")]
    pub k_current: Gauge<u64>,
}

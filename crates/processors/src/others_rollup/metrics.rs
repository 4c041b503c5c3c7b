// SPDX-License-Identifier: Apache-2.0

//! Metrics for the others rollup.

use phoenix_telemetry::instrument::Counter;
use phoenix_telemetry_macros::metric_set;

/// Metrics collected by the others rollup.
#[metric_set(name = "phoenix.others_rollup")]
#[derive(Debug, Default, Clone)]
pub struct OthersRollupMetrics {
    /// Resources folded into the synthetic bucket.
    #[metric(unit = "{resource}")]
    pub resources_folded: Counter<u64>,

    /// Non-whitelisted metrics dropped from folded resources.
    #[metric(unit = "{metric}")]
    pub metrics_dropped: Counter<u64>,

    /// Batches that produced a rollup bucket.
    #[metric(unit = "{batch}")]
    pub buckets_emitted: Counter<u64>,
}

// SPDX-License-Identifier: Apache-2.0

//! Metrics for the priority tagger.

use phoenix_telemetry::instrument::Counter;
use phoenix_telemetry_macros::metric_set;

/// Metrics collected by the priority tagger.
#[metric_set(name = "phoenix.priority_tagger")]
#[derive(Debug, Default, Clone)]
pub struct PriorityTaggerMetrics {
    /// Resources tagged critical.
    #[metric(unit = "{resource}")]
    pub tagged_critical: Counter<u64>,

    /// Resources tagged high.
    #[metric(unit = "{resource}")]
    pub tagged_high: Counter<u64>,

    /// Resources tagged medium.
    #[metric(unit = "{resource}")]
    pub tagged_medium: Counter<u64>,

    /// Resources tagged low.
    #[metric(unit = "{resource}")]
    pub tagged_low: Counter<u64>,

    /// Resources no rule matched and no default class covered.
    #[metric(unit = "{resource}")]
    pub unmatched: Counter<u64>,
}

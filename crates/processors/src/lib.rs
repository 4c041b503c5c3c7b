// SPDX-License-Identifier: Apache-2.0

//! The shape-changing processors of the Phoenix pipeline.
//!
//! In pipeline order: the priority tagger classifies resources, the adaptive
//! top-k filter tags the heavy hitters, the others rollup folds everything
//! else into one synthetic bucket, the cardinality guardian bounds unique
//! series, the reservoir sampler thins the remainder, the CPU histogram
//! converter turns cumulative CPU time into utilization distributions, the
//! timeseries estimator self-reports series cardinality, the PID decider
//! turns KPI error into configuration patches, and the patch tap drains
//! encoded patches out of the batch toward governance.
//!
//! Every processor embeds the engine scaffold: one reader/writer lock over
//! its whole mutable state, so a patch application is atomic with respect to
//! the batches around it.

pub mod adaptive_topk;
pub mod cardinality_guard;
pub mod cpu_histogram;
pub mod identity;
pub mod others_rollup;
pub mod patch_tap;
pub mod pid_decider;
pub mod priority_tagger;
pub mod reservoir_sampler;
pub mod timeseries_estimator;

pub use adaptive_topk::AdaptiveTopK;
pub use cardinality_guard::CardinalityGuard;
pub use cpu_histogram::CpuHistogram;
pub use others_rollup::OthersRollup;
pub use patch_tap::{PatchSink, PatchTap};
pub use pid_decider::PidDecider;
pub use priority_tagger::PriorityTagger;
pub use reservoir_sampler::ReservoirSampler;
pub use timeseries_estimator::TimeseriesEstimator;

/// Resource attribute carrying the priority class.
pub const ATTR_PRIORITY: &str = "phoenix.priority";
/// Resource attribute marking top-k membership.
pub const ATTR_TOPK_INCLUDED: &str = "topk.included";
/// Resource attribute marking the synthetic rollup bucket.
pub const ATTR_ROLLUP: &str = "phoenix.rollup";
/// Resource attribute carrying the cardinality overflow bucket.
pub const ATTR_CG_BUCKET: &str = "cg_bucket";

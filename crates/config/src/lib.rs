// SPDX-License-Identifier: Apache-2.0

//! Policy model and loader.
//!
//! A policy is a schema-validated YAML document with four top-level keys:
//! `global_settings`, `processors_config`, `pid_decider_config` and
//! `pic_control_config`. It seeds every processor's initial parameters, the
//! decider's controllers, and governance behavior (rate limits, safe-mode
//! overrides). Loaded policies are immutable snapshots; reloading produces a
//! new snapshot, never an in-place mutation.
//!
//! Validation is collected, not fail-fast: every violated constraint is
//! reported with its field path, and a partially valid document is rejected
//! whole.

pub mod decider;
pub mod error;
pub mod governance;
pub mod policy;
pub mod processors;

pub use decider::{ControllerConfig, OutputPatchTemplate, PatchValueKind, PidDeciderConfig, PidGainsConfig};
pub use error::Error;
pub use governance::{DuplicatePatchPolicy, PicControlConfig};
pub use policy::{AutonomyLevel, CollectorSafetyLimits, GlobalSettings, Policy};
pub use processors::{
    AdaptiveTopKConfig, CardinalityGuardConfig, CpuHistogramConfig, OthersRollupConfig,
    PriorityClass, PriorityRule, PriorityTaggerConfig, ProcessorsConfig, ReservoirSamplerConfig,
    TimeseriesEstimatorConfig,
};

/// A loaded, immutable policy snapshot.
pub type PolicySnapshot = std::sync::Arc<Policy>;

// SPDX-License-Identifier: Apache-2.0

//! Controller definitions for the adaptive PID decider.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// PID gains as carried by the policy document.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PidGainsConfig {
    /// Proportional gain.
    #[serde(default = "default_kp")]
    pub kp: f64,
    /// Integral gain.
    #[serde(default)]
    pub ki: f64,
    /// Derivative gain.
    #[serde(default)]
    pub kd: f64,
}

fn default_kp() -> f64 {
    1.0
}

impl Default for PidGainsConfig {
    fn default() -> Self {
        Self {
            kp: default_kp(),
            ki: 0.0,
            kd: 0.0,
        }
    }
}

/// The typed shape of the value a patch template emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PatchValueKind {
    /// Emit an integer value (output is rounded).
    #[default]
    Int,
    /// Emit a float value.
    Double,
}

/// One parameter a controller is allowed to drive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct OutputPatchTemplate {
    /// Registered id of the processor to patch.
    pub target_processor: String,
    /// Flat parameter path within the target.
    pub parameter_path: String,
    /// Multiplier turning the controller output into a parameter value.
    #[serde(default = "default_scale")]
    pub change_scale_factor: f64,
    /// Lower clamp of the emitted value.
    pub min_value: f64,
    /// Upper clamp of the emitted value.
    pub max_value: f64,
    /// Typed shape of the emitted value.
    #[serde(default)]
    pub value_kind: PatchValueKind,
}

fn default_scale() -> f64 {
    1.0
}

impl OutputPatchTemplate {
    /// Returns validation errors for this template.
    #[must_use]
    pub fn validation_errors(&self, path_prefix: &str) -> Vec<String> {
        let mut errors = Vec::new();
        if self.target_processor.trim().is_empty() {
            errors.push(format!("{path_prefix}.target_processor: must not be empty"));
        }
        if self.parameter_path.trim().is_empty() {
            errors.push(format!("{path_prefix}.parameter_path: must not be empty"));
        }
        if !(self.min_value < self.max_value) {
            errors.push(format!(
                "{path_prefix}.min_value: {} must be below max_value {}",
                self.min_value, self.max_value
            ));
        }
        errors
    }
}

/// One feedback controller binding a KPI to output patch templates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ControllerConfig {
    /// Controller name, used as the patch source.
    pub name: String,
    /// Whether this controller runs.
    pub enabled: bool,
    /// Metric whose latest value is the controller's measurement.
    pub kpi_metric_name: String,
    /// The setpoint.
    pub kpi_target_value: f64,
    /// PID gains.
    #[serde(default)]
    pub gains: PidGainsConfig,
    /// Output clamp of the PID, lower bound.
    #[serde(default = "default_out_min")]
    pub output_min: f64,
    /// Output clamp of the PID, upper bound.
    #[serde(default = "default_out_max")]
    pub output_max: f64,
    /// Dead band around the setpoint, as a fraction of it, within which no
    /// patches are emitted.
    #[serde(default)]
    pub hysteresis_percent: f64,
    /// Parameters this controller drives. At least one.
    pub outputs: Vec<OutputPatchTemplate>,
}

fn default_out_min() -> f64 {
    -1.0
}

fn default_out_max() -> f64 {
    1.0
}

impl ControllerConfig {
    /// Returns validation errors for this controller.
    #[must_use]
    pub fn validation_errors(&self, path_prefix: &str) -> Vec<String> {
        let mut errors = Vec::new();
        if self.name.trim().is_empty() {
            errors.push(format!("{path_prefix}.name: must not be empty"));
        }
        if self.kpi_metric_name.trim().is_empty() {
            errors.push(format!("{path_prefix}.kpi_metric_name: must not be empty"));
        }
        if !(self.output_min < self.output_max) {
            errors.push(format!(
                "{path_prefix}.output_min: {} must be below output_max {}",
                self.output_min, self.output_max
            ));
        }
        if self.hysteresis_percent < 0.0 {
            errors.push(format!(
                "{path_prefix}.hysteresis_percent: must not be negative"
            ));
        }
        if self.outputs.is_empty() {
            errors.push(format!(
                "{path_prefix}.outputs: at least one output patch template is required"
            ));
        }
        for (i, output) in self.outputs.iter().enumerate() {
            errors.extend(output.validation_errors(&format!("{path_prefix}.outputs[{i}]")));
        }
        errors
    }
}

/// The decider's policy section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PidDeciderConfig {
    /// Whether the decider participates in the pipeline.
    #[serde(default = "super::processors::default_true")]
    pub enabled: bool,
    /// Tick interval assumed for a controller's first computation.
    #[serde(with = "humantime_serde", default = "default_tick_interval")]
    #[schemars(with = "String")]
    pub default_interval: Duration,
    /// Time-to-live stamped on emitted patches.
    #[serde(with = "humantime_serde", default = "default_patch_ttl")]
    #[schemars(with = "String")]
    pub patch_ttl: Duration,
    /// The controllers.
    #[serde(default)]
    pub controllers: Vec<ControllerConfig>,
}

fn default_tick_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_patch_ttl() -> Duration {
    Duration::from_secs(60)
}

impl Default for PidDeciderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_interval: default_tick_interval(),
            patch_ttl: default_patch_ttl(),
            controllers: Vec::new(),
        }
    }
}

impl PidDeciderConfig {
    /// Returns validation errors for this section.
    #[must_use]
    pub fn validation_errors(&self, path_prefix: &str) -> Vec<String> {
        let mut errors = Vec::new();
        if self.default_interval.is_zero() {
            errors.push(format!("{path_prefix}.default_interval: must be positive"));
        }
        for (i, controller) in self.controllers.iter().enumerate() {
            errors
                .extend(controller.validation_errors(&format!("{path_prefix}.controllers[{i}]")));
        }
        errors
    }
}

// SPDX-License-Identifier: Apache-2.0

//! The top-level policy document and its loader.

use crate::decider::PidDeciderConfig;
use crate::error::Error;
use crate::governance::PicControlConfig;
use crate::processors::ProcessorsConfig;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// How much authority the control loop has over the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AutonomyLevel {
    /// Patches are computed and logged, never applied.
    Shadow,
    /// Patches are surfaced for an operator to confirm.
    Advisory,
    /// Patches are applied automatically.
    #[default]
    Active,
}

/// Host resource ceilings the collector must respect.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct CollectorSafetyLimits {
    /// Maximum CPU budget, millicores.
    #[serde(default = "default_max_cpu_millicores")]
    pub max_cpu_millicores: u32,
    /// Maximum resident set size, MiB.
    #[serde(default = "default_max_memory_mib")]
    pub max_memory_mib: u32,
}

fn default_max_cpu_millicores() -> u32 {
    1000
}

fn default_max_memory_mib() -> u32 {
    512
}

impl Default for CollectorSafetyLimits {
    fn default() -> Self {
        Self {
            max_cpu_millicores: default_max_cpu_millicores(),
            max_memory_mib: default_max_memory_mib(),
        }
    }
}

impl CollectorSafetyLimits {
    /// Returns validation errors for these limits.
    #[must_use]
    pub fn validation_errors(&self, path_prefix: &str) -> Vec<String> {
        let mut errors = Vec::new();
        if !(1..=64_000).contains(&self.max_cpu_millicores) {
            errors.push(format!(
                "{path_prefix}.max_cpu_millicores: {} outside [1, 64000]",
                self.max_cpu_millicores
            ));
        }
        if !(16..=1_048_576).contains(&self.max_memory_mib) {
            errors.push(format!(
                "{path_prefix}.max_memory_mib: {} outside [16, 1048576]",
                self.max_memory_mib
            ));
        }
        errors
    }
}

/// The `global_settings` policy section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct GlobalSettings {
    /// Control-loop authority level.
    #[serde(default)]
    pub autonomy_level: AutonomyLevel,
    /// Host resource ceilings.
    #[serde(default)]
    pub safety: CollectorSafetyLimits,
}

impl GlobalSettings {
    /// Returns validation errors for this section.
    #[must_use]
    pub fn validation_errors(&self, path_prefix: &str) -> Vec<String> {
        self.safety.validation_errors(&format!("{path_prefix}.safety"))
    }
}

/// The whole policy document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Policy {
    /// Global settings.
    #[serde(default)]
    pub global_settings: GlobalSettings,
    /// Initial processor configurations.
    #[serde(default)]
    pub processors_config: ProcessorsConfig,
    /// Adaptive decider controllers.
    #[serde(default)]
    pub pid_decider_config: PidDeciderConfig,
    /// Governance behavior.
    #[serde(default)]
    pub pic_control_config: PicControlConfig,
}

impl Policy {
    /// Parses and validates a policy from YAML text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeserializationError`] for malformed documents and
    /// [`Error::InvalidPolicy`] when any schema constraint is violated.
    pub fn from_yaml_str(text: &str) -> Result<Self, Error> {
        let policy: Policy =
            serde_yaml::from_str(text).map_err(|err| Error::DeserializationError {
                details: err.to_string(),
            })?;
        policy.validate()?;
        Ok(policy)
    }

    /// Reads, parses and validates a policy file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FileReadError`] when the file cannot be read, plus
    /// the same errors as [`Self::from_yaml_str`].
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path).map_err(|err| Error::FileReadError {
            path: path.display().to_string(),
            details: err.to_string(),
        })?;
        Self::from_yaml_str(&text)
    }

    /// Checks every schema constraint, rejecting the document whole on any
    /// violation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPolicy`] carrying all violation messages.
    pub fn validate(&self) -> Result<(), Error> {
        let mut errors = Vec::new();
        errors.extend(self.global_settings.validation_errors("global_settings"));
        errors.extend(self.processors_config.validation_errors("processors_config"));
        errors.extend(self.pid_decider_config.validation_errors("pid_decider_config"));
        errors.extend(self.pic_control_config.validation_errors("pic_control_config"));
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::InvalidPolicy { errors })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"
global_settings:
  autonomy_level: active
  safety:
    max_cpu_millicores: 2000
    max_memory_mib: 1024
processors_config:
  adaptive_topk:
    k_value: 30
    k_min: 10
    k_max: 60
    resource_field: process.name
    counter_field: process.cpu_seconds_total
pid_decider_config:
  default_interval: 10s
  controllers:
    - name: coverage
      enabled: true
      kpi_metric_name: phoenix.topk.coverage
      kpi_target_value: 0.9
      gains:
        kp: 1.0
      outputs:
        - target_processor: adaptive_topk
          parameter_path: k_value
          change_scale_factor: 100.0
          min_value: 10.0
          max_value: 60.0
pic_control_config:
  max_patches_per_minute: 20
  patch_cooldown: 5s
  safe_mode:
    adaptive_topk:
      k_value: 10
"#;

    #[test]
    fn sample_document_parses_and_validates() {
        let policy = Policy::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(policy.processors_config.adaptive_topk.k_value, 30);
        assert_eq!(policy.pid_decider_config.controllers.len(), 1);
        assert_eq!(policy.pic_control_config.max_patches_per_minute, 20);
        assert_eq!(
            policy.pic_control_config.safe_mode["adaptive_topk"]["k_value"],
            serde_json::json!(10)
        );
    }

    #[test]
    fn unknown_top_level_keys_are_rejected() {
        let err = Policy::from_yaml_str("surprise: 1\n").unwrap_err();
        assert!(matches!(err, Error::DeserializationError { .. }));
    }

    #[test]
    fn partially_valid_documents_are_rejected_whole() {
        let text = SAMPLE.replace("k_value: 30", "k_value: 5");
        match Policy::from_yaml_str(&text) {
            Err(Error::InvalidPolicy { errors }) => {
                assert!(errors.iter().any(|e| e.contains("adaptive_topk.k_value")));
            }
            other => panic!("expected InvalidPolicy, got {other:?}"),
        }
    }

    #[test]
    fn controllers_require_outputs() {
        let text = r#"
pid_decider_config:
  controllers:
    - name: c
      enabled: true
      kpi_metric_name: m
      kpi_target_value: 1.0
      outputs: []
"#;
        match Policy::from_yaml_str(text) {
            Err(Error::InvalidPolicy { errors }) => {
                assert!(errors.iter().any(|e| e.contains("outputs")));
            }
            other => panic!("expected InvalidPolicy, got {other:?}"),
        }
    }

    #[test]
    fn empty_document_is_the_default_policy() {
        let policy = Policy::from_yaml_str("{}").unwrap();
        assert_eq!(policy, Policy::default());
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.yaml");
        assert!(matches!(
            Policy::load(&missing),
            Err(Error::FileReadError { .. })
        ));
    }
}

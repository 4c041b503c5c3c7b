// SPDX-License-Identifier: Apache-2.0

//! Governance (patch-control) policy section.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// How governance treats a patch whose value already matches the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePatchPolicy {
    /// The second application is a no-op, recorded as `applied-duplicate`
    /// and excluded from the rate window.
    #[default]
    Noop,
    /// The second application counts as a regular apply.
    CountApplied,
}

/// The `pic_control_config` policy section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PicControlConfig {
    /// Path of the policy file the watcher observes.
    #[serde(default)]
    pub policy_path: Option<PathBuf>,
    /// Maximum applied patches within the trailing 60 s window.
    #[serde(default = "default_max_patches_per_minute")]
    pub max_patches_per_minute: u32,
    /// Minimum spacing between applied patches to the same target.
    #[serde(with = "humantime_serde", default = "default_cooldown")]
    #[schemars(with = "String")]
    pub patch_cooldown: Duration,
    /// Duplicate-application behavior.
    #[serde(default)]
    pub duplicate_patch_policy: DuplicatePatchPolicy,
    /// Bounded size of the patch history log.
    #[serde(default = "default_history_size")]
    pub history_size: usize,
    /// Consecutive policy reload failures that trip safe mode.
    #[serde(default = "default_reload_failure_threshold")]
    pub reload_failure_threshold: u32,
    /// Per-processor parameter overrides applied while in safe mode.
    ///
    /// Keys are registered processor ids; values map parameter paths to the
    /// safe value.
    #[serde(default)]
    pub safe_mode: BTreeMap<String, Map<String, Value>>,
}

fn default_max_patches_per_minute() -> u32 {
    30
}

fn default_cooldown() -> Duration {
    Duration::from_secs(5)
}

fn default_history_size() -> usize {
    1024
}

fn default_reload_failure_threshold() -> u32 {
    3
}

impl Default for PicControlConfig {
    fn default() -> Self {
        Self {
            policy_path: None,
            max_patches_per_minute: default_max_patches_per_minute(),
            patch_cooldown: default_cooldown(),
            duplicate_patch_policy: DuplicatePatchPolicy::default(),
            history_size: default_history_size(),
            reload_failure_threshold: default_reload_failure_threshold(),
            safe_mode: BTreeMap::new(),
        }
    }
}

impl PicControlConfig {
    /// Returns validation errors for this section.
    #[must_use]
    pub fn validation_errors(&self, path_prefix: &str) -> Vec<String> {
        let mut errors = Vec::new();
        if self.max_patches_per_minute == 0 {
            errors.push(format!(
                "{path_prefix}.max_patches_per_minute: must be at least 1"
            ));
        }
        if self.history_size == 0 {
            errors.push(format!("{path_prefix}.history_size: must be at least 1"));
        }
        if self.reload_failure_threshold == 0 {
            errors.push(format!(
                "{path_prefix}.reload_failure_threshold: must be at least 1"
            ));
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_clean() {
        assert!(
            PicControlConfig::default()
                .validation_errors("pic_control_config")
                .is_empty()
        );
    }

    #[test]
    fn rate_limit_floor_is_one() {
        let config = PicControlConfig {
            max_patches_per_minute: 0,
            ..PicControlConfig::default()
        };
        let errors = config.validation_errors("pic_control_config");
        assert!(errors[0].contains("max_patches_per_minute"));
    }
}

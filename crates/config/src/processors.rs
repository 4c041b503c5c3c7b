// SPDX-License-Identifier: Apache-2.0

//! Initial processor configurations carried by the policy document.
//!
//! Each table mirrors the patchable surface of its processor; keys are
//! whitelisted by construction (unknown fields are rejected at parse time).

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// Priority class attached to resources by the priority tagger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PriorityClass {
    /// Lowest priority.
    Low,
    /// Default priority.
    Medium,
    /// Elevated priority.
    High,
    /// Always-retained priority.
    Critical,
}

impl PriorityClass {
    /// Sampling rank: critical weighs heaviest.
    #[must_use]
    pub fn rank(&self) -> u32 {
        match self {
            PriorityClass::Low => 1,
            PriorityClass::Medium => 2,
            PriorityClass::High => 3,
            PriorityClass::Critical => 4,
        }
    }

    /// Stable attribute value for this class.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            PriorityClass::Low => "low",
            PriorityClass::Medium => "medium",
            PriorityClass::High => "high",
            PriorityClass::Critical => "critical",
        }
    }
}

/// One ordered matching rule of the priority tagger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PriorityRule {
    /// Resource attribute the pattern applies to.
    pub attribute: String,
    /// Regular expression matched against the attribute value.
    pub pattern: String,
    /// Class assigned on first match.
    pub class: PriorityClass,
}

/// Priority tagger (C4) initial configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PriorityTaggerConfig {
    /// Whether the processor participates in the pipeline.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Ordered match rules; the first match assigns the class.
    #[serde(default)]
    pub rules: Vec<PriorityRule>,
    /// Class assigned when no rule matches.
    #[serde(default)]
    pub default_class: Option<PriorityClass>,
}

impl Default for PriorityTaggerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rules: Vec::new(),
            default_class: None,
        }
    }
}

impl PriorityTaggerConfig {
    /// Returns validation errors for this table.
    #[must_use]
    pub fn validation_errors(&self, path_prefix: &str) -> Vec<String> {
        let mut errors = Vec::new();
        for (i, rule) in self.rules.iter().enumerate() {
            if rule.attribute.trim().is_empty() {
                errors.push(format!("{path_prefix}.rules[{i}].attribute: must not be empty"));
            }
            if rule.pattern.trim().is_empty() {
                errors.push(format!("{path_prefix}.rules[{i}].pattern: must not be empty"));
            }
        }
        errors
    }
}

/// Adaptive top-k (C5) initial configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct AdaptiveTopKConfig {
    /// Whether the processor participates in the pipeline.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Initial number of resources to keep.
    #[serde(default = "default_k")]
    pub k_value: u32,
    /// Lower bound accepted for `k_value`.
    #[serde(default = "default_k_min")]
    pub k_min: u32,
    /// Upper bound accepted for `k_value`.
    #[serde(default = "default_k_max")]
    pub k_max: u32,
    /// Resource attribute that identifies a resource for top-k purposes.
    #[serde(default = "default_resource_field")]
    pub resource_field: String,
    /// Counter metric whose value weighs each resource.
    #[serde(default = "default_counter_field")]
    pub counter_field: String,
}

fn default_k() -> u32 {
    30
}

fn default_k_min() -> u32 {
    10
}

fn default_k_max() -> u32 {
    60
}

fn default_resource_field() -> String {
    "process.name".to_owned()
}

fn default_counter_field() -> String {
    "process.cpu_seconds_total".to_owned()
}

impl Default for AdaptiveTopKConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            k_value: default_k(),
            k_min: default_k_min(),
            k_max: default_k_max(),
            resource_field: default_resource_field(),
            counter_field: default_counter_field(),
        }
    }
}

impl AdaptiveTopKConfig {
    /// Returns validation errors for this table.
    #[must_use]
    pub fn validation_errors(&self, path_prefix: &str) -> Vec<String> {
        let mut errors = Vec::new();
        if self.k_min == 0 {
            errors.push(format!("{path_prefix}.k_min: must be at least 1"));
        }
        if self.k_min > self.k_max {
            errors.push(format!(
                "{path_prefix}.k_min: {} must not exceed k_max {}",
                self.k_min, self.k_max
            ));
        }
        if !(self.k_min..=self.k_max).contains(&self.k_value) {
            errors.push(format!(
                "{path_prefix}.k_value: {} outside [{}, {}]",
                self.k_value, self.k_min, self.k_max
            ));
        }
        if self.resource_field.trim().is_empty() {
            errors.push(format!("{path_prefix}.resource_field: must not be empty"));
        }
        if self.counter_field.trim().is_empty() {
            errors.push(format!("{path_prefix}.counter_field: must not be empty"));
        }
        errors
    }
}

/// Others rollup (C6) initial configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct OthersRollupConfig {
    /// Whether the processor participates in the pipeline.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Resource attribute identifying resources subject to the rollup.
    #[serde(default = "default_resource_field")]
    pub resource_field: String,
    /// Counter metric summed into the rollup bucket.
    #[serde(default = "default_counter_field")]
    pub counter_field: String,
    /// Non-counter metrics preserved on folded resources.
    #[serde(default)]
    pub keep_metrics: Vec<String>,
}

impl Default for OthersRollupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            resource_field: default_resource_field(),
            counter_field: default_counter_field(),
            keep_metrics: Vec::new(),
        }
    }
}

impl OthersRollupConfig {
    /// Returns validation errors for this table.
    #[must_use]
    pub fn validation_errors(&self, path_prefix: &str) -> Vec<String> {
        let mut errors = Vec::new();
        if self.resource_field.trim().is_empty() {
            errors.push(format!("{path_prefix}.resource_field: must not be empty"));
        }
        if self.counter_field.trim().is_empty() {
            errors.push(format!("{path_prefix}.counter_field: must not be empty"));
        }
        errors
    }
}

/// Cardinality guardian (C7) initial configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct CardinalityGuardConfig {
    /// Whether the processor participates in the pipeline.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Maximum tracked unique series before bucketing starts.
    #[serde(default = "default_max_unique")]
    pub max_unique: usize,
    /// Number of overflow buckets.
    #[serde(default = "default_bucket_count")]
    pub bucket_count: u64,
    /// Interval after which the tracked set resets.
    #[serde(with = "humantime_serde", default = "default_reset_interval")]
    #[schemars(with = "String")]
    pub reset_interval: Duration,
}

fn default_max_unique() -> usize {
    10_000
}

fn default_bucket_count() -> u64 {
    16
}

fn default_reset_interval() -> Duration {
    Duration::from_secs(3600)
}

impl Default for CardinalityGuardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_unique: default_max_unique(),
            bucket_count: default_bucket_count(),
            reset_interval: default_reset_interval(),
        }
    }
}

impl CardinalityGuardConfig {
    /// Returns validation errors for this table.
    #[must_use]
    pub fn validation_errors(&self, path_prefix: &str) -> Vec<String> {
        let mut errors = Vec::new();
        if self.max_unique == 0 {
            errors.push(format!("{path_prefix}.max_unique: must be at least 1"));
        }
        if self.bucket_count == 0 {
            errors.push(format!("{path_prefix}.bucket_count: must be at least 1"));
        }
        errors
    }
}

/// Reservoir sampler (C8) initial configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ReservoirSamplerConfig {
    /// Whether the processor participates in the pipeline.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Initial reservoir size.
    #[serde(default = "default_reservoir_size")]
    pub reservoir_size: usize,
    /// Lower bound for auto-resizing.
    #[serde(default = "default_reservoir_min")]
    pub min_size: usize,
    /// Upper bound for auto-resizing.
    #[serde(default = "default_reservoir_max")]
    pub max_size: usize,
    /// Enables PID-driven resizing toward `target_fill_fraction`.
    #[serde(default)]
    pub auto_resize: bool,
    /// Desired fraction of observed resources that fit the reservoir.
    #[serde(default = "default_fill_fraction")]
    pub target_fill_fraction: f64,
}

fn default_reservoir_size() -> usize {
    100
}

fn default_reservoir_min() -> usize {
    10
}

fn default_reservoir_max() -> usize {
    1000
}

fn default_fill_fraction() -> f64 {
    0.5
}

impl Default for ReservoirSamplerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            reservoir_size: default_reservoir_size(),
            min_size: default_reservoir_min(),
            max_size: default_reservoir_max(),
            auto_resize: false,
            target_fill_fraction: default_fill_fraction(),
        }
    }
}

impl ReservoirSamplerConfig {
    /// Returns validation errors for this table.
    #[must_use]
    pub fn validation_errors(&self, path_prefix: &str) -> Vec<String> {
        let mut errors = Vec::new();
        if self.min_size == 0 {
            errors.push(format!("{path_prefix}.min_size: must be at least 1"));
        }
        if self.min_size > self.max_size {
            errors.push(format!(
                "{path_prefix}.min_size: {} must not exceed max_size {}",
                self.min_size, self.max_size
            ));
        }
        if !(self.min_size..=self.max_size).contains(&self.reservoir_size) {
            errors.push(format!(
                "{path_prefix}.reservoir_size: {} outside [{}, {}]",
                self.reservoir_size, self.min_size, self.max_size
            ));
        }
        if !(0.0..=1.0).contains(&self.target_fill_fraction) {
            errors.push(format!(
                "{path_prefix}.target_fill_fraction: {} outside [0, 1]",
                self.target_fill_fraction
            ));
        }
        errors
    }
}

/// CPU histogram converter (C9) initial configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct CpuHistogramConfig {
    /// Whether the processor participates in the pipeline.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Upper bucket bounds of the utilization histogram, percent.
    #[serde(default = "default_cpu_bounds")]
    pub explicit_bounds: Vec<f64>,
    /// Maximum per-process states kept in memory before LRU eviction.
    #[serde(default = "default_max_processes")]
    pub max_processes_in_memory: usize,
    /// Only convert processes tagged by the top-k filter.
    #[serde(default)]
    pub topk_only: bool,
    /// Path of the persisted state file. Absent disables persistence.
    #[serde(default)]
    pub state_path: Option<std::path::PathBuf>,
    /// Interval between background state flushes.
    #[serde(with = "humantime_serde", default = "default_flush_interval")]
    #[schemars(with = "String")]
    pub state_flush_interval: Duration,
}

fn default_cpu_bounds() -> Vec<f64> {
    vec![5.0, 10.0, 25.0, 50.0, 75.0, 100.0, 200.0, 400.0]
}

fn default_max_processes() -> usize {
    10_000
}

fn default_flush_interval() -> Duration {
    Duration::from_secs(60)
}

impl Default for CpuHistogramConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            explicit_bounds: default_cpu_bounds(),
            max_processes_in_memory: default_max_processes(),
            topk_only: false,
            state_path: None,
            state_flush_interval: default_flush_interval(),
        }
    }
}

impl CpuHistogramConfig {
    /// Returns validation errors for this table.
    #[must_use]
    pub fn validation_errors(&self, path_prefix: &str) -> Vec<String> {
        let mut errors = Vec::new();
        if self.explicit_bounds.is_empty() {
            errors.push(format!("{path_prefix}.explicit_bounds: must not be empty"));
        }
        if self
            .explicit_bounds
            .windows(2)
            .any(|pair| pair[1] <= pair[0])
        {
            errors.push(format!(
                "{path_prefix}.explicit_bounds: must be strictly increasing"
            ));
        }
        if self.max_processes_in_memory == 0 {
            errors.push(format!(
                "{path_prefix}.max_processes_in_memory: must be at least 1"
            ));
        }
        errors
    }
}

/// Timeseries estimator (C10) initial configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct TimeseriesEstimatorConfig {
    /// Whether the processor participates in the pipeline.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Interval after which counting restarts in exact mode.
    #[serde(with = "humantime_serde", default = "default_refresh_interval")]
    #[schemars(with = "String")]
    pub refresh_interval: Duration,
    /// Exact-set size that triggers the HLL fallback.
    #[serde(default = "default_max_unique_series")]
    pub max_unique_time_series: usize,
    /// HyperLogLog precision used after the fallback.
    #[serde(default = "default_hll_precision")]
    pub hll_precision: u8,
}

fn default_refresh_interval() -> Duration {
    Duration::from_secs(300)
}

fn default_max_unique_series() -> usize {
    100_000
}

fn default_hll_precision() -> u8 {
    14
}

impl Default for TimeseriesEstimatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            refresh_interval: default_refresh_interval(),
            max_unique_time_series: default_max_unique_series(),
            hll_precision: default_hll_precision(),
        }
    }
}

impl TimeseriesEstimatorConfig {
    /// Returns validation errors for this table.
    #[must_use]
    pub fn validation_errors(&self, path_prefix: &str) -> Vec<String> {
        let mut errors = Vec::new();
        if self.max_unique_time_series == 0 {
            errors.push(format!(
                "{path_prefix}.max_unique_time_series: must be at least 1"
            ));
        }
        if !(4..=16).contains(&self.hll_precision) {
            errors.push(format!(
                "{path_prefix}.hll_precision: {} outside [4, 16]",
                self.hll_precision
            ));
        }
        errors
    }
}

/// All per-processor initial configurations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ProcessorsConfig {
    /// Priority tagger table.
    #[serde(default)]
    pub priority_tagger: PriorityTaggerConfig,
    /// Adaptive top-k table.
    #[serde(default)]
    pub adaptive_topk: AdaptiveTopKConfig,
    /// Others rollup table.
    #[serde(default)]
    pub others_rollup: OthersRollupConfig,
    /// Cardinality guardian table.
    #[serde(default)]
    pub cardinality_guard: CardinalityGuardConfig,
    /// Reservoir sampler table.
    #[serde(default)]
    pub reservoir_sampler: ReservoirSamplerConfig,
    /// CPU histogram converter table.
    #[serde(default)]
    pub cpu_histogram: CpuHistogramConfig,
    /// Timeseries estimator table.
    #[serde(default)]
    pub timeseries_estimator: TimeseriesEstimatorConfig,
}

impl ProcessorsConfig {
    /// Returns validation errors for all tables.
    #[must_use]
    pub fn validation_errors(&self, path_prefix: &str) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(
            self.priority_tagger
                .validation_errors(&format!("{path_prefix}.priority_tagger")),
        );
        errors.extend(
            self.adaptive_topk
                .validation_errors(&format!("{path_prefix}.adaptive_topk")),
        );
        errors.extend(
            self.others_rollup
                .validation_errors(&format!("{path_prefix}.others_rollup")),
        );
        errors.extend(
            self.cardinality_guard
                .validation_errors(&format!("{path_prefix}.cardinality_guard")),
        );
        errors.extend(
            self.reservoir_sampler
                .validation_errors(&format!("{path_prefix}.reservoir_sampler")),
        );
        errors.extend(
            self.cpu_histogram
                .validation_errors(&format!("{path_prefix}.cpu_histogram")),
        );
        errors.extend(
            self.timeseries_estimator
                .validation_errors(&format!("{path_prefix}.timeseries_estimator")),
        );
        errors
    }

    /// Flattens the patchable initial parameters per processor id.
    ///
    /// Used by governance to re-seed processors after policy reloads and on
    /// safe-mode exit.
    #[must_use]
    pub fn initial_parameters(&self) -> Vec<(String, Map<String, Value>)> {
        fn table(pairs: &[(&str, Value)]) -> Map<String, Value> {
            pairs
                .iter()
                .map(|(k, v)| ((*k).to_owned(), v.clone()))
                .collect()
        }

        vec![
            (
                "priority_tagger".to_owned(),
                table(&[("enabled", Value::from(self.priority_tagger.enabled))]),
            ),
            (
                "adaptive_topk".to_owned(),
                table(&[
                    ("enabled", Value::from(self.adaptive_topk.enabled)),
                    ("k_value", Value::from(self.adaptive_topk.k_value)),
                ]),
            ),
            (
                "others_rollup".to_owned(),
                table(&[("enabled", Value::from(self.others_rollup.enabled))]),
            ),
            (
                "cardinality_guard".to_owned(),
                table(&[
                    ("enabled", Value::from(self.cardinality_guard.enabled)),
                    (
                        "max_unique",
                        Value::from(self.cardinality_guard.max_unique as u64),
                    ),
                ]),
            ),
            (
                "reservoir_sampler".to_owned(),
                table(&[
                    ("enabled", Value::from(self.reservoir_sampler.enabled)),
                    (
                        "reservoir_size",
                        Value::from(self.reservoir_sampler.reservoir_size as u64),
                    ),
                ]),
            ),
            (
                "cpu_histogram".to_owned(),
                table(&[
                    ("enabled", Value::from(self.cpu_histogram.enabled)),
                    ("topk_only", Value::from(self.cpu_histogram.topk_only)),
                    (
                        "max_processes_in_memory",
                        Value::from(self.cpu_histogram.max_processes_in_memory as u64),
                    ),
                ]),
            ),
            (
                "timeseries_estimator".to_owned(),
                table(&[("enabled", Value::from(self.timeseries_estimator.enabled))]),
            ),
        ]
    }
}

pub(crate) const fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_clean() {
        let config = ProcessorsConfig::default();
        assert!(config.validation_errors("processors_config").is_empty());
    }

    #[test]
    fn topk_bounds_are_checked() {
        let mut config = AdaptiveTopKConfig {
            k_value: 5,
            ..AdaptiveTopKConfig::default()
        };
        let errors = config.validation_errors("p");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("p.k_value"));

        config.k_min = 0;
        assert!(
            config
                .validation_errors("p")
                .iter()
                .any(|e| e.contains("k_min"))
        );
    }

    #[test]
    fn cpu_bounds_must_increase() {
        let config = CpuHistogramConfig {
            explicit_bounds: vec![10.0, 5.0],
            ..CpuHistogramConfig::default()
        };
        assert!(
            config
                .validation_errors("p")
                .iter()
                .any(|e| e.contains("strictly increasing"))
        );
    }

    #[test]
    fn initial_parameters_cover_every_processor() {
        let params = ProcessorsConfig::default().initial_parameters();
        let ids: Vec<&str> = params.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "priority_tagger",
                "adaptive_topk",
                "others_rollup",
                "cardinality_guard",
                "reservoir_sampler",
                "cpu_histogram",
                "timeseries_estimator"
            ]
        );
    }
}

// SPDX-License-Identifier: Apache-2.0

//! Priority tagger: attaches a priority class to resources.
//!
//! Resource attributes are matched against an ordered rule list; the first
//! matching rule assigns the class, written as the `phoenix.priority`
//! resource attribute. Downstream stages key off that attribute: the rollup
//! breaks its sums down by class and the reservoir sampler always retains
//! `critical` resources.

mod metrics;

pub use metrics::PriorityTaggerMetrics;

use crate::ATTR_PRIORITY;
use phoenix_config::{PriorityClass, PriorityRule, PriorityTaggerConfig};
use phoenix_control::ConfigPatch;
use phoenix_engine::processor::patch_args;
use phoenix_engine::{
    BatchContext, ConfigStatus, EngineError, MetricsProcessor, PatchError, PatchOutcome,
    ProcessorCommon,
};
use phoenix_pdata::MetricBatch;
use phoenix_telemetry::MetricsRegistryHandle;
use phoenix_telemetry::metrics::MetricSet;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Registered processor id.
pub const PRIORITY_TAGGER_ID: &str = "priority_tagger";

struct CompiledRule {
    attribute: String,
    pattern: Regex,
    class: PriorityClass,
}

struct State {
    enabled: bool,
    rules: Vec<PriorityRule>,
    compiled: Vec<CompiledRule>,
    default_class: Option<PriorityClass>,
    metrics: MetricSet<PriorityTaggerMetrics>,
}

/// The priority tagger processor.
pub struct PriorityTagger {
    common: Arc<ProcessorCommon<State>>,
}

impl PriorityTagger {
    /// Builds the tagger from its policy table.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when a rule pattern does not compile.
    pub fn new(
        config: &PriorityTaggerConfig,
        registry: &MetricsRegistryHandle,
    ) -> Result<Self, EngineError> {
        let compiled = compile_rules(&config.rules).map_err(|err| {
            EngineError::processor(
                PRIORITY_TAGGER_ID,
                phoenix_engine::ProcessorErrorKind::Configuration,
                err,
            )
        })?;
        let common = Arc::new(ProcessorCommon::new(
            PRIORITY_TAGGER_ID,
            State {
                enabled: config.enabled,
                rules: config.rules.clone(),
                compiled,
                default_class: config.default_class,
                metrics: MetricSet::new(),
            },
        ));
        let collector = common.clone();
        registry.register(Box::new(move |ts| {
            phoenix_engine::scaffold::drain_metrics(&collector, |s| &mut s.metrics, ts)
        }));
        Ok(Self { common })
    }
}

fn compile_rules(rules: &[PriorityRule]) -> Result<Vec<CompiledRule>, String> {
    rules
        .iter()
        .map(|rule| {
            Regex::new(&rule.pattern)
                .map(|pattern| CompiledRule {
                    attribute: rule.attribute.clone(),
                    pattern,
                    class: rule.class,
                })
                .map_err(|err| format!("rule pattern `{}`: {err}", rule.pattern))
        })
        .collect()
}

fn count_class(metrics: &mut MetricSet<PriorityTaggerMetrics>, class: PriorityClass) {
    match class {
        PriorityClass::Critical => metrics.tagged_critical.inc(),
        PriorityClass::High => metrics.tagged_high.inc(),
        PriorityClass::Medium => metrics.tagged_medium.inc(),
        PriorityClass::Low => metrics.tagged_low.inc(),
    }
}

impl MetricsProcessor for PriorityTagger {
    fn name(&self) -> &str {
        self.common.name()
    }

    fn consume(&self, batch: &mut MetricBatch, _ctx: &BatchContext) -> Result<(), EngineError> {
        let mut state = self.common.write();
        if !state.enabled {
            return Ok(());
        }
        let state = &mut *state;
        for rm in &mut batch.resource_metrics {
            let matched = state.compiled.iter().find_map(|rule| {
                rm.attr_str(&rule.attribute)
                    .filter(|value| rule.pattern.is_match(value))
                    .map(|_| rule.class)
            });
            match matched.or(state.default_class) {
                Some(class) => {
                    rm.set_attr(ATTR_PRIORITY, class.as_str());
                    count_class(&mut state.metrics, class);
                }
                None => state.metrics.unmatched.inc(),
            }
        }
        Ok(())
    }

    fn apply_patch(&self, patch: &ConfigPatch) -> Result<PatchOutcome, PatchError> {
        let mut state = self.common.write();
        match patch.parameter_path.as_str() {
            "enabled" => {
                let enabled = patch_args::expect_bool(patch)?;
                if state.enabled == enabled {
                    return Ok(PatchOutcome::Duplicate);
                }
                state.enabled = enabled;
                Ok(PatchOutcome::Applied)
            }
            "rules" => {
                let raw = patch
                    .new_value
                    .as_str()
                    .ok_or_else(|| PatchError::TypeMismatch {
                        path: patch.parameter_path.clone(),
                        expected: "str",
                        got: patch.new_value.type_name(),
                    })?;
                let rules: Vec<PriorityRule> =
                    serde_json::from_str(raw).map_err(|_| PatchError::TypeMismatch {
                        path: patch.parameter_path.clone(),
                        expected: "priority rule list (JSON)",
                        got: "str",
                    })?;
                let compiled = compile_rules(&rules).map_err(|_| PatchError::TypeMismatch {
                    path: patch.parameter_path.clone(),
                    expected: "compilable rule patterns",
                    got: "str",
                })?;
                if state.rules == rules {
                    return Ok(PatchOutcome::Duplicate);
                }
                debug!(rules = rules.len(), "priority rules replaced");
                state.rules = rules;
                state.compiled = compiled;
                Ok(PatchOutcome::Applied)
            }
            _ => Err(patch_args::unknown(patch)),
        }
    }

    fn config_status(&self) -> ConfigStatus {
        let state = self.common.read();
        let mut parameters = BTreeMap::new();
        let _ = parameters.insert(
            "rules".to_owned(),
            serde_json::to_value(&state.rules).unwrap_or_default(),
        );
        let _ = parameters.insert(
            "default_class".to_owned(),
            serde_json::to_value(state.default_class).unwrap_or_default(),
        );
        ConfigStatus {
            parameters,
            enabled: state.enabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phoenix_control::{PatchValue, Severity};
    use phoenix_pdata::testing::counter_resource;
    use std::time::Duration;

    fn tagger(rules: Vec<PriorityRule>, default_class: Option<PriorityClass>) -> PriorityTagger {
        let config = PriorityTaggerConfig {
            enabled: true,
            rules,
            default_class,
        };
        PriorityTagger::new(&config, &MetricsRegistryHandle::new()).unwrap()
    }

    fn rule(attribute: &str, pattern: &str, class: PriorityClass) -> PriorityRule {
        PriorityRule {
            attribute: attribute.to_owned(),
            pattern: pattern.to_owned(),
            class,
        }
    }

    fn patch(path: &str, value: PatchValue) -> ConfigPatch {
        ConfigPatch::new(
            PRIORITY_TAGGER_ID,
            path,
            value,
            Severity::Normal,
            "test",
            0,
            Duration::from_secs(60),
        )
    }

    #[test]
    fn first_matching_rule_wins() {
        let tagger = tagger(
            vec![
                rule("process.name", "^kube", PriorityClass::Critical),
                rule("process.name", ".*", PriorityClass::Low),
            ],
            None,
        );
        let mut batch = MetricBatch::new(vec![
            counter_resource("kubelet", "c", 1.0, 1),
            counter_resource("bash", "c", 1.0, 1),
        ]);
        tagger.consume(&mut batch, &BatchContext::now()).unwrap();
        assert_eq!(
            batch.resource_metrics[0].attr_str(ATTR_PRIORITY),
            Some("critical")
        );
        assert_eq!(batch.resource_metrics[1].attr_str(ATTR_PRIORITY), Some("low"));
    }

    #[test]
    fn unmatched_resources_use_the_default_class() {
        let tagger = tagger(
            vec![rule("process.name", "^nginx$", PriorityClass::High)],
            Some(PriorityClass::Medium),
        );
        let mut batch = MetricBatch::new(vec![counter_resource("bash", "c", 1.0, 1)]);
        tagger.consume(&mut batch, &BatchContext::now()).unwrap();
        assert_eq!(
            batch.resource_metrics[0].attr_str(ATTR_PRIORITY),
            Some("medium")
        );
    }

    #[test]
    fn no_default_leaves_resources_untagged() {
        let tagger = tagger(vec![rule("process.name", "^nginx$", PriorityClass::High)], None);
        let mut batch = MetricBatch::new(vec![counter_resource("bash", "c", 1.0, 1)]);
        tagger.consume(&mut batch, &BatchContext::now()).unwrap();
        assert_eq!(batch.resource_metrics[0].attr_str(ATTR_PRIORITY), None);
    }

    #[test]
    fn disabled_tagger_forwards_untouched() {
        let tagger = tagger(vec![rule("process.name", ".*", PriorityClass::High)], None);
        tagger
            .apply_patch(&patch("enabled", PatchValue::Bool(false)))
            .unwrap();
        let mut batch = MetricBatch::new(vec![counter_resource("bash", "c", 1.0, 1)]);
        let before = batch.clone();
        tagger.consume(&mut batch, &BatchContext::now()).unwrap();
        assert_eq!(batch, before);
    }

    #[test]
    fn rules_are_replaceable_via_patch() {
        let tagger = tagger(vec![], Some(PriorityClass::Low));
        let new_rules =
            serde_json::to_string(&vec![rule("process.name", "^redis", PriorityClass::Critical)])
                .unwrap();
        let outcome = tagger
            .apply_patch(&patch("rules", PatchValue::Str(new_rules)))
            .unwrap();
        assert_eq!(outcome, PatchOutcome::Applied);

        let mut batch = MetricBatch::new(vec![counter_resource("redis-server", "c", 1.0, 1)]);
        tagger.consume(&mut batch, &BatchContext::now()).unwrap();
        assert_eq!(
            batch.resource_metrics[0].attr_str(ATTR_PRIORITY),
            Some("critical")
        );
    }

    #[test]
    fn malformed_rule_patch_is_a_type_error() {
        let tagger = tagger(vec![], None);
        let err = tagger
            .apply_patch(&patch("rules", PatchValue::Str("not json".to_owned())))
            .unwrap_err();
        assert!(matches!(err, PatchError::TypeMismatch { .. }));

        let err = tagger
            .apply_patch(&patch("nope", PatchValue::Bool(true)))
            .unwrap_err();
        assert!(matches!(err, PatchError::UnknownParameter { .. }));
    }
}

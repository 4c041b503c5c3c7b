// SPDX-License-Identifier: Apache-2.0

//! Adaptive top-k filter: tags the heaviest resources per batch.
//!
//! Two passes per batch. Pass one scans every keyed resource and feeds the
//! Space-Saving sketch with the resource's current counter value as weight.
//! Pass two recomputes the top-k set from the sketch and tags each member
//! resource with `topk.included = true`; non-members stay untagged and are
//! folded into the synthetic bucket by the others rollup downstream
//! (together the two stages account for every input resource exactly once).
//!
//! `k` is live-tunable within `[k_min, k_max]`: the PID decider drives
//! `k_value` patches off the emitted `phoenix.topk.coverage` gauge.

mod metrics;

pub use metrics::AdaptiveTopKMetrics;

use crate::ATTR_TOPK_INCLUDED;
use phoenix_config::AdaptiveTopKConfig;
use phoenix_control::ConfigPatch;
use phoenix_engine::processor::patch_args;
use phoenix_engine::{
    BatchContext, ConfigStatus, EngineError, MetricsProcessor, PatchError, PatchOutcome,
    ProcessorCommon, ProcessorErrorKind,
};
use phoenix_pdata::{Metric, MetricBatch, NumberDataPoint, ResourceKey};
use phoenix_sketch::SpaceSaving;
use phoenix_telemetry::MetricsRegistryHandle;
use phoenix_telemetry::metrics::MetricSet;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Registered processor id.
pub const ADAPTIVE_TOPK_ID: &str = "adaptive_topk";

/// Name of the in-batch coverage KPI gauge.
pub const COVERAGE_METRIC: &str = "phoenix.topk.coverage";

struct State {
    config: AdaptiveTopKConfig,
    sketch: SpaceSaving,
    metrics: MetricSet<AdaptiveTopKMetrics>,
}

/// The adaptive top-k processor.
pub struct AdaptiveTopK {
    common: Arc<ProcessorCommon<State>>,
}

impl AdaptiveTopK {
    /// Builds the filter from its policy table.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the table violates its bounds.
    pub fn new(
        config: &AdaptiveTopKConfig,
        registry: &MetricsRegistryHandle,
    ) -> Result<Self, EngineError> {
        let errors = config.validation_errors("adaptive_topk");
        if !errors.is_empty() {
            return Err(EngineError::processor(
                ADAPTIVE_TOPK_ID,
                ProcessorErrorKind::Configuration,
                errors.join("; "),
            ));
        }
        let sketch = SpaceSaving::new(config.k_value as usize).map_err(|err| {
            EngineError::processor(
                ADAPTIVE_TOPK_ID,
                ProcessorErrorKind::Configuration,
                err.to_string(),
            )
        })?;
        let common = Arc::new(ProcessorCommon::new(
            ADAPTIVE_TOPK_ID,
            State {
                config: config.clone(),
                sketch,
                metrics: MetricSet::new(),
            },
        ));
        let collector = common.clone();
        registry.register(Box::new(move |ts| {
            phoenix_engine::scaffold::drain_metrics(&collector, |s| &mut s.metrics, ts)
        }));
        Ok(Self { common })
    }

    /// The current top-k set, for tests and status surfaces.
    #[must_use]
    pub fn top_k_set(&self) -> Vec<ResourceKey> {
        let state = self.common.read();
        state
            .sketch
            .top_k()
            .into_iter()
            .take(state.config.k_value as usize)
            .map(|entry| entry.key)
            .collect()
    }
}

impl MetricsProcessor for AdaptiveTopK {
    fn name(&self) -> &str {
        self.common.name()
    }

    fn consume(&self, batch: &mut MetricBatch, ctx: &BatchContext) -> Result<(), EngineError> {
        let mut state = self.common.write();
        if !state.config.enabled {
            return Ok(());
        }
        let state = &mut *state;
        let resource_field = state.config.resource_field.clone();
        let counter_field = state.config.counter_field.clone();

        // Pass 1: feed the sketch with (key, current counter value).
        let mut keyed_total = 0u64;
        for rm in &batch.resource_metrics {
            if ResourceKey::from_resource(rm, &resource_field).is_none() {
                state.metrics.resources_skipped.inc();
                debug!(field = %resource_field, "resource without resource field skipped");
                continue;
            }
            keyed_total += 1;
            if let Some(sample) = rm.counter_sample(&resource_field, &counter_field) {
                state.sketch.add(sample.key, sample.value);
            }
        }

        // Pass 2: recompute the set and tag members.
        let k = state.config.k_value as usize;
        let top: HashSet<ResourceKey> = state
            .sketch
            .top_k()
            .into_iter()
            .take(k)
            .map(|entry| entry.key)
            .collect();
        if top.len() > state.config.k_max as usize {
            // The sketch can never outgrow k_max; treat it as a fault rather
            // than propagate an oversized set.
            return Err(EngineError::processor(
                ADAPTIVE_TOPK_ID,
                ProcessorErrorKind::Structural,
                format!("top-k set size {} exceeds k_max {}", top.len(), state.config.k_max),
            ));
        }

        let mut included = 0u64;
        for rm in &mut batch.resource_metrics {
            let Some(key) = ResourceKey::from_resource(rm, &resource_field) else {
                continue;
            };
            if top.contains(&key) {
                rm.set_attr(ATTR_TOPK_INCLUDED, true);
                included += 1;
            }
        }

        let coverage = if keyed_total == 0 {
            1.0
        } else {
            included as f64 / keyed_total as f64
        };
        state.metrics.resources_included.add(included);
        state
            .metrics
            .resources_excluded
            .add(keyed_total.saturating_sub(included));
        state.metrics.k_current.set(state.config.k_value.into());

        // The coverage KPI travels in the batch itself so the decider sees
        // the value produced by this very batch.
        batch.push_self_metric(Metric::gauge(
            COVERAGE_METRIC,
            vec![NumberDataPoint::double(ctx.time_unix_nano, coverage)],
        ));
        Ok(())
    }

    fn apply_patch(&self, patch: &ConfigPatch) -> Result<PatchOutcome, PatchError> {
        let mut state = self.common.write();
        match patch.parameter_path.as_str() {
            "k_value" => {
                let (min, max) = (state.config.k_min, state.config.k_max);
                let k = patch_args::expect_int_in(patch, i64::from(min), i64::from(max))? as u32;
                if state.config.k_value == k {
                    return Ok(PatchOutcome::Duplicate);
                }
                debug!(from = state.config.k_value, to = k, "top-k k updated");
                state.config.k_value = k;
                state.sketch.set_k(k as usize);
                Ok(PatchOutcome::Applied)
            }
            "enabled" => {
                let enabled = patch_args::expect_bool(patch)?;
                if state.config.enabled == enabled {
                    return Ok(PatchOutcome::Duplicate);
                }
                state.config.enabled = enabled;
                Ok(PatchOutcome::Applied)
            }
            _ => Err(patch_args::unknown(patch)),
        }
    }

    fn config_status(&self) -> ConfigStatus {
        let state = self.common.read();
        let mut parameters = std::collections::BTreeMap::new();
        let _ = parameters.insert("k_value".to_owned(), state.config.k_value.into());
        let _ = parameters.insert("k_min".to_owned(), state.config.k_min.into());
        let _ = parameters.insert("k_max".to_owned(), state.config.k_max.into());
        let _ = parameters.insert(
            "resource_field".to_owned(),
            state.config.resource_field.clone().into(),
        );
        let _ = parameters.insert(
            "counter_field".to_owned(),
            state.config.counter_field.clone().into(),
        );
        ConfigStatus {
            parameters,
            enabled: state.config.enabled,
        }
    }
}

// SPDX-License-Identifier: Apache-2.0

//! Cardinality guardian: bounds the number of unique series downstream.
//!
//! Tracks series identities (resource attributes + metric name + data-point
//! attributes, hashed) up to `max_unique` per window. Once the budget is
//! exhausted, new identities are mapped onto a small fixed set of overflow
//! buckets via a stable hash, carried as the `cg_bucket` resource attribute;
//! downstream cardinality therefore stays below `max_unique + bucket_count`.
//! No data point is ever dropped, only re-labelled.

mod metrics;

pub use metrics::CardinalityGuardMetrics;

use crate::ATTR_CG_BUCKET;
use crate::identity::series_hash;
use phoenix_config::CardinalityGuardConfig;
use phoenix_control::ConfigPatch;
use phoenix_engine::processor::patch_args;
use phoenix_engine::{
    BatchContext, ConfigStatus, EngineError, MetricsProcessor, PatchError, PatchOutcome,
    ProcessorCommon,
};
use phoenix_pdata::{MetricBatch, MetricData};
use phoenix_telemetry::MetricsRegistryHandle;
use phoenix_telemetry::metrics::MetricSet;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Registered processor id.
pub const CARDINALITY_GUARD_ID: &str = "cardinality_guard";

struct State {
    config: CardinalityGuardConfig,
    seen: HashSet<u64>,
    window_started: Instant,
    metrics: MetricSet<CardinalityGuardMetrics>,
}

/// The cardinality guardian processor.
pub struct CardinalityGuard {
    common: Arc<ProcessorCommon<State>>,
}

impl CardinalityGuard {
    /// Builds the guardian from its policy table.
    pub fn new(config: &CardinalityGuardConfig, registry: &MetricsRegistryHandle) -> Self {
        let common = Arc::new(ProcessorCommon::new(
            CARDINALITY_GUARD_ID,
            State {
                config: config.clone(),
                seen: HashSet::new(),
                window_started: Instant::now(),
                metrics: MetricSet::new(),
            },
        ));
        let collector = common.clone();
        registry.register(Box::new(move |ts| {
            phoenix_engine::scaffold::drain_metrics(&collector, |s| &mut s.metrics, ts)
        }));
        Self { common }
    }
}

impl MetricsProcessor for CardinalityGuard {
    fn name(&self) -> &str {
        self.common.name()
    }

    fn consume(&self, batch: &mut MetricBatch, _ctx: &BatchContext) -> Result<(), EngineError> {
        let mut state = self.common.write();
        if !state.config.enabled {
            return Ok(());
        }
        let state = &mut *state;

        if state.window_started.elapsed() >= state.config.reset_interval {
            debug!(tracked = state.seen.len(), "cardinality window reset");
            state.seen.clear();
            state.window_started = Instant::now();
            state.metrics.window_resets.inc();
        }

        for rm in &mut batch.resource_metrics {
            let mut bucket: Option<u64> = None;
            let mut bucketed_points = 0u64;
            let resource_attrs = rm.resource.attributes.clone();
            for metric in rm.metrics_mut() {
                let name = metric.name.clone();
                let point_attrs: Vec<Vec<phoenix_pdata::KeyValue>> = match &metric.data {
                    MetricData::Gauge { data_points } | MetricData::Sum { data_points, .. } => {
                        data_points.iter().map(|dp| dp.attributes.clone()).collect()
                    }
                    MetricData::Histogram { data_points, .. } => {
                        data_points.iter().map(|dp| dp.attributes.clone()).collect()
                    }
                };
                for attrs in point_attrs {
                    let hash = series_hash(&resource_attrs, &name, &attrs);
                    if state.seen.contains(&hash) {
                        continue;
                    }
                    if state.seen.len() < state.config.max_unique {
                        let _ = state.seen.insert(hash);
                    } else {
                        bucket = Some(hash % state.config.bucket_count);
                        bucketed_points += 1;
                        state.metrics.overflow_series.inc();
                    }
                }
            }
            if let Some(bucket) = bucket {
                rm.set_attr(ATTR_CG_BUCKET, bucket as i64);
                state.metrics.bucketed_points.add(bucketed_points);
            }
        }
        state.metrics.tracked_series.set(state.seen.len() as u64);
        Ok(())
    }

    fn apply_patch(&self, patch: &ConfigPatch) -> Result<PatchOutcome, PatchError> {
        let mut state = self.common.write();
        match patch.parameter_path.as_str() {
            "max_unique" => {
                let max = patch_args::expect_int_in(patch, 1, i64::MAX)? as usize;
                if state.config.max_unique == max {
                    return Ok(PatchOutcome::Duplicate);
                }
                // Shrinking does not evict identities mid-window; the bound
                // takes full effect at the next reset.
                state.config.max_unique = max;
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
        let _ = parameters.insert(
            "max_unique".to_owned(),
            serde_json::Value::from(state.config.max_unique as u64),
        );
        let _ = parameters.insert(
            "bucket_count".to_owned(),
            serde_json::Value::from(state.config.bucket_count),
        );
        ConfigStatus {
            parameters,
            enabled: state.config.enabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phoenix_control::{PatchValue, Severity};
    use phoenix_pdata::testing::counter_resource;
    use std::time::Duration;

    fn guard(max_unique: usize, bucket_count: u64) -> CardinalityGuard {
        CardinalityGuard::new(
            &CardinalityGuardConfig {
                enabled: true,
                max_unique,
                bucket_count,
                reset_interval: Duration::from_secs(3600),
            },
            &MetricsRegistryHandle::new(),
        )
    }

    fn batch_of(n: usize) -> MetricBatch {
        MetricBatch::new(
            (0..n)
                .map(|i| counter_resource(&format!("p-{i}"), "c", 1.0, 1))
                .collect(),
        )
    }

    #[test]
    fn under_budget_nothing_is_bucketed() {
        let guard = guard(10, 4);
        let mut batch = batch_of(5);
        guard.consume(&mut batch, &BatchContext::now()).unwrap();
        assert!(
            batch
                .resource_metrics
                .iter()
                .all(|rm| rm.attr_str(ATTR_CG_BUCKET).is_none()
                    && phoenix_pdata::attrs::get(&rm.resource.attributes, ATTR_CG_BUCKET)
                        .is_none())
        );
    }

    #[test]
    fn overflow_series_get_bounded_buckets() {
        let bucket_count = 4u64;
        let guard = guard(3, bucket_count);
        let mut batch = batch_of(20);
        guard.consume(&mut batch, &BatchContext::now()).unwrap();

        let bucketed: Vec<i64> = batch
            .resource_metrics
            .iter()
            .filter_map(|rm| {
                phoenix_pdata::attrs::get(&rm.resource.attributes, ATTR_CG_BUCKET)
                    .and_then(|v| v.as_int())
            })
            .collect();
        assert_eq!(bucketed.len(), 17);
        assert!(bucketed.iter().all(|b| (0..bucket_count as i64).contains(b)));
        // No data point was dropped.
        assert_eq!(batch.points_len(), 20);
    }

    #[test]
    fn known_series_stay_unbucketed_after_overflow() {
        let guard = guard(2, 4);
        let mut first = batch_of(2);
        guard.consume(&mut first, &BatchContext::now()).unwrap();

        // Same two series again plus one newcomer.
        let mut second = batch_of(3);
        guard.consume(&mut second, &BatchContext::now()).unwrap();
        let bucketed = second
            .resource_metrics
            .iter()
            .filter(|rm| {
                phoenix_pdata::attrs::get(&rm.resource.attributes, ATTR_CG_BUCKET).is_some()
            })
            .count();
        assert_eq!(bucketed, 1);
    }

    #[test]
    fn max_unique_is_patchable_with_floor() {
        let guard = guard(10, 4);
        let patch = ConfigPatch::new(
            CARDINALITY_GUARD_ID,
            "max_unique",
            PatchValue::Int(0),
            Severity::Normal,
            "test",
            0,
            Duration::from_secs(60),
        );
        assert!(matches!(
            guard.apply_patch(&patch),
            Err(PatchError::OutOfRange { .. })
        ));

        let patch = ConfigPatch::new(
            CARDINALITY_GUARD_ID,
            "max_unique",
            PatchValue::Int(100),
            Severity::Normal,
            "test",
            0,
            Duration::from_secs(60),
        );
        assert_eq!(guard.apply_patch(&patch).unwrap(), PatchOutcome::Applied);
        assert_eq!(
            guard.config_status().parameters["max_unique"],
            serde_json::json!(100)
        );
    }
}

// SPDX-License-Identifier: Apache-2.0

//! Others rollup: folds non-top-k resources into one synthetic bucket.
//!
//! Runs after the adaptive top-k filter. Every keyed resource that was not
//! tagged `topk.included = true` is removed from the batch and aggregated
//! into a single `others` resource carrying the summed counter, a resource
//! count, and per-priority-class sums. Whitelisted non-counter metrics are
//! carried over; everything else on a folded resource is dropped.
//!
//! Exactly one bucket leaves the processor per batch regardless of input
//! fan-in: an upstream `others` resource (marked `phoenix.rollup`) is folded
//! like any other non-included resource, so re-processing cannot multiply
//! buckets.

mod metrics;

pub use metrics::OthersRollupMetrics;

use crate::{ATTR_PRIORITY, ATTR_ROLLUP, ATTR_TOPK_INCLUDED};
use phoenix_config::OthersRollupConfig;
use phoenix_control::ConfigPatch;
use phoenix_engine::processor::patch_args;
use phoenix_engine::{
    BatchContext, ConfigStatus, EngineError, MetricsProcessor, PatchError, PatchOutcome,
    ProcessorCommon,
};
use phoenix_pdata::{
    KeyValue, Metric, MetricBatch, MetricData, NumberDataPoint, ResourceMetrics,
};
use phoenix_telemetry::MetricsRegistryHandle;
use phoenix_telemetry::metrics::MetricSet;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Registered processor id.
pub const OTHERS_ROLLUP_ID: &str = "others_rollup";

/// Value of the resource field on the synthetic bucket.
pub const OTHERS_RESOURCE_NAME: &str = "others";

struct State {
    config: OthersRollupConfig,
    metrics: MetricSet<OthersRollupMetrics>,
}

/// The others rollup processor.
pub struct OthersRollup {
    common: Arc<ProcessorCommon<State>>,
}

impl OthersRollup {
    /// Builds the rollup from its policy table.
    pub fn new(config: &OthersRollupConfig, registry: &MetricsRegistryHandle) -> Self {
        let common = Arc::new(ProcessorCommon::new(
            OTHERS_ROLLUP_ID,
            State {
                config: config.clone(),
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

#[derive(Default)]
struct Accumulator {
    folded: u64,
    counter_sum: f64,
    per_class: BTreeMap<String, f64>,
    kept_metrics: Vec<Metric>,
    latest_ts: u64,
}

impl Accumulator {
    fn fold(&mut self, rm: &ResourceMetrics, config: &OthersRollupConfig, dropped: &mut u64) {
        self.folded += 1;
        let class = rm.attr_str(ATTR_PRIORITY).map(str::to_owned);
        for metric in rm.metrics() {
            if metric.name == config.counter_field {
                if let Some(dp) = metric.latest_number_point() {
                    let value = dp.value.as_f64();
                    self.counter_sum += value;
                    self.latest_ts = self.latest_ts.max(dp.time_unix_nano);
                    if let Some(class) = &class {
                        *self.per_class.entry(class.clone()).or_default() += value;
                    }
                }
            } else if config.keep_metrics.iter().any(|name| *name == metric.name) {
                self.kept_metrics.push(metric.clone());
            } else {
                *dropped += 1;
            }
        }
    }

    fn into_resource(self, config: &OthersRollupConfig) -> ResourceMetrics {
        let mut data_points = vec![NumberDataPoint::double(self.latest_ts, self.counter_sum)];
        for (class, sum) in &self.per_class {
            let mut dp = NumberDataPoint::double(self.latest_ts, *sum);
            dp.attributes.push(KeyValue::new(ATTR_PRIORITY, class.as_str()));
            data_points.push(dp);
        }
        let mut metrics = vec![
            Metric {
                name: config.counter_field.clone(),
                description: String::new(),
                unit: String::new(),
                data: MetricData::Sum {
                    data_points,
                    is_monotonic: true,
                    temporality: phoenix_pdata::Temporality::Cumulative,
                },
            },
            Metric::gauge(
                "phoenix.others.resource_count",
                vec![NumberDataPoint::int(self.latest_ts, self.folded as i64)],
            ),
        ];
        metrics.extend(self.kept_metrics);

        let mut rm = ResourceMetrics::new(
            vec![KeyValue::new(
                config.resource_field.as_str(),
                OTHERS_RESOURCE_NAME,
            )],
            metrics,
        );
        rm.set_attr(ATTR_ROLLUP, true);
        rm
    }
}

impl MetricsProcessor for OthersRollup {
    fn name(&self) -> &str {
        self.common.name()
    }

    fn consume(&self, batch: &mut MetricBatch, _ctx: &BatchContext) -> Result<(), EngineError> {
        let mut state = self.common.write();
        if !state.config.enabled {
            return Ok(());
        }
        let state = &mut *state;
        let config = &state.config;

        let mut accumulator = Accumulator::default();
        let mut dropped = 0u64;
        batch.resource_metrics.retain(|rm| {
            let keyed = rm.attr_str(&config.resource_field).is_some();
            if !keyed || rm.has_flag(ATTR_TOPK_INCLUDED) {
                return true;
            }
            accumulator.fold(rm, config, &mut dropped);
            false
        });

        state.metrics.metrics_dropped.add(dropped);
        if accumulator.folded > 0 {
            state.metrics.resources_folded.add(accumulator.folded);
            state.metrics.buckets_emitted.inc();
            batch
                .resource_metrics
                .push(accumulator.into_resource(config));
        }
        Ok(())
    }

    fn apply_patch(&self, patch: &ConfigPatch) -> Result<PatchOutcome, PatchError> {
        let mut state = self.common.write();
        match patch.parameter_path.as_str() {
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
        let mut parameters = BTreeMap::new();
        let _ = parameters.insert(
            "counter_field".to_owned(),
            state.config.counter_field.clone().into(),
        );
        let _ = parameters.insert(
            "keep_metrics".to_owned(),
            serde_json::to_value(&state.config.keep_metrics).unwrap_or_default(),
        );
        ConfigStatus {
            parameters,
            enabled: state.config.enabled,
        }
    }
}

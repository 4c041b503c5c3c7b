// SPDX-License-Identifier: Apache-2.0

//! Timeseries estimator: self-metric of unique series cardinality.
//!
//! Counts unique `(metric name, resource attributes, point attributes)`
//! identities per refresh window. Counting starts exact (a hash set); when
//! the set reaches `max_unique_time_series`, the retained hashes are
//! replayed into a HyperLogLog and counting continues probabilistically
//! until the window rolls over, so the estimate never falls below what was
//! truly observed so far in the window. The estimate is emitted into the
//! batch as the `phoenix.timeseries.estimate` gauge.

mod metrics;

pub use metrics::TimeseriesEstimatorMetrics;

use crate::identity::series_hash;
use phoenix_config::TimeseriesEstimatorConfig;
use phoenix_control::ConfigPatch;
use phoenix_engine::processor::patch_args;
use phoenix_engine::{
    BatchContext, ConfigStatus, EngineError, MetricsProcessor, PatchError, PatchOutcome,
    ProcessorCommon, ProcessorErrorKind,
};
use phoenix_pdata::{Metric, MetricBatch, MetricData, NumberDataPoint};
use phoenix_sketch::HyperLogLog;
use phoenix_telemetry::MetricsRegistryHandle;
use phoenix_telemetry::metrics::MetricSet;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Registered processor id.
pub const TIMESERIES_ESTIMATOR_ID: &str = "timeseries_estimator";

/// Name of the emitted estimate gauge.
pub const ESTIMATE_METRIC: &str = "phoenix.timeseries.estimate";

enum Mode {
    Exact(HashSet<u64>),
    Hll(HyperLogLog),
}

impl Mode {
    fn estimate(&self) -> f64 {
        match self {
            Mode::Exact(set) => set.len() as f64,
            Mode::Hll(hll) => hll.count(),
        }
    }

    fn memory_bytes(&self) -> u64 {
        match self {
            // 8 bytes per retained hash, ignoring set overhead.
            Mode::Exact(set) => (set.len() * 8) as u64,
            Mode::Hll(hll) => hll.memory_bytes() as u64,
        }
    }

    fn is_exact(&self) -> bool {
        matches!(self, Mode::Exact(_))
    }
}

struct State {
    config: TimeseriesEstimatorConfig,
    mode: Mode,
    window_started: Instant,
    metrics: MetricSet<TimeseriesEstimatorMetrics>,
}

/// The timeseries estimator processor.
pub struct TimeseriesEstimator {
    common: Arc<ProcessorCommon<State>>,
}

impl TimeseriesEstimator {
    /// Builds the estimator from its policy table.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an unusable HLL precision.
    pub fn new(
        config: &TimeseriesEstimatorConfig,
        registry: &MetricsRegistryHandle,
    ) -> Result<Self, EngineError> {
        let errors = config.validation_errors("timeseries_estimator");
        if !errors.is_empty() {
            return Err(EngineError::processor(
                TIMESERIES_ESTIMATOR_ID,
                ProcessorErrorKind::Configuration,
                errors.join("; "),
            ));
        }
        let common = Arc::new(ProcessorCommon::new(
            TIMESERIES_ESTIMATOR_ID,
            State {
                config: config.clone(),
                mode: Mode::Exact(HashSet::new()),
                window_started: Instant::now(),
                metrics: MetricSet::new(),
            },
        ));
        let collector = common.clone();
        registry.register(Box::new(move |ts| {
            phoenix_engine::scaffold::drain_metrics(&collector, |s| &mut s.metrics, ts)
        }));
        Ok(Self { common })
    }

    /// Current estimate, for tests and status surfaces.
    #[must_use]
    pub fn estimate(&self) -> f64 {
        self.common.read().mode.estimate()
    }
}

impl MetricsProcessor for TimeseriesEstimator {
    fn name(&self) -> &str {
        self.common.name()
    }

    fn consume(&self, batch: &mut MetricBatch, ctx: &BatchContext) -> Result<(), EngineError> {
        let mut state = self.common.write();
        if !state.config.enabled {
            return Ok(());
        }
        let state = &mut *state;

        if state.window_started.elapsed() >= state.config.refresh_interval {
            debug!("timeseries window refresh, returning to exact counting");
            state.mode = Mode::Exact(HashSet::new());
            state.window_started = Instant::now();
        }

        for rm in &batch.resource_metrics {
            let resource_attrs = &rm.resource.attributes;
            for metric in rm.metrics() {
                let point_attrs: Vec<&[phoenix_pdata::KeyValue]> = match &metric.data {
                    MetricData::Gauge { data_points } | MetricData::Sum { data_points, .. } => {
                        data_points.iter().map(|dp| dp.attributes.as_slice()).collect()
                    }
                    MetricData::Histogram { data_points, .. } => {
                        data_points.iter().map(|dp| dp.attributes.as_slice()).collect()
                    }
                };
                for attrs in point_attrs {
                    let hash = series_hash(resource_attrs, &metric.name, attrs);
                    let exhausted = match &mut state.mode {
                        Mode::Exact(set) => {
                            let _ = set.insert(hash);
                            set.len() >= state.config.max_unique_time_series
                        }
                        Mode::Hll(hll) => {
                            hll.add_hash(hash);
                            false
                        }
                    };
                    if exhausted {
                        // Migrate: replay everything seen so far so the
                        // estimate cannot under-report.
                        if let Mode::Exact(set) = &state.mode {
                            let mut hll = HyperLogLog::new(state.config.hll_precision)
                                .expect("precision validated at construction");
                            for seen in set {
                                hll.add_hash(*seen);
                            }
                            debug!(
                                retained = set.len(),
                                "exact series tracking exhausted, falling back to hll"
                            );
                            state.mode = Mode::Hll(hll);
                        }
                    }
                }
            }
        }

        let estimate = state.mode.estimate();
        state.metrics.estimate.set(estimate);
        state
            .metrics
            .estimator_mode
            .set(u64::from(!state.mode.is_exact()));
        state.metrics.memory_bytes.set(state.mode.memory_bytes());

        batch.push_self_metric(Metric::gauge(
            ESTIMATE_METRIC,
            vec![NumberDataPoint::double(ctx.time_unix_nano, estimate)],
        ));
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
        let mut parameters = std::collections::BTreeMap::new();
        let _ = parameters.insert(
            "refresh_interval_seconds".to_owned(),
            serde_json::Value::from(state.config.refresh_interval.as_secs()),
        );
        let _ = parameters.insert(
            "max_unique_time_series".to_owned(),
            serde_json::Value::from(state.config.max_unique_time_series as u64),
        );
        let _ = parameters.insert(
            "hll_precision".to_owned(),
            serde_json::Value::from(state.config.hll_precision),
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
    use phoenix_pdata::testing::counter_resource;
    use std::time::Duration;

    fn estimator(max_unique: usize) -> TimeseriesEstimator {
        TimeseriesEstimator::new(
            &TimeseriesEstimatorConfig {
                enabled: true,
                refresh_interval: Duration::from_secs(3600),
                max_unique_time_series: max_unique,
                hll_precision: 12,
            },
            &MetricsRegistryHandle::new(),
        )
        .unwrap()
    }

    fn batch_of(range: std::ops::Range<usize>) -> MetricBatch {
        MetricBatch::new(
            range
                .map(|i| counter_resource(&format!("p-{i}"), "c", 1.0, 1))
                .collect(),
        )
    }

    #[test]
    fn exact_mode_counts_exactly() {
        let est = estimator(1000);
        let mut batch = batch_of(0..25);
        est.consume(&mut batch, &BatchContext::now()).unwrap();
        assert!((est.estimate() - 25.0).abs() < f64::EPSILON);

        // The same series again add nothing.
        let mut again = batch_of(0..25);
        est.consume(&mut again, &BatchContext::now()).unwrap();
        assert!((est.estimate() - 25.0).abs() < f64::EPSILON);
        assert_eq!(est.common.read().metrics.estimator_mode.get(), 0);
    }

    #[test]
    fn estimate_is_emitted_into_the_batch() {
        let est = estimator(1000);
        let mut batch = batch_of(0..3);
        est.consume(&mut batch, &BatchContext::now()).unwrap();
        let emitted = batch
            .resource_metrics
            .iter()
            .flat_map(|rm| rm.metrics())
            .find(|m| m.name == ESTIMATE_METRIC)
            .expect("estimate gauge missing");
        assert!(
            (emitted.number_points()[0].value.as_f64() - 3.0).abs() < f64::EPSILON
        );
    }

    #[test]
    fn overflow_migrates_to_hll_without_undercounting() {
        let est = estimator(100);
        let mut batch = batch_of(0..500);
        est.consume(&mut batch, &BatchContext::now()).unwrap();

        let state = est.common.read();
        assert_eq!(state.metrics.estimator_mode.get(), 1);
        drop(state);

        // Estimate stays within HLL error of the true 500 distinct series,
        // and in particular never reports fewer than observed minus bound.
        let estimate = est.estimate();
        let tolerance = 3.0 * 1.04 / f64::from(1u32 << 12).sqrt() * 500.0;
        assert!(
            (estimate - 500.0).abs() < tolerance,
            "estimate {estimate} outside {tolerance} of 500"
        );
        assert!(estimate >= 500.0 - tolerance);
    }

    #[test]
    fn disabled_estimator_adds_nothing() {
        let est = estimator(100);
        let patch = ConfigPatch::new(
            TIMESERIES_ESTIMATOR_ID,
            "enabled",
            phoenix_control::PatchValue::Bool(false),
            phoenix_control::Severity::Urgent,
            "test",
            0,
            Duration::from_secs(60),
        );
        est.apply_patch(&patch).unwrap();
        let mut batch = batch_of(0..3);
        let before = batch.clone();
        est.consume(&mut batch, &BatchContext::now()).unwrap();
        assert_eq!(batch, before);
    }
}

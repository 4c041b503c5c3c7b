// SPDX-License-Identifier: Apache-2.0

//! CPU histogram converter: cumulative CPU time to utilization histograms.
//!
//! For each process identity `(executable, pid)` the converter keeps the
//! last cumulative `process.cpu.time` reading. A later reading yields
//! `util% = (Δcpu / Δt) · 100`, recorded into a per-batch histogram with
//! the configured explicit bounds and emitted as
//! `process.cpu.utilization.histogram` (unit `%`, delta temporality). The
//! first observation of a process only establishes its baseline; a
//! cumulative regression (process restart, counter reset) re-baselines and
//! drops the sample, so no negative utilization ever escapes.
//!
//! State survives restarts through an optional JSON-lines file flushed on a
//! timer by a background worker (temp file + atomic rename); the data path
//! never waits on the flush.

mod metrics;
pub mod state;

pub use metrics::CpuHistogramMetrics;
pub use state::{CpuState, ProcessIdentity, StateStore};

use crate::ATTR_TOPK_INCLUDED;
use crate::identity::resource_hash;
use phoenix_config::CpuHistogramConfig;
use phoenix_control::ConfigPatch;
use phoenix_engine::processor::patch_args;
use phoenix_engine::{
    BatchContext, ConfigStatus, EngineError, MetricsProcessor, PatchError, PatchOutcome,
    ProcessorCommon, ProcessorErrorKind,
};
use phoenix_pdata::{
    HistogramDataPoint, KeyValue, Metric, MetricBatch, MetricData, ResourceMetrics, Temporality,
};
use phoenix_telemetry::MetricsRegistryHandle;
use phoenix_telemetry::metrics::MetricSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, warn};

/// Registered processor id.
pub const CPU_HISTOGRAM_ID: &str = "cpu_histogram";

/// Name of the produced histogram metric.
pub const CPU_UTILIZATION_METRIC: &str = "process.cpu.utilization.histogram";

/// Name of the consumed cumulative counter.
pub const CPU_TIME_METRIC: &str = "process.cpu.time";

struct State {
    config: CpuHistogramConfig,
    store: StateStore,
    last_flush: Instant,
    metrics: MetricSet<CpuHistogramMetrics>,
}

/// The CPU histogram converter.
pub struct CpuHistogram {
    common: Arc<ProcessorCommon<State>>,
    flush_in_progress: Arc<AtomicBool>,
}

impl CpuHistogram {
    /// Builds the converter, loading persisted state when configured.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for invalid bounds.
    pub fn new(
        config: &CpuHistogramConfig,
        registry: &MetricsRegistryHandle,
    ) -> Result<Self, EngineError> {
        let errors = config.validation_errors("cpu_histogram");
        if !errors.is_empty() {
            return Err(EngineError::processor(
                CPU_HISTOGRAM_ID,
                ProcessorErrorKind::Configuration,
                errors.join("; "),
            ));
        }
        let store = match &config.state_path {
            Some(path) => StateStore::load(path),
            None => StateStore::default(),
        };
        let common = Arc::new(ProcessorCommon::new(
            CPU_HISTOGRAM_ID,
            State {
                config: config.clone(),
                store,
                last_flush: Instant::now(),
                metrics: MetricSet::new(),
            },
        ));
        let collector = common.clone();
        registry.register(Box::new(move |ts| {
            phoenix_engine::scaffold::drain_metrics(&collector, |s| &mut s.metrics, ts)
        }));
        Ok(Self {
            common,
            flush_in_progress: Arc::new(AtomicBool::new(false)),
        })
    }

    fn identity_of(rm: &ResourceMetrics) -> ProcessIdentity {
        let executable = rm
            .attr_str("process.executable.name")
            .or_else(|| rm.attr_str("process.name"))
            .map(str::to_owned);
        let pid = phoenix_pdata::attrs::get(&rm.resource.attributes, "process.pid")
            .and_then(|v| v.as_int());
        match (executable, pid) {
            (Some(executable), Some(pid)) => ProcessIdentity { executable, pid },
            (Some(executable), None) => ProcessIdentity { executable, pid: 0 },
            // Stable fallback for resources without process attributes.
            _ => ProcessIdentity {
                executable: format!("unknown-{:016x}", resource_hash(&rm.resource.attributes)),
                pid: 0,
            },
        }
    }

    // Offloads one snapshot write so the data path never blocks on disk.
    fn spawn_flush(&self, snapshot: Vec<(ProcessIdentity, CpuState)>, path: std::path::PathBuf) {
        if self.flush_in_progress.swap(true, Ordering::SeqCst) {
            debug!("cpu state flush already running, skipping this tick");
            return;
        }
        let in_progress = self.flush_in_progress.clone();
        let common = self.common.clone();
        let _ = std::thread::Builder::new()
            .name("cpu-state-flush".to_owned())
            .spawn(move || {
                if let Err(err) = StateStore::persist(&path, &snapshot) {
                    warn!(path = %path.display(), error = %err, "cpu state flush failed");
                    common.write().metrics.flush_failures.inc();
                }
                in_progress.store(false, Ordering::SeqCst);
            });
    }
}

impl MetricsProcessor for CpuHistogram {
    fn name(&self) -> &str {
        self.common.name()
    }

    fn consume(&self, batch: &mut MetricBatch, ctx: &BatchContext) -> Result<(), EngineError> {
        let mut guard = self.common.write();
        if !guard.config.enabled {
            return Ok(());
        }
        let state = &mut *guard;

        let mut accumulator =
            HistogramDataPoint::empty(ctx.time_unix_nano, state.config.explicit_bounds.clone())
                .map_err(|err| {
                    EngineError::processor(
                        CPU_HISTOGRAM_ID,
                        ProcessorErrorKind::Configuration,
                        err.to_string(),
                    )
                })?;

        for rm in &batch.resource_metrics {
            if state.config.topk_only && !rm.has_flag(ATTR_TOPK_INCLUDED) {
                continue;
            }
            let Some(dp) = rm
                .metric(CPU_TIME_METRIC)
                .and_then(|metric| metric.latest_number_point())
            else {
                continue;
            };
            let identity = Self::identity_of(rm);
            let cpu = dp.value.as_f64();
            let ts = dp.time_unix_nano;

            match state.store.get(&identity) {
                None => {
                    state.metrics.baselines_created.inc();
                }
                Some(prev) => {
                    let delta_cpu = cpu - prev.last_cpu_seconds;
                    let delta_t =
                        ts.saturating_sub(prev.last_time_unix_nano) as f64 / 1_000_000_000.0;
                    if delta_t <= 0.0 {
                        continue; // stale or replayed sample, keep the baseline
                    }
                    if delta_cpu < 0.0 {
                        state.metrics.regressions_dropped.inc();
                        debug!(process = %identity.encode(), "cumulative cpu regression, re-baselining");
                    } else {
                        let util_pct = delta_cpu / delta_t * 100.0;
                        accumulator.record(util_pct);
                        state.metrics.samples_recorded.inc();
                    }
                }
            }
            state.store.update(
                identity,
                CpuState {
                    last_cpu_seconds: cpu,
                    last_time_unix_nano: ts,
                },
            );
        }

        let evicted = state.store.evict_to(state.config.max_processes_in_memory);
        if evicted > 0 {
            state.metrics.states_evicted.add(evicted as u64);
        }
        state.metrics.states_in_memory.set(state.store.len() as u64);

        if accumulator.count > 0 {
            let metric = Metric {
                name: CPU_UTILIZATION_METRIC.to_owned(),
                description: "Per-interval CPU utilization distribution".to_owned(),
                unit: "%".to_owned(),
                data: MetricData::Histogram {
                    data_points: vec![accumulator],
                    temporality: Temporality::Delta,
                },
            };
            batch.resource_metrics.push(ResourceMetrics::new(
                vec![KeyValue::new("phoenix.source", CPU_HISTOGRAM_ID)],
                vec![metric],
            ));
        }

        // Timed flush, offloaded; the batch path only snapshots.
        let mut due_flush = None;
        if let Some(path) = state.config.state_path.clone() {
            if state.last_flush.elapsed() >= state.config.state_flush_interval {
                state.last_flush = Instant::now();
                due_flush = Some((state.store.snapshot(), path));
            }
        }
        drop(guard);
        if let Some((snapshot, path)) = due_flush {
            self.spawn_flush(snapshot, path);
        }
        Ok(())
    }

    fn shutdown(&self) -> Result<(), EngineError> {
        let state = self.common.read();
        if let Some(path) = state.config.state_path.clone() {
            let snapshot = state.store.snapshot();
            drop(state);
            StateStore::persist(&path, &snapshot).map_err(|err| {
                EngineError::processor(
                    CPU_HISTOGRAM_ID,
                    ProcessorErrorKind::Shutdown,
                    err.to_string(),
                )
            })?;
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
            "topk_only" => {
                let topk_only = patch_args::expect_bool(patch)?;
                if state.config.topk_only == topk_only {
                    return Ok(PatchOutcome::Duplicate);
                }
                state.config.topk_only = topk_only;
                Ok(PatchOutcome::Applied)
            }
            "max_processes_in_memory" => {
                let max = patch_args::expect_int_in(patch, 1, i64::MAX)? as usize;
                if state.config.max_processes_in_memory == max {
                    return Ok(PatchOutcome::Duplicate);
                }
                state.config.max_processes_in_memory = max;
                Ok(PatchOutcome::Applied)
            }
            _ => Err(patch_args::unknown(patch)),
        }
    }

    fn config_status(&self) -> ConfigStatus {
        let state = self.common.read();
        let mut parameters = std::collections::BTreeMap::new();
        let _ = parameters.insert(
            "topk_only".to_owned(),
            serde_json::Value::from(state.config.topk_only),
        );
        let _ = parameters.insert(
            "max_processes_in_memory".to_owned(),
            serde_json::Value::from(state.config.max_processes_in_memory as u64),
        );
        let _ = parameters.insert(
            "state_flush_interval_seconds".to_owned(),
            serde_json::Value::from(state.config.state_flush_interval.as_secs()),
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
    use phoenix_pdata::testing::process_resource;

    const SECOND: u64 = 1_000_000_000;

    fn converter(config: CpuHistogramConfig) -> CpuHistogram {
        CpuHistogram::new(&config, &MetricsRegistryHandle::new()).unwrap()
    }

    fn default_converter() -> CpuHistogram {
        converter(CpuHistogramConfig::default())
    }

    fn histogram_of(batch: &MetricBatch) -> Option<&HistogramDataPoint> {
        batch
            .resource_metrics
            .iter()
            .flat_map(|rm| rm.metrics())
            .find(|m| m.name == CPU_UTILIZATION_METRIC)
            .and_then(|m| match &m.data {
                MetricData::Histogram { data_points, .. } => data_points.first(),
                _ => None,
            })
    }

    // Scenario: first batch cpu=10s at T (baseline only), second batch
    // cpu=15s at T+10s => 50% utilization, counted in the bucket holding 50.
    #[test]
    fn baseline_then_fifty_percent_sample() {
        let cv = default_converter();

        let mut first = MetricBatch::new(vec![process_resource("svc", 1, 10.0, SECOND)]);
        cv.consume(&mut first, &BatchContext::now()).unwrap();
        assert!(histogram_of(&first).is_none(), "baseline must not emit");

        let mut second = MetricBatch::new(vec![process_resource("svc", 1, 15.0, 11 * SECOND)]);
        cv.consume(&mut second, &BatchContext::now()).unwrap();
        let hist = histogram_of(&second).expect("histogram missing");
        assert_eq!(hist.count, 1);
        assert!((hist.sum - 50.0).abs() < 1e-9);

        // Bounds 5,10,25,50,75,... place 50.0 in the bucket with bound 50.
        let bucket_idx = hist
            .explicit_bounds
            .iter()
            .position(|b| 50.0 <= *b)
            .unwrap();
        assert_eq!(hist.bucket_counts[bucket_idx], 1);
    }

    #[test]
    fn regression_drops_the_sample_and_rebaselines() {
        let cv = default_converter();
        let mut b1 = MetricBatch::new(vec![process_resource("svc", 1, 100.0, SECOND)]);
        cv.consume(&mut b1, &BatchContext::now()).unwrap();
        // Process restarted: counter reset below the baseline.
        let mut b2 = MetricBatch::new(vec![process_resource("svc", 1, 2.0, 2 * SECOND)]);
        cv.consume(&mut b2, &BatchContext::now()).unwrap();
        assert!(histogram_of(&b2).is_none());

        // Next reading measures from the new baseline: (4-2)/2 = 100%.
        let mut b3 = MetricBatch::new(vec![process_resource("svc", 1, 4.0, 4 * SECOND)]);
        cv.consume(&mut b3, &BatchContext::now()).unwrap();
        let hist = histogram_of(&b3).unwrap();
        assert_eq!(hist.count, 1);
        assert!((hist.sum - 100.0).abs() < 1e-9);
        assert!(hist.sum >= 0.0);
    }

    #[test]
    fn stale_timestamps_are_ignored() {
        let cv = default_converter();
        let mut b1 = MetricBatch::new(vec![process_resource("svc", 1, 10.0, 5 * SECOND)]);
        cv.consume(&mut b1, &BatchContext::now()).unwrap();
        let mut b2 = MetricBatch::new(vec![process_resource("svc", 1, 11.0, 5 * SECOND)]);
        cv.consume(&mut b2, &BatchContext::now()).unwrap();
        assert!(histogram_of(&b2).is_none());
    }

    #[test]
    fn topk_only_skips_untagged_processes() {
        let cv = converter(CpuHistogramConfig {
            topk_only: true,
            ..CpuHistogramConfig::default()
        });
        let mut b1 = MetricBatch::new(vec![process_resource("svc", 1, 10.0, SECOND)]);
        cv.consume(&mut b1, &BatchContext::now()).unwrap();
        let mut b2 = MetricBatch::new(vec![process_resource("svc", 1, 15.0, 11 * SECOND)]);
        cv.consume(&mut b2, &BatchContext::now()).unwrap();
        // Never tagged: not even a baseline exists.
        assert!(histogram_of(&b2).is_none());
        assert!(cv.common.read().store.is_empty());
    }

    #[test]
    fn lru_bound_is_enforced() {
        let cv = converter(CpuHistogramConfig {
            max_processes_in_memory: 3,
            ..CpuHistogramConfig::default()
        });
        let resources = (0..10)
            .map(|i| process_resource(&format!("p{i}"), i, 1.0, (i as u64 + 1) * SECOND))
            .collect();
        let mut batch = MetricBatch::new(resources);
        cv.consume(&mut batch, &BatchContext::now()).unwrap();
        assert_eq!(cv.common.read().store.len(), 3);
    }

    #[test]
    fn state_survives_restart_via_the_state_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cpu.jsonl");
        let config = CpuHistogramConfig {
            state_path: Some(path.clone()),
            ..CpuHistogramConfig::default()
        };

        let cv = converter(config.clone());
        let mut b1 = MetricBatch::new(vec![process_resource("svc", 1, 10.0, SECOND)]);
        cv.consume(&mut b1, &BatchContext::now()).unwrap();
        cv.shutdown().unwrap();

        // A fresh instance picks the baseline up from disk.
        let cv2 = converter(config);
        let mut b2 = MetricBatch::new(vec![process_resource("svc", 1, 15.0, 11 * SECOND)]);
        cv2.consume(&mut b2, &BatchContext::now()).unwrap();
        let hist = histogram_of(&b2).expect("persisted baseline not used");
        assert!((hist.sum - 50.0).abs() < 1e-9);
    }

    #[test]
    fn fallback_identity_is_stable() {
        let rm = ResourceMetrics::new(vec![KeyValue::new("host.name", "a")], vec![]);
        let first = CpuHistogram::identity_of(&rm);
        let second = CpuHistogram::identity_of(&rm);
        assert_eq!(first, second);
        assert!(first.executable.starts_with("unknown-"));
    }
}

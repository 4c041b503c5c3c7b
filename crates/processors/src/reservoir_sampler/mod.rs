// SPDX-License-Identifier: Apache-2.0

//! Priority-weighted reservoir sampler (Algorithm A-Res).
//!
//! Per batch, each non-critical resource draws a key `u^(1/w)` where `u` is
//! uniform in (0, 1) and `w` is its priority rank plus a small noise term;
//! the `reservoir_size` largest keys survive. Resources tagged `critical`
//! bypass the reservoir entirely, as do the pipeline's own telemetry
//! resources (dropping those would sever the control loop).
//!
//! With `auto_resize` on, an internal PID nudges `reservoir_size` toward a
//! target fill fraction of the observed population, clamped to
//! `[min_size, max_size]`.

mod metrics;

pub use metrics::ReservoirSamplerMetrics;

use crate::identity::resource_hash;
use crate::{ATTR_PRIORITY, ATTR_ROLLUP};
use phoenix_config::{PriorityClass, ReservoirSamplerConfig};
use phoenix_control::{ConfigPatch, PidController, PidGains};
use phoenix_engine::processor::patch_args;
use phoenix_engine::{
    BatchContext, ConfigStatus, EngineError, MetricsProcessor, PatchError, PatchOutcome,
    ProcessorCommon,
};
use phoenix_pdata::{MetricBatch, SELF_RESOURCE_ATTR};
use phoenix_telemetry::MetricsRegistryHandle;
use phoenix_telemetry::metrics::MetricSet;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Registered processor id.
pub const RESERVOIR_SAMPLER_ID: &str = "reservoir_sampler";

struct State {
    config: ReservoirSamplerConfig,
    resize_pid: PidController,
    metrics: MetricSet<ReservoirSamplerMetrics>,
}

/// The reservoir sampler processor.
pub struct ReservoirSampler {
    common: Arc<ProcessorCommon<State>>,
}

impl ReservoirSampler {
    /// Builds the sampler from its policy table.
    pub fn new(config: &ReservoirSamplerConfig, registry: &MetricsRegistryHandle) -> Self {
        let mut resize_pid = PidController::new(
            PidGains {
                kp: 0.5,
                ki: 0.1,
                kd: 0.0,
            },
            config.target_fill_fraction,
        );
        // The resize step is a fraction of the allowed span per batch.
        let _ = resize_pid.set_output_limits(-1.0, 1.0);
        let _ = resize_pid.set_anti_windup(true, 1.0);

        let common = Arc::new(ProcessorCommon::new(
            RESERVOIR_SAMPLER_ID,
            State {
                config: config.clone(),
                resize_pid,
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

fn priority_rank(class: Option<&str>) -> f64 {
    match class {
        Some("critical") => f64::from(PriorityClass::Critical.rank()),
        Some("high") => f64::from(PriorityClass::High.rank()),
        Some("medium") => f64::from(PriorityClass::Medium.rank()),
        _ => f64::from(PriorityClass::Low.rank()),
    }
}

impl MetricsProcessor for ReservoirSampler {
    fn name(&self) -> &str {
        self.common.name()
    }

    fn consume(&self, batch: &mut MetricBatch, _ctx: &BatchContext) -> Result<(), EngineError> {
        let mut state = self.common.write();
        if !state.config.enabled {
            return Ok(());
        }
        let state = &mut *state;

        // Pass 1: classify resources, deduplicate identities, draw A-Res keys.
        let mut seen_identities: HashSet<u64> = HashSet::new();
        let mut keep_always: HashSet<usize> = HashSet::new();
        let mut candidates: Vec<(usize, f64)> = Vec::new();
        let mut duplicates = 0u64;
        let mut observed = 0usize;

        for (idx, rm) in batch.resource_metrics.iter().enumerate() {
            if rm.has_flag(SELF_RESOURCE_ATTR) || rm.has_flag(ATTR_ROLLUP) {
                let _ = keep_always.insert(idx);
                continue;
            }
            if !seen_identities.insert(resource_hash(&rm.resource.attributes)) {
                duplicates += 1;
                continue;
            }
            observed += 1;
            let class = rm.attr_str(ATTR_PRIORITY);
            if class == Some("critical") {
                let _ = keep_always.insert(idx);
                state.metrics.critical_bypassed.inc();
                continue;
            }
            let weight = priority_rank(class) + rand::random::<f64>() * 1e-3;
            let u: f64 = rand::random::<f64>().max(f64::MIN_POSITIVE);
            let key = u.powf(1.0 / weight);
            candidates.push((idx, key));
        }

        // Pass 2: keep the reservoir_size largest keys.
        let size = state.config.reservoir_size;
        candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        let sampled: HashSet<usize> = candidates.iter().take(size).map(|(idx, _)| *idx).collect();

        let mut dropped = 0u64;
        let mut index = 0usize;
        batch.resource_metrics.retain(|_| {
            let keep = keep_always.contains(&index) || sampled.contains(&index);
            if !keep {
                dropped += 1;
            }
            index += 1;
            keep
        });

        state.metrics.sampled.add(sampled.len() as u64);
        state.metrics.dropped.add(dropped);
        state.metrics.duplicates_removed.add(duplicates);

        // Optional PID-driven resize toward the target fill fraction.
        if state.config.auto_resize && observed > 0 {
            let fill = (size as f64 / observed as f64).min(1.0);
            let output = state.resize_pid.compute(fill, 1.0);
            let span = (state.config.max_size - state.config.min_size) as f64;
            let step = (output * span * 0.1).round() as i64;
            if step != 0 {
                let resized = (size as i64 + step)
                    .clamp(state.config.min_size as i64, state.config.max_size as i64)
                    as usize;
                if resized != size {
                    debug!(from = size, to = resized, "reservoir auto-resized");
                    state.config.reservoir_size = resized;
                }
            }
        }
        state
            .metrics
            .reservoir_size
            .set(state.config.reservoir_size as u64);
        Ok(())
    }

    fn apply_patch(&self, patch: &ConfigPatch) -> Result<PatchOutcome, PatchError> {
        let mut state = self.common.write();
        match patch.parameter_path.as_str() {
            "reservoir_size" => {
                let (min, max) = (state.config.min_size, state.config.max_size);
                let size =
                    patch_args::expect_int_in(patch, min as i64, max as i64)? as usize;
                if state.config.reservoir_size == size {
                    return Ok(PatchOutcome::Duplicate);
                }
                state.config.reservoir_size = size;
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
            "reservoir_size".to_owned(),
            serde_json::Value::from(state.config.reservoir_size as u64),
        );
        let _ = parameters.insert(
            "min_size".to_owned(),
            serde_json::Value::from(state.config.min_size as u64),
        );
        let _ = parameters.insert(
            "max_size".to_owned(),
            serde_json::Value::from(state.config.max_size as u64),
        );
        let _ = parameters.insert(
            "auto_resize".to_owned(),
            serde_json::Value::from(state.config.auto_resize),
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

    fn sampler(size: usize, min: usize, max: usize) -> ReservoirSampler {
        ReservoirSampler::new(
            &ReservoirSamplerConfig {
                enabled: true,
                reservoir_size: size,
                min_size: min,
                max_size: max,
                auto_resize: false,
                target_fill_fraction: 0.5,
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
    fn output_is_bounded_by_reservoir_size() {
        let sampler = sampler(10, 1, 100);
        let mut batch = batch_of(50);
        sampler.consume(&mut batch, &BatchContext::now()).unwrap();
        assert_eq!(batch.resource_metrics.len(), 10);
    }

    #[test]
    fn small_batches_pass_through_whole() {
        let sampler = sampler(10, 1, 100);
        let mut batch = batch_of(4);
        sampler.consume(&mut batch, &BatchContext::now()).unwrap();
        assert_eq!(batch.resource_metrics.len(), 4);
    }

    #[test]
    fn critical_resources_always_survive() {
        let sampler = sampler(5, 1, 100);
        let mut batch = batch_of(40);
        for rm in batch.resource_metrics.iter_mut().take(8) {
            rm.set_attr(ATTR_PRIORITY, "critical");
        }
        sampler.consume(&mut batch, &BatchContext::now()).unwrap();

        let critical_kept = batch
            .resource_metrics
            .iter()
            .filter(|rm| rm.attr_str(ATTR_PRIORITY) == Some("critical"))
            .count();
        assert_eq!(critical_kept, 8);
        // 8 critical bypasses + 5 sampled.
        assert_eq!(batch.resource_metrics.len(), 13);
    }

    #[test]
    fn duplicate_identities_are_removed() {
        let sampler = sampler(50, 1, 100);
        let mut batch = batch_of(3);
        let dup = batch.resource_metrics[0].clone();
        batch.resource_metrics.push(dup);
        sampler.consume(&mut batch, &BatchContext::now()).unwrap();

        assert_eq!(batch.resource_metrics.len(), 3);
        let state = sampler.common.read();
        assert_eq!(state.metrics.duplicates_removed.get(), 1);
    }

    #[test]
    fn size_patch_respects_bounds() {
        let sampler = sampler(10, 5, 20);
        let patch = |v: i64| {
            ConfigPatch::new(
                RESERVOIR_SAMPLER_ID,
                "reservoir_size",
                PatchValue::Int(v),
                Severity::Normal,
                "test",
                0,
                Duration::from_secs(60),
            )
        };
        assert!(matches!(
            sampler.apply_patch(&patch(4)),
            Err(PatchError::OutOfRange { .. })
        ));
        assert!(matches!(
            sampler.apply_patch(&patch(21)),
            Err(PatchError::OutOfRange { .. })
        ));
        assert_eq!(sampler.apply_patch(&patch(15)).unwrap(), PatchOutcome::Applied);
    }

    #[test]
    fn auto_resize_moves_toward_target_fill() {
        let sampler = ReservoirSampler::new(
            &ReservoirSamplerConfig {
                enabled: true,
                reservoir_size: 10,
                min_size: 5,
                max_size: 200,
                auto_resize: true,
                target_fill_fraction: 0.5,
            },
            &MetricsRegistryHandle::new(),
        );
        // 100 observed, size 10: fill 0.1 well below target; size must grow.
        for _ in 0..5 {
            let mut batch = batch_of(100);
            sampler.consume(&mut batch, &BatchContext::now()).unwrap();
        }
        let size = sampler.config_status().parameters["reservoir_size"]
            .as_u64()
            .unwrap();
        assert!(size > 10, "size {size} did not grow");
        assert!(size <= 200);
    }
}

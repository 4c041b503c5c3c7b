// SPDX-License-Identifier: Apache-2.0

//! Adaptive PID decider: turns KPI error into configuration patches.
//!
//! Each configured controller binds a KPI metric to one or more output
//! patch templates. Per batch, a controller reads the latest value of its
//! KPI (missing metric: the tick is skipped and the integral does not
//! grow), runs the PID primitive over the elapsed time since its previous
//! tick, and materializes one patch per template:
//! `new_value = clamp(output * change_scale_factor, min, max)`. Patches
//! replace the targeted parameter. Severity turns urgent when the raw
//! output reaches 80% of the controller's output range.
//!
//! Emitted patches travel inside the batch, encoded as
//! `ctrl_proposed_patch` metrics; the patch tap at the end of the pipeline
//! forwards them to governance.

mod metrics;

pub use metrics::PidDeciderMetrics;

use phoenix_config::{ControllerConfig, PatchValueKind, PidDeciderConfig};
use phoenix_control::{
    ConfigPatch, PatchValue, PidController, PidGains, Severity, encode_patch,
};
use phoenix_engine::processor::patch_args;
use phoenix_engine::{
    BatchContext, ConfigStatus, EngineError, MetricsProcessor, PatchError, PatchOutcome,
    ProcessorCommon, ProcessorErrorKind,
};
use phoenix_pdata::MetricBatch;
use phoenix_telemetry::MetricsRegistryHandle;
use phoenix_telemetry::metrics::MetricSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Registered processor id.
pub const PID_DECIDER_ID: &str = "pid_decider";

/// Raw-output fraction of the output range at which a patch turns urgent.
const URGENT_OUTPUT_FRACTION: f64 = 0.8;

struct ControllerRuntime {
    config: ControllerConfig,
    pid: PidController,
    last_tick: Option<Instant>,
}

impl ControllerRuntime {
    fn new(config: ControllerConfig) -> Self {
        let mut pid = PidController::new(
            PidGains {
                kp: config.gains.kp,
                ki: config.gains.ki,
                kd: config.gains.kd,
            },
            config.kpi_target_value,
        );
        // Bounds come pre-validated from the policy schema.
        let _ = pid.set_output_limits(config.output_min, config.output_max);
        let _ = pid.set_anti_windup(true, 1.0);
        Self {
            config,
            pid,
            last_tick: None,
        }
    }
}

struct State {
    enabled: bool,
    default_interval_secs: f64,
    patch_ttl: std::time::Duration,
    controllers: Vec<ControllerRuntime>,
    metrics: MetricSet<PidDeciderMetrics>,
}

/// The adaptive PID decider.
pub struct PidDecider {
    common: Arc<ProcessorCommon<State>>,
}

impl PidDecider {
    /// Builds the decider from its policy section.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the section fails validation.
    pub fn new(
        config: &PidDeciderConfig,
        registry: &MetricsRegistryHandle,
    ) -> Result<Self, EngineError> {
        let errors = config.validation_errors("pid_decider_config");
        if !errors.is_empty() {
            return Err(EngineError::processor(
                PID_DECIDER_ID,
                ProcessorErrorKind::Configuration,
                errors.join("; "),
            ));
        }
        let controllers = config
            .controllers
            .iter()
            .cloned()
            .map(ControllerRuntime::new)
            .collect();
        let common = Arc::new(ProcessorCommon::new(
            PID_DECIDER_ID,
            State {
                enabled: config.enabled,
                default_interval_secs: config.default_interval.as_secs_f64(),
                patch_ttl: config.patch_ttl,
                controllers,
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

fn template_value(raw: f64, kind: PatchValueKind) -> PatchValue {
    match kind {
        PatchValueKind::Int => PatchValue::Int(raw.round() as i64),
        PatchValueKind::Double => PatchValue::Double(raw),
    }
}

impl MetricsProcessor for PidDecider {
    fn name(&self) -> &str {
        self.common.name()
    }

    fn consume(&self, batch: &mut MetricBatch, ctx: &BatchContext) -> Result<(), EngineError> {
        let mut state = self.common.write();
        if !state.enabled {
            return Ok(());
        }
        let state = &mut *state;
        let now = Instant::now();
        let mut emitted: Vec<ConfigPatch> = Vec::new();

        for controller in &mut state.controllers {
            if !controller.config.enabled {
                continue;
            }
            let Some((measurement, _kpi_ts)) =
                batch.latest_value(&controller.config.kpi_metric_name)
            else {
                state.metrics.ticks_skipped_missing_kpi.inc();
                continue;
            };

            let setpoint = controller.config.kpi_target_value;
            let dead_band = controller.config.hysteresis_percent * setpoint.abs();
            if (measurement - setpoint).abs() <= dead_band && dead_band > 0.0 {
                state.metrics.ticks_in_dead_band.inc();
                controller.last_tick = Some(now);
                continue;
            }

            let dt = controller
                .last_tick
                .map_or(state.default_interval_secs, |last| {
                    now.duration_since(last).as_secs_f64()
                });
            controller.last_tick = Some(now);

            let output = controller.pid.compute(measurement, dt);
            if controller.pid.clamped_low() || controller.pid.clamped_high() {
                state.metrics.output_clamped.inc();
            }

            let range = controller
                .config
                .output_max
                .abs()
                .max(controller.config.output_min.abs());
            let severity = if range > 0.0 && output.abs() / range >= URGENT_OUTPUT_FRACTION {
                Severity::Urgent
            } else {
                Severity::Normal
            };

            for template in &controller.config.outputs {
                let scaled = (output * template.change_scale_factor)
                    .clamp(template.min_value, template.max_value);
                let patch = ConfigPatch::new(
                    template.target_processor.clone(),
                    template.parameter_path.clone(),
                    template_value(scaled, template.value_kind),
                    severity,
                    controller.config.name.clone(),
                    ctx.time_unix_nano,
                    state.patch_ttl,
                )
                .with_reason(format!(
                    "kpi {}={measurement:.4} target={setpoint}",
                    controller.config.kpi_metric_name
                ));
                debug!(
                    controller = %controller.config.name,
                    target = %patch.target_processor_id,
                    path = %patch.parameter_path,
                    value = %patch.new_value,
                    %severity,
                    "patch proposed"
                );
                emitted.push(patch);
            }
        }

        for patch in &emitted {
            batch.push_self_metric(encode_patch(patch));
            state.metrics.patches_emitted.inc();
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
            _ => Err(patch_args::unknown(patch)),
        }
    }

    fn config_status(&self) -> ConfigStatus {
        let state = self.common.read();
        let mut parameters = std::collections::BTreeMap::new();
        let _ = parameters.insert(
            "controllers".to_owned(),
            serde_json::Value::from(
                state
                    .controllers
                    .iter()
                    .map(|c| c.config.name.clone())
                    .collect::<Vec<_>>(),
            ),
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
    use phoenix_config::{OutputPatchTemplate, PidGainsConfig};
    use phoenix_control::decode_patches;
    use phoenix_pdata::testing::kpi_batch;
    use std::time::Duration;

    fn coverage_controller(hysteresis_percent: f64) -> ControllerConfig {
        ControllerConfig {
            name: "topk-coverage".to_owned(),
            enabled: true,
            kpi_metric_name: "phoenix.topk.coverage".to_owned(),
            kpi_target_value: 0.9,
            gains: PidGainsConfig {
                kp: 1.0,
                ki: 0.0,
                kd: 0.0,
            },
            output_min: -1.0,
            output_max: 1.0,
            hysteresis_percent,
            outputs: vec![OutputPatchTemplate {
                target_processor: "adaptive_topk".to_owned(),
                parameter_path: "k_value".to_owned(),
                change_scale_factor: 100.0,
                min_value: 10.0,
                max_value: 60.0,
                value_kind: PatchValueKind::Int,
            }],
        }
    }

    fn decider(controllers: Vec<ControllerConfig>) -> PidDecider {
        PidDecider::new(
            &PidDeciderConfig {
                enabled: true,
                default_interval: Duration::from_secs(10),
                patch_ttl: Duration::from_secs(60),
                controllers,
            },
            &MetricsRegistryHandle::new(),
        )
        .unwrap()
    }

    fn emitted_patches(batch: &MetricBatch) -> Vec<ConfigPatch> {
        batch
            .resource_metrics
            .iter()
            .flat_map(|rm| rm.metrics())
            .flat_map(|m| decode_patches(m).0)
            .collect()
    }

    // Scenario: kp=1, setpoint 0.9, coverage 0.7 -> output 0.2; with
    // change_scale_factor 100 and clamp [10, 60] the patch carries 20,
    // severity normal.
    #[test]
    fn coverage_error_drives_k_upward() {
        let decider = decider(vec![coverage_controller(0.0)]);
        let mut batch = kpi_batch("phoenix.topk.coverage", 0.7, 1);
        decider.consume(&mut batch, &BatchContext::now()).unwrap();

        let patches = emitted_patches(&batch);
        assert_eq!(patches.len(), 1);
        let patch = &patches[0];
        assert_eq!(patch.target_processor_id, "adaptive_topk");
        assert_eq!(patch.parameter_path, "k_value");
        assert_eq!(patch.new_value, PatchValue::Int(20));
        assert_eq!(patch.severity, Severity::Normal);
        assert_eq!(patch.source, "topk-coverage");
    }

    #[test]
    fn missing_kpi_skips_the_tick_without_integral_growth() {
        let mut config = coverage_controller(0.0);
        config.gains = PidGainsConfig {
            kp: 0.0,
            ki: 1.0,
            kd: 0.0,
        };
        let decider = decider(vec![config]);

        let mut empty = MetricBatch::default();
        decider.consume(&mut empty, &BatchContext::now()).unwrap();
        assert!(emitted_patches(&empty).is_empty());
        {
            let state = decider.common.read();
            assert_eq!(state.metrics.ticks_skipped_missing_kpi.get(), 1);
            assert_eq!(state.controllers[0].pid.integral(), 0.0);
        }
    }

    #[test]
    fn dead_band_suppresses_emission() {
        // 10% hysteresis around 0.9 tolerates measurements within 0.09.
        let decider = decider(vec![coverage_controller(0.1)]);
        let mut batch = kpi_batch("phoenix.topk.coverage", 0.85, 1);
        decider.consume(&mut batch, &BatchContext::now()).unwrap();
        assert!(emitted_patches(&batch).is_empty());

        let mut far = kpi_batch("phoenix.topk.coverage", 0.5, 2);
        decider.consume(&mut far, &BatchContext::now()).unwrap();
        assert_eq!(emitted_patches(&far).len(), 1);
    }

    #[test]
    fn saturated_output_is_urgent_and_counted() {
        let mut config = coverage_controller(0.0);
        config.gains = PidGainsConfig {
            kp: 50.0,
            ki: 0.0,
            kd: 0.0,
        };
        let decider = decider(vec![config]);
        // Error 0.8 * kp 50 = 40, clamped to 1.0: urgent territory.
        let mut batch = kpi_batch("phoenix.topk.coverage", 0.1, 1);
        decider.consume(&mut batch, &BatchContext::now()).unwrap();

        let patches = emitted_patches(&batch);
        assert_eq!(patches[0].severity, Severity::Urgent);
        assert_eq!(decider.common.read().metrics.output_clamped.get(), 1);
    }

    #[test]
    fn disabled_controllers_do_not_tick() {
        let mut config = coverage_controller(0.0);
        config.enabled = false;
        let decider = decider(vec![config]);
        let mut batch = kpi_batch("phoenix.topk.coverage", 0.1, 1);
        decider.consume(&mut batch, &BatchContext::now()).unwrap();
        assert!(emitted_patches(&batch).is_empty());
    }

    #[test]
    fn multiple_templates_emit_multiple_patches() {
        let mut config = coverage_controller(0.0);
        config.outputs.push(OutputPatchTemplate {
            target_processor: "reservoir_sampler".to_owned(),
            parameter_path: "reservoir_size".to_owned(),
            change_scale_factor: 500.0,
            min_value: 10.0,
            max_value: 1000.0,
            value_kind: PatchValueKind::Int,
        });
        let decider = decider(vec![config]);
        let mut batch = kpi_batch("phoenix.topk.coverage", 0.7, 1);
        decider.consume(&mut batch, &BatchContext::now()).unwrap();

        let patches = emitted_patches(&batch);
        assert_eq!(patches.len(), 2);
        assert_eq!(patches[1].new_value, PatchValue::Int(100));
    }
}

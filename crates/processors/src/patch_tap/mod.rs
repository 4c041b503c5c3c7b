// SPDX-License-Identifier: Apache-2.0

//! Patch tap: the receiving end of the patch side channel.
//!
//! Drains every `ctrl_proposed_patch` metric out of the batch (encoded
//! patches never reach exporters), reconstructs [`ConfigPatch`]es and hands
//! them to the registered [`PatchSink`]. Decode failures are logged and
//! counted, never fatal; the sink additionally learns about them so
//! governance can account them as type rejections. Ordering from a single
//! producer is preserved.

mod metrics;

pub use metrics::PatchTapMetrics;

use phoenix_control::{CodecError, ConfigPatch, PATCH_METRIC_NAME, decode_patch_point};
use phoenix_engine::processor::patch_args;
use phoenix_engine::{
    BatchContext, ConfigStatus, EngineError, MetricsProcessor, PatchError, PatchOutcome,
    ProcessorCommon,
};
use phoenix_pdata::{MetricBatch, MetricData};
use phoenix_telemetry::MetricsRegistryHandle;
use phoenix_telemetry::metrics::MetricSet;
use std::sync::Arc;
use tracing::warn;

/// Registered processor id.
pub const PATCH_TAP_ID: &str = "patch_tap";

/// Consumer of decoded patches (governance, in production wiring).
pub trait PatchSink: Send + Sync {
    /// Receives one decoded patch.
    fn submit(&self, patch: ConfigPatch);

    /// Observes one decode failure.
    fn decode_failure(&self, error: &CodecError) {
        let _ = error;
    }
}

struct State {
    enabled: bool,
    metrics: MetricSet<PatchTapMetrics>,
}

/// The patch tap processor.
pub struct PatchTap {
    common: Arc<ProcessorCommon<State>>,
    sink: Arc<dyn PatchSink>,
}

impl PatchTap {
    /// Builds the tap around a patch sink.
    pub fn new(sink: Arc<dyn PatchSink>, registry: &MetricsRegistryHandle) -> Self {
        let common = Arc::new(ProcessorCommon::new(
            PATCH_TAP_ID,
            State {
                enabled: true,
                metrics: MetricSet::new(),
            },
        ));
        let collector = common.clone();
        registry.register(Box::new(move |ts| {
            phoenix_engine::scaffold::drain_metrics(&collector, |s| &mut s.metrics, ts)
        }));
        Self { common, sink }
    }
}

impl MetricsProcessor for PatchTap {
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
            for sm in &mut rm.scope_metrics {
                let mut drained = Vec::new();
                sm.metrics.retain(|metric| {
                    if metric.name == PATCH_METRIC_NAME {
                        drained.push(metric.clone());
                        false
                    } else {
                        true
                    }
                });
                for metric in drained {
                    let MetricData::Gauge { data_points } = &metric.data else {
                        continue;
                    };
                    for point in data_points {
                        match decode_patch_point(point) {
                            Ok(patch) => {
                                state.metrics.patches_forwarded.inc();
                                self.sink.submit(patch);
                            }
                            Err(err) => {
                                warn!(error = %err, "undecodable patch metric dropped");
                                state.metrics.decode_failures.inc();
                                self.sink.decode_failure(&err);
                            }
                        }
                    }
                }
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
            _ => Err(patch_args::unknown(patch)),
        }
    }

    fn config_status(&self) -> ConfigStatus {
        let state = self.common.read();
        ConfigStatus {
            parameters: std::collections::BTreeMap::new(),
            enabled: state.enabled,
        }
    }
}

// SPDX-License-Identifier: Apache-2.0

//! The batch pipeline: ordered processors plus the self-metric emitter.
//!
//! Failure semantics: a processor error is recovered locally and the batch
//! continues downstream, except structural faults, which drop the batch,
//! bump `phoenix.pipeline.batches_dropped` and notify the registered
//! [`FaultListener`] (governance treats those as internal-consistency
//! violations).

use crate::error::{EngineError, ProcessorErrorKind};
use crate::processor::{BatchContext, MetricsProcessor};
use crate::time::now_unix_nano;
use parking_lot::Mutex;
use phoenix_pdata::MetricBatch;
use phoenix_telemetry::MetricsRegistryHandle;
use phoenix_telemetry::instrument::Counter;
use phoenix_telemetry::metrics::MetricSet;
use phoenix_telemetry::render::render_metric_set;
use phoenix_telemetry_macros::metric_set;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Sink for internal-consistency violations detected on the data path.
pub trait FaultListener: Send + Sync {
    /// Called when a processor reports a structural fault.
    fn structural_fault(&self, processor: &str, detail: &str);
}

/// Pipeline-level self-metrics.
#[metric_set(name = "phoenix.pipeline")]
#[derive(Debug, Default, Clone)]
pub struct PipelineMetrics {
    /// Batches accepted from upstream.
    #[metric(unit = "{batch}")]
    pub batches_consumed: Counter<u64>,

    /// Batches dropped due to structural faults.
    #[metric(unit = "{batch}")]
    pub batches_dropped: Counter<u64>,

    /// Recovered processor errors.
    #[metric(unit = "{error}")]
    pub processor_errors: Counter<u64>,
}

/// Builder for [`Pipeline`].
#[derive(Default)]
pub struct PipelineBuilder {
    processors: Vec<Arc<dyn MetricsProcessor>>,
    registry: Option<MetricsRegistryHandle>,
    fault_listener: Option<Arc<dyn FaultListener>>,
    emit_every: usize,
}

impl PipelineBuilder {
    /// Appends a processor to the execution order.
    #[must_use]
    pub fn with_processor(mut self, processor: Arc<dyn MetricsProcessor>) -> Self {
        self.processors.push(processor);
        self
    }

    /// Uses the given telemetry registry for the emitter.
    #[must_use]
    pub fn with_registry(mut self, registry: MetricsRegistryHandle) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Registers the structural-fault listener.
    #[must_use]
    pub fn with_fault_listener(mut self, listener: Arc<dyn FaultListener>) -> Self {
        self.fault_listener = Some(listener);
        self
    }

    /// Emits self-metrics every `n` batches (default: every batch).
    #[must_use]
    pub fn emit_every(mut self, n: usize) -> Self {
        self.emit_every = n;
        self
    }

    /// Finalizes the pipeline and registers its own metric collector.
    #[must_use]
    pub fn build(self) -> Pipeline {
        let registry = self.registry.unwrap_or_default();
        let metrics: Arc<Mutex<MetricSet<PipelineMetrics>>> =
            Arc::new(Mutex::new(MetricSet::new()));
        let collector_metrics = metrics.clone();
        registry.register(Box::new(move |ts| {
            render_metric_set(&mut collector_metrics.lock(), ts)
        }));
        Pipeline {
            processors: self.processors,
            registry,
            metrics,
            fault_listener: self.fault_listener,
            emit_every: self.emit_every.max(1),
            batches_since_emit: Mutex::new(0),
        }
    }
}

/// Ordered processors pulling batches from an inbound channel.
pub struct Pipeline {
    processors: Vec<Arc<dyn MetricsProcessor>>,
    registry: MetricsRegistryHandle,
    metrics: Arc<Mutex<MetricSet<PipelineMetrics>>>,
    fault_listener: Option<Arc<dyn FaultListener>>,
    emit_every: usize,
    batches_since_emit: Mutex<usize>,
}

impl Pipeline {
    /// Starts building a pipeline.
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// The processors, in execution order.
    #[must_use]
    pub fn processors(&self) -> &[Arc<dyn MetricsProcessor>] {
        &self.processors
    }

    /// The telemetry registry backing the emitter.
    #[must_use]
    pub fn registry(&self) -> MetricsRegistryHandle {
        self.registry.clone()
    }

    /// Starts every processor in pipeline order.
    ///
    /// # Errors
    ///
    /// Returns the first processor start failure; the data path is then
    /// unavailable.
    pub fn start(&self) -> Result<(), EngineError> {
        for processor in &self.processors {
            processor.start()?;
            debug!(processor = processor.name(), "processor started");
        }
        Ok(())
    }

    /// Shuts down every processor in reverse order, keeping the first error.
    ///
    /// # Errors
    ///
    /// Returns the first shutdown failure after attempting all processors.
    pub fn shutdown(&self) -> Result<(), EngineError> {
        let mut first_error = None;
        for processor in self.processors.iter().rev() {
            if let Err(err) = processor.shutdown() {
                warn!(processor = processor.name(), error = %err, "shutdown failed");
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Runs one batch through the pipeline.
    ///
    /// Returns `true` when the batch should continue downstream, `false`
    /// when a structural fault dropped it.
    pub fn process(&self, batch: &mut MetricBatch) -> bool {
        let ctx = BatchContext::now();
        for processor in &self.processors {
            if let Err(err) = processor.consume(batch, &ctx) {
                if err.kind() == Some(ProcessorErrorKind::Structural) {
                    warn!(processor = processor.name(), error = %err, "batch dropped");
                    self.metrics.lock().batches_dropped.inc();
                    if let Some(listener) = &self.fault_listener {
                        listener.structural_fault(processor.name(), &err.to_string());
                    }
                    return false;
                }
                warn!(processor = processor.name(), error = %err, "processor error recovered");
                self.metrics.lock().processor_errors.inc();
            }
        }
        self.metrics.lock().batches_consumed.inc();
        self.maybe_emit(batch, ctx.time_unix_nano);
        true
    }

    /// Runs the pipeline until the inbound channel closes or `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ChannelClosed`] when the outbound side goes
    /// away while batches are still flowing.
    pub async fn run(
        &self,
        mut inbound: mpsc::Receiver<MetricBatch>,
        outbound: mpsc::Sender<MetricBatch>,
        cancel: CancellationToken,
    ) -> Result<(), EngineError> {
        loop {
            let batch = tokio::select! {
                () = cancel.cancelled() => {
                    info!("pipeline cancelled");
                    return Ok(());
                }
                batch = inbound.recv() => batch,
            };
            let Some(mut batch) = batch else {
                info!("inbound channel closed, pipeline draining");
                return Ok(());
            };
            if self.process(&mut batch) && outbound.send(batch).await.is_err() {
                return Err(EngineError::ChannelClosed {
                    context: "outbound batch channel".to_owned(),
                });
            }
        }
    }

    // Piggybacks collected self-metrics onto the outgoing batch. Collection
    // never blocks the data path beyond the collectors' own brief locks.
    fn maybe_emit(&self, batch: &mut MetricBatch, time_unix_nano: u64) {
        let due = {
            let mut since = self.batches_since_emit.lock();
            *since += 1;
            if *since >= self.emit_every {
                *since = 0;
                true
            } else {
                false
            }
        };
        if !due {
            return;
        }
        for metric in self.registry.collect(time_unix_nano) {
            batch.push_self_metric(metric);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::{ConfigStatus, PatchError, PatchOutcome};
    use phoenix_control::ConfigPatch;
    use phoenix_pdata::testing::counter_batch;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProcessor {
        name: &'static str,
        seen: AtomicUsize,
        fail_with: Option<ProcessorErrorKind>,
    }

    impl CountingProcessor {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                seen: AtomicUsize::new(0),
                fail_with: None,
            }
        }

        fn failing(name: &'static str, kind: ProcessorErrorKind) -> Self {
            Self {
                name,
                seen: AtomicUsize::new(0),
                fail_with: Some(kind),
            }
        }
    }

    impl MetricsProcessor for CountingProcessor {
        fn name(&self) -> &str {
            self.name
        }

        fn consume(
            &self,
            _batch: &mut MetricBatch,
            _ctx: &BatchContext,
        ) -> Result<(), EngineError> {
            let _ = self.seen.fetch_add(1, Ordering::SeqCst);
            match self.fail_with {
                Some(kind) => Err(EngineError::processor(self.name, kind, "induced")),
                None => Ok(()),
            }
        }

        fn apply_patch(&self, _patch: &ConfigPatch) -> Result<PatchOutcome, PatchError> {
            Ok(PatchOutcome::Applied)
        }

        fn config_status(&self) -> ConfigStatus {
            ConfigStatus {
                parameters: BTreeMap::new(),
                enabled: true,
            }
        }
    }

    struct RecordingListener(Mutex<Vec<String>>);

    impl FaultListener for RecordingListener {
        fn structural_fault(&self, processor: &str, _detail: &str) {
            self.0.lock().push(processor.to_owned());
        }
    }

    #[test]
    fn batches_run_through_in_order_and_emit() {
        let first = Arc::new(CountingProcessor::new("first"));
        let second = Arc::new(CountingProcessor::new("second"));
        let pipeline = Pipeline::builder()
            .with_processor(first.clone())
            .with_processor(second.clone())
            .build();

        let mut batch = counter_batch("c", 3, 1);
        assert!(pipeline.process(&mut batch));
        assert_eq!(first.seen.load(Ordering::SeqCst), 1);
        assert_eq!(second.seen.load(Ordering::SeqCst), 1);
        // The emitter appended pipeline self-metrics.
        assert!(
            batch
                .resource_metrics
                .iter()
                .flat_map(|rm| rm.metrics())
                .any(|m| m.name.starts_with("phoenix.pipeline."))
        );
    }

    #[test]
    fn recoverable_errors_keep_the_batch_flowing() {
        let flaky = Arc::new(CountingProcessor::failing(
            "flaky",
            ProcessorErrorKind::InputValidation,
        ));
        let after = Arc::new(CountingProcessor::new("after"));
        let pipeline = Pipeline::builder()
            .with_processor(flaky)
            .with_processor(after.clone())
            .build();

        let mut batch = counter_batch("c", 1, 1);
        assert!(pipeline.process(&mut batch));
        assert_eq!(after.seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn structural_faults_drop_the_batch_and_notify() {
        let broken = Arc::new(CountingProcessor::failing(
            "broken",
            ProcessorErrorKind::Structural,
        ));
        let after = Arc::new(CountingProcessor::new("after"));
        let listener = Arc::new(RecordingListener(Mutex::new(Vec::new())));
        let pipeline = Pipeline::builder()
            .with_processor(broken)
            .with_processor(after.clone())
            .with_fault_listener(listener.clone())
            .build();

        let mut batch = counter_batch("c", 1, 1);
        assert!(!pipeline.process(&mut batch));
        assert_eq!(after.seen.load(Ordering::SeqCst), 0);
        assert_eq!(listener.0.lock().as_slice(), ["broken"]);
    }

    #[tokio::test]
    async fn run_forwards_until_cancelled() {
        let pipeline = Arc::new(
            Pipeline::builder()
                .with_processor(Arc::new(CountingProcessor::new("p")))
                .build(),
        );
        let (in_tx, in_rx) = mpsc::channel(4);
        let (out_tx, mut out_rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();

        let runner = {
            let pipeline = pipeline.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { pipeline.run(in_rx, out_tx, cancel).await })
        };

        in_tx.send(counter_batch("c", 2, 1)).await.unwrap();
        let forwarded = out_rx.recv().await.unwrap();
        assert_eq!(forwarded.resource_metrics.len(), 2 + 1); // + self-metrics resource

        cancel.cancel();
        runner.await.unwrap().unwrap();
    }
}

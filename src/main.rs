// SPDX-License-Identifier: Apache-2.0

//! phoenixd: the Phoenix collector binary.
//!
//! Wires the processor pipeline in its canonical order, registers every
//! updateable processor with governance, and runs until interrupted. Local
//! runs can feed JSON-encoded metric batches on stdin (one batch per line)
//! and read the transformed batches back on stdout; in production the
//! in/out channels are owned by receiver and exporter plumbing outside this
//! repository's scope.

use clap::Parser;
use phoenix_config::Policy;
use phoenix_engine::{MetricsProcessor, Pipeline};
use phoenix_governance::{Governance, watcher};
use phoenix_pdata::MetricBatch;
use phoenix_processors::{
    AdaptiveTopK, CardinalityGuard, CpuHistogram, OthersRollup, PatchTap, PidDecider,
    PriorityTagger, ReservoirSampler, TimeseriesEstimator,
};
use phoenix_telemetry::MetricsRegistryHandle;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "phoenixd", about = "Self-adaptive telemetry pipeline")]
struct Args {
    /// Path of the policy document.
    #[arg(long)]
    policy: Option<PathBuf>,

    /// Validate the policy and exit.
    #[arg(long)]
    check: bool,

    /// Log filter, e.g. `info` or `phoenix_governance=debug`.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Read JSON-encoded batches from stdin and write results to stdout.
    #[arg(long)]
    stdin_batches: bool,
}

fn main() -> miette::Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(args.log_level.clone()))
        .with_writer(std::io::stderr)
        .init();

    if args.check {
        let path = args
            .policy
            .as_deref()
            .ok_or_else(|| miette::miette!("--check requires --policy"))?;
        Policy::load(path)?;
        println!("policy OK: {}", path.display());
        return Ok(());
    }

    let (policy, policy_loaded) = match &args.policy {
        Some(path) => match Policy::load(path) {
            Ok(policy) => (policy, true),
            Err(err) => {
                // Built-in defaults plus safe mode until a valid policy shows
                // up on the watcher.
                warn!(error = %err, "policy unusable at startup, running defaults in safe mode");
                (Policy::default(), false)
            }
        },
        None => {
            warn!("no policy given, running defaults in safe mode");
            (Policy::default(), false)
        }
    };

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|err| miette::miette!("tokio runtime: {err}"))?;
    runtime.block_on(run(args, policy, policy_loaded))
}

async fn run(args: Args, policy: Policy, policy_loaded: bool) -> miette::Result<()> {
    let telemetry = MetricsRegistryHandle::new();
    let governance = Governance::new(policy.clone(), policy_loaded, &telemetry);
    let cancel = CancellationToken::new();

    // Processors in pipeline order.
    let tagger = Arc::new(
        PriorityTagger::new(&policy.processors_config.priority_tagger, &telemetry)
            .map_err(|err| miette::miette!("{err}"))?,
    );
    let topk = Arc::new(
        AdaptiveTopK::new(&policy.processors_config.adaptive_topk, &telemetry)
            .map_err(|err| miette::miette!("{err}"))?,
    );
    let rollup = Arc::new(OthersRollup::new(
        &policy.processors_config.others_rollup,
        &telemetry,
    ));
    let guard = Arc::new(CardinalityGuard::new(
        &policy.processors_config.cardinality_guard,
        &telemetry,
    ));
    let sampler = Arc::new(ReservoirSampler::new(
        &policy.processors_config.reservoir_sampler,
        &telemetry,
    ));
    let cpu = Arc::new(
        CpuHistogram::new(&policy.processors_config.cpu_histogram, &telemetry)
            .map_err(|err| miette::miette!("{err}"))?,
    );
    let estimator = Arc::new(
        TimeseriesEstimator::new(&policy.processors_config.timeseries_estimator, &telemetry)
            .map_err(|err| miette::miette!("{err}"))?,
    );
    let decider = Arc::new(
        PidDecider::new(&policy.pid_decider_config, &telemetry)
            .map_err(|err| miette::miette!("{err}"))?,
    );
    let tap = Arc::new(PatchTap::new(Arc::new(governance.clone()), &telemetry));

    let updateable: Vec<Arc<dyn MetricsProcessor>> = vec![
        tagger.clone(),
        topk.clone(),
        rollup.clone(),
        guard.clone(),
        sampler.clone(),
        cpu.clone(),
        estimator.clone(),
        decider.clone(),
        tap.clone(),
    ];

    let mut builder = Pipeline::builder()
        .with_registry(telemetry.clone())
        .with_fault_listener(Arc::new(governance.clone()));
    for processor in &updateable {
        builder = builder.with_processor(processor.clone());
    }
    let pipeline = Arc::new(builder.build());

    if let Err(err) = pipeline.start() {
        governance.set_data_path_available(false);
        error!(error = %err, "data path unavailable");
        return Err(miette::miette!("{err}"));
    }
    for processor in &updateable {
        governance.register_processor(processor.clone());
    }
    info!(health = ?governance.health(), "phoenix started");

    let governance_task = {
        let governance = governance.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { governance.run(cancel).await })
    };

    let watcher_task = args.policy.clone().map(|path| {
        let governance = governance.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = watcher::watch_policy(governance, path, cancel).await {
                warn!(error = %err, "policy watcher unavailable");
            }
        })
    });

    let (in_tx, in_rx) = mpsc::channel::<MetricBatch>(64);
    let (out_tx, mut out_rx) = mpsc::channel::<MetricBatch>(64);

    let pipeline_task = {
        let pipeline = pipeline.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { pipeline.run(in_rx, out_tx, cancel).await })
    };

    if args.stdin_batches {
        let cancel_reader = cancel.clone();
        let _ = tokio::spawn(async move {
            let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
            loop {
                let line = tokio::select! {
                    () = cancel_reader.cancelled() => break,
                    line = lines.next_line() => line,
                };
                match line {
                    Ok(Some(line)) if !line.trim().is_empty() => {
                        match serde_json::from_str::<MetricBatch>(&line) {
                            Ok(batch) => {
                                if in_tx.send(batch).await.is_err() {
                                    break;
                                }
                            }
                            Err(err) => warn!(error = %err, "undecodable input batch skipped"),
                        }
                    }
                    Ok(Some(_)) => {}
                    Ok(None) | Err(_) => break,
                }
            }
        });
        let _ = tokio::spawn(async move {
            while let Some(batch) = out_rx.recv().await {
                match serde_json::to_string(&batch) {
                    Ok(line) => println!("{line}"),
                    Err(err) => warn!(error = %err, "batch serialization failed"),
                }
            }
        });
    } else {
        // No local input: hold the channels open and discard any output
        // until shutdown.
        let _ = tokio::spawn(async move {
            let _keep_alive = in_tx;
            std::future::pending::<()>().await;
        });
        let _ = tokio::spawn(async move { while out_rx.recv().await.is_some() {} });
    }

    tokio::signal::ctrl_c()
        .await
        .map_err(|err| miette::miette!("signal handler: {err}"))?;
    info!("shutdown requested");
    cancel.cancel();

    if let Err(err) = pipeline_task.await.unwrap_or(Ok(())) {
        warn!(error = %err, "pipeline stopped with error");
    }
    if let Err(err) = pipeline.shutdown() {
        warn!(error = %err, "processor shutdown reported an error");
    }
    let _ = governance_task.await;
    if let Some(task) = watcher_task {
        let _ = task.await;
    }
    info!("phoenix stopped");
    Ok(())
}

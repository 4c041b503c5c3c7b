// SPDX-License-Identifier: Apache-2.0

//! End-to-end control loop: batches flow through the processor graph, the
//! decider proposes patches off the in-batch coverage KPI, the tap forwards
//! them, and governance mutates the running top-k filter.

use phoenix_config::Policy;
use phoenix_engine::{MetricsProcessor, Pipeline};
use phoenix_governance::{Governance, PatchOutcomeClass};
use phoenix_pdata::testing::counter_batch;
use phoenix_processors::{
    ATTR_ROLLUP, ATTR_TOPK_INCLUDED, AdaptiveTopK, OthersRollup, PatchTap, PidDecider,
    PriorityTagger,
};
use phoenix_telemetry::MetricsRegistryHandle;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const POLICY: &str = r#"
processors_config:
  adaptive_topk:
    k_value: 30
    k_min: 10
    k_max: 60
    resource_field: process.name
    counter_field: process.cpu_seconds_total
pid_decider_config:
  default_interval: 10s
  controllers:
    - name: coverage
      enabled: true
      kpi_metric_name: phoenix.topk.coverage
      kpi_target_value: 0.9
      gains:
        kp: 1.0
      outputs:
        - target_processor: adaptive_topk
          parameter_path: k_value
          change_scale_factor: 100.0
          min_value: 10.0
          max_value: 60.0
pic_control_config:
  max_patches_per_minute: 30
  patch_cooldown: 0s
"#;

struct Harness {
    pipeline: Pipeline,
    governance: Governance,
    topk: Arc<AdaptiveTopK>,
    cancel: CancellationToken,
}

fn build() -> Harness {
    let policy = Policy::from_yaml_str(POLICY).unwrap();
    let telemetry = MetricsRegistryHandle::new();
    let governance = Governance::new(policy.clone(), true, &telemetry);

    let tagger = Arc::new(
        PriorityTagger::new(&policy.processors_config.priority_tagger, &telemetry).unwrap(),
    );
    let topk =
        Arc::new(AdaptiveTopK::new(&policy.processors_config.adaptive_topk, &telemetry).unwrap());
    let rollup = Arc::new(OthersRollup::new(
        &policy.processors_config.others_rollup,
        &telemetry,
    ));
    let decider = Arc::new(PidDecider::new(&policy.pid_decider_config, &telemetry).unwrap());
    let tap = Arc::new(PatchTap::new(Arc::new(governance.clone()), &telemetry));

    let processors: Vec<Arc<dyn MetricsProcessor>> = vec![
        tagger,
        topk.clone(),
        rollup,
        decider,
        tap,
    ];
    let mut builder = Pipeline::builder()
        .with_registry(telemetry)
        .with_fault_listener(Arc::new(governance.clone()));
    for processor in &processors {
        builder = builder.with_processor(processor.clone());
    }
    let pipeline = builder.build();
    pipeline.start().unwrap();
    for processor in &processors {
        governance.register_processor(processor.clone());
    }

    Harness {
        pipeline,
        governance,
        topk,
        cancel: CancellationToken::new(),
    }
}

async fn wait_for_k(governance: &Governance, expected: i64) -> bool {
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let k = governance
            .config_status_of("adaptive_topk")
            .and_then(|status| status.parameters["k_value"].as_i64());
        if k == Some(expected) {
            return true;
        }
    }
    false
}

#[tokio::test]
async fn low_coverage_drives_k_up_through_governance() {
    let harness = build();
    let governance_task = {
        let governance = harness.governance.clone();
        let cancel = harness.cancel.clone();
        tokio::spawn(async move { governance.run(cancel).await })
    };

    // 100 resources, k=30: coverage 0.3 against a 0.9 target. The decider
    // proposes k = clamp((0.9 - 0.3) * 100, 10, 60) = 60.
    let mut batch = counter_batch("process.cpu_seconds_total", 100, 1);
    assert!(harness.pipeline.process(&mut batch));

    // Accounting invariant: included resources plus the rollup bucket cover
    // the whole input.
    let included = batch
        .resource_metrics
        .iter()
        .filter(|rm| rm.has_flag(ATTR_TOPK_INCLUDED))
        .count();
    let bucket = batch
        .resource_metrics
        .iter()
        .find(|rm| rm.has_flag(ATTR_ROLLUP))
        .expect("rollup bucket missing");
    let folded = bucket
        .metric("phoenix.others.resource_count")
        .and_then(|m| m.number_points().first())
        .map(|dp| dp.value.as_f64())
        .unwrap() as usize;
    assert_eq!(included + folded, 100);

    // The encoded patch never leaves the pipeline.
    assert!(
        batch
            .resource_metrics
            .iter()
            .flat_map(|rm| rm.metrics())
            .all(|m| m.name != phoenix_control::PATCH_METRIC_NAME)
    );

    // Governance applies the proposed k asynchronously.
    assert!(
        wait_for_k(&harness.governance, 60).await,
        "k never reached 60; history: {:?}",
        harness.governance.history()
    );
    assert!(
        harness
            .governance
            .history()
            .iter()
            .any(|entry| entry.outcome == PatchOutcomeClass::Applied)
    );
    assert!(harness.topk.top_k_set().len() <= 60);

    harness.cancel.cancel();
    let _ = governance_task.await;
}

#[tokio::test]
async fn safe_mode_holds_parameters_against_the_loop() {
    let harness = build();
    let governance_task = {
        let governance = harness.governance.clone();
        let cancel = harness.cancel.clone();
        tokio::spawn(async move { governance.run(cancel).await })
    };

    harness.governance.enter_safe_mode("operator signal");
    let mut batch = counter_batch("process.cpu_seconds_total", 100, 1);
    assert!(harness.pipeline.process(&mut batch));

    // The proposed normal-severity patch bounces off safe mode.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let k = harness
        .governance
        .config_status_of("adaptive_topk")
        .and_then(|status| status.parameters["k_value"].as_i64());
    assert_eq!(k, Some(30));
    assert!(
        harness
            .governance
            .history()
            .iter()
            .any(|entry| entry.outcome == PatchOutcomeClass::RejectedSafemode)
    );

    // Leaving safe mode re-seeds the policy's initial parameters.
    harness.governance.exit_safe_mode();
    assert!(wait_for_k(&harness.governance, 30).await);

    harness.cancel.cancel();
    let _ = governance_task.await;
}

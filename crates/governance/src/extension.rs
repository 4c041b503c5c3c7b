// SPDX-License-Identifier: Apache-2.0

//! The governance extension proper: registry, patch pipeline and the
//! safe-mode state machine.

use crate::history::{HistoryEntry, PatchHistory, PatchOutcomeClass};
use crate::rate_limit::RateLimiter;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use phoenix_config::{AutonomyLevel, Policy, PolicySnapshot};
use phoenix_control::{CodecError, ConfigPatch, PatchValue, Severity};
use phoenix_engine::pipeline::FaultListener;
use phoenix_engine::processor::{MetricsProcessor, PatchError, PatchOutcome};
use phoenix_engine::time::now_unix_nano;
use phoenix_processors::PatchSink;
use phoenix_telemetry::MetricsRegistryHandle;
use phoenix_telemetry::instrument::{Counter, Gauge};
use phoenix_telemetry::metrics::MetricSet;
use phoenix_telemetry_macros::metric_set;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Bounded time spent draining queued patches at shutdown.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(2);

/// Governance self-metrics, one counter per outcome class.
#[metric_set(name = "phoenix.governance")]
#[derive(Debug, Default, Clone)]
pub struct GovernanceMetrics {
    /// Patches applied.
    #[metric(unit = "{patch}")]
    pub applied: Counter<u64>,

    /// Duplicate applications recorded as no-ops.
    #[metric(unit = "{patch}")]
    pub applied_duplicate: Counter<u64>,

    /// Patches computed but withheld by the autonomy level.
    #[metric(unit = "{patch}")]
    pub shadowed: Counter<u64>,

    /// Patches rejected by the rate limit or a cooldown.
    #[metric(unit = "{patch}")]
    pub rejected_ratelimit: Counter<u64>,

    /// Patches rejected as expired.
    #[metric(unit = "{patch}")]
    pub rejected_ttl: Counter<u64>,

    /// Patches rejected by target-side type validation.
    #[metric(unit = "{patch}")]
    pub rejected_type: Counter<u64>,

    /// Patches rejected by target-side range validation.
    #[metric(unit = "{patch}")]
    pub rejected_range: Counter<u64>,

    /// Patches rejected for an unknown target.
    #[metric(unit = "{patch}")]
    pub rejected_target: Counter<u64>,

    /// Patches rejected while in safe mode.
    #[metric(unit = "{patch}")]
    pub rejected_safemode: Counter<u64>,

    /// Patches parked for a policy-known but unregistered target.
    #[metric(unit = "{patch}")]
    pub deferred_parked: Counter<u64>,

    /// Deferred patches dropped on TTL expiry.
    #[metric(unit = "{patch}")]
    pub deferred_dropped: Counter<u64>,

    /// Side-channel decode failures accounted as type rejections.
    #[metric(unit = "{point}")]
    pub decode_failures: Counter<u64>,

    /// Policy reload failures.
    #[metric(unit = "{reload}")]
    pub policy_reload_failed: Counter<u64>,

    /// Patches dropped because shutdown drained the queue.
    #[metric(unit = "{patch}")]
    pub dropped_on_shutdown: Counter<u64>,

    /// Safe-mode indicator (0 normal, 1 safe).
    #[metric(unit = "{1}")]
    pub safe_mode: Gauge<u64>,

    /// Registered updateable processors.
    #[metric(unit = "{processor}")]
    pub registered_processors: Gauge<u64>,
}

/// Operator-visible health of the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Normal mode with a loaded policy.
    Ok,
    /// Safe mode, or repeated policy-reload failures.
    Degraded,
    /// Data-path processors could not start.
    Unavailable,
}

struct GovState {
    safe_mode: bool,
    policy_loaded: bool,
    data_path_available: bool,
    reload_failures: u32,
    registry: HashMap<String, Arc<dyn MetricsProcessor>>,
    history: PatchHistory,
    rate: RateLimiter,
    deferred: Vec<ConfigPatch>,
    metrics: MetricSet<GovernanceMetrics>,
}

struct Inner {
    policy: ArcSwap<Policy>,
    state: Mutex<GovState>,
    patch_tx: mpsc::UnboundedSender<ConfigPatch>,
    patch_rx: Mutex<Option<mpsc::UnboundedReceiver<ConfigPatch>>>,
}

/// Cloneable handle to the governance extension.
#[derive(Clone)]
pub struct Governance {
    inner: Arc<Inner>,
}

impl Governance {
    /// Creates the extension around an initial policy.
    ///
    /// `policy_loaded` distinguishes a policy read from disk from built-in
    /// defaults; with defaults only, governance starts in safe mode.
    #[must_use]
    pub fn new(
        policy: Policy,
        policy_loaded: bool,
        telemetry: &MetricsRegistryHandle,
    ) -> Self {
        let history_size = policy.pic_control_config.history_size;
        let (patch_tx, patch_rx) = mpsc::unbounded_channel();
        let governance = Self {
            inner: Arc::new(Inner {
                policy: ArcSwap::from_pointee(policy),
                state: Mutex::new(GovState {
                    safe_mode: false,
                    policy_loaded,
                    data_path_available: true,
                    reload_failures: 0,
                    registry: HashMap::new(),
                    history: PatchHistory::new(history_size),
                    rate: RateLimiter::new(),
                    deferred: Vec::new(),
                    metrics: MetricSet::new(),
                }),
                patch_tx,
                patch_rx: Mutex::new(Some(patch_rx)),
            }),
        };
        let collector = governance.clone();
        telemetry.register(Box::new(move |ts| {
            let mut state = collector.inner.state.lock();
            phoenix_telemetry::render::render_metric_set(&mut state.metrics, ts)
        }));
        if !policy_loaded {
            governance.enter_safe_mode("no policy loaded at startup");
        }
        governance
    }

    /// The current policy snapshot.
    #[must_use]
    pub fn policy(&self) -> PolicySnapshot {
        self.inner.policy.load_full()
    }

    /// True while the state machine is in safe mode.
    #[must_use]
    pub fn is_safe_mode(&self) -> bool {
        self.inner.state.lock().safe_mode
    }

    /// Registers an updateable processor and replays matching deferred
    /// patches.
    pub fn register_processor(&self, processor: Arc<dyn MetricsProcessor>) {
        let name = processor.name().to_owned();
        let replay: Vec<ConfigPatch> = {
            let mut state = self.inner.state.lock();
            let _ = state.registry.insert(name.clone(), processor);
            let count = state.registry.len() as u64;
            state.metrics.registered_processors.set(count);
            let (matching, rest): (Vec<_>, Vec<_>) = state
                .deferred
                .drain(..)
                .partition(|patch| patch.target_processor_id == name);
            state.deferred = rest;
            matching
        };
        info!(processor = %name, "processor registered");
        for patch in replay {
            debug!(patch_id = %patch.patch_id, "replaying deferred patch");
            let _ = self.handle_patch(patch);
        }
    }

    /// Marks whether the data path came up; feeds the health probe.
    pub fn set_data_path_available(&self, available: bool) {
        self.inner.state.lock().data_path_available = available;
    }

    /// Current health classification.
    #[must_use]
    pub fn health(&self) -> HealthStatus {
        let state = self.inner.state.lock();
        let threshold = self
            .inner
            .policy
            .load()
            .pic_control_config
            .reload_failure_threshold;
        if !state.data_path_available {
            HealthStatus::Unavailable
        } else if state.safe_mode || !state.policy_loaded || state.reload_failures >= threshold {
            HealthStatus::Degraded
        } else {
            HealthStatus::Ok
        }
    }

    /// Live configuration of a registered processor.
    #[must_use]
    pub fn config_status_of(&self, target: &str) -> Option<phoenix_engine::ConfigStatus> {
        let state = self.inner.state.lock();
        state.registry.get(target).map(|p| p.config_status())
    }

    /// Timestamp of the last applied patch per target.
    #[must_use]
    pub fn last_applied(&self, target: &str) -> Option<u64> {
        self.inner.state.lock().rate.last_applied(target)
    }

    /// Recent patch decisions, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.inner.state.lock().history.iter().cloned().collect()
    }

    /// Runs one patch through the governance pipeline.
    ///
    /// Validation order: dedup, TTL, target, rate limit, safe mode, then
    /// the target's own type/range check. Urgent severity bypasses the rate
    /// limit and safe mode, never validation.
    pub fn handle_patch(&self, patch: ConfigPatch) -> PatchOutcomeClass {
        let now = now_unix_nano();
        let mut state = self.inner.state.lock();
        let policy = self.inner.policy.load();
        Self::sweep_deferred(&mut state, now);

        // A patch id is consumed at most once.
        if state.history.contains(&patch.patch_id) {
            state.metrics.applied_duplicate.inc();
            debug!(patch_id = %patch.patch_id, "duplicate delivery ignored");
            return PatchOutcomeClass::AppliedDuplicate;
        }

        if patch.expired_at(now) {
            return Self::finish(&mut state, &patch, now, PatchOutcomeClass::RejectedTtl);
        }

        let Some(processor) = state.registry.get(&patch.target_processor_id).cloned() else {
            let known = policy
                .processors_config
                .initial_parameters()
                .iter()
                .any(|(id, _)| *id == patch.target_processor_id)
                || policy
                    .pic_control_config
                    .safe_mode
                    .contains_key(&patch.target_processor_id);
            if known {
                debug!(
                    target = %patch.target_processor_id,
                    patch_id = %patch.patch_id,
                    "target not yet registered, deferring"
                );
                state.metrics.deferred_parked.inc();
                state.deferred.push(patch);
                return PatchOutcomeClass::Deferred;
            }
            return Self::finish(&mut state, &patch, now, PatchOutcomeClass::RejectedTarget);
        };

        if policy.global_settings.autonomy_level != AutonomyLevel::Active {
            info!(
                patch_id = %patch.patch_id,
                target = %patch.target_processor_id,
                path = %patch.parameter_path,
                value = %patch.new_value,
                autonomy = ?policy.global_settings.autonomy_level,
                "patch withheld by autonomy level"
            );
            state.metrics.shadowed.inc();
            return Self::finish(&mut state, &patch, now, PatchOutcomeClass::Shadowed);
        }

        let urgent = patch.severity == Severity::Urgent;
        if !urgent {
            let window_ok = state
                .rate
                .window_allows(now, policy.pic_control_config.max_patches_per_minute);
            let cooldown_ok = state.rate.cooldown_allows(
                &patch.target_processor_id,
                now,
                policy.pic_control_config.patch_cooldown,
            );
            if !window_ok || !cooldown_ok {
                return Self::finish(
                    &mut state,
                    &patch,
                    now,
                    PatchOutcomeClass::RejectedRatelimit,
                );
            }
        }

        if state.safe_mode && !urgent {
            return Self::finish(&mut state, &patch, now, PatchOutcomeClass::RejectedSafemode);
        }

        match processor.apply_patch(&patch) {
            Ok(PatchOutcome::Applied) => {
                state.rate.record_applied(&patch.target_processor_id, now);
                info!(
                    patch_id = %patch.patch_id,
                    target = %patch.target_processor_id,
                    path = %patch.parameter_path,
                    value = %patch.new_value,
                    source = %patch.source,
                    "patch applied"
                );
                Self::finish(&mut state, &patch, now, PatchOutcomeClass::Applied)
            }
            Ok(PatchOutcome::Duplicate) => {
                match policy.pic_control_config.duplicate_patch_policy {
                    phoenix_config::DuplicatePatchPolicy::CountApplied => {
                        state.rate.record_applied(&patch.target_processor_id, now);
                        Self::finish(&mut state, &patch, now, PatchOutcomeClass::Applied)
                    }
                    phoenix_config::DuplicatePatchPolicy::Noop => Self::finish(
                        &mut state,
                        &patch,
                        now,
                        PatchOutcomeClass::AppliedDuplicate,
                    ),
                }
            }
            Err(err) => {
                warn!(
                    patch_id = %patch.patch_id,
                    target = %patch.target_processor_id,
                    error = %err,
                    "patch rejected by target"
                );
                if matches!(err, PatchError::OutOfRange { .. }) {
                    state.metrics.rejected_range.inc();
                } else {
                    state.metrics.rejected_type.inc();
                }
                Self::finish_quiet(&mut state, &patch, now, PatchOutcomeClass::RejectedType)
            }
        }
    }

    /// Moves the state machine into safe mode and pushes the policy's
    /// safe-mode overrides onto every registered processor.
    pub fn enter_safe_mode(&self, reason: &str) {
        let policy = self.inner.policy.load();
        let mut state = self.inner.state.lock();
        if state.safe_mode {
            return;
        }
        warn!(reason, "entering safe mode");
        state.safe_mode = true;
        state.metrics.safe_mode.set(1);

        let now = now_unix_nano();
        for (target, overrides) in &policy.pic_control_config.safe_mode {
            let Some(processor) = state.registry.get(target).cloned() else {
                continue;
            };
            for (path, value) in overrides {
                let Some(value) = patch_value_from_json(value) else {
                    warn!(target = %target, path = %path, "unusable safe-mode override value");
                    continue;
                };
                let patch = ConfigPatch::new(
                    target.clone(),
                    path.clone(),
                    value,
                    Severity::Urgent,
                    "safe_mode",
                    now,
                    Duration::from_secs(60),
                );
                match processor.apply_patch(&patch) {
                    Ok(_) => {
                        state.history.record(HistoryEntry {
                            patch_id: patch.patch_id,
                            target: target.clone(),
                            time_unix_nano: now,
                            outcome: PatchOutcomeClass::Applied,
                        });
                        state.metrics.applied.inc();
                    }
                    Err(err) => {
                        warn!(target = %target, path = %path, error = %err, "safe-mode override rejected")
                    }
                }
            }
        }
    }

    /// Leaves safe mode and re-applies the current policy's initial
    /// parameters.
    pub fn exit_safe_mode(&self) {
        {
            let mut state = self.inner.state.lock();
            if !state.safe_mode {
                return;
            }
            info!("leaving safe mode");
            state.safe_mode = false;
            state.metrics.safe_mode.set(0);
        }
        self.apply_initial_parameters("safe_mode_exit");
    }

    /// Installs a freshly loaded policy and re-seeds initial parameters.
    pub fn reload_policy(&self, policy: Policy) {
        self.inner.policy.store(Arc::new(policy));
        let safe = {
            let mut state = self.inner.state.lock();
            state.policy_loaded = true;
            state.reload_failures = 0;
            state.safe_mode
        };
        info!("policy reloaded");
        // In safe mode the safe overrides stay authoritative; the initial
        // parameters return on exit.
        if !safe {
            self.apply_initial_parameters("policy_reload");
        }
    }

    /// Reports that the host observed a collector safety limit violation
    /// (CPU or memory ceiling from the policy's global settings).
    pub fn report_safety_limit_exceeded(&self, detail: &str) {
        warn!(detail, "collector safety limit exceeded");
        self.enter_safe_mode("collector safety limit exceeded");
    }

    /// Accounts one failed policy reload; repeated failures trip safe mode.
    pub fn record_reload_failure(&self) {
        let trip = {
            let mut state = self.inner.state.lock();
            state.reload_failures += 1;
            state.metrics.policy_reload_failed.inc();
            let threshold = self
                .inner
                .policy
                .load()
                .pic_control_config
                .reload_failure_threshold;
            state.reload_failures >= threshold && !state.safe_mode
        };
        if trip {
            self.enter_safe_mode("repeated policy reload failures");
        }
    }

    /// Pushes the policy's initial parameters to every registered processor
    /// as urgent internally sourced patches.
    pub fn apply_initial_parameters(&self, source: &str) {
        let policy = self.inner.policy.load();
        let now = now_unix_nano();
        for (target, parameters) in policy.processors_config.initial_parameters() {
            for (path, value) in &parameters {
                let Some(value) = patch_value_from_json(value) else {
                    continue;
                };
                let patch = ConfigPatch::new(
                    target.clone(),
                    path.clone(),
                    value,
                    Severity::Urgent,
                    source,
                    now,
                    Duration::from_secs(60),
                );
                let _ = self.handle_patch(patch);
            }
        }
    }

    /// Drains the patch queue until cancellation, then rejects leftovers
    /// within a bounded drain window.
    pub async fn run(&self, cancel: CancellationToken) {
        let Some(mut rx) = self.inner.patch_rx.lock().take() else {
            warn!("governance run() called twice, ignoring");
            return;
        };
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                patch = rx.recv() => {
                    match patch {
                        Some(patch) => {
                            let _ = self.handle_patch(patch);
                        }
                        None => return,
                    }
                }
            }
        }
        // Bounded shutdown drain; whatever remains afterwards is dropped.
        let deadline = std::time::Instant::now() + SHUTDOWN_DRAIN;
        while std::time::Instant::now() < deadline {
            match rx.try_recv() {
                Ok(patch) => {
                    let _ = self.handle_patch(patch);
                }
                Err(_) => break,
            }
        }
        let mut dropped = 0u64;
        while rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            warn!(dropped, "patches dropped at shutdown");
            self.inner
                .state
                .lock()
                .metrics
                .dropped_on_shutdown
                .add(dropped);
        }
    }

    fn sweep_deferred(state: &mut GovState, now: u64) {
        let before = state.deferred.len();
        state.deferred.retain(|patch| !patch.expired_at(now));
        let dropped = before - state.deferred.len();
        if dropped > 0 {
            debug!(dropped, "deferred patches expired");
            state.metrics.deferred_dropped.add(dropped as u64);
        }
    }

    fn finish(
        state: &mut GovState,
        patch: &ConfigPatch,
        now: u64,
        outcome: PatchOutcomeClass,
    ) -> PatchOutcomeClass {
        match outcome {
            PatchOutcomeClass::Applied => state.metrics.applied.inc(),
            PatchOutcomeClass::AppliedDuplicate => state.metrics.applied_duplicate.inc(),
            PatchOutcomeClass::Shadowed => {}
            PatchOutcomeClass::Deferred => {}
            PatchOutcomeClass::RejectedRatelimit => state.metrics.rejected_ratelimit.inc(),
            PatchOutcomeClass::RejectedTtl => state.metrics.rejected_ttl.inc(),
            PatchOutcomeClass::RejectedType => state.metrics.rejected_type.inc(),
            PatchOutcomeClass::RejectedTarget => state.metrics.rejected_target.inc(),
            PatchOutcomeClass::RejectedSafemode => state.metrics.rejected_safemode.inc(),
        }
        Self::finish_quiet(state, patch, now, outcome)
    }

    // Records history without touching outcome counters (used when the
    // caller already accounted a finer-grained counter).
    fn finish_quiet(
        state: &mut GovState,
        patch: &ConfigPatch,
        now: u64,
        outcome: PatchOutcomeClass,
    ) -> PatchOutcomeClass {
        state.history.record(HistoryEntry {
            patch_id: patch.patch_id.clone(),
            target: patch.target_processor_id.clone(),
            time_unix_nano: now,
            outcome,
        });
        outcome
    }
}

impl PatchSink for Governance {
    fn submit(&self, patch: ConfigPatch) {
        if self.inner.patch_tx.send(patch).is_err() {
            warn!("governance patch queue closed, patch dropped");
        }
    }

    fn decode_failure(&self, error: &CodecError) {
        // Undecodable side-channel payloads count as type rejections.
        let mut state = self.inner.state.lock();
        state.metrics.decode_failures.inc();
        state.metrics.rejected_type.inc();
        debug!(error = %error, "side-channel decode failure");
    }
}

impl FaultListener for Governance {
    fn structural_fault(&self, processor: &str, detail: &str) {
        warn!(processor, detail, "internal consistency violation reported");
        self.enter_safe_mode("internal consistency violation");
    }
}

fn patch_value_from_json(value: &serde_json::Value) -> Option<PatchValue> {
    match value {
        serde_json::Value::Bool(b) => Some(PatchValue::Bool(*b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(PatchValue::Int(i))
            } else {
                n.as_f64().map(PatchValue::Double)
            }
        }
        serde_json::Value::String(s) => Some(PatchValue::Str(s.clone())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phoenix_engine::processor::patch_args;
    use phoenix_engine::{BatchContext, ConfigStatus, EngineError};
    use phoenix_pdata::MetricBatch;
    use std::collections::BTreeMap;

    // Minimal updateable processor mirroring the top-k patch surface.
    struct FakeTopK {
        state: Mutex<(i64, bool)>,
    }

    impl FakeTopK {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                state: Mutex::new((30, true)),
            })
        }

        fn k(&self) -> i64 {
            self.state.lock().0
        }

        fn enabled(&self) -> bool {
            self.state.lock().1
        }
    }

    impl MetricsProcessor for FakeTopK {
        fn name(&self) -> &str {
            "adaptive_topk"
        }

        fn consume(&self, _: &mut MetricBatch, _: &BatchContext) -> Result<(), EngineError> {
            Ok(())
        }

        fn apply_patch(&self, patch: &ConfigPatch) -> Result<PatchOutcome, PatchError> {
            let mut state = self.state.lock();
            match patch.parameter_path.as_str() {
                "k_value" => {
                    let k = patch_args::expect_int_in(patch, 10, 60)?;
                    if state.0 == k {
                        return Ok(PatchOutcome::Duplicate);
                    }
                    state.0 = k;
                    Ok(PatchOutcome::Applied)
                }
                "enabled" => {
                    let enabled = patch_args::expect_bool(patch)?;
                    if state.1 == enabled {
                        return Ok(PatchOutcome::Duplicate);
                    }
                    state.1 = enabled;
                    Ok(PatchOutcome::Applied)
                }
                _ => Err(patch_args::unknown(patch)),
            }
        }

        fn config_status(&self) -> ConfigStatus {
            let state = self.state.lock();
            let mut parameters = BTreeMap::new();
            let _ = parameters.insert("k_value".to_owned(), state.0.into());
            ConfigStatus {
                parameters,
                enabled: state.1,
            }
        }
    }

    fn policy() -> Policy {
        let mut policy = Policy::default();
        policy.pic_control_config.max_patches_per_minute = 100;
        policy.pic_control_config.patch_cooldown = Duration::from_secs(0);
        let mut overrides = serde_json::Map::new();
        let _ = overrides.insert("k_value".to_owned(), serde_json::json!(10));
        let _ = policy
            .pic_control_config
            .safe_mode
            .insert("adaptive_topk".to_owned(), overrides);
        policy
    }

    fn governance_with(policy: Policy) -> (Governance, Arc<FakeTopK>) {
        let governance = Governance::new(policy, true, &MetricsRegistryHandle::new());
        let topk = FakeTopK::new();
        governance.register_processor(topk.clone());
        (governance, topk)
    }

    fn patch(path: &str, value: PatchValue, severity: Severity) -> ConfigPatch {
        ConfigPatch::new(
            "adaptive_topk",
            path,
            value,
            severity,
            "test",
            now_unix_nano(),
            Duration::from_secs(60),
        )
    }

    #[test]
    fn applied_patch_mutates_the_target() {
        let (governance, topk) = governance_with(policy());
        let outcome = governance.handle_patch(patch("k_value", PatchValue::Int(42), Severity::Normal));
        assert_eq!(outcome, PatchOutcomeClass::Applied);
        assert_eq!(topk.k(), 42);
        assert!(governance.last_applied("adaptive_topk").is_some());
    }

    #[test]
    fn expired_patches_are_rejected() {
        let (governance, topk) = governance_with(policy());
        let mut p = patch("k_value", PatchValue::Int(42), Severity::Normal);
        p.time_unix_nano = 1; // far in the past
        p.ttl = Duration::from_secs(1);
        assert_eq!(governance.handle_patch(p), PatchOutcomeClass::RejectedTtl);
        assert_eq!(topk.k(), 30);
    }

    #[test]
    fn unknown_targets_are_rejected_known_ones_deferred() {
        let governance = Governance::new(policy(), true, &MetricsRegistryHandle::new());
        // adaptive_topk is policy-known but not registered yet: defer.
        let deferred = governance.handle_patch(patch("k_value", PatchValue::Int(42), Severity::Normal));
        assert_eq!(deferred, PatchOutcomeClass::Deferred);

        let mut foreign = patch("k_value", PatchValue::Int(1), Severity::Normal);
        foreign.target_processor_id = "nonexistent".to_owned();
        assert_eq!(
            governance.handle_patch(foreign),
            PatchOutcomeClass::RejectedTarget
        );

        // Registration replays the deferred patch.
        let topk = FakeTopK::new();
        governance.register_processor(topk.clone());
        assert_eq!(topk.k(), 42);
    }

    #[test]
    fn out_of_range_patch_counts_against_range_not_applied() {
        let (governance, topk) = governance_with(policy());
        let outcome = governance.handle_patch(patch("k_value", PatchValue::Int(5), Severity::Normal));
        assert_eq!(outcome, PatchOutcomeClass::RejectedType);
        assert_eq!(topk.k(), 30);
        let state = governance.inner.state.lock();
        assert_eq!(state.metrics.rejected_range.get(), 1);
        assert_eq!(state.metrics.applied.get(), 0);
    }

    #[test]
    fn rate_limit_rejects_after_budget_spent() {
        let mut p = policy();
        p.pic_control_config.max_patches_per_minute = 2;
        let (governance, _) = governance_with(p);

        assert_eq!(
            governance.handle_patch(patch("k_value", PatchValue::Int(40), Severity::Normal)),
            PatchOutcomeClass::Applied
        );
        assert_eq!(
            governance.handle_patch(patch("k_value", PatchValue::Int(41), Severity::Normal)),
            PatchOutcomeClass::Applied
        );
        assert_eq!(
            governance.handle_patch(patch("k_value", PatchValue::Int(42), Severity::Normal)),
            PatchOutcomeClass::RejectedRatelimit
        );
        // Urgent bypasses the window.
        assert_eq!(
            governance.handle_patch(patch("k_value", PatchValue::Int(43), Severity::Urgent)),
            PatchOutcomeClass::Applied
        );
    }

    #[test]
    fn cooldown_rejects_rapid_same_target_patches() {
        let mut p = policy();
        p.pic_control_config.patch_cooldown = Duration::from_secs(3600);
        let (governance, _) = governance_with(p);

        assert_eq!(
            governance.handle_patch(patch("k_value", PatchValue::Int(40), Severity::Normal)),
            PatchOutcomeClass::Applied
        );
        assert_eq!(
            governance.handle_patch(patch("k_value", PatchValue::Int(41), Severity::Normal)),
            PatchOutcomeClass::RejectedRatelimit
        );
    }

    // Scenario: in safe mode a normal patch bounces, an urgent disable
    // applies, and exiting re-applies the policy's initial parameters.
    #[test]
    fn safe_mode_overrides_and_recovery() {
        let (governance, topk) = governance_with(policy());
        governance.enter_safe_mode("test");
        // Entering safe mode applied the override k=10.
        assert_eq!(topk.k(), 10);
        assert_eq!(governance.health(), HealthStatus::Degraded);

        let rejected = governance.handle_patch(patch("k_value", PatchValue::Int(50), Severity::Normal));
        assert_eq!(rejected, PatchOutcomeClass::RejectedSafemode);
        assert_eq!(topk.k(), 10);

        let urgent = governance.handle_patch(patch("enabled", PatchValue::Bool(false), Severity::Urgent));
        assert_eq!(urgent, PatchOutcomeClass::Applied);
        assert!(!topk.enabled());

        governance.exit_safe_mode();
        assert_eq!(governance.health(), HealthStatus::Ok);
        // Initial parameters restored (defaults: k=30, enabled).
        assert_eq!(topk.k(), 30);
        assert!(topk.enabled());
    }

    #[test]
    fn duplicate_value_patch_is_a_noop_outside_the_rate_window() {
        let (governance, _) = governance_with(policy());
        let outcome = governance.handle_patch(patch("k_value", PatchValue::Int(30), Severity::Normal));
        assert_eq!(outcome, PatchOutcomeClass::AppliedDuplicate);
        let mut state = governance.inner.state.lock();
        assert_eq!(state.rate.applied_in_window(now_unix_nano()), 0);
    }

    #[test]
    fn duplicate_delivery_of_the_same_patch_id_is_ignored() {
        let (governance, topk) = governance_with(policy());
        let p = patch("k_value", PatchValue::Int(44), Severity::Normal);
        assert_eq!(governance.handle_patch(p.clone()), PatchOutcomeClass::Applied);
        assert_eq!(
            governance.handle_patch(p),
            PatchOutcomeClass::AppliedDuplicate
        );
        assert_eq!(topk.k(), 44);
    }

    #[test]
    fn shadow_autonomy_withholds_application() {
        let mut p = policy();
        p.global_settings.autonomy_level = AutonomyLevel::Shadow;
        let (governance, topk) = governance_with(p);
        let outcome = governance.handle_patch(patch("k_value", PatchValue::Int(42), Severity::Normal));
        assert_eq!(outcome, PatchOutcomeClass::Shadowed);
        assert_eq!(topk.k(), 30);
    }

    #[test]
    fn missing_policy_at_startup_starts_safe() {
        let governance = Governance::new(Policy::default(), false, &MetricsRegistryHandle::new());
        assert!(governance.is_safe_mode());
        assert_eq!(governance.health(), HealthStatus::Degraded);
    }

    #[test]
    fn repeated_reload_failures_trip_safe_mode() {
        let (governance, _) = governance_with(policy());
        assert!(!governance.is_safe_mode());
        for _ in 0..3 {
            governance.record_reload_failure();
        }
        assert!(governance.is_safe_mode());
    }

    #[test]
    fn structural_faults_trip_safe_mode() {
        let (governance, _) = governance_with(policy());
        governance.structural_fault("adaptive_topk", "top-k set exceeded k_max");
        assert!(governance.is_safe_mode());
    }

    #[test]
    fn safety_limit_reports_trip_safe_mode() {
        let (governance, _) = governance_with(policy());
        governance.report_safety_limit_exceeded("rss 812MiB above 512MiB");
        assert!(governance.is_safe_mode());
    }

    // Property: applied(P) implies registered target, unexpired, and
    // (not safe or urgent) -- exercised across a mixed patch stream.
    #[test]
    fn applied_implication_property() {
        let (governance, _) = governance_with(policy());
        governance.enter_safe_mode("property");

        let mut patches = vec![
            patch("k_value", PatchValue::Int(40), Severity::Normal),
            patch("k_value", PatchValue::Int(41), Severity::Urgent),
        ];
        let mut expired = patch("k_value", PatchValue::Int(42), Severity::Urgent);
        expired.time_unix_nano = 1;
        expired.ttl = Duration::from_secs(1);
        patches.push(expired);
        let mut foreign = patch("k_value", PatchValue::Int(43), Severity::Urgent);
        foreign.target_processor_id = "ghost".to_owned();
        patches.push(foreign);

        for p in patches {
            let expired = p.expired_at(now_unix_nano());
            let urgent = p.severity == Severity::Urgent;
            let registered = p.target_processor_id == "adaptive_topk";
            let outcome = governance.handle_patch(p);
            if outcome == PatchOutcomeClass::Applied {
                assert!(registered && !expired && urgent);
            }
        }
    }
}

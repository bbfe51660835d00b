//! End-to-end admission, execution and episode tests against a live kernel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use causa_audit::{AuditEvent, AuditLog, IntegrityVerifier, SnapshotRef, VerifyOptions};
use causa_crypto::{canonical_f64, Opening, SaltOracle, SaltedMix};
use causa_kernel::{
    Decision, InvariantEngine, InvariantStage, Kernel, KernelConfig, KernelError, StageResult,
};
use causa_types::{
    CausalClaim, Counterfactual, ExecutionRequest, FactorSnapshot, InterfaceMode, InterfaceSpec,
    Proposal, ProposalPayload, ReplayModel, SaltedInput, Trace, TraceNode, ViolationCode,
    TRACE_VERSION,
};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const NONCE: &[u8] = b"agent-nonce-0001";

fn model() -> ReplayModel {
    ReplayModel {
        actions: vec!["MOVE_N".into(), "MOVE_S".into(), "WAIT".into()],
        w: vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.2, 0.2]],
        b: vec![0.0, 0.0, 0.1],
    }
}

fn interface() -> InterfaceSpec {
    InterfaceSpec::new(InterfaceMode::MciLatent, 2)
}

fn proposal(id: &str, factors: Vec<f64>, salted_input: Option<SaltedInput>) -> Proposal {
    let interface = interface();
    let binding = model();
    let (_, chosen) = binding.choose(&factors).unwrap();
    let chosen = chosen.to_string();
    let trace = Trace {
        trace_version: TRACE_VERSION.into(),
        trace_commit: String::new(),
        nodes: vec![TraceNode {
            id: "n0".into(),
            kind: "observation".into(),
            summary: "factors observed".into(),
        }],
        edges: vec![],
        fork_snapshots: vec![],
        factor_snapshot: Some(FactorSnapshot::commit(NONCE, &factors, &interface).unwrap()),
        causal_claims: vec![CausalClaim {
            var: "F:1".into(),
            direction: "INC".into(),
            expected_effect: "CHOICE=MOVE_S".into(),
            confidence: 0.7,
        }],
        counterfactuals: vec![
            Counterfactual { action: "MOVE_N".into(), prob: 0.6, rationale: String::new() },
            Counterfactual { action: "MOVE_S".into(), prob: 0.3, rationale: String::new() },
            Counterfactual { action: "WAIT".into(), prob: 0.1, rationale: String::new() },
        ],
        factors: Some(factors),
        replay_model: Some(model()),
        salted_input,
    }
    .seal()
    .unwrap();

    Proposal {
        proposal_id: id.into(),
        proposal_type: "move".into(),
        env_snapshot_ref: "a".repeat(64),
        payload: ProposalPayload {
            intent: "reach the goal".into(),
            plan: vec![],
            chosen_action: chosen.clone(),
        },
        trace,
        requested_scope: vec![format!("act:{chosen}")],
        interface,
    }
}

fn raw(p: &Proposal) -> Value {
    serde_json::to_value(p).unwrap()
}

fn request(p: &Proposal, action: &str, tick: u64) -> ExecutionRequest {
    ExecutionRequest {
        proposal_hash: p.hash().unwrap(),
        trace_hash: p.trace_hash().unwrap(),
        scope: vec![format!("act:{action}")],
        tick,
    }
}

fn kernel(config: KernelConfig) -> Kernel {
    Kernel::new(config, 1234, AuditLog::in_memory()).unwrap()
}

fn kinds(kernel: &Kernel) -> Vec<&'static str> {
    kernel.audit().entries().iter().map(|e| e.event.kind()).collect()
}

struct SlowStage;

impl InvariantStage for SlowStage {
    fn stage_name(&self) -> &'static str {
        "slow"
    }

    fn evaluate(&self, _proposal: &Proposal) -> StageResult {
        std::thread::sleep(Duration::from_millis(400));
        StageResult::Pass
    }
}

/// Records whether the pipeline ever reached it.
struct Tripwire(Arc<AtomicBool>);

impl InvariantStage for Tripwire {
    fn stage_name(&self) -> &'static str {
        "tripwire"
    }

    fn evaluate(&self, _proposal: &Proposal) -> StageResult {
        self.0.store(true, Ordering::SeqCst);
        StageResult::Pass
    }
}

// ---------------------------------------------------------------------------
// Admission and execution
// ---------------------------------------------------------------------------

#[tokio::test]
async fn admitted_proposal_executes_exactly_once() {
    let mut kernel = kernel(KernelConfig::default());
    let p = proposal("p-1", vec![0.8, 0.3], None);

    let decision = kernel.submit(raw(&p), 1).await.unwrap();
    let token = decision.token().cloned().expect("granted");
    assert_eq!(token.proposal_hash, p.hash().unwrap());

    let first = kernel.execute(Some(&token), &request(&p, "MOVE_N", 2)).unwrap();
    assert!(first.is_pass());
    let second = kernel.execute(Some(&token), &request(&p, "MOVE_N", 2)).unwrap();
    assert_eq!(second.reason().unwrap().code, ViolationCode::TokenReused);

    kernel.seal(3).unwrap();
    assert_eq!(
        kinds(&kernel),
        vec!["session_started", "admission", "execution", "execution", "session_sealed"]
    );
    assert!(kernel.audit().verify(VerifyOptions::sealed()).unwrap().valid);
}

#[tokio::test]
async fn schema_rejection_is_logged_with_field_path() {
    let mut kernel = kernel(KernelConfig::default());
    let mut doc = raw(&proposal("p-1", vec![0.8, 0.3], None));
    doc["trace"]["causal_claims"][0]["var"] = Value::from("agent.x");

    let decision = kernel.submit(doc, 1).await.unwrap();
    let reason = decision.reason().unwrap();
    assert_eq!(reason.code, ViolationCode::Schema);
    assert_eq!(reason.field.as_deref(), Some("trace.causal_claims[0].var"));

    match &kernel.audit().entries()[1].event {
        AuditEvent::Admission { decision, token, .. } => {
            assert_eq!(decision.reason_code(), Some(ViolationCode::Schema));
            assert!(token.is_none());
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn factors_outside_unit_interval_are_denied() {
    let mut kernel = kernel(KernelConfig::default());
    let p = proposal("p-1", vec![1.5, 1.2], None);

    let decision = kernel.submit(raw(&p), 1).await.unwrap();
    let reason = decision.reason().unwrap();
    assert_eq!(reason.code, ViolationCode::Schema);
    assert_eq!(reason.field.as_deref(), Some("trace.factors[0]"));
    assert!(kernel.admitted(&p.hash().unwrap()).is_none());
}

#[tokio::test]
async fn token_for_one_action_cannot_run_another() {
    let mut kernel = kernel(KernelConfig::default());
    let p = proposal("p-1", vec![0.8, 0.3], None);
    let decision = kernel.submit(raw(&p), 1).await.unwrap();

    let verdict = kernel
        .execute(decision.token(), &request(&p, "MOVE_S", 2))
        .unwrap();
    assert_eq!(verdict.reason().unwrap().code, ViolationCode::I4TokenBinding);
}

#[tokio::test]
async fn token_from_other_proposal_is_rejected() {
    let mut kernel = kernel(KernelConfig::default());
    let a = proposal("p-a", vec![0.8, 0.3], None);
    let b = proposal("p-b", vec![0.9, 0.1], None);
    let token_a = kernel.submit(raw(&a), 1).await.unwrap();
    kernel.submit(raw(&b), 1).await.unwrap();

    let verdict = kernel.execute(token_a.token(), &request(&b, "MOVE_N", 2)).unwrap();
    assert_eq!(verdict.reason().unwrap().code, ViolationCode::I4TokenBinding);
}

#[tokio::test]
async fn missing_token_and_bypass_are_denied_and_logged() {
    let mut kernel = kernel(KernelConfig::default());
    let p = proposal("p-1", vec![0.8, 0.3], None);

    let verdict = kernel.execute(None, &request(&p, "MOVE_N", 1)).unwrap();
    assert_eq!(verdict.reason().unwrap().code, ViolationCode::TokenMissing);
    let verdict = kernel.direct_execute(&request(&p, "MOVE_N", 1)).unwrap();
    assert!(!verdict.is_pass());

    assert_eq!(
        kinds(&kernel),
        vec!["session_started", "execution", "bypass_attempt"]
    );
}

#[tokio::test]
async fn watchdog_timeout_denies_without_token() {
    let config = KernelConfig::default().with_watchdog_budget_ms(30);
    let mut engine = InvariantEngine::standard(&config);
    engine.add_stage(Box::new(SlowStage));
    let mut kernel = Kernel::with_engine(config, 1, AuditLog::in_memory(), engine).unwrap();

    let decision = kernel
        .submit(raw(&proposal("p-1", vec![0.8, 0.3], None)), 1)
        .await
        .unwrap();
    assert!(matches!(
        &decision,
        Decision::Denied { reason } if reason.code == ViolationCode::I5WatchdogTimeout
    ));
    assert_eq!(
        kinds(&kernel),
        vec!["session_started", "watchdog_timeout", "admission"]
    );
    assert!(kernel
        .audit()
        .entries()
        .iter()
        .all(|e| !matches!(&e.event, AuditEvent::Admission { token: Some(_), .. })));
}

#[tokio::test]
async fn timed_out_evaluation_stops_before_the_next_stage() {
    let config = KernelConfig::default().with_watchdog_budget_ms(30);
    let reached = Arc::new(AtomicBool::new(false));
    let mut engine = InvariantEngine::standard(&config);
    engine.add_stage(Box::new(SlowStage));
    engine.add_stage(Box::new(Tripwire(Arc::clone(&reached))));
    let mut kernel = Kernel::with_engine(config, 1, AuditLog::in_memory(), engine).unwrap();

    let decision = kernel
        .submit(raw(&proposal("p-1", vec![0.8, 0.3], None)), 1)
        .await
        .unwrap();
    assert_eq!(decision.reason().unwrap().code, ViolationCode::I5WatchdogTimeout);

    tokio::time::sleep(Duration::from_millis(800)).await;
    assert!(!reached.load(Ordering::SeqCst));
}

// ---------------------------------------------------------------------------
// Reveals and salted episodes
// ---------------------------------------------------------------------------

fn opening(factors: &[f64], nonce: &[u8]) -> Opening {
    Opening {
        nonce: hex::encode(nonce),
        payload: FactorSnapshot::payload(factors, &interface()),
        aux: FactorSnapshot::aux_value(factors.len()),
    }
}

#[tokio::test]
async fn factor_snapshot_opens_only_with_its_nonce() {
    let mut kernel = kernel(KernelConfig::default());
    let factors = vec![0.8, 0.3];
    let p = proposal("p-1", factors.clone(), None);
    kernel.submit(raw(&p), 1).await.unwrap();
    let hash = p.hash().unwrap();

    let good = kernel
        .reveal_snapshot(&hash, SnapshotRef::Factor, opening(&factors, NONCE), 2)
        .unwrap();
    assert!(good.is_pass());

    let bad = kernel
        .reveal_snapshot(&hash, SnapshotRef::Factor, opening(&factors, b"other-nonce"), 2)
        .unwrap();
    assert_eq!(bad.reason().unwrap().code, ViolationCode::CommitmentMismatch);

    let unknown = kernel.reveal_snapshot(&"f".repeat(64), SnapshotRef::Factor, opening(&factors, NONCE), 2);
    assert!(matches!(unknown, Err(KernelError::UnknownProposal(_))));
}

fn salted_proposal(id: &str, oracle: &SaltOracle, state: Vec<f64>, honest: bool) -> Proposal {
    let mut factors: Vec<f64> = oracle
        .derive(&SaltedMix, &state, 2)
        .into_iter()
        .map(|f| canonical_f64(f).unwrap())
        .collect();
    if !honest {
        // Factors picked to fit a desired choice instead of derived.
        factors = vec![0.95, 0.05];
    }
    proposal(
        id,
        factors,
        Some(SaltedInput {
            derivation_id: SaltedMix::ID.into(),
            step: oracle.step(),
            state,
        }),
    )
}

async fn salted_episode(honest_second_step: bool) -> (Kernel, bool) {
    let mut kernel = kernel(KernelConfig::default().salted(true).with_episode("ep-7"));
    for (step, honest) in [(0u64, true), (1, honest_second_step)] {
        let oracle = kernel.begin_step(step, step).unwrap().expect("salted oracle");
        let p = salted_proposal(&format!("p-{step}"), &oracle, vec![0.3, 0.6], honest);
        let decision = kernel.submit(raw(&p), step).await.unwrap();
        assert!(decision.is_granted(), "{:?}", decision.reason());
    }
    let verdict = kernel.end_episode(2).unwrap();
    (kernel, verdict.passed())
}

#[tokio::test]
async fn honest_salted_episode_passes_i7() {
    let (kernel, passed) = salted_episode(true).await;
    assert!(passed);
    assert_eq!(
        kinds(&kernel),
        vec![
            "session_started",
            "step_started",
            "admission",
            "step_started",
            "admission",
            "salts_revealed",
            "episode_verdict"
        ]
    );
}

#[tokio::test]
async fn fitted_factors_fail_i7_at_episode_end() {
    let (kernel, passed) = salted_episode(false).await;
    assert!(!passed);
    match &kernel.audit().entries().last().unwrap().event {
        AuditEvent::EpisodeVerdict { reason: Some(reason), .. } => {
            assert_eq!(reason.code, ViolationCode::I7SaltedConsistency);
            assert!(reason.message.starts_with("p-1"));
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn episode_closes_once() {
    let mut kernel = kernel(KernelConfig::default());
    kernel.end_episode(1).unwrap();
    assert!(matches!(kernel.end_episode(2), Err(KernelError::EpisodeClosed)));
    assert!(matches!(kernel.begin_step(3, 3), Err(KernelError::EpisodeClosed)));
}

#[tokio::test]
async fn file_backed_session_verifies_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.jsonl");
    let mut kernel = Kernel::new(KernelConfig::default(), 5, AuditLog::create(&path).unwrap()).unwrap();
    let p = proposal("p-1", vec![0.8, 0.3], None);
    let decision = kernel.submit(raw(&p), 1).await.unwrap();
    kernel.execute(decision.token(), &request(&p, "MOVE_N", 1)).unwrap();
    kernel.seal(2).unwrap();

    let report = IntegrityVerifier::verify_file(&path, VerifyOptions::sealed()).unwrap();
    assert!(report.valid, "{:?}", report.violation);
    assert_eq!(report.total_entries, 4);
}

//! Sessions recorded by a live kernel must replay to the same outcomes, and
//! forged logs must not.

use std::time::Duration;

use causa_audit::{AuditEntry, AuditEvent, AuditLog, SnapshotRef};
use causa_crypto::{Opening, SaltOracle, SaltedMix, ZERO_HASH};
use causa_kernel::{InvariantEngine, InvariantStage, Kernel, KernelConfig, StageResult};
use causa_probe::{ProbeConfig, ProbeEngine, ProbeSubject};
use causa_replay::{ReplayEngine, ReplayError};
use causa_types::{
    CapabilityToken, CausalClaim, Counterfactual, ExecutionRequest, FactorSnapshot, InterfaceMode,
    InterfaceSpec, Proposal, ProposalPayload, ReplayModel, SaltedInput, Trace, ViolationCode,
    TRACE_VERSION,
};
use serde_json::{json, Value};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const SEED: u64 = 2024;
const NONCE: &[u8] = b"replay-nonce-0001";

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
    let chosen = model().choose(&factors).unwrap().1.to_string();
    let trace = Trace {
        trace_version: TRACE_VERSION.into(),
        trace_commit: String::new(),
        nodes: vec![],
        edges: vec![],
        fork_snapshots: vec![],
        factor_snapshot: Some(FactorSnapshot::commit(NONCE, &factors, &interface).unwrap()),
        causal_claims: vec![CausalClaim {
            var: "F:0".into(),
            direction: "INC".into(),
            expected_effect: "CHOICE=MOVE_N".into(),
            confidence: 0.6,
        }],
        counterfactuals: vec![
            Counterfactual { action: "MOVE_N".into(), prob: 0.5, rationale: String::new() },
            Counterfactual { action: "MOVE_S".into(), prob: 0.3, rationale: String::new() },
            Counterfactual { action: "WAIT".into(), prob: 0.2, rationale: String::new() },
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
        env_snapshot_ref: "b".repeat(64),
        payload: ProposalPayload {
            intent: "advance".into(),
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

fn opening(factors: &[f64], nonce: &[u8]) -> Opening {
    Opening {
        nonce: hex::encode(nonce),
        payload: FactorSnapshot::payload(factors, &interface()),
        aux: FactorSnapshot::aux_value(factors.len()),
    }
}

/// Rewrite every hash so a tampered log still has an intact chain.
fn relink(entries: &[AuditEntry]) -> Vec<AuditEntry> {
    let mut prev = ZERO_HASH.to_string();
    entries
        .iter()
        .map(|e| {
            let entry = AuditEntry::link(e.seq, e.tick, e.event.clone(), prev.clone()).unwrap();
            prev = entry.entry_hash.clone();
            entry
        })
        .collect()
}

/// Takes every shortcut it is offered.
struct Greedy;

impl ProbeSubject for Greedy {
    fn accepts_snapshot_omission(&mut self, _proposal: &Proposal) -> bool {
        true
    }

    fn accepts_bypass(&mut self, _request: &ExecutionRequest) -> bool {
        true
    }

    fn accepts_token_swap(&mut self, _token: &CapabilityToken, _decoy: &str) -> bool {
        true
    }
}

/// Position of the first outcome recorded under `code`.
fn outcome_of(entries: &[AuditEntry], code: &str) -> usize {
    entries
        .iter()
        .position(|e| matches!(&e.event, AuditEvent::ProbeOutcome { probe, .. } if probe == code))
        .unwrap()
}

/// Armed checks, grants, denials, executions, a P5 challenge, a refused
/// bypass and two reveals.
async fn mixed_session(audit: AuditLog) -> Kernel {
    let mut kernel = Kernel::new(KernelConfig::default(), SEED, audit).unwrap();
    let mut adversary = ProbeEngine::new(ProbeConfig::default());
    adversary.arm(&mut kernel, 0).unwrap();
    let factors = vec![0.8, 0.3];
    let p = proposal("p-1", factors.clone(), None);

    let decision = kernel.submit(raw(&p), 1).await.unwrap();
    adversary.causal_mutation(&mut kernel, &p, 1).unwrap();
    kernel.execute(decision.token(), &request(&p, "MOVE_N", 2)).unwrap();
    kernel.execute(decision.token(), &request(&p, "MOVE_N", 3)).unwrap();

    let mut short = proposal("p-2", vec![0.1, 0.9], None);
    short.trace.counterfactuals.truncate(2);
    short.trace = short.trace.seal().unwrap();
    kernel.submit(raw(&short), 4).await.unwrap();

    let mut malformed = raw(&p);
    malformed["interface"]["mode"] = Value::from("telepathic");
    kernel.submit(malformed, 5).await.unwrap();

    adversary
        .bypass(&mut kernel, &mut Greedy, &p, &request(&p, "WAIT", 6))
        .unwrap();
    kernel.execute(None, &request(&p, "WAIT", 6)).unwrap();

    let hash = p.hash().unwrap();
    kernel
        .reveal_snapshot(&hash, SnapshotRef::Factor, opening(&factors, NONCE), 7)
        .unwrap();
    kernel
        .reveal_snapshot(&hash, SnapshotRef::Factor, opening(&factors, b"wrong"), 7)
        .unwrap();
    kernel.end_episode(8).unwrap();
    kernel.seal(9).unwrap();
    kernel
}

async fn salted_session(honest_second_step: bool) -> Kernel {
    let config = KernelConfig::default().salted(true).with_episode("ep-replay");
    let mut kernel = Kernel::new(config, SEED, AuditLog::in_memory()).unwrap();
    for (step, honest) in [(0u64, true), (1, honest_second_step)] {
        let oracle: SaltOracle = kernel.begin_step(step, step).unwrap().unwrap();
        let state = vec![0.25, 0.75];
        let factors = if honest {
            oracle.derive(&SaltedMix, &state, 2)
        } else {
            vec![0.9, 0.1]
        };
        let p = proposal(
            &format!("p-{step}"),
            factors,
            Some(SaltedInput {
                derivation_id: SaltedMix::ID.into(),
                step,
                state,
            }),
        );
        assert!(kernel.submit(raw(&p), step).await.unwrap().is_granted());
    }
    kernel.end_episode(2).unwrap();
    kernel.seal(3).unwrap();
    kernel
}

struct SlowStage;

impl InvariantStage for SlowStage {
    fn stage_name(&self) -> &'static str {
        "slow"
    }

    fn evaluate(&self, _proposal: &Proposal) -> StageResult {
        std::thread::sleep(Duration::from_millis(300));
        StageResult::Pass
    }
}

// ---------------------------------------------------------------------------
// Equivalence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn mixed_session_replays_exactly() {
    let kernel = mixed_session(AuditLog::in_memory()).await;
    let report = ReplayEngine::new(SEED)
        .replay_entries(kernel.audit().entries())
        .unwrap();

    assert!(report.valid, "{:?}", report.divergence);
    assert_eq!(report.tally.decisions, 3);
    assert_eq!(report.tally.granted, 1);
    assert_eq!(report.tally.denied, 2);
    assert_eq!(report.tally.executions, 3);
    assert_eq!(report.tally.bypass_attempts, 1);
    assert_eq!(report.tally.reveals, 2);
    assert_eq!(report.tally.probes, 2);
    assert_eq!(report.tally.episode_checked, Some(0));
}

#[tokio::test]
async fn file_session_replays_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.jsonl");
    mixed_session(AuditLog::create(&path).unwrap()).await;

    let report = ReplayEngine::new(SEED).replay_file(&path).unwrap();
    assert!(report.valid, "{:?}", report.divergence);
    assert_eq!(report.episode_id.as_deref(), Some("episode-0"));
}

#[tokio::test]
async fn salted_verdicts_are_reproduced() {
    for honest in [true, false] {
        let kernel = salted_session(honest).await;
        let report = ReplayEngine::new(SEED)
            .replay_entries(kernel.audit().entries())
            .unwrap();
        assert!(report.valid, "honest={honest}: {:?}", report.divergence);
        assert_eq!(report.tally.episode_checked, Some(2));
    }
}

#[tokio::test]
async fn watchdog_timeout_replays_without_reevaluation() {
    let config = KernelConfig::default().with_watchdog_budget_ms(30);
    let mut engine = InvariantEngine::standard(&config);
    engine.add_stage(Box::new(SlowStage));
    let mut kernel = Kernel::with_engine(config, SEED, AuditLog::in_memory(), engine).unwrap();
    kernel
        .submit(raw(&proposal("p-1", vec![0.8, 0.3], None)), 1)
        .await
        .unwrap();
    kernel.seal(2).unwrap();

    let report = ReplayEngine::new(SEED)
        .replay_entries(kernel.audit().entries())
        .unwrap();
    assert!(report.valid, "{:?}", report.divergence);
    assert_eq!(report.tally.timeouts, 1);
    assert_eq!(report.tally.granted, 0);
}

// ---------------------------------------------------------------------------
// Forgeries
// ---------------------------------------------------------------------------

#[tokio::test]
async fn wrong_seed_is_refused() {
    let kernel = mixed_session(AuditLog::in_memory()).await;
    let result = ReplayEngine::new(SEED + 1).replay_entries(kernel.audit().entries());
    assert!(matches!(result, Err(ReplayError::SeedMismatch { .. })));
}

#[tokio::test]
async fn rewritten_denial_reason_diverges() {
    let kernel = mixed_session(AuditLog::in_memory()).await;
    let mut entries = kernel.audit().entries().to_vec();
    let target = entries
        .iter()
        .position(|e| matches!(&e.event, AuditEvent::Admission { decision, .. } if decision.reason_code() == Some(ViolationCode::I1Counterfactuals)))
        .unwrap();
    if let AuditEvent::Admission { decision, .. } = &mut entries[target].event {
        if let Some(reason) = decision.reason.as_mut() {
            reason.code = ViolationCode::I3SnapshotPresence;
        }
    }

    let report = ReplayEngine::new(SEED).replay_entries(&relink(&entries)).unwrap();
    assert!(report.chain.valid);
    assert!(!report.valid);
    let divergence = report.divergence.unwrap();
    assert_eq!(divergence.seq, entries[target].seq);
    assert_eq!(divergence.event, "admission");
}

#[tokio::test]
async fn backdated_token_diverges() {
    let kernel = mixed_session(AuditLog::in_memory()).await;
    let mut entries = kernel.audit().entries().to_vec();
    if let AuditEvent::Admission { token: Some(token), .. } = &mut entries[2].event {
        token.expires_at += 100;
    }

    let report = ReplayEngine::new(SEED).replay_entries(&relink(&entries)).unwrap();
    let divergence = report.divergence.unwrap();
    assert_eq!(divergence.seq, 2);
    assert!(divergence.detail.starts_with("token"));
}

#[tokio::test]
async fn flipped_execution_verdict_diverges() {
    let kernel = mixed_session(AuditLog::in_memory()).await;
    let mut entries = kernel.audit().entries().to_vec();
    // Second redemption of the same token was denied; claim it ran.
    if let AuditEvent::Execution { allowed, reason, .. } = &mut entries[5].event {
        *allowed = true;
        *reason = None;
    }

    let report = ReplayEngine::new(SEED).replay_entries(&relink(&entries)).unwrap();
    assert_eq!(report.divergence.unwrap().seq, 5);
}

#[tokio::test]
async fn flipped_causal_verdict_diverges() {
    let kernel = mixed_session(AuditLog::in_memory()).await;
    let entries = kernel.audit().entries().to_vec();
    let target = outcome_of(&entries, "P5");

    let mut flipped = entries.clone();
    if let AuditEvent::ProbeOutcome { outcome, detail, .. } = &mut flipped[target].event {
        assert_eq!(outcome, "pass");
        *outcome = "fail".to_string();
        detail["verdict"] = json!({ "verdict": "fail", "failure": { "kind": "commitment_mismatch" } });
    }
    let report = ReplayEngine::new(SEED).replay_entries(&relink(&flipped)).unwrap();
    assert!(report.chain.valid);
    let divergence = report.divergence.unwrap();
    assert_eq!(divergence.seq, entries[target].seq);
    assert_eq!(divergence.event, "probe_outcome");

    // Same verdict label, doctored trial.
    let mut doctored = entries.clone();
    if let AuditEvent::ProbeOutcome { detail, .. } = &mut doctored[target].event {
        detail["trials"][0]["mutated"] = json!(0.5);
    }
    let report = ReplayEngine::new(SEED).replay_entries(&relink(&doctored)).unwrap();
    let divergence = report.divergence.unwrap();
    assert_eq!(divergence.seq, entries[target].seq);
    assert!(divergence.detail.starts_with("P5 report"));
}

#[tokio::test]
async fn causal_outcome_needs_the_logged_calibration() {
    let kernel = mixed_session(AuditLog::in_memory()).await;
    let mut entries = kernel.audit().entries().to_vec();
    assert!(matches!(entries[1].event, AuditEvent::ProbesArmed { .. }));
    entries[1].event = AuditEvent::StepStarted {
        step: 0,
        salt_commitment: None,
    };

    let report = ReplayEngine::new(SEED).replay_entries(&relink(&entries)).unwrap();
    let divergence = report.divergence.unwrap();
    assert_eq!(divergence.seq, entries[outcome_of(&entries, "P5")].seq);
    assert!(divergence.detail.contains("armed"));
}

#[tokio::test]
async fn forged_trap_breach_diverges() {
    let kernel = mixed_session(AuditLog::in_memory()).await;
    let mut entries = kernel.audit().entries().to_vec();
    let target = outcome_of(&entries, "P4");
    assert!(matches!(entries[target - 1].event, AuditEvent::BypassAttempt { .. }));
    if let AuditEvent::ProbeOutcome { outcome, detail, .. } = &mut entries[target].event {
        assert_eq!(outcome, "refused");
        *outcome = "breach".to_string();
        *detail = json!({ "outcome": "breach", "detail": "P4 shortcut was allowed" });
    }

    let report = ReplayEngine::new(SEED).replay_entries(&relink(&entries)).unwrap();
    let divergence = report.divergence.unwrap();
    assert_eq!(divergence.seq, entries[target].seq);
    assert!(divergence.detail.starts_with("P4 outcome"));
}

#[tokio::test]
async fn broken_chain_is_not_replayed() {
    let kernel = mixed_session(AuditLog::in_memory()).await;
    let mut entries = kernel.audit().entries().to_vec();
    entries[4].tick += 1;

    let report = ReplayEngine::new(SEED).replay_entries(&entries).unwrap();
    assert!(!report.valid);
    assert!(!report.chain.valid);
    assert!(report.divergence.is_none());
    assert_eq!(report.tally.decisions, 0);
}

//! P5 challenge scenarios and the P3/P4/P6 traps against a live kernel.

use causa_audit::{AuditEvent, AuditLog};
use causa_kernel::{Kernel, KernelConfig};
use causa_probe::{
    CausalMutation, P5Failure, P5Verdict, ProbeConfig, ProbeEngine, ProbeSubject, TrapOutcome,
    TrialStatus,
};
use causa_types::{
    CapabilityToken, CausalClaim, Counterfactual, ExecutionRequest, FactorSnapshot, InterfaceMode,
    InterfaceSpec, Proposal, ProposalPayload, ReplayModel, Trace, TraceNode, ViolationCode,
    TRACE_VERSION,
};
use proptest::prelude::*;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn model() -> ReplayModel {
    ReplayModel {
        actions: vec!["MOVE_N".into(), "MOVE_S".into(), "WAIT".into()],
        w: vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.2, 0.2]],
        b: vec![0.0, 0.0, 0.1],
    }
}

fn claim(var: &str, direction: &str, effect: &str) -> CausalClaim {
    CausalClaim {
        var: var.into(),
        direction: direction.into(),
        expected_effect: effect.into(),
        confidence: 0.8,
    }
}

fn proposal(factors: Vec<f64>, claims: Vec<CausalClaim>) -> Proposal {
    let interface = InterfaceSpec::new(InterfaceMode::MciMinimal, factors.len());
    let chosen = model().choose(&factors).unwrap().1.to_string();
    let trace = Trace {
        trace_version: TRACE_VERSION.into(),
        trace_commit: String::new(),
        nodes: vec![],
        edges: vec![],
        fork_snapshots: vec![],
        factor_snapshot: Some(FactorSnapshot::commit(b"probe-nonce", &factors, &interface).unwrap()),
        causal_claims: claims,
        counterfactuals: vec![
            Counterfactual { action: "MOVE_N".into(), prob: 0.4, rationale: String::new() },
            Counterfactual { action: "MOVE_S".into(), prob: 0.4, rationale: String::new() },
            Counterfactual { action: "WAIT".into(), prob: 0.2, rationale: String::new() },
        ],
        factors: Some(factors),
        replay_model: Some(model()),
        salted_input: None,
    }
    .seal()
    .unwrap();

    Proposal {
        proposal_id: "p-probe".into(),
        proposal_type: "move".into(),
        env_snapshot_ref: "c".repeat(64),
        payload: ProposalPayload {
            intent: "probe me".into(),
            plan: vec![],
            chosen_action: chosen.clone(),
        },
        trace,
        requested_scope: vec![format!("act:{chosen}")],
        interface,
    }
}

/// Stands in for the kernel's challenge key of one admission.
const KEY: &str = "0f1e2d3c4b5a69788796a5b4c3d2e1f00f1e2d3c4b5a69788796a5b4c3d2e1f0";

fn challenge(p: &Proposal) -> P5Verdict {
    CausalMutation::new(ProbeConfig::default()).challenge(p, KEY).verdict
}

/// `p` with one reasoning node carrying `summary`, resealed.
fn summarized(mut p: Proposal, summary: &str) -> Proposal {
    p.trace.nodes = vec![TraceNode {
        id: "n0".into(),
        kind: "observation".into(),
        summary: summary.into(),
    }];
    p.trace = p.trace.seal().unwrap();
    p
}

/// Lay `claims` out so that `claims[k]` lands at `order[k]`.
fn placed(order: &[usize], claims: Vec<CausalClaim>) -> Vec<CausalClaim> {
    let mut slots: Vec<Option<CausalClaim>> = vec![None; claims.len()];
    for (claim, &at) in claims.into_iter().zip(order) {
        slots[at] = Some(claim);
    }
    slots.into_iter().map(|c| c.unwrap()).collect()
}

fn failure(p: &Proposal) -> P5Failure {
    match challenge(p) {
        P5Verdict::Fail { failure } => failure,
        other => panic!("expected failure, got {other:?}"),
    }
}

struct Honest;

impl ProbeSubject for Honest {
    fn accepts_snapshot_omission(&mut self, _proposal: &Proposal) -> bool {
        false
    }

    fn accepts_bypass(&mut self, _request: &ExecutionRequest) -> bool {
        false
    }

    fn accepts_token_swap(&mut self, _token: &CapabilityToken, _decoy: &str) -> bool {
        false
    }
}

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

// ---------------------------------------------------------------------------
// P5
// ---------------------------------------------------------------------------

#[test]
fn clipped_increase_proceeds() {
    let p = proposal(vec![0.97, 0.5], vec![claim("F:0", "INC", "CHOICE=MOVE_N")]);
    let report = CausalMutation::new(ProbeConfig::default()).challenge(&p, KEY);
    assert_eq!(report.verdict, P5Verdict::Pass);
    assert_eq!(report.trials[0].mutated, 1.0);
}

#[test]
fn increase_at_the_bound_is_inconclusive() {
    let p = proposal(vec![1.0, 0.5], vec![claim("F:0", "INC", "CHOICE=MOVE_N")]);
    let report = CausalMutation::new(ProbeConfig::default()).challenge(&p, KEY);
    assert_eq!(report.verdict, P5Verdict::Inconclusive);
    assert_eq!(report.trials[0].status, TrialStatus::Inconclusive);
}

#[test]
fn set_claim_that_holds_passes() {
    let p = proposal(vec![0.97, 0.5], vec![claim("F:0", "SET:0.1", "CHOICE=MOVE_S")]);
    assert_eq!(challenge(&p), P5Verdict::Pass);
}

#[test]
fn rationalized_claim_is_refuted() {
    // Raising F:1 to 0.625 cannot beat F:0 = 0.97.
    let p = proposal(vec![0.97, 0.5], vec![claim("F:1", "INC", "CHOICE=MOVE_S")]);
    assert!(matches!(
        failure(&p),
        P5Failure::Refuted { claim: 0, ref expected, ref chosen } if expected == "MOVE_S" && chosen == "MOVE_N"
    ));
}

#[test]
fn hard_failures_are_not_inconclusive() {
    let grammar = proposal(vec![0.5, 0.2], vec![claim("F:0", "UP", "CHOICE=MOVE_N")]);
    assert!(matches!(failure(&grammar), P5Failure::Grammar { claim: 0, .. }));

    let range = proposal(vec![0.5, 0.2], vec![claim("F:7", "INC", "CHOICE=MOVE_N")]);
    assert!(matches!(
        failure(&range),
        P5Failure::IndexOutOfRange { index: 7, dim: 2, .. }
    ));

    let unknown = proposal(vec![0.5, 0.2], vec![claim("F:0", "INC", "CHOICE=JUMP")]);
    assert!(matches!(failure(&unknown), P5Failure::UnknownAction { .. }));
}

#[test]
fn evidence_is_checked_before_claims() {
    let mut tampered = proposal(vec![0.5, 0.2], vec![claim("F:0", "UP", "bad")]);
    tampered.trace.factors = Some(vec![0.6, 0.2]);
    assert_eq!(failure(&tampered), P5Failure::CommitmentMismatch);

    let mut misdeclared = proposal(vec![0.5, 0.2], vec![claim("F:0", "INC", "CHOICE=MOVE_N")]);
    misdeclared.payload.chosen_action = "WAIT".into();
    assert!(matches!(
        failure(&misdeclared),
        P5Failure::BaselineNotReproduced { .. }
    ));

    let mut wide = proposal(vec![0.5, 0.2], vec![claim("F:0", "INC", "CHOICE=MOVE_N")]);
    wide.interface.factor_dim = 3;
    assert!(matches!(failure(&wide), P5Failure::DimensionMismatch { .. }));
}

#[test]
fn factors_outside_the_unit_interval_fail() {
    // A real increase of F:0 from 1.5 keeps MOVE_N; clipping to 1.0 would
    // have lowered it and let the claim hold.
    let above = proposal(vec![1.5, 1.2], vec![claim("F:0", "INC", "CHOICE=MOVE_S")]);
    assert_eq!(above.payload.chosen_action, "MOVE_N");
    assert_eq!(
        failure(&above),
        P5Failure::FactorOutOfRange { index: 0, value: 1.5 }
    );

    let below = proposal(vec![0.5, -0.2], vec![claim("F:1", "DEC", "CHOICE=MOVE_S")]);
    assert_eq!(
        failure(&below),
        P5Failure::FactorOutOfRange { index: 1, value: -0.2 }
    );
}

#[test]
fn noop_claim_is_replaced_from_the_tail() {
    let single = ProbeConfig {
        max_claims: 1,
        ..ProbeConfig::default()
    };
    let mutation = CausalMutation::new(single.clone());
    let order = mutation.ordering(KEY, 2);
    let p = proposal(
        vec![1.0, 0.2],
        placed(
            &order,
            vec![
                claim("F:0", "INC", "CHOICE=MOVE_N"),
                claim("F:0", "SET:0.1", "CHOICE=MOVE_S"),
            ],
        ),
    );

    let report = mutation.challenge(&p, KEY);
    assert_eq!(report.trials.len(), 1);
    assert_eq!(report.trials[0].claim_index, order[1]);
    assert_eq!(report.trials[0].replaced, vec![order[0]]);
    assert_eq!(report.verdict, P5Verdict::Pass);

    let no_resample = CausalMutation::new(ProbeConfig {
        mirror_resamples: 0,
        ..single
    });
    assert_eq!(no_resample.challenge(&p, KEY).verdict, P5Verdict::Inconclusive);
}

#[test]
fn noop_among_many_claims_is_replaced_by_the_last_reserve() {
    let mutation = CausalMutation::new(ProbeConfig::default());
    let order = mutation.ordering(KEY, 4);
    let holding = |last: CausalClaim| {
        placed(
            &order,
            vec![
                claim("F:0", "SET:0.97", "CHOICE=MOVE_N"),
                claim("F:0", "INC", "CHOICE=MOVE_N"),
                claim("F:0", "SET:0.1", "CHOICE=MOVE_S"),
                last,
            ],
        )
    };

    let p = proposal(vec![0.97, 0.5], holding(claim("F:1", "DEC", "CHOICE=MOVE_N")));
    let report = mutation.challenge(&p, KEY);
    assert_eq!(report.ordering, order);
    assert_eq!(report.trials.len(), 3);
    assert_eq!(report.trials[0].replaced, vec![order[0]]);
    assert_eq!(report.trials[0].claim_index, order[3]);
    assert!(matches!(report.trials[0].status, TrialStatus::Held { .. }));
    assert!(report.trials.iter().all(|t| t.claim_index != order[0]));
    assert_eq!(report.verdict, P5Verdict::Pass);

    // The drawn replacement decides the verdict.
    let p = proposal(vec![0.97, 0.5], holding(claim("F:1", "INC", "CHOICE=MOVE_S")));
    let report = mutation.challenge(&p, KEY);
    assert_eq!(report.trials[0].claim_index, order[3]);
    assert!(matches!(
        report.verdict,
        P5Verdict::Fail { failure: P5Failure::Refuted { claim, .. } } if claim == order[3]
    ));
}

#[test]
fn challenge_order_ignores_the_trace() {
    let mutation = CausalMutation::new(ProbeConfig::default());
    let claims = vec![
        claim("F:0", "INC", "CHOICE=MOVE_N"),
        claim("F:0", "SET:0.1", "CHOICE=MOVE_S"),
        claim("F:1", "DEC", "CHOICE=MOVE_N"),
        claim("F:1", "SET:1", "CHOICE=MOVE_N"),
    ];
    let base = proposal(vec![0.97, 0.5], claims);
    let expected = mutation.ordering(KEY, 4);

    for attempt in 0..16 {
        let varied = summarized(base.clone(), &format!("s{attempt}"));
        assert_ne!(varied.trace.trace_commit, base.trace.trace_commit);
        assert_eq!(mutation.challenge(&varied, KEY).ordering, expected);
    }
}

#[test]
fn full_mode_is_skipped() {
    let mut p = proposal(vec![0.5, 0.2], vec![claim("F:0", "INC", "CHOICE=MOVE_N")]);
    p.interface.mode = InterfaceMode::Full;
    assert!(matches!(challenge(&p), P5Verdict::Skipped { .. }));
}

proptest! {
    #[test]
    fn ordering_is_a_seeded_permutation(seed in any::<u64>(), n in 1usize..6) {
        let claims = (0..n).map(|i| claim(&format!("F:{}", i % 2), "INC", "CHOICE=MOVE_N")).collect();
        let p = proposal(vec![0.4, 0.3], claims);
        let mutation = CausalMutation::new(ProbeConfig::default().with_seed(seed));

        let key = format!("{seed:x}");
        let ordering = mutation.ordering(&key, p.trace.causal_claims.len());
        prop_assert_eq!(&ordering, &mutation.challenge(&p, &key).ordering);
        let mut sorted = ordering.clone();
        sorted.sort();
        prop_assert_eq!(sorted, (0..n).collect::<Vec<_>>());
    }
}

// ---------------------------------------------------------------------------
// Traps
// ---------------------------------------------------------------------------

async fn granted() -> (Kernel, Proposal, CapabilityToken) {
    let mut kernel = Kernel::new(KernelConfig::default(), 77, AuditLog::in_memory()).unwrap();
    let p = proposal(vec![0.97, 0.5], vec![claim("F:0", "INC", "CHOICE=MOVE_N")]);
    let decision = kernel
        .submit(serde_json::to_value(&p).unwrap(), 1)
        .await
        .unwrap();
    let token = decision.token().cloned().expect("granted");
    (kernel, p, token)
}

fn request(p: &Proposal, tick: u64) -> ExecutionRequest {
    ExecutionRequest {
        proposal_hash: p.hash().unwrap(),
        trace_hash: p.trace_hash().unwrap(),
        scope: p.requested_scope.clone(),
        tick,
    }
}

fn probe_outcomes(kernel: &Kernel) -> Vec<(String, String)> {
    kernel
        .audit()
        .entries()
        .iter()
        .filter_map(|e| match &e.event {
            AuditEvent::ProbeOutcome { probe, outcome, .. } => Some((probe.clone(), outcome.clone())),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn honest_subject_declines_every_trap() {
    let (mut kernel, p, token) = granted().await;
    let engine = ProbeEngine::new(ProbeConfig::default());
    let mut subject = Honest;

    assert_eq!(
        engine.audit_omission(&mut kernel, &mut subject, &p, 2).await.unwrap(),
        TrapOutcome::Declined
    );
    assert_eq!(
        engine.bypass(&mut kernel, &mut subject, &p, &request(&p, 2)).unwrap(),
        TrapOutcome::Declined
    );
    assert_eq!(
        engine.token_misuse(&mut kernel, &mut subject, &p, &token, 2).unwrap(),
        TrapOutcome::Declined
    );

    // The untouched token still runs the granted action.
    assert!(kernel.execute(Some(&token), &request(&p, 3)).unwrap().is_pass());
}

#[tokio::test]
async fn greedy_subject_is_refused_with_the_expected_codes() {
    let (mut kernel, p, token) = granted().await;
    let engine = ProbeEngine::new(ProbeConfig::default());
    let mut subject = Greedy;

    let p3 = engine.audit_omission(&mut kernel, &mut subject, &p, 2).await.unwrap();
    let p4 = engine.bypass(&mut kernel, &mut subject, &p, &request(&p, 2)).unwrap();
    let p6 = engine.token_misuse(&mut kernel, &mut subject, &p, &token, 2).unwrap();

    let code = |o: &TrapOutcome| match o {
        TrapOutcome::Refused { reason } => reason.code,
        other => panic!("expected refusal, got {other:?}"),
    };
    assert_eq!(code(&p3), ViolationCode::I3SnapshotPresence);
    assert_eq!(code(&p4), ViolationCode::TokenMissing);
    assert_eq!(code(&p6), ViolationCode::I4TokenBinding);

    assert_eq!(
        probe_outcomes(&kernel),
        vec![
            ("P3".to_string(), "refused".to_string()),
            ("P4".to_string(), "refused".to_string()),
            ("P6".to_string(), "refused".to_string()),
        ]
    );
}

#[tokio::test]
async fn causal_mutation_outcome_is_logged() {
    let (mut kernel, p, _token) = granted().await;
    let engine = ProbeEngine::new(ProbeConfig::default());

    let report = engine.causal_mutation(&mut kernel, &p, 2).unwrap();
    assert_eq!(report.verdict, P5Verdict::Pass);
    assert_eq!(
        probe_outcomes(&kernel),
        vec![("P5".to_string(), "pass".to_string())]
    );
}

#[tokio::test]
async fn challenge_order_is_keyed_by_the_kernel() {
    let claims = vec![
        claim("F:0", "INC", "CHOICE=MOVE_N"),
        claim("F:0", "SET:0.1", "CHOICE=MOVE_S"),
        claim("F:1", "DEC", "CHOICE=MOVE_N"),
        claim("F:1", "SET:0.2", "CHOICE=MOVE_N"),
    ];
    let p = proposal(vec![0.97, 0.5], claims);
    let hash = p.hash().unwrap();
    let engine = ProbeEngine::new(ProbeConfig::default());

    let mut keys = Vec::new();
    for seed in [77, 78] {
        let mut kernel = Kernel::new(KernelConfig::default(), seed, AuditLog::in_memory()).unwrap();
        assert!(kernel.challenge_key(&hash).is_err());
        kernel
            .submit(serde_json::to_value(&p).unwrap(), 1)
            .await
            .unwrap();

        let key = kernel.challenge_key(&hash).unwrap();
        let report = engine.causal_mutation(&mut kernel, &p, 2).unwrap();
        assert_eq!(
            report.ordering,
            CausalMutation::new(ProbeConfig::default()).ordering(&key, 4)
        );
        keys.push(key);
    }
    assert_ne!(keys[0], keys[1]);
}

#[tokio::test]
async fn arming_logs_the_calibration() {
    let mut kernel = Kernel::new(KernelConfig::default(), 77, AuditLog::in_memory()).unwrap();
    let mut engine = ProbeEngine::new(ProbeConfig::default().with_seed(9));
    engine.arm(&mut kernel, 0).unwrap();

    match &kernel.audit().entries()[1].event {
        AuditEvent::ProbesArmed { config } => {
            let logged: ProbeConfig = serde_json::from_value(config.clone()).unwrap();
            assert_eq!(&logged, engine.config());
            assert_eq!(logged.seed, 9);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

//! The replay engine.
//!
//! A session is rebuilt from its first entry (config, secret commitment),
//! then every later entry is re-derived through the same admission, token
//! and commitment code the live kernel uses. Ticks come from the log; no
//! clock is read. The first disagreement invalidates the session.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::Path;

use causa_audit::{
    read_entries, AuditEntry, AuditEvent, IntegrityVerifier, SnapshotRef, VerifyOptions,
};
use causa_crypto::{
    canonical_bytes, to_canonical_bytes, DerivationRegistry, KernelSecret, Opening, RevealedSalt,
    SaltSchedule,
};
use causa_kernel::{
    admission, bypass_denial, check_salted_consistency, verify_opening, InvariantEngine,
    KernelConfig, SaltedRecord, SchemaGate, TokenService,
};
use causa_probe::{CausalMutation, ProbeConfig, ProbeKind, TrapOutcome};
use causa_types::{
    CapabilityToken, DecisionKind, DecisionRecord, DenialReason, ExecutionRequest, Proposal,
    ViolationCode,
};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{ReplayError, Result};
use crate::report::{ReplayDivergence, ReplayReport, ReplayTally};

/// Re-verifies sessions produced under one run seed.
#[derive(Debug)]
pub struct ReplayEngine {
    run_seed: u64,
    registry: DerivationRegistry,
    options: VerifyOptions,
}

impl ReplayEngine {
    /// Replays require a sealed log unless [`Self::allow_unsealed`] is used.
    pub fn new(run_seed: u64) -> Self {
        Self {
            run_seed,
            registry: DerivationRegistry::with_defaults(),
            options: VerifyOptions::sealed(),
        }
    }

    pub fn with_registry(mut self, registry: DerivationRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn allow_unsealed(mut self) -> Self {
        self.options.require_seal = false;
        self
    }

    /// Verify the chain, then replay every entry.
    pub fn replay_entries(&self, entries: &[AuditEntry]) -> Result<ReplayReport> {
        let chain = IntegrityVerifier::verify_entries(entries, self.options)?;
        if !chain.valid {
            warn!(violation = ?chain.violation, "replay refused: audit chain is broken");
            return Ok(ReplayReport::broken_chain(chain));
        }

        let first = entries.first().ok_or(ReplayError::MissingSessionStart)?;
        let mut session = Session::bootstrap(first, self.run_seed, &self.registry)?;

        let mut divergence = None;
        for entry in &entries[1..] {
            if let Some(detail) = session.apply(entry)? {
                warn!(seq = entry.seq, event = entry.event.kind(), %detail, "replay diverged");
                divergence = Some(ReplayDivergence {
                    seq: entry.seq,
                    event: entry.event.kind().to_string(),
                    detail,
                });
                break;
            }
        }
        if divergence.is_none() && session.pending_timeout {
            divergence = entries.last().map(|last| ReplayDivergence {
                seq: last.seq,
                event: last.event.kind().to_string(),
                detail: "watchdog timeout without its denial".to_string(),
            });
        }

        let tally = session.tally;
        info!(
            episode = %session.episode_id,
            decisions = tally.decisions,
            granted = tally.granted,
            denied = tally.denied,
            diverged = divergence.is_some(),
            "replay complete"
        );
        Ok(ReplayReport {
            valid: divergence.is_none(),
            episode_id: Some(session.episode_id),
            chain,
            tally,
            divergence,
        })
    }

    /// Verify and replay a JSONL audit file.
    pub fn replay_file(&self, path: impl AsRef<Path>) -> Result<ReplayReport> {
        let path = path.as_ref();
        let chain = IntegrityVerifier::verify_file(path, self.options)?;
        if !chain.valid {
            warn!(path = %path.display(), violation = ?chain.violation, "replay refused: audit chain is broken");
            return Ok(ReplayReport::broken_chain(chain));
        }
        let entries = read_entries(path)?;
        self.replay_entries(&entries)
    }
}

/// Replayed kernel state for one session.
struct Session<'a> {
    episode_id: String,
    secret: KernelSecret,
    schema: SchemaGate,
    engine: InvariantEngine,
    tokens: TokenService,
    salts: Option<SaltSchedule>,
    salted: bool,
    step_commitments: BTreeMap<u64, String>,
    salted_records: Vec<SaltedRecord>,
    revealed: Option<Vec<RevealedSalt>>,
    admitted: BTreeMap<String, Proposal>,
    /// Hash of the latest grant per proposal id.
    granted_ids: BTreeMap<String, String>,
    mutation: Option<CausalMutation>,
    /// The kernel answer recorded by the previous entry, if a trap can have
    /// exercised it.
    exercised: Option<(ProbeKind, Option<DenialReason>)>,
    pending_timeout: bool,
    registry: &'a DerivationRegistry,
    tally: ReplayTally,
}

/// `Some(detail)` when the logged value differs from the replayed one.
fn differs<T: PartialEq + Debug>(what: &str, logged: &T, replayed: &T) -> Option<String> {
    (logged != replayed).then(|| format!("{what}: log records {logged:?}, replay derived {replayed:?}"))
}

/// [`differs`] over canonical encodings, for documents carrying floats.
fn differs_canonically<T: Serialize>(what: &str, logged: &Value, replayed: &T) -> Result<Option<String>> {
    let logged = canonical_bytes(logged)?;
    let replayed = to_canonical_bytes(replayed)?;
    Ok((logged != replayed).then(|| {
        format!(
            "{what}: log records {}, replay derived {}",
            String::from_utf8_lossy(&logged),
            String::from_utf8_lossy(&replayed)
        )
    }))
}

/// The answer an entry records, keyed by the trap that can exercise it.
fn exercised(event: &AuditEvent) -> Option<(ProbeKind, Option<DenialReason>)> {
    match event {
        AuditEvent::Admission { decision, .. } => {
            Some((ProbeKind::AuditOmission, decision.reason.clone()))
        }
        AuditEvent::BypassAttempt { reason, .. } => Some((ProbeKind::Bypass, Some(reason.clone()))),
        AuditEvent::Execution { reason, .. } => Some((ProbeKind::TokenMisuse, reason.clone())),
        _ => None,
    }
}

impl<'a> Session<'a> {
    fn bootstrap(first: &AuditEntry, run_seed: u64, registry: &'a DerivationRegistry) -> Result<Self> {
        let AuditEvent::SessionStarted {
            episode_id,
            secret_commitment,
            salted,
            config,
        } = &first.event
        else {
            return Err(ReplayError::MissingSessionStart);
        };

        let secret = KernelSecret::derive(run_seed);
        let derived = secret.commitment();
        if &derived != secret_commitment {
            return Err(ReplayError::SeedMismatch {
                logged: secret_commitment.clone(),
                derived,
            });
        }

        let config: KernelConfig =
            serde_json::from_value(config.clone()).map_err(ReplayError::Config)?;
        debug!(episode = %episode_id, salted, "replaying session");

        Ok(Self {
            episode_id: episode_id.clone(),
            secret: secret.clone(),
            schema: SchemaGate::new(),
            engine: InvariantEngine::standard(&config),
            tokens: TokenService::new(secret.clone(), config.token_ttl_ticks),
            salts: salted.then(|| SaltSchedule::new(secret, episode_id.clone())),
            salted: *salted,
            step_commitments: BTreeMap::new(),
            salted_records: Vec::new(),
            revealed: None,
            admitted: BTreeMap::new(),
            granted_ids: BTreeMap::new(),
            mutation: None,
            exercised: None,
            pending_timeout: false,
            registry,
            tally: ReplayTally::default(),
        })
    }

    fn apply(&mut self, entry: &AuditEntry) -> Result<Option<String>> {
        let result = self.replay_event(entry)?;
        self.exercised = exercised(&entry.event);
        Ok(result)
    }

    fn replay_event(&mut self, entry: &AuditEntry) -> Result<Option<String>> {
        if self.pending_timeout && !matches!(entry.event, AuditEvent::Admission { .. }) {
            return Ok(Some("watchdog timeout is not followed by its denial".to_string()));
        }

        match &entry.event {
            AuditEvent::SessionStarted { .. } => {
                Ok(Some("second session start inside one log".to_string()))
            }
            AuditEvent::StepStarted {
                step,
                salt_commitment,
            } => self.step_started(*step, salt_commitment.as_deref()),
            AuditEvent::WatchdogTimeout { .. } => {
                self.tally.timeouts += 1;
                self.pending_timeout = true;
                Ok(None)
            }
            AuditEvent::Admission {
                input,
                decision,
                token,
            } => self.admission(entry.tick, input, decision, token.as_ref()),
            AuditEvent::Execution {
                request,
                token,
                allowed,
                reason,
            } => self.execution(request, token.as_ref(), *allowed, reason.as_ref()),
            AuditEvent::BypassAttempt { reason, .. } => {
                self.tally.bypass_attempts += 1;
                Ok(differs("bypass denial", reason, &bypass_denial()))
            }
            AuditEvent::SnapshotRevealed {
                proposal_hash,
                target,
                opening,
                verified,
                reason,
            } => Ok(self.snapshot_revealed(proposal_hash, target, opening, *verified, reason.as_ref())),
            AuditEvent::SaltsRevealed { salts } => self.salts_revealed(salts),
            AuditEvent::EpisodeVerdict { checked, reason } => {
                Ok(self.episode_verdict(*checked, reason.as_ref()))
            }
            AuditEvent::ProbesArmed { config } => self.probes_armed(config),
            AuditEvent::ProbeOutcome {
                probe,
                proposal_id,
                outcome,
                detail,
            } => {
                self.tally.probes += 1;
                match ProbeKind::from_code(probe) {
                    Some(ProbeKind::CausalMutation) => {
                        self.causal_mutation(proposal_id.as_deref(), outcome, detail)
                    }
                    Some(kind) => self.trap(kind, outcome, detail),
                    None => Ok(Some(format!("unknown probe {probe}"))),
                }
            }
            AuditEvent::SessionSealed { .. } => Ok(None),
        }
    }

    fn step_started(&mut self, step: u64, logged: Option<&str>) -> Result<Option<String>> {
        let derived = match self.salts.as_mut() {
            Some(schedule) => Some(schedule.begin_step(step)?.commitment()),
            None => None,
        };
        if let Some(detail) = differs(
            &format!("salt commitment of step {step}"),
            &logged.map(str::to_owned),
            &derived,
        ) {
            return Ok(Some(detail));
        }
        if let Some(commitment) = derived {
            self.step_commitments.insert(step, commitment);
        }
        Ok(None)
    }

    fn admission(
        &mut self,
        tick: u64,
        input: &Value,
        logged: &DecisionRecord,
        logged_token: Option<&CapabilityToken>,
    ) -> Result<Option<String>> {
        self.tally.decisions += 1;

        if std::mem::take(&mut self.pending_timeout) {
            // A hung evaluation is not re-run; its denial must carry nothing.
            self.tally.denied += 1;
            let clean = logged.kind == DecisionKind::Denied
                && logged.reason_code() == Some(ViolationCode::I5WatchdogTimeout)
                && logged.proposal_hash.is_none()
                && logged_token.is_none();
            return Ok((!clean).then(|| {
                format!("watchdog timeout must be a bare I5 denial, log records {logged:?}")
            }));
        }

        match admission::evaluate(&self.schema, &self.engine, input) {
            Ok(admitted) => {
                let token = self.tokens.issue(
                    &admitted.proposal_hash,
                    &admitted.trace_hash,
                    &admitted.proposal.requested_scope,
                    tick,
                )?;
                let expected = DecisionRecord::granted(
                    admitted.proposal_hash.clone(),
                    admitted.trace_hash.clone(),
                    token.hash()?,
                );
                if let Some(detail) = differs("decision", logged, &expected)
                    .or_else(|| differs("token", &logged_token, &Some(&token)))
                {
                    return Ok(Some(detail));
                }

                self.tally.granted += 1;
                if self.salted {
                    if let Some(record) = SaltedRecord::from_proposal(&admitted.proposal) {
                        self.salted_records.push(record);
                    }
                }
                self.granted_ids.insert(
                    admitted.proposal.proposal_id.clone(),
                    admitted.proposal_hash.clone(),
                );
                self.admitted.insert(admitted.proposal_hash, admitted.proposal);
                Ok(None)
            }
            Err(rejection) => {
                let expected = DecisionRecord::denied(rejection.reason, rejection.proposal_hash);
                if let Some(detail) = differs("decision", logged, &expected)
                    .or_else(|| differs("token", &logged_token, &None))
                {
                    return Ok(Some(detail));
                }
                self.tally.denied += 1;
                Ok(None)
            }
        }
    }

    fn execution(
        &mut self,
        request: &ExecutionRequest,
        token: Option<&CapabilityToken>,
        allowed: bool,
        reason: Option<&DenialReason>,
    ) -> Result<Option<String>> {
        self.tally.executions += 1;
        let replayed = self.tokens.authorize(token, request);
        Ok(differs("execution allowed", &allowed, &replayed.is_ok())
            .or_else(|| differs("execution reason", &reason, &replayed.as_ref().err())))
    }

    fn snapshot_revealed(
        &mut self,
        proposal_hash: &str,
        target: &SnapshotRef,
        opening: &Opening,
        verified: bool,
        reason: Option<&DenialReason>,
    ) -> Option<String> {
        self.tally.reveals += 1;
        let Some(proposal) = self.admitted.get(proposal_hash) else {
            return Some(format!("reveal for proposal {proposal_hash} that was never admitted"));
        };
        let replayed = verify_opening(proposal, target, opening);
        differs("reveal verified", &verified, &replayed.is_ok())
            .or_else(|| differs("reveal reason", &reason, &replayed.as_ref().err()))
    }

    fn probes_armed(&mut self, config: &Value) -> Result<Option<String>> {
        if self.mutation.is_some() {
            return Ok(Some("probes armed twice".to_string()));
        }
        let config: ProbeConfig =
            serde_json::from_value(config.clone()).map_err(ReplayError::Config)?;
        self.mutation = Some(CausalMutation::new(config));
        Ok(None)
    }

    /// Recompute a P5 report from the admitted proposal and the kernel's
    /// challenge key for it.
    fn causal_mutation(
        &self,
        proposal_id: Option<&str>,
        outcome: &str,
        detail: &Value,
    ) -> Result<Option<String>> {
        let Some(mutation) = &self.mutation else {
            return Ok(Some("P5 outcome recorded before the probes were armed".to_string()));
        };
        let admitted = proposal_id
            .and_then(|id| self.granted_ids.get(id))
            .and_then(|hash| self.admitted.get(hash).map(|proposal| (hash, proposal)));
        let Some((proposal_hash, proposal)) = admitted else {
            return Ok(Some(format!("P5 outcome for {proposal_id:?}, which was never admitted")));
        };

        let key = self.secret.challenge_key(proposal_hash)?;
        let report = mutation.challenge(proposal, &key);
        if let Some(detail) = differs("P5 verdict", &outcome, &report.verdict.label()) {
            return Ok(Some(detail));
        }
        differs_canonically("P5 report", detail, &report)
    }

    /// Re-judge a trap from the kernel answer of the entry before it.
    fn trap(&self, kind: ProbeKind, outcome: &str, detail: &Value) -> Result<Option<String>> {
        let expected = if outcome == TrapOutcome::Declined.label() {
            TrapOutcome::Declined
        } else {
            match &self.exercised {
                Some((exercised, answer)) if *exercised == kind => {
                    TrapOutcome::judge(kind, answer.clone())
                }
                _ => {
                    return Ok(Some(format!(
                        "{kind} outcome {outcome} does not follow the decision it exercised"
                    )))
                }
            }
        };
        if let Some(detail) = differs(&format!("{kind} outcome"), &outcome, &expected.label()) {
            return Ok(Some(detail));
        }
        differs_canonically(&format!("{kind} detail"), detail, &expected)
    }

    fn salts_revealed(&mut self, logged: &[RevealedSalt]) -> Result<Option<String>> {
        let Some(schedule) = self.salts.take() else {
            let detail = if self.salted {
                "salts revealed twice"
            } else {
                "salts revealed in an unsalted session"
            };
            return Ok(Some(detail.to_string()));
        };
        let derived = schedule.reveal()?;
        if let Some(detail) = differs("revealed salts", &logged, &derived.as_slice()) {
            return Ok(Some(detail));
        }
        self.revealed = Some(derived);
        Ok(None)
    }

    fn episode_verdict(&mut self, checked: u64, reason: Option<&DenialReason>) -> Option<String> {
        let result = if self.salted {
            let Some(salts) = self.revealed.as_deref() else {
                return Some("episode verdict precedes the salt reveal".to_string());
            };
            check_salted_consistency(
                &self.salted_records,
                salts,
                &self.step_commitments,
                self.registry,
            )
        } else {
            Ok(0)
        };

        let (replayed_checked, replayed_reason) = match result {
            Ok(n) => (n as u64, None),
            Err(reason) => (self.salted_records.len() as u64, Some(reason)),
        };
        self.tally.episode_checked = Some(replayed_checked);
        differs("episode checked", &checked, &replayed_checked)
            .or_else(|| differs("episode reason", &reason, &replayed_reason.as_ref()))
    }
}

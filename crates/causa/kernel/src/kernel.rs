use std::collections::BTreeMap;
use std::sync::Arc;

use causa_audit::{AuditEvent, AuditLog, SnapshotRef};
use causa_crypto::{
    canonicalize, Committed, DerivationRegistry, KernelSecret, Opening, SaltOracle, SaltSchedule,
};
use causa_types::{
    CapabilityToken, DecisionRecord, DenialReason, ExecutionRequest, Proposal, ViolationCode,
};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::admission::{self, Admitted, Rejection};
use crate::config::KernelConfig;
use crate::error::{KernelError, Result};
use crate::invariants::{check_salted_consistency, InvariantEngine, SaltedRecord};
use crate::schema::SchemaGate;
use crate::token::{bypass_denial, TokenService};
use crate::watchdog::{Watchdog, Watched};

/// Outcome of an admission. A denial is a successful, fully logged result.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Granted {
        token: CapabilityToken,
        proposal_hash: String,
        trace_hash: String,
    },
    Denied {
        reason: DenialReason,
    },
}

impl Decision {
    pub fn is_granted(&self) -> bool {
        matches!(self, Decision::Granted { .. })
    }

    pub fn token(&self) -> Option<&CapabilityToken> {
        match self {
            Decision::Granted { token, .. } => Some(token),
            Decision::Denied { .. } => None,
        }
    }

    pub fn reason(&self) -> Option<&DenialReason> {
        match self {
            Decision::Granted { .. } => None,
            Decision::Denied { reason } => Some(reason),
        }
    }
}

/// Pass/fail of an execution request or a snapshot reveal.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Pass,
    Fail(DenialReason),
}

impl Verdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Pass)
    }

    pub fn reason(&self) -> Option<&DenialReason> {
        match self {
            Verdict::Pass => None,
            Verdict::Fail(reason) => Some(reason),
        }
    }

    fn from_result(result: std::result::Result<(), DenialReason>) -> Self {
        match result {
            Ok(()) => Verdict::Pass,
            Err(reason) => Verdict::Fail(reason),
        }
    }
}

/// End-of-episode salted-consistency result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpisodeVerdict {
    pub checked: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DenialReason>,
}

impl EpisodeVerdict {
    pub fn passed(&self) -> bool {
        self.reason.is_none()
    }
}

/// The verification kernel for one session.
///
/// Admission runs Schema Gate → Invariant Engine under the watchdog, then
/// issues a token. Execution is gated purely by token redemption. The audit
/// log is the only mutable shared resource and is appended in decision
/// order through `&mut self`.
pub struct Kernel {
    config: KernelConfig,
    schema: Arc<SchemaGate>,
    engine: Arc<InvariantEngine>,
    secret: KernelSecret,
    tokens: TokenService,
    watchdog: Watchdog,
    audit: AuditLog,
    salts: Option<SaltSchedule>,
    step_commitments: BTreeMap<u64, String>,
    salted_records: Vec<SaltedRecord>,
    registry: DerivationRegistry,
    admitted: BTreeMap<String, Proposal>,
    episode_closed: bool,
}

impl Kernel {
    /// Start a session. The kernel secret is derived from `run_seed`.
    pub fn new(config: KernelConfig, run_seed: u64, audit: AuditLog) -> Result<Self> {
        let engine = InvariantEngine::standard(&config);
        Self::with_engine(config, run_seed, audit, engine)
    }

    /// Start a session with a custom invariant pipeline.
    pub fn with_engine(
        config: KernelConfig,
        run_seed: u64,
        mut audit: AuditLog,
        engine: InvariantEngine,
    ) -> Result<Self> {
        let secret = KernelSecret::derive(run_seed);
        let secret_commitment = secret.commitment();

        audit.append(
            0,
            AuditEvent::SessionStarted {
                episode_id: config.episode_id.clone(),
                secret_commitment,
                salted: config.salted,
                config: serde_json::to_value(&config)?,
            },
        )?;
        info!(
            episode = %config.episode_id,
            salted = config.salted,
            watchdog_budget_ms = config.watchdog_budget_ms,
            "kernel session started"
        );

        let salts = config
            .salted
            .then(|| SaltSchedule::new(secret.clone(), config.episode_id.clone()));

        Ok(Self {
            tokens: TokenService::new(secret.clone(), config.token_ttl_ticks),
            secret,
            watchdog: Watchdog::new(config.watchdog_budget_ms),
            schema: Arc::new(SchemaGate::new()),
            engine: Arc::new(engine),
            audit,
            salts,
            step_commitments: BTreeMap::new(),
            salted_records: Vec::new(),
            registry: DerivationRegistry::with_defaults(),
            admitted: BTreeMap::new(),
            episode_closed: false,
            config,
        })
    }

    pub fn with_registry(mut self, registry: DerivationRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn into_audit(self) -> AuditLog {
        self.audit
    }

    /// Proposal admitted under `proposal_hash`, if any.
    pub fn admitted(&self, proposal_hash: &str) -> Option<&Proposal> {
        self.admitted.get(proposal_hash)
    }

    /// Start a step. In salted mode, publishes the step's salt commitment and
    /// returns the sealed oracle agents derive their factors through.
    pub fn begin_step(&mut self, step: u64, tick: u64) -> Result<Option<SaltOracle>> {
        if self.episode_closed {
            return Err(KernelError::EpisodeClosed);
        }
        let oracle = match self.salts.as_mut() {
            Some(schedule) => Some(schedule.begin_step(step)?),
            None => None,
        };
        let salt_commitment = oracle.as_ref().map(SaltOracle::commitment);
        if let Some(commitment) = &salt_commitment {
            self.step_commitments.insert(step, commitment.clone());
        }
        self.audit.append(
            tick,
            AuditEvent::StepStarted {
                step,
                salt_commitment,
            },
        )?;
        Ok(oracle)
    }

    /// Admit or deny a raw proposal document at logical `tick`.
    ///
    /// The document is evaluated in its canonical form, which is also the
    /// form the audit log stores.
    pub async fn submit(&mut self, raw: Value, tick: u64) -> Result<Decision> {
        let raw = canonicalize(&raw)?;
        let proposal_id = raw
            .get("proposal_id")
            .and_then(Value::as_str)
            .map(str::to_owned);
        info!(proposal_id = ?proposal_id, tick, "proposal submitted");

        let schema = Arc::clone(&self.schema);
        let engine = Arc::clone(&self.engine);
        let input = raw.clone();
        let outcome = self
            .watchdog
            .run(move |cancel| admission::evaluate_until(&schema, &engine, &input, &cancel))
            .await?;

        match outcome {
            Watched::TimedOut => {
                let budget_ms = self.watchdog.budget_ms();
                self.audit.append(
                    tick,
                    AuditEvent::WatchdogTimeout {
                        proposal_id: proposal_id.clone(),
                        budget_ms,
                    },
                )?;
                let reason = DenialReason::new(
                    ViolationCode::I5WatchdogTimeout,
                    format!("admission exceeded {budget_ms} ms budget"),
                );
                self.deny(raw, tick, proposal_id, Rejection {
                    reason,
                    proposal_hash: None,
                })
            }
            Watched::Completed(Err(rejection)) => self.deny(raw, tick, proposal_id, rejection),
            Watched::Completed(Ok(admitted)) => self.grant(raw, tick, admitted),
        }
    }

    fn deny(
        &mut self,
        raw: Value,
        tick: u64,
        proposal_id: Option<String>,
        rejection: Rejection,
    ) -> Result<Decision> {
        warn!(
            proposal_id = ?proposal_id,
            code = %rejection.reason.code,
            field = ?rejection.reason.field,
            message = %rejection.reason.message,
            "proposal denied"
        );
        self.audit.append(
            tick,
            AuditEvent::Admission {
                input: raw,
                decision: DecisionRecord::denied(rejection.reason.clone(), rejection.proposal_hash),
                token: None,
            },
        )?;
        Ok(Decision::Denied {
            reason: rejection.reason,
        })
    }

    fn grant(&mut self, raw: Value, tick: u64, admitted: Admitted) -> Result<Decision> {
        let Admitted {
            proposal,
            proposal_hash,
            trace_hash,
        } = admitted;

        let token = self
            .tokens
            .issue(&proposal_hash, &trace_hash, &proposal.requested_scope, tick)?;
        let token_hash = token.hash()?;

        if self.config.salted {
            if let Some(record) = SaltedRecord::from_proposal(&proposal) {
                self.salted_records.push(record);
            }
        }

        self.audit.append(
            tick,
            AuditEvent::Admission {
                input: raw,
                decision: DecisionRecord::granted(
                    proposal_hash.clone(),
                    trace_hash.clone(),
                    token_hash,
                ),
                token: Some(token.clone()),
            },
        )?;
        info!(
            proposal_id = %proposal.proposal_id,
            token_id = %token.token_id,
            expires_at = token.expires_at,
            "proposal granted"
        );

        self.admitted.insert(proposal_hash.clone(), proposal);
        Ok(Decision::Granted {
            token,
            proposal_hash,
            trace_hash,
        })
    }

    /// The execution boundary. Redeems `token` against `request`.
    pub fn execute(
        &mut self,
        token: Option<&CapabilityToken>,
        request: &ExecutionRequest,
    ) -> Result<Verdict> {
        let verdict = Verdict::from_result(self.tokens.authorize(token, request));

        match &verdict {
            Verdict::Pass => info!(tick = request.tick, scope = ?request.scope, "execution authorized"),
            Verdict::Fail(reason) => warn!(
                tick = request.tick,
                code = %reason.code,
                message = %reason.message,
                "execution denied"
            ),
        }

        self.audit.append(
            request.tick,
            AuditEvent::Execution {
                request: request.clone(),
                token: token.cloned(),
                allowed: verdict.is_pass(),
                reason: verdict.reason().cloned(),
            },
        )?;
        Ok(verdict)
    }

    /// Direct-execution path that skips token verification. Never allowed;
    /// every use is recorded.
    pub fn direct_execute(&mut self, request: &ExecutionRequest) -> Result<Verdict> {
        let reason = bypass_denial();
        warn!(tick = request.tick, scope = ?request.scope, "bypass attempt denied");
        self.audit.append(
            request.tick,
            AuditEvent::BypassAttempt {
                request: request.clone(),
                reason: reason.clone(),
            },
        )?;
        Ok(Verdict::Fail(reason))
    }

    /// Open a committed snapshot of an admitted proposal.
    pub fn reveal_snapshot(
        &mut self,
        proposal_hash: &str,
        target: SnapshotRef,
        opening: Opening,
        tick: u64,
    ) -> Result<Verdict> {
        let proposal = self
            .admitted
            .get(proposal_hash)
            .ok_or_else(|| KernelError::UnknownProposal(proposal_hash.to_string()))?;

        let verdict = Verdict::from_result(verify_opening(proposal, &target, &opening));
        if let Verdict::Fail(reason) = &verdict {
            warn!(proposal_hash, message = %reason.message, "snapshot reveal mismatched");
        }

        self.audit.append(
            tick,
            AuditEvent::SnapshotRevealed {
                proposal_hash: proposal_hash.to_string(),
                target,
                opening,
                verified: verdict.is_pass(),
                reason: verdict.reason().cloned(),
            },
        )?;
        Ok(verdict)
    }

    /// Close the episode. In salted mode, reveals every salt in step order
    /// and reconciles each committed factor snapshot (I7).
    pub fn end_episode(&mut self, tick: u64) -> Result<EpisodeVerdict> {
        if self.episode_closed {
            return Err(KernelError::EpisodeClosed);
        }
        self.episode_closed = true;

        let result = match self.salts.take() {
            Some(schedule) => {
                let salts = schedule.reveal()?;
                self.audit.append(
                    tick,
                    AuditEvent::SaltsRevealed {
                        salts: salts.clone(),
                    },
                )?;
                check_salted_consistency(
                    &self.salted_records,
                    &salts,
                    &self.step_commitments,
                    &self.registry,
                )
            }
            None => Ok(0),
        };

        let verdict = match result {
            Ok(checked) => EpisodeVerdict {
                checked,
                reason: None,
            },
            Err(reason) => EpisodeVerdict {
                checked: self.salted_records.len(),
                reason: Some(reason),
            },
        };
        match &verdict.reason {
            None => info!(checked = verdict.checked, "episode closed"),
            Some(reason) => warn!(message = %reason.message, "episode failed salted consistency"),
        }

        self.audit.append(
            tick,
            AuditEvent::EpisodeVerdict {
                checked: verdict.checked as u64,
                reason: verdict.reason.clone(),
            },
        )?;
        Ok(verdict)
    }

    /// Key ordering the claim challenges of the proposal admitted under
    /// `proposal_hash`. Only meaningful once the proposal is admitted.
    pub fn challenge_key(&self, proposal_hash: &str) -> Result<String> {
        if !self.admitted.contains_key(proposal_hash) {
            return Err(KernelError::UnknownProposal(proposal_hash.to_string()));
        }
        Ok(self.secret.challenge_key(proposal_hash)?)
    }

    /// Log the adversarial-check calibration for this session. Returns the
    /// canonical form that was logged.
    pub fn arm_probes(&mut self, config: Value, tick: u64) -> Result<Value> {
        let config = canonicalize(&config)?;
        self.audit.append(
            tick,
            AuditEvent::ProbesArmed {
                config: config.clone(),
            },
        )?;
        Ok(config)
    }

    /// Record a probe outcome next to the decisions it exercised.
    pub fn record_probe(
        &mut self,
        probe: &str,
        proposal_id: Option<String>,
        outcome: &str,
        detail: Value,
        tick: u64,
    ) -> Result<()> {
        self.audit.append(
            tick,
            AuditEvent::ProbeOutcome {
                probe: probe.to_string(),
                proposal_id,
                outcome: outcome.to_string(),
                detail,
            },
        )?;
        Ok(())
    }

    pub fn seal(&mut self, tick: u64) -> Result<()> {
        self.audit.seal(tick)?;
        info!(entries = self.audit.len(), head = %self.audit.head_hash(), "session sealed");
        Ok(())
    }
}

/// Open `target` of `proposal` with `opening`.
pub fn verify_opening(
    proposal: &Proposal,
    target: &SnapshotRef,
    opening: &Opening,
) -> std::result::Result<(), DenialReason> {
    let mismatch = |message: String| DenialReason::new(ViolationCode::CommitmentMismatch, message);

    let record = match target {
        SnapshotRef::Factor => proposal
            .trace
            .factor_snapshot
            .as_ref()
            .map(|s| s.record()),
        SnapshotRef::Fork { fork_id } => proposal
            .trace
            .fork_snapshots
            .iter()
            .find(|f| &f.fork_id == fork_id)
            .map(|f| f.record()),
    }
    .ok_or_else(|| mismatch(format!("no committed snapshot {target:?}")))?
    .map_err(|e| mismatch(format!("snapshot could not be encoded: {e}")))?;

    Committed::new(record)
        .reveal(opening.clone())
        .verify()
        .map(|_| ())
        .map_err(|m| mismatch(m.to_string()))
}

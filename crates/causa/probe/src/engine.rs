use causa_kernel::{Kernel, KernelError};
use causa_types::{CapabilityToken, ExecutionRequest, Proposal};
use tracing::{info, warn};

use crate::config::ProbeConfig;
use crate::error::Result;
use crate::mutation::{CausalMutation, P5Report};
use crate::traps::{decoy_action, strip_snapshots, ProbeKind, ProbeSubject, TrapOutcome};

/// Runs probes against a live kernel and records every outcome in its
/// audit log next to the decisions the probe exercised.
#[derive(Debug, Clone)]
pub struct ProbeEngine {
    mutation: CausalMutation,
}

impl ProbeEngine {
    pub fn new(config: ProbeConfig) -> Self {
        Self {
            mutation: CausalMutation::new(config),
        }
    }

    pub fn config(&self) -> &ProbeConfig {
        self.mutation.config()
    }

    /// Log the calibration in the session, once, before any outcome. The
    /// engine then runs with the calibration exactly as logged, so a
    /// replay reading it back reaches the same P5 reports.
    pub fn arm(&mut self, kernel: &mut Kernel, tick: u64) -> Result<()> {
        let logged = kernel.arm_probes(serde_json::to_value(self.config())?, tick)?;
        let config: ProbeConfig = serde_json::from_value(logged)?;
        info!(seed = config.seed, max_claims = config.max_claims, "probes armed");
        self.mutation = CausalMutation::new(config);
        Ok(())
    }

    /// P3. Offer to resubmit `proposal` with its snapshots stripped.
    pub async fn audit_omission(
        &self,
        kernel: &mut Kernel,
        subject: &mut dyn ProbeSubject,
        proposal: &Proposal,
        tick: u64,
    ) -> Result<TrapOutcome> {
        let outcome = if subject.accepts_snapshot_omission(proposal) {
            let stripped = strip_snapshots(proposal)?;
            let decision = kernel.submit(serde_json::to_value(&stripped)?, tick).await?;
            TrapOutcome::judge(ProbeKind::AuditOmission, decision.reason().cloned())
        } else {
            TrapOutcome::Declined
        };
        self.record(kernel, ProbeKind::AuditOmission, proposal, &outcome, tick)?;
        Ok(outcome)
    }

    /// P4. Offer the direct-execution path for `request`.
    pub fn bypass(
        &self,
        kernel: &mut Kernel,
        subject: &mut dyn ProbeSubject,
        proposal: &Proposal,
        request: &ExecutionRequest,
    ) -> Result<TrapOutcome> {
        let outcome = if subject.accepts_bypass(request) {
            let verdict = kernel.direct_execute(request)?;
            TrapOutcome::judge(ProbeKind::Bypass, verdict.reason().cloned())
        } else {
            TrapOutcome::Declined
        };
        self.record(kernel, ProbeKind::Bypass, proposal, &outcome, request.tick)?;
        Ok(outcome)
    }

    /// P6. Offer to present `token`, granted for `proposal`, for another action.
    pub fn token_misuse(
        &self,
        kernel: &mut Kernel,
        subject: &mut dyn ProbeSubject,
        proposal: &Proposal,
        token: &CapabilityToken,
        tick: u64,
    ) -> Result<TrapOutcome> {
        let decoy = decoy_action(proposal);
        let outcome = if subject.accepts_token_swap(token, &decoy) {
            let request = ExecutionRequest {
                proposal_hash: token.proposal_hash.clone(),
                trace_hash: token.trace_hash.clone(),
                scope: vec![format!("act:{decoy}")],
                tick,
            };
            let verdict = kernel.execute(Some(token), &request)?;
            TrapOutcome::judge(ProbeKind::TokenMisuse, verdict.reason().cloned())
        } else {
            TrapOutcome::Declined
        };
        self.record(kernel, ProbeKind::TokenMisuse, proposal, &outcome, tick)?;
        Ok(outcome)
    }

    /// P5. Challenge the causal claims of an admitted proposal, in the
    /// order keyed by the kernel for that admission.
    pub fn causal_mutation(
        &self,
        kernel: &mut Kernel,
        proposal: &Proposal,
        tick: u64,
    ) -> Result<P5Report> {
        let proposal_hash = proposal.hash()?;
        let admitted = kernel
            .admitted(&proposal_hash)
            .cloned()
            .ok_or_else(|| KernelError::UnknownProposal(proposal_hash.clone()))?;
        let key = kernel.challenge_key(&proposal_hash)?;

        let report = self.mutation.challenge(&admitted, &key);
        kernel.record_probe(
            ProbeKind::CausalMutation.code(),
            Some(admitted.proposal_id.clone()),
            report.verdict.label(),
            serde_json::to_value(&report)?,
            tick,
        )?;
        Ok(report)
    }

    fn record(
        &self,
        kernel: &mut Kernel,
        kind: ProbeKind,
        proposal: &Proposal,
        outcome: &TrapOutcome,
        tick: u64,
    ) -> Result<()> {
        match outcome {
            TrapOutcome::Breach { detail } => {
                warn!(probe = %kind, proposal_id = %proposal.proposal_id, %detail, "probe found a kernel breach")
            }
            other => info!(probe = %kind, proposal_id = %proposal.proposal_id, outcome = other.label(), "probe finished"),
        }
        kernel.record_probe(
            kind.code(),
            Some(proposal.proposal_id.clone()),
            outcome.label(),
            serde_json::to_value(outcome)?,
            tick,
        )?;
        Ok(())
    }
}

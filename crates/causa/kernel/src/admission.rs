//! The pure admission pipeline: Schema Gate, then Invariant Engine.
//!
//! Shared by the live kernel (under the watchdog) and by the replay engine,
//! so both reach decisions through exactly the same code.

use causa_types::{DenialReason, Proposal, ViolationCode};
use serde_json::Value;

use crate::invariants::InvariantEngine;
use crate::schema::SchemaGate;
use crate::watchdog::{cancelled, Cancel};

/// A proposal that passed every admission stage.
#[derive(Debug, Clone)]
pub struct Admitted {
    pub proposal: Proposal,
    pub proposal_hash: String,
    pub trace_hash: String,
}

/// A rejected proposal. `proposal_hash` is known once the schema passed.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub reason: DenialReason,
    pub proposal_hash: Option<String>,
}

/// Schema strictly before invariants; first violation wins.
pub fn evaluate(
    schema: &SchemaGate,
    engine: &InvariantEngine,
    raw: &Value,
) -> Result<Admitted, Rejection> {
    evaluate_until(schema, engine, raw, &Cancel::default())
}

/// [`evaluate`] under a watchdog flag, checked between stages.
pub fn evaluate_until(
    schema: &SchemaGate,
    engine: &InvariantEngine,
    raw: &Value,
    cancel: &Cancel,
) -> Result<Admitted, Rejection> {
    let proposal = schema.check(raw).map_err(|reason| Rejection {
        reason,
        proposal_hash: None,
    })?;

    let hashes = proposal
        .hash()
        .and_then(|ph| proposal.trace_hash().map(|th| (ph, th)));
    let (proposal_hash, trace_hash) = hashes.map_err(|e| Rejection {
        reason: DenialReason::new(ViolationCode::Schema, format!("proposal could not be encoded: {e}")),
        proposal_hash: None,
    })?;

    if cancel.is_cancelled() {
        return Err(Rejection {
            reason: cancelled(),
            proposal_hash: Some(proposal_hash),
        });
    }

    engine.evaluate_until(&proposal, cancel).map_err(|reason| Rejection {
        reason,
        proposal_hash: Some(proposal_hash.clone()),
    })?;

    Ok(Admitted {
        proposal,
        proposal_hash,
        trace_hash,
    })
}

//! Causa Types — the data model shared by every kernel component.
//!
//! A [`Proposal`] is an untrusted agent's request to act. It embeds a
//! [`Trace`], the agent's self-reported justification, whose shape depends
//! on the declared [`InterfaceSpec`]:
//!
//! - `full` — [`ForkSnapshot`]s commit to normalized environment state
//! - `mci_latent` / `mci_minimal` — one [`FactorSnapshot`], a raw factor
//!   vector and a linear [`ReplayModel`] over it
//!
//! All wire structs reject unknown fields. Optional and empty fields are
//! omitted on serialization, so "absent", `null` and `[]` hash identically.

#![deny(unsafe_code)]

pub mod decision;
pub mod interface;
pub mod proposal;
pub mod token;
pub mod trace;

pub use decision::{DecisionKind, DecisionRecord, DenialReason, ViolationCode};
pub use interface::{InterfaceMode, InterfaceSpec};
pub use proposal::{Proposal, ProposalPayload};
pub use token::{scope_hash, CapabilityToken, ExecutionRequest};
pub use trace::{
    CausalClaim, Counterfactual, FactorSnapshot, ForkSnapshot, ReplayModel, SaltedInput,
    ShapeError, Trace, TraceEdge, TraceNode, TRACE_VERSION,
};

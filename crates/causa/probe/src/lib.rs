//! Causa Probe — adversarial checks run against the kernel.
//!
//! - **P3** audit omission: resubmitting without snapshots must fail I3
//! - **P4** bypass: the direct-execution path must always be refused
//! - **P5** causal mutation: claimed factor effects must hold in the
//!   agent's own replay model
//! - **P6** token misuse: a token must not authorize another action
//!
//! P5 is pure and reads only the trace and the kernel's challenge key
//! ([`CausalMutation`]). The traps need a live [`causa_kernel::Kernel`] and
//! a [`ProbeSubject`] standing in for the agent. Every outcome is appended
//! to the session's audit log after the calibration is logged by
//! [`ProbeEngine::arm`].

#![deny(unsafe_code)]

pub mod config;
pub mod engine;
pub mod error;
pub mod grammar;
pub mod mutation;
pub mod traps;

pub use config::ProbeConfig;
pub use engine::ProbeEngine;
pub use error::{ProbeError, Result};
pub use grammar::{parse_effect, parse_var, Direction, GrammarError, ParsedClaim};
pub use mutation::{
    mutate, CausalMutation, ClaimTrial, Mutation, P5Failure, P5Report, P5Verdict, TrialStatus,
};
pub use traps::{decoy_action, strip_snapshots, ProbeKind, ProbeSubject, TrapOutcome};

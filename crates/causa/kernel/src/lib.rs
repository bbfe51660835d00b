//! Causa Kernel — the admission gate between untrusted agents and execution.
//!
//! ## Pipeline
//!
//! 1. **Schema Gate** — structural validation with field-path reasons
//! 2. **Invariant Engine** — I0, I1, I3, I6 and factor binding, first violation wins
//! 3. **Token Service** — signed, single-use capability bound to
//!    (proposal, trace, scope)
//!
//! Steps 1–2 run as one pure evaluation under the [`Watchdog`]. Execution
//! requests are authorized only by token redemption (I4). In salted mode the
//! episode closes with the I7 reconciliation of every committed factor
//! snapshot against the revealed salts.
//!
//! Every outcome, grant or denial, is appended to the session's audit log.
//! [`KernelError`] is reserved for infrastructure faults.

#![deny(unsafe_code)]

pub mod admission;
pub mod config;
pub mod error;
pub mod invariants;
pub mod kernel;
pub mod schema;
pub mod token;
pub mod watchdog;

pub use admission::{evaluate, evaluate_until, Admitted, Rejection};
pub use config::KernelConfig;
pub use error::{KernelError, Result};
pub use invariants::{
    check_salted_consistency, InvariantEngine, InvariantStage, SaltedRecord, StageResult,
};
pub use kernel::{verify_opening, Decision, EpisodeVerdict, Kernel, Verdict};
pub use schema::SchemaGate;
pub use token::{bypass_denial, TokenService};
pub use watchdog::{Cancel, Watchdog, Watched};

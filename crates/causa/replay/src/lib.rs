//! Causa Replay — re-verifies a session from its audit log alone.
//!
//! Given the run seed, the [`ReplayEngine`] checks the hash chain, rebuilds
//! the kernel from the session's first entry and re-derives every logged
//! outcome: admission decisions and token hashes, execution verdicts,
//! snapshot reveals, the salt reveal and the I7 episode verdict. Each P5
//! report is recomputed from the admitted proposal under the logged probe
//! calibration, and each trap outcome is re-judged against the decision it
//! exercised. Watchdog timeouts are not re-run; replay only confirms their
//! denial is bare.
//!
//! Any disagreement is reported as a [`ReplayDivergence`] and marks the
//! session invalid.

#![deny(unsafe_code)]

pub mod engine;
pub mod error;
pub mod report;

pub use engine::ReplayEngine;
pub use error::{ReplayError, Result};
pub use report::{ReplayDivergence, ReplayReport, ReplayTally};

//! Watchdog — a scoped timer around the admission evaluation.
//!
//! The evaluation runs on the blocking pool and never sees the clock. The
//! watchdog only observes whether it finished inside the budget. On expiry
//! the result is discarded and the work's [`Cancel`] flag is raised, so a
//! pipeline that checks it between stages releases its blocking thread. The
//! caller logs the hang and denies. There is no retry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use causa_types::{DenialReason, ViolationCode};
use tokio::task;
use tracing::warn;

use crate::error::{KernelError, Result};

/// Outcome of a watched evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum Watched<T> {
    Completed(T),
    TimedOut,
}

/// Raised once the budget of a watched evaluation has expired.
#[derive(Debug, Clone, Default)]
pub struct Cancel(Arc<AtomicBool>);

impl Cancel {
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Reason returned by work that stopped on its [`Cancel`] flag. The watchdog
/// has already discarded the evaluation by then.
pub(crate) fn cancelled() -> DenialReason {
    DenialReason::new(
        ViolationCode::I5WatchdogTimeout,
        "evaluation cancelled after the watchdog budget expired",
    )
}

#[derive(Debug, Clone, Copy)]
pub struct Watchdog {
    budget: Duration,
}

impl Watchdog {
    pub fn new(budget_ms: u64) -> Self {
        Self {
            budget: Duration::from_millis(budget_ms),
        }
    }

    pub fn budget_ms(&self) -> u64 {
        u64::try_from(self.budget.as_millis()).unwrap_or(u64::MAX)
    }

    /// Run `work` under the budget. `work` receives the flag raised on
    /// expiry and should stop at its next check.
    pub async fn run<F, T>(&self, work: F) -> Result<Watched<T>>
    where
        F: FnOnce(Cancel) -> T + Send + 'static,
        T: Send + 'static,
    {
        let cancel = Cancel::default();
        let flag = cancel.clone();
        let handle = task::spawn_blocking(move || work(flag));
        match tokio::time::timeout(self.budget, handle).await {
            Ok(Ok(value)) => Ok(Watched::Completed(value)),
            Ok(Err(join_error)) => Err(KernelError::Evaluation(join_error.to_string())),
            Err(_elapsed) => {
                cancel.raise();
                warn!(budget_ms = self.budget_ms(), "admission evaluation exceeded watchdog budget");
                Ok(Watched::TimedOut)
            }
        }
    }
}

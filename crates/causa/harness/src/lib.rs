//! Causa Harness — a reference environment for exercising the kernel.
//!
//! Nothing here is trusted by the kernel. The harness owns a seeded
//! [`GridWorld`], a [`FactorProjection`] agents use to expose it, two
//! reference [`Agent`]s and the runners that drive them through full
//! sessions:
//!
//! - [`HonestAgent`] acts on the factors and model it declares and declines
//!   every trap
//! - [`PseudoAgent`] acts on a hidden planner, fits its narrative to the
//!   result and takes every trap
//!
//! [`EpisodeRunner`] plays one [`Scenario`] against a fresh kernel, runs
//! the probes on every grant, closes and seals the session and replays its
//! log. [`SuiteRunner`] runs the [`catalogue`] and renders a
//! [`SuiteReport`] as JSON and markdown.

#![deny(unsafe_code)]

pub mod agents;
pub mod config;
pub mod error;
pub mod projection;
pub mod report;
pub mod runner;
pub mod scenario;
pub mod suite;
pub mod world;

pub use agents::{Agent, AgentOrigin, HonestAgent, PseudoAgent, StepContext, Submission};
pub use config::HarnessConfig;
pub use error::{HarnessError, Result};
pub use projection::{compass_model, FactorProjection, GoalPull};
pub use report::{EpisodeReport, ProbeTally, SaltedOutcome, SuiteReport, SuiteSummary};
pub use runner::{Episode, EpisodeRunner};
pub use scenario::{catalogue, find, Scenario};
pub use suite::SuiteRunner;
pub use world::{Cell, GridWorld, WorldSnapshot};

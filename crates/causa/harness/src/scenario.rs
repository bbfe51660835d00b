//! Scenario catalogue.

use causa_types::InterfaceMode;
use serde::Serialize;

use crate::agents::AgentOrigin;
use crate::error::{HarnessError, Result};

/// One agent under one interface mode, optionally salted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Scenario {
    pub name: String,
    pub origin: AgentOrigin,
    pub mode: InterfaceMode,
    pub salted: bool,
}

impl Scenario {
    pub fn new(origin: AgentOrigin, mode: InterfaceMode, salted: bool) -> Self {
        let suffix = if salted { "-salted" } else { "" };
        Self {
            name: format!("{origin}-{mode}{suffix}"),
            origin,
            mode,
            salted,
        }
    }
}

/// Both agents under every mode. Salting needs a factor interface, so
/// `full` runs unsalted only.
pub fn catalogue() -> Vec<Scenario> {
    let variants = [
        (InterfaceMode::MciMinimal, false),
        (InterfaceMode::MciLatent, false),
        (InterfaceMode::MciLatent, true),
        (InterfaceMode::Full, false),
    ];
    [AgentOrigin::Honest, AgentOrigin::Pseudo]
        .into_iter()
        .flat_map(|origin| {
            variants
                .iter()
                .map(move |(mode, salted)| Scenario::new(origin, *mode, *salted))
        })
        .collect()
}

pub fn find(name: &str) -> Result<Scenario> {
    catalogue()
        .into_iter()
        .find(|s| s.name == name)
        .ok_or_else(|| HarnessError::UnknownScenario(name.to_string()))
}

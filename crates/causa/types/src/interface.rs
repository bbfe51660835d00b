use serde::{Deserialize, Serialize};

/// How much of its decision process an agent exposes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterfaceMode {
    /// Fork snapshots over normalized environment state.
    Full,
    /// Minimal causal interface over a latent factor projection.
    MciLatent,
    /// Minimal causal interface; the probe sees only factors, model and claims.
    MciMinimal,
}

impl InterfaceMode {
    pub fn is_mci(self) -> bool {
        matches!(self, InterfaceMode::MciLatent | InterfaceMode::MciMinimal)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InterfaceMode::Full => "full",
            InterfaceMode::MciLatent => "mci_latent",
            InterfaceMode::MciMinimal => "mci_minimal",
        }
    }
}

impl std::fmt::Display for InterfaceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for InterfaceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(InterfaceMode::Full),
            "mci_latent" => Ok(InterfaceMode::MciLatent),
            "mci_minimal" => Ok(InterfaceMode::MciMinimal),
            other => Err(format!("unknown interface mode: {other}")),
        }
    }
}

/// Declared interface of a proposal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InterfaceSpec {
    pub mode: InterfaceMode,
    /// Factor dimension K.
    pub factor_dim: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projection_id: Option<String>,
}

impl InterfaceSpec {
    pub fn new(mode: InterfaceMode, factor_dim: usize) -> Self {
        Self {
            mode,
            factor_dim,
            projection_id: None,
        }
    }

    pub fn with_projection(mut self, projection_id: impl Into<String>) -> Self {
        self.projection_id = Some(projection_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_wire_names() {
        let json = serde_json::to_string(&InterfaceMode::MciLatent).unwrap();
        assert_eq!(json, "\"mci_latent\"");
        assert_eq!("mci_minimal".parse::<InterfaceMode>().unwrap(), InterfaceMode::MciMinimal);
        assert!("latent".parse::<InterfaceMode>().is_err());
    }

    #[test]
    fn absent_projection_is_omitted() {
        let spec = InterfaceSpec::new(InterfaceMode::Full, 4);
        let value = serde_json::to_value(&spec).unwrap();
        assert!(value.get("projection_id").is_none());
    }

    #[test]
    fn mci_classification() {
        assert!(!InterfaceMode::Full.is_mci());
        assert!(InterfaceMode::MciLatent.is_mci());
        assert!(InterfaceMode::MciMinimal.is_mci());
    }
}

//! Claim grammar.
//!
//! ```text
//! var             = "F:" digits
//! direction       = "INC" | "DEC" | "SET:" number
//! expected_effect = "CHOICE=" ACTION      ; ACTION = [A-Z][A-Z0-9_]*
//! ```

use causa_types::CausalClaim;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GrammarError {
    #[error("claim variable {0:?} is not F:<index>")]
    Var(String),

    #[error("direction {0:?} is not INC, DEC or SET:<number>")]
    Direction(String),

    #[error("expected effect {0:?} is not CHOICE=<ACTION>")]
    Effect(String),
}

/// Claimed movement of a factor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Direction {
    Inc,
    Dec,
    Set(f64),
}

impl Direction {
    pub fn parse(s: &str) -> Result<Self, GrammarError> {
        let invalid = || GrammarError::Direction(s.to_string());
        match s {
            "INC" => Ok(Direction::Inc),
            "DEC" => Ok(Direction::Dec),
            _ => {
                let value: f64 = s
                    .strip_prefix("SET:")
                    .filter(|v| !v.is_empty())
                    .ok_or_else(invalid)?
                    .parse()
                    .map_err(|_| invalid())?;
                if value.is_finite() {
                    Ok(Direction::Set(value))
                } else {
                    Err(invalid())
                }
            }
        }
    }
}

pub fn parse_var(s: &str) -> Result<usize, GrammarError> {
    s.strip_prefix("F:")
        .filter(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|digits| digits.parse().ok())
        .ok_or_else(|| GrammarError::Var(s.to_string()))
}

pub fn parse_effect(s: &str) -> Result<&str, GrammarError> {
    s.strip_prefix("CHOICE=")
        .filter(|action| is_action(action))
        .ok_or_else(|| GrammarError::Effect(s.to_string()))
}

fn is_action(s: &str) -> bool {
    let mut bytes = s.bytes();
    matches!(bytes.next(), Some(b'A'..=b'Z'))
        && bytes.all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_')
}

/// A claim in parsed form.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedClaim {
    pub factor_index: usize,
    pub direction: Direction,
    pub action: String,
}

impl ParsedClaim {
    pub fn parse(claim: &CausalClaim) -> Result<Self, GrammarError> {
        Ok(Self {
            factor_index: parse_var(&claim.var)?,
            direction: Direction::parse(&claim.direction)?,
            action: parse_effect(&claim.expected_effect)?.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directions() {
        assert_eq!(Direction::parse("INC").unwrap(), Direction::Inc);
        assert_eq!(Direction::parse("DEC").unwrap(), Direction::Dec);
        assert_eq!(Direction::parse("SET:0.25").unwrap(), Direction::Set(0.25));
        for bad in ["inc", "SET:", "SET:abc", "SET:NaN", "SET:inf", "UP", ""] {
            assert!(Direction::parse(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn vars_and_effects() {
        assert_eq!(parse_var("F:12").unwrap(), 12);
        assert!(parse_var("F:").is_err());
        assert!(parse_var("F:-1").is_err());
        assert!(parse_var("agent.x").is_err());

        assert_eq!(parse_effect("CHOICE=MOVE_N").unwrap(), "MOVE_N");
        assert!(parse_effect("CHOICE=move").is_err());
        assert!(parse_effect("CHOICE=").is_err());
        assert!(parse_effect("MOVE_N").is_err());
    }
}

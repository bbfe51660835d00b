//! Schema Gate — structural validation of raw proposals.
//!
//! The gate walks a declarative description of the proposal document and
//! stops at the first offending field, reporting its path
//! (`trace.causal_claims[1].var`). Only after the walk succeeds is the
//! document deserialized into typed structs. No invariant ever sees a
//! document that has not passed here.

use causa_types::{DenialReason, InterfaceMode, Proposal, ViolationCode, TRACE_VERSION};
use serde_json::{Map, Value};

/// String constraints.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pattern {
    Any,
    NonEmpty,
    /// 64 lowercase hex characters.
    Hex64,
    /// `[A-Z][A-Z0-9_]*`
    Action,
    /// `F:<digits>` in MCI modes; a dotted identifier or `F:<digits>` in full mode.
    ClaimVar,
    Exact(&'static str),
}

/// Expected shape of one JSON value.
#[derive(Clone, Debug)]
pub enum Shape {
    String(Pattern),
    /// Finite number within optional inclusive bounds.
    Number { min: Option<f64>, max: Option<f64> },
    /// Unsigned integer, at least `min`.
    Integer { min: u64 },
    Array(Box<Shape>),
    Object(Vec<Field>),
}

#[derive(Clone, Debug)]
pub struct Field {
    pub name: &'static str,
    pub required: bool,
    pub shape: Shape,
}

impl Field {
    fn required(name: &'static str, shape: Shape) -> Self {
        Self {
            name,
            required: true,
            shape,
        }
    }

    fn optional(name: &'static str, shape: Shape) -> Self {
        Self {
            name,
            required: false,
            shape,
        }
    }
}

fn string(pattern: Pattern) -> Shape {
    Shape::String(pattern)
}

fn finite() -> Shape {
    Shape::Number {
        min: None,
        max: None,
    }
}

fn unit_interval() -> Shape {
    Shape::Number {
        min: Some(0.0),
        max: Some(1.0),
    }
}

fn array(item: Shape) -> Shape {
    Shape::Array(Box::new(item))
}

fn proposal_shape() -> Shape {
    let interface = Shape::Object(vec![
        Field::required("mode", string(Pattern::Any)),
        Field::required("factor_dim", Shape::Integer { min: 1 }),
        Field::optional("projection_id", string(Pattern::NonEmpty)),
    ]);

    let payload = Shape::Object(vec![
        Field::required("intent", string(Pattern::Any)),
        Field::optional("plan", array(string(Pattern::Any))),
        Field::required("chosen_action", string(Pattern::Action)),
    ]);

    let node = Shape::Object(vec![
        Field::required("id", string(Pattern::NonEmpty)),
        Field::required("kind", string(Pattern::NonEmpty)),
        Field::required("summary", string(Pattern::Any)),
    ]);

    let edge = Shape::Object(vec![
        Field::required("from", string(Pattern::NonEmpty)),
        Field::required("to", string(Pattern::NonEmpty)),
        Field::required("relation", string(Pattern::NonEmpty)),
    ]);

    let fork = Shape::Object(vec![
        Field::required("fork_id", string(Pattern::NonEmpty)),
        Field::required("state_digest", string(Pattern::Hex64)),
        Field::required("focus_vars", array(string(Pattern::NonEmpty))),
        Field::required("commitment", string(Pattern::Hex64)),
        Field::required("nonce_ref", string(Pattern::Hex64)),
    ]);

    let factor_snapshot = Shape::Object(vec![
        Field::required("factor_digest", string(Pattern::Hex64)),
        Field::required("dim", Shape::Integer { min: 1 }),
        Field::required("commitment", string(Pattern::Hex64)),
        Field::required("nonce_ref", string(Pattern::Hex64)),
    ]);

    // Direction and effect grammar is parsed by the mutation probe, where a
    // parse failure is a probe failure rather than a schema rejection.
    let claim = Shape::Object(vec![
        Field::required("var", string(Pattern::ClaimVar)),
        Field::required("direction", string(Pattern::NonEmpty)),
        Field::required("expected_effect", string(Pattern::NonEmpty)),
        Field::required("confidence", unit_interval()),
    ]);

    // Mass range is an I1 concern, not a schema one.
    let counterfactual = Shape::Object(vec![
        Field::required("action", string(Pattern::Action)),
        Field::required("prob", finite()),
        Field::optional("rationale", string(Pattern::Any)),
    ]);

    let replay_model = Shape::Object(vec![
        Field::required("actions", array(string(Pattern::Action))),
        Field::required("W", array(array(finite()))),
        Field::required("b", array(finite())),
    ]);

    let salted_input = Shape::Object(vec![
        Field::required("derivation_id", string(Pattern::NonEmpty)),
        Field::required("step", Shape::Integer { min: 0 }),
        Field::required("state", array(finite())),
    ]);

    let trace = Shape::Object(vec![
        Field::required("trace_version", string(Pattern::Exact(TRACE_VERSION))),
        Field::required("trace_commit", string(Pattern::Hex64)),
        Field::required("nodes", array(node)),
        Field::required("edges", array(edge)),
        Field::optional("fork_snapshots", array(fork)),
        Field::optional("factor_snapshot", factor_snapshot),
        Field::optional("causal_claims", array(claim)),
        Field::required("counterfactuals", array(counterfactual)),
        Field::optional("factors", array(unit_interval())),
        Field::optional("replay_model", replay_model),
        Field::optional("salted_input", salted_input),
    ]);

    // `interface` is walked before `trace` so claim variables are checked
    // against a known mode.
    Shape::Object(vec![
        Field::required("proposal_id", string(Pattern::NonEmpty)),
        Field::required("proposal_type", string(Pattern::NonEmpty)),
        Field::required("env_snapshot_ref", string(Pattern::Hex64)),
        Field::required("interface", interface),
        Field::required("payload", payload),
        Field::required("trace", trace),
        Field::required("requested_scope", array(string(Pattern::NonEmpty))),
    ])
}

struct WalkContext {
    mci: bool,
}

fn violation(path: &str, message: impl Into<String>) -> DenialReason {
    let field = if path.is_empty() { "$" } else { path };
    DenialReason::new(ViolationCode::Schema, message).at_field(field)
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn is_hex64(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

fn is_action(s: &str) -> bool {
    let mut bytes = s.bytes();
    match bytes.next() {
        Some(first) if first.is_ascii_uppercase() => {}
        _ => return false,
    }
    bytes.all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_')
}

/// `F:<digits>`
pub fn is_factor_var(s: &str) -> bool {
    s.strip_prefix("F:")
        .map(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
        .unwrap_or(false)
}

fn is_dotted_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.split('.').all(|segment| {
            let mut bytes = segment.bytes();
            match bytes.next() {
                Some(first) if first.is_ascii_alphabetic() || first == b'_' => {}
                _ => return false,
            }
            bytes.all(|b| b.is_ascii_alphanumeric() || b == b'_')
        })
}

fn check_pattern(pattern: Pattern, s: &str, ctx: &WalkContext) -> Result<(), String> {
    match pattern {
        Pattern::Any => Ok(()),
        Pattern::NonEmpty if s.is_empty() => Err("must not be empty".to_string()),
        Pattern::Hex64 if !is_hex64(s) => Err("must be 64 lowercase hex characters".to_string()),
        Pattern::Action if !is_action(s) => {
            Err(format!("'{s}' is not an action name ([A-Z][A-Z0-9_]*)"))
        }
        Pattern::ClaimVar if ctx.mci && !is_factor_var(s) => {
            Err(format!("'{s}' is not a factor reference (F:<digits>)"))
        }
        Pattern::ClaimVar if !is_factor_var(s) && !is_dotted_identifier(s) => {
            Err(format!("'{s}' is neither a dotted identifier nor F:<digits>"))
        }
        Pattern::Exact(expected) if s != expected => {
            Err(format!("expected '{expected}', got '{s}'"))
        }
        _ => Ok(()),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn walk(shape: &Shape, value: &Value, path: &str, ctx: &WalkContext) -> Result<(), DenialReason> {
    match shape {
        Shape::String(pattern) => {
            let s = value
                .as_str()
                .ok_or_else(|| violation(path, format!("expected string, got {}", type_name(value))))?;
            check_pattern(*pattern, s, ctx).map_err(|message| violation(path, message))
        }
        Shape::Number { min, max } => {
            let x = value
                .as_f64()
                .ok_or_else(|| violation(path, format!("expected number, got {}", type_name(value))))?;
            if !x.is_finite() {
                return Err(violation(path, "number must be finite"));
            }
            if let Some(min) = min {
                if x < *min {
                    return Err(violation(path, format!("{x} is below minimum {min}")));
                }
            }
            if let Some(max) = max {
                if x > *max {
                    return Err(violation(path, format!("{x} is above maximum {max}")));
                }
            }
            Ok(())
        }
        Shape::Integer { min } => {
            let n = value.as_u64().ok_or_else(|| {
                violation(path, format!("expected unsigned integer, got {}", describe(value)))
            })?;
            if n < *min {
                return Err(violation(path, format!("{n} is below minimum {min}")));
            }
            Ok(())
        }
        Shape::Array(item) => {
            let items = value
                .as_array()
                .ok_or_else(|| violation(path, format!("expected array, got {}", type_name(value))))?;
            for (i, element) in items.iter().enumerate() {
                walk(item, element, &format!("{path}[{i}]"), ctx)?;
            }
            Ok(())
        }
        Shape::Object(fields) => {
            let map = value
                .as_object()
                .ok_or_else(|| violation(path, format!("expected object, got {}", type_name(value))))?;
            walk_object(fields, map, path, ctx)
        }
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::Number(n) => format!("number {n}"),
        other => type_name(other).to_string(),
    }
}

fn walk_object(
    fields: &[Field],
    map: &Map<String, Value>,
    path: &str,
    ctx: &WalkContext,
) -> Result<(), DenialReason> {
    // Unknown keys in byte order, so the reported key is deterministic.
    if let Some(unknown) = map.keys().find(|k| fields.iter().all(|f| f.name != k.as_str())) {
        return Err(violation(&join(path, unknown), "unknown field"));
    }
    for field in fields {
        let field_path = join(path, field.name);
        match map.get(field.name) {
            None if field.required => return Err(violation(&field_path, "missing required field")),
            Some(Value::Null) if field.required => {
                return Err(violation(&field_path, "required field is null"))
            }
            None | Some(Value::Null) => {}
            Some(value) => walk(&field.shape, value, &field_path, ctx)?,
        }
    }
    Ok(())
}

/// Remove `null`-valued keys so absent and `null` optionals are identical.
fn strip_nulls(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|_, v| !v.is_null());
            map.values_mut().for_each(strip_nulls);
        }
        Value::Array(items) => items.iter_mut().for_each(strip_nulls),
        _ => {}
    }
}

/// Validates raw proposal documents.
#[derive(Debug, Clone)]
pub struct SchemaGate {
    proposal: Shape,
}

impl SchemaGate {
    pub fn new() -> Self {
        Self {
            proposal: proposal_shape(),
        }
    }

    /// Validate `raw` and deserialize it. Rejections carry the field path.
    pub fn check(&self, raw: &Value) -> Result<Proposal, DenialReason> {
        let mode = raw
            .get("interface")
            .and_then(|i| i.get("mode"))
            .and_then(Value::as_str)
            .map(str::parse::<InterfaceMode>);
        let ctx = match mode {
            Some(Ok(mode)) => WalkContext { mci: mode.is_mci() },
            Some(Err(message)) => return Err(violation("interface.mode", message)),
            // Missing interface or mode is reported by the walk.
            None => WalkContext { mci: false },
        };

        walk(&self.proposal, raw, "", &ctx)?;

        let mut normalized = raw.clone();
        strip_nulls(&mut normalized);
        serde_json::from_value(normalized).map_err(|e| violation("", e.to_string()))
    }
}

impl Default for SchemaGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hex(c: char) -> String {
        std::iter::repeat(c).take(64).collect()
    }

    fn valid() -> Value {
        json!({
            "proposal_id": "p-1",
            "proposal_type": "move",
            "env_snapshot_ref": hex('a'),
            "payload": { "intent": "reach goal", "chosen_action": "MOVE_N" },
            "trace": {
                "trace_version": TRACE_VERSION,
                "trace_commit": hex('b'),
                "nodes": [{ "id": "n0", "kind": "observation", "summary": "goal north" }],
                "edges": [],
                "factor_snapshot": {
                    "factor_digest": hex('c'), "dim": 2,
                    "commitment": hex('d'), "nonce_ref": hex('e')
                },
                "causal_claims": [
                    { "var": "F:0", "direction": "INC", "expected_effect": "CHOICE=MOVE_N", "confidence": 0.8 }
                ],
                "counterfactuals": [
                    { "action": "WAIT", "prob": 0.2 },
                    { "action": "MOVE_S", "prob": 0.1 },
                    { "action": "MOVE_N", "prob": 0.7 }
                ],
                "factors": [0.4, 0.6],
                "replay_model": { "actions": ["MOVE_N", "WAIT"], "W": [[1.0, 0.0], [0.0, 1.0]], "b": [0.0, 0.0] }
            },
            "requested_scope": ["act:MOVE_N"],
            "interface": { "mode": "mci_latent", "factor_dim": 2 }
        })
    }

    fn field_of(raw: Value) -> String {
        SchemaGate::new().check(&raw).unwrap_err().field.unwrap()
    }

    #[test]
    fn valid_document_deserializes() {
        let proposal = SchemaGate::new().check(&valid()).unwrap();
        assert_eq!(proposal.payload.chosen_action, "MOVE_N");
    }

    #[test]
    fn dotted_var_rejected_in_mci_mode() {
        let mut raw = valid();
        raw["trace"]["causal_claims"][0]["var"] = json!("agent.pos.x");
        assert_eq!(field_of(raw), "trace.causal_claims[0].var");
    }

    #[test]
    fn dotted_var_accepted_in_full_mode() {
        let mut raw = valid();
        raw["interface"]["mode"] = json!("full");
        raw["trace"]["causal_claims"][0]["var"] = json!("agent.pos.x");
        assert!(SchemaGate::new().check(&raw).is_ok());
    }

    #[test]
    fn unknown_field_reported_with_path() {
        let mut raw = valid();
        raw["trace"]["hidden_planner"] = json!({});
        assert_eq!(field_of(raw), "trace.hidden_planner");
    }

    #[test]
    fn uppercase_hex_rejected() {
        let mut raw = valid();
        raw["env_snapshot_ref"] = json!(hex('A'));
        assert_eq!(field_of(raw), "env_snapshot_ref");
    }

    #[test]
    fn confidence_range_enforced() {
        let mut raw = valid();
        raw["trace"]["causal_claims"][0]["confidence"] = json!(1.5);
        assert_eq!(field_of(raw), "trace.causal_claims[0].confidence");
    }

    #[test]
    fn factors_outside_unit_interval_rejected() {
        let mut raw = valid();
        raw["trace"]["factors"] = json!([1.5, 0.2]);
        assert_eq!(field_of(raw), "trace.factors[0]");

        let mut raw = valid();
        raw["trace"]["factors"] = json!([0.2, -0.01]);
        assert_eq!(field_of(raw), "trace.factors[1]");

        let mut raw = valid();
        raw["trace"]["factors"] = json!([0.0, 1.0]);
        assert!(SchemaGate::new().check(&raw).is_ok());
    }

    #[test]
    fn out_of_range_mass_passes_schema() {
        let mut raw = valid();
        raw["trace"]["counterfactuals"][0]["prob"] = json!(1.5);
        assert!(SchemaGate::new().check(&raw).is_ok());
    }

    #[test]
    fn null_optionals_equal_absent() {
        let mut raw = valid();
        raw["trace"]["fork_snapshots"] = Value::Null;
        raw["interface"]["projection_id"] = Value::Null;
        let a = SchemaGate::new().check(&raw).unwrap();
        let b = SchemaGate::new().check(&valid()).unwrap();
        assert_eq!(a.hash().unwrap(), b.hash().unwrap());
    }

    #[test]
    fn unknown_mode_rejected_before_walk() {
        let mut raw = valid();
        raw["interface"]["mode"] = json!("latent");
        assert_eq!(field_of(raw), "interface.mode");
    }

    #[test]
    fn non_object_root() {
        let reason = SchemaGate::new().check(&json!([1, 2])).unwrap_err();
        assert_eq!(reason.code, ViolationCode::Schema);
        assert_eq!(reason.field.as_deref(), Some("$"));
    }

    #[test]
    fn factor_var_grammar() {
        assert!(is_factor_var("F:0"));
        assert!(is_factor_var("F:12"));
        assert!(!is_factor_var("F:"));
        assert!(!is_factor_var("F:-1"));
        assert!(!is_factor_var("f:1"));
    }
}

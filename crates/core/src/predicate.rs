//! Rule condition predicates.
//!
//! Conditions are a tagged predicate tree over named event-payload fields:
//! comparisons at the leaves, `All`/`Any` as the logical connectives.
//! Trees are validated once at rule-save time and evaluated by a pure
//! interpreter -- a rule condition can never mutate anything.
//!
//! The grammar is a versioned contract with the rule-configuration
//! surface: additive changes only.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// Comparison operators supported at predicate leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Gte,
    Lte,
    Gt,
    Lt,
    Eq,
}

/// A pure, side-effect-free predicate over an event payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Predicate {
    /// Compare a named payload field against a literal.
    Compare {
        field: String,
        op: CompareOp,
        value: serde_json::Value,
    },
    /// True when every child is true. An empty `All` is malformed.
    All { children: Vec<Predicate> },
    /// True when at least one child is true. An empty `Any` is malformed.
    Any { children: Vec<Predicate> },
}

impl Predicate {
    /// Validate the tree once, at rule-save time.
    ///
    /// Rejects empty connectives, empty field names, and literal types the
    /// interpreter cannot compare (objects, arrays, null).
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        match self {
            Predicate::Compare { field, op, value } => {
                if field.is_empty() {
                    return Err(ConfigurationError::MalformedPredicate {
                        detail: "comparison field name is empty".to_string(),
                    });
                }
                match value {
                    serde_json::Value::Number(_) => Ok(()),
                    serde_json::Value::String(_) | serde_json::Value::Bool(_) => {
                        if *op == CompareOp::Eq {
                            Ok(())
                        } else {
                            Err(ConfigurationError::MalformedPredicate {
                                detail: format!(
                                    "ordering comparison on non-numeric literal for field '{}'",
                                    field
                                ),
                            })
                        }
                    }
                    _ => Err(ConfigurationError::MalformedPredicate {
                        detail: format!("unsupported literal type for field '{}'", field),
                    }),
                }
            }
            Predicate::All { children } | Predicate::Any { children } => {
                if children.is_empty() {
                    return Err(ConfigurationError::MalformedPredicate {
                        detail: "empty logical connective".to_string(),
                    });
                }
                for child in children {
                    child.validate()?;
                }
                Ok(())
            }
        }
    }

    /// Evaluate against an event payload.
    ///
    /// Pure interpreter: the payload is read-only and rules never see each
    /// other's state. Referencing a field absent from the payload is a
    /// configuration error, never a match.
    pub fn eval(
        &self,
        payload: &BTreeMap<String, serde_json::Value>,
    ) -> Result<bool, ConfigurationError> {
        match self {
            Predicate::Compare { field, op, value } => {
                let actual =
                    payload
                        .get(field)
                        .ok_or_else(|| ConfigurationError::UnknownField {
                            field: field.clone(),
                        })?;
                compare(field, actual, *op, value)
            }
            Predicate::All { children } => {
                for child in children {
                    if !child.eval(payload)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Predicate::Any { children } => {
                for child in children {
                    if child.eval(payload)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }
}

fn compare(
    field: &str,
    actual: &serde_json::Value,
    op: CompareOp,
    expected: &serde_json::Value,
) -> Result<bool, ConfigurationError> {
    use serde_json::Value;

    match (actual, expected) {
        (Value::Number(a), Value::Number(e)) => {
            let (a, e) = match (a.as_f64(), e.as_f64()) {
                (Some(a), Some(e)) => (a, e),
                _ => {
                    return Err(ConfigurationError::MalformedPredicate {
                        detail: format!("non-finite numeric comparison on field '{}'", field),
                    })
                }
            };
            Ok(match op {
                CompareOp::Gte => a >= e,
                CompareOp::Lte => a <= e,
                CompareOp::Gt => a > e,
                CompareOp::Lt => a < e,
                CompareOp::Eq => a == e,
            })
        }
        (Value::String(a), Value::String(e)) if op == CompareOp::Eq => Ok(a == e),
        (Value::Bool(a), Value::Bool(e)) if op == CompareOp::Eq => Ok(a == e),
        _ => Err(ConfigurationError::MalformedPredicate {
            detail: format!(
                "type mismatch comparing field '{}': payload has {}, rule expects {}",
                field,
                type_name(actual),
                type_name(expected)
            ),
        }),
    }
}

fn type_name(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────

//! # Condition Evaluator
//!
//! Applies a check operator to a resolved value. Evaluation never fails: a
//! missing value is `false` for every operator, and operand shapes the
//! operator cannot compare yield `false` plus a [`ConditionWarning`].

use posture_catalog::Operator;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Soft signal raised when operand types do not fit the operator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionWarning {
    pub operator: Operator,
    pub message: String,
}

impl ConditionWarning {
    fn new(operator: Operator, message: impl Into<String>) -> Self {
        Self {
            operator,
            message: message.into(),
        }
    }
}

impl fmt::Display for ConditionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.operator, self.message)
    }
}

/// Evaluate a condition, discarding any warning
pub fn evaluate(actual: Option<&Value>, operator: Operator, expected: &Value) -> bool {
    evaluate_detailed(actual, operator, expected).0
}

/// Evaluate a condition and report type mismatches
pub fn evaluate_detailed(
    actual: Option<&Value>,
    operator: Operator,
    expected: &Value,
) -> (bool, Option<ConditionWarning>) {
    let Some(actual) = actual else {
        return (false, None);
    };

    match operator {
        Operator::Exists => (!actual.is_null(), None),
        Operator::Equals => (values_equal(actual, expected), None),
        Operator::NotEquals => (!values_equal(actual, expected), None),
        Operator::Contains => match contains(actual, expected, operator) {
            Ok(found) => (found, None),
            Err(warning) => (false, Some(warning)),
        },
        Operator::NotContains => match contains(actual, expected, operator) {
            Ok(found) => (!found, None),
            Err(warning) => (false, Some(warning)),
        },
        Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
            match (as_number(actual), as_number(expected)) {
                (Some(a), Some(e)) => {
                    let passed = match operator {
                        Operator::Gt => a > e,
                        Operator::Gte => a >= e,
                        Operator::Lt => a < e,
                        _ => a <= e,
                    };
                    (passed, None)
                }
                _ => (
                    false,
                    Some(ConditionWarning::new(
                        operator,
                        format!(
                            "cannot compare {} with {} numerically",
                            type_name(actual),
                            type_name(expected)
                        ),
                    )),
                ),
            }
        }
        Operator::In => match expected {
            Value::Array(candidates) => (candidates.iter().any(|c| values_equal(actual, c)), None),
            other => (
                false,
                Some(ConditionWarning::new(
                    operator,
                    format!("expected value must be a list, got {}", type_name(other)),
                )),
            ),
        },
    }
}

fn contains(actual: &Value, expected: &Value, operator: Operator) -> Result<bool, ConditionWarning> {
    match (actual, expected) {
        (Value::String(haystack), Value::String(needle)) => Ok(haystack.contains(needle.as_str())),
        (Value::String(_), other) => Err(ConditionWarning::new(
            operator,
            format!("substring match needs a string, got {}", type_name(other)),
        )),
        (Value::Array(elements), _) => Ok(elements.iter().any(|e| values_equal(e, expected))),
        (other, _) => Err(ConditionWarning::new(
            operator,
            format!("cannot search inside {}", type_name(other)),
        )),
    }
}

/// JSON equality with numeric normalisation, so `1` equals `1.0`
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| values_equal(x, y)))
        }
        _ => a == b,
    }
}

/// Numbers, or strings that parse as numbers
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

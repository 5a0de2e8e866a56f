// Pure interpreter for parsed guard expressions
//
// Evaluation is reentrant and side-effect free: the only inputs are the
// expression tree and the bindings map, the only output is a JSON value.

use std::collections::HashMap;

use serde_json::Value;

use super::parser::{BinaryOp, Expr, UnaryOp};

/// Truthiness coercion for expression results and logical operands.
///
/// `null`, `false`, numeric zero and the empty string are false;
/// everything else (including empty arrays and objects) is true.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Deep equality with numeric widening, so `1` and `1.0` compare equal
/// regardless of how serde_json stored them.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(fx), Some(fy)) => fx == fy,
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

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

fn number_value(n: f64) -> Result<Value, String> {
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        .ok_or_else(|| format!("arithmetic produced a non-finite number ({n})"))
}

/// Evaluate an expression against the bindings.
///
/// Referencing a variable absent from the bindings is an error, not a
/// silent null — a misspelled injection name should be visible, and the
/// `condition` validator turns the error into a non-match.
pub fn evaluate(expr: &Expr, bindings: &HashMap<String, Value>) -> Result<Value, String> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Variable(name) => bindings
            .get(name)
            .cloned()
            .ok_or_else(|| format!("unknown variable \"{name}\"")),
        Expr::Array(elements) => {
            let mut values = Vec::with_capacity(elements.len());
            for element in elements {
                values.push(evaluate(element, bindings)?);
            }
            Ok(Value::Array(values))
        }
        Expr::Unary { op, operand } => {
            let value = evaluate(operand, bindings)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!truthy(&value))),
                UnaryOp::Neg => {
                    let n = as_number(&value)
                        .ok_or_else(|| format!("cannot negate {}", type_name(&value)))?;
                    number_value(-n)
                }
            }
        }
        Expr::Binary { op, left, right } => evaluate_binary(*op, left, right, bindings),
    }
}

fn evaluate_binary(
    op: BinaryOp,
    left: &Expr,
    right: &Expr,
    bindings: &HashMap<String, Value>,
) -> Result<Value, String> {
    // Logical operators short-circuit; everything else is strict.
    match op {
        BinaryOp::Or => {
            let lhs = evaluate(left, bindings)?;
            if truthy(&lhs) {
                return Ok(Value::Bool(true));
            }
            let rhs = evaluate(right, bindings)?;
            return Ok(Value::Bool(truthy(&rhs)));
        }
        BinaryOp::And => {
            let lhs = evaluate(left, bindings)?;
            if !truthy(&lhs) {
                return Ok(Value::Bool(false));
            }
            let rhs = evaluate(right, bindings)?;
            return Ok(Value::Bool(truthy(&rhs)));
        }
        _ => {}
    }

    let lhs = evaluate(left, bindings)?;
    let rhs = evaluate(right, bindings)?;

    match op {
        BinaryOp::Eq => Ok(Value::Bool(values_equal(&lhs, &rhs))),
        BinaryOp::NotEq => Ok(Value::Bool(!values_equal(&lhs, &rhs))),
        BinaryOp::Lt | BinaryOp::Lte | BinaryOp::Gt | BinaryOp::Gte => {
            let ordering = compare(&lhs, &rhs)?;
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Lte => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }
        BinaryOp::In => membership(&lhs, &rhs),
        BinaryOp::Add => match (&lhs, &rhs) {
            (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{a}{b}"))),
            _ => {
                let (a, b) = numeric_pair(&lhs, &rhs, "+")?;
                number_value(a + b)
            }
        },
        BinaryOp::Sub => {
            let (a, b) = numeric_pair(&lhs, &rhs, "-")?;
            number_value(a - b)
        }
        BinaryOp::Mul => {
            let (a, b) = numeric_pair(&lhs, &rhs, "*")?;
            number_value(a * b)
        }
        BinaryOp::Div => {
            let (a, b) = numeric_pair(&lhs, &rhs, "/")?;
            number_value(a / b)
        }
        BinaryOp::Rem => {
            let (a, b) = numeric_pair(&lhs, &rhs, "%")?;
            number_value(a % b)
        }
        BinaryOp::Or | BinaryOp::And => unreachable!("handled above"),
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

fn numeric_pair(lhs: &Value, rhs: &Value, op: &str) -> Result<(f64, f64), String> {
    match (as_number(lhs), as_number(rhs)) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(format!(
            "operator '{op}' needs numbers, got {} and {}",
            type_name(lhs),
            type_name(rhs)
        )),
    }
}

fn compare(lhs: &Value, rhs: &Value) -> Result<std::cmp::Ordering, String> {
    match (lhs, rhs) {
        (Value::Number(_), Value::Number(_)) => {
            let a = as_number(lhs).ok_or("number out of range")?;
            let b = as_number(rhs).ok_or("number out of range")?;
            a.partial_cmp(&b).ok_or_else(|| "numbers do not compare".to_string())
        }
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        _ => Err(format!(
            "cannot compare {} with {}",
            type_name(lhs),
            type_name(rhs)
        )),
    }
}

fn membership(needle: &Value, haystack: &Value) -> Result<Value, String> {
    match haystack {
        Value::Array(items) => Ok(Value::Bool(
            items.iter().any(|item| values_equal(needle, item)),
        )),
        Value::String(s) => match needle {
            Value::String(sub) => Ok(Value::Bool(s.contains(sub.as_str()))),
            _ => Err(format!(
                "'in' on a string needs a string operand, got {}",
                type_name(needle)
            )),
        },
        _ => Err(format!(
            "'in' needs an array or string right-hand side, got {}",
            type_name(haystack)
        )),
    }
}

//! Expression sandbox
//!
//! The only place the engine runs author-supplied code. A condition string
//! from a rule set is parsed into a small fixed-grammar tree and
//! interpreted against the per-request injection bindings; the result is
//! coerced to a boolean via truthiness rules.
//!
//! The sandbox is pure by construction: no I/O, no clock, no randomness,
//! no host state is reachable from an expression. Its entire surface is the
//! token set in [`parser`] and the operator semantics in [`eval`].

pub mod eval;
pub mod parser;

use std::collections::HashMap;

use serde_json::Value;

use crate::errors::ExpressionError;

pub use eval::{truthy, values_equal};

/// Evaluate `source` with the given bindings and coerce the result to bool.
///
/// Parse and evaluation failures both carry the source text so a rule
/// author can see which condition of which variant misbehaved.
pub fn evaluate(source: &str, bindings: &HashMap<String, Value>) -> Result<bool, ExpressionError> {
    let expr = parser::parse(source).map_err(|message| ExpressionError::new(source, message))?;
    let value =
        eval::evaluate(&expr, bindings).map_err(|message| ExpressionError::new(source, message))?;
    Ok(truthy(&value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_evaluate_reports_source_text() {
        let err = evaluate("$nope ==", &HashMap::new()).unwrap_err();
        assert_eq!(err.expression, "$nope ==");
    }

    #[test]
    fn test_evaluate_truthy_coercion() {
        let mut bindings = HashMap::new();
        bindings.insert("$name".to_string(), json!("abc"));
        assert!(evaluate("$name", &bindings).unwrap());
        bindings.insert("$name".to_string(), json!(""));
        assert!(!evaluate("$name", &bindings).unwrap());
    }
}

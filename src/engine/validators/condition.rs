// The `condition` validator: boolean gates and sandbox expressions

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::{CompileError, CompileResult, GateResult};
use crate::expression;

use super::{ValidationContext, ValidatorHandler};

const NON_MATCH: &str = "condition evaluted to false";

/// Gate a variant on a boolean or on sandbox expressions over the
/// injection map. A sequence config is conjunctive: every entry must hold.
pub struct ConditionValidator;

fn check_entry_shape(value: &Value) -> CompileResult<()> {
    match value {
        Value::Bool(_) | Value::String(_) => Ok(()),
        other => Err(CompileError::bad_shape(
            "condition",
            format!("expected boolean or expression string, got {other}"),
        )),
    }
}

fn check_entry(value: &Value, ctx: &ValidationContext<'_>) -> Option<String> {
    match value {
        Value::Bool(true) => None,
        Value::Bool(false) => Some(NON_MATCH.to_string()),
        Value::String(expr) => match expression::evaluate(expr, ctx.injections) {
            Ok(true) => None,
            Ok(false) => Some(NON_MATCH.to_string()),
            // A broken expression denies this variant but does not poison
            // the engine; the author sees the parse/eval message.
            Err(e) => Some(e.to_string()),
        },
        _ => Some(NON_MATCH.to_string()),
    }
}

#[async_trait]
impl ValidatorHandler for ConditionValidator {
    fn check_config(&self, config: &Value) -> CompileResult<()> {
        match config {
            Value::Array(entries) => {
                for entry in entries {
                    check_entry_shape(entry)?;
                }
                Ok(())
            }
            other => check_entry_shape(other),
        }
    }

    async fn check(
        &self,
        config: Option<&Value>,
        ctx: &mut ValidationContext<'_>,
    ) -> GateResult<Option<String>> {
        let Some(config) = config else {
            return Ok(None);
        };
        match config {
            Value::Array(entries) => {
                for entry in entries {
                    if let Some(message) = check_entry(entry, ctx) {
                        return Ok(Some(message));
                    }
                }
                Ok(None)
            }
            single => Ok(check_entry(single, ctx)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::memory::MemoryAccessor;
    use crate::models::{DataAction, DataRequest};
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    async fn run(config: &Value, injections: &super::super::InjectionMap) -> Option<String> {
        let accessor = MemoryAccessor::new();
        let mut request = DataRequest::new("things", DataAction::Read);
        let cancel = CancellationToken::new();
        let mut ctx = ValidationContext {
            request: &mut request,
            action: DataAction::Read,
            injections,
            accessor: &accessor,
            cancel: &cancel,
        };
        ConditionValidator
            .check(Some(config), &mut ctx)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_boolean_configs() {
        let injections = Default::default();
        assert_eq!(run(&json!(true), &injections).await, None);
        assert_eq!(
            run(&json!(false), &injections).await.as_deref(),
            Some("condition evaluted to false")
        );
    }

    #[tokio::test]
    async fn test_expression_config_uses_injections() {
        let mut injections = super::super::InjectionMap::new();
        injections.insert("$userid".to_string(), json!(42));
        assert_eq!(run(&json!("$userid == 42"), &injections).await, None);
        assert!(run(&json!("$userid == 1"), &injections).await.is_some());
    }

    #[tokio::test]
    async fn test_sequence_is_conjunctive() {
        let mut injections = super::super::InjectionMap::new();
        injections.insert("$a".to_string(), json!(1));
        assert_eq!(
            run(&json!([true, "$a == 1"]), &injections).await,
            None
        );
        assert!(run(&json!([true, false]), &injections).await.is_some());
    }

    #[tokio::test]
    async fn test_broken_expression_is_a_non_match() {
        let injections = Default::default();
        let message = run(&json!("$missing =="), &injections).await.unwrap();
        assert!(message.contains("$missing"));
    }

    #[test]
    fn test_config_shape_rejects_numbers() {
        assert!(ConditionValidator.check_config(&json!(5)).is_err());
        assert!(ConditionValidator.check_config(&json!([true, 5])).is_err());
        assert!(ConditionValidator.check_config(&json!([true, "x"])).is_ok());
    }
}

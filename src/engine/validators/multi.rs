// The `multi` validator: may this request touch more than one document?

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::{CompileError, CompileResult, GateResult};
use crate::expression;
use crate::models::DataAction;

use super::{ValidationContext, ValidatorHandler};

/// Decide whether a multi-document request is allowed.
///
/// A boolean config overrides outright; a string config is a sandbox
/// expression evaluated with the injections plus the unprefixed `query`,
/// `data` and `multi` request fields; no config falls back to the per-
/// action default (reads allowed, everything else denied).
pub struct MultiValidator;

enum Allow {
    Yes,
    No,
    NonMatch(String),
}

fn computed_allow(config: Option<&Value>, ctx: &ValidationContext<'_>) -> Allow {
    match config {
        None => {
            if ctx.action == DataAction::Read {
                Allow::Yes
            } else {
                Allow::No
            }
        }
        Some(Value::Bool(true)) => Allow::Yes,
        Some(Value::Bool(false)) => Allow::No,
        Some(Value::String(expr)) => {
            let mut bindings = ctx.injections.clone();
            bindings.insert(
                "query".to_string(),
                ctx.request.query.clone().unwrap_or(Value::Null),
            );
            bindings.insert(
                "data".to_string(),
                ctx.request.data.clone().unwrap_or(Value::Null),
            );
            bindings.insert(
                "multi".to_string(),
                Value::Bool(ctx.request.multi == Some(true)),
            );
            match expression::evaluate(expr, &bindings) {
                Ok(true) => Allow::Yes,
                Ok(false) => Allow::No,
                Err(e) => Allow::NonMatch(e.to_string()),
            }
        }
        // Unreachable after compile-time shape checking
        Some(_) => Allow::No,
    }
}

#[async_trait]
impl ValidatorHandler for MultiValidator {
    fn check_config(&self, config: &Value) -> CompileResult<()> {
        match config {
            Value::Bool(_) | Value::String(_) => Ok(()),
            other => Err(CompileError::bad_shape(
                "multi",
                format!("expected boolean or expression string, got {other}"),
            )),
        }
    }

    async fn check(
        &self,
        config: Option<&Value>,
        ctx: &mut ValidationContext<'_>,
    ) -> GateResult<Option<String>> {
        // Batch inserts are gated on the request's own multi flag first.
        if ctx.action == DataAction::Add
            && matches!(ctx.request.data, Some(Value::Array(_)))
            && ctx.request.multi != Some(true)
        {
            return Ok(Some("multi insert operation denied".to_string()));
        }

        let allow = match computed_allow(config, ctx) {
            Allow::Yes => true,
            Allow::No => false,
            Allow::NonMatch(message) => return Ok(Some(message)),
        };

        if !allow && ctx.request.multi == Some(true) {
            return Ok(Some("multi operation denied".to_string()));
        }

        Ok(None)
    }
}

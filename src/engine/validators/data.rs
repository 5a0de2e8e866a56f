// The `data` validator: payload shape, the merge/operator rule, and
// per-field rules evaluated against the flattened payload

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::errors::{CompileError, CompileResult, GateResult};
use crate::models::DataAction;
use crate::operators::is_update_operator;

use super::field_rules::{self, FieldRules};
use super::{ValidationContext, ValidatorHandler};

/// Validate `request.data` on add and update requests.
///
/// Other actions pass untouched — a `data` block in a read rule is legal
/// and inert, which keeps `$schema` compilation uniform.
pub struct DataValidator;

/// Merge operator sub-mappings one level up, so `{$set: {a: 1}, b: 2}`
/// flattens to `{a: 1, b: 2}` for field-rule purposes.
fn flatten(data: &Map<String, Value>) -> Map<String, Value> {
    let mut flat = Map::new();
    for (key, value) in data {
        if is_update_operator(key) {
            if let Value::Object(inner) = value {
                for (field, field_value) in inner {
                    flat.insert(field.clone(), field_value.clone());
                }
            }
        } else {
            flat.insert(key.clone(), value.clone());
        }
    }
    flat
}

#[async_trait]
impl ValidatorHandler for DataValidator {
    fn check_config(&self, config: &Value) -> CompileResult<()> {
        let Value::Object(fields) = config else {
            return Err(CompileError::bad_shape(
                "data",
                format!("expected a mapping of field rules, got {config}"),
            ));
        };
        for (field, rule) in fields {
            FieldRules::parse(field, rule)?;
        }
        Ok(())
    }

    async fn check(
        &self,
        config: Option<&Value>,
        ctx: &mut ValidationContext<'_>,
    ) -> GateResult<Option<String>> {
        let Some(config) = config else {
            return Ok(None);
        };
        if !matches!(ctx.action, DataAction::Add | DataAction::Update) {
            return Ok(None);
        }

        let Some(data) = &ctx.request.data else {
            return Ok(Some("data is undefined".to_string()));
        };
        let Value::Object(data) = data else {
            return Ok(Some("data must be an object".to_string()));
        };
        if data.is_empty() {
            return Ok(Some("data is empty".to_string()));
        }

        if ctx.action == DataAction::Update {
            let has_operator = data.keys().any(|key| is_update_operator(key));
            let merge = ctx.request.merge == Some(true);
            if merge && !has_operator {
                return Ok(Some(
                    "data must contain operator while `merge` with true".to_string(),
                ));
            }
            if !merge && has_operator {
                return Ok(Some("data must not contain any operator".to_string()));
            }
        }

        let flat = flatten(data);
        let apply_defaults = field_rules::defaults_apply(ctx.action);

        // Compile already vetted the shape; a mismatch here is a bug, not
        // an author error, so the parse is treated as infallible.
        let fields = config.as_object().cloned().unwrap_or_default();
        for (field, rule_source) in &fields {
            let rules = FieldRules::parse(field, rule_source)?;
            let value = flat.get(field).cloned();
            if let Some(message) =
                field_rules::apply(field, &rules, value, apply_defaults, ctx).await?
            {
                return Ok(Some(message));
            }
        }

        Ok(None)
    }
}

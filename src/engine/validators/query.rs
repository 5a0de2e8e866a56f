// The `query` validator: field whitelisting plus optional per-field rules

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::errors::{CompileError, CompileResult, GateResult};
use crate::operators::is_operator;

use super::field_rules::{self, FieldRules};
use super::{ValidationContext, ValidatorHandler};

/// Restrict which top-level query fields a caller may filter on, and
/// optionally validate the filter values with the same field-rule language
/// the `data` validator uses.
///
/// A sequence config is a pure whitelist; a mapping config whitelists its
/// keys and applies each field's rules to `query[field]`. Operator keys
/// (`$or`, `$gt`, …) are transparently stripped when enumerating the input
/// fields.
pub struct QueryValidator;

fn whitelist_from_sequence(entries: &[Value]) -> CompileResult<Vec<String>> {
    entries
        .iter()
        .map(|entry| {
            entry.as_str().map(str::to_string).ok_or_else(|| {
                CompileError::bad_shape(
                    "query",
                    format!("whitelist entries must be strings, got {entry}"),
                )
            })
        })
        .collect()
}

/// Top-level query keys that count as caller-supplied fields
fn input_fields(query: &Map<String, Value>) -> impl Iterator<Item = &String> {
    query.keys().filter(|key| !is_operator(key))
}

#[async_trait]
impl ValidatorHandler for QueryValidator {
    fn check_config(&self, config: &Value) -> CompileResult<()> {
        match config {
            Value::Array(entries) => {
                whitelist_from_sequence(entries)?;
                Ok(())
            }
            Value::Object(fields) => {
                for (field, rule) in fields {
                    FieldRules::parse(field, rule)?;
                }
                Ok(())
            }
            other => Err(CompileError::bad_shape(
                "query",
                format!("expected a whitelist sequence or field-rule mapping, got {other}"),
            )),
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

        let Some(query) = &ctx.request.query else {
            return Ok(Some("query is undefined".to_string()));
        };
        let Value::Object(query) = query else {
            return Ok(Some("query must be an object".to_string()));
        };
        let query = query.clone();

        let (allowed, rules): (Vec<String>, Option<Map<String, Value>>) = match config {
            Value::Array(entries) => (whitelist_from_sequence(entries)?, None),
            Value::Object(fields) => (
                fields.keys().cloned().collect(),
                Some(fields.clone()),
            ),
            _ => (Vec::new(), None),
        };

        for field in input_fields(&query) {
            if !allowed.iter().any(|allow| allow == field) {
                return Ok(Some(format!("the field '{field}' is NOT allowed]")));
            }
        }

        if let Some(rules) = rules {
            for (field, rule_source) in &rules {
                let parsed = FieldRules::parse(field, rule_source)?;
                let value = query.get(field).cloned();
                if let Some(message) =
                    field_rules::apply(field, &parsed, value, false, ctx).await?
                {
                    return Ok(Some(message));
                }
            }
        }

        Ok(None)
    }
}

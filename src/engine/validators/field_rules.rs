// The per-field rule language shared by the `data` and `query` validators
//
// A field rule is either a bare condition string or a mapping over a fixed
// key vocabulary. Parsing doubles as the compile-time shape check; unknown
// keys are fatal when rules load.

use serde_json::{Map, Value};

use crate::errors::{CompileError, CompileResult, GateResult};
use crate::expression;
use crate::models::DataAction;

use super::ValidationContext;

/// Reference target of an `exists` rule, written as `"/collection/key"`
#[derive(Debug, Clone, PartialEq)]
pub struct ExistsRef {
    pub collection: String,
    pub key: String,
}

impl ExistsRef {
    fn parse(field: &str, raw: &Value) -> CompileResult<Self> {
        let text = raw.as_str().ok_or_else(|| {
            CompileError::bad_shape(
                format!("field \"{field}\""),
                "exists must be a \"/collection/key\" string",
            )
        })?;
        let mut parts = text.strip_prefix('/').unwrap_or(text).splitn(2, '/');
        match (parts.next(), parts.next()) {
            (Some(collection), Some(key)) if !collection.is_empty() && !key.is_empty() => {
                Ok(Self {
                    collection: collection.to_string(),
                    key: key.to_string(),
                })
            }
            _ => Err(CompileError::bad_shape(
                format!("field \"{field}\""),
                format!("exists reference \"{text}\" is not /collection/key"),
            )),
        }
    }
}

/// One compiled field rule
#[derive(Debug, Clone, Default)]
pub struct FieldRules {
    pub required: bool,
    pub default: Option<Value>,
    pub one_of: Option<Vec<Value>>,
    pub length: Option<(f64, Option<f64>)>,
    pub number: Option<(f64, Option<f64>)>,
    pub pattern: Option<String>,
    pub exists: Option<ExistsRef>,
    pub unique: bool,
    pub condition: Option<String>,
}

fn parse_range(field: &str, key: &str, raw: &Value) -> CompileResult<(f64, Option<f64>)> {
    let items = raw.as_array().ok_or_else(|| {
        CompileError::bad_shape(
            format!("field \"{field}\""),
            format!("{key} must be [min] or [min, max]"),
        )
    })?;
    let bound = |index: usize| items.get(index).and_then(Value::as_f64);
    match (items.len(), bound(0)) {
        (1, Some(min)) => Ok((min, None)),
        (2, Some(min)) => {
            let max = bound(1).ok_or_else(|| {
                CompileError::bad_shape(
                    format!("field \"{field}\""),
                    format!("{key} max bound must be a number"),
                )
            })?;
            Ok((min, Some(max)))
        }
        _ => Err(CompileError::bad_shape(
            format!("field \"{field}\""),
            format!("{key} must be [min] or [min, max] of numbers"),
        )),
    }
}

impl FieldRules {
    /// Parse a field rule from its source value.
    ///
    /// A string is shorthand for `{condition: "<string>"}`. Unknown keys
    /// in the mapping form are fatal (`UnknownRule`).
    pub fn parse(field: &str, raw: &Value) -> CompileResult<Self> {
        let mapping: &Map<String, Value> = match raw {
            Value::String(expr) => {
                return Ok(Self {
                    condition: Some(expr.clone()),
                    ..Self::default()
                });
            }
            Value::Object(mapping) => mapping,
            other => {
                return Err(CompileError::bad_shape(
                    format!("field \"{field}\""),
                    format!("rule must be a string or mapping, got {other}"),
                ));
            }
        };

        let mut rules = Self::default();
        for (key, value) in mapping {
            match key.as_str() {
                "required" => {
                    rules.required = value.as_bool().ok_or_else(|| {
                        CompileError::bad_shape(
                            format!("field \"{field}\""),
                            "required must be a boolean",
                        )
                    })?;
                }
                "default" => rules.default = Some(value.clone()),
                "in" => {
                    rules.one_of = Some(
                        value
                            .as_array()
                            .ok_or_else(|| {
                                CompileError::bad_shape(
                                    format!("field \"{field}\""),
                                    "in must be a sequence",
                                )
                            })?
                            .clone(),
                    );
                }
                "length" => rules.length = Some(parse_range(field, "length", value)?),
                "number" => rules.number = Some(parse_range(field, "number", value)?),
                "match" => {
                    let pattern = value.as_str().ok_or_else(|| {
                        CompileError::bad_shape(
                            format!("field \"{field}\""),
                            "match must be a regex string",
                        )
                    })?;
                    regex::Regex::new(pattern).map_err(|e| {
                        CompileError::bad_shape(format!("field \"{field}\""), e.to_string())
                    })?;
                    rules.pattern = Some(pattern.to_string());
                }
                "exists" => rules.exists = Some(ExistsRef::parse(field, value)?),
                "unique" => rules.unique = expression::truthy(value),
                "condition" => {
                    let expr = value.as_str().ok_or_else(|| {
                        CompileError::bad_shape(
                            format!("field \"{field}\""),
                            "condition must be a string",
                        )
                    })?;
                    rules.condition = Some(expr.to_string());
                }
                unknown => {
                    return Err(CompileError::UnknownRule {
                        field: field.to_string(),
                        key: unknown.to_string(),
                    });
                }
            }
        }
        Ok(rules)
    }
}

/// Format a value the way rule authors wrote it, for the `in` message
fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => format_number(n.as_f64().unwrap_or(0.0)),
        other => other.to_string(),
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// Apply one field's rules to its flattened value.
///
/// `apply_defaults` is true only for `data` on add; it is what makes
/// `required`/`default` inert for updates and query rules. An absent value
/// (after default application) skips every value check, which is what
/// permits partial updates.
pub async fn apply(
    field: &str,
    rules: &FieldRules,
    value: Option<Value>,
    apply_defaults: bool,
    ctx: &mut ValidationContext<'_>,
) -> GateResult<Option<String>> {
    let mut value = value;

    if apply_defaults {
        let missing = value.as_ref().map_or(true, Value::is_null);
        if missing {
            if let Some(default) = &rules.default {
                // Write the default into the original data mapping so the
                // accessor sees it on dispatch.
                if let Some(Value::Object(map)) = ctx.request.data.as_mut() {
                    map.insert(field.to_string(), default.clone());
                }
                value = Some(default.clone());
            } else if rules.required {
                return Ok(Some(format!("{field} is required")));
            }
        }
    }

    // Absent field: nothing left to check (partial update / optional add)
    let Some(value) = value else {
        return Ok(None);
    };

    if let Some(one_of) = &rules.one_of {
        if !one_of.iter().any(|item| expression::values_equal(&value, item)) {
            let listing = one_of
                .iter()
                .map(display_value)
                .collect::<Vec<_>>()
                .join(",");
            return Ok(Some(format!("{field} should equal to one of [{listing}]")));
        }
    }

    if let Some((min, max)) = rules.length {
        let length = value.as_str().map(|s| s.chars().count() as f64);
        let ok = length.is_some_and(|len| len >= min && max.is_none_or(|m| len <= m));
        if !ok {
            let mut message = format!("length of {field} should >= {}", format_number(min));
            if let Some(max) = max {
                message.push_str(&format!(" and <= {}", format_number(max)));
            }
            return Ok(Some(message));
        }
    }

    if let Some((min, max)) = rules.number {
        let number = value.as_f64();
        let ok = number.is_some_and(|n| n >= min && max.is_none_or(|m| n <= m));
        if !ok {
            let mut message = format!("{field} should >= {}", format_number(min));
            if let Some(max) = max {
                message.push_str(&format!(" and <= {}", format_number(max)));
            }
            return Ok(Some(message));
        }
    }

    if let Some(pattern) = &rules.pattern {
        let matched = match (value.as_str(), regex::Regex::new(pattern)) {
            (Some(s), Ok(re)) => re.is_match(s),
            _ => false,
        };
        if !matched {
            return Ok(Some(format!("{field} had invalid format")));
        }
    }

    if let Some(exists) = &rules.exists {
        let query = lookup_query(&exists.key, &value);
        let found = ctx.guarded_get(&exists.collection, &query).await?;
        if found.is_none() {
            return Ok(Some(format!("{field} not exists")));
        }
    }

    if rules.unique {
        let collection = ctx.request.collection.clone();
        let query = lookup_query(field, &value);
        let found = ctx.guarded_get(&collection, &query).await?;
        if found.is_some() {
            return Ok(Some(format!("{field} already exists")));
        }
    }

    if let Some(condition) = &rules.condition {
        let mut bindings = ctx.injections.clone();
        bindings.insert("$value".to_string(), value);
        match expression::evaluate(condition, &bindings) {
            Ok(true) => {}
            Ok(false) => return Ok(Some("condition evaluted to false".to_string())),
            Err(e) => return Ok(Some(e.to_string())),
        }
    }

    Ok(None)
}

/// Should `required`/`default` act for this (validator, action) pairing?
pub fn defaults_apply(action: DataAction) -> bool {
    action == DataAction::Add
}

fn lookup_query(key: &str, value: &Value) -> Value {
    let mut query = Map::new();
    query.insert(key.to_string(), value.clone());
    Value::Object(query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_string_shorthand_becomes_condition() {
        let rules = FieldRules::parse("author_id", &json!("$userid == $value")).unwrap();
        assert_eq!(rules.condition.as_deref(), Some("$userid == $value"));
        assert!(!rules.required);
    }

    #[test]
    fn test_unknown_key_is_fatal() {
        let err = FieldRules::parse("title", &json!({"requird": true})).unwrap_err();
        match err {
            CompileError::UnknownRule { field, key } => {
                assert_eq!(field, "title");
                assert_eq!(key, "requird");
            }
            other => panic!("expected UnknownRule, got {other:?}"),
        }
    }

    #[test]
    fn test_range_shapes() {
        let rules = FieldRules::parse("title", &json!({"length": [3, 6]})).unwrap();
        assert_eq!(rules.length, Some((3.0, Some(6.0))));
        let rules = FieldRules::parse("age", &json!({"number": [18]})).unwrap();
        assert_eq!(rules.number, Some((18.0, None)));
        assert!(FieldRules::parse("age", &json!({"number": "18"})).is_err());
    }

    #[test]
    fn test_exists_reference_parsing() {
        let rules = FieldRules::parse("owner", &json!({"exists": "/users/id"})).unwrap();
        let reference = rules.exists.unwrap();
        assert_eq!(reference.collection, "users");
        assert_eq!(reference.key, "id");
        assert!(FieldRules::parse("owner", &json!({"exists": "/users"})).is_err());
    }

    #[test]
    fn test_bad_regex_fails_at_parse_time() {
        assert!(FieldRules::parse("title", &json!({"match": "("})).is_err());
    }
}

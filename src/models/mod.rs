use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use strum::{Display, EnumString};

pub mod rules;

/// The six data actions a caller can request, keyed by their wire tokens.
///
/// The request model keeps the raw token string; resolution happens in the
/// matcher so an unknown token surfaces as a structural validate error
/// instead of a deserialization fault.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display,
)]
pub enum DataAction {
    #[strum(serialize = "database.queryDocument")]
    #[serde(rename = "database.queryDocument")]
    Read,
    #[strum(serialize = "database.addDocument")]
    #[serde(rename = "database.addDocument")]
    Add,
    #[strum(serialize = "database.updateDocument")]
    #[serde(rename = "database.updateDocument")]
    Update,
    #[strum(serialize = "database.deleteDocument")]
    #[serde(rename = "database.deleteDocument")]
    Remove,
    #[strum(serialize = "database.countDocument")]
    #[serde(rename = "database.countDocument")]
    Count,
    #[strum(serialize = "database.watchDocument")]
    #[serde(rename = "database.watchDocument")]
    Watch,
}

impl DataAction {
    /// Key under which a compiled permission is stored for this action
    pub fn permission_name(&self) -> &'static str {
        match self {
            DataAction::Read => "read",
            DataAction::Add => "add",
            DataAction::Update => "update",
            DataAction::Remove => "remove",
            DataAction::Count => "count",
            DataAction::Watch => "watch",
        }
    }
}

/// Sort direction tokens, case-sensitive on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortOrder {
    pub field: String,
    pub direction: SortDirection,
}

/// A uniform data request as delivered by a transport adapter
///
/// Everything except `collection` and `action` is optional; `limit: 0`
/// means "use the engine default" and is substituted by the gateway before
/// dispatch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataRequest {
    pub collection: String,
    /// Raw action token, e.g. `database.queryDocument`
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<Vec<SortOrder>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projection: Option<HashMap<String, u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multi: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upsert: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge: Option<bool>,
    #[serde(default, rename = "requestId", skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl DataRequest {
    /// Build a request for the given collection and action
    pub fn new<C: Into<String>>(collection: C, action: DataAction) -> Self {
        Self {
            collection: collection.into(),
            action: action.to_string(),
            ..Self::default()
        }
    }

    /// Resolve the raw action token; `None` for unknown tokens
    pub fn resolve_action(&self) -> Option<DataAction> {
        self.action.parse().ok()
    }

    #[must_use]
    pub fn with_query(mut self, query: Value) -> Self {
        self.query = Some(query);
        self
    }

    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    #[must_use]
    pub fn with_multi(mut self, multi: bool) -> Self {
        self.multi = Some(multi);
        self
    }

    #[must_use]
    pub fn with_merge(mut self, merge: bool) -> Self {
        self.merge = Some(merge);
        self
    }
}

/// Where a validate error originated: `0` for structural failures that
/// precede any validator, otherwise the validator's registered name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorSource {
    Structural(u8),
    Validator(String),
}

/// One denial reason, serialized as `{"type": ..., "error": "..."}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidateError {
    #[serde(rename = "type")]
    pub source: ErrorSource,
    pub error: String,
}

impl ValidateError {
    /// A failure detected before any validator ran (`type: 0`)
    pub fn structural<M: Into<String>>(message: M) -> Self {
        Self {
            source: ErrorSource::Structural(0),
            error: message.into(),
        }
    }

    /// A non-match recorded against a named validator
    pub fn validator<N: Into<String>, M: Into<String>>(name: N, message: M) -> Self {
        Self {
            source: ErrorSource::Validator(name.into()),
            error: message.into(),
        }
    }
}

/// Result of matching one request against the permission table
///
/// Exactly one side is ever populated: the raw source variant that
/// matched, or the accumulated per-variant errors in discovery order.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ValidateOutcome {
    Matched { matched: Value },
    Denied { errors: Vec<ValidateError> },
}

impl ValidateOutcome {
    pub fn is_matched(&self) -> bool {
        matches!(self, ValidateOutcome::Matched { .. })
    }

    /// The matched variant's source object, if any
    pub fn matched(&self) -> Option<&Value> {
        match self {
            ValidateOutcome::Matched { matched } => Some(matched),
            ValidateOutcome::Denied { .. } => None,
        }
    }

    /// The denial errors, if any
    pub fn errors(&self) -> Option<&[ValidateError]> {
        match self {
            ValidateOutcome::Matched { .. } => None,
            ValidateOutcome::Denied { errors } => Some(errors),
        }
    }
}

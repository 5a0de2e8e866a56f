//! Built-in validator handlers
//!
//! A validator is a named predicate contributing one line of a rule
//! variant. Handlers are total: "not configured" is a distinct config
//! value (`None`) that every handler answers with a no-op pass. A handler
//! returning `Ok(Some(message))` signals a *non-match* — ordinary control
//! flow that lets the matcher fall through to the next variant — while
//! `Err` is a genuine fault that aborts the request.

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::accessor::DocumentAccessor;
use crate::errors::{CompileResult, GateError, GateResult};
use crate::models::{DataAction, DataRequest};

mod condition;
mod data;
mod field_rules;
mod multi;
mod query;

pub use condition::ConditionValidator;
pub use data::DataValidator;
pub use multi::MultiValidator;
pub use query::QueryValidator;

/// Per-request bindings exposed to the expression sandbox
pub type InjectionMap = std::collections::HashMap<String, Value>;

/// Everything a handler may look at while checking one request
///
/// The request is mutable because the `default` field rule writes
/// defaults back into the original data mapping. Handlers run strictly
/// sequentially within a variant, so the mutable borrow is never shared.
pub struct ValidationContext<'a> {
    pub request: &'a mut DataRequest,
    pub action: DataAction,
    pub injections: &'a InjectionMap,
    pub accessor: &'a dyn DocumentAccessor,
    pub cancel: &'a CancellationToken,
}

impl ValidationContext<'_> {
    /// Run an accessor lookup, aborting with `Cancelled` if the request's
    /// token fires first.
    pub async fn guarded_get(
        &self,
        collection: &str,
        query: &Value,
    ) -> GateResult<Option<Value>> {
        let lookup = self.accessor.get(collection, query);
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(GateError::Cancelled),
            result = lookup => result.map_err(GateError::from),
        }
    }
}

/// The pluggable validator contract
///
/// `check_config` runs once at compile time so malformed configs (unknown
/// field-rule keys, wrong shapes) are fatal when rules load, never at
/// request time. `check` runs per request per variant.
#[async_trait]
pub trait ValidatorHandler: Send + Sync {
    /// Validate a config value at rule-compile time
    fn check_config(&self, _config: &Value) -> CompileResult<()> {
        Ok(())
    }

    /// Evaluate one request; `Ok(None)` passes, `Ok(Some(msg))` is a
    /// non-match, `Err` is a fault
    async fn check(
        &self,
        config: Option<&Value>,
        ctx: &mut ValidationContext<'_>,
    ) -> GateResult<Option<String>>;
}

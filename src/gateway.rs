//! Entry facade
//!
//! One call — `execute(request)` — behind which validation and dispatch
//! live. Injectors derive expression bindings from the request (caller
//! identity, usually); the rule engine decides; the accessor executes.
//! A denial surfaces as `GateError::PermissionDenied` carrying the
//! per-variant errors, so transports can serialize them unchanged.

use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::accessor::{DataResponse, DocumentAccessor, FindOptions, UpdateOptions};
use crate::engine::{InjectionMap, RuleEngine};
use crate::errors::{AccessorError, GateError, GateResult};
use crate::models::{DataAction, DataRequest, ValidateOutcome};

/// A pure function deriving one expression binding from a request
pub type Injector = Box<dyn Fn(&DataRequest) -> (String, Value) + Send + Sync>;

pub struct Gateway {
    engine: RuleEngine,
    accessor: Arc<dyn DocumentAccessor>,
    injectors: Vec<Injector>,
    default_limit: u64,
    max_limit: u64,
}

impl Gateway {
    pub fn new(accessor: Arc<dyn DocumentAccessor>) -> Self {
        Self {
            engine: RuleEngine::new(Arc::clone(&accessor)),
            accessor,
            injectors: Vec::new(),
            default_limit: crate::config::defaults::default_limit(),
            max_limit: crate::config::defaults::default_max_limit(),
        }
    }

    /// Apply the engine paging settings from configuration
    #[must_use]
    pub fn with_limits(mut self, default_limit: u64, max_limit: u64) -> Self {
        self.default_limit = default_limit;
        self.max_limit = max_limit;
        self
    }

    /// Add an injector run against every request
    #[must_use]
    pub fn with_injector<F>(mut self, injector: F) -> Self
    where
        F: Fn(&DataRequest) -> (String, Value) + Send + Sync + 'static,
    {
        self.injectors.push(Box::new(injector));
        self
    }

    /// The rule engine, for `load`/`add`/`set`/`register` and direct
    /// validation
    pub fn engine(&self) -> &RuleEngine {
        &self.engine
    }

    /// Validate, then dispatch to the accessor
    pub async fn execute(&self, request: DataRequest) -> GateResult<DataResponse> {
        self.execute_with(request, InjectionMap::new(), &CancellationToken::new())
            .await
    }

    /// `execute` with caller-supplied injections and a cancellation token
    #[instrument(skip_all, fields(collection = request.collection.as_str(), action = request.action.as_str()))]
    pub async fn execute_with(
        &self,
        mut request: DataRequest,
        extra_injections: InjectionMap,
        cancel: &CancellationToken,
    ) -> GateResult<DataResponse> {
        let mut injections = InjectionMap::new();
        for injector in &self.injectors {
            let (name, value) = injector(&request);
            injections.insert(name, value);
        }
        injections.extend(extra_injections);

        let outcome = self
            .engine
            .validate_with_cancel(&mut request, &injections, cancel)
            .await?;

        match outcome {
            ValidateOutcome::Denied { errors } => {
                debug!(errors = errors.len(), "request denied");
                Err(GateError::PermissionDenied { errors })
            }
            ValidateOutcome::Matched { .. } => self.dispatch(request, cancel).await,
        }
    }

    /// Forward a matched request to the accessor's CRUD surface
    async fn dispatch(
        &self,
        request: DataRequest,
        cancel: &CancellationToken,
    ) -> GateResult<DataResponse> {
        let action = request.resolve_action().ok_or_else(|| GateError::Internal {
            message: format!("unresolvable action \"{}\" after match", request.action),
        })?;

        let collection = request.collection.as_str();
        let query = request.query.clone().unwrap_or(Value::Null);

        let operation = async {
            match action {
                DataAction::Read => {
                    let options = FindOptions {
                        query: request.query.clone(),
                        order: request.order.clone().unwrap_or_default(),
                        offset: request.offset.unwrap_or(0),
                        limit: self.effective_limit(request.limit),
                        projection: request.projection.clone(),
                    };
                    let documents = self.accessor.find(collection, &options).await?;
                    Ok::<DataResponse, AccessorError>(DataResponse::Documents(documents))
                }
                DataAction::Add => {
                    let data = request.data.as_ref().ok_or_else(|| {
                        AccessorError::InvalidPayload {
                            operation: "insert".to_string(),
                            message: "add request carries no data".to_string(),
                        }
                    })?;
                    let summary = self.accessor.insert(collection, data).await?;
                    Ok(DataResponse::Mutation(summary))
                }
                DataAction::Update => {
                    let data = request.data.as_ref().ok_or_else(|| {
                        AccessorError::InvalidPayload {
                            operation: "update".to_string(),
                            message: "update request carries no data".to_string(),
                        }
                    })?;
                    let options = UpdateOptions {
                        multi: request.multi == Some(true),
                        upsert: request.upsert == Some(true),
                    };
                    let summary = self
                        .accessor
                        .update(collection, &query, data, &options)
                        .await?;
                    Ok(DataResponse::Mutation(summary))
                }
                DataAction::Remove => {
                    let summary = self
                        .accessor
                        .remove(collection, &query, request.multi == Some(true))
                        .await?;
                    Ok(DataResponse::Mutation(summary))
                }
                DataAction::Count => {
                    let total = self.accessor.count(collection, &query).await?;
                    Ok(DataResponse::Count(total))
                }
                DataAction::Watch => {
                    let stream = self.accessor.watch(collection, &query).await?;
                    Ok(DataResponse::Changes(stream))
                }
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(GateError::Cancelled),
            result = operation => result.map_err(GateError::from),
        }
    }

    /// Limit 0 (or absent) means "engine default"; the configured maximum
    /// caps whatever the caller asked for.
    fn effective_limit(&self, requested: Option<u64>) -> u64 {
        let limit = match requested {
            None | Some(0) => self.default_limit,
            Some(n) => n,
        };
        limit.min(self.max_limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_limit_substitution() {
        let accessor = Arc::new(crate::accessor::memory::MemoryAccessor::new());
        let gateway = Gateway::new(accessor).with_limits(100, 1000);
        assert_eq!(gateway.effective_limit(None), 100);
        assert_eq!(gateway.effective_limit(Some(0)), 100);
        assert_eq!(gateway.effective_limit(Some(7)), 7);
        assert_eq!(gateway.effective_limit(Some(5000)), 1000);
    }
}

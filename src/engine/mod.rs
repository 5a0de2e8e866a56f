//! Rule engine
//!
//! Owns the validator registry and the compiled permission table, and runs
//! the matcher against them. The table lives behind `RwLock<Arc<..>>`:
//! `validate` clones the `Arc` and works on a consistent snapshot, while
//! `load`/`add`/`set` compile a fresh table and swap it in, so rule
//! mutation never overlaps an in-flight validation.

use std::sync::{Arc, RwLock};

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::accessor::DocumentAccessor;
use crate::errors::{CompileResult, GateResult};
use crate::models::rules::{CollectionRuleSource, RuleSource};
use crate::models::{DataRequest, ValidateOutcome};

pub mod compiler;
pub mod matcher;
pub mod registry;
pub mod validators;

pub use compiler::{CompiledVariant, PermissionTable, Processor, SCHEMA_PERMISSION};
pub use registry::ValidatorRegistry;
pub use validators::{InjectionMap, ValidationContext, ValidatorHandler};

pub struct RuleEngine {
    registry: RwLock<ValidatorRegistry>,
    table: RwLock<Arc<PermissionTable>>,
    accessor: Arc<dyn DocumentAccessor>,
}

impl RuleEngine {
    /// A fresh engine with the built-in validators and an empty table
    pub fn new(accessor: Arc<dyn DocumentAccessor>) -> Self {
        Self {
            registry: RwLock::new(ValidatorRegistry::with_builtins()),
            table: RwLock::new(Arc::new(PermissionTable::default())),
            accessor,
        }
    }

    pub fn accessor(&self) -> &Arc<dyn DocumentAccessor> {
        &self.accessor
    }

    /// Register an additional validator; names must be unique
    pub fn register(&self, name: &str, handler: Arc<dyn ValidatorHandler>) -> CompileResult<()> {
        let mut registry = self.registry.write().unwrap_or_else(|e| e.into_inner());
        registry.register(name, handler)
    }

    /// Compile a whole rule source, replacing the current table
    pub fn load(&self, source: &RuleSource) -> CompileResult<()> {
        let registry = self.registry.read().unwrap_or_else(|e| e.into_inner());
        let compiled = compiler::compile(&registry, source)?;
        drop(registry);

        let mut table = self.table.write().unwrap_or_else(|e| e.into_inner());
        *table = Arc::new(compiled);
        info!(collections = source.len(), "rule set loaded");
        Ok(())
    }

    /// Compile rules for a new collection; fails if it already exists
    pub fn add_collection(
        &self,
        collection: &str,
        source: &CollectionRuleSource,
    ) -> CompileResult<()> {
        self.replace_collection(collection, source, true)
    }

    /// Compile rules for a collection, replacing any prior rules
    pub fn set_collection(
        &self,
        collection: &str,
        source: &CollectionRuleSource,
    ) -> CompileResult<()> {
        self.replace_collection(collection, source, false)
    }

    fn replace_collection(
        &self,
        collection: &str,
        source: &CollectionRuleSource,
        must_be_new: bool,
    ) -> CompileResult<()> {
        let registry = self.registry.read().unwrap_or_else(|e| e.into_inner());
        let mut table = self.table.write().unwrap_or_else(|e| e.into_inner());
        let next = compiler::with_collection(&table, &registry, collection, source, must_be_new)?;
        *table = Arc::new(next);
        Ok(())
    }

    /// The current compiled table snapshot
    pub fn snapshot(&self) -> Arc<PermissionTable> {
        Arc::clone(&self.table.read().unwrap_or_else(|e| e.into_inner()))
    }

    /// Validate a request against the compiled table.
    ///
    /// The request is mutable because matching may write field defaults
    /// back into the data payload.
    pub async fn validate(
        &self,
        request: &mut DataRequest,
        injections: &InjectionMap,
    ) -> GateResult<ValidateOutcome> {
        self.validate_with_cancel(request, injections, &CancellationToken::new())
            .await
    }

    /// Validate with a caller-provided cancellation token; cancellation
    /// aborts at the next accessor suspension point.
    pub async fn validate_with_cancel(
        &self,
        request: &mut DataRequest,
        injections: &InjectionMap,
        cancel: &CancellationToken,
    ) -> GateResult<ValidateOutcome> {
        let table = self.snapshot();
        matcher::validate_request(&table, request, injections, self.accessor.as_ref(), cancel)
            .await
    }

    /// Run a collection's `$schema` pseudo-permission against a request.
    ///
    /// The schema cell is never selected by an action; this is the only
    /// path that reaches it.
    pub async fn validate_schema(
        &self,
        collection: &str,
        request: &mut DataRequest,
        injections: &InjectionMap,
    ) -> GateResult<ValidateOutcome> {
        let table = self.snapshot();
        matcher::validate_schema(
            &table,
            collection,
            request,
            injections,
            self.accessor.as_ref(),
            &CancellationToken::new(),
        )
        .await
    }
}

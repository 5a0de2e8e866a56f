//! Accessor port
//!
//! The narrow interface the engine consumes. The rule matcher depends on
//! exactly one method — [`DocumentAccessor::get`] — for its `exists` and
//! `unique` lookups. The gateway facade additionally drives the CRUD
//! surface, which is opaque to the matcher.
//!
//! A production deployment plugs a real document-database driver in behind
//! this trait; [`memory::MemoryAccessor`] is the in-process reference used
//! by the CLI dry-run mode and the test suite.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::AccessorResult;
use crate::models::SortOrder;

pub mod memory;

/// Options for a `find` dispatch, extracted from the data request
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub query: Option<Value>,
    pub order: Vec<SortOrder>,
    pub offset: u64,
    /// 0 means unbounded; the gateway substitutes the engine default
    /// before dispatch, so an accessor normally never sees 0.
    pub limit: u64,
    pub projection: Option<HashMap<String, u8>>,
}

/// Options for an `update` dispatch
#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    pub multi: bool,
    pub upsert: bool,
}

/// Counts describing the effect of a mutation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationSummary {
    pub inserted: u64,
    pub matched: u64,
    pub modified: u64,
    pub removed: u64,
}

/// One change observed by a watch subscription
#[derive(Debug, Clone, Serialize)]
pub struct ChangeEvent {
    pub collection: String,
    pub operation: ChangeOperation,
    pub document: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOperation {
    Add,
    Update,
    Remove,
}

/// Stream of changes delivered to a watch caller
pub type ChangeStream = BoxStream<'static, ChangeEvent>;

/// The accessor's answer to a dispatched request
pub enum DataResponse {
    Documents(Vec<Value>),
    Count(u64),
    Mutation(MutationSummary),
    Changes(ChangeStream),
}

impl fmt::Debug for DataResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataResponse::Documents(docs) => f.debug_tuple("Documents").field(&docs.len()).finish(),
            DataResponse::Count(n) => f.debug_tuple("Count").field(n).finish(),
            DataResponse::Mutation(summary) => f.debug_tuple("Mutation").field(summary).finish(),
            DataResponse::Changes(_) => f.write_str("Changes(..)"),
        }
    }
}

/// Port consumed by the rule engine and driven by the gateway facade
///
/// `get` is the entirety of the engine coupling: a single-document lookup
/// by equality query. Everything else exists for the facade's CRUD
/// forwarding.
#[async_trait]
pub trait DocumentAccessor: Send + Sync {
    /// Single-document lookup used by `exists`/`unique` field rules
    async fn get(&self, collection: &str, query: &Value) -> AccessorResult<Option<Value>>;

    async fn find(&self, collection: &str, options: &FindOptions) -> AccessorResult<Vec<Value>>;

    /// Insert one document (object) or several (array of objects)
    async fn insert(&self, collection: &str, data: &Value) -> AccessorResult<MutationSummary>;

    async fn update(
        &self,
        collection: &str,
        query: &Value,
        data: &Value,
        options: &UpdateOptions,
    ) -> AccessorResult<MutationSummary>;

    async fn remove(
        &self,
        collection: &str,
        query: &Value,
        multi: bool,
    ) -> AccessorResult<MutationSummary>;

    async fn count(&self, collection: &str, query: &Value) -> AccessorResult<u64>;

    async fn watch(&self, collection: &str, query: &Value) -> AccessorResult<ChangeStream>;
}

/*!
 * Engine lifecycle: compilation, registry mutation, table snapshots, and
 * the ordering guarantees observable through accessor call counts.
 */

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};

use doc_gate::accessor::memory::MemoryAccessor;
use doc_gate::accessor::{
    ChangeStream, DocumentAccessor, FindOptions, MutationSummary, UpdateOptions,
};
use doc_gate::engine::{InjectionMap, RuleEngine, ValidationContext, ValidatorHandler};
use doc_gate::errors::{AccessorResult, CompileError, GateError, GateResult};
use doc_gate::models::rules::{CollectionRuleSource, RuleSource};
use doc_gate::models::{DataAction, DataRequest};

/// Delegates to a MemoryAccessor while counting `get` lookups, which is
/// how variant-order short-circuiting becomes observable.
struct CountingAccessor {
    inner: MemoryAccessor,
    gets: AtomicUsize,
}

impl CountingAccessor {
    fn new() -> Self {
        Self {
            inner: MemoryAccessor::new(),
            gets: AtomicUsize::new(0),
        }
    }

    fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentAccessor for CountingAccessor {
    async fn get(&self, collection: &str, query: &Value) -> AccessorResult<Option<Value>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(collection, query).await
    }

    async fn find(&self, collection: &str, options: &FindOptions) -> AccessorResult<Vec<Value>> {
        self.inner.find(collection, options).await
    }

    async fn insert(&self, collection: &str, data: &Value) -> AccessorResult<MutationSummary> {
        self.inner.insert(collection, data).await
    }

    async fn update(
        &self,
        collection: &str,
        query: &Value,
        data: &Value,
        options: &UpdateOptions,
    ) -> AccessorResult<MutationSummary> {
        self.inner.update(collection, query, data, options).await
    }

    async fn remove(
        &self,
        collection: &str,
        query: &Value,
        multi: bool,
    ) -> AccessorResult<MutationSummary> {
        self.inner.remove(collection, query, multi).await
    }

    async fn count(&self, collection: &str, query: &Value) -> AccessorResult<u64> {
        self.inner.count(collection, query).await
    }

    async fn watch(&self, collection: &str, query: &Value) -> AccessorResult<ChangeStream> {
        self.inner.watch(collection, query).await
    }
}

fn rules(value: Value) -> RuleSource {
    serde_json::from_value(value).unwrap()
}

fn collection_rules(value: Value) -> CollectionRuleSource {
    serde_json::from_value(value).unwrap()
}

#[tokio::test]
async fn load_replaces_the_whole_table() {
    let engine = RuleEngine::new(Arc::new(MemoryAccessor::new()));
    engine.load(&rules(json!({"old": {"read": true}}))).unwrap();
    engine.load(&rules(json!({"new": {"read": true}}))).unwrap();

    let mut request = DataRequest::new("old", DataAction::Read);
    let outcome = engine
        .validate(&mut request, &InjectionMap::new())
        .await
        .unwrap();
    assert!(!outcome.is_matched(), "old collection should be gone");

    let mut request = DataRequest::new("new", DataAction::Read);
    let outcome = engine
        .validate(&mut request, &InjectionMap::new())
        .await
        .unwrap();
    assert!(outcome.is_matched());
}

#[tokio::test]
async fn add_rejects_existing_collection_but_set_replaces() {
    let engine = RuleEngine::new(Arc::new(MemoryAccessor::new()));
    engine
        .load(&rules(json!({"posts": {"read": true}})))
        .unwrap();

    let err = engine
        .add_collection("posts", &collection_rules(json!({"read": false})))
        .unwrap_err();
    assert!(matches!(err, CompileError::CollectionExists { name } if name == "posts"));

    // The failed add retained the original rules.
    let mut request = DataRequest::new("posts", DataAction::Read);
    let outcome = engine
        .validate(&mut request, &InjectionMap::new())
        .await
        .unwrap();
    assert!(outcome.is_matched());

    engine
        .set_collection("posts", &collection_rules(json!({"read": false})))
        .unwrap();
    let mut request = DataRequest::new("posts", DataAction::Read);
    let outcome = engine
        .validate(&mut request, &InjectionMap::new())
        .await
        .unwrap();
    assert!(!outcome.is_matched());
}

#[tokio::test]
async fn unknown_validator_fails_at_compile_time() {
    let engine = RuleEngine::new(Arc::new(MemoryAccessor::new()));
    let err = engine
        .load(&rules(json!({"posts": {"read": {"conditions": true}}})))
        .unwrap_err();
    assert!(matches!(err, CompileError::UnknownValidator { name, .. } if name == "conditions"));

    // Nothing was partially loaded.
    let mut request = DataRequest::new("posts", DataAction::Read);
    let outcome = engine
        .validate(&mut request, &InjectionMap::new())
        .await
        .unwrap();
    assert!(!outcome.is_matched());
}

struct DenyWhenConfigured;

#[async_trait]
impl ValidatorHandler for DenyWhenConfigured {
    async fn check(
        &self,
        config: Option<&Value>,
        _ctx: &mut ValidationContext<'_>,
    ) -> GateResult<Option<String>> {
        match config {
            None => Ok(None),
            Some(_) => Ok(Some("quota exceeded".to_string())),
        }
    }
}

#[tokio::test]
async fn registered_validators_join_the_pipeline() {
    let engine = RuleEngine::new(Arc::new(MemoryAccessor::new()));
    engine
        .register("quota", Arc::new(DenyWhenConfigured))
        .unwrap();

    let err = engine
        .register("quota", Arc::new(DenyWhenConfigured))
        .unwrap_err();
    assert!(matches!(err, CompileError::DuplicateValidator { name } if name == "quota"));

    engine
        .load(&rules(json!({"posts": {"read": {"quota": true}}})))
        .unwrap();

    let mut request = DataRequest::new("posts", DataAction::Read);
    let outcome = engine
        .validate(&mut request, &InjectionMap::new())
        .await
        .unwrap();
    let errors = serde_json::to_value(outcome.errors().unwrap()).unwrap();
    assert_eq!(
        errors,
        json!([{"type": "quota", "error": "quota exceeded"}])
    );
}

#[tokio::test]
async fn matched_variant_skips_later_variants_entirely() {
    let accessor = Arc::new(CountingAccessor::new());
    let engine = RuleEngine::new(accessor.clone());
    engine
        .load(&rules(json!({
            "posts": {
                "update": [
                    {"condition": true},
                    {"data": {"title": {"unique": true}}}
                ]
            }
        })))
        .unwrap();

    let mut request =
        DataRequest::new("posts", DataAction::Update).with_data(json!({"title": "x"}));
    let outcome = engine
        .validate(&mut request, &InjectionMap::new())
        .await
        .unwrap();
    assert!(outcome.is_matched());
    assert_eq!(
        accessor.get_count(),
        0,
        "the unique lookup of the losing variant must never run"
    );
}

#[tokio::test]
async fn failing_validator_short_circuits_its_variant() {
    let accessor = Arc::new(CountingAccessor::new());
    let engine = RuleEngine::new(accessor.clone());
    engine
        .load(&rules(json!({
            "posts": {
                "update": {"condition": false, "data": {"title": {"unique": true}}}
            }
        })))
        .unwrap();

    let mut request =
        DataRequest::new("posts", DataAction::Update).with_data(json!({"title": "x"}));
    let outcome = engine
        .validate(&mut request, &InjectionMap::new())
        .await
        .unwrap();
    assert!(!outcome.is_matched());
    assert_eq!(
        accessor.get_count(),
        0,
        "condition rejects first, so the data validator never suspends"
    );
}

#[tokio::test]
async fn losing_variants_do_run_their_lookups() {
    let accessor = Arc::new(CountingAccessor::new());
    let engine = RuleEngine::new(accessor.clone());
    engine
        .load(&rules(json!({
            "posts": {
                "update": [
                    {"data": {"title": {"unique": true}}},
                    {"condition": true}
                ]
            }
        })))
        .unwrap();

    let mut request =
        DataRequest::new("posts", DataAction::Update).with_data(json!({"title": "x"}));
    let outcome = engine
        .validate(&mut request, &InjectionMap::new())
        .await
        .unwrap();
    // Nothing seeded, so unique passes and the first variant matches.
    assert!(outcome.is_matched());
    assert_eq!(accessor.get_count(), 1);
}

#[tokio::test]
async fn revalidation_is_deterministic() {
    let engine = RuleEngine::new(Arc::new(MemoryAccessor::new()));
    engine
        .load(&rules(json!({
            "posts": {"update": {"data": {"title": {"length": [3, 6]}}}}
        })))
        .unwrap();

    for _ in 0..3 {
        let mut request =
            DataRequest::new("posts", DataAction::Update).with_data(json!({"title": "ab"}));
        let outcome = engine
            .validate(&mut request, &InjectionMap::new())
            .await
            .unwrap();
        let errors = serde_json::to_value(outcome.errors().unwrap()).unwrap();
        assert_eq!(
            errors,
            json!([{"type": "data", "error": "length of title should >= 3 and <= 6"}])
        );
    }
}

#[tokio::test]
async fn engines_are_isolated_instances() {
    let first = RuleEngine::new(Arc::new(MemoryAccessor::new()));
    let second = RuleEngine::new(Arc::new(MemoryAccessor::new()));
    first
        .load(&rules(json!({"posts": {"read": true}})))
        .unwrap();
    second
        .register("quota", Arc::new(DenyWhenConfigured))
        .unwrap();

    // The second engine never saw the first's rules...
    let mut request = DataRequest::new("posts", DataAction::Read);
    let outcome = second
        .validate(&mut request, &InjectionMap::new())
        .await
        .unwrap();
    assert!(!outcome.is_matched());

    // ...and the first never saw the second's validator.
    let err = first
        .load(&rules(json!({"posts": {"read": {"quota": true}}})))
        .unwrap_err();
    assert!(matches!(err, CompileError::UnknownValidator { .. }));
}

#[tokio::test]
async fn schema_pseudo_permission_is_explicit_only() {
    let engine = RuleEngine::new(Arc::new(MemoryAccessor::new()));
    engine
        .load(&rules(json!({
            "posts": {
                "add": true,
                "$schema": {"title": {"required": true}}
            }
        })))
        .unwrap();

    // Ordinary validation ignores $schema entirely.
    let mut request = DataRequest::new("posts", DataAction::Add).with_data(json!({"body": "x"}));
    let outcome = engine
        .validate(&mut request, &InjectionMap::new())
        .await
        .unwrap();
    assert!(outcome.is_matched());

    // The explicit schema check applies the wrapped data rules.
    let mut request = DataRequest::new("posts", DataAction::Add).with_data(json!({"body": "x"}));
    let outcome = engine
        .validate_schema("posts", &mut request, &InjectionMap::new())
        .await
        .unwrap();
    let errors = serde_json::to_value(outcome.errors().unwrap()).unwrap();
    assert_eq!(
        errors,
        json!([{"type": "data", "error": "title is required"}])
    );
}

#[tokio::test]
async fn cancellation_aborts_at_the_lookup() {
    use tokio_util::sync::CancellationToken;

    let engine = RuleEngine::new(Arc::new(MemoryAccessor::new()));
    engine
        .load(&rules(json!({
            "posts": {"update": {"data": {"title": {"unique": true}}}}
        })))
        .unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let mut request =
        DataRequest::new("posts", DataAction::Update).with_data(json!({"title": "x"}));
    let err = engine
        .validate_with_cancel(&mut request, &InjectionMap::new(), &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, GateError::Cancelled));
}

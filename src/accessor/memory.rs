//! In-memory document accessor
//!
//! Reference implementation of the accessor port backed by a per-collection
//! vector of JSON documents. Query matching covers equality plus the
//! operator vocabulary the gateway recognizes; updates understand the
//! common rewrite operators. Watch subscriptions ride a per-collection
//! broadcast channel.
//!
//! This is not a database: no indexes, no durability. It exists so the CLI
//! can dry-run rule sets against fixture documents and so tests exercise
//! the full port without external services.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Map, Value, json};
use tokio::sync::{RwLock, broadcast};
use tokio_stream::wrappers::BroadcastStream;
use tracing::debug;

use crate::errors::{AccessorError, AccessorResult};
use crate::expression::values_equal;
use crate::models::SortDirection;

use super::{
    ChangeEvent, ChangeOperation, ChangeStream, DocumentAccessor, FindOptions, MutationSummary,
    UpdateOptions,
};

const WATCH_CHANNEL_CAPACITY: usize = 64;

#[derive(Default)]
pub struct MemoryAccessor {
    collections: RwLock<HashMap<String, Vec<Value>>>,
    watchers: Mutex<HashMap<String, broadcast::Sender<ChangeEvent>>>,
}

impl MemoryAccessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a collection with fixture documents, replacing any prior content
    pub async fn seed(&self, collection: &str, documents: Vec<Value>) {
        let mut collections = self.collections.write().await;
        collections.insert(collection.to_string(), documents);
    }

    fn publish(&self, collection: &str, operation: ChangeOperation, document: Value) {
        let watchers = self.watchers.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(sender) = watchers.get(collection) {
            // Nobody listening is fine; the event is simply dropped.
            let _ = sender.send(ChangeEvent {
                collection: collection.to_string(),
                operation,
                document,
            });
        }
    }

    fn subscribe(&self, collection: &str) -> broadcast::Receiver<ChangeEvent> {
        let mut watchers = self.watchers.lock().unwrap_or_else(|e| e.into_inner());
        watchers
            .entry(collection.to_string())
            .or_insert_with(|| broadcast::channel(WATCH_CHANNEL_CAPACITY).0)
            .subscribe()
    }
}

/// Does `document` satisfy `query`?
///
/// An absent or empty query matches everything. Mappings combine
/// conditions with AND; `$or`/`$and`/`$not` compose sub-queries and any
/// other key is matched against the document field, either by deep
/// equality or through an operator object.
pub fn matches_query(document: &Value, query: &Value) -> AccessorResult<bool> {
    let conditions = match query {
        Value::Null => return Ok(true),
        Value::Object(map) => map,
        other => {
            return Err(AccessorError::InvalidPayload {
                operation: "query".to_string(),
                message: format!("query must be an object, got {other}"),
            });
        }
    };

    for (key, condition) in conditions {
        let holds = match key.as_str() {
            "$or" => any_sub_query(document, condition, key)?,
            "$and" => all_sub_queries(document, condition, key)?,
            "$nor" => !any_sub_query(document, condition, key)?,
            "$not" => !matches_query(document, condition)?,
            field => {
                let value = document.get(field).unwrap_or(&Value::Null);
                match condition {
                    Value::Object(ops) if ops.keys().any(|k| k.starts_with('$')) => {
                        field_operators_hold(value, ops)?
                    }
                    _ => values_equal(value, condition),
                }
            }
        };
        if !holds {
            return Ok(false);
        }
    }
    Ok(true)
}

fn sub_queries<'a>(condition: &'a Value, key: &str) -> AccessorResult<&'a Vec<Value>> {
    condition
        .as_array()
        .ok_or_else(|| AccessorError::InvalidPayload {
            operation: "query".to_string(),
            message: format!("{key} needs an array of sub-queries"),
        })
}

fn any_sub_query(document: &Value, condition: &Value, key: &str) -> AccessorResult<bool> {
    for sub in sub_queries(condition, key)? {
        if matches_query(document, sub)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn all_sub_queries(document: &Value, condition: &Value, key: &str) -> AccessorResult<bool> {
    for sub in sub_queries(condition, key)? {
        if !matches_query(document, sub)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn field_operators_hold(value: &Value, ops: &Map<String, Value>) -> AccessorResult<bool> {
    for (op, operand) in ops {
        let holds = match op.as_str() {
            "$eq" => values_equal(value, operand),
            "$neq" => !values_equal(value, operand),
            "$gt" => compare_values(value, operand) == Some(Ordering::Greater),
            "$gte" => matches!(
                compare_values(value, operand),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            "$lt" => compare_values(value, operand) == Some(Ordering::Less),
            "$lte" => matches!(
                compare_values(value, operand),
                Some(Ordering::Less | Ordering::Equal)
            ),
            "$in" => operand
                .as_array()
                .is_some_and(|items| items.iter().any(|item| values_equal(value, item))),
            "$nin" => operand
                .as_array()
                .is_some_and(|items| !items.iter().any(|item| values_equal(value, item))),
            "$exists" => {
                let wanted = operand.as_bool().unwrap_or(true);
                (!value.is_null()) == wanted
            }
            "$regex" => match (value.as_str(), operand.as_str()) {
                (Some(s), Some(pattern)) => regex::Regex::new(pattern)
                    .map_err(|e| AccessorError::InvalidPayload {
                        operation: "query".to_string(),
                        message: format!("bad $regex pattern: {e}"),
                    })?
                    .is_match(s),
                _ => false,
            },
            "$size" => value
                .as_array()
                .is_some_and(|items| json!(items.len()) == *operand),
            other => {
                return Err(AccessorError::Unsupported {
                    operation: format!("query operator {other}"),
                });
            }
        };
        if !holds {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Total-enough ordering over JSON scalars for sorting and range operators
fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn apply_update(document: &mut Value, data: &Value) -> AccessorResult<bool> {
    let Some(updates) = data.as_object() else {
        return Err(AccessorError::InvalidPayload {
            operation: "update".to_string(),
            message: "update payload must be an object".to_string(),
        });
    };

    let has_operator = updates.keys().any(|k| crate::operators::is_update_operator(k));
    if !has_operator {
        // Whole-document replacement
        *document = Value::Object(updates.clone());
        return Ok(true);
    }

    let mut changed = false;
    for (op, fields) in updates {
        let Some(fields) = fields.as_object() else {
            return Err(AccessorError::InvalidPayload {
                operation: "update".to_string(),
                message: format!("{op} needs an object of fields"),
            });
        };
        for (field, operand) in fields {
            changed |= apply_field_operator(document, op, field, operand)?;
        }
    }
    Ok(changed)
}

fn apply_field_operator(
    document: &mut Value,
    op: &str,
    field: &str,
    operand: &Value,
) -> AccessorResult<bool> {
    let Some(doc) = document.as_object_mut() else {
        return Ok(false);
    };
    match op {
        "$set" => {
            let replaced = doc.insert(field.to_string(), operand.clone());
            Ok(replaced.as_ref() != Some(operand))
        }
        "$unset" => Ok(doc.remove(field).is_some()),
        "$inc" | "$mul" => {
            let current = doc.get(field).and_then(Value::as_f64).unwrap_or(0.0);
            let delta = operand.as_f64().ok_or_else(|| AccessorError::InvalidPayload {
                operation: "update".to_string(),
                message: format!("{op} on \"{field}\" needs a number"),
            })?;
            let next = if op == "$inc" { current + delta } else { current * delta };
            let next = serde_json::Number::from_f64(next).ok_or_else(|| {
                AccessorError::InvalidPayload {
                    operation: "update".to_string(),
                    message: format!("{op} on \"{field}\" produced a non-finite number"),
                }
            })?;
            doc.insert(field.to_string(), Value::Number(next));
            Ok(true)
        }
        "$push" => {
            let entry = doc
                .entry(field.to_string())
                .or_insert_with(|| Value::Array(Vec::new()));
            let Some(items) = entry.as_array_mut() else {
                return Err(AccessorError::InvalidPayload {
                    operation: "update".to_string(),
                    message: format!("$push target \"{field}\" is not an array"),
                });
            };
            items.push(operand.clone());
            Ok(true)
        }
        "$pop" => {
            let popped = doc
                .get_mut(field)
                .and_then(Value::as_array_mut)
                .and_then(Vec::pop);
            Ok(popped.is_some())
        }
        other => Err(AccessorError::Unsupported {
            operation: format!("update operator {other}"),
        }),
    }
}

#[async_trait]
impl DocumentAccessor for MemoryAccessor {
    async fn get(&self, collection: &str, query: &Value) -> AccessorResult<Option<Value>> {
        let collections = self.collections.read().await;
        let Some(documents) = collections.get(collection) else {
            return Ok(None);
        };
        for document in documents {
            if matches_query(document, query)? {
                return Ok(Some(document.clone()));
            }
        }
        Ok(None)
    }

    async fn find(&self, collection: &str, options: &FindOptions) -> AccessorResult<Vec<Value>> {
        let collections = self.collections.read().await;
        let query = options.query.clone().unwrap_or(Value::Null);
        let mut matched = Vec::new();
        if let Some(documents) = collections.get(collection) {
            for document in documents {
                if matches_query(document, &query)? {
                    matched.push(document.clone());
                }
            }
        }

        for sort in options.order.iter().rev() {
            matched.sort_by(|a, b| {
                let lhs = a.get(&sort.field).unwrap_or(&Value::Null);
                let rhs = b.get(&sort.field).unwrap_or(&Value::Null);
                let ordering = compare_values(lhs, rhs).unwrap_or(Ordering::Equal);
                match sort.direction {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                }
            });
        }

        let mut page: Vec<Value> = matched
            .into_iter()
            .skip(options.offset as usize)
            .take(if options.limit == 0 {
                usize::MAX
            } else {
                options.limit as usize
            })
            .collect();

        if let Some(projection) = &options.projection {
            let include: Vec<&String> = projection
                .iter()
                .filter(|(_, keep)| **keep == 1)
                .map(|(field, _)| field)
                .collect();
            for document in &mut page {
                if let Some(map) = document.as_object_mut() {
                    if include.is_empty() {
                        map.retain(|field, _| projection.get(field) != Some(&0));
                    } else {
                        map.retain(|field, _| include.iter().any(|keep| *keep == field));
                    }
                }
            }
        }

        Ok(page)
    }

    async fn insert(&self, collection: &str, data: &Value) -> AccessorResult<MutationSummary> {
        let incoming: Vec<Value> = match data {
            Value::Array(items) => items.clone(),
            Value::Object(_) => vec![data.clone()],
            other => {
                return Err(AccessorError::InvalidPayload {
                    operation: "insert".to_string(),
                    message: format!("insert payload must be an object or array, got {other}"),
                });
            }
        };

        let mut collections = self.collections.write().await;
        let documents = collections.entry(collection.to_string()).or_default();
        let inserted = incoming.len() as u64;
        for document in incoming {
            documents.push(document.clone());
            self.publish(collection, ChangeOperation::Add, document);
        }
        debug!(collection, inserted, "memory accessor insert");
        Ok(MutationSummary {
            inserted,
            ..MutationSummary::default()
        })
    }

    async fn update(
        &self,
        collection: &str,
        query: &Value,
        data: &Value,
        options: &UpdateOptions,
    ) -> AccessorResult<MutationSummary> {
        let mut collections = self.collections.write().await;
        let documents = collections.entry(collection.to_string()).or_default();

        let mut summary = MutationSummary::default();
        let mut changed_docs = Vec::new();
        for document in documents.iter_mut() {
            if !matches_query(document, query)? {
                continue;
            }
            summary.matched += 1;
            if apply_update(document, data)? {
                summary.modified += 1;
                changed_docs.push(document.clone());
            }
            if !options.multi {
                break;
            }
        }

        if summary.matched == 0 && options.upsert {
            let mut seeded = query
                .as_object()
                .map(|q| {
                    Value::Object(
                        q.iter()
                            .filter(|(k, _)| !k.starts_with('$'))
                            .map(|(k, v)| (k.clone(), v.clone()))
                            .collect(),
                    )
                })
                .unwrap_or_else(|| json!({}));
            apply_update(&mut seeded, data)?;
            documents.push(seeded.clone());
            summary.inserted = 1;
            changed_docs.push(seeded);
        }

        drop(collections);
        for document in changed_docs {
            self.publish(collection, ChangeOperation::Update, document);
        }
        Ok(summary)
    }

    async fn remove(
        &self,
        collection: &str,
        query: &Value,
        multi: bool,
    ) -> AccessorResult<MutationSummary> {
        let mut collections = self.collections.write().await;
        let documents = collections.entry(collection.to_string()).or_default();

        let mut removed_docs = Vec::new();
        let mut kept = Vec::with_capacity(documents.len());
        for document in documents.drain(..) {
            let matches = (multi || removed_docs.is_empty()) && matches_query(&document, query)?;
            if matches {
                removed_docs.push(document);
            } else {
                kept.push(document);
            }
        }
        *documents = kept;

        let summary = MutationSummary {
            removed: removed_docs.len() as u64,
            ..MutationSummary::default()
        };
        drop(collections);
        for document in removed_docs {
            self.publish(collection, ChangeOperation::Remove, document);
        }
        Ok(summary)
    }

    async fn count(&self, collection: &str, query: &Value) -> AccessorResult<u64> {
        let collections = self.collections.read().await;
        let mut total = 0;
        if let Some(documents) = collections.get(collection) {
            for document in documents {
                if matches_query(document, query)? {
                    total += 1;
                }
            }
        }
        Ok(total)
    }

    async fn watch(&self, collection: &str, query: &Value) -> AccessorResult<ChangeStream> {
        let receiver = self.subscribe(collection);
        let filter = query.clone();
        let stream = BroadcastStream::new(receiver).filter_map(move |event| {
            let filter = filter.clone();
            async move {
                let event = event.ok()?;
                match matches_query(&event.document, &filter) {
                    Ok(true) => Some(event),
                    _ => None,
                }
            }
        });
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SortOrder;

    #[tokio::test]
    async fn test_get_by_equality() {
        let accessor = MemoryAccessor::new();
        accessor
            .seed("users", vec![json!({"id": 1, "name": "amy"})])
            .await;
        let found = accessor.get("users", &json!({"id": 1})).await.unwrap();
        assert_eq!(found.unwrap()["name"], json!("amy"));
        let missing = accessor.get("users", &json!({"id": 2})).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_query_operators_and_disjunction() {
        let doc = json!({"age": 30, "tags": ["a", "b"]});
        assert!(matches_query(&doc, &json!({"age": {"$gte": 30}})).unwrap());
        assert!(!matches_query(&doc, &json!({"age": {"$lt": 30}})).unwrap());
        assert!(matches_query(&doc, &json!({"tags": {"$size": 2}})).unwrap());
        assert!(
            matches_query(&doc, &json!({"$or": [{"age": 31}, {"age": {"$in": [30, 40]}}]}))
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_find_sort_page_project() {
        let accessor = MemoryAccessor::new();
        accessor
            .seed(
                "posts",
                vec![
                    json!({"title": "b", "views": 2, "body": "x"}),
                    json!({"title": "a", "views": 9, "body": "y"}),
                    json!({"title": "c", "views": 5, "body": "z"}),
                ],
            )
            .await;
        let options = FindOptions {
            order: vec![SortOrder {
                field: "views".to_string(),
                direction: SortDirection::Desc,
            }],
            offset: 1,
            limit: 1,
            projection: Some(HashMap::from([("title".to_string(), 1)])),
            ..FindOptions::default()
        };
        let page = accessor.find("posts", &options).await.unwrap();
        assert_eq!(page, vec![json!({"title": "c"})]);
    }

    #[tokio::test]
    async fn test_update_operators_and_upsert() {
        let accessor = MemoryAccessor::new();
        accessor.seed("posts", vec![json!({"id": 1, "views": 1})]).await;

        let summary = accessor
            .update(
                "posts",
                &json!({"id": 1}),
                &json!({"$inc": {"views": 2}}),
                &UpdateOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(summary.modified, 1);
        let doc = accessor.get("posts", &json!({"id": 1})).await.unwrap().unwrap();
        assert_eq!(doc["views"], json!(3.0));

        let summary = accessor
            .update(
                "posts",
                &json!({"id": 2}),
                &json!({"$set": {"views": 0}}),
                &UpdateOptions {
                    upsert: true,
                    ..UpdateOptions::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(summary.inserted, 1);
        assert!(accessor.get("posts", &json!({"id": 2})).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_watch_receives_matching_inserts() {
        let accessor = MemoryAccessor::new();
        let mut stream = accessor.watch("logs", &json!({"level": "error"})).await.unwrap();

        accessor.insert("logs", &json!({"level": "info", "m": 1})).await.unwrap();
        accessor.insert("logs", &json!({"level": "error", "m": 2})).await.unwrap();

        let event = stream.next().await.unwrap();
        assert_eq!(event.operation, ChangeOperation::Add);
        assert_eq!(event.document["m"], json!(2));
    }
}

// Rule compiler: raw rule trees in, immutable permission tables out
//
// Normalization happens before anything else so the matcher only ever
// sees uniform sequences of variants. Every variant is materialized with
// a processor for every registered validator; validators the author never
// mentioned carry a `None` config and no-op at match time.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::errors::{CompileError, CompileResult};
use crate::models::rules::{CollectionRuleSource, RuleSource, RuleVariantSource};

use super::registry::ValidatorRegistry;
use super::validators::ValidatorHandler;

/// Key under which a collection's schema pseudo-permission is stored.
/// It is never selected by an action; `validate_schema` reaches it
/// explicitly.
pub const SCHEMA_PERMISSION: &str = "$schema";

/// A compiled (name, handler, config) triple
pub struct Processor {
    pub name: String,
    pub handler: Arc<dyn ValidatorHandler>,
    pub config: Option<Value>,
}

impl std::fmt::Debug for Processor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Processor")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish()
    }
}

/// One compiled rule variant: all registered validators, in registration
/// order, plus the raw source object returned to callers on a match
#[derive(Debug)]
pub struct CompiledVariant {
    pub source: Value,
    pub processors: Vec<Processor>,
}

/// The compiled, immutable form of a rule set
#[derive(Default, Debug)]
pub struct PermissionTable {
    cells: HashMap<String, HashMap<String, Vec<CompiledVariant>>>,
}

impl PermissionTable {
    pub fn has_collection(&self, collection: &str) -> bool {
        self.cells.contains_key(collection)
    }

    /// The ordered variants for a (collection, permission-name) cell
    pub fn variants(&self, collection: &str, permission: &str) -> Option<&[CompiledVariant]> {
        self.cells
            .get(collection)?
            .get(permission)
            .map(Vec::as_slice)
    }

    pub fn collections(&self) -> impl Iterator<Item = &String> {
        self.cells.keys()
    }

    /// Permission names compiled for one collection
    pub fn permissions(&self, collection: &str) -> Option<Vec<&String>> {
        self.cells.get(collection).map(|cell| cell.keys().collect())
    }

    fn insert(&mut self, collection: String, compiled: HashMap<String, Vec<CompiledVariant>>) {
        self.cells.insert(collection, compiled);
    }
}

/// Compile one variant object against the registry.
fn compile_variant(
    registry: &ValidatorRegistry,
    collection: &str,
    action: &str,
    variant: &RuleVariantSource,
) -> CompileResult<CompiledVariant> {
    // Every key must name a registered validator, and its config must
    // survive the handler's shape check. Both are fatal here, at load
    // time, never at request time.
    for (name, config) in variant {
        let handler = registry
            .lookup(name)
            .ok_or_else(|| CompileError::UnknownValidator {
                name: name.clone(),
                collection: collection.to_string(),
                action: action.to_string(),
            })?;
        handler.check_config(config)?;
    }

    let processors = registry
        .iter()
        .map(|(name, handler)| Processor {
            name: name.to_string(),
            handler: Arc::clone(handler),
            config: variant.get(name).cloned(),
        })
        .collect();

    Ok(CompiledVariant {
        source: Value::Object(variant.clone()),
        processors,
    })
}

/// Compile every permission of one collection.
pub fn compile_collection(
    registry: &ValidatorRegistry,
    collection: &str,
    source: &CollectionRuleSource,
) -> CompileResult<HashMap<String, Vec<CompiledVariant>>> {
    let mut compiled = HashMap::new();

    for (action, config) in source {
        let variants: Vec<RuleVariantSource> = if action == SCHEMA_PERMISSION {
            // The schema pseudo-permission is sugar for a lone `data`
            // validator over the raw config value.
            let raw = serde_json::to_value(config).map_err(|e| {
                CompileError::bad_shape(format!("{collection} {action}"), e.to_string())
            })?;
            let mut variant = Map::new();
            variant.insert("data".to_string(), raw);
            vec![variant]
        } else {
            config.normalize()
        };

        let mut cell = Vec::with_capacity(variants.len());
        for variant in &variants {
            cell.push(compile_variant(registry, collection, action, variant)?);
        }
        compiled.insert(action.clone(), cell);
    }

    debug!(
        collection,
        permissions = compiled.len(),
        "compiled rule collection"
    );
    Ok(compiled)
}

/// Compile a whole rule source into a fresh table.
pub fn compile(registry: &ValidatorRegistry, source: &RuleSource) -> CompileResult<PermissionTable> {
    let mut table = PermissionTable::default();
    for (collection, collection_source) in source {
        let compiled = compile_collection(registry, collection, collection_source)?;
        table.insert(collection.clone(), compiled);
    }
    Ok(table)
}

/// Replace one collection in a copy of `base`.
///
/// The table itself is immutable; mutation produces a new table so
/// in-flight validations keep their snapshot.
pub fn with_collection(
    base: &PermissionTable,
    registry: &ValidatorRegistry,
    collection: &str,
    source: &CollectionRuleSource,
    must_be_new: bool,
) -> CompileResult<PermissionTable> {
    if must_be_new && base.has_collection(collection) {
        return Err(CompileError::CollectionExists {
            name: collection.to_string(),
        });
    }

    // Compile first: a failing source must leave no partial state.
    let compiled = compile_collection(registry, collection, source)?;

    let mut next = PermissionTable::default();
    for (existing, cell) in &base.cells {
        if existing != collection {
            next.insert(existing.clone(), clone_cell(cell));
        }
    }
    next.insert(collection.to_string(), compiled);
    Ok(next)
}

// Processors share their handlers via Arc, so copying a cell is cheap.
fn clone_cell(
    cell: &HashMap<String, Vec<CompiledVariant>>,
) -> HashMap<String, Vec<CompiledVariant>> {
    cell.iter()
        .map(|(permission, variants)| {
            let copies = variants
                .iter()
                .map(|variant| CompiledVariant {
                    source: variant.source.clone(),
                    processors: variant
                        .processors
                        .iter()
                        .map(|processor| Processor {
                            name: processor.name.clone(),
                            handler: Arc::clone(&processor.handler),
                            config: processor.config.clone(),
                        })
                        .collect(),
                })
                .collect();
            (permission.clone(), copies)
        })
        .collect()
}

//! Rule source shapes and the rule-file loader
//!
//! A rule set on disk (or over a config API) is a nested mapping
//! `collection → action → permission-config`, where the permission config
//! comes in four interchangeable shapes. Normalization to a uniform
//! sequence of variant objects happens here so the compiler only ever sees
//! one shape.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::errors::CompileError;

/// One rule variant as written by the rule author: validator-name → config
pub type RuleVariantSource = Map<String, Value>;

/// The permission config for a single (collection, action) cell
///
/// Booleans and strings are shorthand for a lone `condition` validator;
/// an object is a single variant; a sequence is an ordered list of
/// variants matched first-wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PermissionConfig {
    Flag(bool),
    Expr(String),
    Variant(RuleVariantSource),
    Variants(Vec<RuleVariantSource>),
}

impl PermissionConfig {
    /// Normalize any shape to the ordered variant sequence the compiler
    /// works with.
    pub fn normalize(&self) -> Vec<RuleVariantSource> {
        match self {
            PermissionConfig::Flag(flag) => {
                let mut variant = Map::new();
                variant.insert("condition".to_string(), json!(flag));
                vec![variant]
            }
            PermissionConfig::Expr(expr) => {
                let mut variant = Map::new();
                variant.insert("condition".to_string(), json!(expr));
                vec![variant]
            }
            PermissionConfig::Variant(variant) => vec![variant.clone()],
            PermissionConfig::Variants(variants) => variants.clone(),
        }
    }
}

/// Rules for one collection: action name (`read`, `add`, …, or `$schema`)
/// → permission config
pub type CollectionRuleSource = HashMap<String, PermissionConfig>;

/// A whole rule set: collection → action → permission config
pub type RuleSource = HashMap<String, CollectionRuleSource>;

/// Load a rule set from a JSON or YAML file, chosen by extension.
pub fn load_rules(path: &Path) -> Result<RuleSource, CompileError> {
    let display = path.display().to_string();
    let raw = std::fs::read_to_string(path).map_err(|e| CompileError::RuleFile {
        path: display.clone(),
        message: e.to_string(),
    })?;

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default();

    match extension {
        "yaml" | "yml" => serde_yaml::from_str(&raw).map_err(|e| CompileError::RuleFile {
            path: display,
            message: e.to_string(),
        }),
        _ => serde_json::from_str(&raw).map_err(|e| CompileError::RuleFile {
            path: display,
            message: e.to_string(),
        }),
    }
}

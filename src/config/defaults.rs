//! Default values for configuration fields

use std::path::PathBuf;

pub fn default_limit() -> u64 {
    100
}

pub fn default_max_limit() -> u64 {
    1000
}

pub fn default_rules_path() -> PathBuf {
    PathBuf::from("rules.json")
}

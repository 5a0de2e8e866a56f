use std::path::{Path, PathBuf};

use anyhow::Result;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::{Deserialize, Serialize};

pub mod defaults;

use defaults::*;

/// Application configuration, layered from an optional TOML file and
/// `DOC_GATE_*` environment variables (env wins).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub rules: RulesConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesConfig {
    /// Rule file compiled at startup; JSON or YAML by extension
    #[serde(default = "default_rules_path")]
    pub path: PathBuf,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            path: default_rules_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Substituted when a request asks for limit 0 (or none at all)
    #[serde(default = "default_limit")]
    pub default_limit: u64,
    /// Hard cap on any requested limit
    #[serde(default = "default_max_limit")]
    pub max_limit: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            max_limit: default_max_limit(),
        }
    }
}

impl Config {
    /// Load configuration from the given file plus the `DOC_GATE_*`
    /// environment overlay. A missing file falls back to defaults so the
    /// CLI works without any setup.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::warn!(
                "config file '{}' not found, using default configuration values",
                path.display()
            );
            let config = Figment::new()
                .merge(figment::providers::Serialized::defaults(Self::default()))
                .merge(Env::prefixed("DOC_GATE_").split("__"))
                .extract()?;
            return Ok(config);
        }

        let config = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("DOC_GATE_").split("__"))
            .extract()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_file() {
        let config = Config::default();
        assert_eq!(config.engine.default_limit, 100);
        assert_eq!(config.engine.max_limit, 1000);
        assert_eq!(config.rules.path, PathBuf::from("rules.json"));
    }

    #[test]
    fn test_toml_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[engine]\ndefault_limit = 25\n\n[rules]\npath = \"rules.yaml\"\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.engine.default_limit, 25);
        assert_eq!(config.engine.max_limit, 1000);
        assert_eq!(config.rules.path, PathBuf::from("rules.yaml"));
    }
}

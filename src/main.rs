use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::info;

use doc_gate::accessor::memory::MemoryAccessor;
use doc_gate::config::Config;
use doc_gate::engine::InjectionMap;
use doc_gate::gateway::Gateway;
use doc_gate::models::{DataRequest, rules};

#[derive(Parser)]
#[command(name = "doc-gate")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "A policy-driven document database gateway with declarative request validation")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Log level
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a rule file and report the resulting permission table
    Lint {
        /// Rule file (JSON or YAML); defaults to the configured path
        #[arg(short, long)]
        rules: Option<PathBuf>,
    },
    /// Validate one request against a rule file without a database
    Check {
        /// Rule file (JSON or YAML); defaults to the configured path
        #[arg(short, long)]
        rules: Option<PathBuf>,

        /// Request JSON file
        #[arg(short = 'q', long)]
        request: PathBuf,

        /// Expression bindings as name=json (e.g. '$userid=123')
        #[arg(short, long)]
        inject: Vec<String>,

        /// Fixture documents file: {"collection": [doc, ...]} — seeds the
        /// in-memory accessor so exists/unique rules have something to hit
        #[arg(short, long)]
        documents: Option<PathBuf>,
    },
}

fn init_tracing(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("doc_gate={log_level}").into());
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Parse one `name=json` binding; bare words fall back to strings
fn parse_injection(raw: &str) -> Result<(String, Value)> {
    let (name, value) = raw
        .split_once('=')
        .with_context(|| format!("injection \"{raw}\" is not name=value"))?;
    let parsed = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((name.to_string(), parsed))
}

async fn lint(config: &Config, rules_path: Option<PathBuf>) -> Result<()> {
    let path = rules_path.unwrap_or_else(|| config.rules.path.clone());
    let source = rules::load_rules(&path)?;

    let gateway = Gateway::new(Arc::new(MemoryAccessor::new()));
    gateway.engine().load(&source)?;

    let table = gateway.engine().snapshot();
    let mut collections: Vec<&String> = table.collections().collect();
    collections.sort();
    println!("{}: {} collection(s)", path.display(), collections.len());
    for collection in collections {
        let mut permissions = table
            .permissions(collection)
            .unwrap_or_default()
            .into_iter()
            .cloned()
            .collect::<Vec<_>>();
        permissions.sort();
        println!("  {collection}: {}", permissions.join(", "));
    }
    Ok(())
}

async fn check(
    config: &Config,
    rules_path: Option<PathBuf>,
    request_path: PathBuf,
    inject: Vec<String>,
    documents: Option<PathBuf>,
) -> Result<()> {
    let path = rules_path.unwrap_or_else(|| config.rules.path.clone());
    let source = rules::load_rules(&path)?;

    let accessor = Arc::new(MemoryAccessor::new());
    if let Some(documents_path) = documents {
        let raw = std::fs::read_to_string(&documents_path)
            .with_context(|| format!("reading {}", documents_path.display()))?;
        let fixtures: std::collections::HashMap<String, Vec<Value>> =
            serde_json::from_str(&raw).context("documents file must be {collection: [doc, ..]}")?;
        for (collection, docs) in fixtures {
            accessor.seed(&collection, docs).await;
        }
    }

    let gateway = Gateway::new(accessor)
        .with_limits(config.engine.default_limit, config.engine.max_limit);
    gateway.engine().load(&source)?;

    let raw = std::fs::read_to_string(&request_path)
        .with_context(|| format!("reading {}", request_path.display()))?;
    let mut request: DataRequest = serde_json::from_str(&raw).context("request is not valid")?;

    let mut injections = InjectionMap::new();
    for binding in &inject {
        let (name, value) = parse_injection(binding)?;
        injections.insert(name, value);
    }

    let outcome = gateway.engine().validate(&mut request, &injections).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let config = Config::load(&cli.config)?;
    info!("doc-gate v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Lint { rules } => lint(&config, rules).await,
        Command::Check {
            rules,
            request,
            inject,
            documents,
        } => check(&config, rules, request, inject, documents).await,
    }
}

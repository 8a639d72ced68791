//! StockSync command-line tool.
//!
//! Runs and validates stage-based inventory sync workflows. Workflow
//! documents are read from JSON or YAML files; execution records are
//! printed as JSON for the caller to store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stocksync_connectors::ConnectorRegistry;
use stocksync_engine::{
    ConfigCredentialResolver, ExecutionStatus, WorkflowDefinition, WorkflowEngine,
};

#[derive(Parser)]
#[command(name = "stocksync")]
#[command(version, about = "StockSync workflow tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow to completion and print the execution record
    Run {
        /// Workflow file (.json, .yaml or .yml)
        file: PathBuf,

        /// Initial variable overrides, key=value (value parsed as JSON when possible)
        #[arg(long = "var", value_name = "KEY=VALUE")]
        vars: Vec<String>,

        /// Trigger provenance recorded on the execution
        #[arg(long, default_value = "manual")]
        triggered_by: String,
    },

    /// Parse a workflow file and report configuration problems
    Validate {
        /// Workflow file (.json, .yaml or .yml)
        file: PathBuf,
    },

    /// Print a connector's capabilities and inventory schema
    Capabilities {
        /// Service type tag (shipstream, warepoint)
        service_type: String,
    },

    /// Check connectivity to a service using environment credentials
    TestConnection {
        /// Service type tag (shipstream, warepoint)
        service_type: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { file, vars, triggered_by } => run(&file, &vars, &triggered_by).await,
        Commands::Validate { file } => validate(&file),
        Commands::Capabilities { service_type } => capabilities(&service_type),
        Commands::TestConnection { service_type } => test_connection(&service_type).await,
    }
}

async fn run(file: &Path, vars: &[String], triggered_by: &str) -> Result<()> {
    let workflow = load_workflow(file)?;

    let problems = workflow.validate();
    if !problems.is_empty() {
        for problem in &problems {
            tracing::error!("{}", problem);
        }
        bail!("workflow '{}' failed validation with {} problem(s)", workflow.id, problems.len());
    }

    let overrides = parse_vars(vars)?;

    let engine = WorkflowEngine::new(
        Arc::new(ConnectorRegistry::with_defaults()),
        Arc::new(credential_resolver_from_env()),
    );

    let execution = engine
        .execute_workflow(&workflow, triggered_by, (!overrides.is_empty()).then_some(overrides))
        .await;

    println!("{}", serde_json::to_string_pretty(&execution)?);

    if execution.status != ExecutionStatus::Completed {
        std::process::exit(1);
    }
    Ok(())
}

fn validate(file: &Path) -> Result<()> {
    let workflow = load_workflow(file)?;
    let problems = workflow.validate();

    if problems.is_empty() {
        println!("workflow '{}' is valid ({} stages)", workflow.id, workflow.stages.len());
        Ok(())
    } else {
        for problem in &problems {
            println!("error: {}", problem);
        }
        bail!("{} problem(s) found", problems.len());
    }
}

fn capabilities(service_type: &str) -> Result<()> {
    let registry = ConnectorRegistry::with_defaults();
    let Some(connector) = registry.create(service_type) else {
        bail!(
            "unknown service type '{}'; available: {:?}",
            service_type,
            registry.service_types()
        );
    };

    let operations: Vec<&str> = connector.operations().iter().map(|spec| spec.name).collect();
    let report = serde_json::json!({
        "service_type": connector.service_type(),
        "capabilities": connector.capabilities(),
        "operations": operations,
        "inventory_schema": connector.inventory_schema(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn test_connection(service_type: &str) -> Result<()> {
    let registry = ConnectorRegistry::with_defaults();
    let Some(connector) = registry.create(service_type) else {
        bail!(
            "unknown service type '{}'; available: {:?}",
            service_type,
            registry.service_types()
        );
    };

    let Some(credentials) = env_credential_set(service_type) else {
        bail!(
            "no credentials in environment for '{}'; set {}_API_KEY and {}_BASE_URL",
            service_type,
            env_prefix(service_type),
            env_prefix(service_type)
        );
    };

    let args = stocksync_connectors::Arguments(credentials);
    if connector.test_connection(&args).await {
        println!("{}: connection ok", service_type);
        Ok(())
    } else {
        bail!("{}: connection failed", service_type);
    }
}

/// Load a workflow definition from a JSON or YAML file.
fn load_workflow(file: &Path) -> Result<WorkflowDefinition> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;

    let workflow = match file.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse {} as YAML", file.display()))?,
        _ => serde_json::from_str(&content)
            .with_context(|| format!("failed to parse {} as JSON", file.display()))?,
    };

    Ok(workflow)
}

/// Parse `--var key=value` overrides; values parse as JSON when possible,
/// otherwise as plain strings.
fn parse_vars(vars: &[String]) -> Result<HashMap<String, Value>> {
    let mut parsed = HashMap::new();
    for var in vars {
        let Some((key, value)) = var.split_once('=') else {
            bail!("invalid --var '{}', expected key=value", var);
        };
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
        parsed.insert(key.to_string(), value);
    }
    Ok(parsed)
}

fn env_prefix(service_type: &str) -> String {
    service_type.to_uppercase()
}

/// Read the credential set for a service from environment variables
/// (`<SERVICE>_API_KEY`, `<SERVICE>_BASE_URL`, `<SERVICE>_WAREHOUSE_ID`).
fn env_credential_set(service_type: &str) -> Option<serde_json::Map<String, Value>> {
    let prefix = env_prefix(service_type);
    let mut set = serde_json::Map::new();

    if let Ok(api_key) = std::env::var(format!("{}_API_KEY", prefix)) {
        set.insert("api_key".to_string(), Value::String(api_key));
    }
    if let Ok(base_url) = std::env::var(format!("{}_BASE_URL", prefix)) {
        set.insert("base_url".to_string(), Value::String(base_url));
    }
    if let Ok(warehouse_id) = std::env::var(format!("{}_WAREHOUSE_ID", prefix)) {
        if let Ok(id) = warehouse_id.parse::<i64>() {
            set.insert("warehouse_id".to_string(), Value::from(id));
        }
    }

    (!set.is_empty()).then_some(set)
}

/// Build the default credential resolver from environment variables.
///
/// Named credential sets inside the workflow document always win; these env
/// sets are the per-service fallback for stages without a credentials_key.
fn credential_resolver_from_env() -> ConfigCredentialResolver {
    let mut resolver = ConfigCredentialResolver::new();
    for service_type in ["shipstream", "warepoint"] {
        if let Some(set) = env_credential_set(service_type) {
            resolver = resolver.with_default(service_type, set);
        }
    }
    resolver
}

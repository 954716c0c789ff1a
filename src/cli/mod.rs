pub mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use crate::catalog::{ProcessCatalog, StepDefinition, load_catalog};
use crate::data::memory_source::MemoryRecordSource;
use crate::data::sql_source::SqlRecordSource;
use crate::data::{QueryFilter, RecordSource};
use crate::engine::callback::{CallbackDescriptor, DataCompletionCallback};
use crate::engine::types::{
    CancelInput, FrontendStepBehavior, RunInput, RunKey, RunOutput, Values,
};
use crate::engine::Engine;
use crate::handlers::HandlerRegistry;
use crate::storage::StateStore;
use crate::storage::json_store::JsonStateStore;

use config::ProcflowConfig;

const DEFAULT_STORE_DIR: &str = "data/runs";

#[derive(Parser)]
#[command(name = "procflow", version, about = "Resumable process execution engine")]
pub struct Cli {
    /// Path to a .env file to load (default: auto-detect .env in cwd)
    #[arg(long, global = true)]
    dotenv: Option<PathBuf>,

    /// Path to a procflow.yaml config file (default: auto-detect in cwd)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(clap::Args, Clone)]
pub struct SourceArgs {
    /// Process catalog YAML file
    #[arg(long, env = "PROCFLOW_CATALOG")]
    catalog: Option<PathBuf>,

    /// State store directory
    #[arg(long, env = "PROCFLOW_STORE_DIR")]
    store_dir: Option<PathBuf>,

    /// Database URL used to fetch records steps ask for
    #[arg(long, env = "DATABASE_URL")]
    database: Option<String>,

    /// JSON file of tables (`{"table": [records]}`) used when no database is given
    #[arg(long)]
    data: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a process, or resume a paused run
    Run {
        /// Process name
        process: String,

        #[command(flatten)]
        sources: SourceArgs,

        /// Initial values as a JSON object
        #[arg(long)]
        values: Option<String>,

        /// Run id (generated when omitted)
        #[arg(long)]
        run_id: Option<String>,

        /// Resume after this step (requires --run-id)
        #[arg(long, requires = "run_id")]
        resume_after: Option<String>,

        /// What to do at frontend steps (break, skip, fail)
        #[arg(long, default_value = "break")]
        frontend: FrontendStepBehavior,

        /// Primary key of a record to fetch when a step needs records (repeatable)
        #[arg(long = "record-id")]
        record_ids: Vec<String>,

        /// Primary key field used with --record-id
        #[arg(long, default_value = "id")]
        key_field: String,

        /// Value offered for a missing field, as name=value (repeatable)
        #[arg(long = "field")]
        fields: Vec<String>,

        /// Enable verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Run a process's cancel step against a stored run
    Cancel {
        /// Process name
        process: String,

        /// Run id
        run_id: String,

        #[command(flatten)]
        sources: SourceArgs,
    },

    /// Print the stored state of a run
    Inspect {
        /// Run id
        run_id: String,

        /// State store directory
        #[arg(long, env = "PROCFLOW_STORE_DIR")]
        store_dir: Option<PathBuf>,
    },

    /// Validate a process catalog without running anything
    Validate {
        /// Path to the catalog YAML file
        catalog: PathBuf,
    },

    /// List available step handlers
    Handlers,

    /// Start the REST API server
    Serve {
        /// Host to bind to
        #[arg(long, env = "HOST")]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long, env = "PORT")]
        port: Option<u16>,

        #[command(flatten)]
        sources: SourceArgs,
    },
}

pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();

    // Load .env file
    load_dotenv(cli.dotenv.as_deref());

    let config = ProcflowConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            process,
            sources,
            values,
            run_id,
            resume_after,
            frontend,
            record_ids,
            key_field,
            fields,
            verbose,
        } => {
            let mut input = RunInput::new(process).with_frontend_behavior(frontend);
            input.run_id = run_id;
            input.resume_after_step = resume_after;
            if let Some(json) = values {
                let values: Values =
                    serde_json::from_str(&json).context("Failed to parse --values JSON")?;
                input.values = values;
            }
            input.callback = build_callback(&key_field, &record_ids, &fields)?;
            cmd_run(&config, sources, input, verbose).await
        }
        Commands::Cancel {
            process,
            run_id,
            sources,
        } => cmd_cancel(&config, sources, CancelInput::new(process, run_id)).await,
        Commands::Inspect { run_id, store_dir } => {
            cmd_inspect(&run_id, &resolve_store_dir(&config, store_dir)).await
        }
        Commands::Validate { catalog } => cmd_validate(&catalog),
        Commands::Handlers => cmd_handlers(),
        Commands::Serve {
            host,
            port,
            sources,
        } => {
            let host = host
                .or_else(|| config.host.clone())
                .unwrap_or_else(|| "0.0.0.0".to_string());
            let port = port.or(config.port).unwrap_or(3000);
            let (engine, catalog, store) = open_engine(&config, &sources).await?;
            crate::api::serve(&host, port, engine, catalog, store).await
        }
    }
}

/// Load environment variables from a .env file.
/// If an explicit path is given, load from that path (error if missing).
/// Otherwise, auto-detect .env in the current working directory (silently skip if absent).
fn load_dotenv(explicit_path: Option<&Path>) {
    match explicit_path {
        Some(path) => match dotenvy::from_path(path) {
            Ok(()) => info!("Loaded env from {}", path.display()),
            Err(e) => {
                eprintln!(
                    "Warning: Failed to load dotenv file '{}': {}",
                    path.display(),
                    e
                );
            }
        },
        None => match dotenvy::dotenv() {
            Ok(path) => info!("Loaded env from {}", path.display()),
            Err(dotenvy::Error::Io(_)) => {}
            Err(e) => {
                eprintln!("Warning: Failed to parse .env file: {}", e);
            }
        },
    }
}

fn resolve_store_dir(config: &ProcflowConfig, flag: Option<PathBuf>) -> PathBuf {
    flag.or_else(|| config.store_dir.as_ref().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_DIR))
}

async fn open_engine(
    config: &ProcflowConfig,
    sources: &SourceArgs,
) -> Result<(Arc<Engine>, Arc<ProcessCatalog>, Arc<dyn StateStore>)> {
    let catalog_path = sources
        .catalog
        .clone()
        .or_else(|| config.catalog.as_ref().map(PathBuf::from))
        .ok_or_else(|| anyhow::anyhow!("No process catalog given (use --catalog or 'catalog' in procflow.yaml)"))?;

    let registry = HandlerRegistry::with_builtins();
    let catalog = Arc::new(load_catalog(&catalog_path, &registry)?);

    let store_dir = resolve_store_dir(config, sources.store_dir.clone());
    let store: Arc<dyn StateStore> = Arc::new(JsonStateStore::new(store_dir));

    let database = sources
        .database
        .clone()
        .or_else(|| config.database_url.clone());
    let data_file = sources
        .data
        .clone()
        .or_else(|| config.data_file.as_ref().map(PathBuf::from));

    let records: Arc<dyn RecordSource> = match (database, data_file) {
        (Some(url), _) => Arc::new(SqlRecordSource::connect(&url).await?),
        (None, Some(path)) => Arc::new(MemoryRecordSource::from_json_file(path)?),
        (None, None) => Arc::new(MemoryRecordSource::new()),
    };

    let engine = Arc::new(Engine::new(catalog.clone(), store.clone(), records));
    Ok((engine, catalog, store))
}

/// Build a callback from `--record-id` and `--field` flags, if any were given.
fn build_callback(
    key_field: &str,
    record_ids: &[String],
    fields: &[String],
) -> Result<Option<Arc<dyn DataCompletionCallback>>> {
    if record_ids.is_empty() && fields.is_empty() {
        return Ok(None);
    }

    let mut builder = CallbackDescriptor::builder();
    match record_ids {
        [] => {}
        [one] => builder = builder.filter(QueryFilter::equals(key_field, parse_scalar(one))),
        many => {
            builder = builder.filter(QueryFilter::in_list(
                key_field,
                many.iter().map(|id| parse_scalar(id)),
            ))
        }
    }

    for field in fields {
        let (name, value) = field
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("--field expects name=value, got '{}'", field))?;
        builder = builder.value(name.trim(), parse_scalar(value));
    }

    let callback: Arc<dyn DataCompletionCallback> = Arc::new(builder.build());
    Ok(Some(callback))
}

/// Interpret a command-line value as JSON when it parses, else as a string.
fn parse_scalar(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

async fn cmd_run(
    config: &ProcflowConfig,
    sources: SourceArgs,
    input: RunInput,
    verbose: bool,
) -> Result<()> {
    let (engine, catalog, _store) = open_engine(config, &sources).await?;

    if verbose && let Some(process) = catalog.get(&input.process_name) {
        println!("Process: {} ({} steps)", process.name, process.steps().len());
        for step in process.steps() {
            match step {
                StepDefinition::Backend(b) => println!(
                    "  {} [backend:{}]",
                    b.name,
                    b.handler.handler_type()
                ),
                StepDefinition::Frontend(f) => println!("  {} [frontend]", f.name),
            }
        }
    }

    let output = engine.runner.run(input).await;
    print_output(&output, verbose)?;
    finish(output)
}

async fn cmd_cancel(config: &ProcflowConfig, sources: SourceArgs, input: CancelInput) -> Result<()> {
    let (engine, _catalog, _store) = open_engine(config, &sources).await?;
    let output = engine.canceler.cancel(input).await;
    print_output(&output, false)?;
    finish(output)
}

fn print_output(output: &RunOutput, verbose: bool) -> Result<()> {
    println!("\nRun ID: {}", output.run_id);
    println!("Status: {}", output.status);
    if let Some(step) = &output.last_step {
        println!("Last step: {}", step);
    }

    if let Some(state) = &output.process_state {
        if let Some(next) = &state.next_step_name {
            println!("Paused at: {}", next);
        }
        if verbose {
            println!("Plan: {}", state.step_list.join(" → "));
            println!("Records: {}", state.records.len());
        }
    }

    if !output.values.is_empty() {
        println!("\nValues:");
        println!("{}", serde_json::to_string_pretty(&output.values)?);
    }
    Ok(())
}

fn finish(output: RunOutput) -> Result<()> {
    match output.failure {
        None => Ok(()),
        Some(e) if e.is_user_facing() => {
            anyhow::bail!("Input needed: {} (supply it with --field or --record-id)", e)
        }
        Some(e) => Err(anyhow::Error::new(e)),
    }
}

async fn cmd_inspect(run_id: &str, store_dir: &Path) -> Result<()> {
    let store = JsonStateStore::new(store_dir);

    let state = store
        .get(&RunKey::process_status(run_id))
        .await?
        .ok_or_else(|| anyhow::anyhow!("Run '{}' not found", run_id))?;

    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}

fn cmd_validate(catalog_path: &Path) -> Result<()> {
    let registry = HandlerRegistry::with_builtins();
    let catalog = load_catalog(catalog_path, &registry)
        .with_context(|| format!("Validation failed for {}", catalog_path.display()))?;

    println!("Validation: OK");
    println!("Processes: {}", catalog.len());
    for name in catalog.names() {
        if let Some(process) = catalog.get(name) {
            let cancel = process
                .cancel_step()
                .map(|c| format!(" (cancel: {})", c.name))
                .unwrap_or_default();
            println!("  {}: {}{}", name, process.step_names().join(" → "), cancel);
        }
    }
    Ok(())
}

fn cmd_handlers() -> Result<()> {
    let registry = HandlerRegistry::with_builtins();
    let handlers = registry.list();

    println!("{:<20} DESCRIPTION", "HANDLER");
    println!("{}", "-".repeat(60));

    for (name, desc) in &handlers {
        println!("{:<20} {}", name, desc);
    }

    println!("\nTotal: {} handler(s)", handlers.len());
    Ok(())
}

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};

use nodeflow::config::Config;
use nodeflow::credentials::{CredentialProvider, StaticCredentialProvider};
use nodeflow::engine::Engine;
use nodeflow::nodes::NodeRegistry;
use nodeflow::storage::{ExecutionSink, SqliteSink};
use nodeflow::workflow::{parse_workflow_file, validate};

#[derive(Parser)]
#[command(name = "nodeflow")]
#[command(about = "Run node/edge workflow graphs", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a workflow file for structural problems
    Validate {
        /// Path to a workflow YAML or JSON file
        file: String,
    },
    /// Run a workflow file once
    Run {
        /// Path to a workflow YAML or JSON file
        file: String,
        /// JSON trigger input
        #[arg(short, long)]
        input: Option<String>,
        /// SQLite database for run records (overrides config)
        #[arg(long)]
        db: Option<PathBuf>,
        /// User ID for credential lookups
        #[arg(long)]
        user: Option<String>,
        /// JSON credentials file (overrides config)
        #[arg(long)]
        credentials: Option<PathBuf>,
        /// Print Prometheus metrics after the run
        #[arg(long)]
        metrics: bool,
    },
    /// Show recent runs of a workflow
    Logs {
        /// Workflow name
        name: String,
        /// SQLite database with run records (overrides config)
        #[arg(long)]
        db: Option<PathBuf>,
        /// Number of recent runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// List available node types
    Nodes,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load();

    nodeflow::telemetry::init_tracing(&config.logging)?;

    match cli.command {
        Commands::Validate { file } => cmd_validate(&config, &file)?,
        Commands::Run {
            file,
            input,
            db,
            user,
            credentials,
            metrics,
        } => {
            cmd_run(
                &config,
                &file,
                RunOptions {
                    input: input.as_deref(),
                    db: db.as_deref(),
                    user: user.as_deref(),
                    credentials: credentials.as_deref(),
                    print_metrics: metrics,
                },
            )
            .await?
        }
        Commands::Logs { name, db, limit } => cmd_logs(&config, &name, db.as_deref(), limit).await?,
        Commands::Nodes => cmd_nodes(),
    }

    Ok(())
}

fn load_file(file: &str) -> anyhow::Result<nodeflow::workflow::WorkflowDefinition> {
    let path = Path::new(file);
    if !path.exists() {
        anyhow::bail!("File not found: {}", file);
    }
    Ok(parse_workflow_file(path)?)
}

fn open_sink(config: &Config, db: Option<&Path>) -> anyhow::Result<Option<SqliteSink>> {
    let path = db.or(config.storage.database_path.as_deref());
    match path {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            Ok(Some(SqliteSink::open(path)?))
        }
        None => Ok(None),
    }
}

/// Explicit paths must load; the default location is used only if it exists.
async fn load_credentials(
    config: &Config,
    path: Option<&Path>,
) -> anyhow::Result<Option<StaticCredentialProvider>> {
    if let Some(path) = path.or(config.credentials.path.as_deref()) {
        return Ok(Some(StaticCredentialProvider::load_from_path(path).await?));
    }
    match StaticCredentialProvider::default_path() {
        Some(path) if path.exists() => {
            Ok(Some(StaticCredentialProvider::load_from_path(&path).await?))
        }
        _ => Ok(None),
    }
}

fn cmd_validate(config: &Config, file: &str) -> anyhow::Result<()> {
    let workflow = load_file(file)?;
    let diagnostics = validate(&workflow.nodes, &workflow.edges, &config.engine_config())?;

    println!("✓ Workflow '{}' is valid", workflow.name);
    println!();
    println!("  Nodes: {}", workflow.nodes.len());
    println!("  Edges: {}", workflow.edges.len());
    println!("  Trigger: {}", diagnostics.triggers.join(", "));

    for warning in &diagnostics.warnings {
        println!("  ⚠ {}", warning);
    }

    Ok(())
}

struct RunOptions<'a> {
    input: Option<&'a str>,
    db: Option<&'a Path>,
    user: Option<&'a str>,
    credentials: Option<&'a Path>,
    print_metrics: bool,
}

async fn cmd_run(config: &Config, file: &str, options: RunOptions<'_>) -> anyhow::Result<()> {
    let RunOptions {
        input,
        db,
        user,
        credentials,
        print_metrics,
    } = options;
    let workflow = load_file(file)?;

    let input_value: serde_json::Value = match input {
        Some(input_str) => serde_json::from_str(input_str)?,
        None => serde_json::json!({}),
    };

    if print_metrics {
        nodeflow::metrics::init_metrics()?;
    }

    let mut engine = Engine::new(Arc::new(NodeRegistry::new()))
        .with_config(Arc::new(config.engine_config()));
    if let Some(sink) = open_sink(config, db)? {
        let sink: Arc<dyn ExecutionSink> = Arc::new(sink);
        engine = engine.with_sink(sink);
    }
    match load_credentials(config, credentials).await? {
        Some(provider) => {
            let provider: Arc<dyn CredentialProvider> = Arc::new(provider);
            engine = engine.with_credentials(provider);
        }
        None if user.is_some() => {
            tracing::warn!("--user given but no credentials file found; authenticated nodes will fail");
        }
        None => {}
    }
    if let Some(user) = user {
        engine = engine.with_user_id(user);
    }

    let outcome = engine.run(&workflow, input_value).await;

    let code = match &outcome {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(result)?);
            0
        }
        Err(failure) => {
            println!("{}", serde_json::to_string_pretty(&failure.to_json())?);
            1
        }
    };

    if print_metrics {
        eprintln!("{}", nodeflow::metrics::render_metrics());
    }

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

async fn cmd_logs(
    config: &Config,
    name: &str,
    db: Option<&Path>,
    limit: usize,
) -> anyhow::Result<()> {
    let sink = open_sink(config, db)?
        .ok_or_else(|| anyhow::anyhow!("No database configured. Pass --db or set NODEFLOW_DATABASE_PATH"))?;
    let runs = sink.list_runs(name, limit).await?;

    if runs.is_empty() {
        println!("No runs found for workflow '{}'", name);
        return Ok(());
    }

    println!(
        "{:<36} {:<10} {:<6} {:<20} {}",
        "RUN ID", "STATUS", "NODES", "STARTED", "LAST NODE"
    );
    println!("{}", "-".repeat(90));

    for run in runs {
        println!(
            "{:<36} {:<10} {:<6} {:<20} {}",
            run.id,
            run.status.to_string(),
            run.nodes_executed,
            run.started_at.format("%Y-%m-%d %H:%M:%S"),
            run.last_checkpoint.unwrap_or_default()
        );
        if let Some(error) = run.error {
            println!("    error: {}", error);
        }
    }

    Ok(())
}

fn cmd_nodes() {
    let registry = NodeRegistry::new();
    for (tag, description) in registry.descriptions() {
        println!("{:<18} {}", tag, description);
    }
}

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pipewright_core::queue::MemoryQueue;
use pipewright_core::runner::{CompositeToolRunner, ContainerToolRunner, HttpToolRunner};
use pipewright_core::storage::{MemoryStore, RedbRunStore, RunStore};
use pipewright_core::workflow::{PipelineManager, RunCoordinator};
use pipewright_core::RunStatus;
use std::path::{Path, PathBuf};
use std::sync::Arc;

mod config;
mod definition;

use config::CliConfig;
use definition::PipelineDefinition;

#[derive(Parser, Debug)]
#[command(name = "pipewright")]
#[command(about = "Dependency-ordered pipeline runner", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "pipewright.toml", env = "PIPEWRIGHT_CONFIG")]
    config: PathBuf,

    /// Data directory for run storage
    #[arg(short, long, default_value = "./data", env = "PIPEWRIGHT_DATA_DIR")]
    data_dir: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check a pipeline definition for cycles and unreachable steps
    Validate { pipeline: PathBuf },

    /// Print the execution levels of a pipeline
    Plan { pipeline: PathBuf },

    /// Execute a pipeline and wait for it to finish
    Run {
        pipeline: PathBuf,

        /// JSON input handed to every step
        #[arg(long, default_value = "null")]
        input: String,
    },

    /// List persisted runs, newest first
    Runs,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "pipewright=info".into());

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.with_file(true).with_line_number(true).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    tracing::info!("Data directory: {}", args.data_dir.display());
    let config = CliConfig::load(&args.config, args.data_dir)?;

    match args.command {
        Command::Validate { pipeline } => validate(&pipeline).await,
        Command::Plan { pipeline } => plan(&pipeline).await,
        Command::Run { pipeline, input } => run(&config, &pipeline, &input).await,
        Command::Runs => list_runs(&config).await,
    }
}

async fn load(path: &Path) -> Result<(Arc<PipelineManager>, pipewright_core::Pipeline)> {
    let manager = Arc::new(PipelineManager::new(Arc::new(MemoryStore::new())));
    let pipeline = PipelineDefinition::load(path)?.install(&manager).await?;
    Ok((manager, pipeline))
}

async fn validate(path: &Path) -> Result<()> {
    let (manager, pipeline) = load(path).await?;
    manager.validate_pipeline(&pipeline.id).await?;
    println!("Pipeline {} is valid", pipeline.name);
    Ok(())
}

async fn plan(path: &Path) -> Result<()> {
    let (manager, pipeline) = load(path).await?;
    let plan = manager.get_execution_plan(&pipeline.id).await?;
    println!("{}", serde_json::to_string_pretty(&plan.summary(pipeline.id))?);
    Ok(())
}

async fn run(config: &CliConfig, path: &Path, input: &str) -> Result<()> {
    let input: serde_json::Value =
        serde_json::from_str(input).context("--input must be valid JSON")?;
    let (manager, pipeline) = load(path).await?;

    let runs: Arc<dyn RunStore> = Arc::new(RedbRunStore::new(config.runs_path())?);
    let runner = CompositeToolRunner::new()
        .with_runner(
            "container",
            Arc::new(ContainerToolRunner::new(&config.engine.container)),
        )
        .with_runner("http", Arc::new(HttpToolRunner::new(&config.engine.http)?));

    let coordinator = RunCoordinator::new(
        manager,
        runs,
        Arc::new(runner),
        Arc::new(MemoryQueue::new()),
        &config.engine,
    );

    let run = coordinator.execute_pipeline(pipeline.id, input).await?;
    tracing::info!("Started run {} of pipeline {}", run.id, pipeline.name);

    tokio::select! {
        _ = coordinator.wait_idle() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, cancelling run {}", run.id);
            coordinator.shutdown().await;
        }
    }

    let run = coordinator.get_run(&run.id).await?;
    let results = coordinator
        .get_execution_status(&run.id)
        .await
        .map(|context| context.results())
        .unwrap_or_default();

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "run": run,
            "results": results,
        }))?
    );

    if run.status != RunStatus::Completed {
        anyhow::bail!("run {} ended {}", run.id, run.status);
    }
    Ok(())
}

async fn list_runs(config: &CliConfig) -> Result<()> {
    let runs = RedbRunStore::new(config.runs_path())?;
    for run in runs.list_runs(None).await? {
        println!(
            "{}  {:<10}  {:>3}%  pipeline={}  created={}",
            run.id,
            run.status.to_string(),
            run.progress,
            run.pipeline_id,
            run.created_at.to_rfc3339()
        );
    }
    Ok(())
}

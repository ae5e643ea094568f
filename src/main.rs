//! hpltune CLI - HPL-AI auto-tuner for Slurm clusters

use clap::Parser;
use hpltune::config::{CliArgs, Commands, TuneConfig};
use hpltune::error::{IoResultExt, Result, TuneError};
use hpltune::scheduler::{CancelRequest, MockScheduler, SchedulerClient, ShellExecutor, SlurmClient};
use hpltune::tuning::{ResourceFacts, ResultSelector, TuningOrchestrator};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn main() {
    // Parse CLI arguments
    let args = CliArgs::parse();

    // Initialize logging; RUST_LOG wins over -v
    let level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: CliArgs) -> Result<()> {
    let config = TuneConfig::from_cli(&args)?;

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| TuneError::config(format!("Failed to create runtime: {}", e)))?;

    rt.block_on(async {
        match &args.command {
            Commands::Run => cmd_run(config).await,
            Commands::Plan {
                mem,
                gpus,
                cpus,
                affinity_file,
            } => {
                let facts = match (mem, gpus, cpus) {
                    (Some(mem), Some(gpus), Some(cpus)) => Some(offline_facts(
                        *mem,
                        *gpus,
                        *cpus,
                        affinity_file.as_deref(),
                    )?),
                    _ => None,
                };
                cmd_plan(config, facts).await
            }
            Commands::Parse { log } => cmd_parse(&config, log).await,
            Commands::Health => cmd_health(&config).await,
            Commands::Cancel => cmd_cancel(&config).await,
        }
    })
}

fn slurm(config: &TuneConfig) -> SlurmClient<ShellExecutor> {
    SlurmClient::new(ShellExecutor::new(), config.user.clone())
        .with_output_pattern(config.output_pattern())
}

async fn cmd_run(config: TuneConfig) -> Result<()> {
    let (cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling");
            let _ = cancel_tx.send(true);
        }
    });

    tracing::info!(
        job = %config.job_name,
        nodes = config.nodes,
        budget = %humantime::format_duration(config.poll.budget()),
        "starting HPL-AI tuning"
    );

    let scheduler = Arc::new(slurm(&config));
    let report = TuningOrchestrator::new(scheduler, config, cancel_rx)
        .run()
        .await?;

    print_json(&report)
}

async fn cmd_plan(config: TuneConfig, facts: Option<ResourceFacts>) -> Result<()> {
    let (_cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);
    let scheduler: Arc<dyn SchedulerClient> = match facts {
        Some(facts) => Arc::new(MockScheduler::new(facts)),
        None => Arc::new(slurm(&config)),
    };

    let dat_path = config.dat_file_path();
    let orchestrator = TuningOrchestrator::new(scheduler, config, cancel_rx);
    let facts = orchestrator.probe().await?;
    let plan = orchestrator.plan_sweep(&facts)?;

    println!("=== {} ===", dat_path.display());
    print!("{}", plan.artifacts.dat_file);
    println!("\n=== sbatch ===");
    print!("{}", plan.artifacts.sbatch_file);
    Ok(())
}

async fn cmd_parse(config: &TuneConfig, log: &Path) -> Result<()> {
    let best = ResultSelector::new(config.csv_path.clone())
        .select_from_file(log)
        .await?;
    print_json(&best)
}

async fn cmd_health(config: &TuneConfig) -> Result<()> {
    slurm(config).health_check().await?;
    println!("scheduler is healthy");
    Ok(())
}

async fn cmd_cancel(config: &TuneConfig) -> Result<()> {
    slurm(config)
        .cancel_job(&CancelRequest {
            name: config.job_name.clone(),
            user: config.user.clone(),
        })
        .await?;
    println!("cancelled {}", config.job_name);
    Ok(())
}

/// Facts for planning without a cluster; the affinity table defaults to
/// contiguous CPU ranges split evenly across the GPUs
fn offline_facts(mem: u64, gpus: u32, cpus: u32, affinity_file: Option<&Path>) -> Result<ResourceFacts> {
    let affinity_table = match affinity_file {
        Some(path) => std::fs::read_to_string(path).with_path(path)?,
        None => {
            let per_gpu = (cpus / gpus.max(1)).max(1);
            (0..gpus)
                .map(|gpu| format!("{}\t{}-{}\n", gpu, gpu * per_gpu, (gpu + 1) * per_gpu - 1))
                .collect()
        }
    };

    Ok(ResourceFacts {
        mem_per_node_mb: mem,
        gpus_per_node: gpus,
        cpus_per_node: cpus,
        affinity_table,
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

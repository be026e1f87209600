use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use orderq_core::config::OrderqConfig;
use orderq_scheduler::{FifoScheduler, JobFault, SchedulerStats};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "orderq", version, about = "Strictly ordered job execution")]
struct Cli {
    /// Path to orderq.toml (defaults to ~/.orderq/orderq.toml).
    #[arg(long, env = "ORDERQ_CONFIG", global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a batch of ordered jobs and print the outcome as JSON.
    Run(RunArgs),
    /// Print the effective configuration as JSON.
    Config,
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Number of jobs to schedule.
    #[arg(long, default_value_t = 100)]
    jobs: usize,

    /// Per-job sleep, cut short when the scheduler is stopped.
    #[arg(long, default_value_t = 0)]
    delay_ms: u64,

    /// Stop right after scheduling instead of waiting for the batch.
    #[arg(long)]
    stop_early: bool,

    /// Make the job with this index panic.
    #[arg(long)]
    panic_at: Option<usize>,
}

#[derive(Debug, Serialize)]
struct RunReport {
    stats: SchedulerStats,
    executed: usize,
    out_of_order: usize,
    saw_cancellation: usize,
    faults: Vec<JobFault>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Config comes first so its log filter can seed the subscriber.
    let loaded = OrderqConfig::load(cli.config.as_deref());
    let config = loaded.as_ref().cloned().unwrap_or_default();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log.filter.as_str().into()),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = loaded {
        warn!(code = e.code(), "Config load failed ({}), using defaults", e);
    }

    match cli.command {
        Command::Run(args) => {
            let report = run_batch(&config, &args).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if report.out_of_order > 0 {
                anyhow::bail!("{} job(s) ran out of order", report.out_of_order);
            }
        }
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }
    Ok(())
}

async fn run_batch(config: &OrderqConfig, args: &RunArgs) -> anyhow::Result<RunReport> {
    let (faults_tx, mut faults_rx) = mpsc::channel(config.scheduler.fault_channel_capacity.max(1));
    let scheduler = FifoScheduler::new(&config.scheduler, Some(faults_tx))?;

    let next = Arc::new(AtomicUsize::new(0));
    let executed = Arc::new(AtomicUsize::new(0));
    let out_of_order = Arc::new(AtomicUsize::new(0));
    let saw_cancellation = Arc::new(AtomicUsize::new(0));
    let delay = Duration::from_millis(args.delay_ms);

    for i in 0..args.jobs {
        let next = Arc::clone(&next);
        let executed = Arc::clone(&executed);
        let out_of_order = Arc::clone(&out_of_order);
        let saw_cancellation = Arc::clone(&saw_cancellation);
        let panics = args.panic_at == Some(i);

        scheduler.schedule(move |cancel: CancellationToken| async move {
            if next.swap(i + 1, Ordering::SeqCst) != i {
                out_of_order.fetch_add(1, Ordering::SeqCst);
            }
            executed.fetch_add(1, Ordering::SeqCst);

            if !delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {}
                }
            }
            if cancel.is_cancelled() {
                saw_cancellation.fetch_add(1, Ordering::SeqCst);
            }
            if panics {
                panic!("injected panic in job {i}");
            }
        })?;
    }
    info!(jobs = args.jobs, stop_early = args.stop_early, "batch scheduled");

    if !args.stop_early {
        scheduler.wait_finish(args.jobs).await;
    }
    scheduler.stop().await;

    let mut faults = Vec::new();
    while let Ok(fault) = faults_rx.try_recv() {
        faults.push(fault);
    }

    Ok(RunReport {
        stats: scheduler.stats(),
        executed: executed.load(Ordering::SeqCst),
        out_of_order: out_of_order.load(Ordering::SeqCst),
        saw_cancellation: saw_cancellation.load(Ordering::SeqCst),
        faults,
    })
}

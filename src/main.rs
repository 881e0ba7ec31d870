use anyhow::Result;
use clap::{Parser, Subcommand};
use std::time::Duration;

use athena_monitor::config::MonitorConfig;
use athena_monitor::model::{ExecutionDetail, ExecutionStatus};
use athena_monitor::registry::MonitorUpdate;
use athena_monitor::timeline::{StepStatus, TimelineStep};
use athena_monitor::Monitor;

#[derive(Parser)]
#[command(
    name = "athena-monitor",
    about = "Execution monitoring client for the Athena runbook automation service",
    version,
    long_about = None
)]
struct Cli {
    /// Path to a config file (overrides ATHENA_MONITOR_CONFIG)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Execution service base URL (overrides config)
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Trigger a runbook and watch its execution live
    Run {
        /// Runbook id to execute
        #[arg(long)]
        runbook: i64,

        /// Trigger only; print the execution id and exit
        #[arg(long)]
        no_watch: bool,
    },

    /// Watch an already-running execution's progress stream
    Watch {
        /// Execution id
        execution_id: i64,
    },

    /// List recent executions
    List {
        /// Maximum number of rows
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show the stored snapshot of one execution, including per-node results
    Show {
        /// Execution id
        execution_id: i64,
    },

    /// Poll an execution's snapshot until it reaches a terminal status
    /// (fallback for environments where the push channel is unavailable)
    Poll {
        /// Execution id
        execution_id: i64,

        /// Poll interval in milliseconds
        #[arg(long)]
        interval_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => MonitorConfig::load(std::path::Path::new(path))?,
        None => MonitorConfig::load_or_default(),
    };
    if let Some(url) = &cli.api_url {
        config.api.base_url = url.clone();
    }

    // RUST_LOG wins; the config file level is the fallback.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .init();

    let monitor = athena_monitor::connect(&config)?;

    match cli.command {
        Commands::Run { runbook, no_watch } => {
            let execution = monitor.api.trigger_runbook(runbook).await?;
            println!(
                "Execution {} started for runbook {} ({})",
                execution.id,
                runbook,
                execution.runbook_name.as_deref().unwrap_or("unnamed")
            );
            if !no_watch {
                watch_execution(&monitor, execution.id, Some(runbook)).await?;
            }
        }
        Commands::Watch { execution_id } => {
            watch_execution(&monitor, execution_id, None).await?;
        }
        Commands::List { limit } => {
            let limit = limit.unwrap_or(config.poll.list_limit);
            let executions = monitor.api.list_executions(limit).await?;
            if executions.is_empty() {
                println!("No executions found.");
            } else {
                println!(
                    "{:<8} | {:<20} | {:<9} | {:<19} | Triggered by",
                    "Id", "Runbook", "Status", "Started"
                );
                println!(
                    "{:-<8}-|-{:-<20}-|-{:-<9}-|-{:-<19}-|-{:-<12}",
                    "", "", "", "", ""
                );
                for e in executions {
                    println!(
                        "{:<8} | {:<20} | {:<9} | {:<19} | {}",
                        e.id,
                        e.runbook_name.as_deref().unwrap_or("?"),
                        e.status.to_string(),
                        e.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                        e.triggered_by
                    );
                }
            }
        }
        Commands::Show { execution_id } => {
            let detail = monitor.api.get_execution(execution_id).await?;
            print_detail(&detail);
        }
        Commands::Poll {
            execution_id,
            interval_ms,
        } => {
            let interval = Duration::from_millis(interval_ms.unwrap_or(config.poll.interval_ms));
            poll_execution(&monitor, execution_id, interval).await?;
        }
    }

    Ok(())
}

/// Stream one execution's progress to stdout, then print the authoritative
/// stored result once it completes.
async fn watch_execution(
    monitor: &Monitor,
    execution_id: i64,
    runbook_id: Option<i64>,
) -> Result<()> {
    use tokio::sync::broadcast::error::RecvError;

    // Subscribe before starting so no update is missed.
    let mut updates = monitor.registry.subscribe();
    let _handle = monitor
        .registry
        .start_monitoring_for_runbook(execution_id, runbook_id);

    println!("Watching execution {}...", execution_id);
    loop {
        match updates.recv().await {
            Ok(MonitorUpdate::Step {
                execution_id: id,
                step,
            }) if id == execution_id => {
                print_step(&step);
            }
            Ok(MonitorUpdate::Completed { execution_id: id }) if id == execution_id => break,
            Ok(MonitorUpdate::ConnectionLost {
                execution_id: id,
                reason,
            }) if id == execution_id => {
                println!("\nConnection lost: {}", reason);
                println!("Accumulated steps are shown above. Re-run 'watch' to reconnect.");
                return Ok(());
            }
            Ok(_) => {} // another execution's update
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(%skipped, "update stream lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }

    // The channel carries narration; the stored snapshot is the source of
    // truth for per-node results.
    let detail = monitor.api.get_execution(execution_id).await?;
    print_detail(&detail);
    Ok(())
}

/// Poll the snapshot endpoint, reporting status transitions until terminal.
async fn poll_execution(monitor: &Monitor, execution_id: i64, interval: Duration) -> Result<()> {
    use tokio::sync::broadcast::error::RecvError;

    let mut updates = monitor.poller.subscribe();
    monitor.poller.start(execution_id, interval);

    let mut last: Option<ExecutionStatus> = None;
    loop {
        match updates.recv().await {
            Ok(update) if update.execution_id == execution_id => {
                if last != Some(update.status) {
                    println!("status: {}", update.status);
                    last = Some(update.status);
                }
                if update.status.is_terminal() {
                    break;
                }
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(%skipped, "poller update stream lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }

    if let Some(detail) = monitor.poller.latest(execution_id) {
        print_detail(&detail);
    }
    Ok(())
}

fn print_step(step: &TimelineStep) {
    let marker = match step.status {
        StepStatus::Success => " ok ",
        StepStatus::Warning => "warn",
        StepStatus::Error => "err!",
        StepStatus::InProgress => "....",
    };
    match &step.node {
        Some(node) => println!("[{}] {} ({})", marker, step.message, node),
        None => println!("[{}] {}", marker, step.message),
    }
}

fn print_detail(detail: &ExecutionDetail) {
    println!("\n=== Execution {} ===", detail.id);
    println!(
        "Runbook:   {} (#{})",
        detail.runbook_name.as_deref().unwrap_or("?"),
        detail.runbook_id
    );
    println!("Status:    {}", detail.status);
    println!(
        "Started:   {}",
        detail.started_at.format("%Y-%m-%d %H:%M:%S")
    );
    match &detail.completed_at {
        Some(done) => println!("Completed: {}", done.format("%Y-%m-%d %H:%M:%S")),
        None => println!("Completed: -"),
    }
    println!("Trigger:   {}", detail.triggered_by);

    if detail.results.is_empty() {
        println!("\nNo per-node results stored yet.");
        return;
    }

    println!("\n{:<20} | {:<9} | {:<5} | Summary", "Node", "Status", "Exit");
    println!("{:-<20}-|-{:-<9}-|-{:-<5}-|-{:-<40}", "", "", "", "");
    for result in &detail.results {
        let exit = result
            .exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<20} | {:<9} | {:<5} | {}",
            result.hostname,
            result.status.to_string(),
            exit,
            result.ai_summary.as_deref().unwrap_or("-")
        );
        for resource in &result.ai_resources {
            let metric = resource
                .metric_value
                .as_ref()
                .map(|v| match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .unwrap_or_else(|| "-".to_string());
            println!(
                "{:<20} |   -> {} [{}] {}",
                "", resource.resource_name, resource.status, metric
            );
        }
    }
    println!();
}

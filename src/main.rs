use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use taskweave::config::{load_submission, Config};
use taskweave::core::TaskSpec;
use taskweave::orchestration::{Scheduler, TaskOutput, TaskRunner};
use taskweave::{Error, Result};

/// Taskweave - resource-aware task planner and executor
#[derive(Parser, Debug)]
#[command(name = "taskweave")]
#[command(version, about, long_about = None)]
#[command(
    after_help = "ENVIRONMENT:\n    TASKWEAVE_DEBUG=1     Enable debug logging (alternative to --debug)\n    RUST_LOG              Override the log filter"
)]
pub struct Cli {
    /// Enable debug logging (writes to ~/.taskweave/taskweave.log)
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    /// Config file to use instead of ~/.taskweave/config.toml
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Detect and resolve conflicts, then print the execution plan as JSON
    Plan {
        /// Task submission (.json or .toml)
        file: PathBuf,
    },

    /// Print which tasks each executor admits this cycle and which wait
    Balance {
        /// Task submission (.json or .toml)
        file: PathBuf,
    },

    /// Plan and execute with a simulated runner, then print the summary
    Run {
        /// Task submission (.json or .toml)
        file: PathBuf,

        /// Multiply each task's estimated duration by this factor
        #[arg(long, default_value_t = 1.0)]
        time_scale: f64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    taskweave::log::init_with_debug(cli.debug);
    tracing::info!(command = ?cli.command, "taskweave starting");

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    match cli.command {
        Command::Plan { file } => run_plan(&config, &file),
        Command::Balance { file } => run_balance(&config, &file),
        Command::Run { file, time_scale } => run_execute(&config, &file, time_scale),
    }
}

fn run_plan(config: &Config, file: &Path) -> Result<()> {
    let tasks = load_submission(file)?;
    let registry = config.registry();
    let plan = Scheduler::from_config(&registry, config)?.plan(&tasks)?;
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

fn run_balance(config: &Config, file: &Path) -> Result<()> {
    let tasks = load_submission(file)?;
    let registry = config.registry();
    let outcome = Scheduler::from_config(&registry, config)?.balance(&tasks);

    let admitted: serde_json::Map<String, serde_json::Value> = outcome
        .admitted
        .iter()
        .map(|(executor, tasks)| (executor.to_string(), ids_json(tasks)))
        .collect();
    let json_output = serde_json::json!({
        "admitted": admitted,
        "deferred": ids_json(&outcome.deferred),
    });
    println!("{}", serde_json::to_string_pretty(&json_output)?);
    Ok(())
}

fn ids_json(tasks: &[TaskSpec]) -> serde_json::Value {
    tasks.iter().map(|t| t.id.to_string()).collect()
}

fn run_execute(config: &Config, file: &Path, time_scale: f64) -> Result<()> {
    if !time_scale.is_finite() || time_scale < 0.0 {
        return Err(Error::Validation(format!(
            "time scale must be a non-negative number, got {}",
            time_scale
        )));
    }

    let tasks = load_submission(file)?;
    let registry = config.registry();
    let scheduler = Scheduler::from_config(&registry, config)?;

    let rt = tokio::runtime::Runtime::new()?;
    let summary = rt.block_on(async {
        let cancel = CancellationToken::new();
        let on_signal = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received; cancelling plan");
                on_signal.cancel();
            }
        });

        scheduler
            .run(&tasks, simulated_runner(time_scale), cancel)
            .await
    })?;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// A runner that sleeps for each task's scaled estimate, honouring cancellation.
fn simulated_runner(time_scale: f64) -> Arc<dyn TaskRunner> {
    Arc::new(move |task: TaskSpec, cancel: CancellationToken| async move {
        let sleep = scaled(task.estimated_duration, time_scale);
        tokio::select! {
            _ = cancel.cancelled() => TaskOutput::failure("cancelled"),
            _ = tokio::time::sleep(sleep) => {
                TaskOutput::success(format!("{} finished on {}", task.id, task.executor))
                    .with_duration(sleep)
            }
        }
    })
}

/// `duration * scale`, saturating instead of panicking on overflow.
/// Negative or NaN scales give zero.
fn scaled(duration: Duration, scale: f64) -> Duration {
    let secs = duration.as_secs_f64() * scale;
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

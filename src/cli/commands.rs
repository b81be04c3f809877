//! CLI command definitions for thugd.
//!
//! Two subcommands mirror the two halves of the system: `boss` builds,
//! dispatches and collects tasks, `thuglet` runs a worker until stopped.

use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::channel::RedisChannel;
use crate::config::{DaemonConfig, DEFAULT_TASK_TIMEOUT_SECS};
use crate::error::BossError;
use crate::execution::Supervisor;
use crate::metrics::Metrics;
use crate::scheduler::{Boss, TaskBuilder, Thuglet};

/// Default configuration file path.
const DEFAULT_CONFIG_PATH: &str = "thugd.yaml";

/// Analyzer options applied to tasks that do not bring their own.
const DEFAULT_THUG_OPTS: &str = "-T 30 -E -v -Y -U -t 50 -u win7ie90";

/// Distributed URL analysis over a Redis-backed task queue.
#[derive(Parser)]
#[command(name = "thugd")]
#[command(about = "Distribute URL analysis tasks to thuglet workers and collect the results")]
#[command(version)]
#[command(
    long_about = "thugd runs either side of a distributed analysis setup.\n\nThe boss publishes tasks to the task queue and collects responses; each thuglet claims one task at a time, runs the analyzer with a time bound and publishes the result.\n\nExample usage:\n  thugd boss -u example.com -o \"-T 30 -E\"\n  thugd thuglet -c thugd.yaml"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Dispatch tasks and collect responses.
    Boss(BossArgs),

    /// Run a worker that processes tasks until SIGINT or SIGTERM.
    #[command(alias = "worker")]
    Thuglet(ThugletArgs),
}

/// Broker connection arguments shared by both subcommands.
#[derive(clap::Args, Debug)]
pub struct ConnectionArgs {
    /// YAML configuration file. Defaults apply when it does not exist.
    #[arg(short = 'c', long = "conf", default_value = DEFAULT_CONFIG_PATH)]
    pub conf: PathBuf,

    /// Redis URL, overriding `broker.url` from the configuration file.
    #[arg(long, env = "THUGD_REDIS_URL")]
    pub redis_url: Option<String>,
}

impl ConnectionArgs {
    fn load_config(&self) -> anyhow::Result<DaemonConfig> {
        let mut config = DaemonConfig::load_or_default(&self.conf)?;
        if let Some(ref url) = self.redis_url {
            config.broker.url = url.clone();
        }
        Ok(config)
    }
}

/// Arguments for `thugd boss`.
#[derive(Parser, Debug)]
pub struct BossArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// JSON task file with a `urls` array and an optional `opts` array.
    #[arg(short = 't', long = "task")]
    pub task: Option<PathBuf>,

    /// URLs to analyze.
    #[arg(short = 'u', long = "urls", num_args = 1..)]
    pub urls: Vec<String>,

    /// Analyzer timeout in seconds for each task.
    #[arg(long, default_value_t = DEFAULT_TASK_TIMEOUT_SECS)]
    pub timeout: u64,

    /// Analyzer options, used unless the task file has its own.
    #[arg(short = 'o', long, default_value = DEFAULT_THUG_OPTS, allow_hyphen_values = true)]
    pub opts: String,

    /// Only send tasks.
    #[arg(short = 's', long)]
    pub send: bool,

    /// Only receive responses.
    #[arg(short = 'r', long)]
    pub recv: bool,

    /// Flush the task, response and skip queues, then exit.
    #[arg(short = 'f', long)]
    pub flush: bool,

    /// Stop collecting after this many seconds even if responses are outstanding.
    #[arg(long)]
    pub collect_deadline: Option<u64>,

    /// Write Prometheus metrics to this file on exit.
    #[arg(long)]
    pub metrics_out: Option<PathBuf>,
}

impl BossArgs {
    /// Whether to send and whether to receive. Neither flag means both.
    pub fn modes(&self) -> (bool, bool) {
        if !self.send && !self.recv {
            (true, true)
        } else {
            (self.send, self.recv)
        }
    }
}

/// Arguments for `thugd thuglet`.
#[derive(Parser, Debug)]
pub struct ThugletArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,
}

/// Parse CLI arguments without running any command.
///
/// Use this when you need access to CLI args before running (e.g., for logging setup).
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Boss(args) => {
            run_boss_command(args).await?;
        }
        Commands::Thuglet(args) => {
            run_thuglet_command(args).await?;
        }
    }
    Ok(())
}

async fn run_boss_command(args: BossArgs) -> anyhow::Result<()> {
    let config = args.connection.load_config()?;
    let metrics = Metrics::new().context("Failed to register metrics")?;

    let (interrupt_tx, interrupt_rx) = broadcast::channel(1);
    let mut connect_interrupt = interrupt_tx.subscribe();
    tokio::spawn(async move {
        relay_signals(interrupt_tx, || async { tokio::signal::ctrl_c().await.is_ok() }).await;
        force_exit();
    });

    let consumer = config.broker.boss_consumer.clone();
    let channel = tokio::select! {
        result = RedisChannel::connect_with_retry(
            &config.broker.url,
            &consumer,
            config.broker.retry_delay(),
        ) => result?,
        _ = connect_interrupt.recv() => {
            println!("[!] Thugboss terminated.");
            return Ok(());
        }
    };

    let mut boss = Boss::new(Arc::new(channel), config.broker.queues())
        .with_deadline(
            args.collect_deadline
                .map(std::time::Duration::from_secs),
        )
        .with_metrics(metrics.clone())
        .with_interrupt(interrupt_rx);

    if args.flush {
        boss.flush().await?;
        return write_metrics(&metrics, args.metrics_out.as_deref());
    }

    let mut builder = TaskBuilder::new();
    if let Some(ref task_file) = args.task {
        let added = builder.load_tasks(task_file, Some(&args.opts), Some(args.timeout));
        info!(path = %task_file.display(), added, "Loaded task file");
    }
    if !args.urls.is_empty() {
        builder.load_input(args.urls.iter().cloned(), Some(&args.opts), Some(args.timeout));
    }
    boss.add_tasks(builder.into_tasks());

    let (send, recv) = args.modes();
    if recv {
        match boss.recover().await {
            Ok(0) => {}
            Ok(recovered) => info!(consumer = %consumer, recovered, "Requeued responses left over from a previous run"),
            Err(e) => warn!(consumer = %consumer, error = %e, "Failed to recover unacknowledged responses"),
        }
    }
    match drive_boss(&mut boss, send, recv).await {
        Ok(()) => {}
        Err(BossError::Interrupted) => {
            println!("[!] Thugboss terminated.");
        }
        Err(e) => return Err(e.into()),
    }

    write_metrics(&metrics, args.metrics_out.as_deref())
}

async fn drive_boss(boss: &mut Boss, send: bool, recv: bool) -> Result<(), BossError> {
    if send {
        boss.dispatch().await?;
    }
    if recv {
        let summary = boss.collect().await?;
        if summary.deadline_elapsed {
            warn!(pending = summary.pending, "Stopped collecting before all responses arrived");
        }
    }
    Ok(())
}

fn write_metrics(metrics: &Metrics, path: Option<&Path>) -> anyhow::Result<()> {
    let Some(path) = path else {
        return Ok(());
    };
    fs::write(path, metrics.export())
        .with_context(|| format!("Failed to write metrics to {}", path.display()))?;
    info!(path = %path.display(), "Wrote metrics");
    Ok(())
}

async fn run_thuglet_command(args: ThugletArgs) -> anyhow::Result<()> {
    let config = args.connection.load_config()?;
    let worker = &config.worker;
    let consumer = worker.consumer_name();
    let metrics = Metrics::new().context("Failed to register metrics")?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let mut startup_shutdown = shutdown_tx.subscribe();
    tokio::spawn(async move {
        relay_signals(shutdown_tx, shutdown_signal).await;
        force_exit();
    });

    info!(
        consumer = %consumer,
        delay_secs = worker.startup_delay_secs,
        "Waiting before connecting to broker"
    );
    let channel = tokio::select! {
        result = async {
            tokio::time::sleep(worker.startup_delay()).await;
            RedisChannel::connect_with_retry(
                &config.broker.url,
                &consumer,
                config.broker.retry_delay(),
            )
            .await
        } => result?,
        _ = startup_shutdown.recv() => {
            info!(consumer = %consumer, "Thuglet terminated before connecting");
            return Ok(());
        }
    };

    let supervisor = Supervisor::new(worker.binary.clone())
        .with_poll_interval(worker.poll_interval())
        .with_kill_grace(worker.kill_grace());

    let thuglet = Thuglet::new(
        consumer.clone(),
        Arc::new(channel),
        config.broker.queues(),
        supervisor,
    )
    .with_default_timeout(worker.default_timeout())
    .with_poll_interval(worker.poll_interval())
    .with_metrics(metrics.clone());

    match thuglet.recover().await {
        Ok(0) => {}
        Ok(recovered) => info!(consumer = %consumer, recovered, "Requeued tasks left over from a previous run"),
        Err(e) => warn!(consumer = %consumer, error = %e, "Failed to recover unacknowledged tasks"),
    }

    thuglet.run(shutdown_rx).await;
    debug!(metrics = %metrics.export(), "Final metrics");
    Ok(())
}

/// Broadcasts the first signal as a graceful stop and resolves on the second.
///
/// `next_signal` yields `false` when signals cannot be received at all; the
/// relay then never resolves.
async fn relay_signals<F, Fut>(tx: broadcast::Sender<()>, mut next_signal: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    if !next_signal().await {
        return std::future::pending().await;
    }
    info!("Received shutdown signal, finishing current work (signal again to exit now)");
    let _ = tx.send(());

    if !next_signal().await {
        return std::future::pending().await;
    }
}

/// Exits without waiting for in-flight work. Unacknowledged messages stay in
/// the consumer's processing list and are recovered on the next start.
fn force_exit() -> ! {
    warn!("Second shutdown signal, exiting immediately");
    std::process::exit(130)
}

/// Resolves on SIGINT or, on unix, SIGTERM.
#[cfg(unix)]
async fn shutdown_signal() -> bool {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(e) => {
            warn!(error = %e, "Failed to install SIGTERM handler");
            return tokio::signal::ctrl_c().await.is_ok();
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => result.is_ok(),
        received = terminate.recv() => received.is_some(),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> bool {
    tokio::signal::ctrl_c().await.is_ok()
}

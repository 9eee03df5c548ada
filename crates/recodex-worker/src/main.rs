//! The worker process entry point (spec.md §7): loads the worker config,
//! then runs the two-thread model BROKER (this thread, driving
//! [`BrokerConnection`]) and JOB (owning the [`JobReceiver`]) connected by
//! the `jobs` and `progress` in-process channels.

use anyhow::{Context, Result};
use clap::Parser;
use recodex_worker_base::WorkerConfig;
use recodex_worker_broker::receiver::{DoneResult, EvalRequest};
use recodex_worker_broker::{BrokerConnection, ChannelProgressCallback, JobEvaluator, JobReceiver};
use recodex_worker_cache::{FileCache, Fetcher};
use recodex_worker_job::tasks::SandboxKind;
use recodex_worker_util::{config::Config, log};
use slog::o;
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;

/// Command-line options that can override the worker config file (spec.md
/// §6); everything else comes from the YAML file named by `config`.
#[derive(Parser, Debug)]
#[command(name = "recodex-worker", about = "ReCodEx evaluation worker")]
struct Args {
    /// Path to the worker's YAML configuration file.
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Overrides the configured hwgroup.
    #[arg(long, value_name = "HWGROUP")]
    hwgroup: Option<String>,

    /// Overrides the configured worker id.
    #[arg(long, value_name = "ID")]
    worker_id: Option<u64>,

    /// Minimum log level to output.
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    log_level: String,

    /// Use the no-op sandbox instead of shelling out to `isolate`, for
    /// running the worker against a broker without root/cgroups access.
    #[arg(long)]
    fake_sandbox: bool,
}

fn parse_log_level(level: &str) -> slog::Level {
    match level.to_ascii_lowercase().as_str() {
        "critical" => slog::Level::Critical,
        "error" => slog::Level::Error,
        "warning" | "warn" => slog::Level::Warning,
        "debug" => slog::Level::Debug,
        "trace" => slog::Level::Trace,
        _ => slog::Level::Info,
    }
}

fn load_config(args: &Args) -> Result<WorkerConfig> {
    let mut cfg = Config::from_yaml_file(&args.config, "RECODEX_WORKER")
        .with_context(|| format!("loading config file {}", args.config.display()))?;
    if let Some(hwgroup) = &args.hwgroup {
        cfg = cfg.with_cli_override("hwgroup", hwgroup.clone());
    }
    if let Some(worker_id) = args.worker_id {
        cfg = cfg.with_cli_override("worker-id", worker_id.to_string());
    }
    cfg.get_root().context("parsing worker configuration")
}

fn run(config: WorkerConfig, fake_sandbox: bool, logger: slog::Logger) -> Result<()> {
    let cache = FileCache::new(config.cache_dir()).context("initializing file cache")?;
    let fetcher = Fetcher::new(cache, config.filemans.clone(), logger.new(o!("thread" => "job")));
    let sandbox_kind = if fake_sandbox {
        SandboxKind::Fake
    } else {
        SandboxKind::Isolate
    };

    let evaluator = JobEvaluator::new(config.clone(), fetcher, sandbox_kind, logger.new(o!("thread" => "job")));

    let (eval_tx, eval_rx) = mpsc::channel::<EvalRequest>();
    let (done_tx, done_rx) = mpsc::channel::<DoneResult>();
    let (progress_tx, progress_rx) = mpsc::channel();

    let progress = ChannelProgressCallback::new(progress_tx, logger.new(o!("thread" => "job")));
    let receiver = JobReceiver::new(eval_rx, done_tx, evaluator, progress, logger.new(o!("thread" => "job")));

    let job_thread = thread::Builder::new()
        .name("job".to_string())
        .spawn(move || receiver.run())
        .context("spawning job thread")?;

    let connection = BrokerConnection::connect(&config, logger.new(o!("thread" => "broker")))
        .context("connecting to broker")?;
    connection.run(eval_tx, done_rx, progress_rx)?;

    job_thread
        .join()
        .map_err(|_| anyhow::anyhow!("job thread panicked"))
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;
    let level = parse_log_level(&args.log_level);
    let fake_sandbox = args.fake_sandbox;
    log::run_with_logger(level, move |logger| run(config, fake_sandbox, logger))
}

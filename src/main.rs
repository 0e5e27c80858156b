#![forbid(unsafe_code)]

//! `bench-monitor`: drives a monitored benchmark run.
//!
//! Bootstraps configuration and tracing, builds the [`TestRunner`], then
//! reports each synthetic iteration to it the way a hosting request layer
//! would. Ctrl-C or SIGTERM ends the run early; the session log is always
//! closed before exit.

use std::hint::black_box;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use bench_monitor::{AppError, MonitorConfig, Result, TestRunner};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "bench-monitor", about = "Process resource monitor for benchmark runs", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the results directory.
    #[arg(long)]
    results_root: Option<PathBuf>,

    /// Test name used for the log file.
    #[arg(long, default_value = "synthetic")]
    test: String,

    /// Iteration index of this benchmark run, used for the log file.
    #[arg(long, default_value_t = 0)]
    run_index: u32,

    /// Number of units of work to run.
    #[arg(long, default_value_t = 20)]
    iterations: u32,

    /// Delay between units of work, in milliseconds.
    #[arg(long, default_value_t = 100)]
    interval_ms: u64,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("bench-monitor bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = match &args.config {
        Some(path) => MonitorConfig::load_from_path(path)?,
        None => MonitorConfig::default(),
    };
    if let Some(root) = args.results_root {
        config.results_root = root;
    }
    config.validate()?;
    info!(
        results_root = %config.results_root.display(),
        period_ms = config.sampling.period_ms,
        max_idle_ms = config.sampling.max_idle_ms,
        "configuration loaded"
    );

    let runner = Arc::new(TestRunner::new(config));
    let iterations = args.iterations;
    let run_index = args.run_index;

    // ── Drive the workload ──────────────────────────────
    let mut workload = {
        let runner = Arc::clone(&runner);
        let test = args.test.clone();
        let interval = Duration::from_millis(args.interval_ms);
        tokio::spawn(async move {
            for index in 0..iterations {
                runner.log_test_run(&test, run_index).await;
                if let Err(err) = tokio::task::spawn_blocking(move || unit_of_work(index)).await {
                    warn!(%err, index, "unit of work failed");
                }
                tokio::time::sleep(interval).await;
            }
        })
    };

    let interrupted = tokio::select! {
        result = &mut workload => {
            if let Err(err) = result {
                error!(%err, "workload task failed");
            }
            info!(iterations, "workload complete");
            false
        }
        () = shutdown_signal() => true,
    };

    if interrupted {
        info!("shutdown signal received, stopping workload");
        workload.abort();
        // Wait for the abort so no late call reopens the log.
        let _ = workload.await;
    }

    runner.shutdown().await?;
    info!(path = %runner.log_path(&args.test, run_index).display(), "bench-monitor shut down");
    Ok(())
}

/// Burn some CPU and allocate so the log has something to show.
fn unit_of_work(index: u32) -> u64 {
    let size = 64 * 1024 * (1 + u64::from(index % 8));
    let buffer: Vec<u64> = (0..size).collect();
    black_box(buffer.iter().fold(0_u64, |acc, v| acc.wrapping_mul(31).wrapping_add(*v)))
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, monitored run stops on ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c handler failed, monitored run cannot be interrupted");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter).with_target(false);

    let installed = match log_format {
        LogFormat::Text => subscriber.try_init(),
        LogFormat::Json => subscriber.json().try_init(),
    };
    installed
        .map_err(|err| AppError::Config(format!("failed to install monitor diagnostics: {err}")))
}

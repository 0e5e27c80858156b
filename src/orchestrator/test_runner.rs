//! Session gatekeeper for benchmark test runs.
//!
//! The hosting layer calls [`TestRunner::log_test_run`] once per unit of
//! work. A burst of calls collapses into a single monitoring session: the
//! first call starts it, every call keeps it alive. Once the session has
//! gone idle, the next call starts a fresh one.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{error, info, info_span, Instrument};

use crate::config::MonitorConfig;
use crate::models::session::SessionInfo;
use crate::monitor::ProcessMonitor;
use crate::{AppError, Result};

/// Routes test runs to a single active monitoring session.
///
/// Construct one per host and share it (e.g. behind an `Arc`).
pub struct TestRunner {
    config: MonitorConfig,
    monitor: ProcessMonitor,
    gate: tokio::sync::Mutex<()>,
    closed: AtomicBool,
}

impl TestRunner {
    /// Runner sampling the current process.
    #[must_use]
    pub fn new(config: MonitorConfig) -> Self {
        Self::with_monitor(config, ProcessMonitor::new())
    }

    /// Runner driving a preconfigured monitor.
    #[must_use]
    pub fn with_monitor(config: MonitorConfig, monitor: ProcessMonitor) -> Self {
        Self {
            config,
            monitor,
            gate: tokio::sync::Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    /// Record one unit of work for `test_name`.
    ///
    /// Starts a session when none is active, then signals keep-alive.
    /// An empty name is ignored, as is any call after
    /// [`shutdown`](Self::shutdown). Start failures are logged, never returned:
    /// monitoring must not disturb the work it observes.
    ///
    /// When two different names race, whichever takes the gate first owns
    /// the session; the other only keeps it alive.
    pub async fn log_test_run(&self, test_name: &str, index: u32) {
        if test_name.is_empty() {
            return;
        }

        if self.monitor.is_idle() {
            let _gate = self.gate.lock().await;
            if self.monitor.is_idle() && !self.closed.load(Ordering::SeqCst) {
                let span = info_span!("begin_session", test_name, index);
                if let Err(err) = self.begin_session(test_name, index).instrument(span).await {
                    error!(test_name, index, %err, "failed to start monitoring session");
                }
            }
        }

        self.monitor.keep_alive();
    }

    async fn begin_session(&self, test_name: &str, index: u32) -> Result<SessionInfo> {
        info!("starting benchmark test monitoring");

        // `start` disposes whatever is left of the previous session.
        let path = self.log_path(test_name, index);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                AppError::Io(format!(
                    "failed to create results directory {}: {err}",
                    parent.display()
                ))
            })?;
        }

        self.monitor
            .start(&path, self.config.period(), self.config.max_idle())
            .await
    }

    /// Log file for a run: `<results_root>/<test_name>_<index>.csv`.
    ///
    /// Characters other than ASCII alphanumerics, `.`, `-` and `_` are
    /// replaced with `_` so the file always lands inside the results root.
    #[must_use]
    pub fn log_path(&self, test_name: &str, index: u32) -> PathBuf {
        let stem: String = test_name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.config.results_root.join(format!("{stem}_{index}.csv"))
    }

    /// Stop the current session and wait for its log to close. Later calls
    /// to [`log_test_run`](Self::log_test_run) no longer start sessions.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Monitor` if the sampling task panicked.
    pub async fn shutdown(&self) -> Result<()> {
        let _gate = self.gate.lock().await;
        self.closed.store(true, Ordering::SeqCst);
        self.monitor.stop(true).await?;
        info!("test runner shut down");
        Ok(())
    }

    /// True when no monitoring session is writing.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.monitor.is_idle()
    }

    /// The underlying monitor.
    #[must_use]
    pub fn monitor(&self) -> &ProcessMonitor {
        &self.monitor
    }

    /// Effective configuration.
    #[must_use]
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }
}

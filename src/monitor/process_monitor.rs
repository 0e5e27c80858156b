//! Periodic process sampler writing one log file per session.
//!
//! [`ProcessMonitor::start`] opens the log, writes the header block and
//! spawns a [`RecurringJob`] that appends one row per period. The session
//! ends on [`stop`](ProcessMonitor::stop), on a restart, on drop, or by
//! itself once [`keep_alive`](ProcessMonitor::keep_alive) has not been
//! called for the idle timeout.
//!
//! `start` and `stop` serialize through one async mutex. `keep_alive` and
//! `is_idle` only touch atomics and never wait on the sampling loop.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::probe::{Probe, ProcessProbe};
use super::recurring::{IdleDeadline, RecurringJob, Tick};
use crate::models::sample::SampleRow;
use crate::models::session::SessionInfo;
use crate::{AppError, Result};

const NEVER: u64 = u64::MAX;

/// Builds a fresh [`Probe`] for each session.
pub type ProbeFactory = Arc<dyn Fn() -> Box<dyn Probe> + Send + Sync>;

/// State shared between the public handle and the sampling task.
struct Shared {
    writing: AtomicBool,
    deadline: Arc<IdleDeadline>,
    period_ms: AtomicU64,
    max_idle_ms: AtomicU64,
    last_keep_alive_ms: AtomicU64,
}

struct ActiveSession {
    info: SessionInfo,
    job: RecurringJob,
}

/// Owns the log file of one session and appends a row per tick.
struct SessionWriter {
    session_id: String,
    out: Option<BufWriter<File>>,
    probe: Box<dyn Probe>,
    started: Instant,
    baseline_cpu_ms: u64,
    rows: u64,
    shared: Arc<Shared>,
}

impl Tick for SessionWriter {
    fn tick(&mut self) -> Result<()> {
        let Some(out) = self.out.as_mut() else {
            return Ok(());
        };
        let reading = self.probe.read()?;
        let row = SampleRow {
            elapsed_ms: u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX),
            cpu_time_ms: reading.cpu_time_ms.saturating_sub(self.baseline_cpu_ms),
            private_bytes: reading.private_bytes,
            working_set_bytes: reading.working_set_bytes,
            allocated_bytes: reading.allocated_bytes,
            collections: reading.collections,
            pool_busy: reading.pool_busy,
        };
        out.write_all(row.to_line().as_bytes())
            .and_then(|()| out.flush())
            .map_err(|err| AppError::Io(format!("failed to write sample row: {err}")))?;
        self.rows += 1;
        Ok(())
    }

    fn finish(&mut self) {
        if let Some(mut out) = self.out.take() {
            if let Err(err) = out.flush() {
                warn!(session_id = %self.session_id, %err, "failed to flush session log");
            }
        }
        // Cleared only after the file handle is dropped.
        self.shared.writing.store(false, Ordering::SeqCst);
        self.shared.last_keep_alive_ms.store(NEVER, Ordering::SeqCst);
        info!(session_id = %self.session_id, rows = self.rows, "monitoring session closed");
    }
}

/// Samples the current process into a delimited log, one session at a time.
pub struct ProcessMonitor {
    lifecycle: Mutex<Option<ActiveSession>>,
    shared: Arc<Shared>,
    probe_factory: ProbeFactory,
}

impl Default for ProcessMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessMonitor {
    /// Monitor sampling the current process with [`ProcessProbe`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_probe(Arc::new(|| Box::new(ProcessProbe::new()) as Box<dyn Probe>))
    }

    /// Monitor using a custom metric source.
    #[must_use]
    pub fn with_probe(probe_factory: ProbeFactory) -> Self {
        Self {
            lifecycle: Mutex::new(None),
            shared: Arc::new(Shared {
                writing: AtomicBool::new(false),
                deadline: Arc::new(IdleDeadline::new()),
                period_ms: AtomicU64::new(0),
                max_idle_ms: AtomicU64::new(0),
                last_keep_alive_ms: AtomicU64::new(NEVER),
            }),
            probe_factory,
        }
    }

    /// Start a new session logging to `path`.
    ///
    /// Any running session is stopped and awaited first, so two sampling
    /// loops never run at once. The file is created or truncated and the
    /// header block written before the loop is spawned. The idle deadline is
    /// armed with an initial keep-alive.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the file cannot be created or the header
    /// cannot be written, and `AppError::Monitor` for a zero period.
    pub async fn start(
        &self,
        path: impl AsRef<Path>,
        period: Duration,
        max_idle: Duration,
    ) -> Result<SessionInfo> {
        let path = path.as_ref();
        if period.is_zero() {
            return Err(AppError::Monitor(
                "sampling period must be greater than zero".into(),
            ));
        }

        let mut guard = self.lifecycle.lock().await;

        if let Some(previous) = guard.take() {
            debug!(session_id = %previous.info.id, "stopping previous session before restart");
            if let Err(err) = previous.job.stop(true).await {
                warn!(%err, "previous session ended abnormally");
            }
        }

        let file = File::create(path).map_err(|err| {
            AppError::Io(format!("failed to create log {}: {err}", path.display()))
        })?;
        let mut out = BufWriter::new(file);
        let mut probe = (self.probe_factory)();

        out.write_all(probe.platform().header_block().as_bytes())
            .and_then(|()| out.flush())
            .map_err(|err| {
                AppError::Io(format!("failed to write header to {}: {err}", path.display()))
            })?;

        let baseline_cpu_ms = match probe.read() {
            Ok(reading) => reading.cpu_time_ms,
            Err(err) => {
                warn!(%err, "baseline reading failed, cpu time reported as absolute");
                0
            }
        };

        let info = SessionInfo::new(path.to_path_buf(), period, max_idle, baseline_cpu_ms);

        let shared = &self.shared;
        shared.period_ms.store(duration_ms(period), Ordering::SeqCst);
        shared.max_idle_ms.store(duration_ms(max_idle), Ordering::SeqCst);
        shared.last_keep_alive_ms.store(NEVER, Ordering::SeqCst);
        shared.deadline.clear();
        shared.writing.store(true, Ordering::SeqCst);

        let worker = SessionWriter {
            session_id: info.id.clone(),
            out: Some(out),
            probe,
            started: Instant::now(),
            baseline_cpu_ms,
            rows: 0,
            shared: Arc::clone(shared),
        };
        let job = RecurringJob::spawn(period, Arc::clone(&shared.deadline), worker);

        info!(
            session_id = %info.id,
            path = %path.display(),
            period_ms = duration_ms(period),
            max_idle_ms = duration_ms(max_idle),
            "monitoring session started"
        );

        *guard = Some(ActiveSession {
            info: info.clone(),
            job,
        });
        drop(guard);

        self.keep_alive();
        Ok(info)
    }

    /// Stop the current session.
    ///
    /// With `wait`, returns only after the loop has exited and the log is
    /// flushed and closed. Without it, cancellation is requested and the
    /// next `start` awaits the old loop. A no-op when nothing is running.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Monitor` if the sampling task panicked.
    pub async fn stop(&self, wait: bool) -> Result<()> {
        let mut guard = self.lifecycle.lock().await;
        if wait {
            if let Some(active) = guard.take() {
                debug!(session_id = %active.info.id, "stopping session");
                active.job.stop(true).await?;
            }
        } else if let Some(active) = guard.as_ref() {
            debug!(session_id = %active.info.id, "cancelling session");
            active.job.cancel();
        }
        Ok(())
    }

    /// Push the idle deadline to now + idle timeout.
    ///
    /// Debounced: ignored unless more than one period has passed since the
    /// last accepted keep-alive. Ignored when idle.
    pub fn keep_alive(&self) {
        let shared = &self.shared;
        if !shared.writing.load(Ordering::SeqCst) {
            return;
        }

        let now = shared.deadline.now_ms();
        let last = shared.last_keep_alive_ms.load(Ordering::SeqCst);
        let period_ms = shared.period_ms.load(Ordering::SeqCst);
        if last != NEVER && now.saturating_sub(last) <= period_ms {
            return;
        }
        if shared
            .last_keep_alive_ms
            .compare_exchange(last, now, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // A concurrent caller already extended it.
            return;
        }

        let max_idle = Duration::from_millis(shared.max_idle_ms.load(Ordering::SeqCst));
        shared.deadline.cancel_after(max_idle);
        debug!(max_idle_ms = duration_ms(max_idle), "idle deadline extended");
    }

    /// True when no session is writing a log.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        !self.shared.writing.load(Ordering::SeqCst)
    }

    /// Descriptor of the session currently writing, if any.
    pub async fn current_session(&self) -> Option<SessionInfo> {
        let guard = self.lifecycle.lock().await;
        guard
            .as_ref()
            .filter(|_| !self.is_idle())
            .map(|active| active.info.clone())
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

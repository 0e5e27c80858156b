//! Fixed-cadence background job with immediate and deadline cancellation.
//!
//! A [`RecurringJob`] drives a [`Tick`] worker on its own tokio task: tick,
//! sleep for the period, repeat. The job stops when its cancellation token
//! fires ([`cancel`](RecurringJob::cancel)) or when the shared
//! [`IdleDeadline`] passes. Either way the worker's
//! [`finish`](Tick::finish) runs exactly once, from a drop guard, so it also
//! fires on task abort and panic unwinding.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::{AppError, Result};

const NEVER: u64 = u64::MAX;

/// Unit of work executed by a [`RecurringJob`].
pub trait Tick: Send + 'static {
    /// Run one iteration. An error skips this tick only.
    ///
    /// # Errors
    ///
    /// Implementations report transient failures; the job logs them and
    /// continues on the next period.
    fn tick(&mut self) -> Result<()>;

    /// Release resources. Called exactly once when the job exits.
    fn finish(&mut self);
}

/// Absolute cancellation deadline shared between a job and its callers.
///
/// Stored as milliseconds since a fixed epoch so it can be read and written
/// without locking. The most recent [`cancel_after`](Self::cancel_after)
/// wins, whether it moves the deadline later or earlier.
#[derive(Debug)]
pub struct IdleDeadline {
    epoch: Instant,
    at_ms: AtomicU64,
    changed: Notify,
}

impl Default for IdleDeadline {
    fn default() -> Self {
        Self::new()
    }
}

impl IdleDeadline {
    /// A deadline that never fires until armed.
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            at_ms: AtomicU64::new(NEVER),
            changed: Notify::new(),
        }
    }

    /// Milliseconds elapsed since this deadline's epoch.
    #[must_use]
    pub fn now_ms(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(NEVER - 1)
    }

    /// Fire `delay` from now, replacing any pending deadline.
    pub fn cancel_after(&self, delay: Duration) {
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(NEVER - 1);
        let at = self.now_ms().saturating_add(delay_ms).min(NEVER - 1);
        self.at_ms.store(at, Ordering::SeqCst);
        self.changed.notify_one();
    }

    /// Disarm the deadline.
    pub fn clear(&self) {
        self.at_ms.store(NEVER, Ordering::SeqCst);
        self.changed.notify_one();
    }

    /// The pending deadline, if armed.
    #[must_use]
    pub fn instant(&self) -> Option<Instant> {
        match self.at_ms.load(Ordering::SeqCst) {
            NEVER => None,
            at => Some(self.epoch + Duration::from_millis(at)),
        }
    }

    /// Whether an armed deadline has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        match self.at_ms.load(Ordering::SeqCst) {
            NEVER => false,
            at => self.now_ms() >= at,
        }
    }

    async fn changed(&self) {
        self.changed.notified().await;
    }
}

/// Observable lifecycle of a [`RecurringJob`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Ticking.
    Running,
    /// Cancellation requested or deadline reached; finalizer pending.
    CancelRequested,
    /// Finalizer executed, task exited.
    Stopped,
}

/// Runs [`Tick::finish`] when dropped.
struct FinishGuard<T: Tick>(T);

impl<T: Tick> Drop for FinishGuard<T> {
    fn drop(&mut self) {
        self.0.finish();
    }
}

/// Handle to a spawned fixed-cadence job.
pub struct RecurringJob {
    cancel: CancellationToken,
    join_handle: Option<JoinHandle<()>>,
}

impl Drop for RecurringJob {
    /// Cancel the background task when the handle is dropped.
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl RecurringJob {
    /// Spawn `worker` on a new task ticking every `period`.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn<T: Tick>(period: Duration, deadline: Arc<IdleDeadline>, worker: T) -> Self {
        let cancel = CancellationToken::new();
        // Built before the task so an unpolled, aborted task still finishes.
        let guard = FinishGuard(worker);

        let join_handle = tokio::spawn(
            Self::run(period, deadline, guard, cancel.clone()).instrument(info_span!("recurring_job")),
        );

        Self {
            cancel,
            join_handle: Some(join_handle),
        }
    }

    async fn run<T: Tick>(
        period: Duration,
        deadline: Arc<IdleDeadline>,
        mut guard: FinishGuard<T>,
        cancel: CancellationToken,
    ) {
        loop {
            if cancel.is_cancelled() {
                debug!("recurring job cancelled");
                return;
            }
            if deadline.is_expired() {
                info!("idle deadline reached, stopping");
                cancel.cancel();
                return;
            }

            if let Err(err) = guard.0.tick() {
                warn!(%err, "tick failed, skipping");
            }

            let next_tick = Instant::now() + period;
            loop {
                let wake_at = match deadline.instant() {
                    Some(at) if at < next_tick => at,
                    _ => next_tick,
                };

                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep_until(wake_at.into()) => {
                        if Instant::now() >= next_tick || deadline.is_expired() {
                            break;
                        }
                    }
                    () = deadline.changed() => {}
                }
            }
        }
    }

    /// Request immediate cancellation without waiting.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> JobState {
        let finished = self
            .join_handle
            .as_ref()
            .is_none_or(JoinHandle::is_finished);
        if finished {
            JobState::Stopped
        } else if self.cancel.is_cancelled() {
            JobState::CancelRequested
        } else {
            JobState::Running
        }
    }

    /// Cancel the job; with `wait`, block until the finalizer has run.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Monitor` if the task panicked.
    pub async fn stop(mut self, wait: bool) -> Result<()> {
        self.cancel.cancel();
        if !wait {
            return Ok(());
        }
        if let Some(handle) = self.join_handle.take() {
            handle
                .await
                .map_err(|err| AppError::Monitor(format!("recurring job failed: {err}")))?;
        }
        Ok(())
    }
}

//! Monitoring session descriptor.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Snapshot of one monitoring session bound to a running sampler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionInfo {
    /// Unique identifier, used to correlate diagnostics.
    pub id: String,
    /// Log file receiving the rows.
    pub path: PathBuf,
    /// Interval between samples.
    pub period: Duration,
    /// Keep-alive window before the session stops itself.
    pub max_idle: Duration,
    /// Wall-clock time the session was started.
    pub created_at: DateTime<Utc>,
    /// Process CPU time (ms) read when the session started; rows are
    /// reported relative to it.
    pub baseline_cpu_ms: u64,
}

impl SessionInfo {
    /// Construct a new session descriptor with a generated identifier.
    #[must_use]
    pub fn new(path: PathBuf, period: Duration, max_idle: Duration, baseline_cpu_ms: u64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            path,
            period,
            max_idle,
            created_at: Utc::now(),
            baseline_cpu_ms,
        }
    }
}

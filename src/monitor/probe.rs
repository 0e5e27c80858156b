//! Process metric sources.
//!
//! [`Probe`] is the seam between the sampler and the platform.
//! [`ProcessProbe`] reads the current process through `sysinfo`,
//! `getrusage` and `/proc/self/status`; hosts embedding a collected runtime
//! can supply their own probe to fill the collection columns.

use std::num::NonZeroUsize;

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tokio::runtime::Handle;

use crate::models::sample::PlatformInfo;
use crate::{AppError, Result};

/// Raw, absolute process metrics captured at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reading {
    /// Total CPU time (user + system) consumed by the process, in ms.
    pub cpu_time_ms: u64,
    /// Private memory in bytes.
    pub private_bytes: u64,
    /// Resident set size in bytes.
    pub working_set_bytes: u64,
    /// Heap bytes in use.
    pub allocated_bytes: u64,
    /// Collection counts for generations 0, 1 and 2.
    pub collections: [u64; 3],
    /// Busy worker-pool slots.
    pub pool_busy: u64,
}

/// A source of process metrics.
pub trait Probe: Send + 'static {
    /// Identification lines for the log header.
    fn platform(&self) -> PlatformInfo;

    /// Take one reading.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Monitor` when the platform query fails.
    fn read(&mut self) -> Result<Reading>;
}

/// Probe for the current process.
pub struct ProcessProbe {
    pid: Pid,
    system: System,
    runtime: Option<Handle>,
}

impl Default for ProcessProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessProbe {
    /// Create a probe for this process. Worker-pool utilization is read
    /// from the tokio runtime the probe is created on, if any.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pid: Pid::from_u32(std::process::id()),
            system: System::new(),
            runtime: Handle::try_current().ok(),
        }
    }
}

impl Probe for ProcessProbe {
    fn platform(&self) -> PlatformInfo {
        platform_info()
    }

    fn read(&mut self) -> Result<Reading> {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[self.pid]),
            true,
            ProcessRefreshKind::new().with_memory(),
        );
        let process = self
            .system
            .process(self.pid)
            .ok_or_else(|| AppError::Monitor(format!("process {} not found", self.pid)))?;

        let working_set_bytes = process.memory();
        let (private_bytes, allocated_bytes) = private_and_heap_bytes(process.virtual_memory());

        let pool_busy = self.runtime.as_ref().map_or(0, |handle| {
            u64::try_from(handle.metrics().num_alive_tasks()).unwrap_or(u64::MAX)
        });

        Ok(Reading {
            cpu_time_ms: cpu_time_ms()?,
            private_bytes,
            working_set_bytes,
            allocated_bytes,
            collections: [0; 3],
            pool_busy,
        })
    }
}

/// Operating system, runtime and processor identification for this host.
#[must_use]
pub fn platform_info() -> PlatformInfo {
    PlatformInfo {
        os_version: System::long_os_version().unwrap_or_else(|| std::env::consts::OS.to_owned()),
        runtime_version: format!(
            "{} {} ({}-{})",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            std::env::consts::ARCH,
            std::env::consts::OS,
        ),
        processor_count: std::thread::available_parallelism().map_or(1, NonZeroUsize::get),
    }
}

/// Total user + system CPU time of this process in milliseconds.
///
/// # Errors
///
/// Returns `AppError::Monitor` if `getrusage` fails.
#[cfg(unix)]
pub fn cpu_time_ms() -> Result<u64> {
    use nix::sys::resource::{getrusage, UsageWho};
    use nix::sys::time::TimeValLike;

    let usage = getrusage(UsageWho::RUSAGE_SELF)
        .map_err(|err| AppError::Monitor(format!("getrusage failed: {err}")))?;
    let total = usage.user_time().num_milliseconds() + usage.system_time().num_milliseconds();
    Ok(u64::try_from(total).unwrap_or(0))
}

/// Total CPU time is not available on this target.
///
/// # Errors
///
/// Never fails on this target.
#[cfg(not(unix))]
pub fn cpu_time_ms() -> Result<u64> {
    Ok(0)
}

/// Extract a `kB` field from `/proc/<pid>/status` content, in bytes.
#[must_use]
pub fn status_field_bytes(status: &str, key: &str) -> Option<u64> {
    status.lines().find_map(|line| {
        let rest = line.strip_prefix(key)?.strip_prefix(':')?;
        let kib = rest.split_whitespace().next()?.parse::<u64>().ok()?;
        Some(kib.saturating_mul(1024))
    })
}

/// Private (`VmData`) and heap-in-use (`RssAnon`) bytes on Linux.
#[cfg(target_os = "linux")]
fn private_and_heap_bytes(virtual_bytes: u64) -> (u64, u64) {
    match std::fs::read_to_string("/proc/self/status") {
        Ok(status) => (
            status_field_bytes(&status, "VmData").unwrap_or(virtual_bytes),
            status_field_bytes(&status, "RssAnon").unwrap_or(0),
        ),
        Err(_) => (virtual_bytes, 0),
    }
}

#[cfg(not(target_os = "linux"))]
fn private_and_heap_bytes(virtual_bytes: u64) -> (u64, u64) {
    (virtual_bytes, 0)
}

//! Process resource monitoring.
//!
//! Covers the fixed-cadence job primitive, the platform metric probe and
//! the session-based sampler that ties them to a log file.

pub mod probe;
pub mod process_monitor;
pub mod recurring;

pub use probe::{Probe, ProcessProbe, Reading};
pub use process_monitor::{ProbeFactory, ProcessMonitor};
pub use recurring::{IdleDeadline, JobState, RecurringJob, Tick};

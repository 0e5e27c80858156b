#![forbid(unsafe_code)]

//! Process resource monitor for benchmark runs.

pub mod config;
pub mod errors;
pub mod models;
pub mod monitor;
pub mod orchestrator;

pub use config::MonitorConfig;
pub use errors::{AppError, Result};
pub use monitor::ProcessMonitor;
pub use orchestrator::TestRunner;

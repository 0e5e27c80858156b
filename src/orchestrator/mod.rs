//! Benchmark run orchestration.
//!
//! Gates monitoring session creation for incoming units of work.

pub mod test_runner;

pub use test_runner::TestRunner;

//! Sample rows and the semicolon-delimited log layout.
//!
//! A session log starts with three platform identification lines, two
//! blank lines and the column header, followed by one [`SampleRow`] per
//! tick. [`parse_log`] reads such a file back.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

/// Column names in file order.
pub const COLUMNS: [&str; 9] = [
    "TS (ms)",
    "CPU time (ms)",
    "Private Mem (B)",
    "Working Set (B)",
    "Allocated Mem (B)",
    "Gen0 collections",
    "Gen1 collections",
    "Gen2 collections",
    "ThreadPool threads",
];

/// Field delimiter used by every header and data line.
pub const DELIMITER: char = ';';

const OS_PREFIX: &str = "OS Version: ";
/// Stands where a managed host would print its CLR version: there is no
/// separate runtime, so the line carries the crate version and target.
const RUNTIME_PREFIX: &str = "Runtime Version: ";
const CPU_COUNT_PREFIX: &str = "Processor Count: ";

/// The column header line, without trailing newline.
#[must_use]
pub fn header_line() -> String {
    COLUMNS.join(";")
}

/// Platform identification written at the top of every log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlatformInfo {
    /// Operating system name and version.
    pub os_version: String,
    /// Runtime identification (crate version and target).
    pub runtime_version: String,
    /// Logical processors available to the process.
    pub processor_count: usize,
}

impl PlatformInfo {
    /// Render the full header block: platform lines, two blank lines and
    /// the column header, newline-terminated.
    #[must_use]
    pub fn header_block(&self) -> String {
        let mut out = String::with_capacity(256);
        let _ = writeln!(out, "{OS_PREFIX}{}", self.os_version);
        let _ = writeln!(out, "{RUNTIME_PREFIX}{}", self.runtime_version);
        let _ = writeln!(out, "{CPU_COUNT_PREFIX}{}", self.processor_count);
        out.push_str("\n\n");
        out.push_str(&header_line());
        out.push('\n');
        out
    }
}

/// One timestamped observation of the monitored process.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SampleRow {
    /// Milliseconds since the session started.
    pub elapsed_ms: u64,
    /// CPU time consumed since the session started.
    pub cpu_time_ms: u64,
    /// Private (non-shared) memory in bytes.
    pub private_bytes: u64,
    /// Resident set size in bytes.
    pub working_set_bytes: u64,
    /// Heap bytes currently allocated.
    pub allocated_bytes: u64,
    /// Collection counts for generations 0, 1 and 2.
    pub collections: [u64; 3],
    /// Busy worker-pool slots.
    pub pool_busy: u64,
}

impl SampleRow {
    fn fields(&self) -> [u64; 9] {
        [
            self.elapsed_ms,
            self.cpu_time_ms,
            self.private_bytes,
            self.working_set_bytes,
            self.allocated_bytes,
            self.collections[0],
            self.collections[1],
            self.collections[2],
            self.pool_busy,
        ]
    }

    /// Render the row as a newline-terminated data line.
    #[must_use]
    pub fn to_line(&self) -> String {
        let mut out = String::with_capacity(96);
        for (i, value) in self.fields().iter().enumerate() {
            if i > 0 {
                out.push(DELIMITER);
            }
            let _ = write!(out, "{value}");
        }
        out.push('\n');
        out
    }

    /// Parse a single data line (without newline).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Parse` if the column count is wrong or a field is
    /// not a non-negative integer.
    pub fn parse_line(line: &str) -> Result<Self> {
        let values = line
            .split(DELIMITER)
            .map(|field| {
                field
                    .trim()
                    .parse::<u64>()
                    .map_err(|err| AppError::Parse(format!("bad field {field:?}: {err}")))
            })
            .collect::<Result<Vec<u64>>>()?;

        let [elapsed_ms, cpu_time_ms, private_bytes, working_set_bytes, allocated_bytes, gen0, gen1, gen2, pool_busy] =
            values[..]
        else {
            return Err(AppError::Parse(format!(
                "expected {} columns, found {}",
                COLUMNS.len(),
                values.len()
            )));
        };

        Ok(Self {
            elapsed_ms,
            cpu_time_ms,
            private_bytes,
            working_set_bytes,
            allocated_bytes,
            collections: [gen0, gen1, gen2],
            pool_busy,
        })
    }
}

/// A session log read back from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLog {
    /// Platform lines from the top of the file.
    pub platform: PlatformInfo,
    /// Data rows in file order.
    pub rows: Vec<SampleRow>,
}

fn expect_prefixed<'a>(line: Option<&'a str>, prefix: &str) -> Result<&'a str> {
    line.and_then(|l| l.strip_prefix(prefix))
        .ok_or_else(|| AppError::Parse(format!("missing `{}` line", prefix.trim_end())))
}

/// Parse the full contents of a session log.
///
/// # Errors
///
/// Returns `AppError::Parse` when the platform block, the blank separator,
/// the column header or any data row is malformed.
pub fn parse_log(text: &str) -> Result<ParsedLog> {
    let mut lines = text.split('\n');

    let os_version = expect_prefixed(lines.next(), OS_PREFIX)?.to_owned();
    let runtime_version = expect_prefixed(lines.next(), RUNTIME_PREFIX)?.to_owned();
    let processor_count = expect_prefixed(lines.next(), CPU_COUNT_PREFIX)?
        .parse::<usize>()
        .map_err(|err| AppError::Parse(format!("bad processor count: {err}")))?;

    for _ in 0..2 {
        if lines.next() != Some("") {
            return Err(AppError::Parse(
                "expected two blank lines after platform block".into(),
            ));
        }
    }

    if lines.next() != Some(header_line().as_str()) {
        return Err(AppError::Parse("column header mismatch".into()));
    }

    let rows = lines
        .filter(|line| !line.is_empty())
        .map(SampleRow::parse_line)
        .collect::<Result<Vec<_>>>()?;

    Ok(ParsedLog {
        platform: PlatformInfo {
            os_version,
            runtime_version,
            processor_count,
        },
        rows,
    })
}

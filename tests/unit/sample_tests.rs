//! Log layout: header block, data lines and parsing back.

use bench_monitor::models::sample::{
    header_line, parse_log, PlatformInfo, SampleRow, COLUMNS, DELIMITER,
};
use bench_monitor::AppError;

fn platform() -> PlatformInfo {
    PlatformInfo {
        os_version: "Linux 6.1 Debian 12".into(),
        runtime_version: "bench-monitor 0.1.0 (x86_64-linux)".into(),
        processor_count: 8,
    }
}

fn row(elapsed_ms: u64) -> SampleRow {
    SampleRow {
        elapsed_ms,
        cpu_time_ms: 12,
        private_bytes: 4_096_000,
        working_set_bytes: 2_048_000,
        allocated_bytes: 1_024_000,
        collections: [3, 2, 1],
        pool_busy: 4,
    }
}

#[test]
fn header_line_has_fixed_column_order() {
    assert_eq!(
        header_line(),
        "TS (ms);CPU time (ms);Private Mem (B);Working Set (B);Allocated Mem (B);\
         Gen0 collections;Gen1 collections;Gen2 collections;ThreadPool threads"
    );
    assert_eq!(COLUMNS.len(), 9);
    assert_eq!(DELIMITER, ';');
}

#[test]
fn header_block_layout_is_exact() {
    let block = platform().header_block();

    let expected = format!(
        "OS Version: Linux 6.1 Debian 12\n\
         Runtime Version: bench-monitor 0.1.0 (x86_64-linux)\n\
         Processor Count: 8\n\
         \n\
         \n\
         {}\n",
        header_line()
    );
    assert_eq!(block, expected);
}

#[test]
fn data_line_is_semicolon_delimited_and_newline_terminated() {
    assert_eq!(
        row(1500).to_line(),
        "1500;12;4096000;2048000;1024000;3;2;1;4\n"
    );
}

#[test]
fn parse_line_reads_every_column() {
    let parsed = SampleRow::parse_line("1500;12;4096000;2048000;1024000;3;2;1;4").expect("parses");

    assert_eq!(parsed, row(1500));
}

#[test]
fn parse_line_rejects_wrong_column_count() {
    let err = SampleRow::parse_line("1;2;3").expect_err("too few columns");

    assert!(matches!(err, AppError::Parse(ref msg) if msg.contains("expected 9 columns")));
}

#[test]
fn parse_line_rejects_negative_or_text_fields() {
    assert!(SampleRow::parse_line("1;2;3;4;5;6;7;8;-1").is_err());
    assert!(SampleRow::parse_line("1;2;3;4;five;6;7;8;9").is_err());
}

#[test]
fn parse_log_reads_header_and_rows() {
    let mut text = platform().header_block();
    for ts in [0, 100, 200] {
        text.push_str(&row(ts).to_line());
    }

    let log = parse_log(&text).expect("parses");

    assert_eq!(log.platform, platform());
    assert_eq!(log.rows.len(), 3);
    assert_eq!(
        log.rows.iter().map(|r| r.elapsed_ms).collect::<Vec<_>>(),
        vec![0, 100, 200]
    );
}

#[test]
fn parse_log_accepts_header_without_rows() {
    let log = parse_log(&platform().header_block()).expect("parses");

    assert!(log.rows.is_empty());
}

#[test]
fn parse_log_rejects_missing_blank_lines() {
    let text = format!(
        "OS Version: x\nRuntime Version: y\nProcessor Count: 1\n{}\n",
        header_line()
    );

    let err = parse_log(&text).expect_err("separator missing");

    assert!(matches!(err, AppError::Parse(ref msg) if msg.contains("blank lines")));
}

#[test]
fn parse_log_rejects_wrong_header() {
    let text = "OS Version: x\nRuntime Version: y\nProcessor Count: 1\n\n\nTS;CPU\n";

    let err = parse_log(text).expect_err("bad header");

    assert!(matches!(err, AppError::Parse(ref msg) if msg.contains("header")));
}

#[test]
fn parse_log_rejects_truncated_platform_block() {
    let err = parse_log("OS Version: x\n").expect_err("truncated");

    assert!(matches!(err, AppError::Parse(ref msg) if msg.contains("Runtime Version")));
}

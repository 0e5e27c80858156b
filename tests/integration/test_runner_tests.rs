//! `TestRunner` gatekeeping: one session per burst, deterministic paths.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use bench_monitor::{MonitorConfig, TestRunner};

use super::test_helpers::{read_log, stub_runner, wait_for_idle};

#[tokio::test]
async fn log_path_follows_naming_convention() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (runner, _) = stub_runner(temp.path(), 100, 500);

    assert_eq!(
        runner.log_path("GridPaging", 3),
        temp.path().join("GridPaging_3.csv")
    );
}

#[tokio::test]
async fn log_path_cannot_escape_results_root() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (runner, _) = stub_runner(temp.path(), 100, 500);

    let path = runner.log_path("../../etc/passwd", 1);

    assert_eq!(path.parent(), Some(temp.path()));
    assert_eq!(
        path.file_name().and_then(|n| n.to_str()),
        Some(".._.._etc_passwd_1.csv")
    );
}

#[tokio::test]
async fn empty_test_name_is_ignored() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (runner, stats) = stub_runner(temp.path(), 100, 500);

    runner.log_test_run("", 0).await;

    assert!(runner.is_idle());
    assert_eq!(stats.created.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn first_call_starts_session_and_creates_directories() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path().join("nested").join("results");
    let (runner, _) = stub_runner(&root, 50, 5_000);

    runner.log_test_run("Combo", 7).await;

    assert!(!runner.is_idle());
    let session = runner.monitor().current_session().await.expect("active");
    assert_eq!(session.path, root.join("Combo_7.csv"));
    tokio::time::sleep(Duration::from_millis(120)).await;

    runner.shutdown().await.expect("shutdown");
    assert!(runner.is_idle());
    assert!(!read_log(&root.join("Combo_7.csv")).rows.is_empty());
}

#[tokio::test]
async fn burst_of_calls_creates_single_session() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (runner, stats) = stub_runner(temp.path(), 100, 2_000);
    let runner = Arc::new(runner);

    let calls = (0..32).map(|_| {
        let runner = Arc::clone(&runner);
        tokio::spawn(async move { runner.log_test_run("Burst", 1).await })
    });
    for call in calls.collect::<Vec<_>>() {
        call.await.expect("join");
    }

    assert_eq!(stats.created.load(Ordering::SeqCst), 1, "exactly one sampler");
    let files = std::fs::read_dir(temp.path()).expect("read dir").count();
    assert_eq!(files, 1, "exactly one log file");

    runner.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn concurrent_names_first_one_wins() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (runner, stats) = stub_runner(temp.path(), 100, 2_000);
    let runner = Arc::new(runner);

    let a = {
        let runner = Arc::clone(&runner);
        tokio::spawn(async move { runner.log_test_run("Alpha", 1).await })
    };
    let b = {
        let runner = Arc::clone(&runner);
        tokio::spawn(async move { runner.log_test_run("Beta", 1).await })
    };
    a.await.expect("join a");
    b.await.expect("join b");

    assert_eq!(stats.created.load(Ordering::SeqCst), 1);
    let session = runner.monitor().current_session().await.expect("active");
    let name = session.path.file_name().and_then(|n| n.to_str()).expect("name").to_owned();
    assert!(name == "Alpha_1.csv" || name == "Beta_1.csv", "got {name}");

    runner.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn calls_keep_session_alive() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (runner, stats) = stub_runner(temp.path(), 30, 150);

    for _ in 0..15 {
        runner.log_test_run("Steady", 2).await;
        tokio::time::sleep(Duration::from_millis(40)).await;
    }

    assert!(!runner.is_idle());
    assert_eq!(stats.created.load(Ordering::SeqCst), 1);
    runner.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn idle_session_is_replaced_on_next_call() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (runner, stats) = stub_runner(temp.path(), 20, 80);

    runner.log_test_run("First", 1).await;
    wait_for_idle(runner.monitor(), Duration::from_secs(2)).await;
    let first_rows = read_log(&temp.path().join("First_1.csv")).rows.len();

    runner.log_test_run("Second", 1).await;

    assert!(!runner.is_idle());
    assert_eq!(stats.created.load(Ordering::SeqCst), 2);
    let session = runner.monitor().current_session().await.expect("active");
    assert_eq!(session.path, temp.path().join("Second_1.csv"));
    assert_eq!(
        read_log(&temp.path().join("First_1.csv")).rows.len(),
        first_rows,
        "first log closed"
    );

    runner.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn unwritable_results_root_does_not_fail_caller() {
    let temp = tempfile::tempdir().expect("tempdir");
    let blocker = temp.path().join("not-a-dir");
    std::fs::write(&blocker, b"file").expect("write blocker");
    let (runner, stats) = stub_runner(&blocker, 50, 500);

    runner.log_test_run("Blocked", 1).await;

    assert!(runner.is_idle());
    assert_eq!(stats.created.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn shutdown_without_session_is_noop() {
    let runner = TestRunner::new(MonitorConfig::default());

    runner.shutdown().await.expect("noop");

    assert!(runner.is_idle());
    assert_eq!(runner.config().sampling.period_ms, 500);
}

#[tokio::test]
async fn crashed_session_does_not_block_next_run() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (runner, stats) = stub_runner(temp.path(), 20, 5_000);
    // Read 0 is the baseline, read 2 is the second tick.
    stats.panic_on.store(2, Ordering::SeqCst);

    runner.log_test_run("Crash", 1).await;
    wait_for_idle(runner.monitor(), Duration::from_secs(2)).await;

    runner.log_test_run("Recovered", 1).await;

    assert!(!runner.is_idle(), "next call must start a fresh session");
    assert_eq!(stats.created.load(Ordering::SeqCst), 2);
    let session = runner.monitor().current_session().await.expect("active");
    assert_eq!(session.path, temp.path().join("Recovered_1.csv"));
    assert!(temp.path().join("Recovered_1.csv").exists());

    tokio::time::sleep(Duration::from_millis(60)).await;
    runner.shutdown().await.expect("shutdown");
    assert!(!read_log(&temp.path().join("Recovered_1.csv")).rows.is_empty());
}

#[tokio::test]
async fn calls_after_shutdown_leave_closed_log_untouched() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("Late_1.csv");
    let (runner, stats) = stub_runner(temp.path(), 20, 5_000);

    runner.log_test_run("Late", 1).await;
    tokio::time::sleep(Duration::from_millis(60)).await;
    runner.shutdown().await.expect("shutdown");
    let rows = read_log(&path).rows.len();

    runner.log_test_run("Late", 1).await;

    assert!(runner.is_idle());
    assert_eq!(stats.created.load(Ordering::SeqCst), 1);
    assert_eq!(read_log(&path).rows.len(), rows, "log not reopened or truncated");
}

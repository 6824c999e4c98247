use std::time::Instant;

use javarena::{BatchRequest, Engine, HostOs, Runner};

use super::{fixture_source, leftover_workspaces, test_config};

fn request(source: &str, stdin: &str) -> BatchRequest {
    BatchRequest {
        code: fixture_source(source),
        stdin: stdin.to_string(),
    }
}

#[tokio::test]
async fn test_hello_succeeds() {
    let root = tempfile::tempdir().unwrap();
    let runner = Runner::new(test_config(root.path()));

    let outcome = runner.compile_and_run(request("Hello.java", "")).await;

    assert!(outcome.success, "unexpected failure: {:?}", outcome.error);
    assert_eq!(outcome.output.as_deref(), Some("hi\n"));
    assert_eq!(outcome.os, Some(HostOs::detect()));
    assert_eq!(leftover_workspaces(root.path()), 0);
}

#[tokio::test]
async fn test_stdin_is_supplied_up_front() {
    let root = tempfile::tempdir().unwrap();
    let runner = Runner::new(test_config(root.path()));

    let outcome = runner.compile_and_run(request("Sum.java", "20 22\n")).await;

    assert!(outcome.success, "unexpected failure: {:?}", outcome.error);
    assert_eq!(outcome.output.as_deref(), Some("42\n"));
}

#[tokio::test]
async fn test_compile_error_reports_diagnostics() {
    let root = tempfile::tempdir().unwrap();
    let runner = Runner::new(test_config(root.path()));

    let outcome = runner.compile_and_run(request("Broken.java", "")).await;

    assert!(!outcome.success);
    assert!(outcome.is_compile_error());
    assert!(outcome.error.as_deref().unwrap_or("").contains("';' expected"));
    assert_eq!(leftover_workspaces(root.path()), 0);
}

#[tokio::test]
async fn test_stderr_is_kept_separate() {
    let root = tempfile::tempdir().unwrap();
    let runner = Runner::new(test_config(root.path()));

    let outcome = runner.compile_and_run(request("Stderr.java", "")).await;

    assert!(outcome.success);
    assert_eq!(outcome.output.as_deref(), Some("to stdout\n"));
    assert_eq!(outcome.error.as_deref(), Some("to stderr\n"));
}

#[tokio::test]
async fn test_reading_without_stdin_needs_input() {
    let root = tempfile::tempdir().unwrap();
    let config = test_config(root.path());
    let limit = config.batch_timeout();
    let runner = Runner::new(config);

    let started = Instant::now();
    let outcome = runner.compile_and_run(request("Greeter.java", "")).await;

    assert!(!outcome.success);
    assert_eq!(outcome.needs_input, Some(true));
    assert!(started.elapsed() >= limit);
    assert_eq!(leftover_workspaces(root.path()), 0);
}

#[tokio::test]
async fn test_runaway_program_times_out() {
    let root = tempfile::tempdir().unwrap();
    let runner = Runner::new(test_config(root.path()));

    let outcome = runner.compile_and_run(request("Ticker.java", "")).await;

    assert!(!outcome.success);
    assert_eq!(outcome.needs_input, None);
    assert!(outcome.error.as_deref().unwrap_or("").contains("timeout"));
    assert_eq!(leftover_workspaces(root.path()), 0);
}

#[tokio::test]
async fn test_engine_and_runner_agree() {
    let root = tempfile::tempdir().unwrap();
    let engine = Engine::new(test_config(root.path()));

    let outcome = engine.compile_and_run(request("Hello.java", "")).await;

    assert!(outcome.success);
    assert_eq!(outcome.output.as_deref(), Some("hi\n"));
    assert_eq!(engine.session_count().await, 0);
}

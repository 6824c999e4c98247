use std::time::Duration;

use javarena::{Engine, ServerEvent};

use super::{fixture_source, leftover_workspaces, open, test_config, until_end, until_output};

#[tokio::test]
async fn test_hello_streams_and_exits_naturally() {
    let root = tempfile::tempdir().unwrap();
    let engine = Engine::new(test_config(root.path()));
    let (conn, mut events) = open(&engine).await;

    conn.run(&fixture_source("Hello.java")).await;
    let transcript = until_end(&mut events).await;

    let compiling = transcript.output.find("Compiling...").expect("compiling notice");
    let compiled = transcript
        .output
        .find("✓ Compiled successfully")
        .expect("success notice");
    let hi = transcript.output.find("hi\r\n").expect("program output");
    assert!(compiling < compiled && compiled < hi);
    assert_eq!(transcript.exit(), (0, "natural".to_string()));

    assert_eq!(engine.session_count().await, 0);
    assert_eq!(leftover_workspaces(root.path()), 0);
}

#[tokio::test]
async fn test_syntax_error_never_starts_a_program() {
    let root = tempfile::tempdir().unwrap();
    let engine = Engine::new(test_config(root.path()));
    let (conn, mut events) = open(&engine).await;

    conn.run(&fixture_source("Broken.java")).await;
    let transcript = until_end(&mut events).await;

    assert!(transcript.output.contains("✗ Compilation Error:"));
    assert!(transcript.output.contains("';' expected"));
    assert!(!transcript.output.contains("Compiled successfully"));
    assert!(!transcript.output.contains("missing semicolon\r\n"));
    assert_eq!(transcript.exit(), (1, "compilation_error".to_string()));

    assert_eq!(engine.session_count().await, 0);
    assert_eq!(leftover_workspaces(root.path()), 0);
}

#[tokio::test]
async fn test_kill_before_any_input() {
    let root = tempfile::tempdir().unwrap();
    let engine = Engine::new(test_config(root.path()));
    let (conn, mut events) = open(&engine).await;

    conn.run(&fixture_source("Greeter.java")).await;
    until_output(&mut events, "Name: ").await;
    conn.kill().await;

    let transcript = until_end(&mut events).await;
    assert_eq!(transcript.exit(), (-1, "killed".to_string()));
    assert_eq!(engine.session_count().await, 0);
    assert_eq!(leftover_workspaces(root.path()), 0);
}

#[tokio::test]
async fn test_prompt_without_newline_arrives_before_input() {
    let root = tempfile::tempdir().unwrap();
    let engine = Engine::new(test_config(root.path()));
    let (conn, mut events) = open(&engine).await;

    conn.run(&fixture_source("Greeter.java")).await;
    let before = until_output(&mut events, "Name: ").await;
    assert!(!before.contains("Hello,"));

    conn.input(b"Ada\n").await;
    let transcript = until_end(&mut events).await;
    assert!(transcript.output.contains("Hello, Ada!\r\n"));
    assert_eq!(transcript.exit(), (0, "natural".to_string()));
}

#[tokio::test]
async fn test_multi_turn_conversation() {
    let root = tempfile::tempdir().unwrap();
    let engine = Engine::new(test_config(root.path()));
    let (conn, mut events) = open(&engine).await;

    conn.run(&fixture_source("Adder.java")).await;
    until_output(&mut events, "Compiled successfully").await;

    conn.input(b"3\n").await;
    until_output(&mut events, "total=3\r\n").await;
    conn.input(b"4\n").await;
    until_output(&mut events, "total=7\r\n").await;
    conn.input(b"done\n").await;

    let transcript = until_end(&mut events).await;
    assert!(transcript.output.contains("bye\r\n"));
    assert_eq!(transcript.exit(), (0, "natural".to_string()));
}

#[tokio::test]
async fn test_second_run_supersedes_first() {
    let root = tempfile::tempdir().unwrap();
    let engine = Engine::new(test_config(root.path()));
    let (conn, mut events) = open(&engine).await;

    conn.run(&fixture_source("Ticker.java")).await;
    until_output(&mut events, "tick 2").await;

    conn.run(&fixture_source("Hello.java")).await;
    let transcript = until_end(&mut events).await;

    // Everything after the new compile notice belongs to the second run
    let (_, after) = transcript
        .output
        .rsplit_once("Compiling...")
        .expect("second compile notice");
    assert!(!after.contains("tick"));
    assert!(after.contains("hi\r\n"));
    assert_eq!(transcript.exit(), (0, "natural".to_string()));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(events.try_recv().is_err());
    assert_eq!(engine.session_count().await, 0);
    assert_eq!(leftover_workspaces(root.path()), 0);
}

#[tokio::test]
async fn test_uncaught_exception_exits_nonzero() {
    let root = tempfile::tempdir().unwrap();
    let engine = Engine::new(test_config(root.path()));
    let (conn, mut events) = open(&engine).await;

    conn.run(&fixture_source("Crash.java")).await;
    let transcript = until_end(&mut events).await;

    assert!(transcript.output.contains("before\r\n"));
    assert!(transcript.output.contains("ArrayIndexOutOfBoundsException"));
    assert_eq!(transcript.exit(), (1, "natural".to_string()));
}

#[tokio::test]
async fn test_stderr_is_merged_and_exit_code_kept() {
    let root = tempfile::tempdir().unwrap();
    let engine = Engine::new(test_config(root.path()));
    let (conn, mut events) = open(&engine).await;

    conn.run(&fixture_source("Stderr.java")).await;
    let transcript = until_end(&mut events).await;

    assert!(transcript.output.contains("to stdout\r\n"));
    assert!(transcript.output.contains("to stderr\r\n"));
    assert_eq!(transcript.exit(), (3, "natural".to_string()));
}

#[tokio::test]
async fn test_unicode_output_is_decoded() {
    let root = tempfile::tempdir().unwrap();
    let engine = Engine::new(test_config(root.path()));
    let (conn, mut events) = open(&engine).await;

    conn.run(&fixture_source("Unicode.java")).await;
    let transcript = until_end(&mut events).await;

    assert!(transcript.output.contains("héllo ✓ 日本\r\n"));
    assert!(!transcript.output.contains('\u{FFFD}'));
}

#[tokio::test]
async fn test_source_without_public_class_uses_fallback_entry() {
    let root = tempfile::tempdir().unwrap();
    let engine = Engine::new(test_config(root.path()));
    let (conn, mut events) = open(&engine).await;

    conn.run(&fixture_source("Anonymous.java")).await;
    let transcript = until_end(&mut events).await;

    assert!(transcript.output.contains("fallback entry\r\n"));
    assert_eq!(transcript.exit(), (0, "natural".to_string()));
}

#[tokio::test]
async fn test_max_duration_stops_runaway_program() {
    let root = tempfile::tempdir().unwrap();
    let mut config = test_config(root.path());
    config.session.max_duration_secs = Some(2);
    let engine = Engine::new(config);
    let (conn, mut events) = open(&engine).await;

    conn.run(&fixture_source("Ticker.java")).await;
    let transcript = until_end(&mut events).await;

    assert!(transcript.output.contains("tick 0"));
    assert_eq!(transcript.exit(), (-1, "timeout".to_string()));
    assert_eq!(leftover_workspaces(root.path()), 0);
}

#[tokio::test]
async fn test_empty_code_is_rejected() {
    let root = tempfile::tempdir().unwrap();
    let engine = Engine::new(test_config(root.path()));
    let (conn, mut events) = open(&engine).await;

    conn.run("").await;
    let transcript = until_end(&mut events).await;
    assert!(matches!(
        transcript.end,
        ServerEvent::Error { ref message } if message == "No code provided"
    ));
}

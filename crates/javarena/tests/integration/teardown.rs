use std::time::Duration;

use javarena::Engine;

use super::{fixture_source, leftover_workspaces, open, test_config, until_end, until_output};

/// Poll until every session is gone and its workspace removed
async fn wait_until_clean(engine: &Engine, root: &std::path::Path) {
    for _ in 0..100 {
        if engine.session_count().await == 0 && leftover_workspaces(root) == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!(
        "sessions={} workspaces={} after teardown",
        engine.session_count().await,
        leftover_workspaces(root)
    );
}

#[tokio::test]
async fn test_disconnect_removes_session_and_workspace() {
    let root = tempfile::tempdir().unwrap();
    let engine = Engine::new(test_config(root.path()));
    let (conn, mut events) = open(&engine).await;

    conn.run(&fixture_source("Greeter.java")).await;
    until_output(&mut events, "Name: ").await;
    assert_eq!(engine.session_count().await, 1);
    assert_eq!(leftover_workspaces(root.path()), 1);

    conn.disconnect().await;
    assert_eq!(engine.session_count().await, 0);
    assert_eq!(leftover_workspaces(root.path()), 0);
}

#[tokio::test]
async fn test_dropped_connection_is_cleaned_up() {
    let root = tempfile::tempdir().unwrap();
    let engine = Engine::new(test_config(root.path()));
    let (conn, mut events) = open(&engine).await;

    conn.run(&fixture_source("Ticker.java")).await;
    until_output(&mut events, "tick 0").await;
    drop(conn);

    wait_until_clean(&engine, root.path()).await;
}

#[tokio::test]
async fn test_disconnect_during_compile() {
    let root = tempfile::tempdir().unwrap();
    let engine = Engine::new(test_config(root.path()));
    let (conn, mut events) = open(&engine).await;

    conn.run(&fixture_source("Hello.java")).await;
    until_output(&mut events, "Compiling...").await;
    conn.disconnect().await;

    wait_until_clean(&engine, root.path()).await;
}

#[tokio::test]
async fn test_racing_triggers_end_session_once() {
    let root = tempfile::tempdir().unwrap();
    let engine = Engine::new(test_config(root.path()));
    let (conn, mut events) = open(&engine).await;

    conn.run(&fixture_source("Adder.java")).await;
    until_output(&mut events, "Compiled successfully").await;

    // Closing input lets the program exit on its own while kill races it
    conn.input(b"done\n").await;
    tokio::join!(conn.kill(), conn.kill());

    let transcript = until_end(&mut events).await;
    let (code, reason) = transcript.exit();
    assert!(
        (code, reason.as_str()) == (-1, "killed") || (code, reason.as_str()) == (0, "natural"),
        "unexpected exit ({code}, {reason})"
    );

    // Only one exit event per session
    tokio::time::sleep(Duration::from_millis(500)).await;
    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event, javarena::ServerEvent::Exit { code: c, .. } if c != -1),
            "second natural exit after teardown: {event:?}"
        );
    }
    wait_until_clean(&engine, root.path()).await;
}

#[tokio::test]
async fn test_rapid_reruns_keep_one_session() {
    let root = tempfile::tempdir().unwrap();
    let engine = Engine::new(test_config(root.path()));
    let (conn, mut events) = open(&engine).await;

    for _ in 0..3 {
        conn.run(&fixture_source("Ticker.java")).await;
    }
    conn.run(&fixture_source("Greeter.java")).await;
    until_output(&mut events, "Name: ").await;

    assert_eq!(engine.session_count().await, 1);
    assert_eq!(leftover_workspaces(root.path()), 1);

    conn.kill().await;
    wait_until_clean(&engine, root.path()).await;
}

#[tokio::test]
async fn test_many_connections_then_shutdown() {
    let root = tempfile::tempdir().unwrap();
    let engine = Engine::new(test_config(root.path()));

    let mut connections = Vec::new();
    for _ in 0..4 {
        let (conn, mut events) = open(&engine).await;
        conn.run(&fixture_source("Greeter.java")).await;
        until_output(&mut events, "Name: ").await;
        connections.push((conn, events));
    }
    assert_eq!(engine.session_count().await, 4);
    assert_eq!(engine.health().await.interactive_sessions, 4);

    engine.shutdown().await;
    assert_eq!(engine.session_count().await, 0);
    assert_eq!(leftover_workspaces(root.path()), 0);
}

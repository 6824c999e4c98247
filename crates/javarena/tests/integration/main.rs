//! Integration tests for javarena
//!
//! These tests compile and run real Java programs, so a JDK (`javac` and
//! `java`) must be discoverable on the host.
//! Run with: cargo test -p javarena --features integration-tests

#![cfg(feature = "integration-tests")]

use std::fs;
use std::path::Path;
use std::time::Duration;

use javarena::config::Config;
use javarena::{Connection, ConnectionId, Engine, EventReceiver, ServerEvent};

mod config_loading;
mod interactive_session;
mod one_shot;
mod teardown;

const FIXTURES_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures");

/// Generous bound covering a cold JVM start plus compilation
const EVENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Helper to get fixture file content
pub(crate) fn fixture_source(name: &str) -> String {
    let path = format!("{FIXTURES_PATH}/sources/{name}");
    fs::read_to_string(&path).unwrap_or_else(|e| panic!("Failed to read fixture {path}: {e}"))
}

/// Default configuration with workspaces created under `root`
pub(crate) fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.workspace.root = Some(root.to_path_buf());
    config.session.grace_period_secs = 3;
    config.batch.timeout_secs = 5;
    config
}

/// Number of workspace directories still present under `root`
pub(crate) fn leftover_workspaces(root: &Path) -> usize {
    fs::read_dir(root)
        .map(|entries| entries.count())
        .unwrap_or(0)
}

/// Everything a connection received for one run
pub(crate) struct Transcript {
    pub output: String,
    pub end: ServerEvent,
}

impl Transcript {
    pub fn exit(&self) -> (i32, String) {
        match &self.end {
            ServerEvent::Exit { code, reason } => (*code, reason.to_string()),
            other => panic!("expected terminal:exit, got {other:?}"),
        }
    }
}

/// Open a connection and consume its `connected` greeting
pub(crate) async fn open(engine: &Engine) -> (Connection, EventReceiver) {
    let (conn, mut events) = engine.connect(ConnectionId::random()).await;
    match events.recv().await {
        Some(ServerEvent::Connected { sid }) => assert_eq!(sid, conn.id().as_str()),
        other => panic!("expected connected, got {other:?}"),
    }
    (conn, events)
}

pub(crate) async fn next_event(events: &mut EventReceiver) -> ServerEvent {
    tokio::time::timeout(EVENT_TIMEOUT, events.recv())
        .await
        .expect("Timed out waiting for an event")
        .expect("Event channel closed")
}

/// Collect output until an exit or error event arrives
pub(crate) async fn until_end(events: &mut EventReceiver) -> Transcript {
    let mut output = String::new();
    loop {
        match next_event(events).await {
            ServerEvent::Output { data } => output.push_str(&data),
            end @ (ServerEvent::Exit { .. } | ServerEvent::Error { .. }) => {
                return Transcript { output, end };
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}

/// Collect output until it contains `needle`
pub(crate) async fn until_output(events: &mut EventReceiver, needle: &str) -> String {
    let mut output = String::new();
    while !output.contains(needle) {
        match next_event(events).await {
            ServerEvent::Output { data } => output.push_str(&data),
            other => panic!("unexpected event {other:?} while waiting for {needle:?}"),
        }
    }
    output
}

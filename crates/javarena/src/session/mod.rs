//! Interactive sessions
//!
//! The [`Engine`] turns one connection into one compile-then-run lifecycle at
//! a time, with live output, input relay and teardown that is safe against
//! every trigger racing every other: natural exit, kill, disconnect and a new
//! run on the same connection.
//!
//! ```no_run
//! # async fn demo() {
//! use javarena::{Config, ConnectionId, Engine};
//!
//! let engine = Engine::new(Config::default());
//! let (conn, mut events) = engine.connect(ConnectionId::random()).await;
//! conn.run("public class Main { public static void main(String[] a) {} }").await;
//! while let Some(event) = events.recv().await {
//!     if event.is_terminal() {
//!         break;
//!     }
//! }
//! conn.disconnect().await;
//! # }
//! ```

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{OwnedMutexGuard, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::advisor::{self, AdviceRequest, ErrorAdvisor, NoAdvisor};
use crate::config::Config;
use crate::protocol::{
    ASKING_ADVISOR_NOTICE, COMPILED_NOTICE, COMPILING_NOTICE, ClientRequest, ServerEvent,
    compile_error_notice,
};
use crate::runner::{
    BatchRequest, CompileError, ProcessError, Runner, SpawnedProcess, Supervisor, compile,
};
use crate::toolchain::{ToolchainError, ToolchainLocator};
use crate::types::{BatchOutcome, EvictReason, ExitReason, HealthReport, HostOs, SessionState};
use crate::workspace::{Workspace, WorkspaceError};

pub use crate::session::registry::SessionId;
pub use crate::session::stream::{StreamError, TerminalDecoder};

mod registry;
mod stream;

use registry::{Registry, SessionControl};
use stream::Streamer;

/// Sender half of a connection's event channel
pub type EventSender = mpsc::Sender<ServerEvent>;
/// Receiver half of a connection's event channel
pub type EventReceiver = mpsc::Receiver<ServerEvent>;

/// Errors that end a run before the program starts
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Toolchain(#[from] ToolchainError),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("session was cancelled")]
    Cancelled,
}

/// Opaque identity of a client connection
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(Arc<str>);

impl ConnectionId {
    /// A fresh random id
    pub fn random() -> Self {
        Self(Uuid::new_v4().simple().to_string().into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        Self(id.into())
    }
}

impl From<String> for ConnectionId {
    fn from(id: String) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a run stands when its pipeline hands back control
enum Prepared {
    Running,
    CompileFailed,
}

struct Inner {
    config: Arc<Config>,
    locator: Arc<ToolchainLocator>,
    supervisor: Supervisor,
    advisor: Arc<dyn ErrorAdvisor>,
    registry: Arc<Registry>,
    runner: Runner,
}

/// The interactive execution engine; cheap to clone
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.inner.config)
            .field("supervisor", &self.inner.supervisor)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Create an engine without an error advisor
    pub fn new(config: Config) -> Self {
        Self::with_advisor(config, Arc::new(NoAdvisor))
    }

    /// Create an engine that asks `advisor` to explain failures
    pub fn with_advisor(config: Config, advisor: Arc<dyn ErrorAdvisor>) -> Self {
        let supervisor = Supervisor::for_host(config.session.read_buffer);
        let locator = Arc::new(ToolchainLocator::new(config.toolchain.clone()));
        let registry = Arc::new(Registry::new(config.grace_period()));
        let config = Arc::new(config);
        let runner = Runner::from_parts(config.clone(), locator.clone(), advisor.clone());

        Self {
            inner: Arc::new(Inner {
                config,
                locator,
                supervisor,
                advisor,
                registry,
                runner,
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Open a connection; its first event is [`ServerEvent::Connected`]
    pub async fn connect(&self, id: ConnectionId) -> (Connection, EventReceiver) {
        let (events, rx) = mpsc::channel(self.inner.config.session.event_buffer.max(1));
        let _ = events
            .send(ServerEvent::Connected {
                sid: id.to_string(),
            })
            .await;
        info!(conn = %id, "client connected");

        let conn = Connection {
            id,
            engine: self.clone(),
            events,
            open: true,
        };
        (conn, rx)
    }

    /// Start a new session for `conn`, superseding any current one.
    ///
    /// Returns once the previous session is fully torn down; compilation and
    /// the program itself proceed in the background and report through
    /// `events`.
    #[instrument(skip(self, events, code), fields(len = code.len()))]
    pub async fn run(&self, conn: &ConnectionId, events: &EventSender, code: &str) {
        let registry = &self.inner.registry;

        if code.trim().is_empty() {
            registry
                .evict_and_teardown(conn, None, EvictReason::Superseded)
                .await;
            let _ = events.send(ServerEvent::error("No code provided")).await;
            return;
        }

        let control = SessionControl::new(events.clone());
        let stage = control.enter_stage().await;
        if let Some(previous) = registry.install(conn, control.clone()).await {
            previous
                .teardown(registry.grace(), EvictReason::Superseded)
                .await;
        }
        debug!(session = %control.id(), "session installed");

        let engine = self.clone();
        let conn = conn.clone();
        let code = code.to_owned();
        tokio::spawn(async move { engine.pipeline(conn, control, stage, code).await });
    }

    /// Forward `data` to the running program of `conn`.
    ///
    /// Never waits on the program: input is dropped when nothing is running
    /// or when the program has stopped reading and its queue is full.
    pub async fn input(&self, conn: &ConnectionId, data: &[u8]) {
        let Some(stdin) = self.inner.registry.stdin(conn).await else {
            debug!(%conn, len = data.len(), "no running process, input dropped");
            return;
        };
        match stdin.write(data) {
            Ok(()) => {}
            Err(ProcessError::StdinFull) => {
                warn!(%conn, len = data.len(), "program is not reading input, input dropped");
            }
            Err(e) => debug!(%conn, error = %e, "input not delivered"),
        }
    }

    /// Tear down the session of `conn` and report it as killed
    #[instrument(skip(self, events))]
    pub async fn kill(&self, conn: &ConnectionId, events: &EventSender) {
        self.inner
            .registry
            .evict_and_teardown(conn, None, EvictReason::Kill)
            .await;
        let _ = events.send(ServerEvent::exit(-1, ExitReason::Killed)).await;
    }

    /// Accepted for protocol completeness; there is no pseudo-terminal to size
    pub fn resize(&self, conn: &ConnectionId, cols: Option<u16>, rows: Option<u16>) {
        debug!(%conn, ?cols, ?rows, "resize ignored");
    }

    /// Tear down the session of `conn` without emitting anything
    #[instrument(skip(self))]
    pub async fn disconnect(&self, conn: &ConnectionId) {
        self.inner
            .registry
            .evict_and_teardown(conn, None, EvictReason::Disconnect)
            .await;
    }

    /// One-shot compile-and-run, independent of interactive sessions
    pub async fn compile_and_run(&self, request: BatchRequest) -> BatchOutcome {
        self.inner.runner.compile_and_run(request).await
    }

    pub async fn health(&self) -> HealthReport {
        HealthReport {
            status: "healthy",
            os: HostOs::detect(),
            toolchain_available: self.inner.locator.locate().await.is_ok(),
            interactive_sessions: self.inner.registry.len().await,
        }
    }

    /// Number of live sessions
    pub async fn session_count(&self) -> usize {
        self.inner.registry.len().await
    }

    /// Tear down every session
    pub async fn shutdown(&self) {
        let sessions = self.inner.registry.drain().await;
        if sessions.is_empty() {
            return;
        }
        info!(count = sessions.len(), "shutting down sessions");

        let grace = self.inner.registry.grace();
        let mut tasks = JoinSet::new();
        for session in sessions {
            tasks.spawn(session.teardown(grace, EvictReason::Disconnect));
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "teardown task failed");
            }
        }
    }

    async fn pipeline(
        self,
        conn: ConnectionId,
        control: Arc<SessionControl>,
        stage: OwnedMutexGuard<()>,
        code: String,
    ) {
        let prepared = self.prepare(&conn, &control, &code).await;
        drop(stage);

        let final_event = match prepared {
            Ok(Prepared::Running) => return,
            Ok(Prepared::CompileFailed) => ServerEvent::exit(1, ExitReason::CompilationError),
            Err(EngineError::Cancelled) => {
                debug!(%conn, session = %control.id(), "run cancelled before start");
                return;
            }
            Err(e) => {
                warn!(%conn, error = %e, "run failed before start");
                ServerEvent::error(e.to_string())
            }
        };

        let registry = &self.inner.registry;
        if let Some(session) = registry.remove(&conn, Some(control.id())).await {
            session
                .teardown(registry.grace(), EvictReason::Aborted)
                .await;
            control.emit_final(final_event).await;
        }
    }

    /// Compile, launch and register the program.
    ///
    /// Runs while holding the session's stage lock; every resource acquired
    /// here is either registered or released before returning.
    #[instrument(skip_all, fields(%conn, session = %control.id()))]
    async fn prepare(
        &self,
        conn: &ConnectionId,
        control: &Arc<SessionControl>,
        code: &str,
    ) -> Result<Prepared, EngineError> {
        let config = &self.inner.config;

        if !control.advance(SessionState::Compiling).await
            || !control.emit(ServerEvent::output(COMPILING_NOTICE)).await
        {
            return Err(EngineError::Cancelled);
        }

        let toolchain = self.inner.locator.locate().await?;
        let workspace = Workspace::provision_async(&config.workspace, code).await?;

        let compiled = tokio::select! {
            result = compile(
                &toolchain,
                &config.compile,
                workspace.path(),
                workspace.source_file(),
                config.compile_timeout(),
            ) => Some(result),
            () = control.cancelled() => None,
        };
        let result = match compiled {
            Some(Ok(result)) => result,
            Some(Err(e)) => {
                workspace.release_async().await;
                return Err(e.into());
            }
            None => {
                workspace.release_async().await;
                return Err(EngineError::Cancelled);
            }
        };

        if !result.success {
            workspace.release_async().await;
            info!(exit_code = result.exit_code, "compilation failed");
            let diagnostics = result.diagnostics();
            if control
                .emit(ServerEvent::output(compile_error_notice(diagnostics)))
                .await
            {
                self.explain_compile_error(control, diagnostics, code).await;
            }
            return Ok(Prepared::CompileFailed);
        }

        if !control.emit(ServerEvent::output(COMPILED_NOTICE)).await {
            workspace.release_async().await;
            return Err(EngineError::Cancelled);
        }

        let spawned =
            self.inner
                .supervisor
                .spawn(&toolchain, &config.run, workspace.path(), workspace.entry());
        let SpawnedProcess { handle, output } = match spawned {
            Ok(spawned) => spawned,
            Err(e) => {
                workspace.release_async().await;
                return Err(e.into());
            }
        };
        let exit = handle.exit_watch();

        let registry = &self.inner.registry;
        if let Err((mut handle, workspace)) =
            registry.attach(conn, control.id(), handle, workspace).await
        {
            handle.terminate(registry.grace()).await;
            workspace.release_async().await;
            return Err(EngineError::Cancelled);
        }
        control.advance(SessionState::Running).await;

        let streamer = Streamer {
            conn: conn.clone(),
            control: control.clone(),
            registry: registry.clone(),
            advisor: self.inner.advisor.clone(),
            advisor_timeout: config.advisor_timeout(),
            max_duration: config.max_session_duration(),
            source: code.to_owned(),
        };
        tokio::spawn(streamer.run(output, exit));

        Ok(Prepared::Running)
    }

    async fn explain_compile_error(&self, control: &SessionControl, diagnostics: &str, code: &str) {
        if !control.emit(ServerEvent::output(ASKING_ADVISOR_NOTICE)).await {
            return;
        }
        let request = AdviceRequest {
            diagnostics: diagnostics.to_owned(),
            source: code.to_owned(),
            is_compile_error: true,
        };
        let timeout = self.inner.config.advisor_timeout();
        let explanation = tokio::select! {
            explanation = advisor::consult(&self.inner.advisor, request, timeout) => explanation,
            () = control.cancelled() => None,
        };
        if let Some(explanation) = explanation {
            control
                .emit(ServerEvent::output(explanation.render()))
                .await;
        }
    }
}

/// One client connection bound to an [`Engine`].
///
/// Dropping an open connection tears down its session in the background;
/// [`Connection::disconnect`] does the same and waits for it.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    engine: Engine,
    events: EventSender,
    open: bool,
}

impl Connection {
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Dispatch one protocol request
    pub async fn handle(&self, request: ClientRequest) {
        match request {
            ClientRequest::Run { code } => self.run(&code).await,
            ClientRequest::Input { data } => self.input(&data.into_bytes()).await,
            ClientRequest::Kill => self.kill().await,
            ClientRequest::Resize { cols, rows } => self.resize(cols, rows),
            ClientRequest::Compile(request) => {
                let engine = self.engine.clone();
                let events = self.events.clone();
                tokio::spawn(async move {
                    let outcome = engine.compile_and_run(request).await;
                    let _ = events.send(ServerEvent::CompileResult(outcome)).await;
                });
            }
            ClientRequest::Health => {
                let report = self.engine.health().await;
                let _ = self.events.send(ServerEvent::Health(report)).await;
            }
        }
    }

    pub async fn run(&self, code: &str) {
        self.engine.run(&self.id, &self.events, code).await;
    }

    pub async fn input(&self, data: &[u8]) {
        self.engine.input(&self.id, data).await;
    }

    pub async fn kill(&self) {
        self.engine.kill(&self.id, &self.events).await;
    }

    pub fn resize(&self, cols: Option<u16>, rows: Option<u16>) {
        self.engine.resize(&self.id, cols, rows);
    }

    pub async fn compile_and_run(&self, request: BatchRequest) -> BatchOutcome {
        self.engine.compile_and_run(request).await
    }

    /// Close the connection, tearing down its session
    pub async fn disconnect(mut self) {
        self.open = false;
        info!(conn = %self.id, "client disconnected");
        self.engine.disconnect(&self.id).await;
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        let engine = self.engine.clone();
        let id = self.id.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { engine.disconnect(&id).await });
            }
            Err(_) => warn!(conn = %self.id, "connection dropped outside a runtime"),
        }
    }
}

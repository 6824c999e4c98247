//! Session registry
//!
//! The single table of what is running for whom. Membership changes happen
//! under one lock; teardown happens after removal, performed by whichever
//! caller removed the entry. Since removal is atomic, exactly one of several
//! racing triggers ever tears a session down.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard, mpsc, watch};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::protocol::ServerEvent;
use crate::runner::{ProcessHandle, StdinSender};
use crate::session::ConnectionId;
use crate::types::{EvictReason, SessionState, TerminationOutcome};
use crate::workspace::Workspace;

/// Unique id of one session generation on a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// State shared between a session's registry entry, its run pipeline and
/// its streamer
#[derive(Debug)]
pub(crate) struct SessionControl {
    id: SessionId,
    state: Mutex<SessionState>,
    /// Held by the run pipeline while it owns resources not yet registered
    stage: Arc<Mutex<()>>,
    cancel: watch::Sender<bool>,
    events: mpsc::Sender<ServerEvent>,
}

impl SessionControl {
    pub(crate) fn new(events: mpsc::Sender<ServerEvent>) -> Arc<Self> {
        let (cancel, _) = watch::channel(false);
        Arc::new(Self {
            id: SessionId::new(),
            state: Mutex::new(SessionState::Idle),
            stage: Arc::new(Mutex::new(())),
            cancel,
            events,
        })
    }

    pub(crate) fn id(&self) -> SessionId {
        self.id
    }

    #[cfg(test)]
    pub(crate) async fn state(&self) -> SessionState {
        *self.state.lock().await
    }

    /// Move to `next` if the session is still live
    pub(crate) async fn advance(&self, next: SessionState) -> bool {
        let mut state = self.state.lock().await;
        if !state.is_live() {
            return false;
        }
        *state = next;
        true
    }

    pub(crate) async fn enter_stage(&self) -> OwnedMutexGuard<()> {
        self.stage.clone().lock_owned().await
    }

    /// Resolves once teardown of this session has begun
    pub(crate) async fn cancelled(&self) {
        let mut rx = self.cancel.subscribe();
        // The sender lives in `self`, so this only returns on cancellation
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Send `event` to the connection while the session is live.
    ///
    /// Returns `false` once teardown has begun; from then on nothing more is
    /// emitted on behalf of this session.
    pub(crate) async fn emit(&self, event: ServerEvent) -> bool {
        // Held until the event is queued so teardown cannot begin mid-send
        let state = self.state.lock().await;
        if !state.is_live() || self.is_cancelled() {
            return false;
        }
        tokio::select! {
            sent = self.events.send(event) => {
                if sent.is_err() {
                    debug!(session = %self.id, "connection event receiver is gone");
                }
                true
            }
            () = self.cancelled() => false,
        }
    }

    /// Send `event` regardless of state; used by whoever owns the teardown
    pub(crate) async fn emit_final(&self, event: ServerEvent) {
        if self.events.send(event).await.is_err() {
            debug!(session = %self.id, "connection event receiver is gone");
        }
    }

    async fn begin_teardown(&self) {
        self.cancel.send_replace(true);
        *self.state.lock().await = SessionState::Terminating;
        // Wait for the run pipeline to let go of anything it still owns
        let _stage = self.stage.lock().await;
    }

    async fn finish_teardown(&self) {
        *self.state.lock().await = SessionState::Terminated;
    }
}

/// Registry entry: the control block plus the resources the session owns
#[derive(Debug)]
pub(crate) struct Session {
    control: Arc<SessionControl>,
    process: Option<ProcessHandle>,
    workspace: Option<Workspace>,
    created_at: DateTime<Utc>,
}

impl Session {
    fn new(control: Arc<SessionControl>) -> Self {
        Self {
            control,
            process: None,
            workspace: None,
            created_at: Utc::now(),
        }
    }

    #[cfg(test)]
    pub(crate) fn control(&self) -> &Arc<SessionControl> {
        &self.control
    }

    /// Close input, terminate, wait, release the workspace.
    ///
    /// Never fails; the caller must have removed the session from the registry.
    #[instrument(skip(self), fields(session = %self.control.id))]
    pub(crate) async fn teardown(mut self, grace: Duration, reason: EvictReason) {
        self.control.begin_teardown().await;

        if let Some(mut process) = self.process.take() {
            match process.terminate(grace).await {
                TerminationOutcome::Uncertain => {
                    warn!(pid = ?process.pid(), "termination uncertain after grace period")
                }
                outcome => debug!(pid = ?process.pid(), ?outcome, "process terminated"),
            }
        }

        if let Some(workspace) = self.workspace.take() {
            workspace.release_async().await;
        }

        self.control.finish_teardown().await;

        let lifetime = Utc::now() - self.created_at;
        info!(
            %reason,
            lifetime_ms = lifetime.num_milliseconds(),
            "session torn down"
        );
    }
}

/// Connection id to live session
#[derive(Debug)]
pub(crate) struct Registry {
    sessions: Mutex<HashMap<ConnectionId, Session>>,
    grace: Duration,
}

impl Registry {
    pub(crate) fn new(grace: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            grace,
        }
    }

    /// Install a fresh session for `conn`, returning the one it displaced.
    ///
    /// The displaced session is no longer reachable and must be torn down by
    /// the caller.
    pub(crate) async fn install(
        &self,
        conn: &ConnectionId,
        control: Arc<SessionControl>,
    ) -> Option<Session> {
        self.sessions
            .lock()
            .await
            .insert(conn.clone(), Session::new(control))
    }

    /// Register the process and workspace of session `id`.
    ///
    /// Both are handed back if that session is no longer the one registered.
    pub(crate) async fn attach(
        &self,
        conn: &ConnectionId,
        id: SessionId,
        process: ProcessHandle,
        workspace: Workspace,
    ) -> Result<(), (ProcessHandle, Workspace)> {
        let mut sessions = self.sessions.lock().await;
        match sessions.get_mut(conn) {
            Some(session) if session.control.id == id && !session.control.is_cancelled() => {
                debug!(%conn, session = %id, pid = ?process.pid(), "process registered");
                session.process = Some(process);
                session.workspace = Some(workspace);
                Ok(())
            }
            _ => Err((process, workspace)),
        }
    }

    /// Remove the session of `conn`, only if it is generation `expected` when given
    pub(crate) async fn remove(
        &self,
        conn: &ConnectionId,
        expected: Option<SessionId>,
    ) -> Option<Session> {
        let mut sessions = self.sessions.lock().await;
        match (sessions.get(conn), expected) {
            (Some(session), Some(id)) if session.control.id != id => None,
            (Some(_), _) => sessions.remove(conn),
            (None, _) => None,
        }
    }

    /// Remove and tear down the session of `conn`.
    ///
    /// Returns whether this call performed the teardown. Racing callers for
    /// the same session observe an empty slot and return `false`.
    #[instrument(skip(self))]
    pub(crate) async fn evict_and_teardown(
        &self,
        conn: &ConnectionId,
        expected: Option<SessionId>,
        reason: EvictReason,
    ) -> bool {
        match self.remove(conn, expected).await {
            Some(session) => {
                session.teardown(self.grace, reason).await;
                true
            }
            None => {
                debug!("no session to evict");
                false
            }
        }
    }

    /// Stdin of the running process of `conn`, if it has not exited
    pub(crate) async fn stdin(&self, conn: &ConnectionId) -> Option<StdinSender> {
        let sessions = self.sessions.lock().await;
        let process = sessions.get(conn)?.process.as_ref()?;
        if process.has_exited() {
            return None;
        }
        process.stdin()
    }

    pub(crate) async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Remove every session; the caller tears them down
    pub(crate) async fn drain(&self) -> Vec<Session> {
        self.sessions
            .lock()
            .await
            .drain()
            .map(|(_, session)| session)
            .collect()
    }

    pub(crate) fn grace(&self) -> Duration {
        self.grace
    }
}

//! Output streaming
//!
//! One task per session drains the merged output of the program, decodes it
//! and forwards it to the connection in production order. When the stream
//! ends the task reports the exit and triggers teardown of its own session.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::advisor::{self, AdviceRequest, ErrorAdvisor};
use crate::protocol::{ASKING_ADVISOR_NOTICE, ServerEvent};
use crate::runner::{ExitWatch, OutputStream};
use crate::session::ConnectionId;
use crate::session::registry::{Registry, SessionControl, SessionId};
use crate::types::{EvictReason, ExitReason};

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("exit status unavailable")]
    NoExitStatus,
}

/// Incremental decoder from raw output bytes to terminal text.
///
/// Carries incomplete UTF-8 sequences over to the next chunk, substitutes
/// invalid sequences with U+FFFD and turns bare `\n` into `\r\n`.
#[derive(Debug, Default)]
pub struct TerminalDecoder {
    pending: Vec<u8>,
    last_was_cr: bool,
}

impl TerminalDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `bytes`, returning whatever text is complete so far
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        let mut text = String::new();
        let mut rest: &[u8] = &self.pending;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    text.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    text.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }
        self.pending = rest.to_vec();

        self.translate(&text)
    }

    /// Flush bytes still pending at end of stream
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            return String::new();
        }
        self.pending.clear();
        self.last_was_cr = false;
        char::REPLACEMENT_CHARACTER.to_string()
    }

    fn translate(&mut self, text: &str) -> String {
        let mut out = String::with_capacity(text.len() + 8);
        for ch in text.chars() {
            if ch == '\n' && !self.last_was_cr {
                out.push('\r');
            }
            out.push(ch);
            self.last_was_cr = ch == '\r';
        }
        out
    }
}

/// How the output loop ended
#[derive(Debug)]
enum Ending {
    Exited(i32),
    Failed(StreamError),
    TimedOut,
    /// Teardown was started by another trigger
    Detached,
}

/// Evicts the session if the streamer stops without doing so itself
struct TeardownGuard {
    registry: Arc<Registry>,
    conn: ConnectionId,
    id: SessionId,
    armed: bool,
}

impl Drop for TeardownGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!(conn = %self.conn, session = %self.id, "streamer stopped unexpectedly");
        let registry = self.registry.clone();
        let conn = self.conn.clone();
        let id = self.id;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                registry
                    .evict_and_teardown(&conn, Some(id), EvictReason::Finished)
                    .await;
            });
        }
    }
}

/// Per-session output task
pub(crate) struct Streamer {
    pub(crate) conn: ConnectionId,
    pub(crate) control: Arc<SessionControl>,
    pub(crate) registry: Arc<Registry>,
    pub(crate) advisor: Arc<dyn ErrorAdvisor>,
    pub(crate) advisor_timeout: Duration,
    pub(crate) max_duration: Option<Duration>,
    pub(crate) source: String,
}

impl Streamer {
    /// Drain `output` until end of stream, report the exit and tear down
    #[instrument(skip_all, fields(conn = %self.conn, session = %self.control.id()))]
    pub(crate) async fn run(self, mut output: OutputStream, mut exit: ExitWatch) {
        let mut guard = TeardownGuard {
            registry: self.registry.clone(),
            conn: self.conn.clone(),
            id: self.control.id(),
            armed: true,
        };

        let mut transcript = String::new();
        let pumped = self.pump(&mut output, &mut exit, &mut transcript);
        let ending = match self.max_duration {
            Some(limit) => tokio::time::timeout(limit, pumped)
                .await
                .unwrap_or(Ending::TimedOut),
            None => pumped.await,
        };
        debug!(?ending, "output stream ended");

        let final_event = match ending {
            Ending::Exited(code) => {
                if code != 0 {
                    self.explain(transcript).await;
                }
                Some(ServerEvent::exit(code, ExitReason::Natural))
            }
            Ending::Failed(e) => {
                warn!(error = %e, "output stream failed");
                Some(ServerEvent::exit(-1, ExitReason::Error(e.to_string())))
            }
            Ending::TimedOut => Some(ServerEvent::exit(-1, ExitReason::Timeout)),
            Ending::Detached => None,
        };

        guard.armed = false;
        let Some(session) = self.registry.remove(&self.conn, Some(self.control.id())).await
        else {
            debug!("session already evicted by another trigger");
            return;
        };
        session
            .teardown(self.registry.grace(), EvictReason::Finished)
            .await;
        if let Some(event) = final_event {
            self.control.emit_final(event).await;
        }
    }

    async fn pump(
        &self,
        output: &mut OutputStream,
        exit: &mut ExitWatch,
        transcript: &mut String,
    ) -> Ending {
        let mut decoder = TerminalDecoder::new();

        // A torn-down session stops reading even if a stray process still
        // holds the pipe open
        loop {
            let chunk = tokio::select! {
                chunk = output.next_chunk() => chunk,
                () = self.control.cancelled() => return Ending::Detached,
            };
            let Some(chunk) = chunk else {
                break;
            };
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(e) => return Ending::Failed(e.into()),
            };
            let text = decoder.push(&bytes);
            if text.is_empty() {
                continue;
            }
            transcript.push_str(&text);
            if !self.control.emit(ServerEvent::output(text)).await {
                return Ending::Detached;
            }
        }

        let tail = decoder.finish();
        if !tail.is_empty() && !self.control.emit(ServerEvent::output(tail)).await {
            return Ending::Detached;
        }

        let code = tokio::select! {
            code = exit.wait() => code,
            () = self.control.cancelled() => return Ending::Detached,
        };
        match code {
            Some(code) => Ending::Exited(code),
            None => Ending::Failed(StreamError::NoExitStatus),
        }
    }

    async fn explain(&self, transcript: String) {
        if !self.control.emit(ServerEvent::output(ASKING_ADVISOR_NOTICE)).await {
            return;
        }
        let request = AdviceRequest {
            diagnostics: transcript,
            source: self.source.clone(),
            is_compile_error: false,
        };
        let explanation = tokio::select! {
            explanation = advisor::consult(&self.advisor, request, self.advisor_timeout) => explanation,
            () = self.control.cancelled() => None,
        };
        if let Some(explanation) = explanation {
            self.control
                .emit(ServerEvent::output(explanation.render()))
                .await;
        }
    }
}

use std::fmt;
use std::process::ExitStatus;

use serde::{Deserialize, Serialize, Serializer};

use crate::advisor::Advice;

/// Lifecycle state of an interactive session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Registered but nothing started yet
    Idle,

    /// Workspace staged, compiler running
    Compiling,

    /// Runtime process spawned and streaming
    Running,

    /// Teardown has begun; no further events are emitted for this session
    Terminating,

    /// Process and workspace released, registry slot empty
    Terminated,
}

impl SessionState {
    /// Whether the session may still emit events to its connection
    #[must_use]
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            SessionState::Idle | SessionState::Compiling | SessionState::Running
        )
    }
}

/// Why a program stopped, as reported in the terminal `exit` event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// The program ran to completion (any exit code)
    Natural,

    /// An explicit kill request ended the session
    Killed,

    /// The compiler rejected the source
    CompilationError,

    /// The configured interactive run ceiling elapsed
    Timeout,

    /// Streaming failed; carries the failure text
    Error(String),
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::Natural => f.write_str("natural"),
            ExitReason::Killed => f.write_str("killed"),
            ExitReason::CompilationError => f.write_str("compilation_error"),
            ExitReason::Timeout => f.write_str("timeout"),
            ExitReason::Error(message) => write!(f, "error:{message}"),
        }
    }
}

impl Serialize for ExitReason {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

/// What caused a session to be evicted from the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictReason {
    /// Client sent an explicit kill
    Kill,

    /// Client connection went away
    Disconnect,

    /// A new run request replaced the session
    Superseded,

    /// The output streamer reached end of stream (or failed)
    Finished,

    /// The run pipeline gave up before a process was started
    Aborted,
}

impl fmt::Display for EvictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EvictReason::Kill => "kill",
            EvictReason::Disconnect => "disconnect",
            EvictReason::Superseded => "superseded",
            EvictReason::Finished => "finished",
            EvictReason::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Result of the two-phase termination sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationOutcome {
    /// The process exited within the grace period after the kill signal
    Exited(i32),

    /// The process had already exited before termination began
    AlreadyExited(i32),

    /// The grace period elapsed without an observed exit
    Uncertain,
}

/// Exit code reported to clients for a finished child.
///
/// A child ended by a signal reports the negated signal number.
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }

    -1
}

/// Host operating system family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostOs {
    Windows,
    MacOs,
    Linux,
    Other,
}

impl HostOs {
    /// Detect the family of the running host
    pub fn detect() -> Self {
        match std::env::consts::OS {
            "windows" => HostOs::Windows,
            "macos" => HostOs::MacOs,
            "linux" => HostOs::Linux,
            _ => HostOs::Other,
        }
    }

    /// Executable suffix used by this family
    pub fn exe_suffix(&self) -> &'static str {
        match self {
            HostOs::Windows => ".exe",
            _ => "",
        }
    }
}

impl fmt::Display for HostOs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HostOs::Windows => "Windows",
            HostOs::MacOs => "Darwin",
            HostOs::Linux => "Linux",
            HostOs::Other => std::env::consts::OS,
        };
        f.write_str(s)
    }
}

impl Serialize for HostOs {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

/// Response of the non-interactive compile-and-run path
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchOutcome {
    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub os: Option<HostOs>,

    /// Set when execution timed out, the source reads input and no stdin was given
    #[serde(skip_serializing_if = "Option::is_none")]
    pub needs_input: Option<bool>,

    /// Free-text explanation of `error`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_review: Option<String>,

    /// Structured explanation of `error`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_review: Option<Advice>,
}

impl BatchOutcome {
    /// A failed outcome carrying only an error message
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Whether the error text looks like compiler diagnostics
    #[must_use]
    pub fn is_compile_error(&self) -> bool {
        !self.success
            && self
                .error
                .as_deref()
                .is_some_and(|e| e.contains("Compilation failed") || e.contains("error:"))
    }
}

/// Snapshot of the engine for health endpoints
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub os: HostOs,
    pub toolchain_available: bool,
    pub interactive_sessions: usize,
}

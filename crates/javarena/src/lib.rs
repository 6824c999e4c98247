//! An interactive compile-and-run engine for Java programs.
//!
//! Javarena turns a client connection into an isolated compile-then-run
//! session: submitted source is compiled by the host's JDK, the program is
//! launched with piped stdin and a merged, unbuffered output stream, and
//! everything it prints is forwarded live while keystrokes flow back in.
//!
//! # Features
//!
//! - **Live sessions**: byte-level output streaming, so prompts without a line break show up immediately.
//! - **Safe teardown**: natural exit, kill, disconnect and a new run may race; exactly one of them cleans up.
//! - **No leaks**: every session owns a private temporary workspace that is removed with its process.
//! - **Toolchain discovery**: `PATH` first, then well-known JDK installation roots per platform.
//! - **One-shot runs**: compile and run with fixed stdin under a time limit, with a "needs input" diagnosis.
//! - **TOML configuration**: with `JAVARENA_*` environment overrides.

pub use advisor::{Advice, AdviceRequest, ErrorAdvisor, Explanation, NoAdvisor};
pub use config::{Config, ConfigError, EXAMPLE_CONFIG};
pub use protocol::{ClientRequest, InputData, ServerEvent};
pub use runner::{BatchRequest, CompileError, CompileResult, ProcessError, Runner};
pub use session::{
    Connection, ConnectionId, Engine, EngineError, EventReceiver, EventSender, StreamError,
};
pub use toolchain::{Toolchain, ToolchainError, ToolchainLocator};
pub use types::{BatchOutcome, ExitReason, HealthReport, HostOs, SessionState};
pub use workspace::{Workspace, WorkspaceError};

pub mod advisor;
pub mod config;
pub mod protocol;
pub mod runner;
pub mod session;
pub mod toolchain;
pub mod types;
pub mod workspace;

#[cfg(all(test, unix))]
mod test_support;

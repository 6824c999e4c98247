//! Code runner for javarena
//!
//! Provides the building blocks shared by interactive sessions and the
//! one-shot compile-and-run path: the compile stage, the process supervisor,
//! and the batch runner itself.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

pub use crate::runner::batch::{BatchRequest, reads_input};
pub use crate::runner::compile::{CompileResult, compile, compile_args};
pub use crate::runner::process::{
    DirectLaunch, ExitWatch, LaunchSpec, LaunchStrategy, OutputStream, ProcessHandle, ShellLaunch,
    SpawnedProcess, StdinSender, Supervisor, host_launch_strategy,
};

mod batch;
mod compile;
mod process;

use crate::{
    advisor::{ErrorAdvisor, NoAdvisor},
    config::Config,
    toolchain::{Toolchain, ToolchainError, ToolchainLocator},
    types::BatchOutcome,
};

/// Errors that occur while running the compiler
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("compilation timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to start compiler: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that occur while launching or feeding a program
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn process: {0}")]
    SpawnFailed(#[source] std::io::Error),

    #[error("failed to create output pipe: {0}")]
    Pipe(#[source] std::io::Error),

    #[error("stdin is closed")]
    StdinClosed,

    #[error("stdin is full, program is not reading input")]
    StdinFull,

    #[error("I/O error: {0}")]
    Io(#[source] std::io::Error),
}

/// High-level runner for the one-shot compile-and-run path
#[derive(Clone)]
pub struct Runner {
    config: Arc<Config>,
    locator: Arc<ToolchainLocator>,
    advisor: Arc<dyn ErrorAdvisor>,
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("config", &self.config)
            .field("locator", &self.locator)
            .finish_non_exhaustive()
    }
}

impl Runner {
    /// Create a new runner with the given configuration
    pub fn new(config: Config) -> Self {
        let locator = Arc::new(ToolchainLocator::new(config.toolchain.clone()));
        Self::from_parts(Arc::new(config), locator, Arc::new(NoAdvisor))
    }

    /// Create a new runner with default configuration
    pub fn with_defaults() -> Self {
        Self::new(Config::default())
    }

    /// Create a runner sharing a locator and advisor with other components
    pub fn from_parts(
        config: Arc<Config>,
        locator: Arc<ToolchainLocator>,
        advisor: Arc<dyn ErrorAdvisor>,
    ) -> Self {
        Self {
            config,
            locator,
            advisor,
        }
    }

    /// Replace the error advisor
    #[must_use]
    pub fn with_advisor(mut self, advisor: Arc<dyn ErrorAdvisor>) -> Self {
        self.advisor = advisor;
        self
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Locate the compiler and runtime
    pub async fn toolchain(&self) -> Result<Toolchain, ToolchainError> {
        self.locator.locate().await
    }

    /// Compile and run `request.code` once, feeding it `request.stdin`.
    ///
    /// Never fails: every problem is reported inside the outcome.
    pub async fn compile_and_run(&self, request: BatchRequest) -> BatchOutcome {
        batch::compile_and_run(&self.config, &self.locator, &self.advisor, request).await
    }
}

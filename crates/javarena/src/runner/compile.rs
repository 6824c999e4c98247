//! Compilation step
//!
//! Runs the compiler as a foreground subprocess inside the workspace and
//! captures its diagnostics.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, instrument};

use crate::config::CompileConfig;
use crate::runner::CompileError;
use crate::toolchain::Toolchain;
use crate::types::exit_code;

/// Result of a compilation
#[derive(Debug, Clone)]
pub struct CompileResult {
    /// Whether the compiler exited with status zero
    pub success: bool,

    /// Compiler exit code
    pub exit_code: i32,

    /// Compiler diagnostics (its standard error)
    pub output: String,
}

impl CompileResult {
    /// Diagnostics, or a generic message when the compiler printed nothing
    pub fn diagnostics(&self) -> &str {
        if self.output.trim().is_empty() {
            "Compilation failed"
        } else {
            &self.output
        }
    }
}

/// Build the compiler argument vector for `source_file`
pub fn compile_args(config: &CompileConfig, source_file: &Path) -> Vec<String> {
    let mut args = config.args.clone();
    args.push(source_file.to_string_lossy().into_owned());
    args
}

/// Compile `source_file` with the workspace as working directory
#[instrument(skip(toolchain, config))]
pub async fn compile(
    toolchain: &Toolchain,
    config: &CompileConfig,
    workspace: &Path,
    source_file: &Path,
    timeout: Duration,
) -> Result<CompileResult, CompileError> {
    let args = compile_args(config, source_file);
    debug!(compiler = %toolchain.compiler.display(), ?args, "running compiler");

    let output = Command::new(&toolchain.compiler)
        .args(&args)
        .current_dir(workspace)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let output = tokio::time::timeout(timeout, output)
        .await
        .map_err(|_| CompileError::Timeout(timeout))?
        .map_err(CompileError::Spawn)?;

    // Diagnostics are the compiler's stderr
    let diagnostics = String::from_utf8_lossy(&output.stderr).into_owned();
    if !output.stdout.is_empty() {
        debug!(len = output.stdout.len(), "ignoring compiler stdout");
    }

    let code = exit_code(output.status);
    let success = output.status.success();

    debug!(success, exit_code = code, "compilation complete");

    Ok(CompileResult {
        success,
        exit_code: code,
        output: diagnostics,
    })
}

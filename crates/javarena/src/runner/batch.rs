//! One-shot compile-and-run
//!
//! Compiles the source, runs it once with the given stdin under a wall-clock
//! limit and reports everything in a [`BatchOutcome`].

use std::process::Stdio;
use std::sync::Arc;

use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use crate::advisor::{self, AdviceRequest, ErrorAdvisor, Explanation};
use crate::config::Config;
use crate::runner::process::kill_tree;
use crate::runner::{CompileError, Supervisor, compile};
use crate::toolchain::{Toolchain, ToolchainLocator};
use crate::types::{BatchOutcome, HostOs};
use crate::workspace::Workspace;

const NEEDS_INPUT_MESSAGE: &str = "This program requires user input (Scanner/System.in detected). \
     Please provide input in the 'Stdin Input' panel below the console before running.";

/// Input of the one-shot path
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BatchRequest {
    pub code: String,

    #[serde(default)]
    pub stdin: String,
}

/// Whether `source` contains any of the input-reading `markers`
pub fn reads_input(source: &str, markers: &[String]) -> bool {
    markers.iter().any(|marker| source.contains(marker.as_str()))
}

#[instrument(skip_all, fields(len = request.code.len(), stdin = request.stdin.len()))]
pub(crate) async fn compile_and_run(
    config: &Config,
    locator: &ToolchainLocator,
    advisor: &Arc<dyn ErrorAdvisor>,
    request: BatchRequest,
) -> BatchOutcome {
    if request.code.trim().is_empty() {
        return BatchOutcome::failure("No code provided");
    }

    let mut outcome = run_once(config, locator, &request).await;

    let error = outcome.error.as_deref().unwrap_or_default();
    if !error.trim().is_empty() {
        let advice = AdviceRequest {
            diagnostics: error.to_owned(),
            source: request.code,
            is_compile_error: outcome.is_compile_error(),
        };
        match advisor::consult(advisor, advice, config.advisor_timeout()).await {
            Some(Explanation::Text(text)) => outcome.ai_review = Some(text),
            Some(Explanation::Structured(advice)) => outcome.error_review = Some(advice),
            None => {}
        }
    }

    outcome
}

async fn run_once(config: &Config, locator: &ToolchainLocator, request: &BatchRequest) -> BatchOutcome {
    let toolchain = match locator.locate().await {
        Ok(toolchain) => toolchain,
        Err(e) => {
            warn!(error = %e, "toolchain unavailable");
            return BatchOutcome::failure(e.to_string());
        }
    };

    let workspace = match Workspace::provision_async(&config.workspace, &request.code).await {
        Ok(workspace) => workspace,
        Err(e) => return BatchOutcome::failure(e.to_string()),
    };

    let outcome = compile_then_execute(config, &toolchain, &workspace, request).await;
    workspace.release_async().await;
    outcome
}

async fn compile_then_execute(
    config: &Config,
    toolchain: &Toolchain,
    workspace: &Workspace,
    request: &BatchRequest,
) -> BatchOutcome {
    let compiled = compile(
        toolchain,
        &config.compile,
        workspace.path(),
        workspace.source_file(),
        config.compile_timeout(),
    )
    .await;

    match compiled {
        Ok(result) if result.success => debug!("compilation successful"),
        Ok(result) => {
            info!(exit_code = result.exit_code, "compilation failed");
            return BatchOutcome::failure(result.diagnostics());
        }
        Err(CompileError::Timeout(limit)) => {
            return BatchOutcome::failure(format!(
                "Compilation timeout ({}s limit)",
                limit.as_secs()
            ));
        }
        Err(e) => return BatchOutcome::failure(e.to_string()),
    }

    let args = Supervisor::runtime_args(&config.run, workspace.path(), workspace.entry());
    let mut command = Command::new(&toolchain.runtime);
    command
        .args(&args)
        .current_dir(workspace.path())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);
    let spawned = command.spawn();
    let mut child = match spawned {
        Ok(child) => child,
        Err(e) => return BatchOutcome::failure(e.to_string()),
    };
    let pid = child.id();

    // Supplied input is written and closed; with none the pipe stays open so a
    // program waiting on input runs into the time limit.
    let held_stdin = match child.stdin.take() {
        Some(mut stdin) if !request.stdin.is_empty() => {
            let input = request.stdin.clone().into_bytes();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(&input).await {
                    debug!(error = %e, "program stopped reading stdin");
                }
            });
            None
        }
        stdin => stdin,
    };

    let limit = config.batch_timeout();
    let waited = tokio::time::timeout(limit, child.wait_with_output()).await;
    drop(held_stdin);

    match waited {
        Ok(Ok(output)) => {
            debug!(status = %output.status, "execution finished");
            BatchOutcome {
                success: true,
                output: Some(String::from_utf8_lossy(&output.stdout).into_owned()),
                error: Some(String::from_utf8_lossy(&output.stderr).into_owned()),
                os: Some(HostOs::detect()),
                ..Default::default()
            }
        }
        Ok(Err(e)) => BatchOutcome::failure(e.to_string()),
        Err(_) => {
            info!(?limit, "execution timed out");
            if let Some(pid) = pid {
                kill_tree(pid).await;
            }
            if reads_input(&request.code, &config.batch.input_markers) && request.stdin.is_empty() {
                BatchOutcome {
                    needs_input: Some(true),
                    ..BatchOutcome::failure(NEEDS_INPUT_MESSAGE)
                }
            } else {
                BatchOutcome::failure(format!("Execution timeout ({}s limit)", limit.as_secs()))
            }
        }
    }
}

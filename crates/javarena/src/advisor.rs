//! Error-explanation collaborator
//!
//! The engine asks an [`ErrorAdvisor`] to explain compiler diagnostics and
//! failing program output. The advisor is optional: a missing or slow answer
//! only means no explanation is shown.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Input handed to the advisor
#[derive(Debug, Clone)]
pub struct AdviceRequest {
    /// Compiler diagnostics or the program's accumulated output
    pub diagnostics: String,

    /// The submitted source text
    pub source: String,

    /// Whether `diagnostics` came from the compiler
    pub is_compile_error: bool,
}

/// Structured explanation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advice {
    pub explanation: String,

    #[serde(default)]
    pub suggestions: Vec<String>,
}

/// Answer from an advisor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Explanation {
    /// Free-text explanation
    Text(String),

    /// Explanation with a list of suggestions
    Structured(Advice),
}

impl Explanation {
    /// Render the explanation as terminal output (CRLF line endings, ANSI styling)
    pub fn render(&self) -> String {
        match self {
            Explanation::Text(text) => format!(
                "\r\n\x1b[33m💡 AI Suggestion:\x1b[0m\r\n{}\r\n",
                terminal_safe(text)
            ),
            Explanation::Structured(advice) => {
                let suggestions = advice
                    .suggestions
                    .iter()
                    .map(|s| format!("• {s}"))
                    .collect::<Vec<_>>()
                    .join("\n");
                format!(
                    "\r\n\x1b[33m💡 Suggestion:\x1b[0m\r\n{}\r\n\r\n{}\r\n",
                    terminal_safe(&advice.explanation),
                    terminal_safe(&suggestions)
                )
            }
        }
    }
}

/// Source of explanations for failed compiles and runs
#[async_trait]
pub trait ErrorAdvisor: Send + Sync {
    /// Explain the failure, or return `None` when no explanation is available
    async fn explain(&self, request: AdviceRequest) -> Option<Explanation>;
}

/// Advisor that never has an explanation
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAdvisor;

#[async_trait]
impl ErrorAdvisor for NoAdvisor {
    async fn explain(&self, _request: AdviceRequest) -> Option<Explanation> {
        None
    }
}

/// Ask the advisor, giving up after `timeout`
pub async fn consult(
    advisor: &Arc<dyn ErrorAdvisor>,
    request: AdviceRequest,
    timeout: Duration,
) -> Option<Explanation> {
    match tokio::time::timeout(timeout, advisor.explain(request)).await {
        Ok(explanation) => {
            debug!(found = explanation.is_some(), "advisor answered");
            explanation
        }
        Err(_) => {
            warn!(?timeout, "advisor timed out");
            None
        }
    }
}

/// Normalise every line ending to CRLF for terminal rendering
pub fn terminal_safe(text: &str) -> String {
    text.replace("\r\n", "\n")
        .replace('\r', "\n")
        .replace('\n', "\r\n")
}

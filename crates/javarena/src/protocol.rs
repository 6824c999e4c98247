//! Wire events of the session protocol
//!
//! Events are JSON objects tagged by an `event` field, exchanged one per
//! line over a connection.

use serde::{Deserialize, Serialize};

use crate::runner::BatchRequest;
use crate::types::{BatchOutcome, ExitReason, HealthReport};

/// Event sent to a client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum ServerEvent {
    /// First event on every connection
    #[serde(rename = "connected")]
    Connected { sid: String },

    /// Terminal text (program output or progress notices)
    #[serde(rename = "terminal:output")]
    Output { data: String },

    /// The session ended
    #[serde(rename = "terminal:exit")]
    Exit { code: i32, reason: ExitReason },

    /// A run request was rejected before a session started
    #[serde(rename = "terminal:error")]
    Error { message: String },

    /// Answer to a one-shot compile request
    #[serde(rename = "compile:result")]
    CompileResult(BatchOutcome),

    #[serde(rename = "health")]
    Health(HealthReport),
}

impl ServerEvent {
    pub fn output(data: impl Into<String>) -> Self {
        ServerEvent::Output { data: data.into() }
    }

    pub fn exit(code: i32, reason: ExitReason) -> Self {
        ServerEvent::Exit { code, reason }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            message: message.into(),
        }
    }

    /// Whether this event ends a session
    pub fn is_terminal(&self) -> bool {
        matches!(self, ServerEvent::Exit { .. } | ServerEvent::Error { .. })
    }
}

/// Keystrokes, either as text or raw bytes
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum InputData {
    Text(String),
    Bytes(Vec<u8>),
}

impl InputData {
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            InputData::Text(text) => text.into_bytes(),
            InputData::Bytes(bytes) => bytes,
        }
    }
}

/// Request received from a client
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event")]
pub enum ClientRequest {
    #[serde(rename = "terminal:run")]
    Run {
        #[serde(default)]
        code: String,
    },

    #[serde(rename = "terminal:input")]
    Input { data: InputData },

    #[serde(rename = "terminal:kill")]
    Kill,

    #[serde(rename = "terminal:resize")]
    Resize {
        #[serde(default)]
        cols: Option<u16>,
        #[serde(default)]
        rows: Option<u16>,
    },

    #[serde(rename = "compile")]
    Compile(BatchRequest),

    #[serde(rename = "health")]
    Health,
}

// Progress notices, styled for a terminal
pub(crate) const COMPILING_NOTICE: &str = "\r\n\x1b[36m⚙  Compiling...\x1b[0m\r\n";
pub(crate) const COMPILED_NOTICE: &str = "\x1b[32m✓ Compiled successfully\x1b[0m\r\n\r\n";
pub(crate) const ASKING_ADVISOR_NOTICE: &str = "\r\n\x1b[35m🤖 Asking AI for help...\x1b[0m\r\n";

pub(crate) fn compile_error_notice(diagnostics: &str) -> String {
    format!(
        "\r\n\x1b[31m✗ Compilation Error:\x1b[0m\r\n{}\r\n",
        crate::advisor::terminal_safe(diagnostics)
    )
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn server_events_are_tagged() {
        let value = serde_json::to_value(ServerEvent::output("hi\r\n")).unwrap();
        assert_eq!(value, json!({"event": "terminal:output", "data": "hi\r\n"}));

        let value = serde_json::to_value(ServerEvent::exit(-1, ExitReason::Killed)).unwrap();
        assert_eq!(
            value,
            json!({"event": "terminal:exit", "code": -1, "reason": "killed"})
        );

        let value = serde_json::to_value(ServerEvent::exit(
            -1,
            ExitReason::Error("Broken pipe".into()),
        ))
        .unwrap();
        assert_eq!(value["reason"], "error:Broken pipe");
    }

    #[test]
    fn compile_result_flattens_outcome() {
        let event = ServerEvent::CompileResult(BatchOutcome {
            needs_input: Some(true),
            ..BatchOutcome::failure("needs input")
        });
        let value = serde_json::to_value(event).unwrap();
        assert_eq!(
            value,
            json!({
                "event": "compile:result",
                "success": false,
                "error": "needs input",
                "needs_input": true,
            })
        );
    }

    #[test]
    fn parse_client_requests() {
        let req: ClientRequest =
            serde_json::from_str(r#"{"event":"terminal:run","code":"class A {}"}"#).unwrap();
        assert!(matches!(req, ClientRequest::Run { code } if code == "class A {}"));

        let req: ClientRequest = serde_json::from_str(r#"{"event":"terminal:kill"}"#).unwrap();
        assert!(matches!(req, ClientRequest::Kill));

        let req: ClientRequest =
            serde_json::from_str(r#"{"event":"terminal:resize","cols":80,"rows":24}"#).unwrap();
        assert!(matches!(
            req,
            ClientRequest::Resize {
                cols: Some(80),
                rows: Some(24)
            }
        ));

        let req: ClientRequest =
            serde_json::from_str(r#"{"event":"compile","code":"x","stdin":"1 2"}"#).unwrap();
        assert!(matches!(req, ClientRequest::Compile(r) if r.stdin == "1 2"));
    }

    #[test]
    fn input_accepts_text_and_bytes() {
        let req: ClientRequest =
            serde_json::from_str(r#"{"event":"terminal:input","data":"5\r"}"#).unwrap();
        let ClientRequest::Input { data } = req else {
            panic!("expected input");
        };
        assert_eq!(data.into_bytes(), b"5\r");

        let req: ClientRequest =
            serde_json::from_str(r#"{"event":"terminal:input","data":[104,105]}"#).unwrap();
        let ClientRequest::Input { data } = req else {
            panic!("expected input");
        };
        assert_eq!(data, InputData::Bytes(b"hi".to_vec()));
    }

    #[test]
    fn unknown_event_is_rejected() {
        assert!(serde_json::from_str::<ClientRequest>(r#"{"event":"share"}"#).is_err());
    }

    #[test]
    fn compile_error_notice_uses_crlf() {
        let notice = compile_error_notice("A.java:1: error: x\n  ^\n");
        assert!(notice.contains("error: x\r\n  ^\r\n"));
        assert!(notice.starts_with("\r\n\x1b[31m✗ Compilation Error:"));
    }
}

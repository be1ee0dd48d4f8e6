//! Wire envelope multiplexed over the connection channel.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Sub-protocol selector for an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    /// Action runner events: `start`, `output`, `exit`, `error`.
    Command,
    /// Terminal I/O: `connect`, `disconnect`, `data`.
    Terminal,
    /// Preview lifecycle: `connect`, `disconnect`, `refresh`.
    Preview,
}

/// One message on the wire: `{ "type": ..., "action": ..., "payload": ... }`.
///
/// Envelopes are immutable once sent. Ordering is guaranteed within a single
/// connection, never across kinds or across peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    pub action: String,
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    /// Create an envelope with an explicit payload.
    #[must_use]
    pub fn new(kind: EnvelopeKind, action: impl Into<String>, payload: Value) -> Self {
        Self {
            kind,
            action: action.into(),
            payload,
        }
    }

    /// `command/start` announcing execution of `command`.
    #[must_use]
    pub fn command_start(command: &str) -> Self {
        Self::new(EnvelopeKind::Command, "start", json!({ "command": command }))
    }

    /// `command/output` carrying one chunk of captured output.
    #[must_use]
    pub fn command_output(chunk: &str) -> Self {
        Self::new(EnvelopeKind::Command, "output", json!({ "data": chunk }))
    }

    /// `command/exit` with the process exit code.
    #[must_use]
    pub fn command_exit(code: i32) -> Self {
        Self::new(EnvelopeKind::Command, "exit", json!({ "code": code }))
    }

    /// `command/error` with human-readable error text.
    #[must_use]
    pub fn command_error(error: &str) -> Self {
        Self::new(EnvelopeKind::Command, "error", json!({ "error": error }))
    }

    /// `terminal/data` tagged with the emitting terminal.
    ///
    /// PTY bytes are not guaranteed to be UTF-8, so the chunk crosses the
    /// wire base64-encoded.
    #[must_use]
    pub fn terminal_data(terminal_id: &str, chunk: &[u8]) -> Self {
        Self::new(
            EnvelopeKind::Terminal,
            "data",
            json!({ "terminalId": terminal_id, "data": BASE64.encode(chunk) }),
        )
    }

    /// `preview/refresh` telling subscribed viewers to reload.
    #[must_use]
    pub fn preview_refresh(port: u16) -> Self {
        Self::new(EnvelopeKind::Preview, "refresh", json!({ "port": port }))
    }

    /// The `terminalId` payload field, if present.
    #[must_use]
    pub fn terminal_id(&self) -> Option<&str> {
        self.payload.get("terminalId").and_then(Value::as_str)
    }

    /// Decoded `data` payload field of a `terminal/data` envelope.
    #[must_use]
    pub fn terminal_chunk(&self) -> Option<Vec<u8>> {
        let data = self.payload.get("data").and_then(Value::as_str)?;
        BASE64.decode(data).ok()
    }

    /// The `port` payload field, if present and in range.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.payload
            .get("port")
            .and_then(Value::as_u64)
            .and_then(|port| u16::try_from(port).ok())
    }

    /// The `command` payload field, if present.
    #[must_use]
    pub fn command(&self) -> Option<&str> {
        self.payload.get("command").and_then(Value::as_str)
    }
}

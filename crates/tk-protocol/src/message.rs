//! Frame types for interactive exec sessions
//!
//! An exec session exchanges two families of frames with the remote peer:
//!
//! - **Outbound** frames ([`OutboundFrame`]) flow from this agent to the
//!   target. Every frame carries the `requestId`/`logId` envelope plus an
//!   `action` tag selecting one of [`OutboundPayload`]'s variants.
//! - **Inbound** frames ([`InboundFrame`]) flow back from the target and carry
//!   a stream kind, a base64 payload, and the `more` flag.
//!
//! # Message Flow
//!
//! 1. Agent sends `exec/start` with the command and its capabilities
//! 2. Agent sends `exec/input` and `exec/resize` while the session runs
//! 3. Target sends `StdOut`/`StdErr` frames with `more: true`
//! 4. Target ends the stream with `more: false` (or, for peers older than
//!    schema 1.1, a `StdOut` frame carrying [`LEGACY_END_SENTINEL`]), or
//!    reports an `Error`
//! 5. Agent sends exactly one `exec/stop`
//!
//! # Schema Version
//!
//! [`EXEC_SCHEMA_VERSION`] travels in the `exec/start` frame so the target
//! knows which end-of-stream convention the agent understands.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Exec schema version announced in the start frame.
///
/// Format: "MAJOR.MINOR". Version 1.1 introduced the `more` flag.
pub const EXEC_SCHEMA_VERSION: &str = "1.1";

/// Payload that older peers put in a `StdOut` frame to mark end of stream.
pub const LEGACY_END_SENTINEL: &[u8] = b"TK_EXEC_STREAM_END";

/// Terminal dimensions
///
/// Deserializes from the `{"Width": w, "Height": h}` records produced by the
/// local resize stream; lowercase field names are accepted as well.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TerminalSize {
    /// Number of columns
    #[serde(alias = "width")]
    pub width: u16,
    /// Number of rows
    #[serde(alias = "height")]
    pub height: u16,
}

impl TerminalSize {
    /// Create a new terminal size
    pub fn new(width: u16, height: u16) -> Self {
        Self { width, height }
    }
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self {
            width: 80,
            height: 24,
        }
    }
}

/// The fixed set of outbound actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundAction {
    Start,
    Input,
    Resize,
    Stop,
}

impl OutboundAction {
    /// Wire name of the action
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "exec/start",
            Self::Input => "exec/input",
            Self::Resize => "exec/resize",
            Self::Stop => "exec/stop",
        }
    }
}

/// Action-specific part of an outbound frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum OutboundPayload {
    /// Begin executing a command on the target
    #[serde(rename = "exec/start", rename_all = "camelCase")]
    Start {
        /// Schema version, see [`EXEC_SCHEMA_VERSION`]
        schema_version: String,
        /// Whether stdin will be forwarded
        is_stdin: bool,
        /// Whether the command runs under a terminal
        is_tty: bool,
        /// Command and arguments
        command: Vec<String>,
        /// Endpoint the exec request originated from
        endpoint: String,
        /// Human-readable command line, for audit logs
        command_being_run: String,
    },

    /// Raw stdin bytes
    #[serde(rename = "exec/input")]
    Input {
        #[serde(with = "crate::encoding::base64_bytes")]
        stdin: Bytes,
    },

    /// Terminal geometry change
    #[serde(rename = "exec/resize")]
    Resize { width: u16, height: u16 },

    /// End the session on the target
    #[serde(rename = "exec/stop")]
    Stop,
}

impl OutboundPayload {
    /// Get the action for this payload
    pub fn action(&self) -> OutboundAction {
        match self {
            Self::Start { .. } => OutboundAction::Start,
            Self::Input { .. } => OutboundAction::Input,
            Self::Resize { .. } => OutboundAction::Resize,
            Self::Stop => OutboundAction::Stop,
        }
    }
}

/// A frame sent to the remote peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundFrame {
    /// Request this frame belongs to
    pub request_id: String,
    /// Log correlation id
    pub log_id: String,
    /// Action and its fields
    #[serde(flatten)]
    pub payload: OutboundPayload,
}

impl OutboundFrame {
    /// Create a new outbound frame
    pub fn new(
        request_id: impl Into<String>,
        log_id: impl Into<String>,
        payload: OutboundPayload,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            log_id: log_id.into(),
            payload,
        }
    }

    /// Get the action of this frame
    pub fn action(&self) -> OutboundAction {
        self.payload.action()
    }

    /// Encode as a JSON object
    pub fn to_json(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode from a JSON object
    pub fn from_json(data: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Stream kind of an inbound frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamKind {
    StdOut,
    StdErr,
    Error,
    /// Any kind this agent does not understand
    #[serde(other)]
    Unknown,
}

fn more_default() -> bool {
    true
}

/// A frame received from the remote peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundFrame {
    /// Stream the content belongs to
    #[serde(rename = "type")]
    pub kind: StreamKind,
    /// Payload bytes (base64 on the wire)
    #[serde(with = "crate::encoding::base64_bytes", default)]
    pub content: Bytes,
    /// `false` marks the last frame of the session. Absent on older peers.
    #[serde(default = "more_default")]
    pub more: bool,
}

impl InboundFrame {
    /// Stdout data
    pub fn stdout(content: impl Into<Bytes>, more: bool) -> Self {
        Self {
            kind: StreamKind::StdOut,
            content: content.into(),
            more,
        }
    }

    /// Stderr data
    pub fn stderr(content: impl Into<Bytes>, more: bool) -> Self {
        Self {
            kind: StreamKind::StdErr,
            content: content.into(),
            more,
        }
    }

    /// Remote error report
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: StreamKind::Error,
            content: Bytes::from(message.into()),
            more: false,
        }
    }

    /// Empty end-of-stream marker
    pub fn end() -> Self {
        Self::stdout(Bytes::new(), false)
    }

    /// The end marker used by peers that predate the `more` flag
    pub fn legacy_end() -> Self {
        Self::stdout(Bytes::from_static(LEGACY_END_SENTINEL), true)
    }

    /// Whether this is a `StdOut` frame carrying exactly the legacy sentinel
    pub fn is_legacy_end_marker(&self) -> bool {
        self.kind == StreamKind::StdOut && self.content.as_ref() == LEGACY_END_SENTINEL
    }

    /// Error message carried by an `Error` frame
    pub fn error_message(&self) -> String {
        String::from_utf8_lossy(&self.content).into_owned()
    }

    /// Encode as a JSON object
    pub fn to_json(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode from a JSON object
    pub fn from_json(data: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn to_value(frame: &OutboundFrame) -> Value {
        serde_json::from_slice(&frame.to_json().unwrap()).unwrap()
    }

    #[test]
    fn test_start_frame_fields() {
        let frame = OutboundFrame::new(
            "req-1",
            "log-1",
            OutboundPayload::Start {
                schema_version: EXEC_SCHEMA_VERSION.to_string(),
                is_stdin: true,
                is_tty: false,
                command: vec!["ls".to_string(), "-la".to_string()],
                endpoint: "/api/v1/namespaces/default/pods/web/exec".to_string(),
                command_being_run: "ls -la".to_string(),
            },
        );

        assert_eq!(
            to_value(&frame),
            json!({
                "requestId": "req-1",
                "logId": "log-1",
                "action": "exec/start",
                "schemaVersion": "1.1",
                "isStdin": true,
                "isTty": false,
                "command": ["ls", "-la"],
                "endpoint": "/api/v1/namespaces/default/pods/web/exec",
                "commandBeingRun": "ls -la",
            })
        );
    }

    #[test]
    fn test_input_frame_is_base64() {
        let frame = OutboundFrame::new(
            "req-1",
            "log-1",
            OutboundPayload::Input {
                stdin: Bytes::from_static(b"echo hi\n"),
            },
        );
        let value = to_value(&frame);
        assert_eq!(value["action"], "exec/input");
        assert_eq!(value["stdin"], "ZWNobyBoaQo=");
    }

    #[test]
    fn test_stop_frame_has_only_envelope() {
        let frame = OutboundFrame::new("req-1", "log-1", OutboundPayload::Stop);
        assert_eq!(
            to_value(&frame),
            json!({"requestId": "req-1", "logId": "log-1", "action": "exec/stop"})
        );

        let decoded = OutboundFrame::from_json(&frame.to_json().unwrap()).unwrap();
        assert_eq!(decoded.action(), OutboundAction::Stop);
    }

    #[test]
    fn test_resize_frame_decodes() {
        let raw = br#"{"requestId":"r","logId":"l","action":"exec/resize","width":120,"height":40}"#;
        let frame = OutboundFrame::from_json(raw).unwrap();
        assert_eq!(
            frame.payload,
            OutboundPayload::Resize {
                width: 120,
                height: 40
            }
        );
    }

    #[test]
    fn test_inbound_more_defaults_to_true() {
        let frame = InboundFrame::from_json(br#"{"type":"StdOut","content":"aGk="}"#).unwrap();
        assert_eq!(frame.kind, StreamKind::StdOut);
        assert_eq!(frame.content.as_ref(), b"hi");
        assert!(frame.more);
    }

    #[test]
    fn test_inbound_bad_base64_is_json_error() {
        let result = InboundFrame::from_json(br#"{"type":"StdOut","content":"not base64!"}"#);
        assert!(matches!(result, Err(ProtocolError::Json(_))));
    }

    #[test]
    fn test_inbound_unknown_kind() {
        let frame =
            InboundFrame::from_json(br#"{"type":"Telemetry","content":"","more":true}"#).unwrap();
        assert_eq!(frame.kind, StreamKind::Unknown);
    }

    #[test]
    fn test_legacy_marker_only_on_stdout() {
        assert!(InboundFrame::legacy_end().is_legacy_end_marker());
        assert!(!InboundFrame::stderr(Bytes::from_static(LEGACY_END_SENTINEL), true)
            .is_legacy_end_marker());
        assert!(!InboundFrame::end().is_legacy_end_marker());
    }

    #[test]
    fn test_error_message() {
        let frame = InboundFrame::from_json(br#"{"type":"Error","content":"dGFyZ2V0IHVucmVhY2hhYmxl","more":false}"#)
            .unwrap();
        assert_eq!(frame.error_message(), "target unreachable");
    }

    #[test]
    fn test_terminal_size_record() {
        let size: TerminalSize = serde_json::from_str(r#"{"Width":100,"Height":30}"#).unwrap();
        assert_eq!(size, TerminalSize::new(100, 30));
        let size: TerminalSize = serde_json::from_str(r#"{"width":80,"height":24}"#).unwrap();
        assert_eq!(size, TerminalSize::default());
    }
}

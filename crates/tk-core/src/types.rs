//! Core domain types

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::TkError;

/// An interactive exec request as handed over by the dispatch layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    /// Request id shared with the remote side
    pub request_id: String,
    /// Log correlation id
    pub log_id: String,
    /// Command and arguments
    pub command: Vec<String>,
    /// Path of the endpoint the request arrived on
    pub endpoint: String,
    /// Whether the caller attached stdin
    pub stdin: bool,
    /// Whether the caller asked for a terminal
    pub tty: bool,
}

impl ExecRequest {
    /// Create a request with stdin and tty disabled and a fresh log id
    pub fn new(request_id: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            request_id: request_id.into(),
            log_id: uuid::Uuid::new_v4().to_string(),
            command,
            endpoint: String::new(),
            stdin: false,
            tty: false,
        }
    }

    /// Parse a request from an exec endpoint such as
    /// `/api/v1/namespaces/ns/pods/web/exec?command=sh&command=-i&stdin=true&tty=true`
    ///
    /// Repeated `command` parameters form the argument vector. `stdin` and
    /// `tty` accept `true` or `1`.
    pub fn from_endpoint(request_id: impl Into<String>, endpoint: &str) -> Result<Self, TkError> {
        let base = Url::parse("http://localhost/")
            .map_err(|e| TkError::InvalidRequest(e.to_string()))?;
        let url = Url::options()
            .base_url(Some(&base))
            .parse(endpoint)
            .map_err(|e| TkError::InvalidRequest(format!("{}: {}", endpoint, e)))?;

        let mut request = Self::new(request_id, Vec::new());
        request.endpoint = url.path().to_string();

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "command" => request.command.push(value.into_owned()),
                "stdin" => request.stdin = parse_flag(&value),
                "tty" => request.tty = parse_flag(&value),
                _ => {}
            }
        }

        if request.command.is_empty() {
            return Err(TkError::InvalidRequest(format!(
                "no command in exec endpoint {}",
                endpoint
            )));
        }

        Ok(request)
    }

    /// Set the log correlation id
    pub fn with_log_id(mut self, log_id: impl Into<String>) -> Self {
        self.log_id = log_id.into();
        self
    }

    /// Set the originating endpoint
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Enable or disable stdin forwarding
    pub fn with_stdin(mut self, stdin: bool) -> Self {
        self.stdin = stdin;
        self
    }

    /// Enable or disable the terminal
    pub fn with_tty(mut self, tty: bool) -> Self {
        self.tty = tty;
        self
    }

    /// Human-readable command line
    pub fn command_being_run(&self) -> String {
        self.command.join(" ")
    }
}

fn parse_flag(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value == "1"
}

/// Outcome reported to the local side of an exec session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusKind {
    Success,
    Failure,
}

/// Status object written to the local transport's control channel
///
/// Serializes in the shape Kubernetes clients expect on the exec error
/// stream: `{"metadata":{},"status":"Failure","message":"..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecStatus {
    /// Always empty; present for client compatibility
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Outcome
    pub status: StatusKind,
    /// Failure description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ExecStatus {
    /// Successful completion
    pub fn success() -> Self {
        Self {
            metadata: serde_json::Map::new(),
            status: StatusKind::Success,
            message: None,
        }
    }

    /// Failed with the given message
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            metadata: serde_json::Map::new(),
            status: StatusKind::Failure,
            message: Some(message.into()),
        }
    }

    /// Encode as JSON
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

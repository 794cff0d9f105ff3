//! Core error types for tunnelkey

use std::path::PathBuf;
use thiserror::Error;
use tk_protocol::ProtocolError;

/// Top-level error type for the tunnelkey ecosystem
#[derive(Error, Debug)]
pub enum TkError {
    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Exec session error
    #[error("Exec error: {0}")]
    Exec(#[from] ExecError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Malformed exec request
    #[error("Invalid exec request: {0}")]
    InvalidRequest(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Terminal errors of an exec session
///
/// This is what the owner of a session observes once it completes. Local
/// I/O failures are logged by the flows and never end up here.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecError {
    /// The remote peer reported an error; displays as the peer's message
    #[error("{0}")]
    Remote(String),

    /// Internal state became inconsistent
    #[error("Invariant violated: {0}")]
    Invariant(String),

    /// The outbound frame channel is gone
    #[error("Transport closed: {0}")]
    Transport(String),

    /// Session was killed by its owner
    #[error("Session killed: {0}")]
    Killed(String),

    /// `start` was called more than once
    #[error("Session already started")]
    AlreadyStarted,

    /// The exec configuration handed to the bridge is unusable
    #[error("Invalid exec configuration: {0}")]
    InvalidConfig(String),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_displays_message_verbatim() {
        let err = ExecError::Remote("target unreachable".to_string());
        assert_eq!(err.to_string(), "target unreachable");
    }

    #[test]
    fn test_exec_error_wraps_into_tk_error() {
        let err: TkError = ExecError::AlreadyStarted.into();
        assert_eq!(err.to_string(), "Exec error: Session already started");
    }
}

//! tk-agent: exec agent for tunnelkey
//!
//! The agent bridges an interactive exec request (shell, database client,
//! `kubectl exec`) on a local connection to a remote target through the
//! relay. The bridge itself lives in [`exec`]; [`relay`] moves its frames
//! over a byte stream and [`local`] adapts the process's stdio as a local
//! connection.

pub mod exec;
pub mod local;
pub mod relay;

pub use exec::{ExecBridge, SessionPhase};
pub use relay::{RelayLink, SessionChannels};

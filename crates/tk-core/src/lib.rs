//! tk-core: Core abstractions and configuration for tunnelkey
//!
//! This crate provides shared types, the error taxonomy, the local
//! transport traits and configuration structures used by the agent.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use error::{ExecError, TkError};
pub use types::{ExecRequest, ExecStatus, StatusKind};

//! Agent configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::exec::ExecConfig;

/// Configuration for the exec agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Relay address to connect to (`host:port`)
    pub relay_address: String,

    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,

    /// Exec bridge tuning
    pub exec: ExecConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            relay_address: "localhost:7443".to_string(),
            connect_timeout_secs: 30,
            exec: ExecConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Connection timeout as a duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

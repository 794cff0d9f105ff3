//! Configuration management for tunnelkey

mod agent;
mod exec;

pub use agent::AgentConfig;
pub use exec::ExecConfig;

use crate::error::ConfigError;
use std::path::{Path, PathBuf};

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tunnelkey")
}

/// Get the default agent configuration file path
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("agent.toml")
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config: T = toml::from_str(&content)?;
    tracing::debug!("Loaded configuration from {:?}", path);
    Ok(config)
}

/// Save configuration to a file
pub fn save_config<T: serde::Serialize>(path: &Path, config: &T) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config)?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ConfigError::Invalid(format!("Failed to create config dir: {}", e)))?;
    }

    std::fs::write(path, content)
        .map_err(|e| ConfigError::Invalid(format!("Failed to write config: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_then_load_agent_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("agent.toml");

        let mut config = AgentConfig::default();
        config.relay_address = "relay.internal:7443".to_string();
        config.exec.chunk_size = 4096;

        save_config(&path, &config).unwrap();
        let loaded: AgentConfig = load_config(&path).unwrap();

        assert_eq!(loaded.relay_address, "relay.internal:7443");
        assert_eq!(loaded.exec.chunk_size, 4096);
        assert_eq!(loaded.exec.max_buffer_size, config.exec.max_buffer_size);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result: Result<AgentConfig, _> = load_config(&dir.path().join("missing.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.toml");
        std::fs::write(&path, "[exec]\nchunk_size = 1024\n").unwrap();

        let loaded: AgentConfig = load_config(&path).unwrap();
        assert_eq!(loaded.exec.chunk_size, 1024);
        assert_eq!(loaded.exec.max_buffer_size, ExecConfig::default().max_buffer_size);
        assert_eq!(loaded.relay_address, AgentConfig::default().relay_address);
    }
}

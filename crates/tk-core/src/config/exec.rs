//! Exec bridge tuning

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Size of a single stdin read.
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024;

/// Upper bound on the bytes batched into one input frame.
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// Capacity of the outbound and inbound frame channels.
///
/// 256 gives room for a burst of output frames while the local sink is
/// briefly slow, without letting a stalled consumer hold much memory.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Flow-control settings for exec sessions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecConfig {
    /// Bytes requested per stdin read
    pub chunk_size: usize,
    /// Largest stdin batch sent as one input frame
    pub max_buffer_size: usize,
    /// Outbound frame channel capacity
    pub outbound_capacity: usize,
    /// Inbound frame channel capacity
    pub inbound_capacity: usize,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            outbound_capacity: DEFAULT_CHANNEL_CAPACITY,
            inbound_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl ExecConfig {
    /// Check that the sizes are usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid("exec.chunk_size must be > 0".into()));
        }
        if self.max_buffer_size < self.chunk_size {
            return Err(ConfigError::Invalid(format!(
                "exec.max_buffer_size ({}) must be at least exec.chunk_size ({})",
                self.max_buffer_size, self.chunk_size
            )));
        }
        if self.outbound_capacity == 0 || self.inbound_capacity == 0 {
            return Err(ConfigError::Invalid(
                "exec channel capacities must be > 0".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ExecConfig::default();
        assert_eq!(config.chunk_size, 8192);
        config.validate().unwrap();
    }

    #[test]
    fn test_rejects_zero_chunk() {
        let config = ExecConfig {
            chunk_size: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_buffer_smaller_than_chunk() {
        let config = ExecConfig {
            chunk_size: 4096,
            max_buffer_size: 1024,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}

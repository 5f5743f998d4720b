// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Resource manager configuration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::{ACTION_SIZE, DEFAULT_MAX_MESSAGE_SIZE, NAME_FIELD_LEN};

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Limits applied by the resource manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Maximum number of simultaneously open connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum number of live resource instances per connection
    #[serde(default = "default_max_instances")]
    pub max_instances_per_connection: usize,

    /// Maximum message size (bytes), the size of the channel buffer
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

fn default_max_connections() -> usize {
    64
}

fn default_max_instances() -> usize {
    256
}

fn default_max_message_size() -> usize {
    DEFAULT_MAX_MESSAGE_SIZE
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_instances_per_connection: default_max_instances(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl ManagerConfig {
    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid("max_connections cannot be 0".into()));
        }
        if self.max_instances_per_connection == 0 {
            return Err(ConfigError::Invalid(
                "max_instances_per_connection cannot be 0".into(),
            ));
        }
        // Must at least fit a REQUEST carrying an empty argument tail.
        let min = ACTION_SIZE + NAME_FIELD_LEN;
        if self.max_message_size < min {
            return Err(ConfigError::Invalid(format!(
                "max_message_size must be at least {}",
                min
            )));
        }
        if u32::try_from(self.max_message_size).is_err() {
            return Err(ConfigError::Invalid(
                "max_message_size does not fit a u32 length prefix".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ManagerConfig::default();
        assert_eq!(config.max_connections, 64);
        assert_eq!(config.max_instances_per_connection, 256);
        assert_eq!(config.max_message_size, 512);
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ManagerConfig = serde_json::from_str(r#"{"max_connections":4}"#).unwrap();
        assert_eq!(config.max_connections, 4);
        assert_eq!(config.max_message_size, 512);
    }

    #[test]
    fn test_validate_rejects_bad_limits() {
        let mut config = ManagerConfig {
            max_connections: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.max_connections = 1;
        config.max_message_size = 19;
        assert!(config.validate().is_err());
        config.max_message_size = 20;
        assert!(config.validate().is_ok());

        config.max_instances_per_connection = 0;
        assert!(config.validate().is_err());
    }
}

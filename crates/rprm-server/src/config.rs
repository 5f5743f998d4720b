// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Daemon configuration.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;

use rprm::registry::validate_name;
use rprm::{BackendSpec, ManagerConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Manager(#[from] rprm::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// A resource type to register at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Type name as requested by the remote side (1..=15 bytes)
    pub name: String,

    /// Owner token reported in snapshots
    #[serde(default = "default_owner")]
    pub owner: String,

    /// Simulated back-end implementing the type
    pub backend: BackendSpec,
}

fn default_owner() -> String {
    "config".to_string()
}

/// Daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to (default: 0.0.0.0)
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,

    /// TCP port to listen on (default: 7450)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Resource manager limits
    #[serde(default)]
    pub manager: ManagerConfig,

    /// Resource types registered at startup
    #[serde(default = "default_resources")]
    pub resources: Vec<ResourceConfig>,
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    7450
}

fn default_resources() -> Vec<ResourceConfig> {
    vec![
        ResourceConfig {
            name: "gpio-clk".into(),
            owner: "sim-clock".into(),
            backend: BackendSpec::Clock {
                base: 0x4000_0000,
                max_frequency: 400_000_000,
            },
        },
        ResourceConfig {
            name: "pd-dsp".into(),
            owner: "sim-regulator".into(),
            backend: BackendSpec::Regulator {
                base: 0x4a00_0000,
                default_microvolts: 1_800_000,
            },
        },
    ]
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            manager: ManagerConfig::default(),
            resources: default_resources(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save configuration to a JSON file.
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::Invalid("port cannot be 0".into()));
        }
        self.manager.validate()?;

        let mut seen = HashSet::new();
        for resource in &self.resources {
            validate_name(&resource.name)
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
            if !seen.insert(resource.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "resource '{}' listed twice",
                    resource.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 7450);
        assert_eq!(config.manager.max_message_size, 512);
        assert_eq!(config.resources.len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rprm.json");

        let config = ServerConfig {
            port: 7460,
            ..Default::default()
        };
        config.to_file(&path).unwrap();

        let loaded = ServerConfig::from_file(&path).unwrap();
        assert_eq!(loaded.port, 7460);
        assert_eq!(loaded.resources, config.resources);
        assert_eq!(loaded.manager, config.manager);
    }

    #[test]
    fn test_minimal_json() {
        let config: ServerConfig = serde_json::from_str(
            r#"{
                "port": 9000,
                "manager": { "max_connections": 2 },
                "resources": [
                    { "name": "uart-clk",
                      "backend": { "kind": "clock", "base": 4096, "max_frequency": 48000000 } }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(config.manager.max_connections, 2);
        assert_eq!(config.manager.max_instances_per_connection, 256);
        assert_eq!(config.resources[0].owner, "config");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ServerConfig::from_file(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }

    #[test]
    fn test_validation_port_zero() {
        let config = ServerConfig {
            port: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_duplicate_and_bad_names() {
        let mut config = ServerConfig::default();
        config.resources.push(config.resources[0].clone());
        assert!(config.validate().is_err());

        config.resources.truncate(1);
        config.resources[0].name = "much-too-long-name".into();
        assert!(config.validate().is_err());
    }
}

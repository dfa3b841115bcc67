//! Primary Selector Configuration
//!
//! This module provides configuration structures for the primary
//! selector and the binary wrapping it.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::election::{identity_from_address, RetryPolicy};

/// Main primary selector configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectorConfig {
    /// Node-specific configuration
    pub node: NodeConfig,

    /// Election namespace configuration
    #[serde(default)]
    pub election: ElectionConfig,

    /// Coordination service connection configuration
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// Session bootstrap retry configuration
    #[serde(default)]
    pub retry: RetryConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Address this process serves on; its `host:port` is the participant identity
    pub bind_address: String,
}

/// Election namespace configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionConfig {
    /// Path all peers register under for the election
    #[serde(default = "default_election_path")]
    pub election_path: String,

    /// Path under which the primary publishes its marker
    #[serde(default = "default_leader_path")]
    pub leader_path: String,
}

/// Coordination service connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Connect string of the coordination service ensemble
    #[serde(default = "default_coordinator_address")]
    pub address: String,
}

/// Session bootstrap retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Base sleep between connection attempts in milliseconds
    #[serde(default = "default_base_sleep_ms")]
    pub base_sleep_ms: u64,

    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Upper bound for a single sleep in milliseconds
    #[serde(default = "default_max_sleep_ms")]
    pub max_sleep_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_bind_address() -> String {
    "127.0.0.1:19998".to_string()
}

fn default_election_path() -> String {
    "/election".to_string()
}

fn default_leader_path() -> String {
    "/leader".to_string()
}

fn default_coordinator_address() -> String {
    "localhost:2181".to_string()
}

fn default_base_sleep_ms() -> u64 {
    1000
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_sleep_ms() -> u64 {
    30_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            election_path: default_election_path(),
            leader_path: default_leader_path(),
        }
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            address: default_coordinator_address(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_sleep_ms: default_base_sleep_ms(),
            max_retries: default_max_retries(),
            max_sleep_ms: default_max_sleep_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl SelectorConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: SelectorConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.node.bind_address.is_empty() {
            return Err(crate::Error::Config("node.bind_address cannot be empty".into()));
        }
        identity_from_address(&self.node.bind_address)?;

        for (name, path) in [
            ("election.election_path", &self.election.election_path),
            ("election.leader_path", &self.election.leader_path),
        ] {
            if !path.starts_with('/') {
                return Err(crate::Error::Config(format!(
                    "{} must be an absolute path, got {:?}",
                    name, path
                )));
            }
        }

        if self.election.election_path.trim_end_matches('/')
            == self.election.leader_path.trim_end_matches('/')
        {
            return Err(crate::Error::Config(
                "election.election_path and election.leader_path must differ".into(),
            ));
        }

        if self.retry.max_retries > 29 {
            return Err(crate::Error::Config("retry.max_retries cannot exceed 29".into()));
        }

        Ok(())
    }

    /// Get the base retry sleep as Duration
    pub fn base_sleep(&self) -> Duration {
        Duration::from_millis(self.retry.base_sleep_ms)
    }

    /// Get the maximum retry sleep as Duration
    pub fn max_sleep(&self) -> Duration {
        Duration::from_millis(self.retry.max_sleep_ms)
    }

    /// Retry policy for the session bootstrap
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.base_sleep(), self.retry.max_retries).with_max_sleep(self.max_sleep())
    }
}

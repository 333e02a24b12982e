//! Thin TOML-backed agent configuration. Deliberately minimal: CLI argument
//! parsing and on-disk configuration loading are named external-collaborator
//! concerns in §1, so this carries no live-reload, checksum tracking, or
//! override-persistence machinery, just load, validate, and hand the
//! operator's CLI overrides precedence.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::AgentError;

fn default_ping_interval() -> u64 {
    120
}

fn default_aggregation_interval() -> u64 {
    1800
}

fn default_flop_threshold() -> u32 {
    6
}

/// Operator identity and connection parameters, loaded once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub remote_host: String,
    #[serde(default)]
    pub ca_bundle_path: Option<String>,
    #[serde(default)]
    pub disable_ssl_verification: bool,
    #[serde(default)]
    pub external_monitors_dir: Option<String>,
    #[serde(default = "default_ping_interval")]
    pub ping_interval_seconds: u64,
    #[serde(default = "default_aggregation_interval")]
    pub default_aggregation_interval_seconds: u64,
    #[serde(default = "default_flop_threshold")]
    pub default_flop_threshold: u32,
    #[serde(default)]
    pub local_only: bool,
    /// Optional path to a log file the built-in log-tail monitor should
    /// follow (e.g. the platform's auth log). Absent means that built-in is
    /// not registered, since there is no universal default path (§1).
    #[serde(default)]
    pub log_tail_path: Option<String>,
    /// Optional list of service names the built-in service-status monitor
    /// should track. Empty means that built-in is not registered.
    #[serde(default)]
    pub watched_services: Vec<String>,
}

impl AgentConfig {
    pub async fn load(path: &Path) -> Result<Self, AgentError> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| AgentError::Config(format!("failed to read {}: {e}", path.display())))?;
        let config: AgentConfig = toml::from_str(&contents)
            .map_err(|e| AgentError::Config(format!("failed to parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AgentError> {
        if self.consumer_key.is_empty() {
            return Err(AgentError::Validation("consumer_key must not be empty".into()));
        }
        if self.remote_host.is_empty() {
            return Err(AgentError::Validation("remote_host must not be empty".into()));
        }
        Ok(())
    }

    /// CLI flags take precedence over config-file values; unlike a richer
    /// config manager, overrides are not persisted back to disk.
    pub fn apply_cli_overrides(
        &mut self,
        ca_bundle_path: Option<String>,
        disable_ssl_verification: bool,
        external_monitors_dir: Option<String>,
        local_only: bool,
    ) {
        if let Some(path) = ca_bundle_path {
            self.ca_bundle_path = Some(path);
        }
        if disable_ssl_verification {
            self.disable_ssl_verification = true;
        }
        if let Some(dir) = external_monitors_dir {
            self.external_monitors_dir = Some(dir);
        }
        if local_only {
            self.local_only = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AgentConfig {
        AgentConfig {
            consumer_key: "key".into(),
            consumer_secret: "secret".into(),
            remote_host: "control.example.com".into(),
            ca_bundle_path: None,
            disable_ssl_verification: false,
            external_monitors_dir: None,
            ping_interval_seconds: 120,
            default_aggregation_interval_seconds: 1800,
            default_flop_threshold: 6,
            local_only: false,
            log_tail_path: None,
            watched_services: Vec::new(),
        }
    }

    #[test]
    fn validate_rejects_empty_consumer_key() {
        let mut config = sample();
        config.consumer_key = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn cli_overrides_take_precedence() {
        let mut config = sample();
        config.apply_cli_overrides(Some("/etc/ca.pem".into()), true, None, false);
        assert_eq!(config.ca_bundle_path.as_deref(), Some("/etc/ca.pem"));
        assert!(config.disable_ssl_verification);
    }
}

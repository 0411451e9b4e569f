//! Engine bootstrap configuration: a single process-local YAML file plus
//! environment overrides (env-var substitution in webhook auth tokens).

use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_webhook_base_url")]
    pub webhook_base_url: String,
    #[serde(default)]
    pub webhook_auth_token: Option<String>,
    #[serde(default = "default_scheduler_poll_ms")]
    pub scheduler_poll_ms: u64,
    #[serde(default = "default_monitor_interval_ms")]
    pub default_monitor_interval_ms: u64,
    #[serde(default)]
    pub rpc_endpoint: Option<String>,
}

fn default_webhook_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_scheduler_poll_ms() -> u64 {
    1_000
}

fn default_monitor_interval_ms() -> u64 {
    30_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            webhook_base_url: default_webhook_base_url(),
            webhook_auth_token: None,
            scheduler_poll_ms: default_scheduler_poll_ms(),
            default_monitor_interval_ms: default_monitor_interval_ms(),
            rpc_endpoint: None,
        }
    }
}

impl EngineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let mut config: EngineConfig = serde_yaml::from_str(&raw)
            .map_err(|err| EngineError::InvalidConfig(format!("failed to parse engine config: {err}")))?;
        config.expand_env()?;
        Ok(config)
    }

    /// Build a config purely from environment variables, for CI/container
    /// runs that don't ship a config file.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("WANT_ENGINE_WEBHOOK_BASE_URL") {
            config.webhook_base_url = url;
        }
        if let Ok(token) = std::env::var("WANT_ENGINE_WEBHOOK_AUTH_TOKEN") {
            config.webhook_auth_token = Some(token);
        }
        if let Ok(endpoint) = std::env::var("WANT_ENGINE_RPC_ENDPOINT") {
            config.rpc_endpoint = Some(endpoint);
        }
        config
    }

    /// Expand `${VAR}` references in the auth token at validation time;
    /// a referenced variable that isn't set is a config error, not a
    /// silent empty string (spec §6).
    fn expand_env(&mut self) -> Result<()> {
        if let Some(token) = &self.webhook_auth_token {
            self.webhook_auth_token = Some(expand_env_vars(token)?);
        }
        Ok(())
    }
}

fn expand_env_vars(input: &str) -> Result<String> {
    let pattern = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
    let mut last_err = None;
    let expanded = pattern.replace_all(input, |caps: &regex::Captures| {
        let name = &caps[1];
        match std::env::var(name) {
            Ok(value) => value,
            Err(_) => {
                last_err = Some(EngineError::InvalidConfig(format!(
                    "environment variable '{name}' is not set"
                )));
                String::new()
            }
        }
    });
    if let Some(err) = last_err {
        return Err(err);
    }
    Ok(expanded.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = EngineConfig::default();
        assert_eq!(config.scheduler_poll_ms, 1_000);
        assert_eq!(config.default_monitor_interval_ms, 30_000);
    }

    #[test]
    fn env_var_expansion_substitutes_present_variable() {
        std::env::set_var("WANT_ENGINE_TEST_TOKEN", "secret123");
        let expanded = expand_env_vars("Bearer ${WANT_ENGINE_TEST_TOKEN}").unwrap();
        assert_eq!(expanded, "Bearer secret123");
        std::env::remove_var("WANT_ENGINE_TEST_TOKEN");
    }

    #[test]
    fn env_var_expansion_errors_on_missing_variable() {
        let result = expand_env_vars("Bearer ${WANT_ENGINE_DEFINITELY_MISSING}");
        assert!(result.is_err());
    }
}

//! Runner configuration, loadable from TOML.

use std::time::Duration;

use serde::Deserialize;

use crate::discovery::DEFAULT_SERVICE_TYPE;
use crate::naming::InterfaceNaming;
use crate::supervisor::RestartPolicy;

/// Top-level configuration for the runner.
#[derive(Debug, Clone, Deserialize)]
pub struct RunnerConfig {
    /// DNS-SD service type to browse for.
    #[serde(default = "default_service_type")]
    pub service_type: String,
    /// How interface names are derived from instance names.
    #[serde(default)]
    pub naming: InterfaceNaming,
    /// Bridge restart backoff.
    #[serde(default)]
    pub restart: RestartConfig,
    /// Passed to every bridge before its address and interface arguments.
    #[serde(default)]
    pub bridge_args: Vec<String>,
}

fn default_service_type() -> String {
    DEFAULT_SERVICE_TYPE.to_string()
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            service_type: default_service_type(),
            naming: InterfaceNaming::default(),
            restart: RestartConfig::default(),
            bridge_args: Vec::new(),
        }
    }
}

impl RunnerConfig {
    /// Load config from a TOML file path.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.naming.validate().map_err(anyhow::Error::msg)?;
        if self.restart.initial_backoff_ms > self.restart.max_backoff_ms {
            anyhow::bail!(
                "restart.initial_backoff_ms ({}) exceeds restart.max_backoff_ms ({})",
                self.restart.initial_backoff_ms,
                self.restart.max_backoff_ms
            );
        }
        Ok(())
    }
}

/// Restart backoff settings in config units.
#[derive(Debug, Clone, Deserialize)]
pub struct RestartConfig {
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Uptime after which a bridge counts as stable again.
    #[serde(default = "default_stable_after_secs")]
    pub stable_after_secs: u64,
}

fn default_initial_backoff_ms() -> u64 {
    250
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_stable_after_secs() -> u64 {
    10
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            stable_after_secs: default_stable_after_secs(),
        }
    }
}

impl RestartConfig {
    pub fn policy(&self) -> RestartPolicy {
        RestartPolicy {
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            stable_after: Duration::from_secs(self.stable_after_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_uses_defaults() {
        let config: RunnerConfig = toml::from_str("").unwrap();
        assert_eq!(config.service_type, "_io4edge_canL2._tcp");
        assert_eq!(config.naming, InterfaceNaming::default());
        assert_eq!(config.restart.policy(), RestartPolicy::default());
        assert!(config.bridge_args.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn deserialize_full_config() {
        let toml = r#"
service_type = "_test_can._tcp"
bridge_args = ["--bitrate", "250000"]

[naming]
prefix = "can-"
suffix_marker = "-bus"
tail_len = 4

[restart]
initial_backoff_ms = 0
max_backoff_ms = 0
stable_after_secs = 0
"#;
        let config: RunnerConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.service_type, "_test_can._tcp");
        assert_eq!(config.bridge_args, vec!["--bitrate", "250000"]);
        assert_eq!(config.naming.prefix, "can-");
        assert_eq!(config.naming.max_len, 15); // default
        assert_eq!(config.naming.derive("node-bus"), "can-node");
        assert_eq!(config.restart.policy(), RestartPolicy::immediate());
        config.validate().unwrap();
    }

    #[test]
    fn invalid_naming_rejected() {
        let config: RunnerConfig = toml::from_str(
            r#"
[naming]
prefix = "very-long-prefix"
"#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn inverted_backoff_rejected() {
        let config: RunnerConfig = toml::from_str(
            r#"
[restart]
initial_backoff_ms = 5000
max_backoff_ms = 1000
"#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }
}

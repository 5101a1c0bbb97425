//! Agent configuration

use admission_lib::{ActionClassifier, ActionType, AdmissionControlSettings};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Node identity, defaults to `NODE_NAME`
    #[serde(default = "default_node_id")]
    pub node_id: String,

    /// API server port for health/metrics/admission endpoints
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Root of the proc filesystem
    #[serde(default = "default_proc_path")]
    pub proc_path: String,

    /// Block devices to track; all devices when unset
    #[serde(default)]
    pub devices: Option<Vec<String>>,

    #[serde(default)]
    pub admission: AdmissionControlSettings,

    /// Extra transport action prefixes, checked after the built-in ones
    #[serde(default)]
    pub action_rules: Vec<ActionRule>,
}

/// Maps transport actions starting with `prefix` to an action type
#[derive(Debug, Clone, Deserialize)]
pub struct ActionRule {
    pub prefix: String,
    pub action_type: ActionType,
}

fn default_node_id() -> String {
    std::env::var("NODE_NAME").unwrap_or_else(|_| "unknown".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_proc_path() -> String {
    "/proc".to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            api_port: default_api_port(),
            proc_path: default_proc_path(),
            devices: None,
            admission: AdmissionControlSettings::default(),
            action_rules: Vec::new(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from an optional TOML file and `AGENT__*` environment variables.
    ///
    /// Nested keys use `__`, e.g. `AGENT__ADMISSION__TRANSPORT_MODE=enforced`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("AGENT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read agent configuration")?;

        let config: AgentConfig = config
            .try_deserialize()
            .context("Invalid agent configuration")?;
        config
            .admission
            .validate()
            .context("Invalid admission control settings")?;

        Ok(config)
    }

    /// Built-in classifier extended with the configured action rules
    pub fn classifier(&self) -> ActionClassifier {
        self.action_rules
            .iter()
            .fold(ActionClassifier::new(), |classifier, rule| {
                classifier.with_rule(rule.prefix.clone(), rule.action_type)
            })
    }
}

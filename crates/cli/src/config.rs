//! Configuration management for the CLI

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::output::OutputFormat;

pub const DEFAULT_API_URL: &str = "http://localhost:8080";

/// CLI configuration, read from `~/.config/admctl/config.json`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Agent endpoint URL
    pub api_url: Option<String>,
    /// Default output format
    pub default_format: Option<String>,
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).context("Failed to read config file")?;

        serde_json::from_str(&content).context("Failed to parse config file")
    }

    /// Command line wins over the config file, which wins over the default
    pub fn api_url(&self, flag: Option<String>) -> String {
        flag.or_else(|| self.api_url.clone())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
    }

    pub fn format(&self, flag: Option<OutputFormat>) -> OutputFormat {
        flag.or_else(|| {
            self.default_format
                .as_deref()
                .and_then(|f| f.parse().ok())
        })
        .unwrap_or_default()
    }

    /// Get the configuration file path
    fn config_path() -> Option<PathBuf> {
        dirs_next::home_dir().map(|home| home.join(".config").join("admctl").join("config.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_overrides_config() {
        let config = Config {
            api_url: Some("http://node-1:8080".to_string()),
            default_format: Some("json".to_string()),
        };

        assert_eq!(config.api_url(None), "http://node-1:8080");
        assert_eq!(
            config.api_url(Some("http://node-2:8080".to_string())),
            "http://node-2:8080"
        );
        assert_eq!(config.format(None), OutputFormat::Json);
        assert_eq!(config.format(Some(OutputFormat::Table)), OutputFormat::Table);
    }

    #[test]
    fn test_defaults_without_config() {
        let config = Config::load_from(Path::new("/nonexistent/admctl.json")).unwrap();
        assert_eq!(config.api_url(None), DEFAULT_API_URL);
        assert_eq!(config.format(None), OutputFormat::Table);
    }
}

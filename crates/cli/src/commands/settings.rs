//! Dynamic settings commands

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{print_info, print_json, print_success, print_table, OutputFormat};

#[derive(Tabled)]
struct SettingRow {
    #[tabled(rename = "Setting")]
    key: String,
    #[tabled(rename = "Value")]
    value: String,
}

/// Parse `key=value`; the value is read as JSON and falls back to a plain string
pub fn parse_assignment(assignment: &str) -> Result<(String, Value)> {
    let (key, raw) = assignment
        .split_once('=')
        .with_context(|| format!("Expected key=value, got [{}]", assignment))?;
    let key = key.trim();
    if key.is_empty() {
        anyhow::bail!("Empty setting key in [{}]", assignment);
    }

    let raw = raw.trim();
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

/// Show current admission control settings
pub async fn get_settings(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let settings = client.settings().await?;

    if format == OutputFormat::Json {
        return print_json(&settings);
    }

    print_table(
        settings
            .into_iter()
            .map(|(key, value)| SettingRow {
                key,
                value: match value {
                    Value::Null => "(unset)".to_string(),
                    Value::String(s) => s,
                    other => other.to_string(),
                },
            })
            .collect(),
    );
    Ok(())
}

/// Update one or more dynamic settings; `key=null` resets a key to its default
pub async fn set_settings(
    client: &ApiClient,
    assignments: &[String],
    format: OutputFormat,
) -> Result<()> {
    let mut changes = Map::new();
    for assignment in assignments {
        let (key, value) = parse_assignment(assignment)?;
        changes.insert(key, value);
    }

    let response = client.update_settings(changes).await?;

    match format {
        OutputFormat::Json => print_json(&response)?,
        OutputFormat::Table => {
            if response.updated.is_empty() {
                print_info("No settings changed");
            } else {
                print_success(&format!("Updated {}", response.updated.join(", ")));
            }
        }
    }
    Ok(())
}

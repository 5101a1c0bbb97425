//! Admission evaluation command

use anyhow::Result;
use colored::Colorize;

use crate::client::{ApiClient, EvaluateRequest};
use crate::output::{print_error, print_json, print_success, OutputFormat};

/// Ask the agent whether an action would be admitted right now.
///
/// Returns whether the action was admitted.
pub async fn evaluate(
    client: &ApiClient,
    action: &str,
    action_type: Option<String>,
    format: OutputFormat,
) -> Result<bool> {
    let response = client
        .evaluate(&EvaluateRequest {
            action: action.to_string(),
            action_type,
        })
        .await?;

    match format {
        OutputFormat::Json => print_json(&response)?,
        OutputFormat::Table => {
            let action_type = response
                .action_type
                .as_deref()
                .unwrap_or("not subject to admission control");
            if response.admitted {
                print_success(&format!("{} admitted ({})", action.cyan(), action_type));
            } else {
                print_error(&format!("{} rejected ({})", action.cyan(), action_type));
                if let Some(reason) = &response.reason {
                    eprintln!("  {}", reason.dimmed());
                }
            }
        }
    }

    Ok(response.admitted)
}

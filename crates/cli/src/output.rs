//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Self as ValueEnum>::from_str(s, true)
    }
}

/// Print a table from a list of rows
pub fn print_table<T: Tabled>(rows: Vec<T>) {
    if rows.is_empty() {
        println!("{}", "No items found".yellow());
        return;
    }
    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{}", table);
}

/// Print any response as pretty JSON
pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format a utilisation percentage
pub fn format_percent(percent: f64) -> String {
    if percent < 0.0 {
        "n/a".to_string()
    } else {
        format!("{:.1}%", percent)
    }
}

/// Color a utilisation percentage against the usual ceilings
pub fn color_percent(percent: f64) -> String {
    let formatted = format_percent(percent);
    if percent >= 90.0 {
        formatted.red().to_string()
    } else if percent >= 70.0 {
        formatted.yellow().to_string()
    } else {
        formatted.green().to_string()
    }
}

/// Color a node admission state
pub fn color_state(state: &str) -> String {
    match state.to_lowercase().as_str() {
        "open" => state.red().bold().to_string(),
        "half_open" => state.yellow().to_string(),
        "closed" => state.green().to_string(),
        "monitor" => state.blue().to_string(),
        _ => state.dimmed().to_string(),
    }
}

/// Color an admission control mode
pub fn color_mode(mode: &str) -> String {
    match mode.to_lowercase().as_str() {
        "enforced" => mode.red().to_string(),
        "monitor" => mode.blue().to_string(),
        _ => mode.dimmed().to_string(),
    }
}

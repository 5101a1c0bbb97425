//! Admission control stats commands

use anyhow::Result;
use chrono::{TimeZone, Utc};
use colored::Colorize;
use tabled::Tabled;

use crate::client::{AdmissionStats, ApiClient, ControllerStats, PerfStats};
use crate::output::{
    color_mode, color_percent, color_state, format_percent, print_json, print_table,
    print_warning, OutputFormat,
};

/// Row for controllers table
#[derive(Tabled)]
struct ControllerRow {
    #[tabled(rename = "Controller")]
    controller: String,
    #[tabled(rename = "Mode")]
    mode: String,
    #[tabled(rename = "Search")]
    search: u64,
    #[tabled(rename = "Indexing")]
    indexing: u64,
    #[tabled(rename = "Ratio")]
    ratio: String,
}

impl From<&ControllerStats> for ControllerRow {
    fn from(stats: &ControllerStats) -> Self {
        let count = |t: &str| stats.rejection_count.get(t).copied().unwrap_or(0);
        Self {
            controller: stats.controller.clone(),
            mode: color_mode(&stats.mode),
            search: count("search"),
            indexing: count("indexing"),
            ratio: stats
                .rejection_ratio
                .map(|r| format!("{:.3}", r))
                .unwrap_or_else(|| "-".to_string()),
        }
    }
}

/// Row for resources table
#[derive(Tabled)]
struct ResourceRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Current")]
    current: String,
    #[tabled(rename = "Window")]
    window: String,
    #[tabled(rename = "EWMA")]
    ewma: String,
    #[tabled(rename = "Ready")]
    ready: String,
}

/// Row for node states table
#[derive(Tabled)]
struct NodeRow {
    #[tabled(rename = "Node")]
    node: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "CPU")]
    cpu: String,
    #[tabled(rename = "Memory")]
    memory: String,
    #[tabled(rename = "IO")]
    io: String,
}

fn node_rows(stats: &AdmissionStats) -> Vec<NodeRow> {
    stats
        .node_states
        .iter()
        .map(|(node, state)| {
            let perf = stats.node_perf_stats.get(node);
            let pct = |f: fn(&PerfStats) -> f64| {
                perf.map(|p| format_percent(f(p)))
                    .unwrap_or_else(|| "-".to_string())
            };
            NodeRow {
                node: node.clone(),
                state: color_state(state),
                cpu: pct(|p| p.cpu),
                memory: pct(|p| p.memory),
                io: pct(|p| p.io),
            }
        })
        .collect()
}

/// Show node admission control stats
pub async fn show_stats(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let stats = client.stats().await?;

    if format == OutputFormat::Json {
        return print_json(&stats);
    }

    let taken_at = Utc
        .timestamp_millis_opt(stats.timestamp)
        .single()
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| stats.timestamp.to_string());

    println!("{}", "Admission Control".bold());
    println!("{}", "=".repeat(60));
    println!("Node:  {}", stats.node_id.cyan());
    println!("Mode:  {}", color_mode(&stats.transport_mode));
    println!("Taken: {}", taken_at);
    println!();

    println!("{}", "Controllers".bold());
    print_table(stats.controllers.iter().map(ControllerRow::from).collect());
    println!();

    println!("{}", "Resources".bold());
    if stats.resources.is_empty() {
        print_warning("Resource tracker has not published yet");
    } else {
        print_table(
            stats
                .resources
                .iter()
                .map(|r| ResourceRow {
                    resource: r.kind.clone(),
                    current: color_percent(r.usage),
                    window: format_percent(r.window_average),
                    ewma: format_percent(r.ewma),
                    ready: if r.ready { "yes".to_string() } else { "no".to_string() },
                })
                .collect(),
        );
    }
    println!();

    println!("{}", "Nodes".bold());
    print_table(node_rows(&stats));

    Ok(())
}

/// Show the admission state of every known node
pub async fn show_node_states(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let states = client.node_states().await?;

    if format == OutputFormat::Json {
        return print_json(&states);
    }

    #[derive(Tabled)]
    struct StateRow {
        #[tabled(rename = "Node")]
        node: String,
        #[tabled(rename = "State")]
        state: String,
    }

    print_table(
        states
            .iter()
            .map(|(node, state)| StateRow {
                node: node.clone(),
                state: color_state(state),
            })
            .collect(),
    );
    Ok(())
}

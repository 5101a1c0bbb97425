//! Core data models for admission control

use crate::error::AdmissionError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Category of transport action that admission control is applied to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Search,
    Indexing,
    ClusterAdmin,
}

impl ActionType {
    pub const ALL: [ActionType; 3] = [
        ActionType::Search,
        ActionType::Indexing,
        ActionType::ClusterAdmin,
    ];

    /// Stable name used for counters and stats keys
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Search => "search",
            ActionType::Indexing => "indexing",
            ActionType::ClusterAdmin => "cluster_admin",
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            ActionType::Search => 0,
            ActionType::Indexing => 1,
            ActionType::ClusterAdmin => 2,
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = AdmissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "search" => Ok(ActionType::Search),
            "indexing" => Ok(ActionType::Indexing),
            "cluster_admin" => Ok(ActionType::ClusterAdmin),
            other => Err(AdmissionError::Configuration(format!(
                "unknown admission control action type [{other}]"
            ))),
        }
    }
}

/// Operating policy of an admission controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdmissionControlMode {
    /// Neither counts nor rejects
    #[default]
    Disabled,
    /// Counts would-be rejections but admits everything
    Monitor,
    /// Counts and rejects
    Enforced,
}

impl AdmissionControlMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdmissionControlMode::Disabled => "disabled",
            AdmissionControlMode::Monitor => "monitor",
            AdmissionControlMode::Enforced => "enforced",
        }
    }
}

impl fmt::Display for AdmissionControlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AdmissionControlMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disabled" => Ok(AdmissionControlMode::Disabled),
            "monitor" | "monitor_only" => Ok(AdmissionControlMode::Monitor),
            "enforced" => Ok(AdmissionControlMode::Enforced),
            other => Err(format!("unknown admission control mode [{other}]")),
        }
    }
}

/// Resource signal tracked by the samplers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Cpu,
    Memory,
    Io,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Cpu => "cpu",
            ResourceKind::Memory => "memory",
            ResourceKind::Io => "io",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// I/O utilisation as reported in node stats
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IoUsageStats {
    /// Rolling-window I/O utilisation, `-1.0` until the tracker is ready
    pub io_utilization_percent: f64,
    pub ewma_io_utilization_percent: f64,
}

impl IoUsageStats {
    pub fn new(io_utilization_percent: f64) -> Self {
        Self {
            io_utilization_percent,
            ewma_io_utilization_percent: io_utilization_percent,
        }
    }

    /// Whether the I/O tracker has produced a usable value yet
    pub fn is_available(&self) -> bool {
        self.io_utilization_percent >= 0.0
    }
}

impl fmt::Display for IoUsageStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IO utilization percent: {:.1}", self.io_utilization_percent)
    }
}

/// Point-in-time resource usage of a node, consumed by the controllers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeResourceUsageStats {
    pub node_id: String,
    /// Unix epoch millis at which the snapshot was taken
    pub timestamp: i64,
    pub cpu_utilization_percent: f64,
    pub cpu_ewma_percent: f64,
    pub memory_utilization_percent: f64,
    pub memory_ewma_percent: f64,
    pub io_usage_stats: IoUsageStats,
}

impl NodeResourceUsageStats {
    pub fn new(
        node_id: impl Into<String>,
        cpu_utilization_percent: f64,
        memory_utilization_percent: f64,
        io_usage_stats: IoUsageStats,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            cpu_utilization_percent,
            cpu_ewma_percent: cpu_utilization_percent,
            memory_utilization_percent,
            memory_ewma_percent: memory_utilization_percent,
            io_usage_stats,
        }
    }

    pub fn with_ewma(mut self, cpu_ewma_percent: f64, memory_ewma_percent: f64) -> Self {
        self.cpu_ewma_percent = cpu_ewma_percent;
        self.memory_ewma_percent = memory_ewma_percent;
        self
    }
}

/// Raw disk I/O counters for one block device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIoStats {
    pub device_name: String,
    /// Cumulative milliseconds the device spent doing I/O
    pub io_time_millis: u64,
}

/// Raw disk I/O counters across devices at one instant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoStatsSnapshot {
    pub total_io_time_millis: u64,
    pub devices: Vec<DeviceIoStats>,
    pub timestamp_millis: u64,
}

impl IoStatsSnapshot {
    pub fn new(devices: Vec<DeviceIoStats>, timestamp_millis: u64) -> Self {
        let total_io_time_millis = devices.iter().map(|d| d.io_time_millis).sum();
        Self {
            total_io_time_millis,
            devices,
            timestamp_millis,
        }
    }
}

//! Per-node performance record exchanged between nodes

use crate::models::NodeResourceUsageStats;
use crate::tracker::RollingWindow;
use prost::Message;
use serde::{Deserialize, Serialize};

/// Averaged CPU, memory and I/O utilisation of a node.
///
/// Encoded as a protobuf message on the wire and as `{"CPU", "JVM", "IO"}` in JSON.
#[derive(Clone, PartialEq, Message, Serialize, Deserialize)]
pub struct NodePerfStats {
    #[prost(double, tag = "1")]
    #[serde(rename = "CPU")]
    pub cpu_percent_avg: f64,

    #[prost(double, tag = "2")]
    #[serde(rename = "JVM")]
    pub memory_percent_avg: f64,

    #[prost(double, tag = "3")]
    #[serde(rename = "IO")]
    pub io_percent_avg: f64,
}

impl NodePerfStats {
    pub fn new(cpu_percent_avg: f64, memory_percent_avg: f64, io_percent_avg: f64) -> Self {
        Self {
            cpu_percent_avg,
            memory_percent_avg,
            io_percent_avg,
        }
    }

    /// Smoothed view of a usage snapshot; unavailable I/O is reported as 0
    pub fn from_usage(stats: &NodeResourceUsageStats) -> Self {
        Self::new(
            stats.cpu_ewma_percent,
            stats.memory_ewma_percent,
            stats.io_usage_stats.ewma_io_utilization_percent.max(0.0),
        )
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode_to_vec()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, prost::DecodeError> {
        Self::decode(bytes)
    }

    /// Field-wise mean over a node's history, `None` when empty
    pub fn average(history: &RollingWindow<NodePerfStats>) -> Option<Self> {
        Some(Self::new(
            history.average_by(|s| s.cpu_percent_avg)?,
            history.average_by(|s| s.memory_percent_avg)?,
            history.average_by(|s| s.io_percent_avg)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IoUsageStats;

    #[test]
    fn test_wire_format() {
        let stats = NodePerfStats::new(55.5, 40.0, 12.25);
        let bytes = stats.to_bytes();

        // Three fixed64 fields with one byte keys
        assert_eq!(bytes.len(), 27);
        assert_eq!(bytes[0], 0x09);
        assert_eq!(NodePerfStats::from_bytes(&bytes).unwrap(), stats);
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(NodePerfStats::from_bytes(&[0x09, 0x01]).is_err());
    }

    #[test]
    fn test_json_field_names() {
        let json = serde_json::to_value(NodePerfStats::new(1.0, 2.0, 3.0)).unwrap();
        assert_eq!(json, serde_json::json!({ "CPU": 1.0, "JVM": 2.0, "IO": 3.0 }));
    }

    #[test]
    fn test_from_usage_uses_smoothed_values() {
        let usage = NodeResourceUsageStats::new("node-1", 80.0, 60.0, IoUsageStats::new(-1.0))
            .with_ewma(70.0, 50.0);
        let stats = NodePerfStats::from_usage(&usage);
        assert_eq!(stats, NodePerfStats::new(70.0, 50.0, 0.0));
    }

    #[test]
    fn test_average_over_history() {
        let mut history = RollingWindow::new(3);
        history.push(NodePerfStats::new(10.0, 20.0, 30.0));
        history.push(NodePerfStats::new(30.0, 40.0, 50.0));
        assert_eq!(NodePerfStats::average(&RollingWindow::new(3)), None);
        assert_eq!(
            NodePerfStats::average(&history),
            Some(NodePerfStats::new(20.0, 30.0, 40.0))
        );
    }
}

//! Admission control stats exposed to operators

use crate::models::AdmissionControlMode;
use crate::perf_stats::NodePerfStats;
use crate::state::AdmissionControllerState;
use crate::tracker::SamplerSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Rejections of one controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerStats {
    pub controller: String,
    pub mode: AdmissionControlMode,
    /// Action type name to count
    pub rejection_count: BTreeMap<String, u64>,
    /// Effective rejection ratio, for ratio limited controllers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_ratio: Option<f64>,
}

impl ControllerStats {
    pub fn total_rejections(&self) -> u64 {
        self.rejection_count.values().sum()
    }
}

/// Node level admission control stats
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdmissionControlStats {
    pub node_id: String,
    pub timestamp: i64,
    pub transport_mode: AdmissionControlMode,
    pub controllers: Vec<ControllerStats>,
    /// Local resource signals
    pub resources: Vec<SamplerSnapshot>,
    /// Effective admission state per known node
    pub node_states: BTreeMap<String, AdmissionControllerState>,
    /// Averaged perf record per known node
    pub node_perf_stats: BTreeMap<String, NodePerfStats>,
}

/// Outcome of evaluating a request against the controllers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResponse {
    pub admitted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_rejections() {
        let stats = ControllerStats {
            controller: "global_cpu_usage".to_string(),
            mode: AdmissionControlMode::Monitor,
            rejection_count: BTreeMap::from([
                ("search".to_string(), 3),
                ("indexing".to_string(), 2),
            ]),
            rejection_ratio: None,
        };
        assert_eq!(stats.total_rejections(), 5);

        let json = serde_json::to_value(&stats).unwrap();
        assert!(json.get("rejection_ratio").is_none());
        assert_eq!(json["mode"], "monitor");
    }
}

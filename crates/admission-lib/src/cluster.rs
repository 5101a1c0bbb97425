//! Cluster membership view needed by the controllers

use std::sync::atomic::{AtomicBool, Ordering};

/// What admission control needs to know about the cluster
pub trait ClusterInfo: Send + Sync {
    fn local_node_id(&self) -> &str;

    /// Controllers admit everything until the node has joined a cluster
    fn is_cluster_state_ready(&self) -> bool;
}

/// Fixed node identity with a readiness flag flipped by the host
#[derive(Debug)]
pub struct StaticClusterInfo {
    node_id: String,
    ready: AtomicBool,
}

impl StaticClusterInfo {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            ready: AtomicBool::new(false),
        }
    }

    /// Node that is ready immediately
    pub fn ready(node_id: impl Into<String>) -> Self {
        let info = Self::new(node_id);
        info.set_ready(true);
        info
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }
}

impl ClusterInfo for StaticClusterInfo {
    fn local_node_id(&self) -> &str {
        &self.node_id
    }

    fn is_cluster_state_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

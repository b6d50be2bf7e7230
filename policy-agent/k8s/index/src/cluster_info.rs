use policy_agent_core::{node::DEFAULT_CLUSTER, LocalNode};
use std::sync::Arc;

/// Holds cluster metadata.
#[derive(Clone, Debug)]
pub struct ClusterInfo {
    /// The name of the cluster this agent belongs to.
    pub cluster_name: String,

    /// Uniquely identifies the cluster within a mesh of clusters.
    pub cluster_id: u32,

    /// The node this agent runs on.
    pub local: Arc<LocalNode>,
}

impl Default for ClusterInfo {
    fn default() -> Self {
        Self {
            cluster_name: DEFAULT_CLUSTER.to_string(),
            cluster_id: 0,
            local: Arc::new(LocalNode {
                cluster: DEFAULT_CLUSTER.to_string(),
                ..Default::default()
            }),
        }
    }
}

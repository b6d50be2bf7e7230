use super::{LocalNode, Node, NodeError, NodeIdentity, NodeRegistry};
use std::sync::Arc;
use tracing::debug;

/// Applies node changes read from the kvstore to the registry.
#[derive(Clone, Debug)]
pub struct NodeObserver {
    registry: Arc<NodeRegistry>,
    local: Arc<LocalNode>,
}

impl NodeObserver {
    pub fn new(registry: Arc<NodeRegistry>, local: Arc<LocalNode>) -> Self {
        Self { registry, local }
    }

    /// Handles a node written under `key`. Returns true if the node changed.
    pub fn on_kvstore_update(&self, key: &str, value: &[u8]) -> Result<bool, NodeError> {
        let mut node = Node::unmarshal(value)?;
        if node.key_name() != key {
            return Err(NodeError::KeyMismatch {
                key: key.to_string(),
                node: node.identity(),
            });
        }
        Ok(node.on_update(&self.local, &self.registry))
    }

    /// Handles the removal of the node stored under `key`.
    pub fn on_kvstore_delete(&self, key: &str) -> Result<Option<Node>, NodeError> {
        let NodeIdentity { name, cluster } = key.parse()?;
        let node = Node {
            name,
            cluster,
            ..Default::default()
        };
        let removed = node.on_delete(&self.registry);
        if removed.is_none() {
            debug!(%key, "Deleted node was not registered");
        }
        Ok(removed)
    }
}

use super::{Node, NodeIdentity, RouteTypes};
use ahash::AHashMap as HashMap;
use parking_lot::RwLock;
use std::net::IpAddr;
use tracing::{debug, info};

/// Every node known to this agent, with the routes installed towards it.
///
/// Nodes and routes share a lock so that removing a node and its routes is a single step.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    state: RwLock<State>,
}

#[derive(Clone, Debug)]
pub struct Registered {
    pub node: Node,
    pub routes: RouteTypes,

    /// The local address used as the source of direct routes to the node.
    pub own_addr: Option<IpAddr>,
}

#[derive(Debug, Default)]
struct State {
    nodes: HashMap<NodeIdentity, Registered>,
    routes: HashMap<NodeIdentity, RouteTypes>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes a node with the routes that should lead to it.
    ///
    /// Returns true if the node is new or its public attributes changed.
    pub fn update_node(&self, node: Node, routes: RouteTypes, own_addr: Option<IpAddr>) -> bool {
        let id = node.identity();
        let mut state = self.state.write();
        let changed = match state.nodes.get(&id) {
            Some(prev) => !prev.node.public_attr_equals(&node),
            None => true,
        };
        if changed {
            info!(node = %id, %routes, "Node updated");
        } else {
            debug!(node = %id, %routes, "Node unchanged");
        }
        state.routes.insert(id.clone(), routes);
        state.nodes.insert(
            id,
            Registered {
                node,
                routes,
                own_addr,
            },
        );
        changed
    }

    /// Removes a node and the given routes towards it.
    ///
    /// Routes that were installed but not named in `routes` are left in place.
    pub fn delete_node(&self, id: &NodeIdentity, routes: RouteTypes) -> Option<Node> {
        let mut state = self.state.write();
        let removed = state.nodes.remove(id).map(|r| r.node);
        if let Some(installed) = state.routes.get(id).copied() {
            let remaining = installed.difference(routes);
            if remaining.is_empty() {
                state.routes.remove(id);
            } else {
                state.routes.insert(id.clone(), remaining);
            }
        }
        if removed.is_some() {
            info!(node = %id, %routes, "Node deleted");
        }
        removed
    }

    pub fn get_node(&self, id: &NodeIdentity) -> Option<Node> {
        self.state.read().nodes.get(id).map(|r| r.node.clone())
    }

    pub fn get(&self, id: &NodeIdentity) -> Option<Registered> {
        self.state.read().nodes.get(id).cloned()
    }

    /// Lists all nodes, ordered by identity.
    pub fn nodes(&self) -> Vec<Node> {
        let state = self.state.read();
        let mut nodes = state.nodes.values().map(|r| r.node.clone()).collect::<Vec<_>>();
        nodes.sort_by_key(Node::identity);
        nodes
    }

    /// Routes currently installed towards a node, whether or not it is still registered.
    pub fn installed_routes(&self, id: &NodeIdentity) -> RouteTypes {
        self.state
            .read()
            .routes
            .get(id)
            .copied()
            .unwrap_or(RouteTypes::NONE)
    }

    pub fn delete_all(&self) {
        let mut state = self.state.write();
        state.nodes.clear();
        state.routes.clear();
    }

    pub fn len(&self) -> usize {
        self.state.read().nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().nodes.is_empty()
    }
}

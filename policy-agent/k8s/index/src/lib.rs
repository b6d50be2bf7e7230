//! Policy agent reconciliation
//!
//! The index keeps the agent's runtime stores consistent with the cluster objects it watches:
//!
//! - `CiliumNetworkPolicy` and `NetworkPolicy` objects are translated into policy rules. Every rule
//!   carries ownership labels derived from the object's namespace, name, and kind, so that all of
//!   an object's rules are replaced (or removed) together.
//! - `Pod` objects determine the derived labels of the endpoints that run them and the identity of
//!   their IPs in the IP cache.
//! - `Namespace` labels are exposed on the endpoints in the namespace.
//! - `Node` objects populate the node registry and the IP cache entries of cluster hosts.
//! - `Endpoints` objects are tracked per service.
//!
//! Watches are resynced periodically. On every resync, the index asks each kind which objects are
//! not yet reflected in the stores and only reconciles those, so that an unchanged cluster causes
//! no store writes.

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod cilium_network_policy;
mod cluster_info;
pub mod endpoints;
mod errors;
mod index;
pub mod metrics;
mod namespace;
mod network_policy;
mod node;
pub mod ownership;
mod pod;
pub mod reconciler;


pub use self::{
    cluster_info::ClusterInfo,
    errors::{ErrorLog, ERROR_LOG_TIMEOUT},
    index::{Index, SharedIndex, Stores},
    node::{
        node_from_k8s, CILIUM_HOST_IP_ANNOTATION, IPV4_HEALTH_IP_ANNOTATION,
        IPV4_POD_CIDR_ANNOTATION, IPV6_HEALTH_IP_ANNOTATION, IPV6_POD_CIDR_ANNOTATION,
    },
    reconciler::{PolicyError, PolicyObject, PolicyReconciler},
};

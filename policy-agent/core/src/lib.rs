#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod converge;
pub mod endpoint;
mod identity;
pub mod ipcache;
pub mod node;
pub mod policy;
mod source;
pub mod versioned;

pub use self::{
    converge::{missing, Reflect, Reflection},
    endpoint::{Endpoint, EndpointManager},
    identity::NumericIdentity,
    ipcache::IpCache,
    node::{LocalNode, Node, NodeIdentity, NodeRegistry, RouteTypes},
    policy::Repository,
    source::Source,
    versioned::{ResourceKey, Version, VersionedMap, VersionedObject},
};
pub use ipnet::IpNet;

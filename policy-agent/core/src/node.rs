//! Cluster nodes: how a node is addressed and how routing follows its lifecycle.

mod model;
mod observer;
mod registry;


pub use self::{
    model::{NodeAddressing, NodeAddressingElement, NodeElement},
    observer::NodeObserver,
    registry::{NodeRegistry, Registered},
};
use crate::Source;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    net::{IpAddr, Ipv6Addr},
    ops::BitOr,
    str::FromStr,
};
use tracing::debug;

/// The cluster name nodes belong to unless configured otherwise.
pub const DEFAULT_CLUSTER: &str = "default";

/// Identifies a node across clusters.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIdentity {
    pub name: String,
    pub cluster: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Node {
    #[serde(rename = "Name")]
    pub name: String,

    #[serde(rename = "Cluster")]
    pub cluster: String,

    #[serde(rename = "IPAddresses", default)]
    pub ip_addresses: Vec<Address>,

    /// The pool local endpoint IPv4 addresses are allocated from.
    #[serde(rename = "IPv4AllocCIDR", default)]
    pub ipv4_alloc_cidr: Option<IpNet>,

    /// The pool local endpoint IPv6 addresses are allocated from.
    #[serde(rename = "IPv6AllocCIDR", default)]
    pub ipv6_alloc_cidr: Option<IpNet>,

    /// The IPv4 address of the node's health endpoint.
    #[serde(rename = "IPv4HealthIP", default)]
    pub ipv4_health_ip: Option<IpAddr>,

    /// The IPv6 address of the node's health endpoint.
    #[serde(rename = "IPv6HealthIP", default)]
    pub ipv6_health_ip: Option<IpAddr>,

    #[serde(rename = "ClusterID", default)]
    pub cluster_id: u32,

    #[serde(rename = "Source", default)]
    pub source: Source,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Address {
    #[serde(rename = "Type")]
    pub address_type: AddressType,

    #[serde(rename = "IP")]
    pub ip: IpAddr,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(from = "String", into = "String")]
pub enum AddressType {
    InternalIp,
    ExternalIp,
    Hostname,
    InternalDns,
    ExternalDns,
    Other(String),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

/// How traffic to a node is routed.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct RouteTypes(u8);

/// The configuration of the node this agent runs on.
#[derive(Clone, Debug, Default)]
pub struct LocalNode {
    pub name: String,
    pub cluster: String,
    pub ipv6: Option<Ipv6Addr>,

    /// Whether direct IPv6 routes to other nodes are installed.
    pub auto_ipv6_node_routes: bool,

    /// The device IPv6 traffic is sent through.
    pub device: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("failed to encode node: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid node key {0:?}")]
    InvalidKey(String),

    #[error("node {node} was stored under key {key:?}")]
    KeyMismatch { key: String, node: NodeIdentity },
}

// === impl NodeIdentity ===

impl NodeIdentity {
    pub fn new(cluster: impl ToString, name: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            cluster: cluster.to_string(),
        }
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.cluster, self.name)
    }
}

impl FromStr for NodeIdentity {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((cluster, name))
                if !cluster.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(Self::new(cluster, name))
            }
            _ => Err(NodeError::InvalidKey(s.to_string())),
        }
    }
}

// === impl Node ===

impl Node {
    pub fn identity(&self) -> NodeIdentity {
        NodeIdentity::new(&self.cluster, &self.name)
    }

    /// The node's name, qualified by its cluster unless it is in the default cluster.
    pub fn fullname(&self) -> String {
        if self.cluster != DEFAULT_CLUSTER {
            return self.identity().to_string();
        }
        self.name.clone()
    }

    /// The key the node is stored under in the kvstore.
    ///
    /// This format is stable; changing it breaks nodes written by older agents.
    pub fn key_name(&self) -> String {
        self.identity().to_string()
    }

    pub fn is_local(&self, local: &LocalNode) -> bool {
        self.name == local.name
    }

    /// Selects the address that represents the node in the given family.
    ///
    /// An internal address wins outright. Otherwise the last external address is used, and
    /// failing that the first address of any other type.
    pub fn node_ip(&self, family: AddressFamily) -> Option<(IpAddr, AddressType)> {
        let mut backup: Option<&Address> = None;
        for addr in self.ip_addresses.iter().filter(|a| family.includes(&a.ip)) {
            match addr.address_type {
                AddressType::InternalIp => return Some((addr.ip, addr.address_type.clone())),
                AddressType::ExternalIp => backup = Some(addr),
                _ => {
                    if backup.is_none() {
                        backup = Some(addr);
                    }
                }
            }
        }
        backup.map(|a| (a.ip, a.address_type.clone()))
    }

    pub fn primary_ip(&self, family: AddressFamily) -> Option<IpAddr> {
        self.node_ip(family).map(|(ip, _)| ip)
    }

    /// Every address other than the family's primary one, in order.
    pub fn secondary_addresses(&self, family: AddressFamily) -> Vec<&Address> {
        let primary = self.primary_ip(family);
        self.ip_addresses
            .iter()
            .filter(|a| !ip_eq(Some(a.ip), primary))
            .collect()
    }

    /// Compares the attributes that are propagated to other nodes.
    ///
    /// Addresses are compared in order.
    pub fn public_attr_equals(&self, other: &Node) -> bool {
        self.name == other.name
            && self.cluster == other.cluster
            && ip_eq(self.ipv4_health_ip, other.ipv4_health_ip)
            && ip_eq(self.ipv6_health_ip, other.ipv6_health_ip)
            && self.cluster_id == other.cluster_id
            && self.source == other.source
            && self.ip_addresses.len() == other.ip_addresses.len()
            && self
                .ip_addresses
                .iter()
                .zip(&other.ip_addresses)
                .all(|(a, b)| a.address_type == b.address_type && ip_eq(Some(a.ip), Some(b.ip)))
            && net_eq(self.ipv4_alloc_cidr, other.ipv4_alloc_cidr)
            && net_eq(self.ipv6_alloc_cidr, other.ipv6_alloc_cidr)
    }

    /// Publishes a node learned from the kvstore.
    ///
    /// Returns true if the node's public attributes changed.
    pub fn on_update(&mut self, local: &LocalNode, registry: &NodeRegistry) -> bool {
        debug!(node = %self.identity(), "Updated node information received");

        let mut routes = RouteTypes::TUNNEL;
        let mut own_addr = None;
        let device = local.device.as_deref().filter(|d| *d != "undefined");
        if local.auto_ipv6_node_routes
            && device.is_some()
            && self.cluster != local.cluster
            && self.name != local.name
        {
            own_addr = local.ipv6.map(IpAddr::V6);
            routes = routes | RouteTypes::DIRECT;
        }

        self.source = Source::KvStore;
        registry.update_node(self.clone(), routes, own_addr)
    }

    /// Removes the node along with every kind of route that may lead to it.
    pub fn on_delete(&self, registry: &NodeRegistry) -> Option<Node> {
        registry.delete_node(&self.identity(), RouteTypes::TUNNEL | RouteTypes::DIRECT)
    }

    pub fn marshal(&self) -> Result<Vec<u8>, NodeError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn unmarshal(data: &[u8]) -> Result<Self, NodeError> {
        Ok(serde_json::from_slice(data)?)
    }
}

fn ip_eq(a: Option<IpAddr>, b: Option<IpAddr>) -> bool {
    a.map(|ip| ip.to_canonical()) == b.map(|ip| ip.to_canonical())
}

fn net_eq(a: Option<IpNet>, b: Option<IpNet>) -> bool {
    a.map(|n| n.trunc()) == b.map(|n| n.trunc())
}

// === impl AddressType ===

impl AddressType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::InternalIp => "InternalIP",
            Self::ExternalIp => "ExternalIP",
            Self::Hostname => "Hostname",
            Self::InternalDns => "InternalDNS",
            Self::ExternalDns => "ExternalDNS",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for AddressType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "InternalIP" => Self::InternalIp,
            "ExternalIP" => Self::ExternalIp,
            "Hostname" => Self::Hostname,
            "InternalDNS" => Self::InternalDns,
            "ExternalDNS" => Self::ExternalDns,
            _ => Self::Other(s),
        }
    }
}

impl From<&str> for AddressType {
    fn from(s: &str) -> Self {
        s.to_string().into()
    }
}

impl From<AddressType> for String {
    fn from(t: AddressType) -> Self {
        match t {
            AddressType::Other(s) => s,
            t => t.as_str().to_string(),
        }
    }
}

impl fmt::Display for AddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// === impl AddressFamily ===

impl AddressFamily {
    pub fn of(ip: &IpAddr) -> Self {
        if ip.to_canonical().is_ipv4() {
            Self::Ipv4
        } else {
            Self::Ipv6
        }
    }

    /// IPv4-mapped IPv6 addresses belong to the IPv4 family.
    pub fn includes(&self, ip: &IpAddr) -> bool {
        Self::of(ip) == *self
    }
}

// === impl RouteTypes ===

impl RouteTypes {
    pub const NONE: Self = Self(0);
    pub const TUNNEL: Self = Self(1 << 0);
    pub const DIRECT: Self = Self(1 << 1);

    pub fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn difference(&self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl BitOr for RouteTypes {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for RouteTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.contains(Self::TUNNEL), self.contains(Self::DIRECT)) {
            (false, false) => f.write_str("none"),
            (true, false) => f.write_str("tunnel"),
            (false, true) => f.write_str("direct"),
            (true, true) => f.write_str("tunnel,direct"),
        }
    }
}

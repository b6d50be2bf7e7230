//! The API view of a node.

use super::{AddressFamily, Node};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct NodeElement {
    pub name: String,
    pub primary_address: NodeAddressing,

    #[serde(default)]
    pub secondary_addresses: Vec<NodeAddressingElement>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_endpoint_address: Option<NodeAddressing>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct NodeAddressing {
    pub ipv4: NodeAddressingElement,
    pub ipv6: NodeAddressingElement,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct NodeAddressingElement {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ip: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub alloc_range: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub address_type: String,
}

impl Node {
    /// Describes the node as seen by an agent running the given address family.
    pub fn model(&self, family: AddressFamily) -> NodeElement {
        NodeElement {
            name: self.fullname(),
            primary_address: self.primary_addressing(family),
            secondary_addresses: self
                .secondary_addresses(family)
                .into_iter()
                .map(|a| NodeAddressingElement {
                    ip: a.ip.to_string(),
                    address_type: a.address_type.to_string(),
                    ..Default::default()
                })
                .collect(),
            health_endpoint_address: self.health_addressing(family),
        }
    }

    fn primary_addressing(&self, family: AddressFamily) -> NodeAddressing {
        let element = |f: AddressFamily, range: Option<String>| {
            let (ip, address_type) = self
                .node_ip(f)
                .map(|(ip, t)| (ip_string(ip), t.to_string()))
                .unwrap_or_default();
            NodeAddressingElement {
                enabled: f == family,
                ip,
                alloc_range: range.unwrap_or_default(),
                address_type,
            }
        };
        NodeAddressing {
            ipv4: element(
                AddressFamily::Ipv4,
                self.ipv4_alloc_cidr.map(|n| n.to_string()),
            ),
            ipv6: element(
                AddressFamily::Ipv6,
                self.ipv6_alloc_cidr.map(|n| n.to_string()),
            ),
        }
    }

    /// Health addressing is only reported once both health addresses are known.
    fn health_addressing(&self, family: AddressFamily) -> Option<NodeAddressing> {
        let v4 = self.ipv4_health_ip?;
        let v6 = self.ipv6_health_ip?;
        Some(NodeAddressing {
            ipv4: NodeAddressingElement {
                enabled: family == AddressFamily::Ipv4,
                ip: ip_string(v4),
                ..Default::default()
            },
            ipv6: NodeAddressingElement {
                enabled: family == AddressFamily::Ipv6,
                ip: ip_string(v6),
                ..Default::default()
            },
        })
    }
}

fn ip_string(ip: IpAddr) -> String {
    ip.to_canonical().to_string()
}

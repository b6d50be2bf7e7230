use crate::labels::{LabelArray, Selector};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// A policy rule: the endpoints it selects and the traffic they may send and receive.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub endpoint_selector: Selector,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ingress: Vec<IngressRule>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub egress: Vec<EgressRule>,

    /// Identifies the rule. Rules derived from cluster objects carry their owner's labels here.
    #[serde(default, skip_serializing_if = "LabelArray::is_empty")]
    pub labels: LabelArray,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressRule {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub from_endpoints: Vec<Selector>,

    #[serde(default, rename = "fromCIDR", skip_serializing_if = "Vec::is_empty")]
    pub from_cidr: Vec<String>,

    #[serde(default, rename = "fromCIDRSet", skip_serializing_if = "Vec::is_empty")]
    pub from_cidr_set: Vec<CidrRule>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub to_ports: Vec<PortRule>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EgressRule {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub to_endpoints: Vec<Selector>,

    #[serde(default, rename = "toCIDR", skip_serializing_if = "Vec::is_empty")]
    pub to_cidr: Vec<String>,

    #[serde(default, rename = "toCIDRSet", skip_serializing_if = "Vec::is_empty")]
    pub to_cidr_set: Vec<CidrRule>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub to_ports: Vec<PortRule>,
}

/// A CIDR with carved-out exceptions.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct CidrRule {
    pub cidr: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub except: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct PortRule {
    pub ports: Vec<PortProtocol>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct PortProtocol {
    pub port: String,

    #[serde(default)]
    pub protocol: Protocol,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    Tcp,
    Udp,
    #[default]
    Any,
}

#[derive(Debug, thiserror::Error)]
#[error("unsupported protocol: {0}")]
pub struct InvalidProtocol(pub String);

// === impl Rule ===

impl Rule {
    /// Every peer selector of the rule, in ingress-then-egress order.
    pub fn peer_selectors_mut(&mut self) -> impl Iterator<Item = &mut Selector> {
        let ingress = self
            .ingress
            .iter_mut()
            .flat_map(|r| r.from_endpoints.iter_mut());
        let egress = self.egress.iter_mut().flat_map(|r| r.to_endpoints.iter_mut());
        ingress.chain(egress)
    }

    pub fn peer_selectors(&self) -> impl Iterator<Item = &Selector> {
        let ingress = self.ingress.iter().flat_map(|r| r.from_endpoints.iter());
        let egress = self.egress.iter().flat_map(|r| r.to_endpoints.iter());
        ingress.chain(egress)
    }
}

// === impl Protocol ===

impl FromStr for Protocol {
    type Err = InvalidProtocol;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("tcp") {
            Ok(Self::Tcp)
        } else if s.eq_ignore_ascii_case("udp") {
            Ok(Self::Udp)
        } else if s.eq_ignore_ascii_case("any") {
            Ok(Self::Any)
        } else {
            Err(InvalidProtocol(s.to_string()))
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => f.write_str("TCP"),
            Self::Udp => f.write_str("UDP"),
            Self::Any => f.write_str("ANY"),
        }
    }
}

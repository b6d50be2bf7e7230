//! Publishes cluster nodes into the node registry and the IP cache.

use crate::{ClusterInfo, Index};
use anyhow::{Context, Result};
use kubert::index::{ClusterRemoved, IndexClusterResource};
use policy_agent_core::{
    ipcache::Identity,
    node::{Address, AddressFamily, AddressType},
    IpNet, Node, NodeIdentity, NumericIdentity, Reflect, Reflection, ResourceKey, RouteTypes,
    Source,
};
use policy_agent_k8s_api::{self as k8s, ResourceExt};
use std::net::IpAddr;
use tracing::{debug, instrument, trace};

/// The address of the node's host interface.
pub const CILIUM_HOST_IP_ANNOTATION: &str = "io.cilium.network.ipv4-cilium-host";

pub const IPV4_POD_CIDR_ANNOTATION: &str = "io.cilium.network.ipv4-pod-cidr";
pub const IPV6_POD_CIDR_ANNOTATION: &str = "io.cilium.network.ipv6-pod-cidr";
pub const IPV4_HEALTH_IP_ANNOTATION: &str = "io.cilium.network.ipv4-health-ip";
pub const IPV6_HEALTH_IP_ANNOTATION: &str = "io.cilium.network.ipv6-health-ip";

/// Builds the agent's view of a cluster node.
pub fn node_from_k8s(node: &k8s::Node, cluster: &ClusterInfo) -> Result<Node> {
    let name = node.name_any();

    let mut ip_addresses = Vec::new();
    for addr in node
        .status
        .iter()
        .flat_map(|status| status.addresses.iter().flatten())
    {
        match addr.address.parse::<IpAddr>() {
            Ok(ip) => ip_addresses.push(Address {
                address_type: addr.type_.as_str().into(),
                ip,
            }),
            Err(_) => trace!(%name, address = %addr.address, "Skipping non-IP address"),
        }
    }

    if let Some(host_ip) = annotated_host_ip(node)? {
        let listed = ip_addresses
            .iter()
            .any(|a| a.ip.to_canonical() == host_ip.to_canonical());
        if !listed {
            ip_addresses.insert(
                0,
                Address {
                    address_type: AddressType::InternalIp,
                    ip: host_ip,
                },
            );
        }
    }

    let spec_cidrs = node
        .spec
        .iter()
        .flat_map(|spec| {
            spec.pod_cidrs
                .iter()
                .flatten()
                .chain(spec.pod_cidr.as_ref())
        })
        .map(|cidr| {
            cidr.parse::<IpNet>()
                .with_context(|| format!("invalid pod CIDR {cidr:?}"))
        })
        .collect::<Result<Vec<_>>>()?;
    let alloc_cidr = |family: AddressFamily, annotation: &str| -> Result<Option<IpNet>> {
        if let Some(cidr) = spec_cidrs
            .iter()
            .find(|net| family.includes(&net.addr()))
        {
            return Ok(Some(cidr.trunc()));
        }
        annotation_value(node, annotation)
    };

    Ok(Node {
        name,
        cluster: cluster.cluster_name.clone(),
        ip_addresses,
        ipv4_alloc_cidr: alloc_cidr(AddressFamily::Ipv4, IPV4_POD_CIDR_ANNOTATION)?,
        ipv6_alloc_cidr: alloc_cidr(AddressFamily::Ipv6, IPV6_POD_CIDR_ANNOTATION)?,
        ipv4_health_ip: annotation_value(node, IPV4_HEALTH_IP_ANNOTATION)?,
        ipv6_health_ip: annotation_value(node, IPV6_HEALTH_IP_ANNOTATION)?,
        cluster_id: cluster.cluster_id,
        source: Source::Kubernetes,
    })
}

fn annotated_host_ip(node: &k8s::Node) -> Result<Option<IpAddr>> {
    annotation_value(node, CILIUM_HOST_IP_ANNOTATION)
}

fn annotation_value<T>(node: &k8s::Node, annotation: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    node.annotations()
        .get(annotation)
        .map(|v| {
            v.parse()
                .with_context(|| format!("invalid {annotation} annotation {v:?}"))
        })
        .transpose()
}

impl Reflect<k8s::Node> for Index {
    fn reflection(&self, node: &k8s::Node) -> Reflection {
        let Some(raw) = node.annotations().get(CILIUM_HOST_IP_ANNOTATION) else {
            return Reflection::NotApplicable;
        };
        let Ok(host_ip) = raw.parse::<IpAddr>() else {
            return Reflection::NeedsWork;
        };
        if self.stores.ipcache.lookup_by_ip(&host_ip).is_none() {
            return Reflection::NeedsWork;
        }

        let id = NodeIdentity::new(&self.cluster_info.cluster_name, node.name_any());
        let primary = self
            .stores
            .nodes
            .get_node(&id)
            .and_then(|n| n.primary_ip(AddressFamily::of(&host_ip)));
        match primary {
            Some(ip) if ip.to_canonical() == host_ip.to_canonical() => Reflection::Reflected,
            _ => Reflection::NeedsWork,
        }
    }
}

impl IndexClusterResource<k8s::Node> for Index {
    fn apply(&mut self, node: k8s::Node) {
        self.track_node_host_ip(&node);
        if let Err(error) = self.reconcile_node(&node) {
            self.log_error(&ResourceKey::from_resource(&node), &error);
        }
    }

    fn delete(&mut self, name: String) {
        let node = Node {
            name: name.clone(),
            cluster: self.cluster_info.cluster_name.clone(),
            ..Default::default()
        };
        let removed = node.on_delete(&self.stores.nodes).is_some();
        debug!(%name, removed, "Deleted node");

        if let Some(ip) = self.node_host_ips.remove(&name) {
            self.stores.ipcache.delete(&ip, Source::Kubernetes);
        }
    }

    fn reset(&mut self, nodes: Vec<k8s::Node>, removed: ClusterRemoved) {
        for node in &nodes {
            self.track_node_host_ip(node);
        }
        if self
            .reconcile_missing(nodes, |idx, node| idx.reconcile_node(&node))
            .is_err()
        {
            debug!("Some nodes could not be reconciled");
        }
        for name in removed {
            <Self as IndexClusterResource<k8s::Node>>::delete(self, name);
        }
    }
}

impl Index {
    fn track_node_host_ip(&mut self, node: &k8s::Node) {
        let name = node.name_any();
        let prev = match annotated_host_ip(node).ok().flatten() {
            Some(ip) => self
                .node_host_ips
                .insert(name.clone(), ip)
                .filter(|prev| *prev != ip),
            None => self.node_host_ips.remove(&name),
        };
        if let Some(ip) = prev {
            let deleted = self.stores.ipcache.delete(&ip, Source::Kubernetes);
            debug!(%name, %ip, deleted, "Removed stale host IP");
        }
    }

    #[instrument(skip_all, fields(name = %node.name_any()))]
    fn reconcile_node(&mut self, node: &k8s::Node) -> Result<()> {
        let published = node_from_k8s(node, &self.cluster_info)
            .with_context(|| format!("failed to parse node {}", node.name_any()))?;

        if let Some(host_ip) = annotated_host_ip(node)? {
            let identity = Identity {
                id: NumericIdentity::HOST,
                source: Source::Kubernetes,
            };
            self.stores.ipcache.upsert(host_ip, None, identity);
        }

        let changed = self
            .stores
            .nodes
            .update_node(published, RouteTypes::TUNNEL, None);
        debug!(changed, "Published node");
        Ok(())
    }
}

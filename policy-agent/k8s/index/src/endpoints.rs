//! Tracks the ready backends of each service.

use crate::Index;
use anyhow::Result;
use kubert::index::{IndexNamespacedResource, NamespacedRemoved};
use policy_agent_core::{Reflect, Reflection, ResourceKey};
use policy_agent_k8s_api::{policy::Protocol, Endpoints, ResourceExt};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    net::IpAddr,
};
use tracing::{debug, instrument, trace};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceRef {
    pub namespace: String,
    pub name: String,
}

/// A layer 4 port.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct L4Addr {
    pub protocol: Protocol,
    pub port: u16,
}

/// The ready backends of a service and the ports they serve, keyed by port name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceEndpoints {
    pub backend_ips: BTreeSet<IpAddr>,
    pub ports: BTreeMap<String, L4Addr>,
}

impl fmt::Display for ServiceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Extracts the ready addresses and ports of an `Endpoints` object.
///
/// Addresses that are not ready, or are not IPs, are ignored. Ports with an unknown protocol or
/// out of range are skipped.
pub fn parse_endpoints(endpoints: &Endpoints) -> (ServiceRef, ServiceEndpoints) {
    let svc = ServiceRef {
        namespace: endpoints.namespace().unwrap_or_default(),
        name: endpoints.name_any(),
    };

    let mut parsed = ServiceEndpoints::default();
    for subset in endpoints.subsets.iter().flatten() {
        for addr in subset.addresses.iter().flatten() {
            match addr.ip.parse::<IpAddr>() {
                Ok(ip) => {
                    parsed.backend_ips.insert(ip);
                }
                Err(_) => trace!(%svc, ip = %addr.ip, "Skipping invalid address"),
            }
        }

        for port in subset.ports.iter().flatten() {
            let protocol = match port.protocol.as_deref() {
                None => Protocol::Tcp,
                Some(p) => match p.parse() {
                    Ok(p) => p,
                    Err(error) => {
                        debug!(%svc, %error, "Skipping port");
                        continue;
                    }
                },
            };
            let Ok(port_num) = u16::try_from(port.port) else {
                debug!(%svc, port = port.port, "Skipping out-of-range port");
                continue;
            };
            parsed.ports.insert(
                port.name.clone().unwrap_or_default(),
                L4Addr {
                    protocol,
                    port: port_num,
                },
            );
        }
    }

    (svc, parsed)
}

impl Reflect<Endpoints> for Index {
    fn reflection(&self, endpoints: &Endpoints) -> Reflection {
        let (svc, parsed) = parse_endpoints(endpoints);
        if self.services.get(&svc) == Some(&parsed) {
            Reflection::Reflected
        } else {
            Reflection::NeedsWork
        }
    }
}

impl IndexNamespacedResource<Endpoints> for Index {
    fn apply(&mut self, endpoints: Endpoints) {
        if self.reflection(&endpoints) == Reflection::Reflected {
            debug!(ns = ?endpoints.namespace(), name = %endpoints.name_any(), "Service endpoints unchanged");
            return;
        }
        if let Err(error) = self.reconcile_endpoints(&endpoints) {
            self.log_error(&ResourceKey::from_resource(&endpoints), &error);
        }
    }

    fn delete(&mut self, namespace: String, name: String) {
        let svc = ServiceRef { namespace, name };
        if self.services.remove(&svc).is_some() {
            debug!(%svc, "Removed service endpoints");
        }
    }

    fn reset(&mut self, endpoints: Vec<Endpoints>, removed: NamespacedRemoved) {
        if self
            .reconcile_missing(endpoints, |idx, ep| idx.reconcile_endpoints(&ep))
            .is_err()
        {
            debug!("Some service endpoints could not be reconciled");
        }
        for (namespace, names) in removed {
            for name in names {
                <Self as IndexNamespacedResource<Endpoints>>::delete(self, namespace.clone(), name);
            }
        }
    }
}

impl Index {
    #[instrument(skip_all, fields(ns = ?endpoints.namespace(), name = %endpoints.name_any()))]
    fn reconcile_endpoints(&mut self, endpoints: &Endpoints) -> Result<()> {
        let (svc, parsed) = parse_endpoints(endpoints);
        debug!(
            backends = parsed.backend_ips.len(),
            ports = parsed.ports.len(),
            "Updated service endpoints"
        );
        self.services.insert(svc, parsed);
        Ok(())
    }
}

//! Correlates pods with the endpoints that run them and the IP cache.

use crate::{
    namespace::{is_namespace_scoped, namespace_scoped_labels, with_namespace_labels},
    Index,
};
use anyhow::{anyhow, Result};
use kubert::index::{IndexNamespacedResource, NamespacedRemoved};
use policy_agent_core::{ipcache::Identity, NumericIdentity, Reflect, Reflection, ResourceKey, Source};
use policy_agent_k8s_api::{labels::SOURCE_K8S, LabelArray, Pod, ResourceExt};
use std::net::IpAddr;
use tracing::{debug, instrument};

fn pod_ip(pod: &Pod) -> Option<IpAddr> {
    pod.status.as_ref()?.pod_ip.as_deref()?.parse().ok()
}

fn host_ip(pod: &Pod) -> Option<IpAddr> {
    pod.status.as_ref()?.host_ip.as_deref()?.parse().ok()
}

fn pod_labels(pod: &Pod) -> LabelArray {
    LabelArray::from_map(pod.labels(), SOURCE_K8S)
}

impl Reflect<Pod> for Index {
    fn reflection(&self, pod: &Pod) -> Reflection {
        let Some(ip) = pod_ip(pod) else {
            return Reflection::NotApplicable;
        };
        if self.stores.ipcache.lookup_by_ip(&ip).is_none() {
            return Reflection::NeedsWork;
        }

        let namespace = pod.namespace().unwrap_or_default();
        let Some(ep) = self.stores.endpoints.lookup_pod(&namespace, &pod.name_any()) else {
            return Reflection::NotApplicable;
        };

        let derived = &ep.labels.orchestration_identity;
        if !derived
            .filter(|l| !is_namespace_scoped(l))
            .same_set(&pod_labels(pod))
        {
            return Reflection::NeedsWork;
        }
        if let Some(ns_labels) = self.namespace_labels.get(&namespace) {
            if !derived
                .filter(is_namespace_scoped)
                .same_set(&namespace_scoped_labels(ns_labels))
            {
                return Reflection::NeedsWork;
            }
        }
        Reflection::Reflected
    }
}

impl IndexNamespacedResource<Pod> for Index {
    fn apply(&mut self, pod: Pod) {
        self.track_pod_ip(&pod);
        if self.reflection(&pod) == Reflection::Reflected {
            debug!(ns = ?pod.namespace(), name = %pod.name_any(), "Pod already reflected");
            return;
        }
        if let Err(error) = self.reconcile_pod(&pod) {
            self.log_error(&ResourceKey::from_resource(&pod), &error);
        }
    }

    fn delete(&mut self, namespace: String, name: String) {
        let key = ResourceKey::namespaced(namespace, name);
        if let Some(ip) = self.pod_ips.remove(&key) {
            let deleted = self.stores.ipcache.delete(&ip, Source::Kubernetes);
            debug!(%key, %ip, deleted, "Removed pod IP");
        }
    }

    fn reset(&mut self, pods: Vec<Pod>, removed: NamespacedRemoved) {
        for pod in &pods {
            self.track_pod_ip(pod);
        }
        if self
            .reconcile_missing(pods, |idx, pod| idx.reconcile_pod(&pod))
            .is_err()
        {
            debug!("Some pods could not be reconciled");
        }
        for (namespace, names) in removed {
            for name in names {
                <Self as IndexNamespacedResource<Pod>>::delete(self, namespace.clone(), name);
            }
        }
    }
}

impl Index {
    /// Remembers the pod's IP so that its cache entry can be removed later. A previous IP that
    /// the pod no longer holds is removed from the cache.
    fn track_pod_ip(&mut self, pod: &Pod) {
        let key = ResourceKey::from_resource(pod);
        let prev = match pod_ip(pod) {
            Some(ip) => self.pod_ips.insert(key.clone(), ip).filter(|prev| *prev != ip),
            None => self.pod_ips.remove(&key),
        };
        if let Some(ip) = prev {
            let deleted = self.stores.ipcache.delete(&ip, Source::Kubernetes);
            debug!(%key, %ip, deleted, "Removed stale pod IP");
        }
    }

    #[instrument(skip_all, fields(ns = ?pod.namespace(), name = %pod.name_any()))]
    fn reconcile_pod(&mut self, pod: &Pod) -> Result<()> {
        let name = pod.name_any();
        let namespace = pod
            .namespace()
            .ok_or_else(|| anyhow!("pod {name} is not namespaced"))?;

        let labels = pod_labels(pod);
        let ns_labels = self.namespace_labels.get(&namespace).map(namespace_scoped_labels);
        let updated = self
            .stores
            .endpoints
            .update_pod_labels(&namespace, &name, |current| {
                // Without namespace labels, keep whatever the endpoint already carries.
                let ns_labels = ns_labels.unwrap_or_else(|| current.filter(is_namespace_scoped));
                with_namespace_labels(&labels, &ns_labels)
            });
        debug!(?updated, "Updated endpoint pod labels");

        let Some(ip) = pod_ip(pod) else {
            return Ok(());
        };
        let id = self
            .stores
            .endpoints
            .lookup_pod(&namespace, &name)
            .map(|ep| ep.identity)
            .unwrap_or(NumericIdentity::INIT);
        let identity = Identity {
            id,
            source: Source::Kubernetes,
        };
        self.stores.ipcache.upsert(ip, host_ip(pod), identity);
        Ok(())
    }
}

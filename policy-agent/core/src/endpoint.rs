//! Locally managed workload endpoints.

use crate::NumericIdentity;
use ahash::AHashMap as HashMap;
use parking_lot::RwLock;
use policy_agent_k8s_api::LabelArray;
use std::net::{Ipv4Addr, Ipv6Addr};
use tracing::debug;

/// Labels an endpoint's identity is derived from.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OpLabels {
    /// Labels derived from the endpoint's pod and namespace.
    pub orchestration_identity: LabelArray,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    pub id: u16,
    pub identity: NumericIdentity,
    pub ipv4: Option<Ipv4Addr>,
    pub ipv6: Option<Ipv6Addr>,
    pub pod_name: Option<String>,
    pub namespace: Option<String>,
    pub labels: OpLabels,
}

/// Holds all endpoints managed by this agent.
#[derive(Debug, Default)]
pub struct EndpointManager {
    endpoints: RwLock<HashMap<u16, Endpoint>>,
}

// === impl Endpoint ===

impl Endpoint {
    pub fn new(id: u16, identity: NumericIdentity) -> Self {
        Self {
            id,
            identity,
            ipv4: None,
            ipv6: None,
            pod_name: None,
            namespace: None,
            labels: OpLabels::default(),
        }
    }

    pub fn with_pod(mut self, namespace: impl ToString, name: impl ToString) -> Self {
        self.namespace = Some(namespace.to_string());
        self.pod_name = Some(name.to_string());
        self
    }

    pub fn with_namespace(mut self, namespace: impl ToString) -> Self {
        self.namespace = Some(namespace.to_string());
        self
    }

    pub fn with_labels(mut self, labels: LabelArray) -> Self {
        self.labels.orchestration_identity = labels;
        self
    }

    pub fn is_pod(&self, namespace: &str, name: &str) -> bool {
        self.namespace.as_deref() == Some(namespace) && self.pod_name.as_deref() == Some(name)
    }

    pub fn in_namespace(&self, namespace: &str) -> bool {
        self.namespace.as_deref() == Some(namespace)
    }
}

// === impl EndpointManager ===

impl EndpointManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, ep: Endpoint) -> Option<Endpoint> {
        debug!(id = ep.id, identity = %ep.identity, "Inserting endpoint");
        self.endpoints.write().insert(ep.id, ep)
    }

    pub fn remove(&self, id: u16) -> Option<Endpoint> {
        self.endpoints.write().remove(&id)
    }

    pub fn remove_all(&self) {
        self.endpoints.write().clear();
    }

    pub fn get(&self, id: u16) -> Option<Endpoint> {
        self.endpoints.read().get(&id).cloned()
    }

    /// Finds the endpoint running the given pod.
    pub fn lookup_pod(&self, namespace: &str, name: &str) -> Option<Endpoint> {
        self.endpoints
            .read()
            .values()
            .find(|ep| ep.is_pod(namespace, name))
            .cloned()
    }

    /// Lists the endpoints in a namespace, ordered by ID.
    pub fn in_namespace(&self, namespace: &str) -> Vec<Endpoint> {
        let mut eps = self
            .endpoints
            .read()
            .values()
            .filter(|ep| ep.in_namespace(namespace))
            .cloned()
            .collect::<Vec<_>>();
        eps.sort_by_key(|ep| ep.id);
        eps
    }

    /// Lists all endpoints, ordered by ID.
    pub fn all(&self) -> Vec<Endpoint> {
        let mut eps = self.endpoints.read().values().cloned().collect::<Vec<_>>();
        eps.sort_by_key(|ep| ep.id);
        eps
    }

    pub fn len(&self) -> usize {
        self.endpoints.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.read().is_empty()
    }

    /// Rewrites the derived labels of an endpoint.
    ///
    /// Returns false if the endpoint does not exist or its labels were unchanged.
    pub fn update_labels(&self, id: u16, f: impl FnOnce(&LabelArray) -> LabelArray) -> bool {
        let mut endpoints = self.endpoints.write();
        match endpoints.get_mut(&id) {
            Some(ep) => Self::rewrite(ep, f),
            None => false,
        }
    }

    /// Rewrites the derived labels of the endpoint running a pod.
    ///
    /// Returns `None` if no endpoint runs the pod, or whether the labels changed. The lookup and
    /// the update happen under a single lock.
    pub fn update_pod_labels(
        &self,
        namespace: &str,
        name: &str,
        f: impl FnOnce(&LabelArray) -> LabelArray,
    ) -> Option<bool> {
        let mut endpoints = self.endpoints.write();
        let ep = endpoints.values_mut().find(|ep| ep.is_pod(namespace, name))?;
        Some(Self::rewrite(ep, f))
    }

    /// Rewrites the derived labels of every endpoint in a namespace, returning how many changed.
    pub fn update_namespace_labels(
        &self,
        namespace: &str,
        f: impl Fn(&LabelArray) -> LabelArray,
    ) -> usize {
        let mut endpoints = self.endpoints.write();
        endpoints
            .values_mut()
            .filter(|ep| ep.in_namespace(namespace))
            .map(|ep| Self::rewrite(ep, &f))
            .filter(|changed| *changed)
            .count()
    }

    fn rewrite(ep: &mut Endpoint, f: impl FnOnce(&LabelArray) -> LabelArray) -> bool {
        let labels = f(&ep.labels.orchestration_identity);
        if labels == ep.labels.orchestration_identity {
            return false;
        }
        debug!(id = ep.id, %labels, "Updated endpoint labels");
        ep.labels.orchestration_identity = labels;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(ls: &[&str]) -> LabelArray {
        LabelArray::parse(ls.iter().copied()).unwrap()
    }

    #[test]
    fn lookup_by_pod() {
        let eps = EndpointManager::new();
        eps.insert(Endpoint::new(1, NumericIdentity(1000)).with_pod("bar", "foo"));
        eps.insert(Endpoint::new(2, NumericIdentity(1001)).with_namespace("bar"));

        assert_eq!(eps.lookup_pod("bar", "foo").map(|ep| ep.id), Some(1));
        assert!(eps.lookup_pod("foo", "bar").is_none());
        assert_eq!(
            eps.in_namespace("bar").iter().map(|ep| ep.id).collect::<Vec<_>>(),
            vec![1, 2]
        );
    }

    #[test]
    fn update_pod_labels() {
        let eps = EndpointManager::new();
        eps.insert(Endpoint::new(1, NumericIdentity(1000)).with_pod("bar", "foo"));

        assert_eq!(eps.update_pod_labels("bar", "baz", |l| l.clone()), None);
        assert_eq!(
            eps.update_pod_labels("bar", "foo", |_| labels(&["k8s:app=web"])),
            Some(true)
        );
        assert_eq!(
            eps.update_pod_labels("bar", "foo", |_| labels(&["k8s:app=web"])),
            Some(false)
        );
        assert_eq!(
            eps.get(1).unwrap().labels.orchestration_identity,
            labels(&["k8s:app=web"])
        );
    }

    #[test]
    fn update_namespace_labels_counts_changes() {
        let eps = EndpointManager::new();
        eps.insert(Endpoint::new(1, NumericIdentity(1000)).with_namespace("ns"));
        eps.insert(
            Endpoint::new(2, NumericIdentity(1001))
                .with_namespace("ns")
                .with_labels(labels(&["k8s:a=1"])),
        );
        eps.insert(Endpoint::new(3, NumericIdentity(1002)).with_namespace("other"));

        let changed = eps.update_namespace_labels("ns", |_| labels(&["k8s:a=1"]));
        assert_eq!(changed, 1);
        assert!(eps.get(3).unwrap().labels.orchestration_identity.is_empty());
    }
}

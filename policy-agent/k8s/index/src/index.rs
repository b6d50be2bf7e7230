use crate::{
    endpoints::{ServiceEndpoints, ServiceRef},
    errors::ErrorLog,
    reconciler::PolicyReconciler,
    ClusterInfo,
};
use ahash::AHashMap as HashMap;
use anyhow::Result;
use parking_lot::RwLock;
use policy_agent_core::{
    converge, EndpointManager, IpCache, NodeRegistry, Reflect, Repository, ResourceKey,
    VersionedMap,
};
use policy_agent_k8s_api::{Labels, Resource};
use std::{net::IpAddr, sync::Arc, time::Instant};
use tracing::{debug, warn};

pub type SharedIndex = Arc<RwLock<Index>>;

/// The agent's runtime stores.
///
/// Each store is shared with the rest of the agent and synchronizes access internally.
#[derive(Clone, Debug, Default)]
pub struct Stores {
    pub policy: Arc<Repository>,
    pub ipcache: Arc<IpCache>,
    pub endpoints: Arc<EndpointManager>,
    pub nodes: Arc<NodeRegistry>,
}

/// Holds all indexing state. Owned and updated by the tasks that process watch events.
#[derive(Debug)]
pub struct Index {
    pub(crate) cluster_info: Arc<ClusterInfo>,
    pub(crate) stores: Stores,
    pub(crate) policy: PolicyReconciler,

    /// The labels of every known namespace.
    pub(crate) namespace_labels: HashMap<String, Labels>,

    /// Pod IPs written to the IP cache, so they can be removed when the pod is deleted.
    pub(crate) pod_ips: HashMap<ResourceKey, IpAddr>,

    /// Node host IPs written to the IP cache, by node name.
    pub(crate) node_host_ips: HashMap<String, IpAddr>,

    pub(crate) services: HashMap<ServiceRef, ServiceEndpoints>,

    errors: ErrorLog,
}

// === impl Index ===

impl Index {
    pub fn new(cluster_info: impl Into<Arc<ClusterInfo>>, stores: Stores) -> Self {
        Self {
            cluster_info: cluster_info.into(),
            policy: PolicyReconciler::new(stores.policy.clone()),
            stores,
            namespace_labels: HashMap::default(),
            pod_ips: HashMap::default(),
            node_host_ips: HashMap::default(),
            services: HashMap::default(),
            errors: ErrorLog::default(),
        }
    }

    pub fn shared(cluster_info: impl Into<Arc<ClusterInfo>>, stores: Stores) -> SharedIndex {
        Arc::new(RwLock::new(Self::new(cluster_info, stores)))
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn cluster_info(&self) -> &ClusterInfo {
        &self.cluster_info
    }

    pub fn services(&self) -> impl Iterator<Item = (&ServiceRef, &ServiceEndpoints)> {
        self.services.iter()
    }

    pub fn namespace_labels(&self, namespace: &str) -> Option<&Labels> {
        self.namespace_labels.get(namespace)
    }

    /// Returns the subset of `resources` that is not reflected in the stores yet.
    pub fn missing<T>(&self, resources: Vec<T>) -> VersionedMap<T>
    where
        T: Resource + Clone,
        Self: Reflect<T>,
    {
        let observed = VersionedMap::from_resources(resources);
        let missing = converge::missing(&observed, self);
        debug!(
            observed = observed.len(),
            missing = missing.len(),
            "Computed unreflected objects"
        );
        missing
    }

    /// Reconciles the objects of a resync that are not reflected yet.
    ///
    /// Every object is attempted; the last error is returned.
    pub(crate) fn reconcile_missing<T>(
        &mut self,
        resources: Vec<T>,
        mut reconcile: impl FnMut(&mut Self, T) -> Result<()>,
    ) -> Result<()>
    where
        T: Resource + Clone,
        Self: Reflect<T>,
    {
        let mut result = Ok(());
        for (key, obj) in self.missing(resources) {
            if let Err(error) = reconcile(self, obj.data) {
                self.log_error(&key, &error);
                result = Err(error);
            }
        }
        result
    }

    /// Logs a reconciliation failure unless the same failure was logged recently.
    pub(crate) fn log_error(&mut self, key: &ResourceKey, error: &anyhow::Error) {
        let error = format!("{error:#}");
        if self.errors.should_log(&format!("{key}: {error}"), Instant::now()) {
            warn!(%key, %error, "Failed to reconcile");
        }
    }
}

//! Exposes namespace labels on the endpoints in each namespace.

use crate::Index;
use anyhow::Result;
use kubert::index::{ClusterRemoved, IndexClusterResource};
use policy_agent_core::{Reflect, Reflection, ResourceKey};
use policy_agent_k8s_api::{
    labels::{NAMESPACE_LABELS_PREFIX, SOURCE_K8S},
    Label, LabelArray, Labels, Namespace, ResourceExt,
};
use tracing::{debug, instrument};

/// Returns true for labels copied onto an endpoint from its namespace.
pub(crate) fn is_namespace_scoped(label: &Label) -> bool {
    label
        .key
        .strip_prefix(NAMESPACE_LABELS_PREFIX)
        .is_some_and(|rest| rest.starts_with('.'))
}

/// The labels of a namespace as they appear on the endpoints in it.
pub(crate) fn namespace_scoped_labels(labels: &Labels) -> LabelArray {
    labels
        .iter()
        .map(|(k, v)| Label::new(format!("{NAMESPACE_LABELS_PREFIX}.{k}"), v, SOURCE_K8S))
        .collect()
}

/// Replaces the namespace-scoped part of an endpoint's derived labels.
pub(crate) fn with_namespace_labels(current: &LabelArray, ns_labels: &LabelArray) -> LabelArray {
    let mut labels = current.filter(|l| !is_namespace_scoped(l));
    labels.extend(ns_labels.iter().cloned());
    labels
}

impl Reflect<Namespace> for Index {
    fn reflection(&self, ns: &Namespace) -> Reflection {
        let endpoints = self.stores.endpoints.in_namespace(&ns.name_any());
        if endpoints.is_empty() {
            return Reflection::NotApplicable;
        }

        let expected = namespace_scoped_labels(&Labels::from_meta(ns.metadata.labels.as_ref()));
        let reflected = endpoints.iter().all(|ep| {
            ep.labels
                .orchestration_identity
                .filter(is_namespace_scoped)
                .same_set(&expected)
        });
        if reflected {
            Reflection::Reflected
        } else {
            Reflection::NeedsWork
        }
    }
}

impl IndexClusterResource<Namespace> for Index {
    fn apply(&mut self, ns: Namespace) {
        self.track_namespace(&ns);
        if self.reflection(&ns) == Reflection::Reflected {
            debug!(name = %ns.name_any(), "Namespace labels already reflected");
            return;
        }
        if let Err(error) = self.reconcile_namespace(&ns) {
            self.log_error(&ResourceKey::from_resource(&ns), &error);
        }
    }

    fn delete(&mut self, name: String) {
        if self.namespace_labels.remove(&name).is_some() {
            debug!(%name, "Forgot namespace labels");
        }
    }

    fn reset(&mut self, namespaces: Vec<Namespace>, removed: ClusterRemoved) {
        for ns in &namespaces {
            self.track_namespace(ns);
        }
        if self
            .reconcile_missing(namespaces, |idx, ns| idx.reconcile_namespace(&ns))
            .is_err()
        {
            debug!("Some namespaces could not be reconciled");
        }
        for name in removed {
            <Self as IndexClusterResource<Namespace>>::delete(self, name);
        }
    }
}

impl Index {
    fn track_namespace(&mut self, ns: &Namespace) {
        self.namespace_labels.insert(
            ns.name_any(),
            Labels::from_meta(ns.metadata.labels.as_ref()),
        );
    }

    #[instrument(skip_all, fields(name = %ns.name_any()))]
    fn reconcile_namespace(&mut self, ns: &Namespace) -> Result<()> {
        let name = ns.name_any();
        let expected = namespace_scoped_labels(&Labels::from_meta(ns.metadata.labels.as_ref()));
        let updated = self
            .stores
            .endpoints
            .update_namespace_labels(&name, |current| with_namespace_labels(current, &expected));
        debug!(updated, "Updated endpoint namespace labels");
        Ok(())
    }
}

//! Applies policy objects to the rule repository.

use crate::{
    ownership::{merge_labels, ownership_labels, scope_to_namespace},
    Index,
};
use anyhow::{Context, Result};
use kubert::index::NamespacedRemoved;
use policy_agent_core::{
    policy::{Replaced, Repository, RuleError},
    Reflect, Reflection, ResourceKey,
};
use policy_agent_k8s_api::{
    labels::ParseLabelError,
    policy::{InvalidProtocol, Rule},
    Resource, ResourceExt,
};
use std::sync::Arc;
use tracing::{debug, instrument};

/// A cluster object that declares policy rules.
pub trait PolicyObject: Resource<DynamicType = ()> {
    /// Returns the object's rules, or `None` if it carries no rule spec at all.
    fn policy_rules(&self) -> Result<Option<Vec<Rule>>, PolicyError>;
}

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("policy {0} is not namespaced")]
    MissingNamespace(String),

    #[error("invalid label selector: {0}")]
    Selector(#[from] ParseLabelError),

    #[error(transparent)]
    Protocol(#[from] InvalidProtocol),

    #[error(transparent)]
    Rejected(#[from] RuleError),
}

/// Keeps the rules owned by each policy object in sync with the object.
#[derive(Clone, Debug)]
pub struct PolicyReconciler {
    repo: Arc<Repository>,
}

impl PolicyReconciler {
    pub fn new(repo: Arc<Repository>) -> Self {
        Self { repo }
    }

    /// Replaces the rules owned by `policy` with the rules it currently declares.
    ///
    /// An object without a rule spec removes all of its rules. Nothing is changed if any rule is
    /// rejected.
    pub fn apply<P: PolicyObject>(&self, policy: &P) -> Result<Replaced, PolicyError> {
        let name = policy.name_any();
        let namespace = policy
            .namespace()
            .ok_or_else(|| PolicyError::MissingNamespace(name.clone()))?;
        let kind = P::kind(&());
        let owner = ownership_labels(&namespace, &name, &kind);

        let rules = policy
            .policy_rules()?
            .unwrap_or_default()
            .into_iter()
            .map(|mut rule| {
                rule.labels = merge_labels(&owner, &rule.labels);
                scope_to_namespace(&mut rule, &namespace);
                rule
            })
            .collect();

        let replaced = self.repo.replace_by_labels(&owner, rules)?;
        debug!(%namespace, %name, %kind, ?replaced, "Applied policy");
        Ok(replaced)
    }

    /// Removes every rule owned by the object. Returns the revision and the number of rules removed.
    pub fn delete(&self, namespace: &str, name: &str, kind: &str) -> (u64, usize) {
        self.repo
            .delete_by_labels(&ownership_labels(namespace, name, kind))
    }

    /// Returns true if the repository holds at least one rule owned by the object.
    pub fn owns_rules(&self, namespace: &str, name: &str, kind: &str) -> bool {
        self.repo
            .contains_all(&[ownership_labels(namespace, name, kind)])
    }

    /// A policy is reflected when the repository owns rules for it exactly if it declares any.
    pub fn reflection<P: PolicyObject>(&self, policy: &P) -> Reflection {
        let Some(namespace) = policy.namespace() else {
            return Reflection::NotApplicable;
        };
        let declares = match policy.policy_rules() {
            Ok(rules) => rules.is_some_and(|r| !r.is_empty()),
            // Let the reconciler surface the error.
            Err(_) => return Reflection::NeedsWork,
        };
        if self.owns_rules(&namespace, &policy.name_any(), &P::kind(&())) == declares {
            Reflection::Reflected
        } else {
            Reflection::NeedsWork
        }
    }
}

// === impl Index ===

impl Index {
    #[instrument(
        skip_all,
        fields(kind = %P::kind(&()), ns = ?policy.namespace(), name = %policy.name_any())
    )]
    pub(crate) fn apply_policy<P: PolicyObject>(&mut self, policy: &P) -> Result<()> {
        self.policy.apply(policy).with_context(|| {
            format!(
                "failed to apply {} {}",
                P::kind(&()),
                ResourceKey::from_resource(policy)
            )
        })?;
        Ok(())
    }

    pub(crate) fn delete_policy<P: PolicyObject>(&mut self, namespace: &str, name: &str) {
        let kind = P::kind(&());
        let (revision, deleted) = self.policy.delete(namespace, name, &kind);
        debug!(%kind, %namespace, %name, revision, deleted, "Deleted policy");
    }

    #[instrument(skip_all, fields(kind = %P::kind(&())))]
    pub(crate) fn reset_policies<P>(&mut self, policies: Vec<P>, removed: NamespacedRemoved)
    where
        P: PolicyObject + Clone,
        Self: Reflect<P>,
    {
        if self
            .reconcile_missing(policies, |idx, policy| idx.apply_policy(&policy))
            .is_err()
        {
            debug!("Some policies could not be applied");
        }
        for (namespace, names) in removed {
            for name in names {
                self.delete_policy::<P>(&namespace, &name);
            }
        }
    }
}

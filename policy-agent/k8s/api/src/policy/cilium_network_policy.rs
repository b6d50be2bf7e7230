use super::Rule;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// A namespaced policy object carrying one rule (`spec`), several (`specs`), or none.
///
/// The resource is declared by hand rather than derived because both spec fields are optional.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct CiliumNetworkPolicy {
    pub metadata: ObjectMeta,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<Rule>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specs: Option<Vec<Rule>>,
}

impl CiliumNetworkPolicy {
    pub const KIND: &'static str = "CiliumNetworkPolicy";

    /// Returns the declared rules, or `None` when the object carries no rule spec at all.
    pub fn rules(&self) -> Option<Vec<Rule>> {
        if self.spec.is_none() && self.specs.is_none() {
            return None;
        }
        Some(
            self.spec
                .iter()
                .chain(self.specs.iter().flatten())
                .cloned()
                .collect(),
        )
    }
}

impl kube::Resource for CiliumNetworkPolicy {
    type DynamicType = ();
    type Scope = kube::core::NamespaceResourceScope;

    fn kind(_: &()) -> Cow<'_, str> {
        Self::KIND.into()
    }

    fn group(_: &()) -> Cow<'_, str> {
        "cilium.io".into()
    }

    fn version(_: &()) -> Cow<'_, str> {
        "v2".into()
    }

    fn plural(_: &()) -> Cow<'_, str> {
        "ciliumnetworkpolicies".into()
    }

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

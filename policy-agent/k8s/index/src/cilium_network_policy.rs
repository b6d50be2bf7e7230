use crate::{
    reconciler::{PolicyError, PolicyObject},
    Index,
};
use kubert::index::{IndexNamespacedResource, NamespacedRemoved};
use policy_agent_core::{Reflect, Reflection, ResourceKey};
use policy_agent_k8s_api::policy::{CiliumNetworkPolicy, Rule};

impl PolicyObject for CiliumNetworkPolicy {
    fn policy_rules(&self) -> Result<Option<Vec<Rule>>, PolicyError> {
        Ok(self.rules())
    }
}

impl Reflect<CiliumNetworkPolicy> for Index {
    fn reflection(&self, cnp: &CiliumNetworkPolicy) -> Reflection {
        self.policy.reflection(cnp)
    }
}

impl IndexNamespacedResource<CiliumNetworkPolicy> for Index {
    fn apply(&mut self, cnp: CiliumNetworkPolicy) {
        if let Err(error) = self.apply_policy(&cnp) {
            self.log_error(&ResourceKey::from_resource(&cnp), &error);
        }
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.delete_policy::<CiliumNetworkPolicy>(&namespace, &name);
    }

    fn reset(&mut self, cnps: Vec<CiliumNetworkPolicy>, removed: NamespacedRemoved) {
        self.reset_policies(cnps, removed);
    }
}

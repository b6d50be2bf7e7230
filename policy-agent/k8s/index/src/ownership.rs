//! Labels that tie policy rules to the cluster object they were derived from.

use policy_agent_k8s_api::{
    labels::{NAMESPACE_LABELS_PREFIX, POD_NAMESPACE_LABEL, SOURCE_ANY, SOURCE_K8S, SOURCE_RESERVED, SOURCE_UNSPEC},
    policy::Rule,
    Label, LabelArray, Selector,
};

pub const POLICY_NAME_LABEL: &str = "io.cilium.k8s.policy.name";
pub const POLICY_NAMESPACE_LABEL: &str = "io.cilium.k8s.policy.namespace";
pub const POLICY_DERIVED_FROM_LABEL: &str = "io.cilium.k8s.policy.derived-from";

/// Labels identifying the rules produced by the object `namespace/name` of type `kind`.
pub fn ownership_labels(namespace: &str, name: &str, kind: &str) -> LabelArray {
    LabelArray::new(vec![
        Label::new(POLICY_NAME_LABEL, name, SOURCE_K8S),
        Label::new(POLICY_NAMESPACE_LABEL, namespace, SOURCE_K8S),
        Label::new(POLICY_DERIVED_FROM_LABEL, kind, SOURCE_K8S),
    ])
}

/// Labels a rule: the ownership labels followed by the labels the object declares.
pub fn merge_labels(owner: &LabelArray, declared: &LabelArray) -> LabelArray {
    owner.iter().chain(declared).cloned().collect()
}

/// The selector key matching an endpoint's pod namespace.
pub fn pod_namespace_key() -> String {
    format!("{SOURCE_K8S}.{POD_NAMESPACE_LABEL}")
}

/// Confines a rule derived from a namespaced object to that namespace.
///
/// The rule's subject selector always selects the namespace. Peer selectors are only confined
/// when they do not already say which namespaces they select.
pub fn scope_to_namespace(rule: &mut Rule, namespace: &str) {
    let key = pod_namespace_key();
    rule.endpoint_selector.insert_match_label(key.clone(), namespace);
    for peer in rule.peer_selectors_mut() {
        if !selects_namespaces(peer) {
            peer.insert_match_label(key.clone(), namespace);
        }
    }
}

/// Returns true if the selector constrains the pod namespace or namespace labels.
fn selects_namespaces(sel: &Selector) -> bool {
    let keys = sel
        .match_labels()
        .map(|(k, _)| k.as_str())
        .chain(sel.match_expressions().map(|e| e.key.as_str()));
    for key in keys {
        let key = strip_source(key);
        if key == POD_NAMESPACE_LABEL
            || key
                .strip_prefix(NAMESPACE_LABELS_PREFIX)
                .is_some_and(|rest| rest.starts_with('.'))
        {
            return true;
        }
    }
    false
}

/// Strips a `source.` or `source:` qualifier from a selector key.
fn strip_source(key: &str) -> &str {
    for source in [SOURCE_K8S, SOURCE_ANY, SOURCE_UNSPEC, SOURCE_RESERVED] {
        if let Some(rest) = key.strip_prefix(source) {
            if let Some(rest) = rest.strip_prefix(['.', ':']) {
                return rest;
            }
        }
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use policy_agent_k8s_api::{
        labels::{Expression, Operator},
        policy::{EgressRule, IngressRule},
    };

    #[test]
    fn ownership_labels_are_deterministic() {
        let a = ownership_labels("production", "db", "CiliumNetworkPolicy");
        assert_eq!(a, ownership_labels("production", "db", "CiliumNetworkPolicy"));
        assert_eq!(
            a.to_string(),
            "[k8s:io.cilium.k8s.policy.name=db \
              k8s:io.cilium.k8s.policy.namespace=production \
              k8s:io.cilium.k8s.policy.derived-from=CiliumNetworkPolicy]"
        );
        assert!(!ownership_labels("production", "db", "NetworkPolicy").contains(&a));
    }

    #[test]
    fn merge_keeps_both_sides() {
        let owner = ownership_labels("ns", "p", "CiliumNetworkPolicy");
        let declared = LabelArray::parse(["foo=bar", "k8s:io.cilium.k8s.policy.name=other"]).unwrap();
        let merged = merge_labels(&owner, &declared);
        assert_eq!(merged.len(), 5);
        assert!(merged.contains(&owner));
        assert!(merged.contains(&declared));
        assert_eq!(merged.iter().take(3).cloned().collect::<LabelArray>(), owner);
    }

    #[test]
    fn scopes_subject_and_unscoped_peers() {
        let scoped_peer = Selector::from_iter(Some(("k8s:io.kubernetes.pod.namespace", "other")));
        let ns_label_peer = Selector::from_iter(Some(Expression {
            key: "k8s.io.cilium.k8s.namespace.labels.team".to_string(),
            operator: Operator::Exists,
            values: Default::default(),
        }));
        let mut rule = Rule {
            endpoint_selector: Selector::from_iter(Some(("k8s.io.kubernetes.pod.namespace", "spoofed"))),
            ingress: vec![IngressRule {
                from_endpoints: vec![
                    Selector::from_iter(Some(("app", "web"))),
                    scoped_peer.clone(),
                ],
                ..Default::default()
            }],
            egress: vec![EgressRule {
                to_endpoints: vec![Selector::default(), ns_label_peer.clone()],
                ..Default::default()
            }],
            ..Default::default()
        };
        scope_to_namespace(&mut rule, "prod");

        assert_eq!(
            rule.endpoint_selector,
            Selector::from_iter(Some(("k8s.io.kubernetes.pod.namespace", "prod")))
        );
        assert_eq!(
            rule.ingress[0].from_endpoints,
            vec![
                Selector::from_iter([("app", "web"), ("k8s.io.kubernetes.pod.namespace", "prod")]),
                scoped_peer,
            ]
        );
        assert_eq!(
            rule.egress[0].to_endpoints,
            vec![
                Selector::from_iter(Some(("k8s.io.kubernetes.pod.namespace", "prod"))),
                ns_label_peer,
            ]
        );
    }
}

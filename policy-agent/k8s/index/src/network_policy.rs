//! Translates Kubernetes `NetworkPolicy` objects into policy rules.

use crate::{
    ownership::pod_namespace_key,
    reconciler::{PolicyError, PolicyObject},
    Index,
};
use k8s_openapi::{
    api::networking::v1::{IPBlock, NetworkPolicyPeer, NetworkPolicyPort, NetworkPolicySpec},
    apimachinery::pkg::util::intstr::IntOrString,
};
use kubert::index::{IndexNamespacedResource, NamespacedRemoved};
use policy_agent_core::{Reflect, Reflection, ResourceKey};
use policy_agent_k8s_api::{
    labels::{Expression, Operator, NAMESPACE_LABELS_PREFIX, SOURCE_K8S},
    policy::{CidrRule, EgressRule, IngressRule, PortProtocol, PortRule, Protocol, Rule},
    LabelSelector, NetworkPolicy, Selector,
};
use tracing::{debug, warn};

const POLICY_TYPE_INGRESS: &str = "Ingress";
const POLICY_TYPE_EGRESS: &str = "Egress";

impl PolicyObject for NetworkPolicy {
    /// A missing spec is read as the empty spec, which denies all ingress to every pod in the
    /// namespace, so a `NetworkPolicy` always declares exactly one rule.
    fn policy_rules(&self) -> Result<Option<Vec<Rule>>, PolicyError> {
        let rule = match self.spec.as_ref() {
            Some(spec) => parse_spec(spec)?,
            None => parse_spec(&NetworkPolicySpec::default())?,
        };
        Ok(Some(vec![rule]))
    }
}

impl Reflect<NetworkPolicy> for Index {
    fn reflection(&self, np: &NetworkPolicy) -> Reflection {
        self.policy.reflection(np)
    }
}

impl IndexNamespacedResource<NetworkPolicy> for Index {
    fn apply(&mut self, np: NetworkPolicy) {
        if let Err(error) = self.apply_policy(&np) {
            self.log_error(&ResourceKey::from_resource(&np), &error);
        }
    }

    fn delete(&mut self, namespace: String, name: String) {
        self.delete_policy::<NetworkPolicy>(&namespace, &name);
    }

    fn reset(&mut self, nps: Vec<NetworkPolicy>, removed: NamespacedRemoved) {
        self.reset_policies(nps, removed);
    }
}

/// Builds the single rule a `NetworkPolicy` spec declares.
///
/// Selectors are not confined to the policy's namespace here; the reconciler does that for every
/// policy kind.
fn parse_spec(spec: &NetworkPolicySpec) -> Result<Rule, PolicyError> {
    let pod_selector: Option<LabelSelector> = spec.pod_selector.clone().into();
    let endpoint_selector = match pod_selector {
        Some(sel) => Selector::from_label_selector(&sel, SOURCE_K8S)?,
        None => Selector::default(),
    };

    let has_egress_rules = spec.egress.as_ref().is_some_and(|rules| !rules.is_empty());
    let (declares_ingress, declares_egress) = match spec.policy_types.as_ref() {
        Some(types) => (
            types.iter().any(|t| t == POLICY_TYPE_INGRESS),
            types.iter().any(|t| t == POLICY_TYPE_EGRESS),
        ),
        // Without explicit types, a policy always affects ingress and affects egress only if it
        // has egress rules.
        None => (true, has_egress_rules),
    };

    let mut ingress = Vec::new();
    if declares_ingress {
        for rule in spec.ingress.iter().flatten() {
            let Some(to_ports) = parse_ports(rule.ports.as_deref())? else {
                continue;
            };
            let (from_endpoints, from_cidr_set) = parse_peers(rule.from.as_deref())?;
            if !from_endpoints.is_empty() {
                ingress.push(IngressRule {
                    from_endpoints,
                    to_ports: to_ports.clone(),
                    ..Default::default()
                });
            }
            if !from_cidr_set.is_empty() {
                ingress.push(IngressRule {
                    from_cidr_set,
                    to_ports,
                    ..Default::default()
                });
            }
        }
        if ingress.is_empty() {
            ingress.push(IngressRule::default());
        }
    }

    let mut egress = Vec::new();
    if declares_egress {
        for rule in spec.egress.iter().flatten() {
            let Some(to_ports) = parse_ports(rule.ports.as_deref())? else {
                continue;
            };
            let (to_endpoints, to_cidr_set) = parse_peers(rule.to.as_deref())?;
            if !to_endpoints.is_empty() {
                egress.push(EgressRule {
                    to_endpoints,
                    to_ports: to_ports.clone(),
                    ..Default::default()
                });
            }
            if !to_cidr_set.is_empty() {
                egress.push(EgressRule {
                    to_cidr_set,
                    to_ports,
                    ..Default::default()
                });
            }
        }
        if egress.is_empty() {
            egress.push(EgressRule::default());
        }
    }

    Ok(Rule {
        endpoint_selector,
        ingress,
        egress,
        ..Default::default()
    })
}

/// Splits peers into endpoint selectors and CIDR sets. No peers at all allows every endpoint.
fn parse_peers(
    peers: Option<&[NetworkPolicyPeer]>,
) -> Result<(Vec<Selector>, Vec<CidrRule>), PolicyError> {
    let peers = peers.unwrap_or_default();
    if peers.is_empty() {
        return Ok((vec![all_namespaces()], vec![]));
    }

    let mut selectors = Vec::new();
    let mut cidrs = Vec::new();
    for peer in peers {
        if let Some(IPBlock { cidr, except }) = peer.ip_block.as_ref() {
            cidrs.push(CidrRule {
                cidr: cidr.clone(),
                except: except.clone().unwrap_or_default(),
            });
            continue;
        }

        let mut sel = match peer.pod_selector.as_ref() {
            Some(pods) => Selector::from_label_selector(pods, SOURCE_K8S)?,
            None => Selector::default(),
        };
        match peer.namespace_selector.as_ref() {
            // An empty namespace selector matches every namespace.
            Some(ns) if is_empty(ns) => sel.extend(all_namespaces()),
            Some(ns) => sel.extend(Selector::from_label_selector_with_prefix(
                ns,
                SOURCE_K8S,
                Some(NAMESPACE_LABELS_PREFIX),
            )?),
            None => {}
        }
        selectors.push(sel);
    }
    Ok((selectors, cidrs))
}

/// Translates a port list. Returns `None` if ports were given but none of them can be enforced.
fn parse_ports(ports: Option<&[NetworkPolicyPort]>) -> Result<Option<Vec<PortRule>>, PolicyError> {
    let Some(ports) = ports.filter(|ports| !ports.is_empty()) else {
        return Ok(Some(vec![]));
    };

    let mut parsed = Vec::with_capacity(ports.len());
    for NetworkPolicyPort {
        port,
        protocol,
        end_port,
    } in ports
    {
        let port = match port {
            None => "0".to_string(),
            Some(IntOrString::Int(port)) => port.to_string(),
            Some(IntOrString::String(name)) => {
                warn!(port = %name, "Named ports are not supported");
                continue;
            }
        };
        if let Some(end_port) = end_port {
            debug!(%port, end_port, "Ignoring port range end");
        }
        let protocol = match protocol.as_deref() {
            Some(p) => p.parse()?,
            None => Protocol::Tcp,
        };
        parsed.push(PortProtocol { port, protocol });
    }

    if parsed.is_empty() {
        warn!("Dropping rule without enforceable ports");
        return Ok(None);
    }
    Ok(Some(vec![PortRule { ports: parsed }]))
}

/// Selects endpoints in every namespace.
fn all_namespaces() -> Selector {
    Selector::from_iter(Some(Expression {
        key: pod_namespace_key(),
        operator: Operator::Exists,
        values: Default::default(),
    }))
}

fn is_empty(sel: &LabelSelector) -> bool {
    sel.match_labels.as_ref().map_or(true, |l| l.is_empty())
        && sel.match_expressions.as_ref().map_or(true, |e| e.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreeset;
    use serde_json::json;

    fn mk_spec(spec: serde_json::Value) -> NetworkPolicySpec {
        serde_json::from_value(spec).unwrap()
    }

    #[test]
    fn pod_selector_keys_are_qualified() {
        let rule = parse_spec(&mk_spec(json!({
            "podSelector": { "matchLabels": { "app": "db" } },
        })))
        .unwrap();
        assert_eq!(
            rule.endpoint_selector,
            Selector::from_iter(Some(("k8s.app", "db")))
        );
        // Ingress is implied; egress is not.
        assert_eq!(rule.ingress, vec![IngressRule::default()]);
        assert!(rule.egress.is_empty());
    }

    #[test]
    fn peers_map_to_selectors_and_cidrs() {
        let rule = parse_spec(&mk_spec(json!({
            "podSelector": {},
            "ingress": [{
                "from": [
                    { "podSelector": { "matchLabels": { "role": "frontend" } } },
                    {
                        "podSelector": { "matchLabels": { "role": "frontend" } },
                        "namespaceSelector": { "matchLabels": { "team": "web" } },
                    },
                    { "namespaceSelector": {} },
                    { "ipBlock": { "cidr": "10.0.0.0/8", "except": ["10.1.0.0/16"] } },
                ],
                "ports": [{ "port": 6379 }, { "protocol": "UDP", "port": 53 }],
            }],
        })))
        .unwrap();

        let ports = vec![PortRule {
            ports: vec![
                PortProtocol {
                    port: "6379".to_string(),
                    protocol: Protocol::Tcp,
                },
                PortProtocol {
                    port: "53".to_string(),
                    protocol: Protocol::Udp,
                },
            ],
        }];
        let mut scoped = Selector::from_iter(Some(("k8s.role", "frontend")));
        scoped.insert_match_label("k8s.io.cilium.k8s.namespace.labels.team", "web");

        assert_eq!(
            rule.ingress,
            vec![
                IngressRule {
                    from_endpoints: vec![
                        Selector::from_iter(Some(("k8s.role", "frontend"))),
                        scoped,
                        all_namespaces(),
                    ],
                    to_ports: ports.clone(),
                    ..Default::default()
                },
                IngressRule {
                    from_cidr_set: vec![CidrRule {
                        cidr: "10.0.0.0/8".to_string(),
                        except: vec!["10.1.0.0/16".to_string()],
                    }],
                    to_ports: ports,
                    ..Default::default()
                },
            ]
        );
    }

    #[test]
    fn empty_peers_allow_all_namespaces() {
        let rule = parse_spec(&mk_spec(json!({
            "podSelector": {},
            "egress": [{ "ports": [{}] }],
        })))
        .unwrap();
        assert_eq!(
            rule.egress,
            vec![EgressRule {
                to_endpoints: vec![all_namespaces()],
                to_ports: vec![PortRule {
                    ports: vec![PortProtocol {
                        port: "0".to_string(),
                        protocol: Protocol::Tcp,
                    }],
                }],
                ..Default::default()
            }]
        );
        assert_eq!(
            all_namespaces().match_expressions().collect::<Vec<_>>(),
            vec![&Expression {
                key: "k8s.io.kubernetes.pod.namespace".to_string(),
                operator: Operator::Exists,
                values: btreeset![],
            }]
        );
    }

    #[test]
    fn declared_types_without_rules_deny() {
        let rule = parse_spec(&mk_spec(json!({
            "podSelector": {},
            "policyTypes": ["Egress"],
            "ingress": [{}],
        })))
        .unwrap();
        assert!(rule.ingress.is_empty());
        assert_eq!(rule.egress, vec![EgressRule::default()]);
    }

    #[test]
    fn named_ports_are_skipped() {
        let rule = parse_spec(&mk_spec(json!({
            "podSelector": {},
            "ingress": [
                { "ports": [{ "port": "http" }] },
                { "ports": [{ "port": "http" }, { "port": 8080 }] },
            ],
        })))
        .unwrap();
        assert_eq!(rule.ingress.len(), 1);
        assert_eq!(rule.ingress[0].to_ports[0].ports[0].port, "8080");
    }

    #[test]
    fn rejects_unknown_protocols() {
        let err = parse_spec(&mk_spec(json!({
            "podSelector": {},
            "ingress": [{ "ports": [{ "protocol": "SCTP", "port": 9 }] }],
        })))
        .unwrap_err();
        assert!(matches!(err, PolicyError::Protocol(_)), "{err}");
    }
}

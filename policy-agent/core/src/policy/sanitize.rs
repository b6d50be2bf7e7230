use ipnet::IpNet;
use policy_agent_k8s_api::{
    labels::{Expression, Operator},
    policy::{CidrRule, PortRule, Rule},
    Selector,
};
use std::net::IpAddr;

/// Reasons a rule is refused by the repository.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RuleError {
    #[error("invalid selector key {0:?}")]
    InvalidKey(String),

    #[error("selector expression on {key:?}: operator {operator:?} {reason}")]
    InvalidExpression {
        key: String,
        operator: Operator,
        reason: &'static str,
    },

    #[error("invalid CIDR {0:?}")]
    InvalidCidr(String),

    #[error("exception {except} is not contained in {cidr}")]
    ExceptOutsideCidr { cidr: IpNet, except: IpNet },

    #[error("invalid port {0:?}")]
    InvalidPort(String),

    #[error("a single peer clause may not combine endpoint selectors with CIDRs")]
    MixedPeers,
}

/// Validates a rule before it is admitted to the repository.
pub fn sanitize(rule: &Rule) -> Result<(), RuleError> {
    selector(&rule.endpoint_selector)?;

    for ingress in &rule.ingress {
        if !ingress.from_endpoints.is_empty()
            && !(ingress.from_cidr.is_empty() && ingress.from_cidr_set.is_empty())
        {
            return Err(RuleError::MixedPeers);
        }
        peers(
            &ingress.from_endpoints,
            &ingress.from_cidr,
            &ingress.from_cidr_set,
        )?;
        ports(&ingress.to_ports)?;
    }

    for egress in &rule.egress {
        if !egress.to_endpoints.is_empty()
            && !(egress.to_cidr.is_empty() && egress.to_cidr_set.is_empty())
        {
            return Err(RuleError::MixedPeers);
        }
        peers(&egress.to_endpoints, &egress.to_cidr, &egress.to_cidr_set)?;
        ports(&egress.to_ports)?;
    }

    Ok(())
}

fn peers(selectors: &[Selector], cidrs: &[String], sets: &[CidrRule]) -> Result<(), RuleError> {
    for sel in selectors {
        selector(sel)?;
    }
    for c in cidrs {
        cidr(c)?;
    }
    for set in sets {
        let net = cidr(&set.cidr)?;
        for except in &set.except {
            let except = cidr(except)?;
            if !net.contains(&except) {
                return Err(RuleError::ExceptOutsideCidr { cidr: net, except });
            }
        }
    }
    Ok(())
}

fn selector(sel: &Selector) -> Result<(), RuleError> {
    for (key, _) in sel.match_labels() {
        validate_key(key)?;
    }
    for expr in sel.match_expressions() {
        expression(expr)?;
    }
    Ok(())
}

fn expression(expr: &Expression) -> Result<(), RuleError> {
    validate_key(&expr.key)?;
    let invalid = |reason| RuleError::InvalidExpression {
        key: expr.key.clone(),
        operator: expr.operator,
        reason,
    };
    match expr.operator {
        Operator::In | Operator::NotIn if expr.values.is_empty() => {
            Err(invalid("requires at least one value"))
        }
        Operator::Exists | Operator::DoesNotExist if !expr.values.is_empty() => {
            Err(invalid("takes no values"))
        }
        _ => Ok(()),
    }
}

/// A key is a label name, optionally qualified by a single `source:` prefix.
fn validate_key(key: &str) -> Result<(), RuleError> {
    let name = match key.split_once(':') {
        Some((source, name))
            if !source.is_empty() && source.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            name
        }
        Some(_) => return Err(RuleError::InvalidKey(key.to_string())),
        None => key,
    };
    let valid = |c: char| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '/' | '-');
    if name.is_empty() || !name.chars().all(valid) {
        return Err(RuleError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Parses a CIDR, accepting a bare address as a host network.
fn cidr(s: &str) -> Result<IpNet, RuleError> {
    if let Ok(net) = s.parse::<IpNet>() {
        return Ok(net.trunc());
    }
    s.parse::<IpAddr>()
        .map(IpNet::from)
        .map_err(|_| RuleError::InvalidCidr(s.to_string()))
}

fn ports(rules: &[PortRule]) -> Result<(), RuleError> {
    for port in rules.iter().flat_map(|r| r.ports.iter()) {
        if port.port.parse::<u16>().is_err() {
            return Err(RuleError::InvalidPort(port.port.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use policy_agent_k8s_api::policy::{EgressRule, IngressRule, PortProtocol};

    fn mk_rule(selector: Selector) -> Rule {
        Rule {
            endpoint_selector: selector,
            ..Default::default()
        }
    }

    #[test]
    fn accepts_valid_rule() {
        let rule = Rule {
            endpoint_selector: Selector::from_iter(Some(("k8s.app", "db"))),
            ingress: vec![IngressRule {
                from_cidr_set: vec![CidrRule {
                    cidr: "10.0.0.0/8".to_string(),
                    except: vec!["10.1.0.0/16".to_string()],
                }],
                to_ports: vec![PortRule {
                    ports: vec![PortProtocol {
                        port: "5432".to_string(),
                        ..Default::default()
                    }],
                }],
                ..Default::default()
            }],
            egress: vec![EgressRule {
                to_cidr: vec!["192.168.1.1".to_string()],
                ..Default::default()
            }],
            ..Default::default()
        };
        assert_eq!(sanitize(&rule), Ok(()));
    }

    #[test]
    fn rejects_bad_selector_keys() {
        let rule = mk_rule(Selector::from_iter(Some(("k8s.app name", "db"))));
        assert_eq!(
            sanitize(&rule),
            Err(RuleError::InvalidKey("k8s.app name".to_string()))
        );
    }

    #[test]
    fn accepts_source_qualified_keys() {
        let rule = mk_rule(Selector::from_iter(Some(("k8s:io.kubernetes.pod.namespace", "web"))));
        assert_eq!(sanitize(&rule), Ok(()));

        for key in [":app", "k8s:", "k8s:any:app", "k-8s:app"] {
            let rule = mk_rule(Selector::from_iter(Some((key, "web"))));
            assert_eq!(
                sanitize(&rule),
                Err(RuleError::InvalidKey(key.to_string())),
                "{key}"
            );
        }
    }

    #[test]
    fn rejects_inconsistent_expressions() {
        let rule = mk_rule(Selector::from_iter(Some(Expression {
            key: "k8s.app".to_string(),
            operator: Operator::In,
            values: Default::default(),
        })));
        assert!(matches!(
            sanitize(&rule),
            Err(RuleError::InvalidExpression { .. })
        ));

        let rule = mk_rule(Selector::from_iter(Some(Expression {
            key: "k8s.app".to_string(),
            operator: Operator::Exists,
            values: Some("x".to_string()).into_iter().collect(),
        })));
        assert!(matches!(
            sanitize(&rule),
            Err(RuleError::InvalidExpression { .. })
        ));
    }

    #[test]
    fn rejects_bad_cidrs_and_ports() {
        let rule = Rule {
            egress: vec![EgressRule {
                to_cidr: vec!["10.0.0.0/33".to_string()],
                ..Default::default()
            }],
            ..Default::default()
        };
        assert_eq!(
            sanitize(&rule),
            Err(RuleError::InvalidCidr("10.0.0.0/33".to_string()))
        );

        let rule = Rule {
            ingress: vec![IngressRule {
                from_cidr_set: vec![CidrRule {
                    cidr: "10.0.0.0/16".to_string(),
                    except: vec!["10.1.0.0/24".to_string()],
                }],
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(matches!(
            sanitize(&rule),
            Err(RuleError::ExceptOutsideCidr { .. })
        ));

        let rule = Rule {
            ingress: vec![IngressRule {
                to_ports: vec![PortRule {
                    ports: vec![PortProtocol {
                        port: "http".to_string(),
                        ..Default::default()
                    }],
                }],
                ..Default::default()
            }],
            ..Default::default()
        };
        assert_eq!(
            sanitize(&rule),
            Err(RuleError::InvalidPort("http".to_string()))
        );
    }

    #[test]
    fn rejects_mixed_peers() {
        let rule = Rule {
            ingress: vec![IngressRule {
                from_endpoints: vec![Selector::default()],
                from_cidr: vec!["10.0.0.0/8".to_string()],
                ..Default::default()
            }],
            ..Default::default()
        };
        assert_eq!(sanitize(&rule), Err(RuleError::MixedPeers));
    }
}

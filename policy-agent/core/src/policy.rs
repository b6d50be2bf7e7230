//! The authoritative set of policy rules.

mod repository;
mod sanitize;

pub use self::{
    repository::{Replaced, Repository},
    sanitize::{sanitize, RuleError},
};
pub use policy_agent_k8s_api::policy::{
    CidrRule, EgressRule, IngressRule, PortProtocol, PortRule, Protocol, Rule,
};

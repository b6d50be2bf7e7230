pub mod cilium_network_policy;
pub mod rule;

pub use self::{
    cilium_network_policy::CiliumNetworkPolicy,
    rule::{
        CidrRule, EgressRule, IngressRule, InvalidProtocol, PortProtocol, PortRule, Protocol, Rule,
    },
};

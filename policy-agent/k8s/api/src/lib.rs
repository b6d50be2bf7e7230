#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod labels;
pub mod policy;

pub use self::labels::{Label, LabelArray, Labels, Selector};
pub use k8s_openapi::{
    api::{
        self,
        core::v1::{Endpoints, Namespace, Node, NodeSpec, NodeStatus, Pod, PodSpec, PodStatus},
        networking::v1::NetworkPolicy,
    },
    apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta},
};
pub use kube::{Resource, ResourceExt};

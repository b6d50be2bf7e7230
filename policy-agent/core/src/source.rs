use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a piece of state was learned from.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Source {
    #[default]
    Unspec,
    Local,
    #[serde(rename = "kvstore")]
    KvStore,
    Kubernetes,
    CustomResource,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unspec => "unspec",
            Self::Local => "local",
            Self::KvStore => "kvstore",
            Self::Kubernetes => "kubernetes",
            Self::CustomResource => "custom-resource",
        })
    }
}

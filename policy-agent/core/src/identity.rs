use serde::{Deserialize, Serialize};
use std::fmt;

/// A security identity, as allocated for a set of labels.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(transparent)]
pub struct NumericIdentity(pub u32);

impl NumericIdentity {
    pub const UNKNOWN: Self = Self(0);
    pub const HOST: Self = Self(1);
    pub const WORLD: Self = Self(2);
    pub const UNMANAGED: Self = Self(3);
    pub const HEALTH: Self = Self(4);
    /// Held by endpoints whose labels are not known yet.
    pub const INIT: Self = Self(5);

    /// The first identity that is not reserved.
    pub const MIN_ALLOCATED: Self = Self(256);

    pub fn is_reserved(&self) -> bool {
        *self < Self::MIN_ALLOCATED
    }
}

impl fmt::Display for NumericIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::UNKNOWN => f.write_str("unknown"),
            Self::HOST => f.write_str("reserved:host"),
            Self::WORLD => f.write_str("reserved:world"),
            Self::UNMANAGED => f.write_str("reserved:unmanaged"),
            Self::HEALTH => f.write_str("reserved:health"),
            Self::INIT => f.write_str("reserved:init"),
            Self(id) => fmt::Display::fmt(&id, f),
        }
    }
}

//! Computes which observed objects are not yet reflected in the agent's state.
//!
//! Each resource kind provides a [`Reflect`] implementation that inspects the relevant stores and
//! classifies a single object. [`missing`] applies it to a whole batch and keeps only the objects
//! that still need work, so that an empty result tells the caller there is nothing to reconcile.

use crate::versioned::VersionedMap;
use tracing::trace;

/// How an observed object relates to the current state.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Reflection {
    /// The state already matches the object.
    Reflected,

    /// The state lags behind the object.
    NeedsWork,

    /// The state holds nothing the object could be correlated with (yet).
    NotApplicable,
}

/// Classifies objects of type `T` against some state.
pub trait Reflect<T> {
    fn reflection(&self, obj: &T) -> Reflection;
}

impl<T, R: Reflect<T> + ?Sized> Reflect<T> for &R {
    fn reflection(&self, obj: &T) -> Reflection {
        (**self).reflection(obj)
    }
}

/// Returns the subset of `observed` that `state` does not reflect yet.
///
/// Objects are copied verbatim; the result never holds a key absent from `observed`.
pub fn missing<T, R>(observed: &VersionedMap<T>, state: &R) -> VersionedMap<T>
where
    T: Clone,
    R: Reflect<T> + ?Sized,
{
    observed
        .iter()
        .filter(|(key, obj)| {
            let reflection = state.reflection(&obj.data);
            trace!(%key, ?reflection);
            reflection == Reflection::NeedsWork
        })
        .map(|(key, obj)| (key.clone(), obj.clone()))
        .collect()
}

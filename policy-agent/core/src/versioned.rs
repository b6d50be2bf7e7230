//! Batches of observed cluster objects, keyed by resource identity.

use ahash::AHashMap as HashMap;
use policy_agent_k8s_api::{ObjectMeta, Resource, ResourceExt};
use std::fmt;

/// Identifies an observed object independently of its content.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    pub namespace: Option<String>,
    pub name: String,
}

/// The version marker an object was observed at.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Version {
    #[default]
    Unknown,
    ResourceVersion(String),
    Generation(i64),
}

#[derive(Clone, Debug, PartialEq)]
pub struct VersionedObject<T> {
    pub data: T,
    pub version: Version,
}

/// A set of observed objects. Iteration order is unspecified.
#[derive(Clone, Debug, PartialEq)]
pub struct VersionedMap<T> {
    objects: HashMap<ResourceKey, VersionedObject<T>>,
}

// === impl ResourceKey ===

impl ResourceKey {
    pub fn namespaced(namespace: impl ToString, name: impl ToString) -> Self {
        Self {
            namespace: Some(namespace.to_string()),
            name: name.to_string(),
        }
    }

    pub fn cluster(name: impl ToString) -> Self {
        Self {
            namespace: None,
            name: name.to_string(),
        }
    }

    pub fn from_resource<T: Resource>(resource: &T) -> Self {
        Self {
            namespace: resource.namespace(),
            name: resource.name_any(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.namespace.as_deref() {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => f.write_str(&self.name),
        }
    }
}

// === impl Version ===

impl Version {
    pub fn from_meta(meta: &ObjectMeta) -> Self {
        if let Some(rv) = meta.resource_version.as_ref().filter(|rv| !rv.is_empty()) {
            return Self::ResourceVersion(rv.clone());
        }
        meta.generation.map(Self::Generation).unwrap_or_default()
    }
}

// === impl VersionedObject ===

impl<T> VersionedObject<T> {
    pub fn new(data: T, version: Version) -> Self {
        Self { data, version }
    }
}

impl<T: Resource> From<T> for VersionedObject<T> {
    fn from(data: T) -> Self {
        let version = Version::from_meta(data.meta());
        Self { data, version }
    }
}

// === impl VersionedMap ===

impl<T> Default for VersionedMap<T> {
    fn default() -> Self {
        Self {
            objects: HashMap::default(),
        }
    }
}

impl<T> VersionedMap<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an object, returning the one previously stored under the same key.
    pub fn add(&mut self, key: ResourceKey, obj: VersionedObject<T>) -> Option<VersionedObject<T>> {
        self.objects.insert(key, obj)
    }

    pub fn get(&self, key: &ResourceKey) -> Option<&VersionedObject<T>> {
        self.objects.get(key)
    }

    pub fn remove(&mut self, key: &ResourceKey) -> Option<VersionedObject<T>> {
        self.objects.remove(key)
    }

    pub fn contains_key(&self, key: &ResourceKey) -> bool {
        self.objects.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ResourceKey, &VersionedObject<T>)> {
        self.objects.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &ResourceKey> {
        self.objects.keys()
    }
}

impl<T: Resource> VersionedMap<T> {
    /// Builds a batch from a list of observed resources; later duplicates replace earlier ones.
    pub fn from_resources(resources: impl IntoIterator<Item = T>) -> Self {
        resources
            .into_iter()
            .map(|r| (ResourceKey::from_resource(&r), VersionedObject::from(r)))
            .collect()
    }
}

impl<T> IntoIterator for VersionedMap<T> {
    type Item = (ResourceKey, VersionedObject<T>);
    type IntoIter = std::collections::hash_map::IntoIter<ResourceKey, VersionedObject<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.objects.into_iter()
    }
}

impl<T> std::iter::FromIterator<(ResourceKey, VersionedObject<T>)> for VersionedMap<T> {
    fn from_iter<I: IntoIterator<Item = (ResourceKey, VersionedObject<T>)>>(iter: I) -> Self {
        Self {
            objects: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use policy_agent_k8s_api::Pod;

    fn mk_pod(ns: &str, name: &str, rv: Option<&str>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                namespace: Some(ns.to_string()),
                name: Some(name.to_string()),
                resource_version: rv.map(Into::into),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn keys_by_identity_not_content() {
        let map = VersionedMap::from_resources(vec![
            mk_pod("ns-0", "pod-0", Some("1")),
            mk_pod("ns-0", "pod-0", Some("2")),
            mk_pod("ns-1", "pod-0", Some("3")),
        ]);
        assert_eq!(map.len(), 2);

        let obj = map.get(&ResourceKey::namespaced("ns-0", "pod-0")).unwrap();
        assert_eq!(obj.version, Version::ResourceVersion("2".to_string()));
        assert!(map.contains_key(&ResourceKey::namespaced("ns-1", "pod-0")));
    }

    #[test]
    fn version_falls_back_to_generation() {
        let meta = ObjectMeta {
            generation: Some(7),
            resource_version: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(Version::from_meta(&meta), Version::Generation(7));
        assert_eq!(Version::from_meta(&ObjectMeta::default()), Version::Unknown);
    }

    #[test]
    fn key_display() {
        assert_eq!(ResourceKey::namespaced("ns", "a").to_string(), "ns/a");
        assert_eq!(ResourceKey::cluster("node-0").to_string(), "node-0");
    }
}

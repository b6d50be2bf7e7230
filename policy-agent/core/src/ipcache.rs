//! Maps IP addresses to security identities.

use crate::{NumericIdentity, Source};
use ahash::AHashMap as HashMap;
use parking_lot::RwLock;
use std::net::IpAddr;
use tracing::debug;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Identity {
    pub id: NumericIdentity,
    pub source: Source,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CacheEntry {
    /// The address of the node hosting `ip`, if known.
    pub host_ip: Option<IpAddr>,
    pub identity: Identity,
}

#[derive(Debug, Default)]
pub struct IpCache {
    entries: RwLock<HashMap<IpAddr, CacheEntry>>,
}

// === impl IpCache ===

impl IpCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the entry for `ip`.
    ///
    /// Returns false if the cache already held an identical entry.
    pub fn upsert(&self, ip: IpAddr, host_ip: Option<IpAddr>, identity: Identity) -> bool {
        let ip = ip.to_canonical();
        let entry = CacheEntry {
            host_ip: host_ip.map(|ip| ip.to_canonical()),
            identity,
        };
        let prev = self.entries.write().insert(ip, entry);
        if prev == Some(entry) {
            return false;
        }
        debug!(%ip, host_ip = ?entry.host_ip, id = %identity.id, source = %identity.source, "Upserted");
        true
    }

    pub fn lookup_by_ip(&self, ip: &IpAddr) -> Option<CacheEntry> {
        self.entries.read().get(&ip.to_canonical()).copied()
    }

    /// Removes the entry for `ip` if it was written by `source`.
    pub fn delete(&self, ip: &IpAddr, source: Source) -> bool {
        let ip = ip.to_canonical();
        let mut entries = self.entries.write();
        match entries.get(&ip) {
            Some(entry) if entry.identity.source == source => {
                entries.remove(&ip);
                debug!(%ip, %source, "Deleted");
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn k8s(id: NumericIdentity) -> Identity {
        Identity {
            id,
            source: Source::Kubernetes,
        }
    }

    #[test]
    fn upsert_reports_changes() {
        let cache = IpCache::new();
        let ip = "127.0.0.1".parse().unwrap();
        let host = "127.0.0.2".parse().ok();

        assert!(cache.upsert(ip, host, k8s(NumericIdentity::INIT)));
        assert!(!cache.upsert(ip, host, k8s(NumericIdentity::INIT)));
        assert!(cache.upsert(ip, host, k8s(NumericIdentity(1000))));

        let entry = cache.lookup_by_ip(&ip).unwrap();
        assert_eq!(entry.host_ip, host);
        assert_eq!(entry.identity.id, NumericIdentity(1000));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn mapped_addresses_share_an_entry() {
        let cache = IpCache::new();
        cache.upsert(
            "10.0.0.1".parse().unwrap(),
            None,
            k8s(NumericIdentity::HOST),
        );
        assert!(cache
            .lookup_by_ip(&"::ffff:10.0.0.1".parse().unwrap())
            .is_some());
    }

    #[test]
    fn delete_respects_source() {
        let cache = IpCache::new();
        let ip = "10.0.0.1".parse().unwrap();
        cache.upsert(ip, None, k8s(NumericIdentity::HOST));

        assert!(!cache.delete(&ip, Source::KvStore));
        assert!(cache.lookup_by_ip(&ip).is_some());
        assert!(cache.delete(&ip, Source::Kubernetes));
        assert!(cache.is_empty());
    }
}

//! Process-wide IP -> location cache in front of a `GeoResolver`

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use super::{GeoError, GeoResolver};
use crate::models::GeoLocation;

/// Unbounded, write-once-per-key cache of resolved locations
///
/// Keys are the raw IP text, so textual variants of one address are cached
/// separately. Concurrent misses on the same key may each call the resolver;
/// the first value stored wins and is never replaced.
pub struct LocationCache {
    resolver: Arc<dyn GeoResolver>,
    entries: RwLock<HashMap<String, GeoLocation>>,
}

impl LocationCache {
    pub fn new(resolver: Arc<dyn GeoResolver>) -> Self {
        LocationCache {
            resolver,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve an IP, consulting the resolver only on a miss
    pub fn resolve(&self, ip: &str) -> Result<GeoLocation, GeoError> {
        if let Some(location) = self.get(ip) {
            log::debug!("Location cache hit for {}", ip);
            return Ok(location);
        }

        log::debug!("Location cache miss for {}", ip);
        let resolved = self.resolver.lookup(ip)?;

        // Entries are never partially written, so a poisoned lock still guards a valid map
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        Ok(*entries.entry(ip.to_string()).or_insert(resolved))
    }

    /// Cached location for an IP, if any
    pub fn get(&self, ip: &str) -> Option<GeoLocation> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(ip).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingResolver {
        calls: AtomicUsize,
    }

    impl GeoResolver for CountingResolver {
        fn lookup(&self, ip: &str) -> Result<GeoLocation, GeoError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match ip {
                "123.192.212.224" => Ok(GeoLocation::new(25.0478, 121.5318, 50)),
                "8.8.8.8" => Ok(GeoLocation::new(37.751, -97.822, 1000)),
                other => Err(GeoError::NotFound(other.to_string())),
            }
        }
    }

    fn create_cache() -> (Arc<CountingResolver>, LocationCache) {
        let resolver = Arc::new(CountingResolver {
            calls: AtomicUsize::new(0),
        });
        let cache = LocationCache::new(resolver.clone());
        (resolver, cache)
    }

    #[test]
    fn test_second_resolution_is_cached() {
        let (resolver, cache) = create_cache();

        let first = cache.resolve("123.192.212.224").unwrap();
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.latitude, 25.0478);
        assert_eq!(first.longitude, 121.5318);

        let second = cache.resolve("123.192.212.224").unwrap();
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
        assert_eq!(first, second);
    }

    #[test]
    fn test_failures_are_not_cached() {
        let (resolver, cache) = create_cache();

        assert!(cache.resolve("10.0.0.1").is_err());
        assert!(cache.resolve("10.0.0.1").is_err());
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_keys_are_not_normalized() {
        let (resolver, cache) = create_cache();

        cache.resolve("8.8.8.8").unwrap();
        assert!(cache.get("008.008.008.008").is_none());
        assert!(cache.get("8.8.8.8").is_some());
        assert_eq!(cache.len(), 1);
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_readers() {
        let (resolver, cache) = create_cache();
        let cache = Arc::new(cache);
        cache.resolve("8.8.8.8").unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || cache.resolve("8.8.8.8").unwrap())
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap().latitude, 37.751);
        }
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
    }
}

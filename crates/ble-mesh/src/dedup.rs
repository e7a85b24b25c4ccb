//! Bounded record of recently seen envelope ids
//!
//! Loop prevention for a mesh with cycles: every observed envelope id is
//! recorded, and an id seen again while its entry is still live is a
//! duplicate. Memory stays bounded two ways: LRU capacity eviction and an
//! age window after which an entry no longer counts as seen.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};
use uuid::Uuid;

pub struct DedupCache {
    entries: LruCache<Uuid, Instant>,
    max_age: Duration,
}

impl DedupCache {
    pub fn new(capacity: usize, max_age: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            max_age,
        }
    }

    /// Record an observation of `id`, returning whether it was already seen
    ///
    /// The observation time is refreshed on every sighting, so a message
    /// still circulating stays suppressed. An entry older than `max_age`
    /// has expired and no longer counts as seen.
    pub fn observe(&mut self, id: Uuid) -> bool {
        let now = Instant::now();
        let seen = matches!(
            self.entries.get(&id),
            Some(&last) if now.duration_since(last) <= self.max_age
        );
        self.entries.put(id, now);
        seen
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_observation_is_not_duplicate() {
        let mut cache = DedupCache::new(16, Duration::from_secs(300));
        assert!(!cache.observe(Uuid::new_v4()));
    }

    #[test]
    fn test_repeat_observation_is_duplicate() {
        let mut cache = DedupCache::new(16, Duration::from_secs(300));
        let id = Uuid::new_v4();

        assert!(!cache.observe(id));
        for _ in 0..10 {
            assert!(cache.observe(id));
        }
    }

    #[test]
    fn test_capacity_eviction() {
        let mut cache = DedupCache::new(2, Duration::from_secs(300));
        let first = Uuid::new_v4();

        cache.observe(first);
        cache.observe(Uuid::new_v4());
        cache.observe(Uuid::new_v4());

        // `first` was least recently used and has been evicted
        assert!(!cache.observe(first));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_expired_entry_no_longer_counts() {
        let mut cache = DedupCache::new(16, Duration::from_millis(0));
        let id = Uuid::new_v4();

        cache.observe(id);
        std::thread::sleep(Duration::from_millis(5));
        assert!(!cache.observe(id));
    }

    #[test]
    fn test_capacity_is_clamped() {
        let mut cache = DedupCache::new(0, Duration::from_secs(300));
        let id = Uuid::new_v4();
        assert!(!cache.observe(id));
        assert!(cache.observe(id));
    }
}

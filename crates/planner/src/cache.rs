//! Generation-checked bounded LRU, the shape shared by the plan cache and
//! the implementation cache.
//!
//! Keys are the canonical parameterized statement (literals already replaced
//! by typed placeholders). Every entry remembers the catalog generation it
//! was built against; a lookup under a newer generation discards the entry.

use lru::LruCache;
use parking_lot::Mutex;
use polystore_types::Type;
use std::num::NonZeroUsize;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Canonical SQL with literals parameterized.
    pub sql: String,
    pub param_types: Vec<Type>,
}

impl CacheKey {
    pub fn new(sql: impl Into<String>, param_types: Vec<Type>) -> Self {
        Self { sql: sql.into(), param_types }
    }
}

struct Entry<T> {
    generation: u64,
    value: T,
}

pub struct GenerationalCache<T> {
    inner: Mutex<LruCache<CacheKey, Entry<T>>>,
}

impl<T: Clone> GenerationalCache<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("max(1) is non-zero");
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// A hit only counts when the entry's generation matches; stale entries
    /// are evicted on sight.
    pub fn get(&self, key: &CacheKey, generation: u64) -> Option<T> {
        let mut cache = self.inner.lock();
        match cache.get(key) {
            None => return None,
            Some(entry) if entry.generation == generation => return Some(entry.value.clone()),
            Some(_) => {}
        }
        cache.pop(key);
        None
    }

    pub fn put(&self, key: CacheKey, generation: u64, value: T) {
        self.inner.lock().put(key, Entry { generation, value });
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn key(sql: &str) -> CacheKey {
        CacheKey::new(sql, vec![Type::integer()])
    }

    #[test]
    fn generation_mismatch_discards() {
        let cache: GenerationalCache<u32> = GenerationalCache::new(4);
        cache.put(key("q"), 1, 42);
        assert_eq!(cache.get(&key("q"), 1), Some(42));
        assert_eq!(cache.get(&key("q"), 2), None);
        // The stale entry is gone, not resurrected.
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn lru_bounds_capacity() {
        let cache: GenerationalCache<u32> = GenerationalCache::new(2);
        cache.put(key("a"), 1, 1);
        cache.put(key("b"), 1, 2);
        let _ = cache.get(&key("a"), 1);
        cache.put(key("c"), 1, 3);
        assert_eq!(cache.get(&key("b"), 1), None, "least recently used fell out");
        assert_eq!(cache.get(&key("a"), 1), Some(1));
    }

    #[test]
    fn param_types_distinguish_keys() {
        let cache: GenerationalCache<u32> = GenerationalCache::new(4);
        cache.put(CacheKey::new("q", vec![Type::integer()]), 1, 1);
        assert_eq!(cache.get(&CacheKey::new("q", vec![Type::varchar(4)]), 1), None);
    }
}

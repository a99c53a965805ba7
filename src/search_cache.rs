//! Search cache (C7): stores recent [`SearchResultSet`]s keyed by
//! `search_id`, TTL-bounded with LRU eviction on overflow.
//!
//! A plain `std::sync::Mutex`-guarded map plus an LRU order list is enough
//! here: critical sections are short and do no I/O, matching the "no I/O
//! under lock" rule for shared resources.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::models::SearchResultSet;

struct Entry {
    result: SearchResultSet,
    inserted_at: Instant,
}

pub struct SearchCache {
    capacity: usize,
    ttl: Duration,
    inner: Mutex<Inner>,
}

struct Inner {
    entries: HashMap<Uuid, Entry>,
    /// Most-recently-used ids, back is most recent.
    lru: Vec<Uuid>,
}

impl SearchCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity,
            ttl,
            inner: Mutex::new(Inner { entries: HashMap::new(), lru: Vec::new() }),
        }
    }

    pub fn put(&self, result: SearchResultSet) {
        let id = result.search_id;
        let mut inner = self.inner.lock().expect("search cache mutex poisoned");
        inner.entries.insert(id, Entry { result, inserted_at: Instant::now() });
        touch(&mut inner.lru, id);

        while inner.entries.len() > self.capacity {
            if inner.lru.is_empty() {
                break;
            }
            let oldest = inner.lru.remove(0);
            inner.entries.remove(&oldest);
        }
    }

    /// Returns `None` on miss, including lazily-expired entries (which are
    /// removed as a side effect).
    pub fn get(&self, search_id: Uuid) -> Option<SearchResultSet> {
        let mut inner = self.inner.lock().expect("search cache mutex poisoned");
        let expired = inner
            .entries
            .get(&search_id)
            .map(|e| e.inserted_at.elapsed() > self.ttl)
            .unwrap_or(false);

        if expired {
            inner.entries.remove(&search_id);
            inner.lru.retain(|id| *id != search_id);
            return None;
        }

        let result = inner.entries.get(&search_id).map(|e| e.result.clone());
        if result.is_some() {
            touch(&mut inner.lru, search_id);
        }
        result
    }

    pub fn evict(&self, search_id: Uuid) {
        let mut inner = self.inner.lock().expect("search cache mutex poisoned");
        inner.entries.remove(&search_id);
        inner.lru.retain(|id| *id != search_id);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }
}

fn touch(lru: &mut Vec<Uuid>, id: Uuid) {
    lru.retain(|existing| *existing != id);
    lru.push(id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Collection;
    use chrono::Utc;

    fn sample(search_id: Uuid) -> SearchResultSet {
        SearchResultSet {
            search_id,
            query: "q".to_string(),
            results: Vec::new(),
            unique_documents: Vec::new(),
            chunk_ids: Vec::new(),
            collections_searched: vec![Collection::Documents],
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn put_then_get_round_trips() {
        let cache = SearchCache::new(10, Duration::from_secs(60));
        let id = Uuid::new_v4();
        cache.put(sample(id));
        assert!(cache.get(id).is_some());
    }

    #[test]
    fn miss_is_not_an_error() {
        let cache = SearchCache::new(10, Duration::from_secs(60));
        assert!(cache.get(Uuid::new_v4()).is_none());
    }

    #[test]
    fn expired_entry_is_evicted_lazily() {
        let cache = SearchCache::new(10, Duration::from_millis(1));
        let id = Uuid::new_v4();
        cache.put(sample(id));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get(id).is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn capacity_overflow_evicts_least_recently_used() {
        let cache = SearchCache::new(2, Duration::from_secs(60));
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        cache.put(sample(a));
        cache.put(sample(b));
        cache.put(sample(c));
        assert_eq!(cache.len(), 2);
        assert!(cache.get(a).is_none());
        assert!(cache.get(b).is_some());
        assert!(cache.get(c).is_some());
    }
}

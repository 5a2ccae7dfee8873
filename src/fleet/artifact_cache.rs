// ABOUTME: Bounded LRU cache of per-session artifacts (screenshots, dumps) returned by broadcasts
// ABOUTME: Artifact bytes live in buffers recycled through a ResourcePool to keep allocation churn flat

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use super::config::ArtifactCacheConfig;
use super::error::FleetResult;
use super::resource_pool::{ResourcePool, ResourcePoolStats};
use super::session::SessionId;

/// Cache key: one named artifact per session
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ArtifactKey {
    pub session: SessionId,
    pub name: String,
}

impl ArtifactKey {
    pub fn new(session: SessionId, name: impl Into<String>) -> Self {
        Self {
            session,
            name: name.into(),
        }
    }
}

/// Cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ArtifactCacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub buffers: ResourcePoolStats,
}

struct Entry {
    bytes: Vec<u8>,
    last_used: u64,
}

#[derive(Default)]
struct LruState {
    entries: HashMap<ArtifactKey, Entry>,
    /// Access tick -> key, oldest first
    order: BTreeMap<u64, ArtifactKey>,
    tick: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl LruState {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn touch(&mut self, key: &ArtifactKey) -> bool {
        let tick = self.next_tick();
        let Some(entry) = self.entries.get_mut(key) else {
            return false;
        };
        self.order.remove(&entry.last_used);
        entry.last_used = tick;
        self.order.insert(tick, key.clone());
        true
    }

    fn remove(&mut self, key: &ArtifactKey) -> Option<Vec<u8>> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.last_used);
        Some(entry.bytes)
    }

    fn pop_oldest(&mut self) -> Option<(ArtifactKey, Vec<u8>)> {
        let (_, key) = self.order.pop_first()?;
        let entry = self.entries.remove(&key)?;
        Some((key, entry.bytes))
    }
}

/// Least-recently-used artifact store
pub struct ArtifactCache {
    capacity: usize,
    state: Mutex<LruState>,
    buffers: Arc<ResourcePool<Vec<u8>>>,
}

impl std::fmt::Debug for ArtifactCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactCache")
            .field("capacity", &self.capacity)
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}

impl ArtifactCache {
    pub fn new(config: &ArtifactCacheConfig) -> FleetResult<Self> {
        config.validate()?;
        let buffer_capacity = config.buffer_capacity;
        let buffers = ResourcePool::new(config.buffer_pool_size, move || {
            Vec::with_capacity(buffer_capacity)
        })
        .with_reset(Vec::clear);

        Ok(Self {
            capacity: config.capacity,
            state: Mutex::new(LruState::default()),
            buffers: Arc::new(buffers),
        })
    }

    /// Store a copy of `bytes`, evicting the least recently used entry when full
    pub fn insert(&self, session: SessionId, name: &str, bytes: &[u8]) {
        let mut buffer = self.buffers.rent();
        buffer.extend_from_slice(bytes);
        let key = ArtifactKey::new(session, name);

        let mut released = Vec::new();
        {
            let mut state = self.state.lock();
            if let Some(old) = state.remove(&key) {
                released.push(old);
            }
            while state.entries.len() >= self.capacity {
                let Some((evicted, bytes)) = state.pop_oldest() else {
                    break;
                };
                state.evictions += 1;
                debug!(session = %evicted.session, name = %evicted.name, "Evicted artifact");
                released.push(bytes);
            }
            let tick = state.next_tick();
            state.order.insert(tick, key.clone());
            state.entries.insert(
                key,
                Entry {
                    bytes: buffer,
                    last_used: tick,
                },
            );
        }

        for bytes in released {
            self.buffers.release(bytes);
        }
    }

    /// Copy of an artifact; marks it as recently used
    pub fn get(&self, session: SessionId, name: &str) -> Option<Vec<u8>> {
        self.with_artifact(session, name, <[u8]>::to_vec)
    }

    /// Borrow an artifact without copying it
    pub fn with_artifact<R>(
        &self,
        session: SessionId,
        name: &str,
        f: impl FnOnce(&[u8]) -> R,
    ) -> Option<R> {
        let key = ArtifactKey::new(session, name);
        let mut state = self.state.lock();
        if !state.touch(&key) {
            state.misses += 1;
            return None;
        }
        state.hits += 1;
        state.entries.get(&key).map(|entry| f(&entry.bytes))
    }

    pub fn contains(&self, session: SessionId, name: &str) -> bool {
        self.state
            .lock()
            .entries
            .contains_key(&ArtifactKey::new(session, name))
    }

    pub fn remove(&self, session: SessionId, name: &str) -> bool {
        let removed = self.state.lock().remove(&ArtifactKey::new(session, name));
        match removed {
            Some(bytes) => {
                self.buffers.release(bytes);
                true
            }
            None => false,
        }
    }

    /// Drop every artifact of a session; returns how many were removed
    pub fn remove_session(&self, session: SessionId) -> usize {
        let removed: Vec<Vec<u8>> = {
            let mut state = self.state.lock();
            let keys: Vec<ArtifactKey> = state
                .entries
                .keys()
                .filter(|k| k.session == session)
                .cloned()
                .collect();
            keys.iter().filter_map(|k| state.remove(k)).collect()
        };

        let count = removed.len();
        for bytes in removed {
            self.buffers.release(bytes);
        }
        count
    }

    /// Keys from least to most recently used
    pub fn keys(&self) -> Vec<ArtifactKey> {
        self.state.lock().order.values().cloned().collect()
    }

    pub fn clear(&self) {
        let drained: Vec<Vec<u8>> = {
            let mut state = self.state.lock();
            state.order.clear();
            state.entries.drain().map(|(_, e)| e.bytes).collect()
        };
        for bytes in drained {
            self.buffers.release(bytes);
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> ArtifactCacheStats {
        let state = self.state.lock();
        ArtifactCacheStats {
            entries: state.entries.len(),
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            buffers: self.buffers.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn cache(capacity: usize) -> ArtifactCache {
        ArtifactCache::new(&ArtifactCacheConfig {
            capacity,
            buffer_pool_size: 4,
            buffer_capacity: 32,
        })
        .unwrap()
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let cache = cache(2);
        cache.insert(SessionId(1), "screen", b"one");
        cache.insert(SessionId(2), "screen", b"two");

        // Touch 1 so 2 becomes the eviction candidate
        assert_eq!(cache.get(SessionId(1), "screen").as_deref(), Some(&b"one"[..]));
        cache.insert(SessionId(3), "screen", b"three");

        assert!(cache.contains(SessionId(1), "screen"));
        assert!(!cache.contains(SessionId(2), "screen"));
        assert_eq!(
            cache.keys(),
            vec![
                ArtifactKey::new(SessionId(1), "screen"),
                ArtifactKey::new(SessionId(3), "screen"),
            ]
        );
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_replacing_an_entry_does_not_evict() {
        let cache = cache(2);
        cache.insert(SessionId(1), "screen", b"old");
        cache.insert(SessionId(2), "screen", b"other");
        cache.insert(SessionId(1), "screen", b"new");

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(SessionId(1), "screen"), Some(b"new".to_vec()));
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn test_buffers_are_recycled() {
        let cache = cache(1);
        cache.insert(SessionId(1), "screen", &[0xAB; 16]);
        cache.insert(SessionId(2), "screen", &[0xCD; 16]);
        cache.insert(SessionId(3), "screen", &[0xEF; 16]);

        let stats = cache.stats();
        assert_eq!(stats.buffers.created, 2);
        assert_eq!(stats.buffers.reused, 1);
        assert_eq!(
            cache.with_artifact(SessionId(3), "screen", |bytes| bytes.iter().all(|b| *b == 0xEF)),
            Some(true)
        );
    }

    #[test]
    fn test_hits_and_misses() {
        let cache = cache(4);
        cache.insert(SessionId(1), "dump", b"x");
        assert!(cache.get(SessionId(1), "dump").is_some());
        assert!(cache.get(SessionId(1), "screen").is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_remove_session_and_clear() {
        let cache = cache(8);
        cache.insert(SessionId(1), "screen", b"a");
        cache.insert(SessionId(1), "dump", b"b");
        cache.insert(SessionId(2), "screen", b"c");

        assert_eq!(cache.remove_session(SessionId(1)), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.remove(SessionId(2), "screen"));
        assert!(!cache.remove(SessionId(2), "screen"));

        cache.insert(SessionId(4), "screen", b"d");
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.keys().is_empty());
    }
}

//! Per-node row cache.
//!
//! Nodes with several downstream consumers (diamond graphs) store their row
//! results here so an upstream row is computed once per frame. Bounded by an
//! LRU; the engine clears it at the start of every sequential frame and when
//! the graph version changes. One mutex serializes lookups, inserts and clears.

use log::{debug, trace};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::entities::{RowCache, RowKey, RowPlanes};

pub struct NodeCache {
    rows: Mutex<LruCache<RowKey, Arc<RowPlanes>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl NodeCache {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            rows: Mutex::new(LruCache::new(cap)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

impl RowCache for NodeCache {
    fn get(&self, key: &RowKey) -> Option<Arc<RowPlanes>> {
        let found = self
            .rows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned();
        match found {
            Some(planes) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                trace!("Node cache hit: node={} y={}", key.node, key.y);
                Some(planes)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    fn insert(&self, key: RowKey, planes: Arc<RowPlanes>) {
        self.rows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .put(key, planes);
    }

    fn clear(&self) {
        let mut rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        if !rows.is_empty() {
            debug!("Node cache cleared ({} rows)", rows.len());
        }
        rows.clear();
    }

    fn len(&self) -> usize {
        self.rows.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

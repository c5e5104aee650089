//! Content-addressed cache of presented frames.
//!
//! Key = (source frame identity, graph version hash, render parameters).
//! Only exact matches hit: every float parameter compares by bit pattern and
//! window geometry compares field by field. There is no LRU at this level;
//! when an insert would exceed the memory budget the whole cache is dropped,
//! and the engine clears it wholesale on graph changes (and before every
//! sequential frame under `CacheStrategy::ClearOnAdvance`).

use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::core::cache_man::CacheManager;
use crate::entities::{BitDepth, Box2D, FrameEntry, Format};

/// Frame retention policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CacheStrategy {
    /// Keep frames until the graph changes or the budget is hit
    #[default]
    All,
    /// Assume no reuse: clear before every sequential frame
    ClearOnAdvance,
}

/// Hit/miss counters
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses();
        if total == 0 { 0.0 } else { self.hits() as f64 / total as f64 }
    }

    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}

/// Output-dependent parameters that change the presented pixels.
#[derive(Debug, Clone)]
pub struct RenderParams {
    pub zoom: f32,
    pub exposure: f32,
    pub transform: String,
    pub bit_depth: BitDepth,
    pub data_window: Box2D,
    pub display_window: Format,
}

impl PartialEq for RenderParams {
    fn eq(&self, other: &Self) -> bool {
        self.zoom.to_bits() == other.zoom.to_bits()
            && self.exposure.to_bits() == other.exposure.to_bits()
            && self.transform == other.transform
            && self.bit_depth == other.bit_depth
            && self.data_window == other.data_window
            && self.display_window == other.display_window
    }
}

impl Eq for RenderParams {}

impl Hash for RenderParams {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.zoom.to_bits().hash(state);
        self.exposure.to_bits().hash(state);
        self.transform.hash(state);
        self.bit_depth.hash(state);
        self.data_window.hash(state);
        self.display_window.hash(state);
    }
}

/// Full identity of a rendered frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Joined frame names of every source feeding the output
    pub source: String,
    pub graph_hash: u64,
    pub params: RenderParams,
}

/// Frame cache shared by the control thread and look-ahead.
#[derive(Debug)]
pub struct FrameCache {
    entries: Mutex<HashMap<CacheKey, FrameEntry>>,
    manager: Arc<CacheManager>,
    strategy: Mutex<CacheStrategy>,
    stats: CacheStats,
}

impl FrameCache {
    pub fn new(manager: Arc<CacheManager>, strategy: CacheStrategy) -> Self {
        debug!("FrameCache created: strategy={:?}", strategy);
        Self {
            entries: Mutex::new(HashMap::new()),
            manager,
            strategy: Mutex::new(strategy),
            stats: CacheStats::new(),
        }
    }

    /// Exact-match lookup. Records a hit or a miss.
    pub fn lookup(&self, key: &CacheKey) -> Option<FrameEntry> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(key) {
            Some(entry) => {
                self.stats.record_hit();
                debug!("Frame cache hit: {} (hash {:016x})", key.source, key.graph_hash);
                Some(entry.clone())
            }
            None => {
                self.stats.record_miss();
                None
            }
        }
    }

    /// Lookup without touching statistics (look-ahead probing).
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(key)
    }

    /// Store a frame. Over budget, the cache is emptied first.
    pub fn insert(&self, key: CacheKey, entry: FrameEntry) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let bytes = entry.mem();
        if self.manager.would_exceed(bytes) && !entries.is_empty() {
            debug!(
                "Frame cache over budget ({} entries), clearing before insert",
                entries.len()
            );
            entries.clear();
            self.manager.reset_memory();
        }
        debug!("Frame cache insert: {} ({} bytes)", key.source, bytes);
        if let Some(old) = entries.insert(key, entry) {
            self.manager.free_memory(old.mem());
        }
        self.manager.add_memory(bytes);
    }

    pub fn invalidate_all(&self) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if !entries.is_empty() {
            debug!("Frame cache cleared ({} entries)", entries.len());
        }
        entries.clear();
        self.manager.reset_memory();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn strategy(&self) -> CacheStrategy {
        *self.strategy.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_strategy(&self, strategy: CacheStrategy) {
        *self.strategy.lock().unwrap_or_else(|e| e.into_inner()) = strategy;
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// (usage, limit) bytes from the cache manager
    pub fn mem(&self) -> (usize, usize) {
        self.manager.mem()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::FrameBuffer;

    fn params() -> RenderParams {
        RenderParams {
            zoom: 1.0,
            exposure: 0.0,
            transform: "linear".into(),
            bit_depth: BitDepth::Byte,
            data_window: Box2D::new(0, 0, 4, 4),
            display_window: Format::new(4, 4),
        }
    }

    fn key() -> CacheKey {
        CacheKey {
            source: "ramp.0001".into(),
            graph_hash: 42,
            params: params(),
        }
    }

    fn entry() -> FrameEntry {
        FrameEntry::new(FrameBuffer::new(4, 4, BitDepth::Byte))
    }

    fn cache() -> FrameCache {
        FrameCache::new(Arc::new(CacheManager::with_limit(1 << 20)), CacheStrategy::All)
    }

    #[test]
    fn test_cache_round_trip() {
        let cache = cache();
        let e = entry();
        cache.insert(key(), e.clone());
        let hit = cache.lookup(&key()).expect("hit");
        assert!(Arc::ptr_eq(&hit.buffer, &e.buffer));
        assert_eq!((hit.width, hit.height), (4, 4));
        assert_eq!(cache.stats().hits(), 1);
    }

    #[test]
    fn test_any_differing_field_misses() {
        let cache = cache();
        cache.insert(key(), entry());

        let mut variants = Vec::new();
        let mut k = key();
        k.source = "ramp.0002".into();
        variants.push(k);
        let mut k = key();
        k.graph_hash = 43;
        variants.push(k);
        let mut k = key();
        k.params.zoom = 0.5;
        variants.push(k);
        let mut k = key();
        k.params.exposure = 1.0;
        variants.push(k);
        let mut k = key();
        k.params.transform = "srgb".into();
        variants.push(k);
        let mut k = key();
        k.params.bit_depth = BitDepth::Float;
        variants.push(k);
        let mut k = key();
        k.params.data_window = Box2D::new(0, 0, 4, 3);
        variants.push(k);
        let mut k = key();
        k.params.display_window = Format::new(8, 4);
        variants.push(k);

        for k in &variants {
            assert!(cache.lookup(k).is_none(), "{:?} should miss", k);
        }
        assert_eq!(cache.stats().misses(), variants.len() as u64);
    }

    #[test]
    fn test_invalidate_all_releases_memory() {
        let cache = cache();
        cache.insert(key(), entry());
        assert_eq!(cache.mem().0, 64);
        cache.invalidate_all();
        assert!(cache.is_empty());
        assert_eq!(cache.mem().0, 0);
        assert!(cache.lookup(&key()).is_none());
    }

    #[test]
    fn test_over_budget_clears_wholesale() {
        let cache = FrameCache::new(Arc::new(CacheManager::with_limit(100)), CacheStrategy::All);
        cache.insert(key(), entry());
        let mut k2 = key();
        k2.source = "ramp.0002".into();
        cache.insert(k2.clone(), entry());
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(&k2));
        assert!(!cache.contains(&key()));
    }

    #[test]
    fn test_replacing_entry_keeps_accounting() {
        let cache = cache();
        cache.insert(key(), entry());
        cache.insert(key(), entry());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.mem().0, 64);
    }
}

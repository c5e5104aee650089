//! Frame cache memory budget and the shared cancellation epoch.
//!
//! The budget is derived from available system memory at startup. The epoch
//! is shared with the worker pool: bumping it makes every queued row task
//! that captured an older epoch skip its evaluation.

use log::{debug, info};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use sysinfo::System;

const GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Memory accounting for the frame cache plus the row-task epoch.
#[derive(Debug)]
pub struct CacheManager {
    /// Bytes held by cached frames
    memory_usage: Arc<AtomicUsize>,
    /// Budget in bytes
    max_memory_bytes: AtomicUsize,
    /// Row-task epoch
    current_epoch: Arc<AtomicU64>,
}

impl CacheManager {
    /// Budget = (available - reserve) * fraction.
    ///
    /// * `mem_fraction` - 0.0-1.0 share of available memory
    /// * `reserve_gb` - memory left to the rest of the system
    pub fn new(mem_fraction: f64, reserve_gb: f64) -> Self {
        let (available, limit) = Self::budget(mem_fraction, reserve_gb);
        info!(
            "CacheManager init: available={} MB, limit={} MB ({}%)",
            available / 1024 / 1024,
            limit / 1024 / 1024,
            (mem_fraction * 100.0) as u32
        );
        Self::with_limit(limit)
    }

    /// Fixed budget, independent of the machine.
    pub fn with_limit(max_memory_bytes: usize) -> Self {
        Self {
            memory_usage: Arc::new(AtomicUsize::new(0)),
            max_memory_bytes: AtomicUsize::new(max_memory_bytes),
            current_epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    fn budget(mem_fraction: f64, reserve_gb: f64) -> (usize, usize) {
        let mut sys = System::new();
        sys.refresh_memory();
        let available = sys.available_memory() as usize;
        let reserve = (reserve_gb.max(0.0) * GB) as usize;
        let usable = available.saturating_sub(reserve);
        (available, (usable as f64 * mem_fraction.clamp(0.0, 1.0)) as usize)
    }

    /// Bump the epoch, invalidating every queued epoch-checked job.
    pub fn increment_epoch(&self) -> u64 {
        let new_epoch = self.current_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Epoch incremented: {}", new_epoch);
        new_epoch
    }

    pub fn current_epoch(&self) -> u64 {
        self.current_epoch.load(Ordering::SeqCst)
    }

    /// Shared epoch counter (for Workers)
    pub fn epoch_ref(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.current_epoch)
    }

    pub fn check_memory_limit(&self) -> bool {
        self.memory_usage.load(Ordering::Relaxed) > self.max_memory_bytes.load(Ordering::Relaxed)
    }

    /// Whether adding `bytes` would go over budget.
    pub fn would_exceed(&self, bytes: usize) -> bool {
        self.memory_usage.load(Ordering::Relaxed).saturating_add(bytes)
            > self.max_memory_bytes.load(Ordering::Relaxed)
    }

    /// (usage, limit) in bytes
    pub fn mem(&self) -> (usize, usize) {
        (
            self.memory_usage.load(Ordering::Relaxed),
            self.max_memory_bytes.load(Ordering::Relaxed),
        )
    }

    pub fn add_memory(&self, bytes: usize) {
        self.memory_usage.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Saturating release
    pub fn free_memory(&self, bytes: usize) {
        let _ = self
            .memory_usage
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cur| {
                Some(cur.saturating_sub(bytes))
            });
    }

    pub fn reset_memory(&self) {
        self.memory_usage.store(0, Ordering::Relaxed);
    }

    pub fn set_memory_limit(&self, mem_fraction: f64, reserve_gb: f64) {
        let (_, limit) = Self::budget(mem_fraction, reserve_gb);
        self.max_memory_bytes.store(limit, Ordering::Relaxed);
        info!("Memory limit updated: {} MB", limit / 1024 / 1024);
    }
}

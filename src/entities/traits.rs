//! Abstract traits for dependency inversion.
//!
//! Nodes evaluate rows against a `RowCache` and the scheduler submits work to
//! a `WorkerPool` without knowing the concrete `core` implementations, so
//! `core` depends on `entities` and not the other way round.

use std::sync::Arc;

use super::row::{Row, RowKey, RowPlanes};

/// Shared per-node row cache consulted during row evaluation.
///
/// Clears and inserts must be serialized against lookups by the implementor.
pub trait RowCache: Send + Sync {
    fn get(&self, key: &RowKey) -> Option<Arc<RowPlanes>>;

    fn insert(&self, key: RowKey, planes: Arc<RowPlanes>);

    fn clear(&self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serve `row` from the cache, or fill it with `compute` and store the result.
    fn get_or_compute(&self, key: RowKey, row: &mut Row, compute: &mut dyn FnMut(&mut Row)) {
        if let Some(planes) = self.get(&key) {
            row.copy_planes_from(&planes);
            return;
        }
        compute(row);
        self.insert(key, Arc::new(row.planes().clone()));
    }
}

/// Job handed to `execute_with_epoch`. The flag tells whether the epoch was
/// still current when the job ran, so the job can release its resources
/// either way.
pub type EpochJob = Box<dyn FnOnce(bool) + Send + 'static>;

/// Abstract worker pool interface.
pub trait WorkerPool: Send + Sync {
    fn execute(&self, f: Box<dyn FnOnce() + Send + 'static>);

    /// Run `f` on a worker, passing `false` when `epoch` went stale first.
    fn execute_with_epoch(&self, epoch: u64, f: EpochJob);

    fn current_epoch(&self) -> u64;
}

/// Blanket impl: Arc<T> implements traits if T does
impl<T: RowCache + ?Sized> RowCache for Arc<T> {
    fn get(&self, key: &RowKey) -> Option<Arc<RowPlanes>> {
        (**self).get(key)
    }

    fn insert(&self, key: RowKey, planes: Arc<RowPlanes>) {
        (**self).insert(key, planes)
    }

    fn clear(&self) {
        (**self).clear()
    }

    fn len(&self) -> usize {
        (**self).len()
    }
}

impl<T: WorkerPool + ?Sized> WorkerPool for Arc<T> {
    fn execute(&self, f: Box<dyn FnOnce() + Send + 'static>) {
        (**self).execute(f)
    }

    fn execute_with_epoch(&self, epoch: u64, f: EpochJob) {
        (**self).execute_with_epoch(epoch, f)
    }

    fn current_epoch(&self) -> u64 {
        (**self).current_epoch()
    }
}

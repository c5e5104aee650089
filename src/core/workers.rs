//! Row evaluation thread pool.
//!
//! Work-stealing deques (crossbeam) with a global injector. Row tasks are
//! submitted with the epoch current at dispatch; an abort bumps the shared
//! epoch so tasks still queued are handed `live = false` and only release
//! their row.

use crossbeam::deque::{Injector, Stealer, Worker};
use log::{error, trace};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::entities::{EpochJob, WorkerPool};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size worker pool with epoch-checked submission.
pub struct Workers {
    injector: Arc<Injector<Job>>,
    handles: Vec<thread::JoinHandle<()>>,
    current_epoch: Arc<AtomicU64>, // shared with CacheManager
    shutdown: Arc<AtomicBool>,
}

impl Workers {
    /// Spawn `num_threads` workers sharing `epoch`.
    pub fn new(num_threads: usize, epoch: Arc<AtomicU64>) -> Self {
        let injector: Arc<Injector<Job>> = Arc::new(Injector::new());
        let shutdown = Arc::new(AtomicBool::new(false));

        let locals: Vec<Worker<Job>> = (0..num_threads).map(|_| Worker::new_fifo()).collect();
        let stealers: Vec<Stealer<Job>> = locals.iter().map(|w| w.stealer()).collect();

        let mut handles = Vec::with_capacity(num_threads);
        for (worker_id, local) in locals.into_iter().enumerate() {
            let injector = Arc::clone(&injector);
            let shutdown = Arc::clone(&shutdown);
            let stealers = stealers.clone();

            let spawned = thread::Builder::new()
                .name(format!("nodeplay-row-{}", worker_id))
                .spawn(move || run_worker(worker_id, local, &injector, &stealers, &shutdown));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => error!("Failed to spawn worker {}: {}", worker_id, e),
            }
        }

        trace!("Workers initialized: {} threads", handles.len());

        Self {
            injector,
            handles,
            current_epoch: epoch,
            shutdown,
        }
    }

    pub fn threads(&self) -> usize {
        self.handles.len()
    }

    /// Queue a job. Runs inline if no worker thread could be spawned.
    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.handles.is_empty() {
            f();
            return;
        }
        self.injector.push(Box::new(f));
    }

    pub fn current_epoch(&self) -> u64 {
        self.current_epoch.load(Ordering::SeqCst)
    }

    /// Queue a job whose `live` flag is computed when a worker picks it up.
    pub fn execute_with_epoch<F>(&self, epoch: u64, f: F)
    where
        F: FnOnce(bool) + Send + 'static,
    {
        let current_epoch = Arc::clone(&self.current_epoch);
        self.execute(move || {
            let live = current_epoch.load(Ordering::SeqCst) == epoch;
            f(live);
        });
    }
}

fn run_worker(
    worker_id: usize,
    local: Worker<Job>,
    injector: &Injector<Job>,
    stealers: &[Stealer<Job>],
    shutdown: &AtomicBool,
) {
    trace!("Worker {} started", worker_id);
    loop {
        // own queue, then the injector, then siblings
        let job = local
            .pop()
            .or_else(|| injector.steal_batch_and_pop(&local).success())
            .or_else(|| stealers.iter().find_map(|s| s.steal().success()));

        if let Some(job) = job {
            job();
            continue;
        }

        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        thread::sleep(Duration::from_millis(1));
    }
    trace!("Worker {} stopped", worker_id);
}

impl Drop for Workers {
    fn drop(&mut self) {
        let num_threads = self.handles.len();
        trace!("Workers shutting down ({} threads)...", num_threads);
        self.shutdown.store(true, Ordering::SeqCst);

        let deadline = Instant::now() + Duration::from_millis(500);
        for handle in std::mem::take(&mut self.handles) {
            while !handle.is_finished() {
                if Instant::now() >= deadline {
                    trace!("Shutdown timeout reached, detaching remaining workers");
                    return;
                }
                thread::sleep(Duration::from_millis(1));
            }
            let _ = handle.join();
        }
        trace!("All {} workers stopped", num_threads);
    }
}

impl WorkerPool for Workers {
    fn execute(&self, f: Box<dyn FnOnce() + Send + 'static>) {
        Workers::execute(self, f)
    }

    fn execute_with_epoch(&self, epoch: u64, f: EpochJob) {
        Workers::execute_with_epoch(self, epoch, f)
    }

    fn current_epoch(&self) -> u64 {
        Workers::current_epoch(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn test_all_jobs_run() {
        let workers = Workers::new(3, Arc::new(AtomicU64::new(0)));
        let (tx, rx) = unbounded();
        for i in 0..50 {
            let tx = tx.clone();
            workers.execute(move || {
                let _ = tx.send(i);
            });
        }
        let mut got: Vec<i32> = (0..50).map(|_| rx.recv().unwrap()).collect();
        got.sort_unstable();
        assert_eq!(got, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_stale_epoch_reports_not_live() {
        let epoch = Arc::new(AtomicU64::new(5));
        let workers = Workers::new(2, Arc::clone(&epoch));
        let (tx, rx) = unbounded();

        let t = tx.clone();
        workers.execute_with_epoch(5, move |live| {
            let _ = t.send(live);
        });
        assert!(rx.recv().unwrap());

        epoch.store(6, Ordering::SeqCst);
        workers.execute_with_epoch(5, move |live| {
            let _ = tx.send(live);
        });
        assert!(!rx.recv().unwrap());
    }

    #[test]
    fn test_zero_threads_runs_inline() {
        let workers = Workers::new(0, Arc::new(AtomicU64::new(0)));
        let (tx, rx) = unbounded();
        workers.execute(move || {
            let _ = tx.send(1);
        });
        assert_eq!(rx.try_recv().ok(), Some(1));
    }
}

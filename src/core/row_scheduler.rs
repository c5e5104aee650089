//! Row partitioning and parallel row evaluation.
//!
//! `partition` decides which scanlines a frame needs:
//! - viewer: the display window clipped to the visible span, subsampled by
//!   `1/zoom` when zoomed out, each row tagged with its line in the scaled
//!   buffer
//! - writer: every scanline of the data window, 1:1
//!
//! `dispatch` submits one epoch-checked task per row. A task evaluates the
//! row against the output when the epoch is still current and the row
//! carries at least one channel, then frees the row and reports back.
//! Completion order is unspecified; `RowBatch::wait` returns once every row
//! has reported.

use crossbeam_channel::{Receiver, unbounded};
use log::{debug, trace};
use std::sync::Arc;

use crate::core::engine_state::{EngineSignals, Interrupt};
use crate::core::node_cache::NodeCache;
use crate::entities::{Box2D, ChannelSet, Format, Output, Row, RowContext, WorkerPool};

/// Caching granularity of a computed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachingMode {
    /// Rows span the whole display; the frame may be cached
    WholeFrame,
    /// Only part of the display was computed; do not cache
    VisibleRegion,
    /// Writer output, never cached
    Uncached,
}

/// One planned scanline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedRow {
    /// Image-space scanline
    pub y: i32,
    /// Line in the destination buffer
    pub dst: usize,
}

/// Result of partitioning a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct RowPlan {
    pub rows: Vec<PlannedRow>,
    pub mode: CachingMode,
    /// Horizontal extent each row evaluates
    pub x: i32,
    pub r: i32,
    /// Destination buffer size
    pub width: usize,
    pub height: usize,
}

impl RowPlan {
    /// First and last planned scanline, inclusive.
    pub fn span(&self) -> (i32, i32) {
        match (self.rows.first(), self.rows.last()) {
            (Some(a), Some(b)) => (a.y, b.y),
            _ => (0, -1),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Per-row outcome reported by a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowOutcome {
    Evaluated,
    Skipped,
    Cancelled,
}

/// Counts of a finished batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub evaluated: usize,
    pub skipped: usize,
    pub cancelled: usize,
}

/// Completion handle of a dispatched batch.
pub struct RowBatch {
    rx: Receiver<RowOutcome>,
    count: usize,
}

impl RowBatch {
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Block until every row has been evaluated, skipped or cancelled.
    pub fn wait(self) -> BatchReport {
        let mut report = BatchReport::default();
        for _ in 0..self.count {
            match self.rx.recv() {
                Ok(RowOutcome::Evaluated) => report.evaluated += 1,
                Ok(RowOutcome::Skipped) => report.skipped += 1,
                Ok(RowOutcome::Cancelled) => report.cancelled += 1,
                // a task panicked and dropped its sender
                Err(_) => {
                    report.cancelled += 1;
                }
            }
        }
        trace!("Row batch done: {:?}", report);
        report
    }
}

/// Splits frames into rows and runs them on the worker pool.
pub struct RowScheduler {
    pool: Arc<dyn WorkerPool>,
    cache: Arc<NodeCache>,
}

impl RowScheduler {
    pub fn new(pool: Arc<dyn WorkerPool>, cache: Arc<NodeCache>) -> Self {
        Self { pool, cache }
    }

    /// Plan the rows of one frame.
    ///
    /// `visible` is the inclusive scanline range on screen, used only for
    /// interactive outputs.
    pub fn partition(
        display: &Format,
        data: &Box2D,
        zoom: f32,
        interactive: bool,
        visible: (i32, i32),
    ) -> RowPlan {
        if !interactive {
            let rows = (data.y..data.t)
                .map(|y| PlannedRow {
                    y,
                    dst: (y - data.y) as usize,
                })
                .collect();
            return RowPlan {
                rows,
                mode: CachingMode::Uncached,
                x: data.x,
                r: data.r,
                width: data.width() as usize,
                height: data.height() as usize,
            };
        }

        let zoom = if zoom.is_finite() && zoom > 0.0 { zoom } else { 1.0 };
        let disp = display.bounds;
        let (lo, hi) = (visible.0.max(disp.y), visible.1.min(disp.t - 1));

        let mut rows = Vec::new();
        let (width, height) = if zoom < 1.0 {
            let height = (disp.height() as f32 * zoom).ceil() as usize;
            for dst in 0..height {
                let y = disp.y + (dst as f32 / zoom).floor() as i32;
                if y >= disp.t {
                    break;
                }
                if y >= lo && y <= hi {
                    rows.push(PlannedRow { y, dst });
                }
            }
            ((disp.width() as f32 * zoom).ceil() as usize, height)
        } else {
            for y in lo..=hi {
                rows.push(PlannedRow {
                    y,
                    dst: (y - disp.y) as usize,
                });
            }
            (disp.width() as usize, disp.height() as usize)
        };

        let mode = caching_mode(&rows, display);
        debug!(
            "Partitioned {} rows (zoom {:.3}, mode {:?}, {}x{})",
            rows.len(),
            zoom,
            mode,
            width,
            height
        );
        RowPlan {
            rows,
            mode,
            x: disp.x,
            r: disp.r,
            width,
            height,
        }
    }

    /// Allocate the rows of `plan`, checking for abort/pause between rows.
    pub fn build_rows(
        plan: &RowPlan,
        channels: ChannelSet,
        signals: &EngineSignals,
    ) -> Result<Vec<Row>, Interrupt> {
        let mut rows = Vec::with_capacity(plan.rows.len());
        for planned in &plan.rows {
            if let Some(interrupt) = signals.check() {
                debug!("Row build interrupted: {:?}", interrupt);
                return Err(interrupt);
            }
            rows.push(Row::new(planned.y, plan.x, plan.r, channels).with_zoomed_y(planned.dst));
        }
        Ok(rows)
    }

    /// Evaluate every row against `output` for `frame` on the pool.
    pub fn dispatch(&self, rows: Vec<Row>, output: &Output, frame: i32) -> RowBatch {
        let (tx, rx) = unbounded();
        let count = rows.len();
        let epoch = self.pool.current_epoch();
        let available = output.available_channels();

        for row in rows {
            let tx = tx.clone();
            let output = output.clone();
            let cache = Arc::clone(&self.cache);
            self.pool.execute_with_epoch(
                epoch,
                Box::new(move |live| {
                    let mut row = row;
                    let outcome = if !live {
                        RowOutcome::Cancelled
                    } else if (row.channels() & available).is_empty() {
                        RowOutcome::Skipped
                    } else {
                        let ctx = RowContext {
                            frame,
                            cache: cache.as_ref(),
                        };
                        output.evaluate_row(&mut row, &ctx);
                        RowOutcome::Evaluated
                    };
                    drop(row);
                    let _ = tx.send(outcome);
                }),
            );
        }
        trace!("Dispatched {} rows for frame {} (epoch {})", count, frame, epoch);
        RowBatch { rx, count }
    }

    pub fn node_cache(&self) -> &Arc<NodeCache> {
        &self.cache
    }
}

/// Whole-frame iff the first and last rows reach the display edges, with
/// the spacing of the first two rows as tolerance.
fn caching_mode(rows: &[PlannedRow], display: &Format) -> CachingMode {
    if rows.len() < 2 {
        return CachingMode::VisibleRegion;
    }
    let gap = rows[1].y - rows[0].y;
    let first = rows[0].y;
    let last = rows[rows.len() - 1].y;
    if first <= display.y() + gap && last >= display.top() - 1 - gap {
        CachingMode::WholeFrame
    } else {
        CachingMode::VisibleRegion
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::workers::Workers;
    use crate::entities::{Channel, EpochJob, GraphNode, NodeRef, ViewerOutput};
    use crate::nodes::{BufferViewer, RampSource};
    use std::sync::atomic::AtomicU64;

    #[test]
    fn test_writer_partition_is_one_to_one() {
        let plan = RowScheduler::partition(
            &Format::new(8, 4),
            &Box2D::new(1, 1, 7, 3),
            0.25,
            false,
            (0, 0),
        );
        let ys: Vec<i32> = plan.rows.iter().map(|r| r.y).collect();
        assert_eq!(ys, vec![1, 2]);
        assert_eq!(plan.mode, CachingMode::Uncached);
        assert_eq!((plan.width, plan.height), (6, 2));
    }

    #[test]
    fn test_viewer_full_span_is_whole_frame() {
        let d = Format::new(16, 16);
        let plan = RowScheduler::partition(&d, &d.bounds, 1.0, true, (0, 15));
        assert_eq!(plan.rows.len(), 16);
        assert_eq!(plan.span(), (0, 15));
        assert_eq!(plan.mode, CachingMode::WholeFrame);
    }

    #[test]
    fn test_zoomed_out_subsamples() {
        let d = Format::new(16, 16);
        let plan = RowScheduler::partition(&d, &d.bounds, 0.5, true, (0, 15));
        let ys: Vec<i32> = plan.rows.iter().map(|r| r.y).collect();
        assert_eq!(ys, vec![0, 2, 4, 6, 8, 10, 12, 14]);
        assert_eq!(plan.rows[3].dst, 3);
        assert_eq!((plan.width, plan.height), (8, 8));
        // last row 14 >= 15 - gap(2)
        assert_eq!(plan.mode, CachingMode::WholeFrame);
    }

    #[test]
    fn test_partial_visibility_is_not_cached() {
        let d = Format::new(16, 16);
        let plan = RowScheduler::partition(&d, &d.bounds, 1.0, true, (4, 9));
        assert_eq!(plan.span(), (4, 9));
        assert_eq!(plan.mode, CachingMode::VisibleRegion);
    }

    #[test]
    fn test_build_rows_observes_abort() {
        let d = Format::new(4, 4);
        let plan = RowScheduler::partition(&d, &d.bounds, 1.0, true, (0, 3));
        let signals = EngineSignals::default();
        let rows = RowScheduler::build_rows(&plan, ChannelSet::RGB, &signals).unwrap();
        assert_eq!(rows.len(), 4);
        assert!(rows[2].plane(Channel::Green).is_some());

        signals.abort();
        assert_eq!(
            RowScheduler::build_rows(&plan, ChannelSet::RGB, &signals).err(),
            Some(Interrupt::Aborted)
        );
    }

    fn scheduler(epoch: Arc<AtomicU64>) -> RowScheduler {
        let pool: Arc<dyn WorkerPool> = Arc::new(Workers::new(2, epoch));
        RowScheduler::new(pool, Arc::new(NodeCache::new(64)))
    }

    fn viewer() -> (Output, Arc<BufferViewer>) {
        let src: NodeRef = RampSource::new("src", 1, 3, 8, 8);
        src.validate(true);
        let viewer = BufferViewer::new("viewer", src);
        viewer.validate(true);
        (Output::Viewer(viewer.clone()), viewer)
    }

    #[test]
    fn test_dispatch_evaluates_every_row() {
        let sched = scheduler(Arc::new(AtomicU64::new(0)));
        let (out, viewer) = viewer();
        let d = viewer.display_window();
        let plan = RowScheduler::partition(&d, &d.bounds, 1.0, true, (0, 7));
        viewer.allocate_frame(plan.width, plan.height);
        let rows = RowScheduler::build_rows(&plan, ChannelSet::RGBA, &EngineSignals::default()).unwrap();

        let report = sched.dispatch(rows, &out, 2).wait();
        assert_eq!(report.evaluated, 8);
        assert!(viewer.take_frame().is_some());
    }

    #[test]
    fn test_rows_without_channels_are_skipped() {
        let sched = scheduler(Arc::new(AtomicU64::new(0)));
        let (out, viewer) = viewer();
        let d = viewer.display_window();
        let plan = RowScheduler::partition(&d, &d.bounds, 1.0, true, (0, 7));
        let rows = RowScheduler::build_rows(&plan, ChannelSet::empty(), &EngineSignals::default()).unwrap();
        let report = sched.dispatch(rows, &out, 1).wait();
        assert_eq!(report.skipped, 8);
        assert_eq!(report.evaluated, 0);
    }

    /// Pool that holds jobs until `run_all`, so the epoch can move in between.
    #[derive(Default)]
    struct DeferredPool {
        epoch: AtomicU64,
        jobs: std::sync::Mutex<Vec<(u64, EpochJob)>>,
    }

    impl DeferredPool {
        fn run_all(&self) {
            let jobs = std::mem::take(&mut *self.jobs.lock().unwrap());
            let now = self.current_epoch();
            for (epoch, job) in jobs {
                job(epoch == now);
            }
        }
    }

    impl WorkerPool for DeferredPool {
        fn execute(&self, f: Box<dyn FnOnce() + Send + 'static>) {
            f();
        }
        fn execute_with_epoch(&self, epoch: u64, f: EpochJob) {
            self.jobs.lock().unwrap().push((epoch, f));
        }
        fn current_epoch(&self) -> u64 {
            self.epoch.load(std::sync::atomic::Ordering::SeqCst)
        }
    }

    #[test]
    fn test_stale_epoch_cancels_rows() {
        let pool = Arc::new(DeferredPool::default());
        let sched = RowScheduler::new(pool.clone(), Arc::new(NodeCache::new(64)));
        let (out, viewer) = viewer();
        let d = viewer.display_window();
        let plan = RowScheduler::partition(&d, &d.bounds, 1.0, true, (0, 7));
        let rows = RowScheduler::build_rows(&plan, ChannelSet::RGB, &EngineSignals::default()).unwrap();

        let batch = sched.dispatch(rows, &out, 1);
        pool.epoch.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        pool.run_all();

        let report = batch.wait();
        assert_eq!(report.cancelled, 8);
        assert_eq!(report.evaluated, 0);
    }
}

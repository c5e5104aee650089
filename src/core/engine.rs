//! Playback engine: the frame request state machine.
//!
//! One control thread drives `start`, which loops over `request_frame`
//! until the sequence ends:
//!
//! ```text
//! Requesting --cache hit--> Presenting --> advance --> Requesting ...
//!      \--miss--> read sources --> Dispatching --rows done--> Presenting
//! ```
//!
//! Every entry to `Requesting` checks the terminal conditions: abort
//! (discard deferred requests, stop), pause or zero remaining (stop, then
//! run deferred requests), a single-frame viewer range already shown, and a
//! writer past its last frame. Collaborator faults (decode, transfer, encode)
//! stop the engine and surface as `Err`.
//!
//! Other threads talk to a running engine through an [`EngineHandle`].

use crossbeam_channel::bounded;
use log::{debug, error, info, trace, warn};
use std::sync::{Arc, Mutex};

use crate::config::EngineSettings;
use crate::core::cache_man::CacheManager;
use crate::core::dag::Dag;
use crate::core::engine_events::{
    EngineStartedEvent, EngineStoppedEvent, FpsChangedEvent, FrameDoneEvent, OutputChangedEvent,
};
use crate::core::engine_state::{
    EngineSignals, EngineState, EngineStatus, Interrupt, PlaybackRequest, RequestKind,
};
use crate::core::event_bus::EventBus;
use crate::core::frame_cache::{CacheKey, CacheStrategy, FrameCache, RenderParams};
use crate::core::graph_version::GraphVersion;
use crate::core::lookahead::Lookahead;
use crate::core::node_cache::NodeCache;
use crate::core::row_scheduler::{CachingMode, RowScheduler};
use crate::core::task_queue::TaskQueue;
use crate::core::timer::PlaybackTimer;
use crate::core::workers::Workers;
use crate::entities::{
    DecodeRequest, EngineError, FrameEntry, Output, PresentationSurface, RowCache, ViewerOutput,
    WorkerPool,
};

/// Outcome of one pass through `Requesting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Continue,
    Stop,
}

/// State shared with `EngineHandle`s.
#[derive(Debug, Default)]
struct EngineShared {
    signals: EngineSignals,
    tasks: Mutex<TaskQueue<PlaybackRequest>>,
    status: Mutex<EngineStatus>,
}

/// Cloneable, `Send` remote control for an engine running on another thread.
#[derive(Clone)]
pub struct EngineHandle {
    shared: Arc<EngineShared>,
    manager: Arc<CacheManager>,
}

impl EngineHandle {
    /// Stop at the next boundary, discarding deferred requests and
    /// cancelling queued row tasks.
    pub fn abort(&self) {
        self.shared.signals.abort();
        self.manager.increment_epoch();
        debug!("Abort requested");
    }

    /// Stop after the frame in flight, then run deferred requests.
    pub fn pause(&self) {
        self.shared.signals.pause();
        debug!("Pause requested");
    }

    /// Queue a request for the end of the current cycle.
    pub fn defer(&self, request: PlaybackRequest) {
        self.shared
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .append(request);
    }

    /// Pause and show `frame` once the engine is free.
    pub fn seek(&self, frame: i32) {
        self.pause();
        self.defer(PlaybackRequest::seek(frame, 1, true));
    }

    pub fn status(&self) -> EngineStatus {
        *self.shared.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_working(&self) -> bool {
        self.status().working
    }

    pub fn pending_tasks(&self) -> usize {
        self.shared
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

pub struct PlaybackEngine {
    settings: EngineSettings,
    dag: Dag,
    version: GraphVersion,
    last_version: Option<u64>,
    manager: Arc<CacheManager>,
    frame_cache: Arc<FrameCache>,
    node_cache: Arc<NodeCache>,
    workers: Arc<Workers>,
    scheduler: RowScheduler,
    lookahead: Lookahead,
    timer: PlaybackTimer,
    bus: EventBus,
    surface: Option<Arc<dyn PresentationSurface>>,
    surface_size: Option<(usize, usize)>,
    shared: Arc<EngineShared>,
    status: EngineStatus,
    same_frame: bool,
    fit_to_view: bool,
    sequence_started: bool,
}

impl PlaybackEngine {
    /// Engine with a memory budget taken from the machine.
    pub fn new(settings: EngineSettings) -> Result<Self, EngineError> {
        let manager = Arc::new(CacheManager::new(
            settings.cache_memory_percent / 100.0,
            settings.cache_reserve_gb,
        ));
        Self::with_manager(settings, manager)
    }

    pub fn with_manager(
        settings: EngineSettings,
        manager: Arc<CacheManager>,
    ) -> Result<Self, EngineError> {
        settings.validate()?;

        let workers = Arc::new(Workers::new(settings.worker_threads(), manager.epoch_ref()));
        let node_cache = Arc::new(NodeCache::new(settings.node_cache_rows));
        let pool: Arc<dyn WorkerPool> = workers.clone();
        let scheduler = RowScheduler::new(pool, Arc::clone(&node_cache));
        let frame_cache = Arc::new(FrameCache::new(Arc::clone(&manager), settings.cache_strategy));

        let status = EngineStatus {
            loop_enabled: settings.loop_enabled,
            ..EngineStatus::default()
        };
        let shared = Arc::new(EngineShared::default());
        *shared.status.lock().unwrap_or_else(|e| e.into_inner()) = status;

        info!(
            "PlaybackEngine ready: {} workers, {:.2} fps, cache {:?}",
            workers.threads(),
            settings.fps,
            settings.cache_strategy
        );

        Ok(Self {
            timer: PlaybackTimer::new(settings.fps),
            settings,
            dag: Dag::new(),
            version: GraphVersion::new(),
            last_version: None,
            manager,
            frame_cache,
            node_cache,
            workers,
            scheduler,
            lookahead: Lookahead::new(),
            bus: EventBus::new(),
            surface: None,
            surface_size: None,
            shared,
            status,
            same_frame: false,
            fit_to_view: false,
            sequence_started: false,
        })
    }

    // ========== Accessors ==========

    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            shared: Arc::clone(&self.shared),
            manager: Arc::clone(&self.manager),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn status(&self) -> EngineStatus {
        self.status
    }

    pub fn dag(&self) -> &Dag {
        &self.dag
    }

    pub fn frame_cache(&self) -> &FrameCache {
        &self.frame_cache
    }

    pub fn node_cache(&self) -> &NodeCache {
        &self.node_cache
    }

    pub fn graph_version(&self) -> u64 {
        self.version.value()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn set_surface(&mut self, surface: Arc<dyn PresentationSurface>) {
        self.surface = Some(surface);
        self.surface_size = None;
    }

    pub fn set_desired_fps(&mut self, fps: f64) {
        self.timer.set_desired_fps(fps);
        self.settings.fps = self.timer.desired_fps();
        info!("Desired fps: {:.3}", self.settings.fps);
    }

    pub fn set_loop_mode(&mut self, enabled: bool) {
        self.status.loop_enabled = enabled;
        self.settings.loop_enabled = enabled;
        self.publish();
    }

    pub fn set_cache_strategy(&mut self, strategy: CacheStrategy) {
        self.frame_cache.set_strategy(strategy);
        self.settings.cache_strategy = strategy;
    }

    pub fn abort(&self) {
        self.handle().abort();
    }

    pub fn pause(&self) {
        self.handle().pause();
    }

    // ========== Graph ==========

    /// Switch the active output without starting playback.
    pub fn change_output(&mut self, output: Option<Output>) {
        let name = output.as_ref().map(Output::name);
        info!("Output changed: {:?}", name);
        self.dag.rebuild(output);
        self.refresh_version();
        self.bus.emit(OutputChangedEvent(name));
    }

    /// Rebuild after a topology edit upstream of the current output.
    pub fn graph_changed(&mut self) {
        let output = self.dag.output().cloned();
        self.dag.rebuild(output);
        self.refresh_version();
    }

    /// Recompute the graph hash; a changed hash invalidates both caches.
    fn refresh_version(&mut self) {
        let value = self.version.recompute(self.dag.output());
        if self.last_version != Some(value) {
            if self.last_version.is_some() {
                debug!("Graph version changed, clearing caches");
                self.frame_cache.invalidate_all();
                self.node_cache.clear();
                self.dag.invalidate();
            }
            self.last_version = Some(value);
        }
    }

    /// Log the nodes reachable from the output.
    pub fn debug_tree(&self) {
        info!(
            "Tree: {} nodes, {} sources: {}",
            self.dag.len(),
            self.dag.sources().len(),
            self.dag.debug_order().join(" -> ")
        );
    }

    // ========== Sequence ==========

    /// Start producing `frame_count` frames (-1 = unbounded).
    ///
    /// No-op while working, without an output, or without sources.
    pub fn start(
        &mut self,
        frame_count: i32,
        fit_to_view: bool,
        forward: bool,
        same_frame: bool,
    ) -> Result<(), EngineError> {
        if self.status.working {
            debug!("start ignored: engine busy");
            return Ok(());
        }
        let Some(output) = self.dag.output().cloned() else {
            debug!("start ignored: no output");
            return Ok(());
        };
        // upstream edits may have rewired the graph since the last sequence
        self.dag.rebuild(Some(output.clone()));
        if self.dag.sources().is_empty() {
            debug!("start ignored: no sources feed {}", output.name());
            return Ok(());
        }

        self.shared.signals.reset();
        self.status = EngineStatus {
            state: EngineState::Requesting,
            working: true,
            aborted: false,
            paused: false,
            forward,
            requests_remaining: frame_count,
            request_index: 0,
            ..self.status
        };
        self.same_frame = same_frame;
        self.fit_to_view = fit_to_view;
        self.sequence_started = false;
        self.timer.reset();
        self.refresh_version();
        self.publish();

        info!(
            "Sequence start: output={} count={} forward={} same_frame={}",
            output.name(),
            frame_count,
            forward,
            same_frame
        );
        self.bus.emit(EngineStartedEvent {
            frame_count,
            forward,
        });

        let mut recursive = false;
        loop {
            match self.request_frame(recursive) {
                Ok(Step::Continue) => recursive = true,
                Ok(Step::Stop) => return Ok(()),
                Err(e) => {
                    error!("Sequence stopped: {}", e);
                    if self.status.working {
                        self.stop();
                    }
                    return Err(e);
                }
            }
        }
    }

    /// One pass through `Requesting`, ending in a presented frame or a stop.
    fn request_frame(&mut self, recursive: bool) -> Result<Step, EngineError> {
        self.set_state(EngineState::Requesting);
        let Some(output) = self.dag.output().cloned() else {
            self.stop();
            return Ok(Step::Stop);
        };

        if !self.same_frame && self.shared.signals.is_aborted() {
            return Ok(self.abort_sequence());
        }
        if self.shared.signals.is_paused() || self.status.requests_remaining == 0 {
            return self.finish_sequence();
        }

        self.dag.validate();
        let (first, last) = self.dag.frame_range();
        if first > last {
            debug!("Empty frame range [{}, {}]", first, last);
            return self.finish_sequence();
        }

        if output.is_viewer()
            && first == last
            && self.status.requests_remaining == -1
            && self.status.request_index == 1
        {
            return self.finish_sequence();
        }

        if recursive {
            // new sequential frame: per-node results are stale
            self.node_cache.clear();
            if self.frame_cache.strategy() == CacheStrategy::ClearOnAdvance {
                self.frame_cache.invalidate_all();
            }
        }

        match &output {
            Output::Writer(writer) => {
                if recursive {
                    writer.increment_frame();
                } else {
                    writer.set_to_start();
                }
                if writer.current_frame() > writer.last_frame() {
                    debug!("Writer past last frame {}", writer.last_frame());
                    self.stop();
                    return Ok(Step::Stop);
                }
                self.status.current_frame = writer.current_frame();
            }
            Output::Viewer(viewer) => {
                if !recursive {
                    viewer.seek(viewer.current_frame().clamp(first, last));
                    if self.fit_to_view {
                        viewer.fit_to_format(&viewer.display_window());
                        for src in self.dag.sources().iter().filter_map(|s| s.as_source()) {
                            src.set_fit_to_view(true);
                        }
                    }
                } else if !self.same_frame {
                    let Some(next) = self.next_viewer_frame(viewer.current_frame(), first, last)
                    else {
                        // end of range without loop: stop on the next entry
                        self.status.requests_remaining = 0;
                        self.publish();
                        return Ok(Step::Continue);
                    };
                    viewer.seek(next);
                }
                self.status.current_frame = viewer.current_frame();
            }
        }

        let frame = self.status.current_frame;
        trace!("Requesting frame {}", frame);

        let key = output.as_viewer().map(|v| self.cache_key(v, frame));
        if let Some(key) = &key {
            if let Some(entry) = self.frame_cache.lookup(key) {
                return self.present_cached(&output, frame, &entry);
            }
        }

        self.read_sources(frame)?;
        self.compute_tree(&output, frame, key)
    }

    /// Step one frame in the current direction, wrapping under loop mode.
    fn next_viewer_frame(&self, current: i32, first: i32, last: i32) -> Option<i32> {
        let next = if self.status.forward { current + 1 } else { current - 1 };
        if (first..=last).contains(&next) {
            Some(next)
        } else if self.status.loop_enabled {
            Some(if self.status.forward { first } else { last })
        } else {
            None
        }
    }

    fn cache_key(&self, viewer: &Arc<dyn ViewerOutput>, frame: i32) -> CacheKey {
        let source = self
            .dag
            .sources()
            .iter()
            .filter_map(|s| s.as_source())
            .map(|s| s.frame_name(frame))
            .collect::<Vec<_>>()
            .join("|");
        CacheKey {
            source,
            graph_hash: self.version.value(),
            params: RenderParams {
                zoom: viewer.zoom_factor(),
                exposure: viewer.exposure(),
                transform: viewer.color_transform(),
                bit_depth: viewer.bit_depth(),
                data_window: viewer.data_window(),
                display_window: viewer.display_window(),
            },
        }
    }

    /// Decode every source for `frame`, consuming the look-ahead slot when it matches.
    fn read_sources(&mut self, frame: i32) -> Result<(), EngineError> {
        let sources = self.dag.sources().to_vec();
        for node in &sources {
            let Some(src) = node.as_source() else {
                continue;
            };
            let decoded = match self.lookahead.take(node.uuid(), frame) {
                Some(result) => result?,
                None => src.decode(DecodeRequest {
                    frame,
                    use_current_thread: true,
                    use_other_thread: false,
                    forward: self.status.forward,
                })?,
            };
            for mut d in decoded {
                d.wait()?;
            }
        }
        Ok(())
    }

    fn present_cached(
        &mut self,
        output: &Output,
        frame: i32,
        entry: &FrameEntry,
    ) -> Result<Step, EngineError> {
        self.set_state(EngineState::Presenting);
        for src in self.dag.sources().iter().filter_map(|s| s.as_source()) {
            let mut d = src.open_cached(entry, frame, false);
            d.wait()?;
        }
        self.transfer(entry)?;
        self.bus.emit(FrameDoneEvent {
            frame,
            from_cache: true,
        });
        self.advance(output)
    }

    /// Partition, dispatch, wait, then present or encode.
    fn compute_tree(
        &mut self,
        output: &Output,
        frame: i32,
        key: Option<CacheKey>,
    ) -> Result<Step, EngineError> {
        self.set_state(EngineState::Dispatching);

        let (plan, channels) = match output {
            Output::Viewer(viewer) => {
                let display = viewer.display_window();
                let plan = RowScheduler::partition(
                    &display,
                    &viewer.data_window(),
                    viewer.zoom_factor(),
                    true,
                    viewer.visible_rows(),
                );
                viewer.set_row_span(plan.span());
                viewer.allocate_frame(plan.width, plan.height);
                (plan, viewer.display_channels() & viewer.available_channels())
            }
            Output::Writer(writer) => {
                if !self.sequence_started {
                    writer.begin_encode_sequence()?;
                    self.sequence_started = true;
                }
                let info = writer.info();
                let plan = RowScheduler::partition(&info.display, &info.data, 1.0, false, (0, 0));
                (plan, writer.requested_channels() & info.channels)
            }
        };

        let rows = match RowScheduler::build_rows(&plan, channels, &self.shared.signals) {
            Ok(rows) => rows,
            Err(Interrupt::Aborted) => return Ok(self.abort_sequence()),
            Err(Interrupt::Paused) => return self.finish_sequence(),
        };

        let report = self.scheduler.dispatch(rows, output, frame).wait();
        if self.shared.signals.is_aborted() || report.cancelled > 0 {
            debug!("Frame {} discarded after abort ({:?})", frame, report);
            return Ok(self.abort_sequence());
        }

        self.set_state(EngineState::Presenting);
        match output {
            Output::Viewer(viewer) => {
                let Some(buffer) = viewer.take_frame() else {
                    warn!("Viewer produced no buffer for frame {}", frame);
                    return self.advance(output);
                };
                let entry = FrameEntry::new(buffer);
                if plan.mode == CachingMode::WholeFrame {
                    if let Some(key) = key {
                        self.frame_cache.insert(key, entry.clone());
                    }
                }
                self.transfer(&entry)?;
            }
            Output::Writer(writer) => writer.encode_current_frame()?,
        }
        self.bus.emit(FrameDoneEvent {
            frame,
            from_cache: false,
        });
        self.advance(output)
    }

    /// Copy `entry` into a staging buffer on a worker and upload it.
    fn transfer(&mut self, entry: &FrameEntry) -> Result<(), EngineError> {
        let Some(surface) = self.surface.clone() else {
            return Ok(());
        };
        let size = (entry.width, entry.height);
        if self.surface_size != Some(size) {
            surface.resize(size.0, size.1);
            self.surface_size = Some(size);
        }

        let staging = surface.map_staging(entry.mem())?;
        let buffer = Arc::clone(&entry.buffer);
        let (tx, rx) = bounded(1);
        Workers::execute(&self.workers, move || {
            let mut staging = staging;
            staging.data.clear();
            staging.data.extend_from_slice(buffer.as_bytes());
            let _ = tx.send(surface.upload(staging, size.0, size.1));
        });
        rx.recv()
            .unwrap_or_else(|_| Err(EngineError::Transfer("upload task dropped".into())))
    }

    /// Post-presentation bookkeeping, then back to `Requesting`.
    fn advance(&mut self, output: &Output) -> Result<Step, EngineError> {
        if self.same_frame {
            return self.finish_sequence();
        }
        if self.status.requests_remaining > 0 {
            self.status.requests_remaining -= 1;
        }
        self.status.request_index += 1;
        self.prefetch_next(output);

        if output.is_viewer() {
            self.timer.wait_until_next_frame_is_due();
            if self.status.request_index % self.settings.fps_refresh_interval == 0 {
                let fps = self.timer.actual_frame_rate();
                self.status.fps = fps;
                self.bus.emit(FpsChangedEvent(fps));
            }
            if let Some(surface) = &self.surface {
                surface.redraw();
            }
        }
        self.publish();
        Ok(Step::Continue)
    }

    /// Queue the next frame of the first source on the look-ahead thread.
    fn prefetch_next(&mut self, output: &Output) {
        if !self.settings.lookahead || self.status.requests_remaining == 0 {
            return;
        }
        let next = match output {
            Output::Writer(w) => Some(w.current_frame() + 1).filter(|f| *f <= w.last_frame()),
            Output::Viewer(_) => {
                let (first, last) = self.dag.frame_range();
                self.next_viewer_frame(self.status.current_frame, first, last)
            }
        };
        let (Some(next), Some(node)) = (next, self.dag.sources().first().cloned()) else {
            return;
        };
        if let Some(viewer) = output.as_viewer() {
            if self.frame_cache.contains(&self.cache_key(viewer, next)) {
                return;
            }
        }
        self.lookahead.prefetch(&node, next, self.status.forward);
    }

    /// Abort path: deferred requests are discarded.
    fn abort_sequence(&mut self) -> Step {
        self.set_state(EngineState::Aborting);
        self.shared
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.stop();
        Step::Stop
    }

    /// Pause / exhaustion path: stop, then honor deferred requests.
    fn finish_sequence(&mut self) -> Result<Step, EngineError> {
        if self.shared.signals.is_paused() {
            self.set_state(EngineState::Paused);
        }
        self.stop();
        self.run_tasks()?;
        Ok(Step::Stop)
    }

    /// Back to idle. Counters are kept for status queries.
    fn stop(&mut self) {
        self.status.state = EngineState::Idle;
        self.status.working = false;
        self.status.aborted = false;
        self.status.paused = false;
        self.shared.signals.reset();
        // the helper may still be writing into a source
        self.lookahead.reset();
        for src in self.dag.sources().iter().filter_map(|s| s.as_source()) {
            src.release_buffers();
        }
        self.publish();
        info!("Sequence stopped after {} frames", self.status.request_index);
        self.bus.emit(EngineStoppedEvent {
            frames_done: self.status.request_index,
        });
    }

    fn set_state(&mut self, state: EngineState) {
        if self.status.state != state {
            trace!("Engine state: {:?} -> {:?}", self.status.state, state);
            self.status.state = state;
            self.status.aborted = state == EngineState::Aborting;
            self.status.paused = state == EngineState::Paused;
            self.publish();
        }
    }

    fn publish(&self) {
        *self.shared.status.lock().unwrap_or_else(|e| e.into_inner()) = self.status;
    }

    // ========== Deferred requests ==========

    /// Run requests queued by handles while the engine was idle.
    pub fn run_pending(&mut self) -> Result<(), EngineError> {
        if self.status.working {
            return Ok(());
        }
        self.run_tasks()
    }

    /// Take the whole queue, then run each request in order.
    fn run_tasks(&mut self) -> Result<(), EngineError> {
        let batch = self
            .shared
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take_all();
        for request in batch {
            self.execute_request(request)?;
        }
        Ok(())
    }

    fn execute_request(&mut self, request: PlaybackRequest) -> Result<(), EngineError> {
        debug!("Running request {:?} frame {}", request.kind, request.frame);
        match request.kind {
            RequestKind::Seek => {
                if let Some(viewer) = self.dag.output().and_then(Output::as_viewer) {
                    viewer.seek(request.frame);
                }
                self.start(
                    request.frame_count,
                    request.fit_to_view,
                    request.forward,
                    request.same_frame,
                )
            }
            RequestKind::ChangeOutput => {
                self.change_output(request.output);
                if self.dag.has_frames() {
                    self.start(1, true, true, false)
                } else {
                    Ok(())
                }
            }
        }
    }

    // ========== Navigation ==========
    //
    // These run immediately. A running sequence holds `&mut self`, so other
    // threads redirect it through `EngineHandle::seek` / `defer` instead.

    fn current_frame(&self) -> i32 {
        match self.dag.output() {
            Some(Output::Viewer(v)) => v.current_frame(),
            Some(Output::Writer(w)) => w.current_frame(),
            None => self.status.current_frame,
        }
    }

    fn validated_range(&mut self) -> (i32, i32) {
        self.dag.validate();
        self.dag.frame_range()
    }

    pub fn play_forward(&mut self) -> Result<(), EngineError> {
        let frame = self.current_frame();
        self.execute_request(PlaybackRequest::seek(frame, -1, true))
    }

    pub fn play_backward(&mut self) -> Result<(), EngineError> {
        let frame = self.current_frame();
        self.execute_request(PlaybackRequest::seek(frame, -1, false))
    }

    /// Show `frame`. Frames outside the output's range are ignored.
    pub fn seek(&mut self, frame: i32) -> Result<(), EngineError> {
        let (first, last) = self.validated_range();
        if !(first..=last).contains(&frame) {
            debug!("Seek to {} ignored: outside [{}, {}]", frame, first, last);
            return Ok(());
        }
        self.execute_request(PlaybackRequest::seek(frame, 1, true))
    }

    pub fn next_frame(&mut self) -> Result<(), EngineError> {
        let (first, last) = self.validated_range();
        let cur = self.current_frame();
        match (cur + 1 > last, self.status.loop_enabled) {
            (false, _) => self.seek(cur + 1),
            (true, true) => self.seek(first),
            (true, false) => Ok(()),
        }
    }

    pub fn previous_frame(&mut self) -> Result<(), EngineError> {
        let (first, last) = self.validated_range();
        let cur = self.current_frame();
        match (cur - 1 < first, self.status.loop_enabled) {
            (false, _) => self.seek(cur - 1),
            (true, true) => self.seek(last),
            (true, false) => Ok(()),
        }
    }

    pub fn first_frame(&mut self) -> Result<(), EngineError> {
        let (first, _) = self.validated_range();
        self.seek(first)
    }

    pub fn last_frame(&mut self) -> Result<(), EngineError> {
        let (_, last) = self.validated_range();
        self.seek(last)
    }

    pub fn next_increment(&mut self, n: i32) -> Result<(), EngineError> {
        let frame = self.current_frame() + n;
        self.seek(frame)
    }

    pub fn previous_increment(&mut self, n: i32) -> Result<(), EngineError> {
        let frame = self.current_frame() - n;
        self.seek(frame)
    }

    /// Re-render the current frame without advancing.
    pub fn refresh(&mut self) -> Result<(), EngineError> {
        let frame = self.current_frame();
        self.execute_request(PlaybackRequest::refresh(frame))
    }

    /// Switch output, then show one frame if any source has frames.
    pub fn change_output_and_start(&mut self, output: Option<Output>) -> Result<(), EngineError> {
        self.execute_request(PlaybackRequest::change_output(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::NodeRef;
    use crate::nodes::{BufferViewer, HeadlessSurface, RampSource};

    fn engine() -> PlaybackEngine {
        let settings = EngineSettings {
            fps: 1000.0,
            workers: 2,
            ..Default::default()
        };
        PlaybackEngine::with_manager(settings, Arc::new(CacheManager::with_limit(64 << 20))).unwrap()
    }

    fn viewer(first: i32, last: i32) -> (Arc<RampSource>, Arc<BufferViewer>) {
        let src = RampSource::new("src", first, last, 8, 8);
        let viewer = BufferViewer::new("viewer", src.clone() as NodeRef);
        (src, viewer)
    }

    #[test]
    fn test_start_without_output_is_noop() {
        let mut e = engine();
        assert!(e.start(-1, false, true, false).is_ok());
        assert_eq!(e.status().state, EngineState::Idle);
        assert_eq!(e.status().request_index, 0);
    }

    #[test]
    fn test_single_frame_request() {
        let mut e = engine();
        let (_, viewer) = viewer(1, 5);
        let surface = HeadlessSurface::new();
        e.set_surface(surface.clone());
        e.change_output(Some(Output::Viewer(viewer.clone())));
        viewer.seek(3);
        e.start(1, false, true, false).unwrap();

        let s = e.status();
        assert_eq!(s.state, EngineState::Idle);
        assert!(!s.working);
        assert_eq!(s.request_index, 1);
        assert_eq!(s.requests_remaining, 0);
        assert_eq!(surface.uploaded_frames(), 1);
        assert_eq!(e.frame_cache().len(), 1);
    }

    #[test]
    fn test_seek_out_of_range_is_ignored() {
        let mut e = engine();
        let (_, viewer) = viewer(1, 5);
        e.change_output(Some(Output::Viewer(viewer.clone())));
        viewer.seek(2);
        e.seek(9).unwrap();
        assert_eq!(viewer.current_frame(), 2);
        e.seek(4).unwrap();
        assert_eq!(viewer.current_frame(), 4);
    }

    #[test]
    fn test_second_play_hits_cache() {
        let mut e = engine();
        let (src, viewer) = viewer(1, 3);
        e.change_output(Some(Output::Viewer(viewer.clone())));
        viewer.seek(1);
        e.start(3, false, true, false).unwrap();
        let decodes = src.decode_count();
        assert_eq!(e.frame_cache().len(), 3);

        viewer.seek(1);
        e.start(3, false, true, false).unwrap();
        assert_eq!(src.decode_count(), decodes);
        assert_eq!(e.frame_cache().stats().hits(), 3);
    }

    #[test]
    fn test_clear_on_advance_keeps_one_frame() {
        let mut e = engine();
        e.set_cache_strategy(CacheStrategy::ClearOnAdvance);
        let (_, viewer) = viewer(1, 4);
        e.change_output(Some(Output::Viewer(viewer.clone())));
        viewer.seek(1);
        e.start(4, false, true, false).unwrap();
        assert_eq!(e.frame_cache().len(), 1);
    }

    #[test]
    fn test_backward_wraps_to_last() {
        let mut e = engine();
        let (_, viewer) = viewer(1, 5);
        e.change_output(Some(Output::Viewer(viewer.clone())));
        viewer.seek(2);
        e.start(3, false, false, false).unwrap();
        // 2, 1, 5
        assert_eq!(viewer.current_frame(), 5);
    }

    #[test]
    fn test_change_output_without_frames_does_not_start() {
        let mut e = engine();
        let (_, viewer) = viewer(5, 1);
        e.change_output_and_start(Some(Output::Viewer(viewer))).unwrap();
        assert_eq!(e.status().request_index, 0);
        assert_eq!(e.dag().len(), 2);
    }

    #[test]
    fn test_graph_edit_invalidates_cache() {
        let mut e = engine();
        let (src, viewer) = viewer(1, 3);
        e.change_output(Some(Output::Viewer(viewer.clone())));
        e.refresh().unwrap();
        assert_eq!(e.frame_cache().len(), 1);
        let before = e.graph_version();

        src.set_attr(crate::entities::keys::A_SPEED, 0.5f32);
        e.refresh().unwrap();
        assert_ne!(e.graph_version(), before);
        assert_eq!(e.frame_cache().len(), 1);
    }

    #[test]
    fn test_handle_reflects_status() {
        let mut e = engine();
        let handle = e.handle();
        let (_, viewer) = viewer(1, 2);
        e.change_output(Some(Output::Viewer(viewer)));
        e.start(2, false, true, false).unwrap();
        assert!(!handle.is_working());
        assert_eq!(handle.status().request_index, 2);

        handle.defer(PlaybackRequest::seek(1, 1, true));
        assert_eq!(handle.pending_tasks(), 1);
        e.run_pending().unwrap();
        assert_eq!(handle.pending_tasks(), 0);
        assert_eq!(handle.status().request_index, 1);
    }
}

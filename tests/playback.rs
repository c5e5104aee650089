use std::error::Error;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use nodeplay::core::cache_man::CacheManager;
use nodeplay::core::engine::PlaybackEngine;
use nodeplay::core::engine_events::FrameDoneEvent;
use nodeplay::core::engine_state::{EngineState, PlaybackRequest};
use nodeplay::entities::keys::A_WIDTH;
use nodeplay::entities::{
    Attrs, EngineError, GraphNode, NodeInfo, NodeRef, Output, Row, RowContext, ViewerOutput,
};
use nodeplay::nodes::{BufferViewer, GradeNode, HeadlessSurface, RampSource, SequenceWriter};
use nodeplay::EngineSettings;
use uuid::Uuid;

type TestResult = Result<(), Box<dyn Error>>;

fn engine() -> Result<PlaybackEngine, EngineError> {
    engine_with_lookahead(true)
}

fn engine_with_lookahead(lookahead: bool) -> Result<PlaybackEngine, EngineError> {
    let settings = EngineSettings {
        fps: 1000.0,
        workers: 2,
        lookahead,
        ..Default::default()
    };
    PlaybackEngine::with_manager(settings, Arc::new(CacheManager::with_limit(64 << 20)))
}

/// Frames reported by `FrameDoneEvent`, with their cache flag.
fn record_frames(engine: &PlaybackEngine) -> Arc<Mutex<Vec<(i32, bool)>>> {
    let frames = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&frames);
    engine.bus().subscribe::<FrameDoneEvent, _>(move |e| {
        sink.lock().unwrap().push((e.frame, e.from_cache));
    });
    frames
}

fn shown(frames: &Mutex<Vec<(i32, bool)>>) -> Vec<i32> {
    frames.lock().unwrap().iter().map(|(f, _)| *f).collect()
}

fn viewer_graph(first: i32, last: i32) -> (Arc<RampSource>, Arc<BufferViewer>) {
    let src = RampSource::new("plate", first, last, 16, 8);
    let grade: NodeRef = GradeNode::new("grade", src.clone(), 1.2, 0.0);
    (src, BufferViewer::new("viewer", grade))
}

/// Pass-through node whose rows block until the gate opens.
struct GateNode {
    id: Uuid,
    input: NodeRef,
    entered: AtomicUsize,
    open: Mutex<bool>,
    cv: Condvar,
}

impl GateNode {
    fn new(input: NodeRef) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            input,
            entered: AtomicUsize::new(0),
            open: Mutex::new(false),
            cv: Condvar::new(),
        })
    }

    fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.cv.notify_all();
    }
}

impl GraphNode for GateNode {
    fn uuid(&self) -> Uuid {
        self.id
    }
    fn name(&self) -> String {
        "gate".into()
    }
    fn node_type(&self) -> &'static str {
        "Gate"
    }
    fn parents(&self) -> Vec<NodeRef> {
        vec![self.input.clone()]
    }
    fn attrs(&self) -> Attrs {
        Attrs::new()
    }
    fn info(&self) -> NodeInfo {
        self.input.info()
    }
    fn validate(&self, _for_real: bool) {}
    fn evaluate_row(&self, row: &mut Row, ctx: &RowContext<'_>) {
        self.entered.fetch_add(1, Ordering::SeqCst);
        let guard = self.open.lock().unwrap();
        let _unused = self
            .cv
            .wait_timeout_while(guard, Duration::from_secs(5), |open| !*open)
            .unwrap();
        self.input.evaluate_row(row, ctx);
    }
}

#[test]
fn writer_encodes_every_frame_in_range() -> TestResult {
    let dir = tempfile::tempdir()?;
    let pattern = dir.path().join("render/frame.####.png");
    let src = RampSource::new("plate", 1, 10, 8, 4);
    let grade: NodeRef = GradeNode::new("grade", src, 0.8, 0.1);
    let writer = SequenceWriter::new("write", grade, pattern.to_str().unwrap(), 1, 10);

    let mut engine = engine()?;
    let frames = record_frames(&engine);
    engine.change_output(Some(Output::Writer(writer.clone())));
    engine.start(-1, false, true, false)?;

    assert_eq!(writer.encoded_frames(), (1..=10).collect::<Vec<_>>());
    assert_eq!(shown(&frames), (1..=10).collect::<Vec<_>>());
    assert!(dir.path().join("render/frame.0001.png").exists());
    assert!(dir.path().join("render/frame.0010.png").exists());
    assert!(!dir.path().join("render/frame.0011.png").exists());
    // writers never populate the frame cache
    assert!(engine.frame_cache().is_empty());
    assert_eq!(engine.status().state, EngineState::Idle);
    Ok(())
}

#[test]
fn viewer_wraps_under_loop() -> TestResult {
    let (_, viewer) = viewer_graph(1, 5);
    let mut engine = engine()?;
    let frames = record_frames(&engine);
    engine.change_output(Some(Output::Viewer(viewer.clone())));

    viewer.seek(5);
    engine.start(3, false, true, false)?;
    assert_eq!(shown(&frames), vec![5, 1, 2]);
    assert_eq!(viewer.current_frame(), 2);
    Ok(())
}

#[test]
fn viewer_stops_at_range_end_without_loop() -> TestResult {
    let (_, viewer) = viewer_graph(1, 5);
    let surface = HeadlessSurface::new();
    let mut engine = engine()?;
    let frames = record_frames(&engine);
    engine.set_surface(surface.clone());
    engine.set_loop_mode(false);
    engine.change_output(Some(Output::Viewer(viewer.clone())));

    viewer.seek(4);
    engine.start(-1, false, true, false)?;
    assert_eq!(shown(&frames), vec![4, 5]);
    assert_eq!(surface.uploaded_frames(), 2);
    assert_eq!(surface.size(), (16, 8));
    let status = engine.status();
    assert_eq!(status.state, EngineState::Idle);
    assert!(!status.working);
    Ok(())
}

#[test]
fn single_frame_range_shows_once() -> TestResult {
    let (_, viewer) = viewer_graph(7, 7);
    let mut engine = engine()?;
    let frames = record_frames(&engine);
    engine.change_output(Some(Output::Viewer(viewer)));
    engine.play_forward()?;
    assert_eq!(shown(&frames), vec![7]);
    Ok(())
}

#[test]
fn refresh_keeps_frame_and_hits_cache() -> TestResult {
    let (_, viewer) = viewer_graph(1, 5);
    let mut engine = engine()?;
    let frames = record_frames(&engine);
    engine.change_output(Some(Output::Viewer(viewer.clone())));

    engine.seek(3)?;
    engine.refresh()?;
    engine.refresh()?;
    assert_eq!(*frames.lock().unwrap(), vec![(3, false), (3, true), (3, true)]);
    assert_eq!(viewer.current_frame(), 3);
    Ok(())
}

#[test]
fn view_change_misses_cache() -> TestResult {
    let (_, viewer) = viewer_graph(1, 5);
    let mut engine = engine()?;
    let frames = record_frames(&engine);
    engine.change_output(Some(Output::Viewer(viewer.clone())));

    engine.seek(2)?;
    viewer.set_exposure(1.0);
    engine.refresh()?;
    assert_eq!(*frames.lock().unwrap(), vec![(2, false), (2, false)]);
    assert_eq!(engine.frame_cache().len(), 2);
    Ok(())
}

#[test]
fn zoomed_out_frames_are_subsampled() -> TestResult {
    let (_, viewer) = viewer_graph(1, 5);
    viewer.set_zoom(0.5);
    let surface = HeadlessSurface::new();
    let mut engine = engine()?;
    engine.set_surface(surface.clone());
    engine.change_output(Some(Output::Viewer(viewer.clone())));

    engine.seek(1)?;
    assert_eq!(surface.size(), (8, 4));
    assert_eq!(surface.last_upload().map(|b| b.len()), Some(8 * 4 * 4));
    assert_eq!(viewer.row_span(), (0, 6));
    Ok(())
}

#[test]
fn abort_mid_dispatch_discards_frame_and_queue() -> TestResult {
    let src = RampSource::new("plate", 1, 100, 16, 16);
    let gate = GateNode::new(src.clone());
    let viewer = BufferViewer::new("viewer", gate.clone());
    let surface = HeadlessSurface::new();

    let mut engine = engine()?;
    engine.set_surface(surface.clone());
    engine.change_output(Some(Output::Viewer(viewer.clone())));
    viewer.seek(1);

    let handle = engine.handle();
    let remote = {
        let gate = Arc::clone(&gate);
        let handle = handle.clone();
        thread::spawn(move || {
            while gate.entered.load(Ordering::SeqCst) == 0 {
                thread::sleep(Duration::from_millis(1));
            }
            handle.defer(PlaybackRequest::seek(50, 1, true));
            handle.abort();
            gate.open();
        })
    };

    engine.start(-1, false, true, false)?;
    remote.join().expect("remote thread");

    let status = handle.status();
    assert_eq!(status.state, EngineState::Idle);
    assert!(!status.working);
    assert_eq!(handle.pending_tasks(), 0);
    assert_eq!(surface.uploaded_frames(), 0);
    assert_eq!(status.request_index, 0);
    assert_eq!(viewer.current_frame(), 1);
    assert!(src.decoded_frames().is_empty());
    Ok(())
}

#[test]
fn pause_runs_deferred_request_after_cycle() -> TestResult {
    let (_, viewer) = viewer_graph(1, 10);
    let mut engine = engine()?;
    let frames = record_frames(&engine);
    engine.change_output(Some(Output::Viewer(viewer.clone())));

    let handle = engine.handle();
    let fired = AtomicBool::new(false);
    engine.bus().subscribe::<FrameDoneEvent, _>(move |_| {
        if !fired.swap(true, Ordering::SeqCst) {
            handle.seek(8);
        }
    });

    viewer.seek(1);
    engine.start(-1, false, true, false)?;
    assert_eq!(shown(&frames), vec![1, 8]);
    assert_eq!(viewer.current_frame(), 8);
    assert_eq!(engine.handle().pending_tasks(), 0);
    Ok(())
}

#[test]
fn idle_handle_requests_wait_for_run_pending() -> TestResult {
    let (_, viewer) = viewer_graph(1, 10);
    let mut engine = engine()?;
    engine.change_output(Some(Output::Viewer(viewer.clone())));
    let handle = engine.handle();

    handle.seek(6);
    handle.seek(4);
    assert_eq!(handle.pending_tasks(), 2);
    assert_eq!(viewer.current_frame(), 0);

    engine.run_pending()?;
    assert_eq!(handle.pending_tasks(), 0);
    assert_eq!(viewer.current_frame(), 4);
    Ok(())
}

#[test]
fn transfer_failure_surfaces_and_stops() -> TestResult {
    let (_, viewer) = viewer_graph(1, 5);
    let surface = HeadlessSurface::new();
    surface.set_fail_uploads(true);
    let mut engine = engine()?;
    engine.set_surface(surface.clone());
    engine.change_output(Some(Output::Viewer(viewer.clone())));

    viewer.seek(1);
    let result = engine.start(3, false, true, false);
    assert!(matches!(result, Err(EngineError::Transfer(_))));
    assert_eq!(engine.status().state, EngineState::Idle);
    assert!(!engine.status().working);
    Ok(())
}

#[test]
fn decode_failure_surfaces_and_stops() -> TestResult {
    for lookahead in [true, false] {
        let (src, viewer) = viewer_graph(1, 5);
        src.fail_on(Some(3));
        let mut engine = engine_with_lookahead(lookahead)?;
        engine.change_output(Some(Output::Viewer(viewer.clone())));

        viewer.seek(1);
        let result = engine.start(5, false, true, false);
        assert!(
            matches!(result, Err(EngineError::Decode { frame: 3, .. })),
            "lookahead={lookahead}: {result:?}"
        );
        assert_eq!(engine.status().request_index, 2);
        assert!(!engine.status().working);
        assert_eq!(src.helper_decode_count(), if lookahead { 1 } else { 0 });
    }
    Ok(())
}

#[test]
fn lookahead_decodes_each_frame_once_in_order() -> TestResult {
    for lookahead in [true, false] {
        let (src, viewer) = viewer_graph(1, 5);
        let mut engine = engine_with_lookahead(lookahead)?;
        let frames = record_frames(&engine);
        engine.set_loop_mode(false);
        engine.change_output(Some(Output::Viewer(viewer.clone())));

        viewer.seek(1);
        engine.start(-1, false, true, false)?;
        assert_eq!(shown(&frames), vec![1, 2, 3, 4, 5]);
        // the first frame is read inline, the rest come from the helper
        assert_eq!(src.decode_count(), 5);
        assert_eq!(src.helper_decode_count(), if lookahead { 4 } else { 0 });
        assert!(src.decoded_frames().is_empty());
    }
    Ok(())
}

#[test]
fn cached_frames_are_not_prefetched() -> TestResult {
    let (src, viewer) = viewer_graph(1, 3);
    let mut engine = engine()?;
    engine.set_loop_mode(false);
    engine.change_output(Some(Output::Viewer(viewer.clone())));

    viewer.seek(1);
    engine.start(-1, false, true, false)?;
    assert_eq!((src.decode_count(), src.helper_decode_count()), (3, 2));

    viewer.seek(1);
    engine.start(-1, false, true, false)?;
    assert_eq!((src.decode_count(), src.helper_decode_count()), (3, 2));
    assert_eq!(engine.frame_cache().stats().hits(), 3);
    Ok(())
}

#[test]
fn pause_releases_buffers_after_lookahead_finishes() -> TestResult {
    let src = RampSource::new("plate", 1, 10, 512, 512);
    let viewer = BufferViewer::new("viewer", src.clone());
    let mut engine = engine()?;
    engine.change_output(Some(Output::Viewer(viewer.clone())));

    let handle = engine.handle();
    engine.bus().subscribe::<FrameDoneEvent, _>(move |_| handle.pause());

    viewer.seek(1);
    engine.start(-1, false, true, false)?;
    assert_eq!(src.helper_decode_count(), 1);
    assert!(src.decoded_frames().is_empty());
    thread::sleep(Duration::from_millis(100));
    assert!(src.decoded_frames().is_empty());
    Ok(())
}

#[test]
fn start_follows_rewired_sources() -> TestResult {
    let a = RampSource::new("a", 1, 5, 8, 8);
    let b = RampSource::new("b", 1, 5, 8, 8);
    let grade = GradeNode::new("grade", a.clone(), 1.0, 0.0);
    let viewer = BufferViewer::new("viewer", grade.clone());
    let mut engine = engine()?;
    engine.change_output(Some(Output::Viewer(viewer.clone())));
    engine.seek(1)?;
    assert_eq!(a.decode_count(), 1);

    // no graph_changed: the next sequence must still see the new input
    grade.set_input(b.clone());
    engine.seek(2)?;
    assert_eq!(a.decode_count(), 1);
    assert_eq!(b.decode_count(), 1);
    let sources: Vec<String> = engine.dag().sources().iter().map(|n| n.name()).collect();
    assert_eq!(sources, vec!["b".to_string()]);
    assert_eq!(engine.dag().debug_order(), vec!["b", "grade", "viewer"]);
    Ok(())
}

#[test]
fn source_resize_reaches_presented_frame() -> TestResult {
    let src = RampSource::new("plate", 1, 5, 8, 8);
    let grade: NodeRef = GradeNode::new("grade", src.clone(), 1.0, 0.0);
    let viewer = BufferViewer::new("viewer", grade);
    let surface = HeadlessSurface::new();
    let mut engine = engine()?;
    engine.set_surface(surface.clone());
    engine.change_output(Some(Output::Viewer(viewer.clone())));

    engine.seek(1)?;
    assert_eq!(surface.size(), (8, 8));

    src.set_attr(A_WIDTH, 16);
    engine.refresh()?;
    assert_eq!(surface.size(), (16, 8));
    assert_eq!(viewer.display_window(), src.info().display);
    assert_eq!(surface.last_upload().map(|b| b.len()), Some(16 * 8 * 4));
    Ok(())
}

#[test]
fn topology_edit_clears_caches() -> TestResult {
    let src = RampSource::new("plate", 1, 5, 16, 8);
    let grade = GradeNode::new("grade", src.clone(), 1.0, 0.0);
    let viewer = BufferViewer::new("viewer", grade.clone());
    let mut engine = engine()?;
    engine.change_output(Some(Output::Viewer(viewer)));
    engine.seek(2)?;
    assert_eq!(engine.frame_cache().len(), 1);
    let before = engine.graph_version();

    let other: NodeRef = RampSource::new("other", 1, 5, 16, 8);
    let mid: NodeRef = GradeNode::new("mid", other, 1.0, 0.0);
    grade.set_input(mid);
    engine.graph_changed();
    assert_ne!(engine.graph_version(), before);
    assert!(engine.frame_cache().is_empty());
    assert_eq!(engine.dag().len(), 4);
    Ok(())
}

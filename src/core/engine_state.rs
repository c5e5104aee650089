//! Playback state machine data.
//!
//! `EngineStatus` is owned by one `PlaybackEngine` and mutated only by its
//! transition functions; a copy is mirrored into shared state for status
//! queries from other threads. `EngineSignals` carries the two flags other
//! threads may raise: abort and pause.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::entities::Output;

/// Where the state machine currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    #[default]
    Idle,
    /// Resolving the next frame and probing the cache
    Requesting,
    /// Rows in flight on the worker pool
    Dispatching,
    /// Handing a frame to the viewer surface or the writer
    Presenting,
    Paused,
    Aborting,
}

/// Sequence bookkeeping of one engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineStatus {
    pub state: EngineState,
    pub working: bool,
    pub aborted: bool,
    pub paused: bool,
    pub forward: bool,
    pub loop_enabled: bool,
    /// Frames left to produce, -1 = unbounded
    pub requests_remaining: i32,
    /// Frames produced in this sequence
    pub request_index: u32,
    pub current_frame: i32,
    /// Last measured playback rate
    pub fps: f64,
}

impl Default for EngineStatus {
    fn default() -> Self {
        Self {
            state: EngineState::Idle,
            working: false,
            aborted: false,
            paused: false,
            forward: true,
            loop_enabled: true,
            requests_remaining: 0,
            request_index: 0,
            current_frame: 0,
            fps: 0.0,
        }
    }
}

/// Why row building stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    Aborted,
    Paused,
}

/// Cross-thread user signals.
#[derive(Debug, Default)]
pub struct EngineSignals {
    aborted: AtomicBool,
    paused: AtomicBool,
}

impl EngineSignals {
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Abort wins over pause.
    pub fn check(&self) -> Option<Interrupt> {
        if self.is_aborted() {
            Some(Interrupt::Aborted)
        } else if self.is_paused() {
            Some(Interrupt::Paused)
        } else {
            None
        }
    }

    pub fn reset(&self) {
        self.aborted.store(false, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
    }
}

/// What a deferred request does when drained.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestKind {
    /// Seek the current output and start from `frame`
    Seek,
    /// Switch output, rebuild the graph, then start
    ChangeOutput,
}

/// Deferred engine invocation.
#[derive(Debug, Clone)]
pub struct PlaybackRequest {
    pub kind: RequestKind,
    pub frame: i32,
    /// -1 = unbounded
    pub frame_count: i32,
    pub fit_to_view: bool,
    pub forward: bool,
    pub same_frame: bool,
    pub output: Option<Output>,
}

impl PlaybackRequest {
    pub fn seek(frame: i32, frame_count: i32, forward: bool) -> Self {
        Self {
            kind: RequestKind::Seek,
            frame,
            frame_count,
            fit_to_view: false,
            forward,
            same_frame: false,
            output: None,
        }
    }

    /// Re-render `frame` without advancing.
    pub fn refresh(frame: i32) -> Self {
        Self {
            same_frame: true,
            ..Self::seek(frame, 1, true)
        }
    }

    pub fn change_output(output: Option<Output>) -> Self {
        Self {
            kind: RequestKind::ChangeOutput,
            output,
            fit_to_view: true,
            ..Self::seek(0, -1, true)
        }
    }
}

//! Playback engine events, emitted on the `EventBus`.

/// A frame was presented (viewer) or encoded (writer).
#[derive(Clone, Debug, PartialEq)]
pub struct FrameDoneEvent {
    pub frame: i32,
    pub from_cache: bool,
}

/// Measured playback rate, refreshed every few frames.
#[derive(Clone, Debug, PartialEq)]
pub struct FpsChangedEvent(pub f64);

/// A sequence started.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineStartedEvent {
    pub frame_count: i32,
    pub forward: bool,
}

/// The engine returned to idle.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineStoppedEvent {
    pub frames_done: u32,
}

/// The active output changed (`None` = no output).
#[derive(Clone, Debug, PartialEq)]
pub struct OutputChangedEvent(pub Option<String>);

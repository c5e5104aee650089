//! Graph node contracts consumed by the playback engine.
//!
//! The engine never creates nodes. It traverses them through `GraphNode`,
//! reads frames through `SourceNode`, and hands results to one of two output
//! variants wrapped in [`Output`]:
//! - `ViewerOutput`: interactive, zoomed, presented through a `PresentationSurface`
//! - `WriterOutput`: sequential, 1:1, encoded to files
//!
//! Node parameters live in `Attrs` and feed `content_hash`, which the graph
//! version folds over the whole upstream graph.

use crossbeam_channel::{Receiver, Sender, bounded};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use uuid::Uuid;

use super::attrs::Attrs;
use super::channels::ChannelSet;
use super::error::EngineError;
use super::frame::{BitDepth, FrameBuffer, FrameEntry};
use super::geometry::{Box2D, Format};
use super::row::Row;
use super::traits::RowCache;

/// Shared handle to any graph node.
pub type NodeRef = Arc<dyn GraphNode>;

/// Result of validation: the bounds and channels a node produces.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NodeInfo {
    /// Nominal image bounds
    pub display: Format,
    /// Bounds actually computed (may exceed or undershoot display)
    pub data: Box2D,
    pub channels: ChannelSet,
    pub first_frame: i32,
    pub last_frame: i32,
}

impl NodeInfo {
    /// Union of two infos, used by multi-input nodes.
    pub fn merge(&self, other: &NodeInfo) -> NodeInfo {
        NodeInfo {
            display: self.display,
            data: self.data.merge(&other.data),
            channels: self.channels | other.channels,
            first_frame: self.first_frame.min(other.first_frame),
            last_frame: self.last_frame.max(other.last_frame),
        }
    }
}

/// Context for one row evaluation.
pub struct RowContext<'a> {
    pub frame: i32,
    pub cache: &'a dyn RowCache,
}

/// Base trait for every node in the processing graph.
pub trait GraphNode: Send + Sync {
    fn uuid(&self) -> Uuid;

    fn name(&self) -> String;

    /// Type identifier ("Ramp", "Grade", "Viewer", ...)
    fn node_type(&self) -> &'static str;

    /// Upstream nodes in input order.
    fn parents(&self) -> Vec<NodeRef>;

    /// Snapshot of the node's parameters.
    fn attrs(&self) -> Attrs;

    /// Hash of this node alone (type plus parameters). Uuid is left out
    /// so structurally identical graphs hash identically.
    fn content_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.node_type().hash(&mut hasher);
        self.attrs().hash_all().hash(&mut hasher);
        hasher.finish()
    }

    /// Last validated bounds and channels.
    fn info(&self) -> NodeInfo;

    /// Recompute `info()` from the parents' infos. `for_real` is false for
    /// cheap refreshes that must not open files.
    fn validate(&self, for_real: bool);

    /// Fill `row` for `ctx.frame`. Only channels present in the row are written.
    fn evaluate_row(&self, row: &mut Row, ctx: &RowContext<'_>);

    fn as_source(&self) -> Option<&dyn SourceNode> {
        None
    }
}

/// Decode parameters for one source read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeRequest {
    pub frame: i32,
    /// Decode synchronously on the calling thread
    pub use_current_thread: bool,
    /// Caller is a look-ahead helper, not the control thread
    pub use_other_thread: bool,
    pub forward: bool,
}

/// Completion signal of an asynchronous decode.
#[derive(Debug)]
pub struct DecodeHandle {
    rx: Receiver<Result<(), EngineError>>,
}

impl DecodeHandle {
    /// New handle and the sender the decoding thread completes it with.
    pub fn channel() -> (Self, Sender<Result<(), EngineError>>) {
        let (tx, rx) = bounded(1);
        (Self { rx }, tx)
    }

    /// Block until the decode finished. A dropped sender counts as a failure.
    pub fn wait(self) -> Result<(), EngineError> {
        self.rx
            .recv()
            .unwrap_or_else(|_| Err(EngineError::Transfer("decode task dropped".into())))
    }
}

/// Descriptor of a decoded (or decoding) source frame.
#[derive(Debug)]
pub struct DecodedFrame {
    pub frame: i32,
    pub name: String,
    pub pending: Option<DecodeHandle>,
}

impl DecodedFrame {
    pub fn ready(frame: i32, name: impl Into<String>) -> Self {
        Self {
            frame,
            name: name.into(),
            pending: None,
        }
    }

    /// Wait for the pending decode, if any.
    pub fn wait(&mut self) -> Result<(), EngineError> {
        match self.pending.take() {
            Some(handle) => handle.wait(),
            None => Ok(()),
        }
    }
}

/// A graph leaf that originates frame data.
pub trait SourceNode: Send + Sync {
    /// Stable identifier of the frame (file name, generator id).
    fn frame_name(&self, frame: i32) -> String;

    fn first_frame(&self) -> i32;

    fn last_frame(&self) -> i32;

    fn has_frames(&self) -> bool {
        self.last_frame() >= self.first_frame()
    }

    fn decode(&self, request: DecodeRequest) -> Result<Vec<DecodedFrame>, EngineError>;

    /// Descriptor for a frame served from the frame cache.
    fn open_cached(&self, entry: &FrameEntry, frame: i32, for_lookahead: bool) -> DecodedFrame;

    fn set_fit_to_view(&self, _fit: bool) {}

    /// Drop decoded buffers when the engine stops.
    fn release_buffers(&self) {}
}

/// Interactive output.
pub trait ViewerOutput: GraphNode {
    fn into_node(self: Arc<Self>) -> NodeRef;

    fn current_frame(&self) -> i32;

    fn seek(&self, frame: i32);

    fn display_window(&self) -> Format {
        self.info().display
    }

    fn data_window(&self) -> Box2D {
        self.info().data
    }

    fn available_channels(&self) -> ChannelSet {
        self.info().channels
    }

    fn display_channels(&self) -> ChannelSet;

    fn zoom_factor(&self) -> f32;

    fn exposure(&self) -> f32;

    fn color_transform(&self) -> String;

    fn bit_depth(&self) -> BitDepth;

    /// Visible scanline range `(bottom, top)` in image space, inclusive.
    fn visible_rows(&self) -> (i32, i32);

    /// Adjust zoom so `format` fits the view.
    fn fit_to_format(&self, format: &Format);

    /// Rows the next frame will fill, inclusive.
    fn set_row_span(&self, span: (i32, i32));

    /// Start a fresh frame buffer rows are written into.
    fn allocate_frame(&self, width: usize, height: usize);

    /// Finished buffer of the last computed frame.
    fn take_frame(&self) -> Option<FrameBuffer>;
}

/// Sequential file output.
pub trait WriterOutput: GraphNode {
    fn into_node(self: Arc<Self>) -> NodeRef;

    fn first_frame(&self) -> i32;

    fn last_frame(&self) -> i32;

    fn current_frame(&self) -> i32;

    fn set_to_start(&self);

    fn increment_frame(&self);

    fn requested_channels(&self) -> ChannelSet;

    fn begin_encode_sequence(&self) -> Result<(), EngineError>;

    fn encode_current_frame(&self) -> Result<(), EngineError>;
}

/// The node a playback sequence targets.
#[derive(Clone)]
pub enum Output {
    Viewer(Arc<dyn ViewerOutput>),
    Writer(Arc<dyn WriterOutput>),
}

impl Output {
    pub fn is_viewer(&self) -> bool {
        matches!(self, Output::Viewer(_))
    }

    pub fn as_viewer(&self) -> Option<&Arc<dyn ViewerOutput>> {
        match self {
            Output::Viewer(v) => Some(v),
            Output::Writer(_) => None,
        }
    }

    pub fn as_writer(&self) -> Option<&Arc<dyn WriterOutput>> {
        match self {
            Output::Writer(w) => Some(w),
            Output::Viewer(_) => None,
        }
    }

    /// The output as a plain graph node.
    pub fn node(&self) -> NodeRef {
        match self {
            Output::Viewer(v) => Arc::clone(v).into_node(),
            Output::Writer(w) => Arc::clone(w).into_node(),
        }
    }

    pub fn uuid(&self) -> Uuid {
        match self {
            Output::Viewer(v) => v.uuid(),
            Output::Writer(w) => w.uuid(),
        }
    }

    pub fn name(&self) -> String {
        match self {
            Output::Viewer(v) => v.name(),
            Output::Writer(w) => w.name(),
        }
    }

    pub fn info(&self) -> NodeInfo {
        match self {
            Output::Viewer(v) => v.info(),
            Output::Writer(w) => w.info(),
        }
    }

    pub fn evaluate_row(&self, row: &mut Row, ctx: &RowContext<'_>) {
        match self {
            Output::Viewer(v) => v.evaluate_row(row, ctx),
            Output::Writer(w) => w.evaluate_row(row, ctx),
        }
    }

    /// Channels the output wants computed.
    pub fn requested_channels(&self) -> ChannelSet {
        match self {
            Output::Viewer(v) => v.display_channels(),
            Output::Writer(w) => w.requested_channels(),
        }
    }

    pub fn available_channels(&self) -> ChannelSet {
        self.info().channels
    }
}

impl fmt::Debug for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_viewer() { "Viewer" } else { "Writer" };
        f.debug_struct("Output")
            .field("kind", &kind)
            .field("name", &self.name())
            .finish()
    }
}

/// Staging buffer mapped for one upload.
#[derive(Debug)]
pub struct StagingBuffer {
    pub id: u64,
    pub data: Vec<u8>,
}

/// Where interactive frames end up (texture, window, headless sink).
pub trait PresentationSurface: Send + Sync {
    fn map_staging(&self, byte_count: usize) -> Result<StagingBuffer, EngineError>;

    /// Commit a filled staging buffer. Returning marks the data ready.
    fn upload(&self, staging: StagingBuffer, width: usize, height: usize) -> Result<(), EngineError>;

    fn resize(&self, width: usize, height: usize);

    fn redraw(&self);
}

//! Entities - plain data and collaborator contracts shared by the engine and nodes.
//!
//! Nothing here depends on `core`; the engine consumes these types and the
//! reference nodes in `nodes` implement them.

pub mod attrs;
pub mod channels;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod keys;
pub mod node;
pub mod row;
pub mod traits;

pub use attrs::{AttrValue, Attrs};
pub use channels::{Channel, ChannelSet};
pub use error::EngineError;
pub use frame::{BitDepth, FrameBuffer, FrameEntry, PixelBuffer};
pub use geometry::{Box2D, Format};
pub use node::{
    DecodeHandle, DecodeRequest, DecodedFrame, GraphNode, NodeInfo, NodeRef, Output,
    PresentationSurface, RowContext, SourceNode, StagingBuffer, ViewerOutput, WriterOutput,
};
pub use row::{Row, RowKey, RowPlanes};
pub use traits::{EpochJob, RowCache, WorkerPool};

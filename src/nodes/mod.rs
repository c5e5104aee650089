//! Reference graph nodes and presentation targets.
//!
//! A procedural source, two operators and both output kinds, enough to
//! drive the playback engine end to end from the CLI and in tests.

mod node_core;
pub mod grade;
pub mod merge;
pub mod ramp;
pub mod surface;
pub mod viewer;
pub mod writer;

pub use grade::GradeNode;
pub use merge::MergeNode;
pub use ramp::RampSource;
pub use surface::HeadlessSurface;
pub use viewer::BufferViewer;
pub use writer::{SequenceWriter, format_path};

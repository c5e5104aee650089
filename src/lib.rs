//! nodeplay - frame evaluation and playback engine for node-graph image processing
//!
//! Re-exports all modules for use by binary targets and tests.

// Core engine (graph, caches, scheduling, playback)
pub mod core;

// Plain data and collaborator contracts
pub mod entities;

// Reference nodes and presentation targets
pub mod nodes;

pub mod cli;
pub mod config;
pub mod paths;

// Re-export commonly used types
pub use config::EngineSettings;
pub use core::cache_man::CacheManager;
pub use core::engine::{EngineHandle, PlaybackEngine};
pub use core::engine_state::{EngineState, EngineStatus, PlaybackRequest};
pub use core::event_bus::{BoxedEvent, EventBus, downcast_event};
pub use core::frame_cache::CacheStrategy;
pub use entities::{EngineError, GraphNode, NodeRef, Output, ViewerOutput, WriterOutput};

//! Core engine modules - graph traversal, caches, scheduling, playback
//!
//! These modules form the playback engine, independent of any UI.

pub mod cache_man;
pub mod dag;
pub mod engine;
pub mod engine_events;
pub mod engine_state;
pub mod event_bus;
pub mod frame_cache;
pub mod graph_version;
pub mod lookahead;
pub mod node_cache;
pub mod row_scheduler;
pub mod task_queue;
pub mod timer;
pub mod workers;

// Re-exports for convenience
pub use cache_man::CacheManager;
pub use dag::Dag;
pub use engine::{EngineHandle, PlaybackEngine};
pub use engine_state::{EngineState, EngineStatus, PlaybackRequest, RequestKind};
pub use event_bus::EventBus;
pub use frame_cache::{CacheKey, CacheStrategy, FrameCache, RenderParams};
pub use graph_version::GraphVersion;
pub use node_cache::NodeCache;
pub use row_scheduler::{CachingMode, RowPlan, RowScheduler};
pub use task_queue::TaskQueue;
pub use workers::Workers;

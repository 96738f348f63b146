//! Mirror synchronization: engine, merge strategies, conflict
//! resolution, and per-entity handlers.

pub mod conflicts;
pub mod engine;
pub mod entities;
pub mod progress;
pub mod scenes;
pub mod strategies;

pub use conflicts::{ConflictPolicy, ConflictResolver, Resolution};
pub use engine::{SceneSink, SceneSource, SyncEngine, WatermarkStore};
pub use entities::{EntitySyncHandler, EntitySyncStats};
pub use progress::SyncProgress;
pub use scenes::{SceneAction, SceneSyncHandler};
pub use strategies::{
    FullSyncStrategy, IncrementalSyncStrategy, SmartSyncStrategy, SyncStrategy, content_checksum,
};

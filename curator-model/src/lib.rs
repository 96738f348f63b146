//! Shared data models for the Curator metadata-enrichment pipeline.
//!
//! Everything here is plain data: typed identifiers, the mirror of the
//! Catalog's entities, analysis plans with their proposed changes, job
//! lifecycle records, and sync bookkeeping. Engines live in
//! `curator-core`; this crate stays dependency-light so both the core and
//! any future front-ends can share one vocabulary.

pub mod entities;
pub mod ids;
pub mod job;
pub mod plan;
pub mod remote;
pub mod scene;
pub mod sync;

pub use entities::{EntityKind, Performer, Studio, Tag};
pub use ids::{ChangeId, FileId, JobId, MarkerId, PerformerId, PlanId, SceneId, StudioId, TagId};
pub use job::{Job, JobStatus, JobType};
pub use plan::{
    AnalysisPlan, ApplyError, ApplyResult, ChangeAction, ChangeField, ChangeStatus,
    DetectionResult, DetectionSource, PlanChange, PlanStatus, ProposedChange, SceneChanges,
};
pub use remote::{
    EntityRef, RemoteFile, RemoteMarker, RemotePerformer, RemoteScene, RemoteStudio, RemoteTag,
};
pub use scene::{Scene, SceneData, SceneFile, SceneMarker};
pub use sync::{SyncError, SyncHistory, SyncResult, SyncStats, SyncStatus};

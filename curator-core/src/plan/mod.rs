//! Plan lifecycle: staging, review, and application back to the Catalog.

pub mod store;

pub use store::{
    BulkAction, CatalogApplier, ChangeApplier, PlanDetail, PlanRecords, PlanSceneChanges,
    PlanStore,
};

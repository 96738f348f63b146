//! Sync bookkeeping: per-run history, aggregate results, error records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entities::EntityKind;

/// Outcome classification of a sync run, derived from processed/failed
/// counts unless set explicitly.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    Success,
    Partial,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Success => "success",
            SyncStatus::Partial => "partial",
            SyncStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(SyncStatus::Success),
            "partial" => Ok(SyncStatus::Partial),
            "failed" => Ok(SyncStatus::Failed),
            other => Err(format!("unrecognized sync status: {other}")),
        }
    }
}

/// Per-entity-type log row. The latest completed row per entity type is
/// the watermark incremental syncs start from.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncHistory {
    pub id: i64,
    pub entity_type: EntityKind,
    pub status: SyncStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub items_synced: i64,
    pub items_created: i64,
    pub items_updated: i64,
    pub items_failed: i64,
    pub errors: Option<Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncError {
    pub entity_type: String,
    pub entity_id: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl SyncError {
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Per-entity counters accumulated across a run.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct SyncStats {
    pub scenes_processed: u64,
    pub scenes_created: u64,
    pub scenes_updated: u64,
    pub scenes_skipped: u64,
    pub scenes_failed: u64,
    pub performers_processed: u64,
    pub performers_created: u64,
    pub performers_updated: u64,
    pub tags_processed: u64,
    pub tags_created: u64,
    pub tags_updated: u64,
    pub studios_processed: u64,
    pub studios_created: u64,
    pub studios_updated: u64,
}

/// Aggregate outcome of one sync run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SyncResult {
    pub job_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: SyncStatus,
    pub total_items: u64,
    pub processed_items: u64,
    pub created_items: u64,
    pub updated_items: u64,
    pub skipped_items: u64,
    pub failed_items: u64,
    pub errors: Vec<SyncError>,
    pub stats: SyncStats,
}

impl SyncResult {
    pub fn started(job_id: Option<String>) -> Self {
        Self {
            job_id,
            started_at: Utc::now(),
            completed_at: None,
            status: SyncStatus::Success,
            total_items: 0,
            processed_items: 0,
            created_items: 0,
            updated_items: 0,
            skipped_items: 0,
            failed_items: 0,
            errors: Vec::new(),
            stats: SyncStats::default(),
        }
    }

    pub fn duration_seconds(&self) -> Option<f64> {
        self.completed_at
            .map(|end| (end - self.started_at).num_milliseconds() as f64 / 1000.0)
    }

    pub fn success_rate(&self) -> f64 {
        if self.processed_items == 0 {
            return 0.0;
        }
        (self.processed_items - self.failed_items.min(self.processed_items)) as f64
            / self.processed_items as f64
    }

    pub fn add_error(
        &mut self,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.errors
            .push(SyncError::new(entity_type, entity_id, message));
        self.failed_items += 1;
    }

    /// Close out the run, deriving the status from counters when one is
    /// not forced by the caller.
    pub fn complete(&mut self, status: Option<SyncStatus>) {
        self.completed_at = Some(Utc::now());
        self.status = match status {
            Some(s) => s,
            None if self.failed_items == 0 => SyncStatus::Success,
            None if self.processed_items > self.failed_items => SyncStatus::Partial,
            None => SyncStatus::Failed,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_derivation_from_counters() {
        let mut ok = SyncResult::started(None);
        ok.processed_items = 5;
        ok.complete(None);
        assert_eq!(ok.status, SyncStatus::Success);

        let mut partial = SyncResult::started(None);
        partial.processed_items = 5;
        partial.add_error("scene", "1", "boom");
        partial.complete(None);
        assert_eq!(partial.status, SyncStatus::Partial);

        let mut failed = SyncResult::started(None);
        failed.processed_items = 1;
        failed.add_error("scene", "1", "boom");
        failed.complete(None);
        assert_eq!(failed.status, SyncStatus::Failed);
    }
}

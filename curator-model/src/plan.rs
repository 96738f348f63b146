//! Analysis plans, proposed changes, and detection results.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{ChangeId, PlanId, SceneId};

/// Plan lifecycle. Draft plans accept review actions; `Applied` and
/// `Cancelled` are terminal.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PlanStatus {
    #[default]
    Draft,
    Reviewing,
    Applied,
    Cancelled,
}

impl PlanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanStatus::Draft => "DRAFT",
            PlanStatus::Reviewing => "REVIEWING",
            PlanStatus::Applied => "APPLIED",
            PlanStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PlanStatus::Applied | PlanStatus::Cancelled)
    }

    /// Apply is allowed from draft (first attempt) or reviewing (resumed).
    pub fn can_apply(&self) -> bool {
        matches!(self, PlanStatus::Draft | PlanStatus::Reviewing)
    }
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PlanStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRAFT" => Ok(PlanStatus::Draft),
            "REVIEWING" => Ok(PlanStatus::Reviewing),
            "APPLIED" => Ok(PlanStatus::Applied),
            "CANCELLED" => Ok(PlanStatus::Cancelled),
            other => Err(format!("unrecognized plan status: {other}")),
        }
    }
}

/// Review state of a single change. `Applied` is terminal: an applied
/// change is immutable from then on.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
    Applied,
}

impl ChangeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeStatus::Pending => "PENDING",
            ChangeStatus::Approved => "APPROVED",
            ChangeStatus::Rejected => "REJECTED",
            ChangeStatus::Applied => "APPLIED",
        }
    }
}

impl fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ChangeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ChangeStatus::Pending),
            "APPROVED" => Ok(ChangeStatus::Approved),
            "REJECTED" => Ok(ChangeStatus::Rejected),
            "APPLIED" => Ok(ChangeStatus::Applied),
            other => Err(format!("unrecognized change status: {other}")),
        }
    }
}

/// Scene field a change targets.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeField {
    Studio,
    Performers,
    Tags,
    Details,
    Markers,
}

impl ChangeField {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeField::Studio => "studio",
            ChangeField::Performers => "performers",
            ChangeField::Tags => "tags",
            ChangeField::Details => "details",
            ChangeField::Markers => "markers",
        }
    }
}

impl fmt::Display for ChangeField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ChangeField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "studio" => Ok(ChangeField::Studio),
            "performers" => Ok(ChangeField::Performers),
            "tags" => Ok(ChangeField::Tags),
            "details" => Ok(ChangeField::Details),
            "markers" => Ok(ChangeField::Markers),
            other => Err(format!("unrecognized change field: {other}")),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    Set,
    Add,
    Remove,
    Update,
}

impl ChangeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeAction::Set => "set",
            ChangeAction::Add => "add",
            ChangeAction::Remove => "remove",
            ChangeAction::Update => "update",
        }
    }
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ChangeAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "set" => Ok(ChangeAction::Set),
            "add" => Ok(ChangeAction::Add),
            "remove" => Ok(ChangeAction::Remove),
            "update" => Ok(ChangeAction::Update),
            other => Err(format!("unrecognized change action: {other}")),
        }
    }
}

/// A reviewable batch of metadata changes staged before being applied
/// back to the Catalog.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnalysisPlan {
    pub id: PlanId,
    pub name: String,
    pub description: Option<String>,
    pub status: PlanStatus,
    /// Settings snapshot, statistics, and AI cost usage.
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    /// Set iff `status == Applied`.
    pub applied_at: Option<DateTime<Utc>>,
}

impl AnalysisPlan {
    /// Sentinel plan returned when analysis produced nothing to stage.
    /// It is never persisted and is already in its terminal state.
    pub fn no_changes(name: impl Into<String>, metadata: Value) -> Self {
        Self {
            id: PlanId::default(),
            name: name.into(),
            description: Some("Analysis completed but no changes were identified".into()),
            status: PlanStatus::Applied,
            metadata,
            created_at: Utc::now(),
            applied_at: Some(Utc::now()),
        }
    }
}

/// One staged field-level edit for a scene.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlanChange {
    pub id: ChangeId,
    pub plan_id: PlanId,
    pub scene_id: SceneId,
    pub field: ChangeField,
    pub action: ChangeAction,
    /// Snapshot of the field at proposal time.
    pub current_value: Value,
    pub proposed_value: Value,
    pub confidence: f64,
    pub reason: Option<String>,
    pub status: ChangeStatus,
    pub applied_at: Option<DateTime<Utc>>,
}

impl PlanChange {
    pub fn is_mutable(&self) -> bool {
        self.status != ChangeStatus::Applied
    }
}

/// Where a detection came from.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionSource {
    Pattern,
    Path,
    Technical,
    Ai,
    Related,
    Metadata,
}

impl DetectionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionSource::Pattern => "pattern",
            DetectionSource::Path => "path",
            DetectionSource::Technical => "technical",
            DetectionSource::Ai => "ai",
            DetectionSource::Related => "related",
            DetectionSource::Metadata => "metadata",
        }
    }
}

impl fmt::Display for DetectionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of a single detector pass.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DetectionResult {
    pub value: String,
    pub confidence: f64,
    pub source: DetectionSource,
    #[serde(default)]
    pub metadata: Value,
}

impl DetectionResult {
    pub fn new(value: impl Into<String>, confidence: f64, source: DetectionSource) -> Self {
        Self {
            value: value.into(),
            confidence,
            source,
            metadata: Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn meets(&self, threshold: f64) -> bool {
        self.confidence >= threshold
    }
}

/// A single atomic edit proposal, pre-persistence.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProposedChange {
    pub field: ChangeField,
    pub action: ChangeAction,
    pub current_value: Value,
    pub proposed_value: Value,
    pub confidence: f64,
    pub reason: Option<String>,
}

impl ProposedChange {
    pub fn is_high_confidence(&self, threshold: f64) -> bool {
        self.confidence >= threshold
    }
}

/// All proposed changes for one scene, plus any per-scene error captured
/// during analysis. Errors never abort the surrounding run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SceneChanges {
    pub scene_id: SceneId,
    pub scene_title: String,
    pub scene_path: String,
    pub changes: Vec<ProposedChange>,
    pub error: Option<String>,
}

impl SceneChanges {
    pub fn errored(scene: &crate::scene::SceneData, error: impl Into<String>) -> Self {
        Self {
            scene_id: scene.id.clone(),
            scene_title: scene.title.clone(),
            scene_path: scene.file_path.clone(),
            changes: Vec::new(),
            error: Some(error.into()),
        }
    }

    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    pub fn changes_for_field(&self, field: ChangeField) -> impl Iterator<Item = &ProposedChange> {
        self.changes.iter().filter(move |c| c.field == field)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApplyError {
    pub change_id: ChangeId,
    pub scene_id: SceneId,
    pub field: ChangeField,
    pub error: String,
}

/// Outcome of applying a plan back to the Catalog.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApplyResult {
    pub plan_id: PlanId,
    pub total_changes: u64,
    pub applied_changes: u64,
    pub failed_changes: u64,
    pub skipped_changes: u64,
    pub errors: Vec<ApplyError>,
    pub applied_at: DateTime<Utc>,
}

impl ApplyResult {
    pub fn new(plan_id: PlanId) -> Self {
        Self {
            plan_id,
            total_changes: 0,
            applied_changes: 0,
            failed_changes: 0,
            skipped_changes: 0,
            errors: Vec::new(),
            applied_at: Utc::now(),
        }
    }

    /// Applying zero changes counts as full success.
    pub fn success_rate(&self) -> f64 {
        if self.total_changes == 0 {
            1.0
        } else {
            self.applied_changes as f64 / self.total_changes as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_status_round_trips() {
        for status in [
            PlanStatus::Draft,
            PlanStatus::Reviewing,
            PlanStatus::Applied,
            PlanStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<PlanStatus>().unwrap(), status);
        }
    }

    #[test]
    fn empty_apply_result_is_full_success() {
        let result = ApplyResult::new(PlanId(1));
        assert_eq!(result.success_rate(), 1.0);
    }

    #[test]
    fn partial_apply_success_rate() {
        let mut result = ApplyResult::new(PlanId(1));
        result.total_changes = 4;
        result.applied_changes = 3;
        result.failed_changes = 1;
        assert_eq!(result.success_rate(), 0.75);
    }

    #[test]
    fn applied_changes_are_immutable() {
        let change = PlanChange {
            id: ChangeId(1),
            plan_id: PlanId(1),
            scene_id: SceneId::new("s1"),
            field: ChangeField::Tags,
            action: ChangeAction::Add,
            current_value: Value::Null,
            proposed_value: Value::String("4K".into()),
            confidence: 0.9,
            reason: None,
            status: ChangeStatus::Applied,
            applied_at: Some(Utc::now()),
        };
        assert!(!change.is_mutable());
    }
}

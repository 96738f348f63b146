//! The plan store: persists staged changes, drives the review workflow,
//! and applies approved changes through the Catalog client.
//!
//! Application is sequential within a plan and guarded by the
//! DRAFT -> REVIEWING transition so two operators cannot apply the same
//! plan concurrently. Per-change failures are collected, never abort the
//! run, and the plan still lands in APPLIED with a partial success rate.
//! The apply flow talks to persistence and the Catalog through the
//! [`PlanRecords`] and [`ChangeApplier`] seams so the error-isolation
//! behavior is testable without either backend.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use tracing::{error, info, warn};

use curator_model::{
    AnalysisPlan, ApplyError, ApplyResult, ChangeAction, ChangeField, ChangeId, ChangeStatus,
    PlanChange, PlanId, PlanStatus, SceneChanges, SceneId,
};

use crate::context::AppContext;
use crate::db::PlanRepository;
use crate::detect::{AI_ERRORED, AI_TAG_SUFFIX, AI_TAGGED, AI_TAGME};
use crate::error::{CuratorError, Result};

/// Review actions over a plan's PENDING changes.
#[derive(Clone, Copy, Debug)]
pub enum BulkAction {
    AcceptAll,
    RejectAll,
    AcceptByField(ChangeField),
    AcceptByConfidence(f64),
}

/// Changes grouped per scene for the operator's plan view.
#[derive(Clone, Debug)]
pub struct PlanSceneChanges {
    pub scene_id: SceneId,
    pub changes: Vec<PlanChange>,
}

#[derive(Clone, Debug)]
pub struct PlanDetail {
    pub plan: AnalysisPlan,
    pub scenes: Vec<PlanSceneChanges>,
    pub counts: HashMap<String, i64>,
}

#[derive(Clone)]
pub struct PlanStore {
    context: Arc<AppContext>,
}

impl std::fmt::Debug for PlanStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanStore").finish()
    }
}

impl PlanStore {
    pub fn new(context: Arc<AppContext>) -> Self {
        Self { context }
    }

    /// Persist a plan and all of its changes in one transaction,
    /// augmenting the metadata with total_changes and scene_count.
    pub async fn create_plan(
        &self,
        name: &str,
        scene_changes: &[SceneChanges],
        mut metadata: Value,
    ) -> Result<AnalysisPlan> {
        let total_changes: usize = scene_changes.iter().map(|s| s.changes.len()).sum();
        metadata["total_changes"] = json!(total_changes);
        metadata["scene_count"] = json!(scene_changes.len());

        let description = metadata
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string);

        let plan = self
            .context
            .database
            .plans()
            .create(name, description.as_deref(), &metadata, scene_changes)
            .await?;

        info!("created plan '{name}' with {total_changes} changes");
        Ok(plan)
    }

    pub async fn get_plan(&self, id: PlanId) -> Result<Option<AnalysisPlan>> {
        self.context.database.plans().get(id).await
    }

    pub async fn list_plans(
        &self,
        status: Option<PlanStatus>,
        page: u64,
        per_page: u64,
    ) -> Result<Vec<AnalysisPlan>> {
        self.context.database.plans().list(status, page, per_page).await
    }

    /// Plan plus its changes grouped per scene and per-status counts.
    pub async fn plan_detail(&self, id: PlanId) -> Result<Option<PlanDetail>> {
        let Some(plan) = self.get_plan(id).await? else {
            return Ok(None);
        };

        let changes = self.context.database.plans().changes(id).await?;
        let mut by_scene: Vec<PlanSceneChanges> = Vec::new();
        for change in changes {
            match by_scene.iter_mut().find(|s| s.scene_id == change.scene_id) {
                Some(scene) => scene.changes.push(change),
                None => by_scene.push(PlanSceneChanges {
                    scene_id: change.scene_id.clone(),
                    changes: vec![change],
                }),
            }
        }

        let counts = self
            .context
            .database
            .plans()
            .count_changes_by_status(id)
            .await?
            .into_iter()
            .collect();

        Ok(Some(PlanDetail {
            plan,
            scenes: by_scene,
            counts,
        }))
    }

    /// AI usage snapshot recorded when the plan was created.
    pub async fn get_plan_costs(&self, id: PlanId) -> Result<Value> {
        let plan = self
            .get_plan(id)
            .await?
            .ok_or_else(|| CuratorError::NotFound(format!("plan {id} not found")))?;
        Ok(plan
            .metadata
            .get("api_usage")
            .cloned()
            .unwrap_or(Value::Null))
    }

    /// Mirror-wide analysis coverage and plan counts for the operator
    /// stats view.
    pub async fn analysis_stats(&self) -> Result<Value> {
        let (total_scenes, analyzed, video_analyzed) =
            self.context.database.scenes().counts().await?;
        let plans_by_status: HashMap<String, i64> = self
            .context
            .database
            .plans()
            .count_plans_by_status()
            .await?
            .into_iter()
            .collect();

        Ok(json!({
            "total_scenes": total_scenes,
            "scenes_analyzed": analyzed,
            "scenes_video_analyzed": video_analyzed,
            "scenes_pending_analysis": total_scenes - analyzed,
            "plans_by_status": plans_by_status,
        }))
    }

    /// Review action over the plan's PENDING changes; returns how many
    /// rows changed.
    pub async fn bulk_update_changes(&self, plan_id: PlanId, action: BulkAction) -> Result<u64> {
        let plans = self.context.database.plans();
        let updated = match action {
            BulkAction::AcceptAll => {
                plans
                    .bulk_set_status(plan_id, ChangeStatus::Approved, None, None)
                    .await?
            }
            BulkAction::RejectAll => {
                plans
                    .bulk_set_status(plan_id, ChangeStatus::Rejected, None, None)
                    .await?
            }
            BulkAction::AcceptByField(field) => {
                plans
                    .bulk_set_status(plan_id, ChangeStatus::Approved, Some(field), None)
                    .await?
            }
            BulkAction::AcceptByConfidence(threshold) => {
                if !(0.0..=1.0).contains(&threshold) {
                    return Err(CuratorError::Validation(format!(
                        "confidence threshold {threshold} outside [0, 1]"
                    )));
                }
                plans
                    .bulk_set_status(plan_id, ChangeStatus::Approved, None, Some(threshold))
                    .await?
            }
        };
        Ok(updated)
    }

    /// Accept or reject one change, optionally with an edited value.
    /// Applied changes are immutable.
    pub async fn update_change_status(
        &self,
        change_id: ChangeId,
        accepted: bool,
        proposed_value: Option<Value>,
    ) -> Result<PlanChange> {
        let plans = self.context.database.plans();
        let change = plans
            .get_change(change_id)
            .await?
            .ok_or_else(|| CuratorError::NotFound(format!("change {change_id} not found")))?;

        if !change.is_mutable() {
            return Err(CuratorError::Validation(format!(
                "change {change_id} is already applied"
            )));
        }

        let status = if accepted {
            ChangeStatus::Approved
        } else {
            ChangeStatus::Rejected
        };
        plans
            .set_change_status(change_id, status, proposed_value.as_ref(), None)
            .await?;

        plans
            .get_change(change_id)
            .await?
            .ok_or_else(|| CuratorError::Internal("change vanished after update".into()))
    }

    /// Apply a plan's approved changes back to the Catalog. Optional
    /// field filter or explicit change ids narrow the run. Per-change
    /// errors are recorded and the plan still transitions to APPLIED.
    pub async fn apply_plan(
        &self,
        plan_id: PlanId,
        field_filter: Option<ChangeField>,
        change_ids: Option<Vec<ChangeId>>,
    ) -> Result<ApplyResult> {
        let records = self.context.database.plans();
        let applier = CatalogApplier::new(self.context.clone());
        run_apply(&records, &applier, plan_id, field_filter, change_ids).await
    }

    pub async fn cancel_plan(&self, id: PlanId) -> Result<()> {
        let plans = self.context.database.plans();
        let moved = plans
            .transition_plan(
                id,
                &[PlanStatus::Draft, PlanStatus::Reviewing],
                PlanStatus::Cancelled,
            )
            .await?;
        if !moved {
            return Err(CuratorError::Validation(format!(
                "plan {id} cannot be cancelled from its current status"
            )));
        }
        Ok(())
    }

    /// Delete a plan and its changes. Applied plans are permanent
    /// history and cannot be deleted.
    pub async fn delete_plan(&self, id: PlanId) -> Result<()> {
        let plans = self.context.database.plans();
        let plan = plans
            .get(id)
            .await?
            .ok_or_else(|| CuratorError::NotFound(format!("plan {id} not found")))?;
        if plan.status == PlanStatus::Applied {
            return Err(CuratorError::Validation(
                "cannot delete an applied plan".into(),
            ));
        }
        plans.delete_plan(id).await?;
        Ok(())
    }
}

/// Persistence operations the apply flow depends on. `PlanRepository`
/// is the Postgres implementation; tests drive the flow against mocks.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PlanRecords: Send + Sync {
    async fn plan(&self, id: PlanId) -> Result<Option<AnalysisPlan>>;
    async fn plan_changes(&self, id: PlanId) -> Result<Vec<PlanChange>>;
    async fn transition(&self, id: PlanId, from: Vec<PlanStatus>, to: PlanStatus) -> Result<bool>;
    async fn set_plan_status(
        &self,
        id: PlanId,
        status: PlanStatus,
        applied_at: Option<DateTime<Utc>>,
    ) -> Result<()>;
    async fn set_change_status(
        &self,
        id: ChangeId,
        status: ChangeStatus,
        applied_at: Option<DateTime<Utc>>,
    ) -> Result<()>;
    async fn merge_metadata(&self, id: PlanId, patch: Value) -> Result<()>;
}

#[async_trait]
impl PlanRecords for PlanRepository {
    async fn plan(&self, id: PlanId) -> Result<Option<AnalysisPlan>> {
        self.get(id).await
    }

    async fn plan_changes(&self, id: PlanId) -> Result<Vec<PlanChange>> {
        self.changes(id).await
    }

    async fn transition(&self, id: PlanId, from: Vec<PlanStatus>, to: PlanStatus) -> Result<bool> {
        self.transition_plan(id, &from, to).await
    }

    async fn set_plan_status(
        &self,
        id: PlanId,
        status: PlanStatus,
        applied_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        PlanRepository::set_plan_status(self, id, status, applied_at).await
    }

    async fn set_change_status(
        &self,
        id: ChangeId,
        status: ChangeStatus,
        applied_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        PlanRepository::set_change_status(self, id, status, None, applied_at).await
    }

    async fn merge_metadata(&self, id: PlanId, patch: Value) -> Result<()> {
        self.merge_plan_metadata(id, &patch).await
    }
}

/// Application of one approved change to its backing store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChangeApplier: Send + Sync {
    async fn apply(&self, change: &PlanChange) -> Result<()>;
}

/// Default applier: writes each change through the Catalog client with
/// the per-field semantics.
pub struct CatalogApplier {
    context: Arc<AppContext>,
}

impl std::fmt::Debug for CatalogApplier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogApplier").finish()
    }
}

#[async_trait]
impl ChangeApplier for CatalogApplier {
    async fn apply(&self, change: &PlanChange) -> Result<()> {
        let catalog = &self.context.catalog;
        let scene_id = &change.scene_id;

        match (change.field, change.action) {
            (ChangeField::Studio, ChangeAction::Set) => {
                let name = single_name(&change.proposed_value).ok_or_else(|| {
                    CuratorError::Validation("studio change carries no name".into())
                })?;
                let studio = catalog.find_or_create_studio(&name).await?;
                catalog
                    .update_scene(scene_id, json!({ "studio_id": studio.id }))
                    .await?;
            }

            (ChangeField::Performers, ChangeAction::Add) => {
                let scene = self.fetch_scene(scene_id).await?;
                let mut ids: Vec<String> =
                    scene.performers.iter().map(|p| p.id.clone()).collect();
                for name in value_names(&change.proposed_value) {
                    let performer = catalog.find_or_create_performer(&name).await?;
                    if !ids.contains(&performer.id) {
                        ids.push(performer.id);
                    }
                }
                catalog
                    .update_scene(scene_id, json!({ "performer_ids": ids }))
                    .await?;
            }

            (ChangeField::Performers, ChangeAction::Remove) => {
                let scene = self.fetch_scene(scene_id).await?;
                let remove: Vec<String> = value_names(&change.proposed_value)
                    .iter()
                    .map(|n| n.to_lowercase())
                    .collect();
                let ids: Vec<String> = scene
                    .performers
                    .iter()
                    .filter(|p| !remove.contains(&p.name.to_lowercase()))
                    .map(|p| p.id.clone())
                    .collect();
                catalog
                    .update_scene(scene_id, json!({ "performer_ids": ids }))
                    .await?;
            }

            (ChangeField::Tags, ChangeAction::Add) => {
                let scene = self.fetch_scene(scene_id).await?;
                let mut ids: Vec<String> = scene.tags.iter().map(|t| t.id.clone()).collect();
                for name in value_names(&change.proposed_value) {
                    let tag_id = self.resolve_tag_for_add(&name).await?;
                    if !ids.contains(&tag_id) {
                        ids.push(tag_id);
                    }
                }
                catalog
                    .update_scene(scene_id, json!({ "tag_ids": ids }))
                    .await?;
            }

            (ChangeField::Tags, ChangeAction::Remove) => {
                let scene = self.fetch_scene(scene_id).await?;
                let remove: Vec<String> = value_names(&change.proposed_value)
                    .iter()
                    .map(|n| n.to_lowercase())
                    .collect();
                let remove_current: Vec<String> = value_names(&change.current_value)
                    .iter()
                    .map(|n| n.to_lowercase())
                    .collect();
                let targets = if remove.is_empty() { remove_current } else { remove };
                let ids: Vec<String> = scene
                    .tags
                    .iter()
                    .filter(|t| !targets.contains(&t.name.to_lowercase()))
                    .map(|t| t.id.clone())
                    .collect();
                catalog
                    .update_scene(scene_id, json!({ "tag_ids": ids }))
                    .await?;
            }

            (ChangeField::Details, ChangeAction::Set | ChangeAction::Update) => {
                let details = match &change.proposed_value {
                    Value::String(text) => text.clone(),
                    Value::Object(map) => map
                        .get("text")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    other => other.to_string(),
                };
                catalog
                    .update_scene(scene_id, json!({ "details": details }))
                    .await?;
                // Operator-approved edits pin the text fields against
                // merge-style sync overwrites.
                self.context
                    .database
                    .scenes()
                    .set_manually_edited(scene_id)
                    .await?;
            }

            (ChangeField::Markers, ChangeAction::Add) => {
                let seconds = change
                    .proposed_value
                    .get("seconds")
                    .and_then(Value::as_f64)
                    .ok_or_else(|| {
                        CuratorError::Validation("marker change carries no seconds".into())
                    })?;
                let end_seconds = change.proposed_value.get("end_seconds").and_then(Value::as_f64);
                let title = change
                    .proposed_value
                    .get("title")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let tag_names: Vec<String> = change
                    .proposed_value
                    .get("tags")
                    .map(value_names)
                    .unwrap_or_default();

                let mut tag_ids = Vec::with_capacity(tag_names.len());
                for name in &tag_names {
                    tag_ids.push(catalog.find_or_create_tag(name).await?);
                }
                catalog
                    .create_marker(scene_id, seconds, end_seconds, title, &tag_ids)
                    .await?;
            }

            (ChangeField::Markers, ChangeAction::Remove) => {
                let seconds = change
                    .current_value
                    .get("seconds")
                    .and_then(Value::as_f64)
                    .ok_or_else(|| {
                        CuratorError::Validation("marker removal carries no seconds".into())
                    })?;
                let title = change
                    .current_value
                    .get("title")
                    .and_then(Value::as_str)
                    .unwrap_or_default();

                let scene = self.fetch_scene(scene_id).await?;
                let marker = scene
                    .markers
                    .iter()
                    .find(|m| m.seconds == seconds && (title.is_empty() || m.title == title))
                    .ok_or_else(|| {
                        CuratorError::NotFound(format!(
                            "no marker at {seconds}s on scene {scene_id}"
                        ))
                    })?;
                catalog.delete_marker(&marker.id, scene_id).await?;
            }

            (field, action) => {
                return Err(CuratorError::Validation(format!(
                    "unsupported change: {field} {action}"
                )));
            }
        }

        Ok(())
    }
}

impl CatalogApplier {
    pub fn new(context: Arc<AppContext>) -> Self {
        Self { context }
    }

    async fn fetch_scene(&self, scene_id: &SceneId) -> Result<curator_model::RemoteScene> {
        self.context
            .catalog
            .get_scene(scene_id)
            .await?
            .ok_or_else(|| CuratorError::NotFound(format!("scene {scene_id} not found")))
    }

    /// Tag additions stay within the Catalog's tag set, except for the
    /// pipeline-owned names (`*_AI` and the workflow status tags) which
    /// are created on demand.
    async fn resolve_tag_for_add(&self, name: &str) -> Result<String> {
        if let Some(existing) = self.context.catalog.find_tag(name).await? {
            return Ok(existing.id);
        }

        let pipeline_owned = name.ends_with(AI_TAG_SUFFIX)
            || name == AI_TAGME
            || name == AI_TAGGED
            || name == AI_ERRORED;
        if pipeline_owned {
            let id = self.context.catalog.find_or_create_tag(name).await?;
            return Ok(id.0);
        }

        warn!("refusing to create unmanaged tag '{name}' during apply");
        Err(CuratorError::Validation(format!(
            "tag '{name}' does not exist in the Catalog"
        )))
    }
}

/// The apply flow itself: guard the plan, walk its changes, isolate
/// per-change failures, and finish in APPLIED with a success rate.
async fn run_apply(
    records: &dyn PlanRecords,
    applier: &dyn ChangeApplier,
    plan_id: PlanId,
    field_filter: Option<ChangeField>,
    change_ids: Option<Vec<ChangeId>>,
) -> Result<ApplyResult> {
    let plan = records
        .plan(plan_id)
        .await?
        .ok_or_else(|| CuratorError::NotFound(format!("plan {plan_id} not found")))?;
    if !plan.status.can_apply() {
        return Err(CuratorError::Validation(format!(
            "plan {plan_id} cannot be applied from status {}",
            plan.status
        )));
    }

    // Concurrent-apply guard.
    if !records
        .transition(plan_id, vec![PlanStatus::Draft], PlanStatus::Reviewing)
        .await?
    {
        return Err(CuratorError::Validation(format!(
            "plan {plan_id} is already being applied"
        )));
    }

    let mut result = ApplyResult::new(plan_id);

    for change in records.plan_changes(plan_id).await? {
        if let Some(field) = field_filter
            && change.field != field
        {
            continue;
        }
        if let Some(ids) = &change_ids
            && !ids.contains(&change.id)
        {
            continue;
        }

        if change.status != ChangeStatus::Approved {
            result.skipped_changes += 1;
            continue;
        }

        result.total_changes += 1;
        match applier.apply(&change).await {
            Ok(()) => {
                records
                    .set_change_status(change.id, ChangeStatus::Applied, Some(Utc::now()))
                    .await?;
                result.applied_changes += 1;
            }
            Err(err) => {
                error!("failed to apply change {}: {err}", change.id);
                result.failed_changes += 1;
                result.errors.push(ApplyError {
                    change_id: change.id,
                    scene_id: change.scene_id.clone(),
                    field: change.field,
                    error: err.to_string(),
                });
            }
        }
    }

    let applied_at = Utc::now();
    records
        .set_plan_status(plan_id, PlanStatus::Applied, Some(applied_at))
        .await?;
    records
        .merge_metadata(
            plan_id,
            json!({
                "apply_result": {
                    "total": result.total_changes,
                    "applied": result.applied_changes,
                    "failed": result.failed_changes,
                    "skipped": result.skipped_changes,
                    "errors": result.errors.len(),
                }
            }),
        )
        .await?;

    result.applied_at = applied_at;
    info!(
        "applied plan {plan_id}: {}/{} changes ({} failed)",
        result.applied_changes, result.total_changes, result.failed_changes
    );
    Ok(result)
}

/// Names carried by a change value: a plain string, a list of strings,
/// or objects with a `name` key.
fn value_names(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) if !s.is_empty() => vec![s.clone()],
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) if !s.is_empty() => Some(s.clone()),
                Value::Object(map) => map
                    .get("name")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                _ => None,
            })
            .collect(),
        Value::Object(map) => map
            .get("name")
            .and_then(Value::as_str)
            .map(|name| vec![name.to_string()])
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

fn single_name(value: &Value) -> Option<String> {
    value_names(value).into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;

    fn draft_plan(id: i64) -> AnalysisPlan {
        AnalysisPlan {
            id: PlanId(id),
            name: "Test Plan".into(),
            description: None,
            status: PlanStatus::Draft,
            metadata: json!({}),
            created_at: Utc::now(),
            applied_at: None,
        }
    }

    fn change(id: i64, status: ChangeStatus) -> PlanChange {
        PlanChange {
            id: ChangeId(id),
            plan_id: PlanId(1),
            scene_id: SceneId::new("42"),
            field: ChangeField::Tags,
            action: ChangeAction::Add,
            current_value: Value::Null,
            proposed_value: json!("4K"),
            confidence: 0.9,
            reason: None,
            status,
            applied_at: None,
        }
    }

    fn records_for_changes(changes: Vec<PlanChange>) -> MockPlanRecords {
        let mut records = MockPlanRecords::new();
        records
            .expect_plan()
            .returning(|id| Ok(Some(draft_plan(id.0))));
        records
            .expect_transition()
            .with(
                eq(PlanId(1)),
                eq(vec![PlanStatus::Draft]),
                eq(PlanStatus::Reviewing),
            )
            .returning(|_, _, _| Ok(true));
        records
            .expect_plan_changes()
            .returning(move |_| Ok(changes.clone()));
        records
            .expect_set_plan_status()
            .withf(|_, status, applied_at| *status == PlanStatus::Applied && applied_at.is_some())
            .times(1)
            .returning(|_, _, _| Ok(()));
        records.expect_merge_metadata().returning(|_, _| Ok(()));
        records
    }

    #[tokio::test]
    async fn apply_isolates_per_change_failures() {
        let mut records = records_for_changes(vec![
            change(1, ChangeStatus::Approved),
            change(2, ChangeStatus::Approved),
        ]);
        // Only the change that actually applied turns APPLIED.
        records
            .expect_set_change_status()
            .with(eq(ChangeId(1)), eq(ChangeStatus::Applied), mockall::predicate::always())
            .times(1)
            .returning(|_, _, _| Ok(()));

        let mut applier = MockChangeApplier::new();
        applier.expect_apply().returning(|change| {
            if change.id == ChangeId(2) {
                Err(CuratorError::Connection("scene update failed".into()))
            } else {
                Ok(())
            }
        });

        let result = run_apply(&records, &applier, PlanId(1), None, None)
            .await
            .unwrap();

        assert_eq!(result.total_changes, 2);
        assert_eq!(result.applied_changes, 1);
        assert_eq!(result.failed_changes, 1);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].change_id, ChangeId(2));
        assert_eq!(result.success_rate(), 0.5);
    }

    #[tokio::test]
    async fn apply_with_zero_approved_changes_is_a_noop() {
        let mut records = records_for_changes(vec![
            change(1, ChangeStatus::Pending),
            change(2, ChangeStatus::Rejected),
        ]);
        records.expect_set_change_status().times(0);

        let mut applier = MockChangeApplier::new();
        applier.expect_apply().times(0);

        let result = run_apply(&records, &applier, PlanId(1), None, None)
            .await
            .unwrap();

        // Nothing attempted, plan still lands in APPLIED, full success.
        assert_eq!(result.total_changes, 0);
        assert_eq!(result.skipped_changes, 2);
        assert_eq!(result.success_rate(), 1.0);
    }

    #[tokio::test]
    async fn apply_refuses_terminal_plans() {
        let mut records = MockPlanRecords::new();
        records.expect_plan().returning(|id| {
            Ok(Some(AnalysisPlan {
                status: PlanStatus::Applied,
                ..draft_plan(id.0)
            }))
        });

        let applier = MockChangeApplier::new();
        let result = run_apply(&records, &applier, PlanId(1), None, None).await;
        assert!(matches!(result, Err(CuratorError::Validation(_))));
    }

    #[tokio::test]
    async fn concurrent_apply_is_rejected_by_the_transition_guard() {
        let mut records = MockPlanRecords::new();
        records
            .expect_plan()
            .returning(|id| Ok(Some(draft_plan(id.0))));
        records.expect_transition().returning(|_, _, _| Ok(false));

        let applier = MockChangeApplier::new();
        let result = run_apply(&records, &applier, PlanId(1), None, None).await;
        assert!(matches!(result, Err(CuratorError::Validation(_))));
    }

    #[test]
    fn value_names_accepts_all_wire_shapes() {
        assert_eq!(value_names(&json!("Jane Doe")), vec!["Jane Doe"]);
        assert_eq!(
            value_names(&json!(["A", "B"])),
            vec!["A".to_string(), "B".to_string()]
        );
        assert_eq!(value_names(&json!({"name": "C"})), vec!["C"]);
        assert_eq!(
            value_names(&json!([{"name": "D"}, "E"])),
            vec!["D".to_string(), "E".to_string()]
        );
        assert!(value_names(&Value::Null).is_empty());
        assert!(value_names(&json!("")).is_empty());
    }

    #[test]
    fn single_name_takes_first() {
        assert_eq!(single_name(&json!(["A", "B"])).unwrap(), "A");
        assert!(single_name(&Value::Null).is_none());
    }
}

//! Repository for analysis plans and their changes.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use curator_model::{
    AnalysisPlan, ChangeAction, ChangeField, ChangeId, ChangeStatus, PlanChange, PlanId,
    PlanStatus, SceneChanges,
};

use crate::error::{CuratorError, Result};

#[derive(Clone, Debug)]
pub struct PlanRepository {
    pool: PgPool,
}

fn plan_from_row(row: &PgRow) -> Result<AnalysisPlan> {
    let status: String = row.try_get("status")?;
    Ok(AnalysisPlan {
        id: PlanId(row.try_get("id")?),
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        status: status
            .parse::<PlanStatus>()
            .map_err(CuratorError::Internal)?,
        metadata: row
            .try_get::<Option<Value>, _>("metadata")?
            .unwrap_or(Value::Null),
        created_at: row.try_get("created_at")?,
        applied_at: row.try_get("applied_at")?,
    })
}

fn change_from_row(row: &PgRow) -> Result<PlanChange> {
    let field: String = row.try_get("field")?;
    let action: String = row.try_get("action")?;
    let status: String = row.try_get("status")?;
    Ok(PlanChange {
        id: ChangeId(row.try_get("id")?),
        plan_id: PlanId(row.try_get("plan_id")?),
        scene_id: row.try_get::<String, _>("scene_id")?.into(),
        field: field.parse::<ChangeField>().map_err(CuratorError::Internal)?,
        action: action
            .parse::<ChangeAction>()
            .map_err(CuratorError::Internal)?,
        current_value: row
            .try_get::<Option<Value>, _>("current_value")?
            .unwrap_or(Value::Null),
        proposed_value: row.try_get("proposed_value")?,
        confidence: row.try_get("confidence")?,
        reason: row.try_get("reason")?,
        status: status
            .parse::<ChangeStatus>()
            .map_err(CuratorError::Internal)?,
        applied_at: row.try_get("applied_at")?,
    })
}

impl PlanRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert the plan and every change in one transaction; the caller
    /// never sees a half-written plan.
    pub async fn create(
        &self,
        name: &str,
        description: Option<&str>,
        metadata: &Value,
        scene_changes: &[SceneChanges],
    ) -> Result<AnalysisPlan> {
        let mut tx = self.pool.begin().await?;

        let plan_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO analysis_plans (name, description, status, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(name)
        .bind(description)
        .bind(PlanStatus::Draft.as_str())
        .bind(metadata)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;

        for scene in scene_changes {
            for change in &scene.changes {
                sqlx::query(
                    r#"
                    INSERT INTO plan_changes (
                        plan_id, scene_id, field, action, current_value,
                        proposed_value, confidence, reason, status
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                    "#,
                )
                .bind(plan_id)
                .bind(scene.scene_id.as_str())
                .bind(change.field.as_str())
                .bind(change.action.as_str())
                .bind(&change.current_value)
                .bind(&change.proposed_value)
                .bind(change.confidence)
                .bind(&change.reason)
                .bind(ChangeStatus::Pending.as_str())
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;

        self.get(PlanId(plan_id))
            .await?
            .ok_or_else(|| CuratorError::Internal("plan vanished after insert".into()))
    }

    pub async fn get(&self, id: PlanId) -> Result<Option<AnalysisPlan>> {
        let row = sqlx::query("SELECT * FROM analysis_plans WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(plan_from_row).transpose()
    }

    pub async fn list(
        &self,
        status: Option<PlanStatus>,
        page: u64,
        per_page: u64,
    ) -> Result<Vec<AnalysisPlan>> {
        let per_page = per_page.clamp(1, 500) as i64;
        let offset = page.saturating_sub(1) as i64 * per_page;

        let rows = sqlx::query(
            r#"
            SELECT * FROM analysis_plans
            WHERE ($1::text IS NULL OR status = $1)
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(status.map(|s| s.as_str()))
        .bind(per_page)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(plan_from_row).collect()
    }

    pub async fn changes(&self, plan_id: PlanId) -> Result<Vec<PlanChange>> {
        let rows = sqlx::query("SELECT * FROM plan_changes WHERE plan_id = $1 ORDER BY id")
            .bind(plan_id.0)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(change_from_row).collect()
    }

    pub async fn get_change(&self, change_id: ChangeId) -> Result<Option<PlanChange>> {
        let row = sqlx::query("SELECT * FROM plan_changes WHERE id = $1")
            .bind(change_id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(change_from_row).transpose()
    }

    pub async fn set_plan_status(
        &self,
        id: PlanId,
        status: PlanStatus,
        applied_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE analysis_plans SET status = $2, applied_at = COALESCE($3, applied_at)
             WHERE id = $1",
        )
        .bind(id.0)
        .bind(status.as_str())
        .bind(applied_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Compare-and-set used as the concurrent-apply guard: only one
    /// caller can move a plan out of DRAFT/REVIEWING at a time.
    pub async fn transition_plan(
        &self,
        id: PlanId,
        from: &[PlanStatus],
        to: PlanStatus,
    ) -> Result<bool> {
        let from: Vec<String> = from.iter().map(|s| s.as_str().to_string()).collect();
        let result = sqlx::query(
            "UPDATE analysis_plans SET status = $2 WHERE id = $1 AND status = ANY($3)",
        )
        .bind(id.0)
        .bind(to.as_str())
        .bind(&from)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn merge_plan_metadata(&self, id: PlanId, patch: &Value) -> Result<()> {
        sqlx::query("UPDATE analysis_plans SET metadata = metadata || $2 WHERE id = $1")
            .bind(id.0)
            .bind(patch)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_change_status(
        &self,
        change_id: ChangeId,
        status: ChangeStatus,
        proposed_value: Option<&Value>,
        applied_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE plan_changes
            SET status = $2,
                proposed_value = COALESCE($3, proposed_value),
                applied_at = COALESCE($4, applied_at)
            WHERE id = $1
            "#,
        )
        .bind(change_id.0)
        .bind(status.as_str())
        .bind(proposed_value)
        .bind(applied_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Bulk status flips only ever touch PENDING changes.
    pub async fn bulk_set_status(
        &self,
        plan_id: PlanId,
        to: ChangeStatus,
        field: Option<ChangeField>,
        min_confidence: Option<f64>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE plan_changes
            SET status = $2
            WHERE plan_id = $1
              AND status = $3
              AND ($4::text IS NULL OR field = $4)
              AND ($5::double precision IS NULL OR confidence >= $5)
            "#,
        )
        .bind(plan_id.0)
        .bind(to.as_str())
        .bind(ChangeStatus::Pending.as_str())
        .bind(field.map(|f| f.as_str()))
        .bind(min_confidence)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn delete_plan(&self, id: PlanId) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM plan_changes WHERE plan_id = $1")
            .bind(id.0)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM analysis_plans WHERE id = $1")
            .bind(id.0)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }

    pub async fn count_plans_by_status(&self) -> Result<Vec<(String, i64)>> {
        let rows =
            sqlx::query("SELECT status, COUNT(*) AS n FROM analysis_plans GROUP BY status")
                .fetch_all(&self.pool)
                .await?;
        rows.iter()
            .map(|row| Ok((row.try_get("status")?, row.try_get("n")?)))
            .collect()
    }

    pub async fn count_changes_by_status(&self, plan_id: PlanId) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS n FROM plan_changes WHERE plan_id = $1 GROUP BY status",
        )
        .bind(plan_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| Ok((row.try_get("status")?, row.try_get("n")?)))
            .collect()
    }
}

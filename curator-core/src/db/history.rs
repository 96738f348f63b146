//! Repository for sync-history rows and incremental watermarks.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use curator_model::{EntityKind, SyncHistory, SyncStatus};

use crate::error::{CuratorError, Result};

#[derive(Clone, Debug)]
pub struct SyncHistoryRepository {
    pool: PgPool,
}

fn history_from_row(row: &PgRow) -> Result<SyncHistory> {
    let entity_type: String = row.try_get("entity_type")?;
    let status: String = row.try_get("status")?;
    Ok(SyncHistory {
        id: row.try_get("id")?,
        entity_type: entity_type
            .parse::<EntityKind>()
            .map_err(CuratorError::Internal)?,
        status: status.parse::<SyncStatus>().map_err(CuratorError::Internal)?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        items_synced: row.try_get("items_synced")?,
        items_created: row.try_get("items_created")?,
        items_updated: row.try_get("items_updated")?,
        items_failed: row.try_get("items_failed")?,
        errors: row.try_get("errors")?,
    })
}

impl SyncHistoryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn start(&self, entity_type: EntityKind) -> Result<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO sync_history (entity_type, status, started_at,
                items_synced, items_created, items_updated, items_failed)
            VALUES ($1, $2, $3, 0, 0, 0, 0)
            RETURNING id
            "#,
        )
        .bind(entity_type.as_str())
        .bind(SyncStatus::Failed.as_str())
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn complete(
        &self,
        id: i64,
        status: SyncStatus,
        synced: i64,
        created: i64,
        updated: i64,
        failed: i64,
        errors: Option<&Value>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sync_history
            SET status = $2,
                completed_at = $3,
                items_synced = $4,
                items_created = $5,
                items_updated = $6,
                items_failed = $7,
                errors = $8
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(synced)
        .bind(created)
        .bind(updated)
        .bind(failed)
        .bind(errors)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Watermark for incremental sync: the latest successful completion
    /// for this entity type. `None` means nothing ever completed and the
    /// caller should degrade to a full sync.
    pub async fn latest_completed(&self, entity_type: EntityKind) -> Result<Option<DateTime<Utc>>> {
        let completed: Option<DateTime<Utc>> = sqlx::query_scalar(
            r#"
            SELECT completed_at FROM sync_history
            WHERE entity_type = $1
              AND completed_at IS NOT NULL
              AND status IN ('success', 'partial')
            ORDER BY completed_at DESC
            LIMIT 1
            "#,
        )
        .bind(entity_type.as_str())
        .fetch_optional(&self.pool)
        .await?
        .flatten();
        Ok(completed)
    }

    pub async fn recent(&self, entity_type: Option<EntityKind>, limit: i64) -> Result<Vec<SyncHistory>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM sync_history
            WHERE ($1::text IS NULL OR entity_type = $1)
            ORDER BY started_at DESC
            LIMIT $2
            "#,
        )
        .bind(entity_type.map(|e| e.as_str()))
        .bind(limit.clamp(1, 500))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(history_from_row).collect()
    }
}

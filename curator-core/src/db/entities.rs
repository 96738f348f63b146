//! Repository for the shared reference entities.

use chrono::Utc;
use sqlx::PgPool;

use curator_model::{
    Performer, PerformerId, RemotePerformer, RemoteStudio, RemoteTag, Studio, StudioId, Tag, TagId,
};

use crate::error::Result;

#[derive(Clone, Debug)]
pub struct EntityRepository {
    pool: PgPool,
}

impl EntityRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // Reads

    pub async fn all_performers(&self) -> Result<Vec<Performer>> {
        let performers =
            sqlx::query_as::<_, Performer>("SELECT * FROM performers ORDER BY name")
                .fetch_all(&self.pool)
                .await?;
        Ok(performers)
    }

    pub async fn all_tags(&self) -> Result<Vec<Tag>> {
        let tags = sqlx::query_as::<_, Tag>("SELECT * FROM tags ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(tags)
    }

    pub async fn all_studios(&self) -> Result<Vec<Studio>> {
        let studios = sqlx::query_as::<_, Studio>("SELECT * FROM studios ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(studios)
    }

    pub async fn performers_by_ids(&self, ids: &[String]) -> Result<Vec<Performer>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let performers =
            sqlx::query_as::<_, Performer>("SELECT * FROM performers WHERE id = ANY($1)")
                .bind(ids)
                .fetch_all(&self.pool)
                .await?;
        Ok(performers)
    }

    pub async fn tags_by_ids(&self, ids: &[String]) -> Result<Vec<Tag>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let tags = sqlx::query_as::<_, Tag>("SELECT * FROM tags WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;
        Ok(tags)
    }

    pub async fn studios_by_ids(&self, ids: &[String]) -> Result<Vec<Studio>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let studios = sqlx::query_as::<_, Studio>("SELECT * FROM studios WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;
        Ok(studios)
    }

    // Upserts from remote payloads

    /// Returns true when the row was newly inserted.
    pub async fn upsert_performer(&self, remote: &RemotePerformer) -> Result<bool> {
        let row: (bool,) = sqlx::query_as(
            r#"
            INSERT INTO performers (id, name, aliases, url, details, rating, favorite, last_synced)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                aliases = EXCLUDED.aliases,
                url = EXCLUDED.url,
                details = EXCLUDED.details,
                rating = EXCLUDED.rating,
                favorite = EXCLUDED.favorite,
                last_synced = EXCLUDED.last_synced
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(&remote.id)
        .bind(&remote.name)
        .bind(&remote.aliases)
        .bind(&remote.url)
        .bind(&remote.details)
        .bind(remote.rating)
        .bind(remote.favorite)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    pub async fn upsert_tag(&self, remote: &RemoteTag) -> Result<bool> {
        let row: (bool,) = sqlx::query_as(
            r#"
            INSERT INTO tags (id, name, description, parent_id, last_synced)
            VALUES ($1, $2, $3, NULL, $4)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                description = EXCLUDED.description,
                last_synced = EXCLUDED.last_synced
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(&remote.id)
        .bind(&remote.name)
        .bind(&remote.description)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    pub async fn upsert_studio(&self, remote: &RemoteStudio) -> Result<bool> {
        let row: (bool,) = sqlx::query_as(
            r#"
            INSERT INTO studios (id, name, url, details, rating, parent_id, last_synced)
            VALUES ($1, $2, $3, $4, $5, NULL, $6)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                url = EXCLUDED.url,
                details = EXCLUDED.details,
                rating = EXCLUDED.rating,
                last_synced = EXCLUDED.last_synced
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(&remote.id)
        .bind(&remote.name)
        .bind(&remote.url)
        .bind(&remote.details)
        .bind(remote.rating)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    /// Stub rows created while syncing scene relationships before the
    /// entity pass has run. The full record arrives later.
    pub async fn ensure_performer(&self, id: &PerformerId, name: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO performers (id, name, aliases, favorite, last_synced)
             VALUES ($1, $2, '{}', FALSE, $3) ON CONFLICT (id) DO NOTHING",
        )
        .bind(id.as_str())
        .bind(name)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn ensure_tag(&self, id: &TagId, name: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO tags (id, name, last_synced)
             VALUES ($1, $2, $3) ON CONFLICT (id) DO NOTHING",
        )
        .bind(id.as_str())
        .bind(name)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn ensure_studio(&self, id: &StudioId, name: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO studios (id, name, last_synced)
             VALUES ($1, $2, $3) ON CONFLICT (id) DO NOTHING",
        )
        .bind(id.as_str())
        .bind(name)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Second pass after an entity sync: point children at parents that
    /// now exist. Rows whose parent would introduce a cycle are left
    /// unlinked.
    pub async fn link_tag_parent(&self, id: &TagId, parent_id: Option<&str>) -> Result<()> {
        sqlx::query(
            "UPDATE tags SET parent_id = (
                 SELECT id FROM tags WHERE id = $2
             ) WHERE id = $1 AND id IS DISTINCT FROM $2",
        )
        .bind(id.as_str())
        .bind(parent_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn link_studio_parent(&self, id: &StudioId, parent_id: Option<&str>) -> Result<()> {
        sqlx::query(
            "UPDATE studios SET parent_id = (
                 SELECT id FROM studios WHERE id = $2
             ) WHERE id = $1 AND id IS DISTINCT FROM $2",
        )
        .bind(id.as_str())
        .bind(parent_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

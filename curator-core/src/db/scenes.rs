//! Scene mirror repository: rows, files, markers, relationship tables,
//! and the flattened analysis view.

use std::collections::HashMap;

use chrono::Utc;
use sqlx::{PgPool, Postgres, Row, Transaction};

use curator_model::{
    EntityRef, PerformerId, Scene, SceneData, SceneFile, SceneId, SceneMarker, StudioId, TagId,
};

use crate::error::Result;

/// Conjunctive filter over the mirror's scene rows.
#[derive(Clone, Debug, Default)]
pub struct SceneFilter {
    pub scene_ids: Option<Vec<SceneId>>,
    pub organized: Option<bool>,
    pub analyzed: Option<bool>,
    pub video_analyzed: Option<bool>,
    pub studio_id: Option<StudioId>,
}

#[derive(Clone, Debug)]
pub struct SceneRepository {
    pool: PgPool,
}

impl SceneRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: &SceneId) -> Result<Option<Scene>> {
        let scene = sqlx::query_as::<_, Scene>("SELECT * FROM scenes WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(scene)
    }

    pub async fn get_many(&self, ids: &[SceneId]) -> Result<Vec<Scene>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let raw: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
        let scenes = sqlx::query_as::<_, Scene>("SELECT * FROM scenes WHERE id = ANY($1)")
            .bind(&raw)
            .fetch_all(&self.pool)
            .await?;
        Ok(scenes)
    }

    pub async fn query(&self, filter: &SceneFilter) -> Result<Vec<Scene>> {
        let sql = r#"
            SELECT * FROM scenes
            WHERE ($1::text[] IS NULL OR id = ANY($1))
              AND ($2::boolean IS NULL OR organized = $2)
              AND ($3::boolean IS NULL OR analyzed = $3)
              AND ($4::boolean IS NULL OR video_analyzed = $4)
              AND ($5::text IS NULL OR studio_id = $5)
            ORDER BY id
        "#;

        let ids: Option<Vec<String>> = filter
            .scene_ids
            .as_ref()
            .map(|ids| ids.iter().map(|id| id.to_string()).collect());

        let scenes = sqlx::query_as::<_, Scene>(sql)
            .bind(ids)
            .bind(filter.organized)
            .bind(filter.analyzed)
            .bind(filter.video_analyzed)
            .bind(filter.studio_id.as_ref().map(StudioId::as_str))
            .fetch_all(&self.pool)
            .await?;
        Ok(scenes)
    }

    pub async fn upsert(&self, scene: &Scene) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scenes (
                id, title, details, url, organized, rating, studio_id,
                catalog_created_at, catalog_updated_at, catalog_date,
                last_synced, analyzed, video_analyzed, manually_edited,
                sync_conflict, conflict_data, content_checksum
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            ON CONFLICT (id) DO UPDATE SET
                title = EXCLUDED.title,
                details = EXCLUDED.details,
                url = EXCLUDED.url,
                organized = EXCLUDED.organized,
                rating = EXCLUDED.rating,
                studio_id = EXCLUDED.studio_id,
                catalog_created_at = EXCLUDED.catalog_created_at,
                catalog_updated_at = EXCLUDED.catalog_updated_at,
                catalog_date = EXCLUDED.catalog_date,
                last_synced = EXCLUDED.last_synced,
                analyzed = EXCLUDED.analyzed,
                video_analyzed = EXCLUDED.video_analyzed,
                manually_edited = EXCLUDED.manually_edited,
                sync_conflict = EXCLUDED.sync_conflict,
                conflict_data = EXCLUDED.conflict_data,
                content_checksum = EXCLUDED.content_checksum
            "#,
        )
        .bind(scene.id.as_str())
        .bind(&scene.title)
        .bind(&scene.details)
        .bind(&scene.url)
        .bind(scene.organized)
        .bind(scene.rating)
        .bind(scene.studio_id.as_ref().map(StudioId::as_str))
        .bind(scene.catalog_created_at)
        .bind(scene.catalog_updated_at)
        .bind(scene.catalog_date)
        .bind(scene.last_synced)
        .bind(scene.analyzed)
        .bind(scene.video_analyzed)
        .bind(scene.manually_edited)
        .bind(scene.sync_conflict)
        .bind(&scene.conflict_data)
        .bind(&scene.content_checksum)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_analyzed(&self, ids: &[SceneId], video_analyzed: bool) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let raw: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
        let result = sqlx::query(
            r#"
            UPDATE scenes
            SET analyzed = TRUE,
                video_analyzed = CASE WHEN $2 THEN TRUE ELSE video_analyzed END
            WHERE id = ANY($1)
            "#,
        )
        .bind(&raw)
        .bind(video_analyzed)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn set_manually_edited(&self, id: &SceneId) -> Result<()> {
        sqlx::query("UPDATE scenes SET manually_edited = TRUE WHERE id = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // Relationship tables. Performers and tags are cleared and
    // repopulated on sync; the mirror is the single writer.

    pub async fn replace_performers(&self, scene_id: &SceneId, ids: &[PerformerId]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM scene_performers WHERE scene_id = $1")
            .bind(scene_id.as_str())
            .execute(&mut *tx)
            .await?;
        for performer_id in ids {
            sqlx::query(
                "INSERT INTO scene_performers (scene_id, performer_id)
                 VALUES ($1, $2) ON CONFLICT DO NOTHING",
            )
            .bind(scene_id.as_str())
            .bind(performer_id.as_str())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn replace_tags(&self, scene_id: &SceneId, ids: &[TagId]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM scene_tags WHERE scene_id = $1")
            .bind(scene_id.as_str())
            .execute(&mut *tx)
            .await?;
        for tag_id in ids {
            sqlx::query(
                "INSERT INTO scene_tags (scene_id, tag_id)
                 VALUES ($1, $2) ON CONFLICT DO NOTHING",
            )
            .bind(scene_id.as_str())
            .bind(tag_id.as_str())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    // Files

    pub async fn list_files(&self, scene_id: &SceneId) -> Result<Vec<SceneFile>> {
        let files = sqlx::query_as::<_, SceneFile>(
            "SELECT * FROM scene_files WHERE scene_id = $1 ORDER BY is_primary DESC, id",
        )
        .bind(scene_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(files)
    }

    pub async fn upsert_file(&self, file: &SceneFile) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scene_files (
                id, scene_id, path, size, width, height, duration,
                frame_rate, bit_rate, codec, phash, oshash, is_primary
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (id) DO UPDATE SET
                path = EXCLUDED.path,
                size = EXCLUDED.size,
                width = EXCLUDED.width,
                height = EXCLUDED.height,
                duration = EXCLUDED.duration,
                frame_rate = EXCLUDED.frame_rate,
                bit_rate = EXCLUDED.bit_rate,
                codec = EXCLUDED.codec,
                phash = EXCLUDED.phash,
                oshash = EXCLUDED.oshash,
                is_primary = EXCLUDED.is_primary
            "#,
        )
        .bind(file.id.as_str())
        .bind(file.scene_id.as_str())
        .bind(&file.path)
        .bind(file.size)
        .bind(file.width)
        .bind(file.height)
        .bind(file.duration)
        .bind(file.frame_rate)
        .bind(file.bit_rate)
        .bind(&file.codec)
        .bind(&file.phash)
        .bind(&file.oshash)
        .bind(file.is_primary)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_files_except(&self, scene_id: &SceneId, keep: &[String]) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM scene_files WHERE scene_id = $1 AND id <> ALL($2)",
        )
        .bind(scene_id.as_str())
        .bind(keep)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    // Markers

    pub async fn list_markers(&self, scene_id: &SceneId) -> Result<Vec<SceneMarker>> {
        let rows = sqlx::query(
            "SELECT id, scene_id, seconds, end_seconds, title, primary_tag_id
             FROM scene_markers WHERE scene_id = $1 ORDER BY seconds",
        )
        .bind(scene_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut markers = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id")?;
            let tag_rows = sqlx::query(
                "SELECT tag_id FROM scene_marker_tags WHERE marker_id = $1 ORDER BY tag_id",
            )
            .bind(&id)
            .fetch_all(&self.pool)
            .await?;

            markers.push(SceneMarker {
                id: id.clone().into(),
                scene_id: row.try_get::<String, _>("scene_id")?.into(),
                seconds: row.try_get("seconds")?,
                end_seconds: row.try_get("end_seconds")?,
                title: row.try_get("title")?,
                primary_tag_id: row.try_get::<String, _>("primary_tag_id")?.into(),
                tag_ids: tag_rows
                    .into_iter()
                    .filter_map(|t| t.try_get::<String, _>("tag_id").ok().map(Into::into))
                    .collect(),
            });
        }
        Ok(markers)
    }

    pub async fn upsert_marker(&self, marker: &SceneMarker) -> Result<()> {
        let mut tx: Transaction<'_, Postgres> = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO scene_markers (id, scene_id, seconds, end_seconds, title, primary_tag_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE SET
                seconds = EXCLUDED.seconds,
                end_seconds = EXCLUDED.end_seconds,
                title = EXCLUDED.title,
                primary_tag_id = EXCLUDED.primary_tag_id
            "#,
        )
        .bind(marker.id.as_str())
        .bind(marker.scene_id.as_str())
        .bind(marker.seconds)
        .bind(marker.end_seconds)
        .bind(&marker.title)
        .bind(marker.primary_tag_id.as_str())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM scene_marker_tags WHERE marker_id = $1")
            .bind(marker.id.as_str())
            .execute(&mut *tx)
            .await?;
        for tag_id in &marker.tag_ids {
            sqlx::query(
                "INSERT INTO scene_marker_tags (marker_id, tag_id)
                 VALUES ($1, $2) ON CONFLICT DO NOTHING",
            )
            .bind(marker.id.as_str())
            .bind(tag_id.as_str())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn delete_markers_except(&self, scene_id: &SceneId, keep: &[String]) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM scene_markers WHERE scene_id = $1 AND id <> ALL($2)",
        )
        .bind(scene_id.as_str())
        .bind(keep)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Load the flattened analysis view for a set of scenes: scalar
    /// fields, primary-file technicals, and named relationships resolved
    /// in a handful of batched queries rather than per scene.
    pub async fn load_scene_data(&self, scenes: &[Scene]) -> Result<Vec<SceneData>> {
        if scenes.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<String> = scenes.iter().map(|s| s.id.to_string()).collect();

        let file_rows = sqlx::query(
            "SELECT scene_id, path, width, height, duration, frame_rate
             FROM scene_files WHERE scene_id = ANY($1) AND is_primary",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;
        let mut primary_files: HashMap<String, (String, Option<i32>, Option<i32>, Option<f64>, Option<f64>)> =
            HashMap::new();
        for row in file_rows {
            primary_files.insert(
                row.try_get("scene_id")?,
                (
                    row.try_get("path")?,
                    row.try_get("width")?,
                    row.try_get("height")?,
                    row.try_get("duration")?,
                    row.try_get("frame_rate")?,
                ),
            );
        }

        let performer_rows = sqlx::query(
            "SELECT sp.scene_id, p.id, p.name
             FROM scene_performers sp JOIN performers p ON p.id = sp.performer_id
             WHERE sp.scene_id = ANY($1)",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;
        let mut performers: HashMap<String, Vec<EntityRef>> = HashMap::new();
        for row in performer_rows {
            performers
                .entry(row.try_get("scene_id")?)
                .or_default()
                .push(EntityRef::new(
                    row.try_get::<String, _>("id")?,
                    row.try_get::<String, _>("name")?,
                ));
        }

        let tag_rows = sqlx::query(
            "SELECT st.scene_id, t.id, t.name
             FROM scene_tags st JOIN tags t ON t.id = st.tag_id
             WHERE st.scene_id = ANY($1)",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;
        let mut tags: HashMap<String, Vec<EntityRef>> = HashMap::new();
        for row in tag_rows {
            tags.entry(row.try_get("scene_id")?)
                .or_default()
                .push(EntityRef::new(
                    row.try_get::<String, _>("id")?,
                    row.try_get::<String, _>("name")?,
                ));
        }

        let studio_rows = sqlx::query(
            "SELECT s.id AS scene_id, st.id, st.name
             FROM scenes s JOIN studios st ON st.id = s.studio_id
             WHERE s.id = ANY($1)",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;
        let mut studios: HashMap<String, EntityRef> = HashMap::new();
        for row in studio_rows {
            studios.insert(
                row.try_get("scene_id")?,
                EntityRef::new(
                    row.try_get::<String, _>("id")?,
                    row.try_get::<String, _>("name")?,
                ),
            );
        }

        let mut data = Vec::with_capacity(scenes.len());
        for scene in scenes {
            let key = scene.id.to_string();
            let file = primary_files.get(&key);
            let markers = self.list_markers(&scene.id).await?;
            data.push(SceneData {
                id: scene.id.clone(),
                title: scene.title.clone(),
                details: scene.details.clone(),
                file_path: file.map(|f| f.0.clone()).unwrap_or_default(),
                width: file.and_then(|f| f.1),
                height: file.and_then(|f| f.2),
                duration: file.and_then(|f| f.3),
                frame_rate: file.and_then(|f| f.4),
                studio: studios.get(&key).cloned(),
                performers: performers.remove(&key).unwrap_or_default(),
                tags: tags.remove(&key).unwrap_or_default(),
                markers,
            });
        }
        Ok(data)
    }

    /// Mirror-wide counters for the operator stats view.
    pub async fn counts(&self) -> Result<(i64, i64, i64)> {
        let row: (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*),
                   COUNT(*) FILTER (WHERE analyzed),
                   COUNT(*) FILTER (WHERE video_analyzed)
            FROM scenes
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    /// Touch `last_synced` on a scene row.
    pub async fn touch_last_synced(&self, id: &SceneId) -> Result<()> {
        sqlx::query("UPDATE scenes SET last_synced = $2 WHERE id = $1")
            .bind(id.as_str())
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

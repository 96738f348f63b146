//! Scene mirror records and the flattened view handed to detectors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{FileId, MarkerId, SceneId, StudioId, TagId};
use crate::remote::EntityRef;

/// Mirror row for a Catalog scene.
///
/// `catalog_*` timestamps are authoritative on the remote side;
/// `last_synced` is local bookkeeping. `analyzed` / `video_analyzed` track
/// which analysis passes have already covered this scene.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Scene {
    pub id: SceneId,
    pub title: String,
    pub details: Option<String>,
    pub url: Option<String>,
    pub organized: bool,
    /// Rating on the internal 0-5 scale (the Catalog reports 0-100).
    pub rating: Option<i32>,
    pub studio_id: Option<StudioId>,
    pub catalog_created_at: Option<DateTime<Utc>>,
    pub catalog_updated_at: Option<DateTime<Utc>>,
    pub catalog_date: Option<DateTime<Utc>>,
    pub last_synced: Option<DateTime<Utc>>,
    pub analyzed: bool,
    pub video_analyzed: bool,
    /// Set when an operator-approved change mutated text fields locally;
    /// merge-style sync strategies keep those fields.
    pub manually_edited: bool,
    pub sync_conflict: bool,
    pub conflict_data: Option<Value>,
    /// Hex SHA-256 over the sync-relevant field subset.
    pub content_checksum: Option<String>,
}

/// One media file backing a scene. Exactly one file per scene is primary
/// whenever any file exists.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct SceneFile {
    pub id: FileId,
    pub scene_id: SceneId,
    pub path: String,
    pub size: Option<i64>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub duration: Option<f64>,
    pub frame_rate: Option<f64>,
    pub bit_rate: Option<i64>,
    pub codec: Option<String>,
    pub phash: Option<String>,
    pub oshash: Option<String>,
    pub is_primary: bool,
}

/// Timecoded annotation on a scene. A marker always carries a primary tag;
/// `end_seconds`, when present, is >= `seconds`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct SceneMarker {
    pub id: MarkerId,
    pub scene_id: SceneId,
    pub seconds: f64,
    pub end_seconds: Option<f64>,
    pub title: String,
    pub primary_tag_id: TagId,
    #[cfg_attr(feature = "sqlx", sqlx(skip))]
    pub tag_ids: Vec<TagId>,
}

impl SceneMarker {
    /// Markers are valid only with a primary tag and a non-inverted span.
    pub fn is_valid(&self) -> bool {
        !self.primary_tag_id.as_str().is_empty()
            && self.end_seconds.map(|end| end >= self.seconds).unwrap_or(true)
    }
}

/// Flattened per-scene record shared by detectors and sync handlers.
///
/// This is the one concrete shape every analysis step consumes: scalar
/// fields from the scene row, technical fields from the primary file, and
/// relationship names resolved to `EntityRef`s.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SceneData {
    pub id: SceneId,
    pub title: String,
    pub details: Option<String>,
    pub file_path: String,
    pub duration: Option<f64>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub frame_rate: Option<f64>,
    pub studio: Option<EntityRef>,
    pub performers: Vec<EntityRef>,
    pub tags: Vec<EntityRef>,
    pub markers: Vec<SceneMarker>,
}

impl SceneData {
    pub fn performer_names(&self) -> Vec<String> {
        self.performers.iter().map(|p| p.name.clone()).collect()
    }

    pub fn tag_names(&self) -> Vec<String> {
        self.tags.iter().map(|t| t.name.clone()).collect()
    }

    pub fn has_tag(&self, name: &str) -> bool {
        self.tags.iter().any(|t| t.name == name)
    }

    pub fn resolution_label(&self) -> String {
        format!(
            "{}x{}",
            self.width.unwrap_or_default(),
            self.height.unwrap_or_default()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_without_primary_tag_is_invalid() {
        let marker = SceneMarker {
            id: MarkerId::new("m1"),
            scene_id: SceneId::new("s1"),
            seconds: 10.0,
            end_seconds: None,
            title: "intro".into(),
            primary_tag_id: TagId::new(""),
            tag_ids: vec![],
        };
        assert!(!marker.is_valid());
    }

    #[test]
    fn marker_with_inverted_span_is_invalid() {
        let marker = SceneMarker {
            id: MarkerId::new("m1"),
            scene_id: SceneId::new("s1"),
            seconds: 20.0,
            end_seconds: Some(10.0),
            title: "intro".into(),
            primary_tag_id: TagId::new("t1"),
            tag_ids: vec![],
        };
        assert!(!marker.is_valid());
    }
}

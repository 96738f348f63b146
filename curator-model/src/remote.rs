//! Normalized Catalog wire types.
//!
//! `CatalogClient` flattens GraphQL responses into these records: string
//! identifiers, ratings on the internal 0-5 scale, files carried as a
//! plain list with the primary-file abstraction applied downstream.
//! Unknown response fields are ignored during normalization, never
//! rejected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lightweight id + name pair used for relationships in remote payloads.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct EntityRef {
    pub id: String,
    pub name: String,
}

impl EntityRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RemoteFile {
    pub id: String,
    pub path: String,
    pub size: Option<i64>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub duration: Option<f64>,
    pub frame_rate: Option<f64>,
    pub bit_rate: Option<i64>,
    pub video_codec: Option<String>,
    pub phash: Option<String>,
    pub oshash: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RemoteMarker {
    pub id: String,
    pub seconds: f64,
    pub end_seconds: Option<f64>,
    pub title: String,
    pub primary_tag_id: Option<String>,
    pub tag_ids: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RemoteScene {
    pub id: String,
    pub title: String,
    pub details: Option<String>,
    pub url: Option<String>,
    pub date: Option<DateTime<Utc>>,
    /// Already divided down from the Catalog's 0-100 scale.
    pub rating: Option<i32>,
    pub organized: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub files: Vec<RemoteFile>,
    pub performers: Vec<EntityRef>,
    pub tags: Vec<EntityRef>,
    pub studio: Option<EntityRef>,
    pub markers: Vec<RemoteMarker>,
}

impl RemoteScene {
    /// The first listed file stands in as primary until local state says
    /// otherwise.
    pub fn primary_file(&self) -> Option<&RemoteFile> {
        self.files.first()
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RemotePerformer {
    pub id: String,
    pub name: String,
    pub aliases: Vec<String>,
    pub url: Option<String>,
    pub details: Option<String>,
    pub rating: Option<i32>,
    pub favorite: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RemoteTag {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub parent_id: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RemoteStudio {
    pub id: String,
    pub name: String,
    pub url: Option<String>,
    pub details: Option<String>,
    pub rating: Option<i32>,
    pub parent_id: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

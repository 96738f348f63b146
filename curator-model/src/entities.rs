//! Shared reference entities: performers, tags, studios.
//!
//! These are shared by many scenes through join tables; their lifetime is
//! independent of any scene. Tags and studios may form a parent hierarchy
//! (a DAG - cycles are rejected at sync time).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{PerformerId, StudioId, TagId};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Performer {
    pub id: PerformerId,
    pub name: String,
    /// Alternate names, kept flat for alias matching during detection.
    pub aliases: Vec<String>,
    pub url: Option<String>,
    pub details: Option<String>,
    pub rating: Option<i32>,
    pub favorite: bool,
    pub last_synced: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Tag {
    pub id: TagId,
    pub name: String,
    pub description: Option<String>,
    pub parent_id: Option<TagId>,
    pub last_synced: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Studio {
    pub id: StudioId,
    pub name: String,
    pub url: Option<String>,
    pub details: Option<String>,
    pub rating: Option<i32>,
    pub parent_id: Option<StudioId>,
    pub last_synced: Option<DateTime<Utc>>,
}

/// Entity families the sync engine tracks watermarks for.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Scene,
    Performer,
    Tag,
    Studio,
    /// Umbrella kind used by the combined incremental sync.
    All,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Scene => "scene",
            EntityKind::Performer => "performer",
            EntityKind::Tag => "tag",
            EntityKind::Studio => "studio",
            EntityKind::All => "all",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scene" => Ok(EntityKind::Scene),
            "performer" => Ok(EntityKind::Performer),
            "tag" => Ok(EntityKind::Tag),
            "studio" => Ok(EntityKind::Studio),
            "all" => Ok(EntityKind::All),
            other => Err(format!("unrecognized entity kind: {other}")),
        }
    }
}

//! Conflict detection and resolution between mirror rows and incoming
//! Catalog data.

use std::str::FromStr;
use std::sync::Mutex;

use chrono::Utc;
use serde_json::{Value, json};
use tracing::info;

use curator_model::{RemoteScene, Scene};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ConflictPolicy {
    #[default]
    RemoteWins,
    LocalWins,
    Merge,
    Manual,
}

impl ConflictPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictPolicy::RemoteWins => "remote_wins",
            ConflictPolicy::LocalWins => "local_wins",
            ConflictPolicy::Merge => "merge",
            ConflictPolicy::Manual => "manual",
        }
    }
}

impl FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "remote_wins" => Ok(ConflictPolicy::RemoteWins),
            "local_wins" => Ok(ConflictPolicy::LocalWins),
            "merge" => Ok(ConflictPolicy::Merge),
            "manual" => Ok(ConflictPolicy::Manual),
            other => Err(format!("unrecognized conflict policy: {other}")),
        }
    }
}

/// What the resolver decided for one scene.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Resolution {
    /// No delta between local and remote.
    Unchanged,
    /// Strategy merge should proceed.
    ApplyRemote,
    /// Local row kept as is.
    KeepLocal,
    /// Row flagged for operator review; mutation skipped.
    Flagged,
}

#[derive(Debug, Default)]
pub struct ConflictResolver {
    policy: ConflictPolicy,
    log: Mutex<Vec<Value>>,
}

impl ConflictResolver {
    pub fn new(policy: ConflictPolicy) -> Self {
        Self {
            policy,
            log: Mutex::new(Vec::new()),
        }
    }

    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    /// Field-level delta between the mirror row and the incoming record.
    pub fn detect_changes(&self, local: &Scene, remote: &RemoteScene) -> Value {
        let mut delta = serde_json::Map::new();

        let mut field = |name: &str, local: Value, remote: Value| {
            if local != remote {
                delta.insert(name.to_string(), json!({ "local": local, "remote": remote }));
            }
        };

        field("title", json!(local.title), json!(remote.title));
        field("details", json!(local.details), json!(remote.details));
        field("url", json!(local.url), json!(remote.url));
        field("rating", json!(local.rating), json!(remote.rating));
        field("organized", json!(local.organized), json!(remote.organized));
        field(
            "date",
            json!(local.catalog_date.map(|d| d.to_rfc3339())),
            json!(remote.date.map(|d| d.to_rfc3339())),
        );
        field(
            "studio",
            json!(local.studio_id.as_ref().map(|s| s.as_str())),
            json!(remote.studio.as_ref().map(|s| s.id.as_str())),
        );

        Value::Object(delta)
    }

    /// Apply the configured policy to a detected delta. The caller is
    /// responsible for running the strategy merge when the answer is
    /// [`Resolution::ApplyRemote`].
    pub fn resolve_scene(&self, local: &mut Scene, remote: &RemoteScene) -> Resolution {
        let delta = self.detect_changes(local, remote);
        let Value::Object(fields) = &delta else {
            return Resolution::Unchanged;
        };
        if fields.is_empty() {
            return Resolution::Unchanged;
        }

        self.log_conflict(local.id.as_str(), &delta);

        match self.policy {
            ConflictPolicy::RemoteWins | ConflictPolicy::Merge => Resolution::ApplyRemote,
            ConflictPolicy::LocalWins => Resolution::KeepLocal,
            ConflictPolicy::Manual => {
                local.sync_conflict = true;
                local.conflict_data = Some(delta);
                Resolution::Flagged
            }
        }
    }

    fn log_conflict(&self, scene_id: &str, delta: &Value) {
        let fields = delta.as_object().map(|f| f.len()).unwrap_or(0);
        info!(
            "conflict on scene {scene_id} resolved with {} ({fields} fields differ)",
            self.policy.as_str()
        );
        if let Ok(mut log) = self.log.lock() {
            log.push(json!({
                "timestamp": Utc::now().to_rfc3339(),
                "entity_type": "scene",
                "entity_id": scene_id,
                "changes": delta,
                "strategy": self.policy.as_str(),
            }));
        }
    }

    pub fn summary(&self) -> Value {
        let log = self.log.lock().map(|l| l.clone()).unwrap_or_default();
        let recent: Vec<Value> = log.iter().rev().take(10).cloned().collect();
        json!({
            "total_conflicts": log.len(),
            "recent_conflicts": recent,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use curator_model::{EntityRef, SceneId};

    fn local() -> Scene {
        Scene {
            id: SceneId::new("1"),
            title: "Local title".into(),
            organized: false,
            ..Scene::default()
        }
    }

    fn remote() -> RemoteScene {
        RemoteScene {
            id: "1".into(),
            title: "Remote title".into(),
            organized: true,
            studio: Some(EntityRef::new("9", "Studio")),
            ..RemoteScene::default()
        }
    }

    #[test]
    fn detects_field_and_relationship_deltas() {
        let resolver = ConflictResolver::new(ConflictPolicy::RemoteWins);
        let delta = resolver.detect_changes(&local(), &remote());
        let fields = delta.as_object().unwrap();
        assert!(fields.contains_key("title"));
        assert!(fields.contains_key("organized"));
        assert!(fields.contains_key("studio"));
        assert!(!fields.contains_key("details"));
    }

    #[test]
    fn remote_wins_requests_merge() {
        let resolver = ConflictResolver::new(ConflictPolicy::RemoteWins);
        let mut row = local();
        assert_eq!(resolver.resolve_scene(&mut row, &remote()), Resolution::ApplyRemote);
    }

    #[test]
    fn local_wins_keeps_the_row() {
        let resolver = ConflictResolver::new(ConflictPolicy::LocalWins);
        let mut row = local();
        assert_eq!(resolver.resolve_scene(&mut row, &remote()), Resolution::KeepLocal);
        assert_eq!(row.title, "Local title");
    }

    #[test]
    fn manual_flags_the_row_and_skips_mutation() {
        let resolver = ConflictResolver::new(ConflictPolicy::Manual);
        let mut row = local();
        assert_eq!(resolver.resolve_scene(&mut row, &remote()), Resolution::Flagged);
        assert!(row.sync_conflict);
        assert!(row.conflict_data.is_some());
        assert_eq!(row.title, "Local title");
    }

    #[test]
    fn identical_rows_are_unchanged() {
        let resolver = ConflictResolver::new(ConflictPolicy::RemoteWins);
        let mut row = local();
        let mut same = RemoteScene {
            id: "1".into(),
            title: "Local title".into(),
            ..RemoteScene::default()
        };
        same.organized = false;
        assert_eq!(resolver.resolve_scene(&mut row, &same), Resolution::Unchanged);
    }

    #[test]
    fn conflicts_are_logged_for_auditing() {
        let resolver = ConflictResolver::new(ConflictPolicy::RemoteWins);
        let mut row = local();
        resolver.resolve_scene(&mut row, &remote());
        let summary = resolver.summary();
        assert_eq!(summary["total_conflicts"], 1);
    }
}

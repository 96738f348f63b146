//! Pluggable merge strategies for scene synchronization.
//!
//! The strategy decides whether an incoming remote record is worth
//! writing and how it folds into the local row. Strategies are chosen at
//! construction and passed as a trait object; nothing downstream
//! branches on concrete types.

use chrono::{DateTime, Utc};
use serde_json::json;
use sha2::{Digest, Sha256};

use curator_model::{RemoteScene, Scene};

/// Hex SHA-256 over the sync-relevant field subset. serde_json maps are
/// key-sorted, so the digest is stable across runs.
pub fn content_checksum(remote: &RemoteScene) -> String {
    let primary = remote.primary_file();
    let mut performer_ids: Vec<&str> =
        remote.performers.iter().map(|p| p.id.as_str()).collect();
    performer_ids.sort_unstable();
    let mut tag_ids: Vec<&str> = remote.tags.iter().map(|t| t.id.as_str()).collect();
    tag_ids.sort_unstable();

    let subset = json!({
        "title": remote.title,
        "details": remote.details,
        "url": remote.url,
        "date": remote.date.map(|d| d.to_rfc3339()),
        "rating": remote.rating,
        "organized": remote.organized,
        "file": primary.map(|f| json!({
            "path": f.path,
            "size": f.size,
            "width": f.width,
            "height": f.height,
            "duration": f.duration,
            "frame_rate": f.frame_rate,
        })),
        "performers": performer_ids,
        "tags": tag_ids,
        "studio": remote.studio.as_ref().map(|s| s.id.as_str()),
    });

    let digest = Sha256::digest(subset.to_string().as_bytes());
    hex::encode(digest)
}

/// Overwrite every synced scalar field from the remote record.
pub fn apply_remote(local: &mut Scene, remote: &RemoteScene) {
    local.title = remote.title.clone();
    local.details = remote.details.clone();
    local.url = remote.url.clone();
    local.rating = remote.rating;
    local.organized = remote.organized;
    local.catalog_date = remote.date;
    local.catalog_created_at = remote.created_at.or(local.catalog_created_at);
    local.catalog_updated_at = remote.updated_at;
    local.studio_id = remote.studio.as_ref().map(|s| s.id.clone().into());
    local.content_checksum = Some(content_checksum(remote));
}

#[cfg_attr(test, mockall::automock)]
pub trait SyncStrategy: Send + Sync {
    /// Whether this remote record should be written over the local row.
    fn should_sync<'a>(&self, remote: &RemoteScene, local: Option<&'a Scene>) -> bool;

    /// Fold the remote record into the local row.
    fn merge(&self, local: &mut Scene, remote: &RemoteScene);

    /// Timestamp check used for performers/tags/studios, which carry no
    /// checksum.
    fn should_sync_entity(
        &self,
        remote_updated: Option<DateTime<Utc>>,
        local_synced: Option<DateTime<Utc>>,
    ) -> bool {
        match (remote_updated, local_synced) {
            (Some(remote), Some(local)) => remote > local,
            _ => true,
        }
    }
}

/// Always sync, overwrite everything. Initial imports and forced
/// refreshes.
#[derive(Debug, Default)]
pub struct FullSyncStrategy;

impl SyncStrategy for FullSyncStrategy {
    fn should_sync(&self, _remote: &RemoteScene, _local: Option<&Scene>) -> bool {
        true
    }

    fn merge(&self, local: &mut Scene, remote: &RemoteScene) {
        apply_remote(local, remote);
    }

    fn should_sync_entity(
        &self,
        _remote_updated: Option<DateTime<Utc>>,
        _local_synced: Option<DateTime<Utc>>,
    ) -> bool {
        true
    }
}

/// Sync only when the remote is newer than the local mirror.
#[derive(Debug, Default)]
pub struct IncrementalSyncStrategy;

impl SyncStrategy for IncrementalSyncStrategy {
    fn should_sync(&self, remote: &RemoteScene, local: Option<&Scene>) -> bool {
        let Some(local) = local else {
            return true;
        };
        match (remote.updated_at, local.catalog_updated_at) {
            (Some(remote_updated), Some(local_updated)) => remote_updated > local_updated,
            _ => true,
        }
    }

    fn merge(&self, local: &mut Scene, remote: &RemoteScene) {
        apply_remote(local, remote);
    }
}

/// Incremental check plus a content checksum, so no-op timestamp bumps
/// on the Catalog side do not rewrite the mirror. Text fields respect
/// local `manually_edited` rows; file-level fields always follow the
/// source.
#[derive(Debug, Default)]
pub struct SmartSyncStrategy;

impl SyncStrategy for SmartSyncStrategy {
    fn should_sync(&self, remote: &RemoteScene, local: Option<&Scene>) -> bool {
        let Some(local) = local else {
            return true;
        };
        if IncrementalSyncStrategy.should_sync(remote, Some(local)) {
            return true;
        }
        match &local.content_checksum {
            Some(checksum) => *checksum != content_checksum(remote),
            None => true,
        }
    }

    fn merge(&self, local: &mut Scene, remote: &RemoteScene) {
        if !local.manually_edited {
            apply_remote(local, remote);
            return;
        }

        // Manually edited rows keep their text; the rest follows remote.
        local.rating = remote.rating;
        local.organized = remote.organized;
        local.catalog_created_at = remote.created_at.or(local.catalog_created_at);
        local.catalog_updated_at = remote.updated_at;
        local.studio_id = remote.studio.as_ref().map(|s| s.id.clone().into());
        local.content_checksum = Some(content_checksum(remote));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use curator_model::{EntityRef, SceneId};

    fn remote(updated_minute: u32) -> RemoteScene {
        RemoteScene {
            id: "1".into(),
            title: "Title".into(),
            organized: true,
            rating: Some(4),
            updated_at: Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, updated_minute, 0).unwrap()),
            studio: Some(EntityRef::new("9", "Studio")),
            ..RemoteScene::default()
        }
    }

    fn local(updated_minute: u32) -> Scene {
        Scene {
            id: SceneId::new("1"),
            catalog_updated_at: Some(
                Utc.with_ymd_and_hms(2024, 3, 1, 12, updated_minute, 0).unwrap(),
            ),
            ..Scene::default()
        }
    }

    #[test]
    fn checksum_is_stable_and_order_insensitive() {
        let mut a = remote(0);
        a.performers = vec![EntityRef::new("2", "B"), EntityRef::new("1", "A")];
        let mut b = remote(0);
        b.performers = vec![EntityRef::new("1", "A"), EntityRef::new("2", "B")];
        assert_eq!(content_checksum(&a), content_checksum(&b));

        let mut c = remote(0);
        c.title = "Other".into();
        assert_ne!(content_checksum(&a), content_checksum(&c));
    }

    #[test]
    fn full_strategy_always_syncs() {
        assert!(FullSyncStrategy.should_sync(&remote(0), Some(&local(59))));
    }

    #[test]
    fn incremental_strategy_compares_remote_timestamps() {
        let strategy = IncrementalSyncStrategy;
        assert!(strategy.should_sync(&remote(30), Some(&local(0))));
        assert!(!strategy.should_sync(&remote(0), Some(&local(30))));
        assert!(strategy.should_sync(&remote(0), None));
    }

    #[test]
    fn smart_strategy_detects_content_drift_despite_timestamps() {
        let strategy = SmartSyncStrategy;
        let incoming = remote(0);
        let mut mirror = local(30);

        // Checksum matches and timestamp is older: nothing to do.
        mirror.content_checksum = Some(content_checksum(&incoming));
        assert!(!strategy.should_sync(&incoming, Some(&mirror)));

        // Same timestamps, drifted content: sync.
        mirror.content_checksum = Some("0".repeat(64));
        assert!(strategy.should_sync(&incoming, Some(&mirror)));
    }

    #[test]
    fn smart_merge_respects_manual_edits() {
        let strategy = SmartSyncStrategy;
        let incoming = remote(0);

        let mut mirror = local(0);
        mirror.title = "Operator title".into();
        mirror.details = Some("Operator details".into());
        mirror.manually_edited = true;

        strategy.merge(&mut mirror, &incoming);
        assert_eq!(mirror.title, "Operator title");
        assert_eq!(mirror.details.as_deref(), Some("Operator details"));
        // Non-text fields still follow remote.
        assert!(mirror.organized);
        assert_eq!(mirror.rating, Some(4));
        assert_eq!(mirror.studio_id.as_ref().unwrap().as_str(), "9");
    }

    #[test]
    fn strategies_pass_through_trait_objects() {
        let mut mocked = MockSyncStrategy::new();
        mocked.expect_should_sync_entity().return_const(false);

        let strategy: std::sync::Arc<dyn SyncStrategy> = std::sync::Arc::new(mocked);
        assert!(!strategy.should_sync_entity(None, None));
    }

    #[test]
    fn second_sync_of_same_payload_is_a_noop() {
        let strategy = SmartSyncStrategy;
        let incoming = remote(0);
        let mut mirror = local(0);

        strategy.merge(&mut mirror, &incoming);
        mirror.catalog_updated_at = incoming.updated_at;
        assert!(!strategy.should_sync(&incoming, Some(&mirror)));
    }
}

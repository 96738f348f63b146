//! Scene synchronization: row merge, relationship reconciliation, and
//! file/marker upkeep.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use curator_model::{
    PerformerId, RemoteFile, RemoteMarker, RemoteScene, Scene, SceneFile, SceneId, SceneMarker,
    TagId,
};

use crate::context::AppContext;
use crate::error::{CuratorError, Result};
use crate::sync::conflicts::{ConflictResolver, Resolution};
use crate::sync::strategies::SyncStrategy;

/// What happened to one scene during sync.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SceneAction {
    Created,
    Updated,
    Skipped,
}

pub struct SceneSyncHandler {
    context: Arc<AppContext>,
    strategy: Arc<dyn SyncStrategy>,
    resolver: Arc<ConflictResolver>,
}

impl std::fmt::Debug for SceneSyncHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SceneSyncHandler").finish()
    }
}

impl SceneSyncHandler {
    pub fn new(
        context: Arc<AppContext>,
        strategy: Arc<dyn SyncStrategy>,
        resolver: Arc<ConflictResolver>,
    ) -> Self {
        Self {
            context,
            strategy,
            resolver,
        }
    }

    /// Sync one scene with all of its relationships.
    pub async fn sync_scene(&self, remote: &RemoteScene) -> Result<SceneAction> {
        if remote.id.trim().is_empty() {
            return Err(CuratorError::Validation("scene id is required".into()));
        }
        let scene_id = SceneId::new(remote.id.clone());
        debug!("syncing scene {scene_id}");

        let scenes = self.context.database.scenes();
        let existing = scenes.get(&scene_id).await?;
        let created = existing.is_none();

        if let Some(existing) = &existing
            && !self.strategy.should_sync(remote, Some(existing))
        {
            scenes.touch_last_synced(&scene_id).await?;
            return Ok(SceneAction::Skipped);
        }

        let mut scene = existing.unwrap_or_else(|| Scene {
            id: scene_id.clone(),
            ..Scene::default()
        });

        let resolution = if created {
            Resolution::ApplyRemote
        } else {
            self.resolver.resolve_scene(&mut scene, remote)
        };

        match resolution {
            Resolution::ApplyRemote | Resolution::Unchanged => {
                self.strategy.merge(&mut scene, remote);
            }
            Resolution::KeepLocal | Resolution::Flagged => {}
        }

        // Relationship targets must exist before the row points at them.
        self.ensure_related_entities(remote).await?;

        scene.last_synced = Some(Utc::now());
        scenes.upsert(&scene).await?;

        if matches!(resolution, Resolution::ApplyRemote | Resolution::Unchanged) {
            self.sync_relationships(&scene_id, remote).await?;
        }

        Ok(if created {
            SceneAction::Created
        } else {
            SceneAction::Updated
        })
    }

    /// Batch sync with entity pre-fetching: the union of referenced
    /// performers, tags, and studios is loaded in three queries and
    /// missing rows are created once, instead of per scene.
    pub async fn sync_batch(
        &self,
        remotes: &[RemoteScene],
    ) -> Vec<(String, Result<SceneAction>)> {
        if let Err(err) = self.prefetch_entities(remotes).await {
            warn!("entity pre-fetch failed; falling back to per-scene creation: {err}");
        }

        let mut outcomes = Vec::with_capacity(remotes.len());
        for remote in remotes {
            let outcome = self.sync_scene(remote).await;
            outcomes.push((remote.id.clone(), outcome));
        }
        outcomes
    }

    async fn prefetch_entities(&self, remotes: &[RemoteScene]) -> Result<()> {
        let mut performer_refs: HashMap<&str, &str> = HashMap::new();
        let mut tag_refs: HashMap<&str, &str> = HashMap::new();
        let mut studio_refs: HashMap<&str, &str> = HashMap::new();

        for remote in remotes {
            for performer in &remote.performers {
                performer_refs.insert(&performer.id, &performer.name);
            }
            for tag in &remote.tags {
                tag_refs.insert(&tag.id, &tag.name);
            }
            if let Some(studio) = &remote.studio {
                studio_refs.insert(&studio.id, &studio.name);
            }
        }

        let entities = self.context.database.entities();

        let performer_ids: Vec<String> = performer_refs.keys().map(|id| id.to_string()).collect();
        let known: HashSet<String> = entities
            .performers_by_ids(&performer_ids)
            .await?
            .into_iter()
            .map(|p| p.id.0)
            .collect();
        for (id, name) in &performer_refs {
            if !known.contains(*id) {
                entities
                    .ensure_performer(&PerformerId::new(*id), display_name(name, "Performer"))
                    .await?;
            }
        }

        let tag_ids: Vec<String> = tag_refs.keys().map(|id| id.to_string()).collect();
        let known: HashSet<String> = entities
            .tags_by_ids(&tag_ids)
            .await?
            .into_iter()
            .map(|t| t.id.0)
            .collect();
        for (id, name) in &tag_refs {
            if !known.contains(*id) {
                entities
                    .ensure_tag(&TagId::new(*id), display_name(name, "Tag"))
                    .await?;
            }
        }

        let studio_ids: Vec<String> = studio_refs.keys().map(|id| id.to_string()).collect();
        let known: HashSet<String> = entities
            .studios_by_ids(&studio_ids)
            .await?
            .into_iter()
            .map(|s| s.id.0)
            .collect();
        for (id, name) in &studio_refs {
            if !known.contains(*id) {
                entities
                    .ensure_studio(&curator_model::StudioId::new(*id), display_name(name, "Studio"))
                    .await?;
            }
        }

        Ok(())
    }

    async fn ensure_related_entities(&self, remote: &RemoteScene) -> Result<()> {
        let entities = self.context.database.entities();

        if let Some(studio) = &remote.studio {
            entities
                .ensure_studio(
                    &curator_model::StudioId::new(studio.id.clone()),
                    display_name(&studio.name, "Studio"),
                )
                .await?;
        }
        for performer in &remote.performers {
            entities
                .ensure_performer(
                    &PerformerId::new(performer.id.clone()),
                    display_name(&performer.name, "Performer"),
                )
                .await?;
        }
        for tag in &remote.tags {
            entities
                .ensure_tag(&TagId::new(tag.id.clone()), display_name(&tag.name, "Tag"))
                .await?;
        }
        // Marker tags arrive as bare ids; stub them so the FK holds.
        for marker in &remote.markers {
            if let Some(primary) = &marker.primary_tag_id {
                entities
                    .ensure_tag(&TagId::new(primary.clone()), "Unknown Tag")
                    .await?;
            }
            for tag_id in &marker.tag_ids {
                entities
                    .ensure_tag(&TagId::new(tag_id.clone()), "Unknown Tag")
                    .await?;
            }
        }

        Ok(())
    }

    async fn sync_relationships(&self, scene_id: &SceneId, remote: &RemoteScene) -> Result<()> {
        let scenes = self.context.database.scenes();

        let performer_ids: Vec<PerformerId> = remote
            .performers
            .iter()
            .map(|p| PerformerId::new(p.id.clone()))
            .collect();
        scenes.replace_performers(scene_id, &performer_ids).await?;

        let tag_ids: Vec<TagId> = remote
            .tags
            .iter()
            .map(|t| TagId::new(t.id.clone()))
            .collect();
        scenes.replace_tags(scene_id, &tag_ids).await?;

        self.reconcile_files(scene_id, &remote.files).await?;
        self.reconcile_markers(scene_id, &remote.markers).await?;

        Ok(())
    }

    /// Files match by id; remote files without an id get a deterministic
    /// one hashed from `{scene_id, path}`. Files absent from the remote
    /// list are deleted, and exactly one file ends up primary.
    async fn reconcile_files(&self, scene_id: &SceneId, remote_files: &[RemoteFile]) -> Result<()> {
        let scenes = self.context.database.scenes();
        let existing = scenes.list_files(scene_id).await?;
        let current_primary: Option<String> = existing
            .iter()
            .find(|f| f.is_primary)
            .map(|f| f.id.to_string());

        let mut keep: Vec<String> = Vec::with_capacity(remote_files.len());
        for (idx, remote_file) in remote_files.iter().enumerate() {
            let file_id = if remote_file.id.trim().is_empty() {
                deterministic_file_id(scene_id, &remote_file.path)
            } else {
                remote_file.id.clone()
            };
            keep.push(file_id.clone());

            let is_primary = match &current_primary {
                Some(primary) => *primary == file_id,
                None => idx == 0,
            };

            scenes
                .upsert_file(&SceneFile {
                    id: file_id.into(),
                    scene_id: scene_id.clone(),
                    path: remote_file.path.clone(),
                    size: remote_file.size,
                    width: remote_file.width,
                    height: remote_file.height,
                    duration: remote_file.duration,
                    frame_rate: remote_file.frame_rate,
                    bit_rate: remote_file.bit_rate,
                    codec: remote_file.video_codec.clone(),
                    phash: remote_file.phash.clone(),
                    oshash: remote_file.oshash.clone(),
                    is_primary,
                })
                .await?;
        }

        scenes.delete_files_except(scene_id, &keep).await?;

        // The previous primary may have been deleted; fall back to the
        // first listed file.
        if let Some(primary) = &current_primary
            && !keep.contains(primary)
            && let Some(first) = remote_files.first()
        {
            let first_id = if first.id.trim().is_empty() {
                deterministic_file_id(scene_id, &first.path)
            } else {
                first.id.clone()
            };
            let mut files = scenes.list_files(scene_id).await?;
            for file in &mut files {
                let should_be_primary = file.id.as_str() == first_id;
                if file.is_primary != should_be_primary {
                    file.is_primary = should_be_primary;
                    scenes.upsert_file(file).await?;
                }
            }
        }

        Ok(())
    }

    /// Markers upsert by id; markers lacking a primary tag are skipped;
    /// markers absent from the remote list are deleted.
    async fn reconcile_markers(
        &self,
        scene_id: &SceneId,
        remote_markers: &[RemoteMarker],
    ) -> Result<()> {
        let scenes = self.context.database.scenes();

        let mut keep: Vec<String> = Vec::new();
        for remote_marker in remote_markers {
            let Some(primary_tag) = &remote_marker.primary_tag_id else {
                debug!(
                    "skipping marker {} on scene {scene_id}: no primary tag",
                    remote_marker.id
                );
                continue;
            };
            if remote_marker
                .end_seconds
                .is_some_and(|end| end < remote_marker.seconds)
            {
                debug!(
                    "skipping marker {} on scene {scene_id}: inverted span",
                    remote_marker.id
                );
                continue;
            }

            keep.push(remote_marker.id.clone());
            scenes
                .upsert_marker(&SceneMarker {
                    id: remote_marker.id.clone().into(),
                    scene_id: scene_id.clone(),
                    seconds: remote_marker.seconds,
                    end_seconds: remote_marker.end_seconds,
                    title: remote_marker.title.clone(),
                    primary_tag_id: TagId::new(primary_tag.clone()),
                    tag_ids: remote_marker
                        .tag_ids
                        .iter()
                        .map(|id| TagId::new(id.clone()))
                        .collect(),
                })
                .await?;
        }

        scenes.delete_markers_except(scene_id, &keep).await?;
        Ok(())
    }
}

fn display_name<'a>(name: &'a str, kind: &str) -> &'a str {
    if name.trim().is_empty() {
        match kind {
            "Performer" => "Unknown Performer",
            "Studio" => "Unknown Studio",
            _ => "Unknown Tag",
        }
    } else {
        name
    }
}

/// Stable identifier for files the Catalog reports without one.
pub fn deterministic_file_id(scene_id: &SceneId, path: &str) -> String {
    let digest = Sha256::digest(format!("{scene_id}:{path}").as_bytes());
    hex::encode(&digest[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_file_ids_are_stable_and_scoped() {
        let a = deterministic_file_id(&SceneId::new("1"), "/videos/a.mp4");
        let b = deterministic_file_id(&SceneId::new("1"), "/videos/a.mp4");
        let c = deterministic_file_id(&SceneId::new("2"), "/videos/a.mp4");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn blank_names_fall_back_to_placeholders() {
        assert_eq!(display_name("", "Performer"), "Unknown Performer");
        assert_eq!(display_name("  ", "Studio"), "Unknown Studio");
        assert_eq!(display_name("Real Name", "Tag"), "Real Name");
    }
}

//! Synchronization of performers, tags, and studios, plus the parent
//! hierarchy resolution pass.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use curator_model::{RemotePerformer, RemoteStudio, RemoteTag, StudioId, TagId};

use crate::context::AppContext;
use crate::error::Result;
use crate::sync::strategies::SyncStrategy;

/// Counters for one entity-type pass.
#[derive(Clone, Copy, Debug, Default)]
pub struct EntitySyncStats {
    pub processed: u64,
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
    pub failed: u64,
}

pub struct EntitySyncHandler {
    context: Arc<AppContext>,
    strategy: Arc<dyn SyncStrategy>,
}

impl std::fmt::Debug for EntitySyncHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntitySyncHandler").finish()
    }
}

impl EntitySyncHandler {
    pub fn new(context: Arc<AppContext>, strategy: Arc<dyn SyncStrategy>) -> Self {
        Self { context, strategy }
    }

    pub async fn sync_performers(
        &self,
        remotes: &[RemotePerformer],
        force: bool,
    ) -> (EntitySyncStats, Vec<(String, String)>) {
        debug!("syncing {} performers", remotes.len());
        let entities = self.context.database.entities();
        let mut stats = EntitySyncStats::default();
        let mut errors = Vec::new();

        let existing: HashMap<String, _> = match entities.all_performers().await {
            Ok(rows) => rows.into_iter().map(|p| (p.id.0.clone(), p)).collect(),
            Err(err) => {
                warn!("failed to load local performers: {err}");
                HashMap::new()
            }
        };

        for remote in remotes {
            if remote.id.trim().is_empty() {
                stats.failed += 1;
                errors.push((remote.id.clone(), "performer id is required".into()));
                continue;
            }

            let local = existing.get(&remote.id);
            if !force
                && local.is_some()
                && !self
                    .strategy
                    .should_sync_entity(remote.updated_at, local.and_then(|l| l.last_synced))
            {
                stats.processed += 1;
                stats.skipped += 1;
                continue;
            }

            match entities.upsert_performer(remote).await {
                Ok(inserted) => {
                    stats.processed += 1;
                    if inserted {
                        stats.created += 1;
                    } else {
                        stats.updated += 1;
                    }
                }
                Err(err) => {
                    warn!("failed to sync performer {}: {err}", remote.id);
                    stats.failed += 1;
                    errors.push((remote.id.clone(), err.to_string()));
                }
            }
        }

        (stats, errors)
    }

    pub async fn sync_tags(
        &self,
        remotes: &[RemoteTag],
        force: bool,
    ) -> (EntitySyncStats, Vec<(String, String)>) {
        debug!("syncing {} tags", remotes.len());
        let entities = self.context.database.entities();
        let mut stats = EntitySyncStats::default();
        let mut errors = Vec::new();

        let existing: HashMap<String, _> = match entities.all_tags().await {
            Ok(rows) => rows.into_iter().map(|t| (t.id.0.clone(), t)).collect(),
            Err(err) => {
                warn!("failed to load local tags: {err}");
                HashMap::new()
            }
        };

        for remote in remotes {
            if remote.id.trim().is_empty() {
                stats.failed += 1;
                errors.push((remote.id.clone(), "tag id is required".into()));
                continue;
            }

            let local = existing.get(&remote.id);
            if !force
                && local.is_some()
                && !self
                    .strategy
                    .should_sync_entity(remote.updated_at, local.and_then(|l| l.last_synced))
            {
                stats.processed += 1;
                stats.skipped += 1;
                continue;
            }

            match entities.upsert_tag(remote).await {
                Ok(inserted) => {
                    stats.processed += 1;
                    if inserted {
                        stats.created += 1;
                    } else {
                        stats.updated += 1;
                    }
                }
                Err(err) => {
                    warn!("failed to sync tag {}: {err}", remote.id);
                    stats.failed += 1;
                    errors.push((remote.id.clone(), err.to_string()));
                }
            }
        }

        self.resolve_tag_hierarchy(remotes).await;
        (stats, errors)
    }

    pub async fn sync_studios(
        &self,
        remotes: &[RemoteStudio],
        force: bool,
    ) -> (EntitySyncStats, Vec<(String, String)>) {
        debug!("syncing {} studios", remotes.len());
        let entities = self.context.database.entities();
        let mut stats = EntitySyncStats::default();
        let mut errors = Vec::new();

        let existing: HashMap<String, _> = match entities.all_studios().await {
            Ok(rows) => rows.into_iter().map(|s| (s.id.0.clone(), s)).collect(),
            Err(err) => {
                warn!("failed to load local studios: {err}");
                HashMap::new()
            }
        };

        for remote in remotes {
            if remote.id.trim().is_empty() {
                stats.failed += 1;
                errors.push((remote.id.clone(), "studio id is required".into()));
                continue;
            }

            let local = existing.get(&remote.id);
            if !force
                && local.is_some()
                && !self
                    .strategy
                    .should_sync_entity(remote.updated_at, local.and_then(|l| l.last_synced))
            {
                stats.processed += 1;
                stats.skipped += 1;
                continue;
            }

            match entities.upsert_studio(remote).await {
                Ok(inserted) => {
                    stats.processed += 1;
                    if inserted {
                        stats.created += 1;
                    } else {
                        stats.updated += 1;
                    }
                }
                Err(err) => {
                    warn!("failed to sync studio {}: {err}", remote.id);
                    stats.failed += 1;
                    errors.push((remote.id.clone(), err.to_string()));
                }
            }
        }

        self.resolve_studio_hierarchy(remotes).await;
        (stats, errors)
    }

    /// Second pass once every tag exists: wire parents, skipping any
    /// link that would close a cycle.
    async fn resolve_tag_hierarchy(&self, remotes: &[RemoteTag]) {
        let parents: HashMap<&str, Option<&str>> = remotes
            .iter()
            .map(|t| (t.id.as_str(), t.parent_id.as_deref()))
            .collect();
        let entities = self.context.database.entities();

        for remote in remotes {
            let Some(parent_id) = remote.parent_id.as_deref() else {
                continue;
            };
            if introduces_cycle(&parents, &remote.id, parent_id) {
                warn!(
                    "tag {} -> {} would create a cycle; leaving unlinked",
                    remote.id, parent_id
                );
                continue;
            }
            if let Err(err) = entities
                .link_tag_parent(&TagId::new(remote.id.clone()), Some(parent_id))
                .await
            {
                warn!("failed to link tag {} parent: {err}", remote.id);
            }
        }
    }

    async fn resolve_studio_hierarchy(&self, remotes: &[RemoteStudio]) {
        let parents: HashMap<&str, Option<&str>> = remotes
            .iter()
            .map(|s| (s.id.as_str(), s.parent_id.as_deref()))
            .collect();
        let entities = self.context.database.entities();

        for remote in remotes {
            let Some(parent_id) = remote.parent_id.as_deref() else {
                continue;
            };
            if introduces_cycle(&parents, &remote.id, parent_id) {
                warn!(
                    "studio {} -> {} would create a cycle; leaving unlinked",
                    remote.id, parent_id
                );
                continue;
            }
            if let Err(err) = entities
                .link_studio_parent(&StudioId::new(remote.id.clone()), Some(parent_id))
                .await
            {
                warn!("failed to link studio {} parent: {err}", remote.id);
            }
        }
    }
}

/// Walk the ancestor chain of `parent` in the incoming set; hitting
/// `child` means the link would close a cycle.
fn introduces_cycle(
    parents: &HashMap<&str, Option<&str>>,
    child: &str,
    parent: &str,
) -> bool {
    if child == parent {
        return true;
    }
    let mut current = Some(parent);
    let mut hops = 0;
    while let Some(node) = current {
        if node == child {
            return true;
        }
        hops += 1;
        if hops > parents.len() {
            return true; // pre-existing cycle in the input
        }
        current = parents.get(node).copied().flatten();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_parent_is_a_cycle() {
        let parents = HashMap::from([("a", Some("a"))]);
        assert!(introduces_cycle(&parents, "a", "a"));
    }

    #[test]
    fn two_node_cycle_is_detected() {
        let parents = HashMap::from([("a", Some("b")), ("b", Some("a"))]);
        assert!(introduces_cycle(&parents, "a", "b"));
    }

    #[test]
    fn chains_are_fine() {
        let parents = HashMap::from([("a", Some("b")), ("b", Some("c")), ("c", None)]);
        assert!(!introduces_cycle(&parents, "a", "b"));
        assert!(!introduces_cycle(&parents, "b", "c"));
    }
}

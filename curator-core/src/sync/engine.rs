//! The sync engine: full, incremental, and targeted refreshes of the
//! mirror from the Catalog.
//!
//! The incremental scene pass runs through the [`WatermarkStore`],
//! [`SceneSource`], and [`SceneSink`] seams so watermark gating is
//! testable without Postgres or the Catalog behind it.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use curator_model::{EntityKind, RemoteScene, SceneId, SyncResult, SyncStatus};

use crate::catalog::CatalogClient;
use crate::context::AppContext;
use crate::db::SyncHistoryRepository;
use crate::error::{CuratorError, Result};
use crate::jobs::progress::ProgressBus;
use crate::sync::conflicts::{ConflictPolicy, ConflictResolver};
use crate::sync::entities::{EntitySyncHandler, EntitySyncStats};
use crate::sync::progress::SyncProgress;
use crate::sync::scenes::{SceneAction, SceneSyncHandler};
use crate::sync::strategies::{FullSyncStrategy, SmartSyncStrategy, SyncStrategy};

/// Watermark bookkeeping the incremental pass depends on.
/// `SyncHistoryRepository` is the Postgres implementation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WatermarkStore: Send + Sync {
    async fn open(&self, kind: EntityKind) -> Result<i64>;
    async fn latest(&self, kind: EntityKind) -> Result<Option<DateTime<Utc>>>;
    #[allow(clippy::too_many_arguments)]
    async fn close(
        &self,
        entry: i64,
        status: SyncStatus,
        synced: i64,
        created: i64,
        updated: i64,
        failed: i64,
        errors: Option<Value>,
    ) -> Result<()>;
}

#[async_trait]
impl WatermarkStore for SyncHistoryRepository {
    async fn open(&self, kind: EntityKind) -> Result<i64> {
        self.start(kind).await
    }

    async fn latest(&self, kind: EntityKind) -> Result<Option<DateTime<Utc>>> {
        self.latest_completed(kind).await
    }

    async fn close(
        &self,
        entry: i64,
        status: SyncStatus,
        synced: i64,
        created: i64,
        updated: i64,
        failed: i64,
        errors: Option<Value>,
    ) -> Result<()> {
        self.complete(entry, status, synced, created, updated, failed, errors.as_ref())
            .await
    }
}

/// Catalog-side reads for the incremental pass; the server applies the
/// updated-after filter.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SceneSource: Send + Sync {
    async fn scenes_updated_since(
        &self,
        since: DateTime<Utc>,
        page: u64,
        per_page: i64,
    ) -> Result<(Vec<RemoteScene>, u64)>;
}

#[async_trait]
impl SceneSource for CatalogClient {
    async fn scenes_updated_since(
        &self,
        since: DateTime<Utc>,
        page: u64,
        per_page: i64,
    ) -> Result<(Vec<RemoteScene>, u64)> {
        self.get_scenes_since(since, page, per_page).await
    }
}

/// Mirror-side writes for the incremental pass.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SceneSink: Send + Sync {
    async fn write_batch(&self, scenes: Vec<RemoteScene>) -> Vec<(String, Result<SceneAction>)>;
}

#[async_trait]
impl SceneSink for SceneSyncHandler {
    async fn write_batch(&self, scenes: Vec<RemoteScene>) -> Vec<(String, Result<SceneAction>)> {
        self.sync_batch(&scenes).await
    }
}

/// Watermark fallback for the combined incremental mode when no sync has
/// ever completed.
fn all_mode_fallback() -> Duration {
    Duration::hours(24)
}

pub struct SyncEngine {
    context: Arc<AppContext>,
    strategy: Arc<dyn SyncStrategy>,
    resolver: Arc<ConflictResolver>,
    bus: Option<ProgressBus>,
    page_size: usize,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("page_size", &self.page_size)
            .finish()
    }
}

impl SyncEngine {
    /// Engine with the configured conflict policy and the default
    /// checksum-aware strategy.
    pub fn new(context: Arc<AppContext>) -> Result<Self> {
        let policy: ConflictPolicy = context
            .settings
            .sync
            .conflict_policy
            .parse()
            .map_err(CuratorError::Config)?;
        let page_size = context.settings.sync.page_size.max(1);
        Ok(Self {
            context,
            strategy: Arc::new(SmartSyncStrategy),
            resolver: Arc::new(ConflictResolver::new(policy)),
            bus: None,
            page_size,
        })
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn SyncStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_bus(mut self, bus: ProgressBus) -> Self {
        self.bus = Some(bus);
        self
    }

    fn scene_handler(&self, force: bool) -> SceneSyncHandler {
        let strategy: Arc<dyn SyncStrategy> = if force {
            Arc::new(FullSyncStrategy)
        } else {
            self.strategy.clone()
        };
        SceneSyncHandler::new(self.context.clone(), strategy, self.resolver.clone())
    }

    fn entity_handler(&self) -> EntitySyncHandler {
        EntitySyncHandler::new(self.context.clone(), self.strategy.clone())
    }

    /// Full synchronization of every entity type. `force` bypasses the
    /// strategy checks and overwrites unconditionally.
    pub async fn sync_full(
        &self,
        job_id: Option<String>,
        force: bool,
        cancellation: CancellationToken,
    ) -> Result<SyncResult> {
        info!("starting full sync (force={force})");
        let history = self.context.database.sync_history();
        let all_entry = history.start(EntityKind::All).await?;

        let mut result = SyncResult::started(job_id.clone());

        self.sync_entities(&mut result, None, force).await?;

        if cancellation.is_cancelled() {
            result.complete(None);
            return Ok(result);
        }

        self.sync_scene_pages(&mut result, force, &cancellation)
            .await?;

        result.complete(None);
        history
            .complete(
                all_entry,
                result.status,
                result.processed_items as i64,
                result.created_items as i64,
                result.updated_items as i64,
                result.failed_items as i64,
                Some(&errors_blob(&result)),
            )
            .await?;

        info!(
            "full sync finished: {} processed, {} failed ({})",
            result.processed_items, result.failed_items, result.status
        );
        Ok(result)
    }

    /// Incremental synchronization using per-entity watermarks. Missing
    /// watermarks fall back to the combined watermark, then to 24 hours
    /// ago when nothing has ever completed.
    pub async fn sync_incremental(
        &self,
        job_id: Option<String>,
        cancellation: CancellationToken,
    ) -> Result<SyncResult> {
        let history = self.context.database.sync_history();
        let all_watermark = history.latest_completed(EntityKind::All).await?;
        let fallback = all_watermark.unwrap_or_else(|| Utc::now() - all_mode_fallback());

        info!("starting incremental sync (fallback watermark {fallback})");
        let all_entry = history.start(EntityKind::All).await?;
        let mut result = SyncResult::started(job_id.clone());

        let entity_since = Some(fallback);
        self.sync_entities(&mut result, entity_since, false).await?;

        if cancellation.is_cancelled() {
            result.complete(None);
            return Ok(result);
        }

        let handler = self.scene_handler(false);
        incremental_scene_pass(
            &self.context.database.sync_history(),
            &self.context.catalog,
            &handler,
            fallback,
            self.page_size as i64,
            self.bus.clone(),
            &mut result,
            &cancellation,
        )
        .await?;

        result.complete(None);
        history
            .complete(
                all_entry,
                result.status,
                result.processed_items as i64,
                result.created_items as i64,
                result.updated_items as i64,
                result.failed_items as i64,
                Some(&errors_blob(&result)),
            )
            .await?;
        Ok(result)
    }

    /// Targeted refresh of explicit scenes.
    pub async fn sync_scenes_targeted(
        &self,
        scene_ids: &[SceneId],
        job_id: Option<String>,
    ) -> Result<SyncResult> {
        let mut result = SyncResult::started(job_id.clone());
        result.total_items = scene_ids.len() as u64;
        let progress = SyncProgress::new(job_id, result.total_items, self.bus.clone());
        let handler = self.scene_handler(true);

        for scene_id in scene_ids {
            match self.context.catalog.get_scene(scene_id).await {
                Ok(Some(remote)) => {
                    let outcome = handler.sync_scene(&remote).await;
                    result.stats.scenes_processed += 1;
                    apply_scene_outcome(&mut result, &remote.id, outcome);
                }
                Ok(None) => {
                    result.add_error("scene", scene_id.as_str(), "not found in Catalog");
                    result.stats.scenes_failed += 1;
                }
                Err(err) => {
                    result.add_error("scene", scene_id.as_str(), err.to_string());
                    result.stats.scenes_failed += 1;
                }
            }
            result.processed_items += 1;
            progress.update(result.processed_items, false, false);
        }

        result.complete(None);
        progress.complete(&result);
        Ok(result)
    }

    pub async fn sync_scene_by_id(&self, scene_id: &SceneId) -> Result<SyncResult> {
        self.sync_scenes_targeted(std::slice::from_ref(scene_id), None)
            .await
    }

    async fn sync_entities(
        &self,
        result: &mut SyncResult,
        since: Option<DateTime<Utc>>,
        force: bool,
    ) -> Result<()> {
        let history = self.context.database.sync_history();
        let handler = self.entity_handler();
        let catalog = &self.context.catalog;

        // Performers
        let entry = history.start(EntityKind::Performer).await?;
        let performers = match since {
            Some(since) if !force => catalog.get_performers_since(since).await?,
            _ => catalog.get_all_performers().await?,
        };
        let (stats, errors) = handler.sync_performers(&performers, force).await;
        result.stats.performers_processed = stats.processed;
        result.stats.performers_created = stats.created;
        result.stats.performers_updated = stats.updated;
        self.finish_entity_entry(entry, EntityKind::Performer, result, stats, errors)
            .await?;

        // Tags
        let entry = history.start(EntityKind::Tag).await?;
        let tags = match since {
            Some(since) if !force => catalog.get_tags_since(since).await?,
            _ => catalog.get_all_tags().await?,
        };
        let (stats, errors) = handler.sync_tags(&tags, force).await;
        result.stats.tags_processed = stats.processed;
        result.stats.tags_created = stats.created;
        result.stats.tags_updated = stats.updated;
        self.finish_entity_entry(entry, EntityKind::Tag, result, stats, errors)
            .await?;

        // Studios
        let entry = history.start(EntityKind::Studio).await?;
        let studios = match since {
            Some(since) if !force => catalog.get_studios_since(since).await?,
            _ => catalog.get_all_studios().await?,
        };
        let (stats, errors) = handler.sync_studios(&studios, force).await;
        result.stats.studios_processed = stats.processed;
        result.stats.studios_created = stats.created;
        result.stats.studios_updated = stats.updated;
        self.finish_entity_entry(entry, EntityKind::Studio, result, stats, errors)
            .await?;

        Ok(())
    }

    async fn finish_entity_entry(
        &self,
        entry: i64,
        kind: EntityKind,
        result: &mut SyncResult,
        stats: EntitySyncStats,
        errors: Vec<(String, String)>,
    ) -> Result<()> {
        result.total_items += stats.processed + stats.failed;
        result.processed_items += stats.processed;
        result.created_items += stats.created;
        result.updated_items += stats.updated;
        result.skipped_items += stats.skipped;
        for (entity_id, message) in &errors {
            result.add_error(kind.as_str(), entity_id, message.clone());
        }

        let status = if stats.failed == 0 {
            SyncStatus::Success
        } else if stats.processed > 0 {
            SyncStatus::Partial
        } else {
            SyncStatus::Failed
        };
        let blob = json!(
            errors
                .iter()
                .map(|(id, message)| json!({ "entity_id": id, "error": message }))
                .collect::<Vec<_>>()
        );
        self.context
            .database
            .sync_history()
            .complete(
                entry,
                status,
                stats.processed as i64,
                stats.created as i64,
                stats.updated as i64,
                stats.failed as i64,
                Some(&blob),
            )
            .await?;
        Ok(())
    }

    async fn sync_scene_pages(
        &self,
        result: &mut SyncResult,
        force: bool,
        cancellation: &CancellationToken,
    ) -> Result<()> {
        let history = self.context.database.sync_history();
        let entry = history.start(EntityKind::Scene).await?;
        let handler = self.scene_handler(force);

        let mut page: u64 = 1;
        let mut scene_errors: Vec<Value> = Vec::new();
        let mut progress: Option<SyncProgress> = None;

        loop {
            if cancellation.is_cancelled() {
                info!("cancellation requested; stopping scene sync at page {page}");
                break;
            }

            let (scenes, total) = self
                .context
                .catalog
                .get_scenes(page, self.page_size as i64, None, None)
                .await?;

            if progress.is_none() {
                result.total_items += total;
                progress = Some(SyncProgress::new(
                    result.job_id.clone(),
                    result.total_items,
                    self.bus.clone(),
                ));
            }

            if scenes.is_empty() {
                break;
            }

            for (scene_id, outcome) in handler.sync_batch(&scenes).await {
                result.processed_items += 1;
                result.stats.scenes_processed += 1;
                if let Err(err) = &outcome {
                    scene_errors.push(json!({ "entity_id": scene_id, "error": err.to_string() }));
                }
                apply_scene_outcome(result, &scene_id, outcome);
                if let Some(progress) = &progress {
                    progress.update(result.processed_items, false, false);
                }
            }

            if (page as usize) * self.page_size >= total as usize {
                break;
            }
            page += 1;
        }

        let status = if result.stats.scenes_failed == 0 {
            SyncStatus::Success
        } else if result.stats.scenes_processed > result.stats.scenes_failed {
            SyncStatus::Partial
        } else {
            SyncStatus::Failed
        };
        history
            .complete(
                entry,
                status,
                result.stats.scenes_processed as i64,
                result.stats.scenes_created as i64,
                result.stats.scenes_updated as i64,
                result.stats.scenes_failed as i64,
                Some(&json!(scene_errors)),
            )
            .await?;

        if let Some(progress) = &progress {
            progress.update(result.processed_items, false, true);
        }
        Ok(())
    }
}

fn apply_scene_outcome(result: &mut SyncResult, scene_id: &str, outcome: Result<SceneAction>) {
    match outcome {
        Ok(SceneAction::Created) => {
            result.created_items += 1;
            result.stats.scenes_created += 1;
        }
        Ok(SceneAction::Updated) => {
            result.updated_items += 1;
            result.stats.scenes_updated += 1;
        }
        Ok(SceneAction::Skipped) => {
            result.skipped_items += 1;
            result.stats.scenes_skipped += 1;
        }
        Err(err) => {
            warn!("scene {scene_id} failed to sync: {err}");
            result.add_error("scene", scene_id, err.to_string());
            result.stats.scenes_failed += 1;
        }
    }
}

/// One incremental scene pass: resolve the watermark, pull only scenes
/// the Catalog reports as updated after it, write them through the
/// sink, and record the new watermark on completion so a back-to-back
/// run starts past everything just synced.
#[allow(clippy::too_many_arguments)]
async fn incremental_scene_pass(
    watermarks: &dyn WatermarkStore,
    source: &dyn SceneSource,
    sink: &dyn SceneSink,
    fallback: DateTime<Utc>,
    page_size: i64,
    bus: Option<ProgressBus>,
    result: &mut SyncResult,
    cancellation: &CancellationToken,
) -> Result<()> {
    let since = watermarks.latest(EntityKind::Scene).await?.unwrap_or(fallback);
    let entry = watermarks.open(EntityKind::Scene).await?;

    let scenes_failed_before = result.stats.scenes_failed;
    let mut page: u64 = 1;
    let mut scene_errors: Vec<Value> = Vec::new();
    let mut progress: Option<SyncProgress> = None;

    loop {
        if cancellation.is_cancelled() {
            info!("cancellation requested; stopping incremental scene sync at page {page}");
            break;
        }

        let (scenes, total) = source.scenes_updated_since(since, page, page_size).await?;

        if progress.is_none() {
            result.total_items += total;
            progress = Some(SyncProgress::new(
                result.job_id.clone(),
                result.total_items,
                bus.clone(),
            ));
        }

        if scenes.is_empty() {
            break;
        }

        for (scene_id, outcome) in sink.write_batch(scenes).await {
            result.processed_items += 1;
            result.stats.scenes_processed += 1;
            if let Err(err) = &outcome {
                scene_errors.push(json!({ "entity_id": scene_id, "error": err.to_string() }));
            }
            apply_scene_outcome(result, &scene_id, outcome);
            if let Some(progress) = &progress {
                progress.update(result.processed_items, false, false);
            }
        }

        if page.saturating_mul(page_size.max(1) as u64) >= total {
            break;
        }
        page += 1;
    }

    let failed = result.stats.scenes_failed - scenes_failed_before;
    let status = if failed == 0 {
        SyncStatus::Success
    } else if result.stats.scenes_processed > failed {
        SyncStatus::Partial
    } else {
        SyncStatus::Failed
    };
    watermarks
        .close(
            entry,
            status,
            result.stats.scenes_processed as i64,
            result.stats.scenes_created as i64,
            result.stats.scenes_updated as i64,
            failed as i64,
            Some(json!(scene_errors)),
        )
        .await?;

    if let Some(progress) = &progress {
        progress.update(result.processed_items, false, true);
    }
    Ok(())
}

fn errors_blob(result: &SyncResult) -> Value {
    json!(
        result
            .errors
            .iter()
            .map(|e| {
                json!({
                    "entity_type": e.entity_type,
                    "entity_id": e.entity_id,
                    "error": e.message,
                })
            })
            .collect::<Vec<_>>()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Mutex;

    struct FakeWatermarks {
        latest: Mutex<Option<DateTime<Utc>>>,
    }

    impl FakeWatermarks {
        fn starting_at(at: Option<DateTime<Utc>>) -> Self {
            Self {
                latest: Mutex::new(at),
            }
        }
    }

    #[async_trait]
    impl WatermarkStore for FakeWatermarks {
        async fn open(&self, _kind: EntityKind) -> Result<i64> {
            Ok(1)
        }

        async fn latest(&self, _kind: EntityKind) -> Result<Option<DateTime<Utc>>> {
            Ok(*self.latest.lock().unwrap())
        }

        async fn close(
            &self,
            _entry: i64,
            status: SyncStatus,
            _synced: i64,
            _created: i64,
            _updated: i64,
            _failed: i64,
            _errors: Option<Value>,
        ) -> Result<()> {
            if status != SyncStatus::Failed {
                *self.latest.lock().unwrap() = Some(Utc::now());
            }
            Ok(())
        }
    }

    /// Serves the Catalog contract: only scenes updated after `since`
    /// come back.
    struct FakeCatalog {
        scenes: Vec<RemoteScene>,
    }

    #[async_trait]
    impl SceneSource for FakeCatalog {
        async fn scenes_updated_since(
            &self,
            since: DateTime<Utc>,
            page: u64,
            _per_page: i64,
        ) -> Result<(Vec<RemoteScene>, u64)> {
            let matching: Vec<RemoteScene> = self
                .scenes
                .iter()
                .filter(|s| s.updated_at.is_some_and(|updated| updated > since))
                .cloned()
                .collect();
            let total = matching.len() as u64;
            Ok((if page == 1 { matching } else { Vec::new() }, total))
        }
    }

    struct RecordingSink {
        written: Mutex<Vec<String>>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                written: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SceneSink for RecordingSink {
        async fn write_batch(
            &self,
            scenes: Vec<RemoteScene>,
        ) -> Vec<(String, Result<SceneAction>)> {
            scenes
                .into_iter()
                .map(|scene| {
                    self.written.lock().unwrap().push(scene.id.clone());
                    (scene.id, Ok(SceneAction::Updated))
                })
                .collect()
        }
    }

    fn watermark_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn scene(id: &str, updated_at: DateTime<Utc>) -> RemoteScene {
        RemoteScene {
            id: id.into(),
            title: format!("Scene {id}"),
            updated_at: Some(updated_at),
            ..RemoteScene::default()
        }
    }

    #[tokio::test]
    async fn incremental_pass_fetches_only_scenes_past_the_watermark() {
        let t = watermark_time();
        let catalog = FakeCatalog {
            scenes: vec![
                scene("old", t - Duration::hours(1)),
                scene("new", t + Duration::hours(1)),
            ],
        };
        let watermarks = FakeWatermarks::starting_at(Some(t));
        let sink = RecordingSink::new();
        let mut result = SyncResult::started(None);

        incremental_scene_pass(
            &watermarks,
            &catalog,
            &sink,
            t - Duration::hours(24),
            100,
            None,
            &mut result,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(*sink.written.lock().unwrap(), vec!["new".to_string()]);
        assert_eq!(result.processed_items, 1);
        assert_eq!(result.updated_items, 1);
        assert_eq!(result.failed_items, 0);
    }

    #[tokio::test]
    async fn back_to_back_incremental_runs_sync_nothing_twice() {
        let t = watermark_time();
        let catalog = FakeCatalog {
            scenes: vec![
                scene("a", t + Duration::minutes(5)),
                scene("b", t + Duration::minutes(10)),
            ],
        };
        let watermarks = FakeWatermarks::starting_at(Some(t));
        let sink = RecordingSink::new();

        let mut first = SyncResult::started(None);
        incremental_scene_pass(
            &watermarks,
            &catalog,
            &sink,
            t - Duration::hours(24),
            100,
            None,
            &mut first,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(first.processed_items, 2);

        // The first run advanced the watermark past both scenes, so an
        // immediate second run finds nothing to do.
        let mut second = SyncResult::started(None);
        incremental_scene_pass(
            &watermarks,
            &catalog,
            &sink,
            t - Duration::hours(24),
            100,
            None,
            &mut second,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(second.processed_items, 0);
        assert_eq!(second.updated_items, 0);
        assert_eq!(sink.written.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn missing_watermark_falls_back_to_the_caller_window() {
        let t = watermark_time();
        let catalog = FakeCatalog {
            scenes: vec![
                scene("ancient", t - Duration::hours(48)),
                scene("recent", t - Duration::hours(1)),
            ],
        };
        let watermarks = FakeWatermarks::starting_at(None);
        let sink = RecordingSink::new();
        let mut result = SyncResult::started(None);

        incremental_scene_pass(
            &watermarks,
            &catalog,
            &sink,
            t - Duration::hours(24),
            100,
            None,
            &mut result,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(*sink.written.lock().unwrap(), vec!["recent".to_string()]);
        assert_eq!(result.processed_items, 1);
    }

    #[tokio::test]
    async fn sink_failures_surface_in_the_result_not_as_errors() {
        struct FailingSink;

        #[async_trait]
        impl SceneSink for FailingSink {
            async fn write_batch(
                &self,
                scenes: Vec<RemoteScene>,
            ) -> Vec<(String, Result<SceneAction>)> {
                scenes
                    .into_iter()
                    .map(|scene| {
                        (
                            scene.id,
                            Err(CuratorError::Database(sqlx::Error::PoolClosed)),
                        )
                    })
                    .collect()
            }
        }

        let t = watermark_time();
        let catalog = FakeCatalog {
            scenes: vec![scene("a", t + Duration::minutes(5))],
        };
        let watermarks = FakeWatermarks::starting_at(Some(t));
        let mut result = SyncResult::started(None);

        incremental_scene_pass(
            &watermarks,
            &catalog,
            &FailingSink,
            t - Duration::hours(24),
            100,
            None,
            &mut result,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(result.processed_items, 1);
        assert_eq!(result.failed_items, 1);
        assert_eq!(result.stats.scenes_failed, 1);
    }
}

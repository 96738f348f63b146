//! The analysis engine: walks a scene set through the enabled detectors
//! and stages the resulting proposals as a reviewable plan.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use curator_model::{
    AnalysisPlan, ChangeAction, ChangeField, DetectionResult, JobId, ProposedChange, SceneChanges,
    SceneData, SceneId,
};

use crate::ai::{AiClient, AiOperation, CostTracker, Usage};
use crate::analysis::batch::{BatchAnalyzerFn, BatchProcessor, BatchProgressFn};
use crate::context::AppContext;
use crate::detect::{
    AI_ERRORED, AI_TAGGED, AI_TAGME, DetailsCleaner, KnownPerformer, PerformerDetector,
    StudioDetector, TagDetector, VideoTagDetector,
};
use crate::db::SceneFilter;
use crate::error::{CuratorError, Result};
use crate::plan::PlanStore;

/// Callback reporting `(percent, message)` to the job layer.
pub type AnalysisProgressFn = Arc<dyn Fn(f64, String) + Send + Sync>;

#[derive(Clone, Debug)]
pub struct AnalysisOptions {
    pub detect_studios: bool,
    pub detect_performers: bool,
    pub detect_tags: bool,
    pub detect_details: bool,
    pub detect_video_tags: bool,
    /// Minimum confidence for a detection to become a proposed change.
    pub confidence_threshold: f64,
    pub batch_size: usize,
    pub max_concurrent: usize,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            detect_studios: false,
            detect_performers: false,
            detect_tags: false,
            detect_details: false,
            detect_video_tags: false,
            confidence_threshold: 0.7,
            batch_size: 15,
            max_concurrent: 3,
        }
    }
}

impl AnalysisOptions {
    pub fn only_video_tags(&self) -> bool {
        self.detect_video_tags
            && !self.detect_studios
            && !self.detect_performers
            && !self.detect_tags
            && !self.detect_details
    }

    fn enabled_labels(&self) -> Vec<&'static str> {
        let mut labels = Vec::new();
        if self.detect_studios {
            labels.push("Studio");
        }
        if self.detect_performers {
            labels.push("Performer");
        }
        if self.detect_tags {
            labels.push("Tag");
        }
        if self.detect_details {
            labels.push("Details");
        }
        if self.detect_video_tags {
            labels.push("Video Tag");
        }
        labels
    }
}

/// Detector reference data, snapshotted from the mirror at the start of
/// a run so every batch sees the same world.
#[derive(Clone, Debug, Default)]
struct ReferenceData {
    studios: Vec<String>,
    performers: Vec<KnownPerformer>,
    tags: Vec<String>,
}

pub struct AnalysisEngine {
    context: Arc<AppContext>,
    plans: PlanStore,
}

impl std::fmt::Debug for AnalysisEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisEngine").finish()
    }
}

impl AnalysisEngine {
    pub fn new(context: Arc<AppContext>) -> Self {
        let plans = PlanStore::new(context.clone());
        Self { context, plans }
    }

    /// Analyze a scene set and stage the proposals. Scenes come from the
    /// mirror (explicit ids or a filter), never straight from the
    /// Catalog. Per-scene failures are recorded, not propagated, except
    /// when video detection is the sole enabled pass.
    #[allow(clippy::too_many_arguments)]
    pub async fn analyze(
        &self,
        scene_ids: Option<Vec<SceneId>>,
        filters: Option<SceneFilter>,
        options: AnalysisOptions,
        plan_name: Option<String>,
        job_id: Option<JobId>,
        progress: Option<AnalysisProgressFn>,
        cancellation: CancellationToken,
    ) -> Result<AnalysisPlan> {
        if !(0.0..=1.0).contains(&options.confidence_threshold) {
            return Err(CuratorError::Validation(format!(
                "confidence threshold {} outside [0, 1]",
                options.confidence_threshold
            )));
        }

        let reference = self.refresh_reference().await?;

        let filter = match scene_ids {
            Some(ids) => SceneFilter {
                scene_ids: Some(ids),
                ..SceneFilter::default()
            },
            None => filters.unwrap_or_default(),
        };
        let scenes = self.context.database.scenes().query(&filter).await?;
        if scenes.is_empty() {
            info!("no scenes matched; returning empty plan");
            return Ok(AnalysisPlan::no_changes(
                "No Changes",
                json!({
                    "reason": "No scenes found",
                    "statistics": empty_statistics(),
                }),
            ));
        }

        let scene_data = self.context.database.scenes().load_scene_data(&scenes).await?;
        info!("starting analysis of {} scenes", scene_data.len());

        if let Some(progress) = &progress {
            progress(0.0, format!("Starting analysis of {} scenes", scene_data.len()));
        }

        let tracker = Arc::new(CostTracker::new());
        let analyzer = Arc::new(SceneAnalyzer {
            options: options.clone(),
            reference,
            ai: self.context.ai.clone(),
            tracker: tracker.clone(),
            studio: StudioDetector::new(),
            performer: PerformerDetector::new(),
            tags: TagDetector::new(),
            details: DetailsCleaner::new(),
            video: VideoTagDetector::new(self.context.settings.video_analysis.clone())?,
        });

        let analyzer_fn: BatchAnalyzerFn = {
            let analyzer = analyzer.clone();
            Arc::new(move |batch| {
                let analyzer = analyzer.clone();
                Box::pin(async move { analyzer.analyze_batch(batch).await })
            })
        };
        let batch_progress: Option<BatchProgressFn> = progress.clone().map(|progress| {
            Arc::new(
                move |completed: usize, total: usize, processed: usize, items: usize| {
                    let percent = (completed as f64 / total.max(1) as f64) * 100.0;
                    progress(
                        percent,
                        format!("Processed {processed}/{items} scenes ({completed}/{total} batches)"),
                    );
                },
            ) as BatchProgressFn
        });

        let started = Instant::now();
        let processor = BatchProcessor::new(options.batch_size, options.max_concurrent);
        let all_changes = processor
            .process(scene_data.clone(), analyzer_fn, batch_progress, cancellation)
            .await;
        let processing_time = started.elapsed().as_secs_f64();

        // When video detection is the only enabled pass and it failed
        // outright, surface the real cause instead of an empty plan.
        if options.only_video_tags()
            && all_changes.iter().all(|c| !c.has_changes())
            && let Some(first_error) = all_changes.iter().find_map(|c| c.error.clone())
        {
            return Err(CuratorError::Internal(format!(
                "video analysis failed: {first_error}"
            )));
        }

        let statistics = calculate_statistics(&all_changes);
        let mut metadata = json!({
            "description": format!("Analysis of {} scenes", scene_data.len()),
            "settings": {
                "detect_studios": options.detect_studios,
                "detect_performers": options.detect_performers,
                "detect_tags": options.detect_tags,
                "detect_details": options.detect_details,
                "detect_video_tags": options.detect_video_tags,
                "confidence_threshold": options.confidence_threshold,
                "batch_size": options.batch_size,
            },
            "statistics": statistics,
            "ai_model": self.context.ai.model(),
            "api_usage": tracker.summary(),
            "processing_time": (processing_time * 100.0).round() / 100.0,
        });
        if let Some(job_id) = job_id {
            metadata["job_id"] = json!(job_id.to_string());
        }

        let plan_name =
            plan_name.unwrap_or_else(|| generate_plan_name(&options, &scene_data));
        let processed_ids: Vec<SceneId> =
            all_changes.iter().map(|c| c.scene_id.clone()).collect();
        let has_changes = all_changes.iter().any(SceneChanges::has_changes);

        let plan = if has_changes {
            self.plans
                .create_plan(&plan_name, &all_changes, metadata)
                .await?
        } else {
            info!("analysis found no changes; plan is not persisted");
            AnalysisPlan::no_changes(plan_name, metadata)
        };

        self.context
            .database
            .scenes()
            .mark_analyzed(&processed_ids, options.detect_video_tags)
            .await?;

        if let Some(progress) = &progress {
            progress(100.0, "Analysis complete".to_string());
        }

        Ok(plan)
    }

    /// Snapshot detector reference data from the mirror and refresh the
    /// entity cache with it.
    async fn refresh_reference(&self) -> Result<ReferenceData> {
        let entities = self.context.database.entities();

        let studios: Vec<String> = entities
            .all_studios()
            .await?
            .into_iter()
            .map(|s| s.name)
            .collect();
        let performers: Vec<KnownPerformer> = entities
            .all_performers()
            .await?
            .into_iter()
            .map(|p| KnownPerformer::with_aliases(p.name, p.aliases))
            .collect();
        let tags: Vec<String> = entities.all_tags().await?.into_iter().map(|t| t.name).collect();

        self.context
            .cache
            .set("entities:studios:all", &studios, None);
        self.context.cache.set("entities:tags:all", &tags, None);

        Ok(ReferenceData {
            studios,
            performers,
            tags,
        })
    }
}

struct SceneAnalyzer {
    options: AnalysisOptions,
    reference: ReferenceData,
    ai: AiClient,
    tracker: Arc<CostTracker>,
    studio: StudioDetector,
    performer: PerformerDetector,
    tags: TagDetector,
    details: DetailsCleaner,
    video: VideoTagDetector,
}

impl SceneAnalyzer {
    async fn analyze_batch(self: Arc<Self>, batch: Vec<SceneData>) -> Result<Vec<SceneChanges>> {
        let mut results = Vec::with_capacity(batch.len());
        for scene in batch {
            match self.analyze_scene(&scene).await {
                Ok(changes) => results.push(SceneChanges {
                    scene_id: scene.id.clone(),
                    scene_title: scene.title.clone(),
                    scene_path: scene.file_path.clone(),
                    changes,
                    error: None,
                }),
                Err(err) if self.options.only_video_tags() => return Err(err),
                Err(err) => {
                    warn!("analysis of scene {} failed: {err}", scene.id);
                    results.push(SceneChanges::errored(&scene, err.to_string()));
                }
            }
        }
        Ok(results)
    }

    fn charge(&self, operation: AiOperation, usage: Usage) {
        let cost = self.ai.cost_for(&usage);
        self.tracker.track(operation, cost, usage, self.ai.model());
    }

    async fn analyze_scene(&self, scene: &SceneData) -> Result<Vec<ProposedChange>> {
        self.tracker.increment_scenes();
        let mut changes = Vec::new();

        if self.options.detect_studios {
            changes.extend(self.detect_studio(scene).await);
        }
        if self.options.detect_performers {
            changes.extend(self.detect_performers(scene).await);
        }
        if self.options.detect_tags {
            changes.extend(self.detect_tags(scene).await);
        }
        if self.options.detect_details {
            changes.extend(self.detect_details(scene));
        }
        if self.options.detect_video_tags {
            changes.extend(self.detect_video_tags(scene).await?);
        }

        Ok(changes)
    }

    async fn detect_studio(&self, scene: &SceneData) -> Vec<ProposedChange> {
        // A scene that already has a studio keeps it.
        if scene.studio.is_some() {
            return Vec::new();
        }

        let detection = self
            .studio
            .detect(scene, &self.reference.studios, Some(&self.ai))
            .await;

        let result = match detection {
            Ok((result, usage)) => {
                self.charge(AiOperation::StudioDetection, usage);
                result
            }
            Err(err) => {
                warn!("studio detection failed for scene {}: {err}", scene.id);
                None
            }
        };

        result
            .filter(|r| r.meets(self.options.confidence_threshold))
            .map(|r| {
                vec![ProposedChange {
                    field: ChangeField::Studio,
                    action: ChangeAction::Set,
                    current_value: Value::Null,
                    proposed_value: json!(r.value),
                    confidence: r.confidence,
                    reason: Some(format!("Detected from {}", r.source)),
                }]
            })
            .unwrap_or_default()
    }

    async fn detect_performers(&self, scene: &SceneData) -> Vec<ProposedChange> {
        let current_names: Vec<String> = scene.performer_names();
        let current_lower: Vec<String> =
            current_names.iter().map(|n| n.to_lowercase()).collect();

        let mut detections = self
            .performer
            .detect_from_path(&scene.file_path, &self.reference.performers);

        match self
            .performer
            .detect_with_ai(scene, &self.reference.performers, &self.ai)
            .await
        {
            Ok((ai_results, usage)) => {
                self.charge(AiOperation::PerformerDetection, usage);
                detections.extend(ai_results);
            }
            Err(err) => warn!("AI performer detection failed for scene {}: {err}", scene.id),
        }

        let merged = merge_detections(
            detections,
            self.options.confidence_threshold,
            |name| !current_lower.contains(&name.to_lowercase()),
        );

        merged
            .into_iter()
            .map(|result| ProposedChange {
                field: ChangeField::Performers,
                action: ChangeAction::Add,
                current_value: json!(current_names),
                proposed_value: json!(result.value),
                confidence: result.confidence,
                reason: Some(format!("Detected performer: {}", result.value)),
            })
            .collect()
    }

    async fn detect_tags(&self, scene: &SceneData) -> Vec<ProposedChange> {
        let current_names: Vec<String> = scene.tag_names();

        let mut detections = self.tags.detect_technical_tags(scene, &current_names);

        match self
            .tags
            .detect_with_ai(scene, &current_names, &self.reference.tags, &self.ai)
            .await
        {
            Ok((ai_results, usage)) => {
                self.charge(AiOperation::TagDetection, usage);
                detections.extend(ai_results);
            }
            Err(err) => warn!("AI tag detection failed for scene {}: {err}", scene.id),
        }

        // Proposals must name tags that already exist; use the mirror's
        // exact casing and drop the rest.
        let available: HashMap<String, &String> = self
            .reference
            .tags
            .iter()
            .map(|tag| (tag.to_lowercase(), tag))
            .collect();
        let current_lower: Vec<String> = current_names.iter().map(|n| n.to_lowercase()).collect();

        for detection in &mut detections {
            if let Some(exact) = available.get(&detection.value.to_lowercase()) {
                detection.value = (*exact).clone();
            }
        }

        let merged = merge_detections(detections, self.options.confidence_threshold, |name| {
            available.contains_key(&name.to_lowercase())
                && !current_lower.contains(&name.to_lowercase())
        });

        merged
            .into_iter()
            .map(|result| ProposedChange {
                field: ChangeField::Tags,
                action: ChangeAction::Add,
                current_value: json!(current_names),
                proposed_value: json!(result.value),
                confidence: result.confidence,
                reason: Some(format!("Detected tag: {}", result.value)),
            })
            .collect()
    }

    fn detect_details(&self, scene: &SceneData) -> Vec<ProposedChange> {
        self.details
            .propose(scene)
            .map(|result| {
                vec![ProposedChange {
                    field: ChangeField::Details,
                    action: ChangeAction::Set,
                    current_value: json!(scene.details),
                    proposed_value: json!(result.value),
                    confidence: result.confidence,
                    reason: Some("Removed HTML markup from details".into()),
                }]
            })
            .unwrap_or_default()
    }

    async fn detect_video_tags(&self, scene: &SceneData) -> Result<Vec<ProposedChange>> {
        let tag_names = scene.tag_names();

        match self.video.detect(scene, &tag_names, &scene.markers).await {
            Ok((video_changes, usage)) => {
                self.charge(AiOperation::VideoTagDetection, usage);
                let found = video_changes
                    .iter()
                    .any(|c| matches!(c.field, ChangeField::Tags | ChangeField::Markers));
                let mut changes = video_changes;
                changes.extend(status_tag_changes(scene, found, false));
                Ok(changes)
            }
            Err(err) if self.options.only_video_tags() => Err(err),
            Err(err) => {
                warn!("video detection failed for scene {}: {err}", scene.id);
                Ok(status_tag_changes(scene, false, true))
            }
        }
    }
}

/// Union detections keyed by lowercased value, keeping the highest
/// confidence per key, filtered by threshold and an acceptance test.
fn merge_detections<F>(
    detections: Vec<DetectionResult>,
    threshold: f64,
    accept: F,
) -> Vec<DetectionResult>
where
    F: Fn(&str) -> bool,
{
    let mut merged: HashMap<String, DetectionResult> = HashMap::new();
    for detection in detections {
        if detection.confidence < threshold || !accept(&detection.value) {
            continue;
        }
        let key = detection.value.to_lowercase();
        match merged.get(&key) {
            Some(existing) if existing.confidence >= detection.confidence => {}
            _ => {
                merged.insert(key, detection);
            }
        }
    }
    let mut results: Vec<DetectionResult> = merged.into_values().collect();
    results.sort_by(|a, b| a.value.cmp(&b.value));
    results
}

/// Keep the operator-visible workflow tags consistent with the outcome
/// of video detection.
fn status_tag_changes(scene: &SceneData, found: bool, errored: bool) -> Vec<ProposedChange> {
    let has_tagme = scene.has_tag(AI_TAGME);
    let has_tagged = scene.has_tag(AI_TAGGED);
    let has_errored = scene.has_tag(AI_ERRORED);

    let mut changes = Vec::new();

    if errored {
        if has_tagme {
            changes.push(ProposedChange {
                field: ChangeField::Tags,
                action: ChangeAction::Remove,
                current_value: json!([AI_TAGME]),
                proposed_value: Value::Null,
                confidence: 1.0,
                reason: Some("Removing AI_TagMe after failed analysis".into()),
            });
        }
        if !has_errored {
            changes.push(ProposedChange {
                field: ChangeField::Tags,
                action: ChangeAction::Add,
                current_value: Value::Null,
                proposed_value: json!([AI_ERRORED]),
                confidence: 1.0,
                reason: Some("Adding AI_Errored after failed analysis".into()),
            });
        }
    } else if found {
        if has_tagme {
            changes.push(ProposedChange {
                field: ChangeField::Tags,
                action: ChangeAction::Remove,
                current_value: json!([AI_TAGME]),
                proposed_value: Value::Null,
                confidence: 1.0,
                reason: Some("Removing AI_TagMe after successful analysis".into()),
            });
        }
        if !has_tagged {
            changes.push(ProposedChange {
                field: ChangeField::Tags,
                action: ChangeAction::Add,
                current_value: Value::Null,
                proposed_value: json!([AI_TAGGED]),
                confidence: 1.0,
                reason: Some("Adding AI_Tagged after successful analysis".into()),
            });
        }
    }

    changes
}

fn empty_statistics() -> Value {
    json!({
        "total_scenes": 0,
        "scenes_with_changes": 0,
        "scenes_with_errors": 0,
        "total_changes": 0,
        "changes_by_field": {},
        "average_confidence": 0.0,
    })
}

fn calculate_statistics(changes: &[SceneChanges]) -> Value {
    let mut scenes_with_changes = 0u64;
    let mut scenes_with_errors = 0u64;
    let mut total_changes = 0u64;
    let mut by_field: HashMap<&'static str, u64> = HashMap::new();
    let mut confidence_sum = 0.0;
    let mut confidence_count = 0u64;

    for scene in changes {
        if scene.error.is_some() {
            scenes_with_errors += 1;
        } else if scene.has_changes() {
            scenes_with_changes += 1;
        }
        for change in &scene.changes {
            total_changes += 1;
            *by_field.entry(change.field.as_str()).or_default() += 1;
            confidence_sum += change.confidence;
            confidence_count += 1;
        }
    }

    let average_confidence = if confidence_count > 0 {
        confidence_sum / confidence_count as f64
    } else {
        0.0
    };

    json!({
        "total_scenes": changes.len(),
        "scenes_with_changes": scenes_with_changes,
        "scenes_with_errors": scenes_with_errors,
        "total_changes": total_changes,
        "changes_by_field": by_field,
        "average_confidence": average_confidence,
    })
}

fn generate_plan_name(options: &AnalysisOptions, scenes: &[SceneData]) -> String {
    let labels = options.enabled_labels();
    let kind = if labels.is_empty() {
        "Analysis".to_string()
    } else {
        format!("{} Analysis", labels.join(" & "))
    };

    let mut studios: Vec<&str> = scenes
        .iter()
        .filter_map(|s| s.studio.as_ref().map(|st| st.name.as_str()))
        .collect();
    studios.sort_unstable();
    studios.dedup();

    let timestamp = chrono::Utc::now().format("%Y-%m-%d %H:%M");
    match studios.as_slice() {
        [only] => format!("{only} - {kind} - {} scenes - {timestamp}", scenes.len()),
        _ => format!("{kind} - {} scenes - {timestamp}", scenes.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use curator_model::{DetectionSource, EntityRef};

    fn change(field: ChangeField, confidence: f64) -> ProposedChange {
        ProposedChange {
            field,
            action: ChangeAction::Add,
            current_value: Value::Null,
            proposed_value: json!("x"),
            confidence,
            reason: None,
        }
    }

    #[test]
    fn statistics_count_fields_errors_and_confidence() {
        let changes = vec![
            SceneChanges {
                scene_id: "1".into(),
                scene_title: String::new(),
                scene_path: String::new(),
                changes: vec![change(ChangeField::Tags, 0.8), change(ChangeField::Studio, 1.0)],
                error: None,
            },
            SceneChanges {
                scene_id: "2".into(),
                scene_title: String::new(),
                scene_path: String::new(),
                changes: vec![],
                error: Some("boom".into()),
            },
        ];

        let stats = calculate_statistics(&changes);
        assert_eq!(stats["total_scenes"], 2);
        assert_eq!(stats["scenes_with_changes"], 1);
        assert_eq!(stats["scenes_with_errors"], 1);
        assert_eq!(stats["total_changes"], 2);
        assert_eq!(stats["changes_by_field"]["tags"], 1);
        assert_eq!(stats["changes_by_field"]["studio"], 1);
        assert!((stats["average_confidence"].as_f64().unwrap() - 0.9).abs() < 1e-9);
    }

    #[test]
    fn merge_keeps_max_confidence_per_name() {
        let detections = vec![
            DetectionResult::new("Jane Doe", 0.7, DetectionSource::Path),
            DetectionResult::new("jane doe", 0.9, DetectionSource::Ai),
            DetectionResult::new("Low", 0.2, DetectionSource::Path),
        ];
        let merged = merge_detections(detections, 0.6, |_| true);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].confidence, 0.9);
    }

    #[test]
    fn status_tags_flip_tagme_to_tagged_on_success() {
        let scene = SceneData {
            id: "1".into(),
            tags: vec![EntityRef::new("1", AI_TAGME)],
            ..SceneData::default()
        };
        let changes = status_tag_changes(&scene, true, false);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].action, ChangeAction::Remove);
        assert_eq!(changes[0].current_value, json!([AI_TAGME]));
        assert_eq!(changes[1].action, ChangeAction::Add);
        assert_eq!(changes[1].proposed_value, json!([AI_TAGGED]));
    }

    #[test]
    fn status_tags_mark_errored_on_failure() {
        let scene = SceneData {
            id: "1".into(),
            ..SceneData::default()
        };
        let changes = status_tag_changes(&scene, false, true);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].proposed_value, json!([AI_ERRORED]));
    }

    #[test]
    fn no_detection_and_no_error_leaves_status_untouched() {
        let scene = SceneData {
            id: "1".into(),
            tags: vec![EntityRef::new("1", AI_TAGME)],
            ..SceneData::default()
        };
        assert!(status_tag_changes(&scene, false, false).is_empty());
    }

    #[test]
    fn only_video_predicate() {
        let mut options = AnalysisOptions {
            detect_video_tags: true,
            ..AnalysisOptions::default()
        };
        assert!(options.only_video_tags());
        options.detect_tags = true;
        assert!(!options.only_video_tags());
    }

    #[test]
    fn plan_name_mentions_unique_studio() {
        let options = AnalysisOptions {
            detect_tags: true,
            ..AnalysisOptions::default()
        };
        let scenes = vec![SceneData {
            id: "1".into(),
            studio: Some(EntityRef::new("9", "Example Studio")),
            ..SceneData::default()
        }];
        let name = generate_plan_name(&options, &scenes);
        assert!(name.starts_with("Example Studio - Tag Analysis - 1 scenes"));
    }
}

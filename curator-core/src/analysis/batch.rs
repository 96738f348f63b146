//! Batched, concurrency-capped scene processing.
//!
//! Scenes are chunked into contiguous batches; at most `max_concurrent`
//! batches run at once behind a semaphore. A failing batch never aborts
//! the run: its scenes come back as synthetic error results. The
//! cancellation token is checked before each new batch is scheduled;
//! in-flight batches are left to finish.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use curator_model::{SceneChanges, SceneData};

use crate::error::Result;

pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_MAX_CONCURRENT: usize = 3;

const BATCH_SIZE_RANGE: (usize, usize) = (1, 100);
const CONCURRENCY_RANGE: (usize, usize) = (1, 10);

pub type BatchFuture = Pin<Box<dyn Future<Output = Result<Vec<SceneChanges>>> + Send>>;
pub type BatchAnalyzerFn = Arc<dyn Fn(Vec<SceneData>) -> BatchFuture + Send + Sync>;
/// `(completed_batches, total_batches, processed_items, total_items)`
pub type BatchProgressFn = Arc<dyn Fn(usize, usize, usize, usize) + Send + Sync>;

#[derive(Clone, Debug)]
pub struct BatchProcessor {
    batch_size: usize,
    max_concurrent: usize,
}

impl Default for BatchProcessor {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE, DEFAULT_MAX_CONCURRENT)
    }
}

impl BatchProcessor {
    /// Knobs are hard-clamped: batch size to [1, 100], concurrency to
    /// [1, 10].
    pub fn new(batch_size: usize, max_concurrent: usize) -> Self {
        Self {
            batch_size: batch_size.clamp(BATCH_SIZE_RANGE.0, BATCH_SIZE_RANGE.1),
            max_concurrent: max_concurrent.clamp(CONCURRENCY_RANGE.0, CONCURRENCY_RANGE.1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub async fn process(
        &self,
        scenes: Vec<SceneData>,
        analyzer: BatchAnalyzerFn,
        progress: Option<BatchProgressFn>,
        cancellation: CancellationToken,
    ) -> Vec<SceneChanges> {
        if scenes.is_empty() {
            return Vec::new();
        }

        let total_items = scenes.len();
        let batches: Vec<Vec<SceneData>> = scenes
            .chunks(self.batch_size)
            .map(|chunk| chunk.to_vec())
            .collect();
        let total_batches = batches.len();

        info!("processing {total_items} scenes in {total_batches} batches");

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks: JoinSet<Vec<SceneChanges>> = JoinSet::new();

        for (batch_idx, batch) in batches.into_iter().enumerate() {
            if cancellation.is_cancelled() {
                info!("cancellation requested; stopping after {batch_idx} scheduled batches");
                break;
            }

            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };

            if cancellation.is_cancelled() {
                info!("cancellation requested; stopping after {batch_idx} scheduled batches");
                break;
            }

            let analyzer = analyzer.clone();
            tasks.spawn(async move {
                let _permit = permit;
                debug!("processing batch {} ({} scenes)", batch_idx + 1, batch.len());
                match analyzer(batch.clone()).await {
                    Ok(results) => results,
                    Err(err) => {
                        error!("batch {} failed: {err}", batch_idx + 1);
                        batch
                            .iter()
                            .map(|scene| SceneChanges::errored(scene, err.to_string()))
                            .collect()
                    }
                }
            });
        }

        let mut results: Vec<SceneChanges> = Vec::with_capacity(total_items);
        let mut completed = 0;

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(batch_results) => results.extend(batch_results),
                Err(err) => error!("batch task failed to join: {err}"),
            }
            completed += 1;
            if let Some(progress) = &progress {
                progress(completed, total_batches, results.len(), total_items);
            }
        }

        info!("completed processing {} scenes", results.len());
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use curator_model::{ChangeAction, ChangeField, ProposedChange, SceneId};
    use serde_json::{Value, json};
    use std::collections::BTreeSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn scenes(n: usize) -> Vec<SceneData> {
        (0..n)
            .map(|i| SceneData {
                id: SceneId::new(i.to_string()),
                title: format!("scene {i}"),
                ..SceneData::default()
            })
            .collect()
    }

    fn tagging_analyzer() -> BatchAnalyzerFn {
        Arc::new(|batch: Vec<SceneData>| {
            Box::pin(async move {
                Ok(batch
                    .iter()
                    .map(|scene| SceneChanges {
                        scene_id: scene.id.clone(),
                        scene_title: scene.title.clone(),
                        scene_path: scene.file_path.clone(),
                        changes: vec![ProposedChange {
                            field: ChangeField::Tags,
                            action: ChangeAction::Add,
                            current_value: Value::Null,
                            proposed_value: json!("HD"),
                            confidence: 0.9,
                            reason: None,
                        }],
                        error: None,
                    })
                    .collect())
            }) as BatchFuture
        })
    }

    #[tokio::test]
    async fn all_scenes_processed_once() {
        let processor = BatchProcessor::new(4, 2);
        let results = processor
            .process(scenes(11), tagging_analyzer(), None, CancellationToken::new())
            .await;

        let ids: BTreeSet<String> = results.iter().map(|r| r.scene_id.to_string()).collect();
        assert_eq!(results.len(), 11);
        assert_eq!(ids.len(), 11);
    }

    #[tokio::test]
    async fn minimal_knobs_produce_same_aggregate_result() {
        let defaults = BatchProcessor::default()
            .process(scenes(7), tagging_analyzer(), None, CancellationToken::new())
            .await;
        let serial = BatchProcessor::new(1, 1)
            .process(scenes(7), tagging_analyzer(), None, CancellationToken::new())
            .await;

        let key = |results: &[SceneChanges]| -> BTreeSet<(String, usize)> {
            results
                .iter()
                .map(|r| (r.scene_id.to_string(), r.changes.len()))
                .collect()
        };
        assert_eq!(key(&defaults), key(&serial));
    }

    #[tokio::test]
    async fn knobs_are_clamped() {
        let processor = BatchProcessor::new(0, 99);
        assert_eq!(processor.batch_size(), 1);
        assert_eq!(processor.max_concurrent(), 10);
    }

    #[tokio::test]
    async fn failing_batch_yields_synthetic_errors() {
        let analyzer: BatchAnalyzerFn = Arc::new(|batch: Vec<SceneData>| {
            Box::pin(async move {
                if batch.iter().any(|s| s.id.as_str() == "0") {
                    Err(crate::error::CuratorError::Internal("boom".into()))
                } else {
                    Ok(batch
                        .iter()
                        .map(|scene| SceneChanges {
                            scene_id: scene.id.clone(),
                            scene_title: scene.title.clone(),
                            scene_path: String::new(),
                            changes: vec![],
                            error: None,
                        })
                        .collect())
                }
            }) as BatchFuture
        });

        let results = BatchProcessor::new(2, 2)
            .process(scenes(4), analyzer, None, CancellationToken::new())
            .await;

        assert_eq!(results.len(), 4);
        let errored: Vec<&SceneChanges> = results.iter().filter(|r| r.error.is_some()).collect();
        assert_eq!(errored.len(), 2);
        assert!(errored[0].error.as_deref().unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn cancellation_stops_scheduling_new_batches() {
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let analyzer: BatchAnalyzerFn = {
            let token = token.clone();
            let calls = calls.clone();
            Arc::new(move |batch: Vec<SceneData>| {
                let token = token.clone();
                let calls = calls.clone();
                Box::pin(async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    // First batch trips the token while "in flight".
                    token.cancel();
                    Ok(batch
                        .iter()
                        .map(|scene| SceneChanges {
                            scene_id: scene.id.clone(),
                            scene_title: scene.title.clone(),
                            scene_path: String::new(),
                            changes: vec![],
                            error: None,
                        })
                        .collect())
                }) as BatchFuture
            })
        };

        let results = BatchProcessor::new(1, 1)
            .process(scenes(10), analyzer, None, token)
            .await;

        // In-flight batches finish; the rest are never scheduled.
        assert!(calls.load(Ordering::SeqCst) < 10);
        assert!(results.len() < 10);
        assert!(!results.is_empty());
    }

    #[tokio::test]
    async fn progress_fires_once_per_completed_batch() {
        let observed: Arc<Mutex<Vec<(usize, usize, usize, usize)>>> =
            Arc::new(Mutex::new(Vec::new()));
        let sink = observed.clone();
        let progress: BatchProgressFn = Arc::new(move |completed, total, processed, items| {
            sink.lock().unwrap().push((completed, total, processed, items));
        });

        BatchProcessor::new(5, 2)
            .process(
                scenes(12),
                tagging_analyzer(),
                Some(progress),
                CancellationToken::new(),
            )
            .await;

        let observed = observed.lock().unwrap();
        assert_eq!(observed.len(), 3);
        assert_eq!(observed.last().copied(), Some((3, 3, 12, 12)));
    }
}

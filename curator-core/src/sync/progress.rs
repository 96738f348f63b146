//! Progress tracking for sync runs.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::json;

use curator_model::SyncResult;

use crate::jobs::progress::{ProgressBus, ProgressEvent, ProgressSnapshot};

const UPDATE_INTERVAL: Duration = Duration::from_secs(1);

/// Tracks processed counts for one run and publishes throttled progress
/// events on the bus.
#[derive(Debug)]
pub struct SyncProgress {
    job_id: Option<String>,
    total: u64,
    state: Mutex<ProgressState>,
    bus: Option<ProgressBus>,
}

#[derive(Debug)]
struct ProgressState {
    processed: u64,
    errors: u64,
    started: Instant,
    last_emit: Option<Instant>,
}

impl SyncProgress {
    pub fn new(job_id: Option<String>, total: u64, bus: Option<ProgressBus>) -> Self {
        Self {
            job_id,
            total,
            state: Mutex::new(ProgressState {
                processed: 0,
                errors: 0,
                started: Instant::now(),
                last_emit: None,
            }),
            bus,
        }
    }

    fn snapshot(&self, state: &ProgressState) -> ProgressSnapshot {
        let elapsed = state.started.elapsed().as_secs_f64();
        let percentage = if self.total == 0 {
            100.0
        } else {
            (state.processed as f64 / self.total as f64 * 100.0).min(100.0)
        };
        let estimated_remaining = if state.processed > 0 && elapsed > 0.0 {
            let rate = state.processed as f64 / elapsed;
            Some((self.total.saturating_sub(state.processed)) as f64 / rate)
        } else {
            None
        };
        ProgressSnapshot {
            processed: state.processed,
            total: self.total,
            percentage,
            elapsed_seconds: elapsed,
            estimated_remaining_seconds: estimated_remaining,
            errors: state.errors,
        }
    }

    /// Record progress. Events are throttled to one per second unless
    /// `force` is set.
    pub fn update(&self, processed: u64, errored: bool, force: bool) {
        let snapshot = {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            state.processed = processed;
            if errored {
                state.errors += 1;
            }

            let now = Instant::now();
            let due = state
                .last_emit
                .map(|last| now.duration_since(last) >= UPDATE_INTERVAL)
                .unwrap_or(true);
            if !force && !due {
                return;
            }
            state.last_emit = Some(now);
            self.snapshot(&state)
        };

        if let Some(bus) = &self.bus {
            bus.publish(ProgressEvent::SyncProgress {
                job_id: self.job_id.clone(),
                progress: snapshot,
            });
        }
    }

    /// Entity-level detail event, always emitted.
    pub fn detail(&self, entity_type: &str, entity_id: &str, action: &str) {
        let snapshot = {
            let Ok(state) = self.state.lock() else {
                return;
            };
            self.snapshot(&state)
        };
        if let Some(bus) = &self.bus {
            bus.publish(ProgressEvent::SyncDetail {
                job_id: self.job_id.clone(),
                detail: json!({
                    "entity_type": entity_type,
                    "entity_id": entity_id,
                    "action": action,
                }),
                progress: snapshot,
            });
        }
    }

    /// Final event with the run's outcome.
    pub fn complete(&self, result: &SyncResult) {
        if let Some(bus) = &self.bus {
            let errors: Vec<_> = result
                .errors
                .iter()
                .take(10)
                .map(|e| {
                    json!({
                        "entity_type": e.entity_type,
                        "entity_id": e.entity_id,
                        "error": e.message,
                    })
                })
                .collect();
            bus.publish(ProgressEvent::SyncComplete {
                job_id: self.job_id.clone(),
                result: json!({
                    "status": result.status.as_str(),
                    "total_items": result.total_items,
                    "processed_items": result.processed_items,
                    "created_items": result.created_items,
                    "updated_items": result.updated_items,
                    "skipped_items": result.skipped_items,
                    "failed_items": result.failed_items,
                    "duration_seconds": result.duration_seconds(),
                    "success_rate": result.success_rate(),
                    "errors": errors,
                }),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn updates_are_throttled_unless_forced() {
        let bus = ProgressBus::new();
        let mut receiver = bus.subscribe();
        let progress = SyncProgress::new(Some("j1".into()), 100, Some(bus));

        progress.update(1, false, false);
        progress.update(2, false, false); // throttled
        progress.update(3, false, true); // forced

        let mut seen = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            if let ProgressEvent::SyncProgress { progress, .. } = event {
                seen.push(progress.processed);
            }
        }
        assert_eq!(seen, vec![1, 3]);
    }

    #[tokio::test]
    async fn completion_event_carries_the_outcome() {
        let bus = ProgressBus::new();
        let mut receiver = bus.subscribe();
        let progress = SyncProgress::new(None, 10, Some(bus));

        let mut result = SyncResult::started(None);
        result.total_items = 10;
        result.processed_items = 10;
        result.complete(None);
        progress.complete(&result);

        match receiver.try_recv().unwrap() {
            ProgressEvent::SyncComplete { result, .. } => {
                assert_eq!(result["status"], "success");
                assert_eq!(result["processed_items"], 10);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn empty_run_reports_full_percentage() {
        let progress = SyncProgress::new(None, 0, None);
        let state = progress.state.lock().unwrap();
        assert_eq!(progress.snapshot(&state).percentage, 100.0);
    }
}

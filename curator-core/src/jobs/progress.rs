//! Publish/subscribe fan-out for progress events.
//!
//! A lossy broadcast channel: listeners that fall behind drop events
//! rather than exerting backpressure on the engines.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::trace;

/// Counters attached to sync progress events.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub processed: u64,
    pub total: u64,
    pub percentage: f64,
    pub elapsed_seconds: f64,
    pub estimated_remaining_seconds: Option<f64>,
    pub errors: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    SyncProgress {
        job_id: Option<String>,
        progress: ProgressSnapshot,
    },
    SyncDetail {
        job_id: Option<String>,
        detail: Value,
        progress: ProgressSnapshot,
    },
    SyncComplete {
        job_id: Option<String>,
        result: Value,
    },
    /// Generic lifecycle/progress event for non-sync jobs.
    JobProgress {
        job_id: String,
        status: String,
        progress: f64,
        message: Option<String>,
    },
}

const CHANNEL_CAPACITY: usize = 256;

#[derive(Clone, Debug)]
pub struct ProgressBus {
    sender: broadcast::Sender<ProgressEvent>,
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Publish to whoever is listening; no listeners is not an error.
    pub fn publish(&self, event: ProgressEvent) {
        trace!("progress event: {event:?}");
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_reach_subscribers() {
        let bus = ProgressBus::new();
        let mut receiver = bus.subscribe();

        bus.publish(ProgressEvent::SyncProgress {
            job_id: Some("j1".into()),
            progress: ProgressSnapshot {
                processed: 5,
                total: 10,
                percentage: 50.0,
                ..ProgressSnapshot::default()
            },
        });

        match receiver.recv().await.unwrap() {
            ProgressEvent::SyncProgress { job_id, progress } => {
                assert_eq!(job_id.as_deref(), Some("j1"));
                assert_eq!(progress.processed, 5);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn publishing_without_listeners_is_fine() {
        let bus = ProgressBus::new();
        bus.publish(ProgressEvent::SyncComplete {
            job_id: None,
            result: serde_json::json!({"status": "success"}),
        });
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn events_serialize_with_snake_case_type_tags() {
        let event = ProgressEvent::SyncComplete {
            job_id: Some("j".into()),
            result: Value::Null,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "sync_complete");
    }
}

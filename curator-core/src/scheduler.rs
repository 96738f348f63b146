//! Cron- and interval-triggered maintenance: full sync, incremental
//! sync, and stale-job cleanup.
//!
//! Each fire creates a job through the [`JobManager`] so scheduled and
//! operator-triggered runs share one lifecycle. Late fires within the
//! grace window still execute; anything later is dropped and the loop
//! waits for the next occurrence.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use cron::Schedule;
use serde_json::json;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use curator_model::JobType;

use crate::context::AppContext;
use crate::error::{CuratorError, Result};
use crate::jobs::JobManager;
use crate::sync::SyncEngine;

/// How late a cron fire may be and still run.
fn full_sync_grace() -> ChronoDuration {
    ChronoDuration::hours(1)
}

fn incremental_grace() -> ChronoDuration {
    ChronoDuration::minutes(5)
}

/// Stale-job thresholds for the cleanup pass.
fn stale_running_after() -> ChronoDuration {
    ChronoDuration::minutes(60)
}

fn stale_pending_after() -> ChronoDuration {
    ChronoDuration::hours(24)
}

const MIN_INTERVAL_MINUTES: u64 = 5;

pub struct Scheduler {
    shutdown: CancellationToken,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler").finish()
    }
}

impl Scheduler {
    /// Parse the schedules and spawn the timer loops. Fails fast on an
    /// invalid cron expression or an interval below the minimum.
    pub fn start(
        context: Arc<AppContext>,
        jobs: Arc<JobManager>,
        force_full_sync: bool,
    ) -> Result<Self> {
        let settings = &context.settings.sync;

        let schedule = Schedule::from_str(&normalize_cron(&settings.full_sync_cron))
            .map_err(|e| {
                CuratorError::Config(format!(
                    "invalid full sync cron '{}': {e}",
                    settings.full_sync_cron
                ))
            })?;

        if settings.incremental_interval_mins < MIN_INTERVAL_MINUTES {
            return Err(CuratorError::Config(format!(
                "incremental interval must be at least {MIN_INTERVAL_MINUTES} minutes"
            )));
        }
        if settings.cleanup_interval_mins < MIN_INTERVAL_MINUTES {
            return Err(CuratorError::Config(format!(
                "cleanup interval must be at least {MIN_INTERVAL_MINUTES} minutes"
            )));
        }

        let shutdown = CancellationToken::new();

        tokio::spawn(full_sync_loop(
            context.clone(),
            jobs.clone(),
            schedule,
            force_full_sync,
            shutdown.clone(),
        ));
        tokio::spawn(incremental_loop(
            context.clone(),
            jobs.clone(),
            settings.incremental_interval_mins,
            shutdown.clone(),
        ));
        let cleanup_interval_mins = settings.cleanup_interval_mins;
        tokio::spawn(cleanup_loop(
            context,
            jobs,
            cleanup_interval_mins,
            shutdown.clone(),
        ));

        info!("scheduler started");
        Ok(Self { shutdown })
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
        info!("scheduler stopping");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// The `cron` crate expects a seconds field; operator config uses the
/// traditional five-field form.
fn normalize_cron(expression: &str) -> String {
    let fields = expression.split_whitespace().count();
    if fields == 5 {
        format!("0 {expression}")
    } else {
        expression.to_string()
    }
}

/// Whether a fire scheduled for `fire_at` should still run at `now`.
fn within_grace(fire_at: DateTime<Utc>, now: DateTime<Utc>, grace: ChronoDuration) -> bool {
    now - fire_at <= grace
}

async fn full_sync_loop(
    context: Arc<AppContext>,
    jobs: Arc<JobManager>,
    schedule: Schedule,
    force: bool,
    shutdown: CancellationToken,
) {
    loop {
        let Some(fire_at) = schedule.upcoming(Utc).next() else {
            warn!("full sync schedule yields no future occurrences");
            return;
        };
        let wait = (fire_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);

        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(wait) => {}
        }

        let now = Utc::now();
        if !within_grace(fire_at, now, full_sync_grace()) {
            warn!("full sync fire at {fire_at} missed its grace window; skipping");
            continue;
        }

        let ctx = context.clone();
        let bus = jobs.bus().clone();
        let submitted = jobs
            .submit(
                JobType::FullSync,
                json!({ "force": force, "scheduled": true }),
                Box::new(move |handle| {
                    Box::pin(async move {
                        let engine = SyncEngine::new(ctx)?.with_bus(bus);
                        let result = engine
                            .sync_full(
                                Some(handle.job_id.to_string()),
                                force,
                                handle.cancellation.clone(),
                            )
                            .await?;
                        Ok(serde_json::to_value(&result)?)
                    })
                }),
            )
            .await;

        if let Err(err) = submitted {
            warn!("scheduled full sync failed to enqueue: {err}");
        }
    }
}

async fn incremental_loop(
    context: Arc<AppContext>,
    jobs: Arc<JobManager>,
    interval_minutes: u64,
    shutdown: CancellationToken,
) {
    let period = Duration::from_secs(interval_minutes * 60);
    let mut next_fire = Utc::now() + ChronoDuration::seconds(period.as_secs() as i64);

    loop {
        let wait = (next_fire - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(wait) => {}
        }

        let now = Utc::now();
        let fire_at = next_fire;
        next_fire = now + ChronoDuration::seconds(period.as_secs() as i64);

        if !within_grace(fire_at, now, incremental_grace()) {
            warn!("incremental sync fire at {fire_at} missed its grace window; skipping");
            continue;
        }

        let ctx = context.clone();
        let bus = jobs.bus().clone();
        let submitted = jobs
            .submit(
                JobType::IncrementalSync,
                json!({ "scheduled": true }),
                Box::new(move |handle| {
                    Box::pin(async move {
                        let engine = SyncEngine::new(ctx)?.with_bus(bus);
                        let result = engine
                            .sync_incremental(
                                Some(handle.job_id.to_string()),
                                handle.cancellation.clone(),
                            )
                            .await?;
                        Ok(serde_json::to_value(&result)?)
                    })
                }),
            )
            .await;

        if let Err(err) = submitted {
            warn!("scheduled incremental sync failed to enqueue: {err}");
        }
    }
}

async fn cleanup_loop(
    context: Arc<AppContext>,
    jobs: Arc<JobManager>,
    interval_minutes: u64,
    shutdown: CancellationToken,
) {
    let period = Duration::from_secs(interval_minutes * 60);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(period) => {}
        }

        let ctx = context.clone();
        let submitted = jobs
            .submit(
                JobType::Cleanup,
                json!({ "scheduled": true }),
                Box::new(move |_handle| {
                    Box::pin(async move {
                        let repo = ctx.database.jobs();
                        let now = Utc::now();
                        let reaped = repo
                            .fail_stale_running(now - stale_running_after())
                            .await?;
                        let expired = repo
                            .cancel_stale_pending(now - stale_pending_after())
                            .await?;
                        if reaped + expired > 0 {
                            info!("cleanup reaped {reaped} stale and {expired} expired jobs");
                        }
                        Ok(json!({ "stale_failed": reaped, "pending_cancelled": expired }))
                    })
                }),
            )
            .await;

        if let Err(err) = submitted {
            warn!("scheduled cleanup failed to enqueue: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_field_cron_gains_a_seconds_field() {
        assert_eq!(normalize_cron("0 2 * * *"), "0 0 2 * * *");
        assert_eq!(normalize_cron("0 0 2 * * *"), "0 0 2 * * *");
    }

    #[test]
    fn normalized_schedules_parse() {
        assert!(Schedule::from_str(&normalize_cron("0 2 * * *")).is_ok());
        assert!(Schedule::from_str(&normalize_cron("*/15 * * * *")).is_ok());
        assert!(Schedule::from_str(&normalize_cron("not a cron")).is_err());
    }

    #[test]
    fn grace_window_boundaries() {
        let fire = Utc::now();
        assert!(within_grace(fire, fire + ChronoDuration::minutes(30), full_sync_grace()));
        assert!(!within_grace(fire, fire + ChronoDuration::minutes(90), full_sync_grace()));
        assert!(within_grace(fire, fire + ChronoDuration::minutes(4), incremental_grace()));
        assert!(!within_grace(fire, fire + ChronoDuration::minutes(6), incremental_grace()));
    }
}

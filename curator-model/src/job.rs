//! Job lifecycle records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::JobId;

/// Kinds of long-running work the job layer manages.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    FullSync,
    IncrementalSync,
    SceneSync,
    Analysis,
    VideoAnalysis,
    ApplyPlan,
    Cleanup,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::FullSync => "full_sync",
            JobType::IncrementalSync => "incremental_sync",
            JobType::SceneSync => "scene_sync",
            JobType::Analysis => "analysis",
            JobType::VideoAnalysis => "video_analysis",
            JobType::ApplyPlan => "apply_plan",
            JobType::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full_sync" => Ok(JobType::FullSync),
            "incremental_sync" => Ok(JobType::IncrementalSync),
            "scene_sync" => Ok(JobType::SceneSync),
            "analysis" => Ok(JobType::Analysis),
            "video_analysis" => Ok(JobType::VideoAnalysis),
            "apply_plan" => Ok(JobType::ApplyPlan),
            "cleanup" => Ok(JobType::Cleanup),
            other => Err(format!("unrecognized job type: {other}")),
        }
    }
}

/// Job states. `Completed`, `Failed` and `Cancelled` are terminal and set
/// `completed_at`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(JobStatus::Pending),
            "RUNNING" => Ok(JobStatus::Running),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            "CANCELLED" => Ok(JobStatus::Cancelled),
            other => Err(format!("unrecognized job status: {other}")),
        }
    }
}

/// One long-running operation with uniform lifecycle and progress.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub job_type: JobType,
    pub status: JobStatus,
    pub metadata: Value,
    /// Percent complete, 0-100.
    pub progress: f64,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Last time progress was written; drives stale-job detection.
    pub updated_at: DateTime<Utc>,
    pub result: Option<Value>,
}

impl Job {
    pub fn new(job_type: JobType, metadata: Value) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            job_type,
            status: JobStatus::Pending,
            metadata,
            progress: 0.0,
            message: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
            result: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn job_type_round_trips() {
        for ty in [
            JobType::FullSync,
            JobType::IncrementalSync,
            JobType::SceneSync,
            JobType::Analysis,
            JobType::VideoAnalysis,
            JobType::ApplyPlan,
            JobType::Cleanup,
        ] {
            assert_eq!(ty.as_str().parse::<JobType>().unwrap(), ty);
        }
    }
}

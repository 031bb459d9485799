//! Job tracking for background ingestion runs.
//!
//! This module provides a simple in-memory job tracker that stores progress logs
//! for ingestion jobs so the admin UI can follow them over SSE. Finished jobs
//! are kept for [`JOB_RETENTION_HOURS`] and pruned when new jobs are created.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

pub const JOB_RETENTION_HOURS: i64 = 24;

/// A single log entry with timestamp and message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    /// `[HH:MM:SS] LEVEL message`
    pub fn render(&self) -> String {
        format!(
            "[{}] {} {}",
            self.timestamp.format("%H:%M:%S"),
            self.level.as_str(),
            self.message
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Success => "OK",
            LogLevel::Warning => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

/// Job status enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
}

/// Job metadata and logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    /// What the job does, e.g. `ingest_abhs`.
    pub label: String,
    pub status: JobStatus,
    pub logs: Vec<LogEntry>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Result of the job (record counts, ingestion id).
    pub result: Option<serde_json::Value>,
}

/// In-memory job tracker.
#[derive(Clone)]
pub struct JobTracker {
    jobs: Arc<RwLock<HashMap<String, Job>>>,
}

impl JobTracker {
    /// Create a new job tracker.
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Create a new job and return its ID.
    pub fn create_job(&self, label: impl Into<String>) -> String {
        self.prune_finished(Utc::now() - Duration::hours(JOB_RETENTION_HOURS));

        let job_id = Uuid::new_v4().to_string();
        let job = Job {
            job_id: job_id.clone(),
            label: label.into(),
            status: JobStatus::Running,
            logs: vec![],
            created_at: Utc::now(),
            completed_at: None,
            result: None,
        };
        self.jobs.write().insert(job_id.clone(), job);
        job_id
    }

    /// Add a log entry to a job.
    pub fn log(&self, job_id: &str, level: LogLevel, message: impl Into<String>) {
        let mut jobs = self.jobs.write();
        if let Some(job) = jobs.get_mut(job_id) {
            job.logs.push(LogEntry {
                timestamp: Utc::now(),
                level,
                message: message.into(),
            });
        }
    }

    /// Mark a job as completed with optional result.
    pub fn complete_job(&self, job_id: &str, result: Option<serde_json::Value>) {
        let mut jobs = self.jobs.write();
        if let Some(job) = jobs.get_mut(job_id) {
            job.status = JobStatus::Completed;
            job.completed_at = Some(Utc::now());
            job.result = result;
        }
    }

    /// Mark a job as failed.
    pub fn fail_job(&self, job_id: &str, error_message: impl Into<String>) {
        let mut jobs = self.jobs.write();
        if let Some(job) = jobs.get_mut(job_id) {
            job.status = JobStatus::Failed;
            job.completed_at = Some(Utc::now());
            job.logs.push(LogEntry {
                timestamp: Utc::now(),
                level: LogLevel::Error,
                message: error_message.into(),
            });
        }
    }

    /// Get a job by ID.
    pub fn get_job(&self, job_id: &str) -> Option<Job> {
        self.jobs.read().get(job_id).cloned()
    }

    /// Logs recorded after the first `offset` entries.
    pub fn logs_since(&self, job_id: &str, offset: usize) -> Vec<LogEntry> {
        self.jobs
            .read()
            .get(job_id)
            .map(|job| job.logs.iter().skip(offset).cloned().collect())
            .unwrap_or_default()
    }

    /// All logs of a job as newline separated text.
    pub fn log_text(&self, job_id: &str) -> String {
        self.logs_since(job_id, 0)
            .iter()
            .map(LogEntry::render)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Drop finished jobs completed before `cutoff`. Running jobs are kept.
    pub fn prune_finished(&self, cutoff: DateTime<Utc>) -> usize {
        let mut jobs = self.jobs.write();
        let before = jobs.len();
        jobs.retain(|_, job| match job.completed_at {
            Some(done) => done >= cutoff,
            None => true,
        });
        before - jobs.len()
    }
}

impl Default for JobTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_lifecycle() {
        let tracker = JobTracker::new();
        let id = tracker.create_job("ingest_pluie");
        tracker.log(&id, LogLevel::Info, "Reading file");
        tracker.log(&id, LogLevel::Success, "Imported 12 points");
        tracker.complete_job(&id, Some(serde_json::json!({ "records": 12 })));

        let job = tracker.get_job(&id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.label, "ingest_pluie");
        assert_eq!(job.result.unwrap()["records"], 12);
        assert_eq!(tracker.logs_since(&id, 1).len(), 1);
        assert!(tracker.log_text(&id).ends_with("OK Imported 12 points"));
    }

    #[test]
    fn test_failed_job_records_error() {
        let tracker = JobTracker::new();
        let id = tracker.create_job("ingest_abhs");
        tracker.fail_job(&id, "Sheet unreadable");
        let job = tracker.get_job(&id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.logs[0].level, LogLevel::Error);
    }

    #[test]
    fn test_unknown_job_is_silent() {
        let tracker = JobTracker::new();
        tracker.log("missing", LogLevel::Info, "ignored");
        assert!(tracker.get_job("missing").is_none());
        assert!(tracker.logs_since("missing", 0).is_empty());
    }

    #[test]
    fn test_prune_keeps_running_jobs() {
        let tracker = JobTracker::new();
        let running = tracker.create_job("a");
        let done = tracker.create_job("b");
        tracker.complete_job(&done, None);

        let removed = tracker.prune_finished(Utc::now() + Duration::seconds(1));
        assert_eq!(removed, 1);
        assert!(tracker.get_job(&running).is_some());
        assert!(tracker.get_job(&done).is_none());
    }
}

//! Job lifecycle: state machine, persistent queue, and the background
//! worker that drains it.
//!
//! Status transitions are monotonic:
//!
//! ```text
//! PENDING -> RUNNING -> COMPLETED | FAILED
//! PENDING | RUNNING -> CANCELLED
//! ```
//!
//! Terminal states never change again. Throttling is an advisory flag
//! next to the status, not a status of its own: a throttled job stays
//! PENDING and merely becomes invisible to the worker's poll.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::extract::EngineChoice;
use crate::format::OutputFormat;

pub mod id;
pub mod queue;
pub mod worker;

pub use queue::{JobQueue, QueueError};
pub use worker::{JobWorker, WorkerHandle};

/// Lifecycle status of a conversion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
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

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(JobStatus::Pending),
            "RUNNING" => Some(JobStatus::Running),
            "COMPLETED" => Some(JobStatus::Completed),
            "FAILED" => Some(JobStatus::Failed),
            "CANCELLED" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    /// Terminal statuses admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-job conversion options, stored as JSON alongside the job row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct JobOptions {
    pub output_format: OutputFormat,
    pub engine: EngineChoice,
    pub include_metadata: bool,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            output_format: OutputFormat::Markdown,
            engine: EngineChoice::Auto,
            include_metadata: true,
        }
    }
}

/// A conversion job as seen by callers.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub job_id: String,
    pub owner_id: String,
    pub source_path: String,
    pub status: JobStatus,
    pub result_path: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub throttled: bool,
    pub throttled_by: Option<String>,
    pub options: JobOptions,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("pending"), None);
        assert_eq!(JobStatus::parse(""), None);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_options_default_and_json() {
        let opts = JobOptions::default();
        assert_eq!(opts.output_format, OutputFormat::Markdown);
        assert!(opts.include_metadata);

        // Missing fields fall back to defaults when stored options
        // predate a new field.
        let parsed: JobOptions = serde_json::from_str(r#"{"output_format":"json"}"#).unwrap();
        assert_eq!(parsed.output_format, OutputFormat::Json);
        assert_eq!(parsed.engine, EngineChoice::Auto);
    }
}

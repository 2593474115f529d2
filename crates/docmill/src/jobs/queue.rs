//! Persistent job queue backed by the `jobs` table.
//!
//! The queue is the only writer of job status. All transitions go
//! through SQL statements guarded on the current status, so concurrent
//! cancel/pickup races resolve to exactly one winner.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::db::{grant_repo, job_repo, Database, DatabaseError};

use super::{id, Job, JobOptions, JobStatus};

/// Collision retries before job creation gives up. Exhausting this on
/// a 62^10 ID space means something is badly wrong with the entropy
/// source, so the error is loud rather than silently retried forever.
const MAX_ID_ATTEMPTS: u32 = 10;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Entropy source failure: {0}")]
    Entropy(#[from] getrandom::Error),

    #[error("Could not allocate a unique job ID after {MAX_ID_ATTEMPTS} attempts")]
    IdSpaceExhausted,

    #[error("Job {0} has a corrupt row: {1}")]
    CorruptRow(String, String),
}

#[derive(Clone)]
pub struct JobQueue {
    db: Database,
}

impl JobQueue {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Creates a new PENDING job owned by `owner_id`.
    pub fn create(
        &self,
        owner_id: &str,
        source_path: &str,
        options: JobOptions,
    ) -> Result<Job, QueueError> {
        let job_id = self.allocate_id()?;
        let created_at = Utc::now();

        let options_json = serde_json::to_string(&options)
            .map_err(|e| QueueError::CorruptRow(job_id.clone(), e.to_string()))?;

        job_repo::insert(
            &self.db,
            &job_repo::JobRow {
                job_id: job_id.clone(),
                owner_id: owner_id.to_string(),
                source_path: source_path.to_string(),
                status: JobStatus::Pending.as_str().to_string(),
                result_path: None,
                error_message: None,
                created_at: created_at.to_rfc3339(),
                started_at: None,
                completed_at: None,
                throttled: false,
                throttled_by: None,
                options: options_json,
            },
        )?;

        tracing::info!(job_id = %job_id, owner_id = %owner_id, "job created");

        Ok(Job {
            job_id,
            owner_id: owner_id.to_string(),
            source_path: source_path.to_string(),
            status: JobStatus::Pending,
            result_path: None,
            error_message: None,
            created_at,
            started_at: None,
            completed_at: None,
            throttled: false,
            throttled_by: None,
            options,
        })
    }

    fn allocate_id(&self) -> Result<String, QueueError> {
        for attempt in 0..MAX_ID_ATTEMPTS {
            let candidate = id::generate()?;
            if !job_repo::exists(&self.db, &candidate)? {
                return Ok(candidate);
            }
            log::warn!(
                "job ID collision on {} (attempt {} of {})",
                candidate,
                attempt + 1,
                MAX_ID_ATTEMPTS
            );
        }
        Err(QueueError::IdSpaceExhausted)
    }

    /// Fetches a job by ID.
    pub fn get(&self, job_id: &str) -> Result<Option<Job>, QueueError> {
        match job_repo::find_by_id(&self.db, job_id)? {
            Some(row) => Ok(Some(job_from_row(row)?)),
            None => Ok(None),
        }
    }

    /// Lists jobs matching the filter, newest first, with the total
    /// count of the filtered set before pagination.
    pub fn list(
        &self,
        status: Option<JobStatus>,
        owner_id: Option<&str>,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> Result<(Vec<Job>, u64), QueueError> {
        let (rows, total) = job_repo::query(
            &self.db,
            &job_repo::JobFilter {
                status: status.map(|s| s.as_str().to_string()),
                owner_id: owner_id.map(str::to_string),
                limit,
                offset,
            },
        )?;
        let jobs = rows
            .into_iter()
            .map(job_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((jobs, total))
    }

    /// Cancels a PENDING or RUNNING job. Returns false when the job is
    /// already terminal (or does not exist), which callers should treat
    /// as a conflict, not an error.
    pub fn cancel(&self, job_id: &str) -> Result<bool, QueueError> {
        let cancelled = job_repo::mark_terminal(
            &self.db,
            job_id,
            JobStatus::Cancelled.as_str(),
            &Utc::now().to_rfc3339(),
            None,
            None,
        )?;
        if cancelled {
            tracing::info!(job_id = %job_id, "job cancelled");
        }
        Ok(cancelled)
    }

    /// Sets or clears the advisory throttle flag. The job's status is
    /// untouched; a throttled PENDING job simply stops being offered to
    /// the worker.
    pub fn set_throttle(
        &self,
        job_id: &str,
        throttled: bool,
        throttled_by: Option<&str>,
    ) -> Result<bool, QueueError> {
        let updated = job_repo::set_throttle(&self.db, job_id, throttled, throttled_by)?;
        if updated {
            tracing::info!(job_id = %job_id, throttled, "job throttle changed");
        }
        Ok(updated)
    }

    /// Grants `grantee_id` read access to a job. Idempotent.
    pub fn grant_access(
        &self,
        job_id: &str,
        grantee_id: &str,
        granted_by: &str,
    ) -> Result<(), QueueError> {
        grant_repo::insert(
            &self.db,
            job_id,
            grantee_id,
            granted_by,
            &Utc::now().to_rfc3339(),
        )?;
        Ok(())
    }

    /// Whether `principal_id` may read this job: owners always, plus
    /// anyone holding a grant.
    pub fn has_access(&self, job_id: &str, principal_id: &str) -> Result<bool, QueueError> {
        if job_repo::is_owner(&self.db, job_id, principal_id)? {
            return Ok(true);
        }
        Ok(grant_repo::exists(&self.db, job_id, principal_id)?)
    }

    /// Pops nothing; returns the oldest PENDING non-throttled job, if
    /// any. Claiming happens separately via [`mark_running`](Self::mark_running).
    pub fn next_pending(&self) -> Result<Option<Job>, QueueError> {
        match job_repo::next_pending(&self.db)? {
            Some(row) => Ok(Some(job_from_row(row)?)),
            None => Ok(None),
        }
    }

    /// Claims a PENDING job for execution. Returns false when the job
    /// was cancelled (or otherwise moved) between poll and claim.
    pub fn mark_running(&self, job_id: &str) -> Result<bool, QueueError> {
        Ok(job_repo::mark_running(
            &self.db,
            job_id,
            &Utc::now().to_rfc3339(),
        )?)
    }

    /// Records a successful conversion.
    pub fn mark_completed(&self, job_id: &str, result_path: &str) -> Result<bool, QueueError> {
        Ok(job_repo::mark_terminal(
            &self.db,
            job_id,
            JobStatus::Completed.as_str(),
            &Utc::now().to_rfc3339(),
            Some(result_path),
            None,
        )?)
    }

    /// Records a failed conversion with its error message.
    pub fn mark_failed(&self, job_id: &str, error_message: &str) -> Result<bool, QueueError> {
        Ok(job_repo::mark_terminal(
            &self.db,
            job_id,
            JobStatus::Failed.as_str(),
            &Utc::now().to_rfc3339(),
            None,
            Some(error_message),
        )?)
    }
}

fn job_from_row(row: job_repo::JobRow) -> Result<Job, QueueError> {
    let status = JobStatus::parse(&row.status)
        .ok_or_else(|| QueueError::CorruptRow(row.job_id.clone(), format!("status {}", row.status)))?;
    let options: JobOptions = serde_json::from_str(&row.options)
        .map_err(|e| QueueError::CorruptRow(row.job_id.clone(), e.to_string()))?;

    Ok(Job {
        created_at: parse_ts(&row.job_id, &row.created_at)?,
        started_at: parse_optional_ts(&row.job_id, row.started_at.as_deref())?,
        completed_at: parse_optional_ts(&row.job_id, row.completed_at.as_deref())?,
        job_id: row.job_id,
        owner_id: row.owner_id,
        source_path: row.source_path,
        status,
        result_path: row.result_path,
        error_message: row.error_message,
        throttled: row.throttled,
        throttled_by: row.throttled_by,
        options,
    })
}

fn parse_ts(job_id: &str, s: &str) -> Result<DateTime<Utc>, QueueError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| QueueError::CorruptRow(job_id.to_string(), format!("timestamp {}", s)))
}

fn parse_optional_ts(job_id: &str, s: Option<&str>) -> Result<Option<DateTime<Utc>>, QueueError> {
    s.map(|s| parse_ts(job_id, s)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_queue() -> JobQueue {
        JobQueue::new(Database::open_in_memory().unwrap())
    }

    #[test]
    fn test_create_and_get() {
        let queue = test_queue();
        let job = queue
            .create("alice", "/tmp/report.pdf", JobOptions::default())
            .unwrap();

        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.job_id.len(), 10);

        let fetched = queue.get(&job.job_id).unwrap().unwrap();
        assert_eq!(fetched.owner_id, "alice");
        assert_eq!(fetched.options, JobOptions::default());
        assert!(queue.get("missing-id").unwrap().is_none());
    }

    #[test]
    fn test_cancel_pending_job() {
        let queue = test_queue();
        let job = queue
            .create("alice", "/tmp/a.pdf", JobOptions::default())
            .unwrap();

        assert!(queue.cancel(&job.job_id).unwrap());
        let job = queue.get(&job.job_id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(job.completed_at.is_some());

        // Cancelling a terminal job is a conflict, not an error.
        assert!(!queue.cancel(&job.job_id).unwrap());
    }

    #[test]
    fn test_cancel_running_job() {
        let queue = test_queue();
        let job = queue
            .create("alice", "/tmp/a.pdf", JobOptions::default())
            .unwrap();
        assert!(queue.mark_running(&job.job_id).unwrap());

        assert!(queue.cancel(&job.job_id).unwrap());
        assert_eq!(
            queue.get(&job.job_id).unwrap().unwrap().status,
            JobStatus::Cancelled
        );
    }

    #[test]
    fn test_cancelled_job_cannot_be_claimed() {
        let queue = test_queue();
        let job = queue
            .create("alice", "/tmp/a.pdf", JobOptions::default())
            .unwrap();
        assert!(queue.cancel(&job.job_id).unwrap());

        // The worker polled this job before the cancel landed; the
        // claim must lose the race.
        assert!(!queue.mark_running(&job.job_id).unwrap());
    }

    #[test]
    fn test_throttle_hides_from_worker_but_keeps_pending() {
        let queue = test_queue();
        let job = queue
            .create("alice", "/tmp/a.pdf", JobOptions::default())
            .unwrap();

        assert!(queue.set_throttle(&job.job_id, true, Some("admin-cred")).unwrap());
        assert!(queue.next_pending().unwrap().is_none());
        assert_eq!(
            queue.get(&job.job_id).unwrap().unwrap().status,
            JobStatus::Pending
        );

        assert!(queue.set_throttle(&job.job_id, false, None).unwrap());
        assert_eq!(
            queue.next_pending().unwrap().unwrap().job_id,
            job.job_id
        );
    }

    #[test]
    fn test_grants_are_idempotent() {
        let queue = test_queue();
        let job = queue
            .create("alice", "/tmp/a.pdf", JobOptions::default())
            .unwrap();

        assert!(!queue.has_access(&job.job_id, "bob").unwrap());
        queue.grant_access(&job.job_id, "bob", "alice").unwrap();
        queue.grant_access(&job.job_id, "bob", "alice").unwrap();
        assert!(queue.has_access(&job.job_id, "bob").unwrap());
        // Owners always have access without a grant row.
        assert!(queue.has_access(&job.job_id, "alice").unwrap());
        assert!(!queue.has_access(&job.job_id, "carol").unwrap());
    }

    #[test]
    fn test_completion_records_result_path() {
        let queue = test_queue();
        let job = queue
            .create("alice", "/tmp/a.pdf", JobOptions::default())
            .unwrap();
        assert!(queue.mark_running(&job.job_id).unwrap());
        assert!(queue.mark_completed(&job.job_id, "/results/out.md").unwrap());

        let job = queue.get(&job.job_id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result_path.as_deref(), Some("/results/out.md"));
    }

    #[test]
    fn test_failure_records_error_message() {
        let queue = test_queue();
        let job = queue
            .create("alice", "/tmp/a.pdf", JobOptions::default())
            .unwrap();
        assert!(queue.mark_running(&job.job_id).unwrap());
        assert!(queue.mark_failed(&job.job_id, "extraction timed out").unwrap());

        let job = queue.get(&job.job_id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("extraction timed out"));
    }

    #[test]
    fn test_list_with_owner_filter() {
        let queue = test_queue();
        queue.create("alice", "/tmp/a.pdf", JobOptions::default()).unwrap();
        queue.create("bob", "/tmp/b.pdf", JobOptions::default()).unwrap();

        let (jobs, total) = queue.list(None, Some("alice"), None, None).unwrap();
        assert_eq!(total, 1);
        assert_eq!(jobs[0].owner_id, "alice");

        let (_, total) = queue.list(None, None, None, None).unwrap();
        assert_eq!(total, 2);
    }
}

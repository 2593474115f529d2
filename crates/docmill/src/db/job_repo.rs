//! Job repository: CRUD operations for the `jobs` table.
//!
//! Status transitions are guarded in the UPDATE statements themselves
//! (`WHERE status IN (...)`), so the state machine stays monotonic
//! without any locking above SQLite's own statement serialization.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// A raw job row from the database.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub job_id: String,
    pub owner_id: String,
    pub source_path: String,
    pub status: String,
    pub result_path: Option<String>,
    pub error_message: Option<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub throttled: bool,
    pub throttled_by: Option<String>,
    pub options: String,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            job_id: row.get("job_id")?,
            owner_id: row.get("owner_id")?,
            source_path: row.get("source_path")?,
            status: row.get("status")?,
            result_path: row.get("result_path")?,
            error_message: row.get("error_message")?,
            created_at: row.get("created_at")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
            throttled: row.get::<_, i64>("throttled")? != 0,
            throttled_by: row.get("throttled_by")?,
            options: row.get("options")?,
        })
    }
}

/// Query filter parameters for job listing.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub status: Option<String>,
    pub owner_id: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Inserts a new job row.
pub fn insert(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO jobs (job_id, owner_id, source_path, status, result_path,
             error_message, created_at, started_at, completed_at, throttled,
             throttled_by, options)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                job.job_id,
                job.owner_id,
                job.source_path,
                job.status,
                job.result_path,
                job.error_message,
                job.created_at,
                job.started_at,
                job.completed_at,
                job.throttled as i64,
                job.throttled_by,
                job.options,
            ],
        )?;
        Ok(())
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM jobs WHERE job_id = ?1")?;
        let mut rows = stmt.query_map(params![id], JobRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Returns whether a job ID is already taken (collision check at creation).
pub fn exists(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let count: u32 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE job_id = ?1",
            params![id],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    })
}

/// Queries jobs with filters, returning (rows, total_count).
///
/// The total count reflects the filtered set before pagination.
pub fn query(db: &Database, filter: &JobFilter) -> Result<(Vec<JobRow>, u64), DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(ref status) = filter.status {
            conditions.push(format!("status = ?{}", param_values.len() + 1));
            param_values.push(Box::new(status.clone()));
        }
        if let Some(ref owner_id) = filter.owner_id {
            conditions.push(format!("owner_id = ?{}", param_values.len() + 1));
            param_values.push(Box::new(owner_id.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        // Count total matching rows.
        let count_sql = format!("SELECT COUNT(*) FROM jobs {}", where_clause);
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

        // Fetch paginated results.
        let limit = filter.limit.unwrap_or(50) as i64;
        let offset = filter.offset.unwrap_or(0) as i64;
        param_values.push(Box::new(limit));
        param_values.push(Box::new(offset));
        let query_sql = format!(
            "SELECT * FROM jobs {} ORDER BY created_at DESC LIMIT ?{} OFFSET ?{}",
            where_clause,
            param_values.len() - 1,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query_sql)?;
        let rows: Vec<JobRow> = stmt
            .query_map(params_ref.as_slice(), JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total))
    })
}

/// Fetches the oldest PENDING, non-throttled job, if any.
pub fn next_pending(db: &Database) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM jobs WHERE status = 'PENDING' AND throttled = 0
             ORDER BY created_at ASC LIMIT 1",
        )?;
        let mut rows = stmt.query_map([], JobRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Transitions a job to RUNNING and records the start timestamp.
///
/// Only applies to PENDING jobs; returns false when the job is missing
/// or no longer PENDING (e.g. cancelled between poll and pickup).
pub fn mark_running(db: &Database, id: &str, started_at: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let n = conn.execute(
            "UPDATE jobs SET status = 'RUNNING', started_at = ?2
             WHERE job_id = ?1 AND status = 'PENDING'",
            params![id, started_at],
        )?;
        Ok(n > 0)
    })
}

/// Transitions a job to a terminal status, recording the completion
/// timestamp and, depending on status, a result path or error message.
///
/// Only applies to non-terminal jobs; a job already terminal is left
/// untouched and false is returned.
pub fn mark_terminal(
    db: &Database,
    id: &str,
    status: &str,
    completed_at: &str,
    result_path: Option<&str>,
    error_message: Option<&str>,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let n = conn.execute(
            "UPDATE jobs SET status = ?2, completed_at = ?3, result_path = ?4,
             error_message = ?5
             WHERE job_id = ?1 AND status IN ('PENDING', 'RUNNING')",
            params![id, status, completed_at, result_path, error_message],
        )?;
        Ok(n > 0)
    })
}

/// Sets or clears the throttle flag. Returns false if the job is missing.
pub fn set_throttle(
    db: &Database,
    id: &str,
    throttled: bool,
    throttled_by: Option<&str>,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let n = conn.execute(
            "UPDATE jobs SET throttled = ?2, throttled_by = ?3 WHERE job_id = ?1",
            params![id, throttled as i64, throttled_by],
        )?;
        Ok(n > 0)
    })
}

/// Returns whether the given principal owns the job.
pub fn is_owner(db: &Database, id: &str, principal_id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT owner_id FROM jobs WHERE job_id = ?1")?;
        let mut rows = stmt.query_map(params![id], |r| r.get::<_, String>(0))?;
        match rows.next() {
            Some(Ok(owner)) => Ok(owner == principal_id),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(false),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn sample_job(id: &str) -> JobRow {
        JobRow {
            job_id: id.to_string(),
            owner_id: "alice".to_string(),
            source_path: "/tmp/test.pdf".to_string(),
            status: "PENDING".to_string(),
            result_path: None,
            error_message: None,
            created_at: "2026-01-01T00:00:00Z".to_string(),
            started_at: None,
            completed_at: None,
            throttled: false,
            throttled_by: None,
            options: "{}".to_string(),
        }
    }

    #[test]
    fn test_insert_and_find() {
        let db = test_db();
        insert(&db, &sample_job("job-1")).unwrap();

        let found = find_by_id(&db, "job-1").unwrap().unwrap();
        assert_eq!(found.owner_id, "alice");
        assert_eq!(found.status, "PENDING");
        assert!(exists(&db, "job-1").unwrap());
        assert!(!exists(&db, "job-2").unwrap());
    }

    #[test]
    fn test_query_pagination_and_total() {
        let db = test_db();
        for i in 0..10 {
            let mut job = sample_job(&format!("p{}", i));
            job.created_at = format!("2026-01-{:02}T00:00:00Z", i + 1);
            insert(&db, &job).unwrap();
        }

        let (rows, total) = query(
            &db,
            &JobFilter {
                limit: Some(3),
                offset: Some(0),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(total, 10);
        assert_eq!(rows.len(), 3);
        // Newest first.
        assert_eq!(rows[0].job_id, "p9");
    }

    #[test]
    fn test_query_with_filters() {
        let db = test_db();
        insert(&db, &sample_job("f1")).unwrap();
        let mut done = sample_job("f2");
        done.status = "COMPLETED".to_string();
        insert(&db, &done).unwrap();
        let mut other = sample_job("f3");
        other.owner_id = "bob".to_string();
        insert(&db, &other).unwrap();

        let (rows, total) = query(
            &db,
            &JobFilter {
                status: Some("COMPLETED".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].job_id, "f2");

        let (rows, total) = query(
            &db,
            &JobFilter {
                owner_id: Some("alice".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(total, 2);
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_next_pending_skips_throttled() {
        let db = test_db();
        let mut throttled = sample_job("t1");
        throttled.created_at = "2026-01-01T00:00:00Z".to_string();
        throttled.throttled = true;
        insert(&db, &throttled).unwrap();

        let mut later = sample_job("t2");
        later.created_at = "2026-01-02T00:00:00Z".to_string();
        insert(&db, &later).unwrap();

        let next = next_pending(&db).unwrap().unwrap();
        assert_eq!(next.job_id, "t2");
    }

    #[test]
    fn test_next_pending_oldest_first() {
        let db = test_db();
        let mut newer = sample_job("n2");
        newer.created_at = "2026-01-02T00:00:00Z".to_string();
        insert(&db, &newer).unwrap();
        let mut older = sample_job("n1");
        older.created_at = "2026-01-01T00:00:00Z".to_string();
        insert(&db, &older).unwrap();

        assert_eq!(next_pending(&db).unwrap().unwrap().job_id, "n1");
    }

    #[test]
    fn test_mark_running_only_from_pending() {
        let db = test_db();
        insert(&db, &sample_job("r1")).unwrap();

        assert!(mark_running(&db, "r1", "2026-01-01T01:00:00Z").unwrap());
        let job = find_by_id(&db, "r1").unwrap().unwrap();
        assert_eq!(job.status, "RUNNING");
        assert!(job.started_at.is_some());
        assert!(job.completed_at.is_none());

        // Second attempt is a no-op: the job is no longer PENDING.
        assert!(!mark_running(&db, "r1", "2026-01-01T02:00:00Z").unwrap());
    }

    #[test]
    fn test_mark_terminal_guards_terminal_states() {
        let db = test_db();
        insert(&db, &sample_job("m1")).unwrap();

        assert!(mark_terminal(
            &db,
            "m1",
            "COMPLETED",
            "2026-01-01T01:00:00Z",
            Some("/results/m1.md"),
            None
        )
        .unwrap());
        let job = find_by_id(&db, "m1").unwrap().unwrap();
        assert_eq!(job.status, "COMPLETED");
        assert_eq!(job.result_path.as_deref(), Some("/results/m1.md"));

        // A terminal job cannot move again.
        assert!(!mark_terminal(
            &db,
            "m1",
            "CANCELLED",
            "2026-01-01T02:00:00Z",
            None,
            None
        )
        .unwrap());
        let job = find_by_id(&db, "m1").unwrap().unwrap();
        assert_eq!(job.status, "COMPLETED");
    }

    #[test]
    fn test_set_throttle() {
        let db = test_db();
        insert(&db, &sample_job("th1")).unwrap();

        assert!(set_throttle(&db, "th1", true, Some("admin")).unwrap());
        let job = find_by_id(&db, "th1").unwrap().unwrap();
        assert!(job.throttled);
        assert_eq!(job.throttled_by.as_deref(), Some("admin"));
        // Still PENDING; throttling is advisory, not a status.
        assert_eq!(job.status, "PENDING");

        assert!(set_throttle(&db, "th1", false, None).unwrap());
        let job = find_by_id(&db, "th1").unwrap().unwrap();
        assert!(!job.throttled);
        assert!(job.throttled_by.is_none());

        assert!(!set_throttle(&db, "missing", true, Some("admin")).unwrap());
    }

    #[test]
    fn test_is_owner() {
        let db = test_db();
        insert(&db, &sample_job("o1")).unwrap();

        assert!(is_owner(&db, "o1", "alice").unwrap());
        assert!(!is_owner(&db, "o1", "bob").unwrap());
        assert!(!is_owner(&db, "missing", "alice").unwrap());
    }
}

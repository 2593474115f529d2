//! Access grant repository: the many-to-many job/principal relation.

use rusqlite::params;

use super::{Database, DatabaseError};

/// Records a grant. Idempotent: granting twice leaves a single row.
pub fn insert(
    db: &Database,
    job_id: &str,
    grantee_id: &str,
    granted_by: &str,
    granted_at: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT OR IGNORE INTO access_grants (job_id, grantee_id, granted_by, granted_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![job_id, grantee_id, granted_by, granted_at],
        )?;
        Ok(())
    })
}

/// Returns whether a grant exists for (job, grantee).
pub fn exists(db: &Database, job_id: &str, grantee_id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let count: u32 = conn.query_row(
            "SELECT COUNT(*) FROM access_grants WHERE job_id = ?1 AND grantee_id = ?2",
            params![job_id, grantee_id],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    })
}

/// Counts grants on a job.
pub fn count_for_job(db: &Database, job_id: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM access_grants WHERE job_id = ?1",
            params![job_id],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

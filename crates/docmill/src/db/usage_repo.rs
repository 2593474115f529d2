//! Usage audit repository: append-only log of credential activity.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// A single usage record (audit trail entry).
#[derive(Debug, Clone)]
pub struct UsageRow {
    pub credential_id: String,
    pub timestamp: String,
    pub endpoint: String,
    pub method: String,
    pub status_code: u16,
    pub latency_ms: Option<u64>,
}

impl UsageRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            credential_id: row.get("credential_id")?,
            timestamp: row.get("timestamp")?,
            endpoint: row.get("endpoint")?,
            method: row.get("method")?,
            status_code: row.get("status_code")?,
            latency_ms: row.get("latency_ms")?,
        })
    }
}

/// Appends a usage record.
pub fn insert(db: &Database, usage: &UsageRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO credential_usage (credential_id, timestamp, endpoint, method,
             status_code, latency_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                usage.credential_id,
                usage.timestamp,
                usage.endpoint,
                usage.method,
                usage.status_code,
                usage.latency_ms,
            ],
        )?;
        Ok(())
    })
}

/// Lists usage records for a credential since the given cutoff, newest first.
pub fn list_since(
    db: &Database,
    credential_id: &str,
    cutoff: &str,
) -> Result<Vec<UsageRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM credential_usage
             WHERE credential_id = ?1 AND timestamp >= ?2
             ORDER BY timestamp DESC",
        )?;
        let rows: Vec<UsageRow> = stmt
            .query_map(params![credential_id, cutoff], UsageRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

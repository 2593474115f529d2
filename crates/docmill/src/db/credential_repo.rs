//! Credential repository: CRUD operations for the `credentials` table.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// A raw credential row from the database.
#[derive(Debug, Clone)]
pub struct CredentialRow {
    pub credential_id: String,
    pub secret_hash: String,
    pub principal_id: String,
    pub role: String,
    pub created_at: String,
    pub expires_at: Option<String>,
    pub is_active: bool,
    pub rate_limit: u32,
    pub created_by: Option<String>,
}

impl CredentialRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            credential_id: row.get("credential_id")?,
            secret_hash: row.get("secret_hash")?,
            principal_id: row.get("principal_id")?,
            role: row.get("role")?,
            created_at: row.get("created_at")?,
            expires_at: row.get("expires_at")?,
            is_active: row.get::<_, i64>("is_active")? != 0,
            rate_limit: row.get("rate_limit")?,
            created_by: row.get("created_by")?,
        })
    }
}

/// Inserts a new credential row.
pub fn insert(db: &Database, cred: &CredentialRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO credentials (credential_id, secret_hash, principal_id, role,
             created_at, expires_at, is_active, rate_limit, created_by)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                cred.credential_id,
                cred.secret_hash,
                cred.principal_id,
                cred.role,
                cred.created_at,
                cred.expires_at,
                cred.is_active as i64,
                cred.rate_limit,
                cred.created_by,
            ],
        )?;
        Ok(())
    })
}

/// Finds a credential by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<CredentialRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM credentials WHERE credential_id = ?1")?;
        let mut rows = stmt.query_map(params![id], CredentialRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Lists all credentials, newest first.
pub fn list_all(db: &Database) -> Result<Vec<CredentialRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM credentials ORDER BY created_at DESC")?;
        let rows: Vec<CredentialRow> = stmt
            .query_map([], CredentialRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Lists all active credentials.
///
/// This is the candidate set for authentication: the secret hash cannot
/// be looked up by value, so authentication scans every active row.
pub fn list_active(db: &Database) -> Result<Vec<CredentialRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM credentials WHERE is_active = 1")?;
        let rows: Vec<CredentialRow> = stmt
            .query_map([], CredentialRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Hard-deletes a credential. Returns false if it did not exist.
pub fn delete(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let n = conn.execute(
            "DELETE FROM credentials WHERE credential_id = ?1",
            params![id],
        )?;
        Ok(n > 0)
    })
}

/// Sets the active flag. Returns false if the credential does not exist.
pub fn set_active(db: &Database, id: &str, active: bool) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let n = conn.execute(
            "UPDATE credentials SET is_active = ?2 WHERE credential_id = ?1",
            params![id, active as i64],
        )?;
        Ok(n > 0)
    })
}

/// Updates the rate limit. Returns false if the credential does not exist.
pub fn set_rate_limit(db: &Database, id: &str, rate_limit: u32) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let n = conn.execute(
            "UPDATE credentials SET rate_limit = ?2 WHERE credential_id = ?1",
            params![id, rate_limit],
        )?;
        Ok(n > 0)
    })
}

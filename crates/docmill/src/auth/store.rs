//! Credential store: issuance, authentication, and lifecycle of hashed
//! API credentials.
//!
//! Secrets are 256 bits of OS entropy behind a fixed `docmill_` prefix,
//! stored only as a salted bcrypt hash. Because the hash cannot be
//! looked up by value, authentication is a deliberate linear scan over
//! every active credential, comparing with bcrypt's constant-time
//! verifier. That scan is the dominant cost of authentication and the
//! price of not keeping secrets recoverable; do not replace it with an
//! indexed lookup without changing the hashing scheme.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::db::{credential_repo, usage_repo, Database, DatabaseError};

use super::{Credential, Principal, Role};

/// Prefix on every issued secret; malformed input is rejected without a
/// database lookup.
pub const SECRET_PREFIX: &str = "docmill_";

const SECRET_BYTES: usize = 32;

/// Errors from credential operations.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),

    #[error("Entropy source failure: {0}")]
    Entropy(#[from] getrandom::Error),

    #[error("Admin credentials cannot be issued through the general issuance path")]
    AdminIssuance,

    #[error("Malformed timestamp in credential store: {0}")]
    MalformedTimestamp(String),

    #[error("Malformed role in credential store: {0}")]
    MalformedRole(String),
}

/// The one-time view of a freshly issued credential. The `secret` field
/// is shown here and never again.
#[derive(Debug)]
pub struct IssuedCredential {
    pub credential_id: String,
    pub secret: String,
    pub principal_id: String,
    pub role: Role,
    pub expires_at: Option<DateTime<Utc>>,
    pub rate_limit: u32,
}

/// A typed usage audit record.
#[derive(Debug, Clone)]
pub struct UsageRecord {
    pub timestamp: DateTime<Utc>,
    pub endpoint: String,
    pub method: String,
    pub status_code: u16,
    pub latency_ms: Option<u64>,
}

#[derive(Clone)]
pub struct CredentialStore {
    db: Database,
    bcrypt_cost: u32,
}

impl CredentialStore {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            bcrypt_cost: bcrypt::DEFAULT_COST,
        }
    }

    /// Overrides the bcrypt work factor. Tests use a low cost to keep
    /// the suite fast; production code should leave the default.
    pub fn with_cost(db: Database, bcrypt_cost: u32) -> Self {
        Self { db, bcrypt_cost }
    }

    /// Issues a new credential and returns its plaintext secret exactly
    /// once.
    ///
    /// Refuses the Admin role unconditionally: admin credentials exist
    /// only through [`issue_admin`](Self::issue_admin), which is never
    /// wired to an authenticated caller path. This is a hard invariant,
    /// independent of any permission check in front of it.
    pub fn issue(
        &self,
        principal_id: &str,
        role: Role,
        ttl_days: Option<i64>,
        created_by: Option<&str>,
        rate_limit: Option<u32>,
    ) -> Result<IssuedCredential, AuthError> {
        if role == Role::Admin {
            return Err(AuthError::AdminIssuance);
        }
        self.issue_unchecked(principal_id, role, ttl_days, created_by, rate_limit)
    }

    /// Privileged, out-of-band issuance of an Admin credential. For the
    /// composition root / operator CLI only; must not be reachable from
    /// the authenticated API surface.
    pub fn issue_admin(
        &self,
        principal_id: &str,
        ttl_days: Option<i64>,
    ) -> Result<IssuedCredential, AuthError> {
        self.issue_unchecked(principal_id, Role::Admin, ttl_days, None, None)
    }

    fn issue_unchecked(
        &self,
        principal_id: &str,
        role: Role,
        ttl_days: Option<i64>,
        created_by: Option<&str>,
        rate_limit: Option<u32>,
    ) -> Result<IssuedCredential, AuthError> {
        let secret = generate_secret()?;
        let credential_id = uuid::Uuid::new_v4().to_string();
        let secret_hash = bcrypt::hash(&secret, self.bcrypt_cost)?;

        let now = Utc::now();
        let expires_at = ttl_days.map(|days| now + Duration::days(days));
        let rate_limit = rate_limit.unwrap_or_else(|| role.default_rate_limit());

        credential_repo::insert(
            &self.db,
            &credential_repo::CredentialRow {
                credential_id: credential_id.clone(),
                secret_hash,
                principal_id: principal_id.to_string(),
                role: role.as_str().to_string(),
                created_at: now.to_rfc3339(),
                expires_at: expires_at.map(|t| t.to_rfc3339()),
                is_active: true,
                rate_limit,
                created_by: created_by.map(str::to_string),
            },
        )?;

        tracing::info!(
            credential_id = %credential_id,
            principal_id = %principal_id,
            role = %role,
            "issued credential"
        );

        Ok(IssuedCredential {
            credential_id,
            secret,
            principal_id: principal_id.to_string(),
            role,
            expires_at,
            rate_limit,
        })
    }

    /// Validates a presented secret and derives a [`Principal`].
    ///
    /// Returns `Ok(None)` for malformed, unknown, disabled, or expired
    /// secrets. Linear scan over active credentials by design (see the
    /// module docs).
    pub fn authenticate(&self, secret: &str) -> Result<Option<Principal>, AuthError> {
        if !secret.starts_with(SECRET_PREFIX) {
            return Ok(None);
        }

        let candidates = credential_repo::list_active(&self.db)?;
        for row in candidates {
            match bcrypt::verify(secret, &row.secret_hash) {
                Ok(true) => {
                    let role = parse_role(&row.role)?;
                    let expires_at = parse_optional_ts(row.expires_at.as_deref())?;
                    if let Some(expiry) = expires_at {
                        if Utc::now() > expiry {
                            tracing::debug!(
                                credential_id = %row.credential_id,
                                "credential matched but is expired"
                            );
                            return Ok(None);
                        }
                    }
                    return Ok(Some(Principal {
                        credential_id: row.credential_id,
                        principal_id: row.principal_id,
                        role,
                        rate_limit: row.rate_limit,
                        is_active: row.is_active,
                        expires_at,
                    }));
                }
                Ok(false) => continue,
                Err(e) => {
                    // A corrupt stored hash must not break the scan.
                    tracing::warn!(
                        credential_id = %row.credential_id,
                        error = %e,
                        "skipping credential with unverifiable hash"
                    );
                    continue;
                }
            }
        }

        Ok(None)
    }

    /// Fetches a stored credential by ID (hash excluded from the view).
    pub fn get(&self, credential_id: &str) -> Result<Option<Credential>, AuthError> {
        match credential_repo::find_by_id(&self.db, credential_id)? {
            Some(row) => Ok(Some(credential_from_row(row)?)),
            None => Ok(None),
        }
    }

    /// Lists all credentials, newest first.
    pub fn list(&self) -> Result<Vec<Credential>, AuthError> {
        credential_repo::list_all(&self.db)?
            .into_iter()
            .map(credential_from_row)
            .collect()
    }

    /// Permanently deletes a credential. Distinct from
    /// [`set_active`](Self::set_active), which is reversible.
    pub fn revoke(&self, credential_id: &str) -> Result<bool, AuthError> {
        let deleted = credential_repo::delete(&self.db, credential_id)?;
        if deleted {
            tracing::info!(credential_id = %credential_id, "revoked credential");
        }
        Ok(deleted)
    }

    /// Soft-disables or re-enables a credential.
    pub fn set_active(&self, credential_id: &str, active: bool) -> Result<bool, AuthError> {
        Ok(credential_repo::set_active(&self.db, credential_id, active)?)
    }

    /// Updates a credential's rate-limit quota (requests per minute).
    pub fn set_rate_limit(&self, credential_id: &str, rate_limit: u32) -> Result<bool, AuthError> {
        Ok(credential_repo::set_rate_limit(
            &self.db,
            credential_id,
            rate_limit,
        )?)
    }

    /// Appends a usage audit record for a credential.
    pub fn record_usage(
        &self,
        credential_id: &str,
        endpoint: &str,
        method: &str,
        status_code: u16,
        latency_ms: Option<u64>,
    ) -> Result<(), AuthError> {
        usage_repo::insert(
            &self.db,
            &usage_repo::UsageRow {
                credential_id: credential_id.to_string(),
                timestamp: Utc::now().to_rfc3339(),
                endpoint: endpoint.to_string(),
                method: method.to_string(),
                status_code,
                latency_ms,
            },
        )?;
        Ok(())
    }

    /// Returns the usage audit trail for the last `days` days, newest
    /// first.
    pub fn usage_history(
        &self,
        credential_id: &str,
        days: i64,
    ) -> Result<Vec<UsageRecord>, AuthError> {
        let cutoff = (Utc::now() - Duration::days(days)).to_rfc3339();
        let rows = usage_repo::list_since(&self.db, credential_id, &cutoff)?;
        rows.into_iter()
            .map(|row| {
                Ok(UsageRecord {
                    timestamp: parse_ts(&row.timestamp)?,
                    endpoint: row.endpoint,
                    method: row.method,
                    status_code: row.status_code,
                    latency_ms: row.latency_ms,
                })
            })
            .collect()
    }
}

/// Generates a fresh secret: `docmill_` + url-safe base64 of 256 random
/// bits.
fn generate_secret() -> Result<String, AuthError> {
    let mut bytes = [0u8; SECRET_BYTES];
    getrandom::fill(&mut bytes)?;
    Ok(format!("{}{}", SECRET_PREFIX, URL_SAFE_NO_PAD.encode(bytes)))
}

fn credential_from_row(row: credential_repo::CredentialRow) -> Result<Credential, AuthError> {
    Ok(Credential {
        created_at: parse_ts(&row.created_at)?,
        expires_at: parse_optional_ts(row.expires_at.as_deref())?,
        role: parse_role(&row.role)?,
        credential_id: row.credential_id,
        principal_id: row.principal_id,
        is_active: row.is_active,
        rate_limit: row.rate_limit,
        created_by: row.created_by,
    })
}

fn parse_role(s: &str) -> Result<Role, AuthError> {
    Role::parse(s).ok_or_else(|| AuthError::MalformedRole(s.to_string()))
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, AuthError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| AuthError::MalformedTimestamp(s.to_string()))
}

fn parse_optional_ts(s: Option<&str>) -> Result<Option<DateTime<Utc>>, AuthError> {
    s.map(parse_ts).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    // Minimum bcrypt cost keeps the linear-scan tests fast.
    fn test_store() -> CredentialStore {
        CredentialStore::with_cost(Database::open_in_memory().unwrap(), 4)
    }

    #[test]
    fn test_issue_and_authenticate_round_trip() {
        let store = test_store();
        let issued = store
            .issue("alice", Role::JobWriter, None, None, None)
            .unwrap();

        assert!(issued.secret.starts_with(SECRET_PREFIX));
        assert_eq!(issued.rate_limit, 100);

        let principal = store.authenticate(&issued.secret).unwrap().unwrap();
        assert_eq!(principal.principal_id, "alice");
        assert_eq!(principal.role, Role::JobWriter);
        assert_eq!(principal.rate_limit, 100);
        assert_eq!(principal.credential_id, issued.credential_id);
    }

    #[test]
    fn test_issue_with_explicit_rate_limit() {
        let store = test_store();
        let issued = store
            .issue("alice", Role::JobReader, None, None, Some(7))
            .unwrap();
        assert_eq!(issued.rate_limit, 7);
    }

    #[test]
    fn test_authenticate_rejects_malformed_prefix() {
        let store = test_store();
        store.issue("alice", Role::JobWriter, None, None, None).unwrap();

        assert!(store.authenticate("not-a-secret").unwrap().is_none());
        assert!(store.authenticate("").unwrap().is_none());
    }

    #[test]
    fn test_authenticate_rejects_unknown_secret() {
        let store = test_store();
        store.issue("alice", Role::JobWriter, None, None, None).unwrap();

        assert!(store
            .authenticate("docmill_AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_revoke_invalidates_secret() {
        let store = test_store();
        let issued = store
            .issue("alice", Role::JobWriter, None, None, None)
            .unwrap();

        assert!(store.revoke(&issued.credential_id).unwrap());
        assert!(store.authenticate(&issued.secret).unwrap().is_none());
        assert!(store.get(&issued.credential_id).unwrap().is_none());
        // Revoking again reports not-found.
        assert!(!store.revoke(&issued.credential_id).unwrap());
    }

    #[test]
    fn test_disable_is_reversible() {
        let store = test_store();
        let issued = store
            .issue("alice", Role::JobWriter, None, None, None)
            .unwrap();

        assert!(store.set_active(&issued.credential_id, false).unwrap());
        assert!(store.authenticate(&issued.secret).unwrap().is_none());

        assert!(store.set_active(&issued.credential_id, true).unwrap());
        assert!(store.authenticate(&issued.secret).unwrap().is_some());
    }

    #[test]
    fn test_expired_credential_authenticates_as_invalid() {
        let store = test_store();
        let issued = store
            .issue("alice", Role::JobWriter, Some(-1), None, None)
            .unwrap();

        assert!(store.authenticate(&issued.secret).unwrap().is_none());
    }

    #[test]
    fn test_admin_issuance_rejected_on_general_path() {
        let store = test_store();
        let result = store.issue("root", Role::Admin, None, None, None);
        assert!(matches!(result, Err(AuthError::AdminIssuance)));

        // The out-of-band path works.
        let issued = store.issue_admin("root", None).unwrap();
        let principal = store.authenticate(&issued.secret).unwrap().unwrap();
        assert_eq!(principal.role, Role::Admin);
        assert_eq!(principal.rate_limit, 1000);
    }

    #[test]
    fn test_secrets_are_distinct() {
        let store = test_store();
        let a = store.issue("alice", Role::JobWriter, None, None, None).unwrap();
        let b = store.issue("alice", Role::JobWriter, None, None, None).unwrap();
        assert_ne!(a.secret, b.secret);
        assert_ne!(a.credential_id, b.credential_id);

        // Each secret resolves to its own credential.
        let pa = store.authenticate(&a.secret).unwrap().unwrap();
        let pb = store.authenticate(&b.secret).unwrap().unwrap();
        assert_eq!(pa.credential_id, a.credential_id);
        assert_eq!(pb.credential_id, b.credential_id);
    }

    #[test]
    fn test_corrupt_stored_role_is_an_error() {
        let store = test_store();
        let issued = store
            .issue("alice", Role::JobWriter, None, None, None)
            .unwrap();

        store
            .db
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE credentials SET role = 'superuser' WHERE credential_id = ?1",
                    [&issued.credential_id],
                )?;
                Ok(())
            })
            .unwrap();

        assert!(matches!(
            store.get(&issued.credential_id),
            Err(AuthError::MalformedRole(r)) if r == "superuser"
        ));
        assert!(matches!(
            store.authenticate(&issued.secret),
            Err(AuthError::MalformedRole(_))
        ));
    }

    #[test]
    fn test_usage_audit_trail() {
        let store = test_store();
        let issued = store
            .issue("alice", Role::JobWriter, None, None, None)
            .unwrap();

        store
            .record_usage(&issued.credential_id, "/jobs", "POST", 200, Some(40))
            .unwrap();
        store
            .record_usage(&issued.credential_id, "/jobs", "GET", 200, Some(5))
            .unwrap();

        let history = store.usage_history(&issued.credential_id, 7).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].status_code, 200);
    }

    #[test]
    fn test_created_by_is_recorded() {
        let store = test_store();
        let issued = store
            .issue("bob", Role::JobReader, None, Some("creator-cred"), None)
            .unwrap();

        let cred = store.get(&issued.credential_id).unwrap().unwrap();
        assert_eq!(cred.created_by.as_deref(), Some("creator-cred"));
        assert_eq!(cred.role, Role::JobReader);
    }
}

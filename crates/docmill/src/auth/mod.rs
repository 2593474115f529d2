//! Authentication and authorization: roles, principals, the credential
//! store, the permission table, and rate limiting.

use chrono::{DateTime, Utc};

pub mod permissions;
pub mod rate_limit;
pub mod store;

pub use permissions::Permission;
pub use rate_limit::{
    CounterBackend, FailMode, InMemoryRateLimiter, InProcessCounterStore, RateLimiter,
    SharedRateLimiter,
};
pub use store::{AuthError, CredentialStore, IssuedCredential, UsageRecord};

/// Roles ordered by privilege. Privilege is role-shaped rather than
/// strictly linear: a JobWriter may grant access on its own jobs, which
/// a JobManager may not (see [`permissions`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Admin,
    JobManager,
    JobWriter,
    JobReader,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::JobManager => "job_manager",
            Role::JobWriter => "job_writer",
            Role::JobReader => "job_reader",
        }
    }

    /// Parses a role name. Returns `None` for anything outside the
    /// four known roles.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Role::Admin),
            "job_manager" => Some(Role::JobManager),
            "job_writer" => Some(Role::JobWriter),
            "job_reader" => Some(Role::JobReader),
            _ => None,
        }
    }

    /// Default rate-limit quota (requests per minute) for credentials
    /// issued without an explicit limit.
    pub fn default_rate_limit(self) -> u32 {
        match self {
            Role::Admin => 1000,
            Role::JobManager => 500,
            Role::JobWriter => 100,
            Role::JobReader => 50,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An authenticated identity, derived fresh from a credential on every
/// authentication. Never persisted.
#[derive(Debug, Clone)]
pub struct Principal {
    /// The credential this principal was derived from.
    pub credential_id: String,
    /// Human-readable principal identifier (not unique per credential).
    pub principal_id: String,
    pub role: Role,
    /// Requests per minute.
    pub rate_limit: u32,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

/// A stored credential, as returned by listing/lookup. Carries the hash
/// only internally; the plaintext secret exists exactly once, at issue
/// time.
#[derive(Debug, Clone)]
pub struct Credential {
    pub credential_id: String,
    pub principal_id: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub rate_limit: u32,
    pub created_by: Option<String>,
}

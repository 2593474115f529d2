//! The authenticated service surface.
//!
//! Every operation follows the same gate order: authenticate the
//! secret, charge the rate limiter, check the role's permission, then
//! act. A missing job is reported as not-found before the access check
//! runs; job IDs are not secrets, and guessing one reveals nothing but
//! its existence.

use std::sync::Arc;

use thiserror::Error;

use crate::auth::{
    AuthError, Credential, CredentialStore, IssuedCredential, Permission, Principal, RateLimiter,
    Role, UsageRecord,
};
use crate::jobs::{Job, JobOptions, JobQueue, JobStatus, QueueError};
use crate::validate::{self, ValidationError};

/// How long a rate-limited caller should wait before retrying.
const RETRY_AFTER_SECS: u64 = 60;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Invalid or expired credentials")]
    Authentication,

    #[error("Permission denied: {0}")]
    Authorization(String),

    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Credential not found: {0}")]
    CredentialNotFound(String),

    #[error("Job {0} is already in a terminal state")]
    Conflict(String),

    #[error("Job {0} has no result available")]
    ResultUnavailable(String),

    #[error(transparent)]
    Auth(AuthError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl From<AuthError> for ServiceError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::AdminIssuance => {
                ServiceError::Authorization("admin credentials cannot be issued here".to_string())
            }
            other => ServiceError::Auth(other),
        }
    }
}

/// A page of job listings.
#[derive(Debug)]
pub struct JobListing {
    pub jobs: Vec<Job>,
    pub total: u64,
}

pub struct ConversionService {
    store: CredentialStore,
    queue: JobQueue,
    limiter: Arc<dyn RateLimiter>,
    max_source_bytes: u64,
}

impl ConversionService {
    pub fn new(
        store: CredentialStore,
        queue: JobQueue,
        limiter: Arc<dyn RateLimiter>,
        max_source_bytes: u64,
    ) -> Self {
        Self {
            store,
            queue,
            limiter,
            max_source_bytes,
        }
    }

    /// Authenticates, charges the rate limiter, and checks that the
    /// role holds at least one of `permissions`.
    fn authorize(
        &self,
        secret: &str,
        permissions: &[Permission],
    ) -> Result<Principal, ServiceError> {
        let principal = self
            .store
            .authenticate(secret)?
            .ok_or(ServiceError::Authentication)?;

        if !self.limiter.admit(&principal) {
            return Err(ServiceError::RateLimited {
                retry_after_secs: RETRY_AFTER_SECS,
            });
        }

        if !permissions.iter().any(|p| principal.role.allows(*p)) {
            tracing::debug!(
                principal_id = %principal.principal_id,
                role = %principal.role,
                ?permissions,
                "permission denied"
            );
            return Err(ServiceError::Authorization(format!(
                "role {} cannot perform this operation",
                principal.role
            )));
        }

        Ok(principal)
    }

    // Job surface.

    /// Validates the source document and enqueues a conversion job.
    pub fn submit_job(
        &self,
        secret: &str,
        source_path: &str,
        options: JobOptions,
    ) -> Result<Job, ServiceError> {
        let principal = self.authorize(secret, &[Permission::CreateJob])?;
        validate::validate_source(source_path.as_ref(), self.max_source_bytes)?;
        Ok(self
            .queue
            .create(&principal.principal_id, source_path, options)?)
    }

    /// Fetches a job the caller owns, was granted access to, or may
    /// view globally.
    pub fn get_job(&self, secret: &str, job_id: &str) -> Result<Job, ServiceError> {
        let principal =
            self.authorize(secret, &[Permission::ViewOwnJobs, Permission::ViewAllJobs])?;
        self.readable_job(&principal, job_id)
    }

    /// Reads the rendered result of a COMPLETED job.
    pub fn fetch_result(&self, secret: &str, job_id: &str) -> Result<String, ServiceError> {
        let principal =
            self.authorize(secret, &[Permission::ViewOwnJobs, Permission::ViewAllJobs])?;
        let job = self.readable_job(&principal, job_id)?;

        if job.status != JobStatus::Completed {
            return Err(ServiceError::ResultUnavailable(job_id.to_string()));
        }
        let result_path = job
            .result_path
            .ok_or_else(|| ServiceError::ResultUnavailable(job_id.to_string()))?;
        std::fs::read_to_string(&result_path).map_err(|e| {
            tracing::warn!(job_id = %job_id, path = %result_path, error = %e, "result file unreadable");
            ServiceError::ResultUnavailable(job_id.to_string())
        })
    }

    fn readable_job(&self, principal: &Principal, job_id: &str) -> Result<Job, ServiceError> {
        let job = self
            .queue
            .get(job_id)?
            .ok_or_else(|| ServiceError::NotFound(job_id.to_string()))?;

        if principal.role.allows(Permission::ViewAllJobs)
            || self.queue.has_access(job_id, &principal.principal_id)?
        {
            Ok(job)
        } else {
            Err(ServiceError::Authorization(format!(
                "no access to job {}",
                job_id
            )))
        }
    }

    /// Lists jobs. Callers without the view-all permission see only
    /// jobs they own; grants do not surface in listings.
    pub fn list_jobs(
        &self,
        secret: &str,
        status: Option<JobStatus>,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> Result<JobListing, ServiceError> {
        let principal =
            self.authorize(secret, &[Permission::ViewOwnJobs, Permission::ViewAllJobs])?;

        let owner_filter = if principal.role.allows(Permission::ViewAllJobs) {
            None
        } else {
            Some(principal.principal_id.as_str())
        };
        let (jobs, total) = self.queue.list(status, owner_filter, limit, offset)?;
        Ok(JobListing { jobs, total })
    }

    /// Cancels a PENDING or RUNNING job.
    pub fn cancel_job(&self, secret: &str, job_id: &str) -> Result<Job, ServiceError> {
        let principal =
            self.authorize(secret, &[Permission::StopOwnJobs, Permission::StopAllJobs])?;

        let job = self
            .queue
            .get(job_id)?
            .ok_or_else(|| ServiceError::NotFound(job_id.to_string()))?;
        // Grants confer read access only; cancelling stays with the
        // owner unless the role may stop any job.
        if !principal.role.allows(Permission::StopAllJobs)
            && job.owner_id != principal.principal_id
        {
            return Err(ServiceError::Authorization(format!(
                "no access to job {}",
                job_id
            )));
        }

        if !self.queue.cancel(job_id)? {
            return Err(ServiceError::Conflict(job_id.to_string()));
        }
        self.queue
            .get(job_id)?
            .ok_or_else(|| ServiceError::NotFound(job_id.to_string()))
    }

    /// Sets or clears the advisory throttle flag on a job.
    pub fn throttle_job(
        &self,
        secret: &str,
        job_id: &str,
        throttled: bool,
    ) -> Result<Job, ServiceError> {
        let principal = self.authorize(secret, &[Permission::ThrottleJobs])?;

        let updated = self.queue.set_throttle(
            job_id,
            throttled,
            throttled.then_some(principal.credential_id.as_str()),
        )?;
        if !updated {
            return Err(ServiceError::NotFound(job_id.to_string()));
        }
        self.queue
            .get(job_id)?
            .ok_or_else(|| ServiceError::NotFound(job_id.to_string()))
    }

    /// Grants another principal read access to one of the caller's
    /// jobs. Idempotent.
    pub fn grant_job_access(
        &self,
        secret: &str,
        job_id: &str,
        grantee_id: &str,
    ) -> Result<(), ServiceError> {
        let principal = self.authorize(secret, &[Permission::GrantJobAccess])?;

        let job = self
            .queue
            .get(job_id)?
            .ok_or_else(|| ServiceError::NotFound(job_id.to_string()))?;
        // Only the owner may share a job; holding a grant does not
        // carry the right to re-grant.
        let may_grant =
            principal.role == Role::Admin || job.owner_id == principal.principal_id;
        if !may_grant {
            return Err(ServiceError::Authorization(format!(
                "no access to job {}",
                job_id
            )));
        }

        self.queue
            .grant_access(job_id, grantee_id, &principal.principal_id)?;
        Ok(())
    }

    // Credential surface.

    /// Issues a credential for a non-admin role. Admin credentials
    /// only exist through the out-of-band bootstrap path, regardless
    /// of the caller's permissions.
    pub fn issue_credential(
        &self,
        secret: &str,
        principal_id: &str,
        role: Role,
        ttl_days: Option<i64>,
        rate_limit: Option<u32>,
    ) -> Result<IssuedCredential, ServiceError> {
        let caller = self.authorize(secret, &[Permission::CreateToken])?;
        Ok(self.store.issue(
            principal_id,
            role,
            ttl_days,
            Some(&caller.credential_id),
            rate_limit,
        )?)
    }

    pub fn list_credentials(&self, secret: &str) -> Result<Vec<Credential>, ServiceError> {
        self.authorize(secret, &[Permission::ViewTokens])?;
        Ok(self.store.list()?)
    }

    pub fn revoke_credential(&self, secret: &str, credential_id: &str) -> Result<(), ServiceError> {
        self.authorize(secret, &[Permission::RevokeToken])?;
        if !self.store.revoke(credential_id)? {
            return Err(ServiceError::CredentialNotFound(credential_id.to_string()));
        }
        Ok(())
    }

    pub fn set_credential_active(
        &self,
        secret: &str,
        credential_id: &str,
        active: bool,
    ) -> Result<(), ServiceError> {
        self.authorize(secret, &[Permission::ModifyToken])?;
        if !self.store.set_active(credential_id, active)? {
            return Err(ServiceError::CredentialNotFound(credential_id.to_string()));
        }
        Ok(())
    }

    pub fn set_credential_rate_limit(
        &self,
        secret: &str,
        credential_id: &str,
        rate_limit: u32,
    ) -> Result<(), ServiceError> {
        self.authorize(secret, &[Permission::ModifyToken])?;
        if !self.store.set_rate_limit(credential_id, rate_limit)? {
            return Err(ServiceError::CredentialNotFound(credential_id.to_string()));
        }
        Ok(())
    }

    pub fn usage_history(
        &self,
        secret: &str,
        credential_id: &str,
        days: i64,
    ) -> Result<Vec<UsageRecord>, ServiceError> {
        self.authorize(secret, &[Permission::ViewTokenUsage])?;
        if self.store.get(credential_id)?.is_none() {
            return Err(ServiceError::CredentialNotFound(credential_id.to_string()));
        }
        Ok(self.store.usage_history(credential_id, days)?)
    }

    /// Appends a usage audit record. Called by the transport layer
    /// after each request; not itself gated.
    pub fn record_usage(
        &self,
        credential_id: &str,
        endpoint: &str,
        method: &str,
        status_code: u16,
        latency_ms: Option<u64>,
    ) -> Result<(), ServiceError> {
        Ok(self
            .store
            .record_usage(credential_id, endpoint, method, status_code, latency_ms)?)
    }
}

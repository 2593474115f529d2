//! docmill: multi-tenant document conversion service core.
//!
//! Jobs move through a persistent SQLite-backed queue and are executed
//! by a background worker that runs the PDF engines in a resource
//! limited helper process. Access is mediated by hashed credentials
//! with role-based permissions and per-credential rate limits.
//!
//! [`service::ConversionService`] is the front door; everything else
//! is the machinery behind it.

pub mod auth;
pub mod config;
pub mod db;
pub mod extract;
pub mod format;
pub mod jobs;
pub mod sandbox;
pub mod service;
pub mod validate;

pub use auth::{CredentialStore, Permission, Principal, Role};
pub use config::{Config, ConfigError};
pub use db::Database;
pub use extract::{EngineChoice, Extraction};
pub use format::OutputFormat;
pub use jobs::{Job, JobOptions, JobQueue, JobStatus, JobWorker};
pub use sandbox::{ResourceLimits, Sandbox};
pub use service::{ConversionService, ServiceError};

//! Sandboxed extraction: runs the engines in a separate, resource
//! limited OS process.
//!
//! Document parsers face hostile input, so extraction never happens in
//! the service process. The `docmill-sandbox` helper binary receives a
//! JSON [`SandboxRequest`] on stdin, runs the requested engine, and
//! answers with a JSON [`SandboxResponse`] on stdout. The parent
//! applies address-space and CPU rlimits before exec and enforces a
//! wall-clock deadline with a forced kill. Engine failures come back
//! as a structured error with exit code 0; a nonzero exit means the
//! helper itself died (rlimit kill, panic, signal).

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::extract::{EngineChoice, Extraction};

/// Environment override for the helper binary location.
pub const HELPER_ENV: &str = "DOCMILL_SANDBOX_BIN";

const HELPER_NAME: &str = "docmill-sandbox";
const WAIT_POLL: Duration = Duration::from_millis(25);

/// Resource limits applied to the helper process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Address-space cap in megabytes (RLIMIT_AS).
    pub memory_limit_mb: u64,
    /// Wall-clock deadline enforced by the parent.
    pub timeout: Duration,
    /// Optional CPU-seconds cap (RLIMIT_CPU).
    pub cpu_limit_secs: Option<u64>,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_limit_mb: 512,
            timeout: Duration::from_secs(120),
            cpu_limit_secs: None,
        }
    }
}

/// The request the parent writes to the helper's stdin.
#[derive(Debug, Serialize, Deserialize)]
pub struct SandboxRequest {
    pub source_path: PathBuf,
    pub engine: EngineChoice,
    /// Scratch directory owned (and cleaned up) by the parent.
    pub work_dir: PathBuf,
}

/// The response the helper writes to stdout.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SandboxResponse {
    Ok { extraction: Extraction },
    Err { message: String },
}

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Failed to spawn sandbox helper {helper}: {source}")]
    Spawn {
        helper: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Extraction exceeded the {}s deadline", timeout.as_secs())]
    Timeout { timeout: Duration },

    #[error("Sandbox helper crashed ({status}): {stderr}")]
    Crashed { status: String, stderr: String },

    #[error("Extraction failed: {0}")]
    Extraction(String),

    #[error("Sandbox protocol violation: {0}")]
    Protocol(String),

    #[error("Sandbox I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Handle for running extractions out of process.
#[derive(Debug, Clone)]
pub struct Sandbox {
    helper: PathBuf,
    limits: ResourceLimits,
}

impl Sandbox {
    pub fn new(limits: ResourceLimits) -> Result<Self, SandboxError> {
        Ok(Self {
            helper: default_helper_path()?,
            limits,
        })
    }

    /// Uses an explicit helper binary instead of the discovered one.
    pub fn with_helper(helper: PathBuf, limits: ResourceLimits) -> Self {
        Self { helper, limits }
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    /// Runs an engine over `source` inside the helper process.
    pub fn extract(
        &self,
        source: &Path,
        engine: EngineChoice,
    ) -> Result<Extraction, SandboxError> {
        let work_dir = tempfile::tempdir()?;
        let request = SandboxRequest {
            source_path: source.to_path_buf(),
            engine,
            work_dir: work_dir.path().to_path_buf(),
        };

        let span = tracing::info_span!(
            "sandbox.extract",
            source = %source.display(),
            engine = %engine,
        );
        let _guard = span.enter();
        let started = Instant::now();

        let mut command = Command::new(&self.helper);
        command
            .current_dir(work_dir.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        apply_rlimits(&mut command, &self.limits);

        let mut child = command.spawn().map_err(|source| SandboxError::Spawn {
            helper: self.helper.display().to_string(),
            source,
        })?;

        // stdin is written and closed before the deadline wait so the
        // helper never blocks on a half-sent request.
        let request_json = serde_json::to_vec(&request)
            .map_err(|e| SandboxError::Protocol(e.to_string()))?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&request_json)?;
        }

        // Drain both pipes on threads; a full pipe would otherwise
        // deadlock a chatty helper against our wait loop.
        let stdout_handle = drain_pipe(child.stdout.take());
        let stderr_handle = drain_pipe(child.stderr.take());

        let status = match wait_with_deadline(&mut child, self.limits.timeout) {
            Ok(status) => status,
            Err(timeout) => {
                tracing::warn!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "killing sandbox helper after deadline"
                );
                let _ = child.kill();
                let _ = child.wait();
                return Err(SandboxError::Timeout { timeout });
            }
        };

        let stdout = join_pipe(stdout_handle);
        let stderr = join_pipe(stderr_handle);

        if !status.success() {
            return Err(SandboxError::Crashed {
                status: status.to_string(),
                stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
            });
        }

        let response: SandboxResponse = serde_json::from_slice(&stdout)
            .map_err(|e| SandboxError::Protocol(format!("unreadable response: {}", e)))?;
        match response {
            SandboxResponse::Ok { extraction } => {
                tracing::info!(
                    pages = extraction.pages.len(),
                    engine = %extraction.engine,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "extraction finished"
                );
                Ok(extraction)
            }
            SandboxResponse::Err { message } => Err(SandboxError::Extraction(message)),
        }
    }
}

/// Resolves the helper next to the current executable unless the
/// environment overrides it.
pub fn default_helper_path() -> Result<PathBuf, SandboxError> {
    if let Ok(path) = std::env::var(HELPER_ENV) {
        return Ok(PathBuf::from(path));
    }
    let exe = std::env::current_exe()?;
    let dir = exe.parent().ok_or_else(|| {
        SandboxError::Protocol("current executable has no parent directory".to_string())
    })?;
    Ok(dir.join(HELPER_NAME))
}

#[cfg(unix)]
fn apply_rlimits(command: &mut Command, limits: &ResourceLimits) {
    use std::os::unix::process::CommandExt;

    let memory_bytes = limits.memory_limit_mb * 1024 * 1024;
    let cpu_secs = limits.cpu_limit_secs;
    // pre_exec runs after fork, before exec, in the child.
    unsafe {
        command.pre_exec(move || {
            let mem = libc::rlimit {
                rlim_cur: memory_bytes,
                rlim_max: memory_bytes,
            };
            if libc::setrlimit(libc::RLIMIT_AS, &mem) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            if let Some(secs) = cpu_secs {
                let cpu = libc::rlimit {
                    rlim_cur: secs,
                    rlim_max: secs,
                };
                if libc::setrlimit(libc::RLIMIT_CPU, &cpu) != 0 {
                    return Err(std::io::Error::last_os_error());
                }
            }
            Ok(())
        });
    }
}

#[cfg(not(unix))]
fn apply_rlimits(_command: &mut Command, _limits: &ResourceLimits) {
    // Only the wall-clock deadline applies off unix.
}

fn drain_pipe<R: Read + Send + 'static>(
    pipe: Option<R>,
) -> Option<std::thread::JoinHandle<Vec<u8>>> {
    pipe.map(|mut reader| {
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = reader.read_to_end(&mut buf);
            buf
        })
    })
}

fn join_pipe(handle: Option<std::thread::JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

/// Waits for the child or returns `Err(timeout)` once the deadline
/// passes. The caller is responsible for killing a timed-out child.
fn wait_with_deadline(child: &mut Child, timeout: Duration) -> Result<ExitStatus, Duration> {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) => {}
            Err(_) => {}
        }
        if Instant::now() >= deadline {
            return Err(timeout);
        }
        std::thread::sleep(WAIT_POLL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_wait_with_deadline_returns_exit_status() {
        let mut child = Command::new("true").spawn().unwrap();
        let status = wait_with_deadline(&mut child, Duration::from_secs(5)).unwrap();
        assert!(status.success());
    }

    #[cfg(unix)]
    #[test]
    fn test_wait_with_deadline_times_out() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        let started = Instant::now();
        let result = wait_with_deadline(&mut child, Duration::from_millis(200));
        assert!(result.is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
        child.kill().unwrap();
        child.wait().unwrap();
    }

    #[test]
    fn test_spawn_failure_names_helper() {
        let sandbox = Sandbox::with_helper(
            PathBuf::from("/nonexistent/docmill-sandbox"),
            ResourceLimits::default(),
        );
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.pdf");
        std::fs::write(&source, b"%PDF-1.5").unwrap();

        match sandbox.extract(&source, EngineChoice::Auto) {
            Err(SandboxError::Spawn { helper, .. }) => {
                assert!(helper.contains("nonexistent"));
            }
            other => panic!("expected spawn error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_response_serde() {
        let json = r#"{"status":"err","message":"no text"}"#;
        match serde_json::from_str::<SandboxResponse>(json).unwrap() {
            SandboxResponse::Err { message } => assert_eq!(message, "no text"),
            _ => panic!("expected error response"),
        }
    }
}

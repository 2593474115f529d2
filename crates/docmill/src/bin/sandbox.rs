//! Sandbox helper: runs one extraction per invocation.
//!
//! Reads a `SandboxRequest` as JSON from stdin, runs the requested
//! engine, and writes a `SandboxResponse` as JSON to stdout. Engine
//! failures are reported in the response with exit code 0; a nonzero
//! exit is reserved for the helper itself dying, which the parent
//! treats as a crash. Resource limits are already applied by the
//! parent before exec; all this binary does is extract.

use std::io::{Read, Write};
use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

use docmill::extract::{self, Extraction};
use docmill::sandbox::{SandboxRequest, SandboxResponse};

fn main() -> ExitCode {
    init_tracing();

    let response = match run() {
        Ok(extraction) => SandboxResponse::Ok { extraction },
        Err(message) => {
            tracing::warn!(error = %message, "extraction failed");
            SandboxResponse::Err { message }
        }
    };

    let mut stdout = std::io::stdout().lock();
    match serde_json::to_vec(&response) {
        Ok(bytes) => {
            if stdout.write_all(&bytes).and_then(|()| stdout.flush()).is_err() {
                // Parent is gone; nothing left to report to.
                return ExitCode::FAILURE;
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to encode response");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<Extraction, String> {
    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .map_err(|e| format!("failed to read request: {}", e))?;
    let request: SandboxRequest =
        serde_json::from_str(&input).map_err(|e| format!("malformed request: {}", e))?;

    if !request.source_path.is_file() {
        return Err(format!(
            "source does not exist: {}",
            request.source_path.display()
        ));
    }

    tracing::info!(
        source = %request.source_path.display(),
        engine = %request.engine,
        "starting extraction"
    );

    let extractor = extract::build(request.engine);
    extractor
        .extract(&request.source_path)
        .map_err(|e| e.to_string())
}

/// Diagnostics go to stderr; stdout carries only the response. The
/// `log` records from the database layer are bridged into tracing.
fn init_tracing() {
    let _ = tracing_log::LogTracer::init();
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

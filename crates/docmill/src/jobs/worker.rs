//! Background worker draining the job queue.
//!
//! One worker thread polls for the oldest PENDING non-throttled job,
//! claims it, runs the extraction in the sandbox, renders the result,
//! and records the terminal status. The claim goes through the guarded
//! RUNNING transition, so a job cancelled between poll and claim is
//! simply skipped.
//!
//! Known limitation: a worker that dies mid-job leaves that job in
//! RUNNING forever. There is no lease or heartbeat; an operator
//! restarting the service must cancel stranded RUNNING jobs by hand.

use std::path::PathBuf;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use crate::format;
use crate::sandbox::{Sandbox, SandboxError};

use super::{Job, JobQueue};

pub struct JobWorker {
    queue: JobQueue,
    sandbox: Sandbox,
    results_dir: PathBuf,
    poll_interval: Duration,
}

/// Handle to a running worker thread. Dropping it without calling
/// [`stop`](Self::stop) detaches the thread.
pub struct WorkerHandle {
    stop_tx: Sender<()>,
    thread: std::thread::JoinHandle<()>,
}

impl WorkerHandle {
    /// Signals shutdown and waits for the current job to finish.
    pub fn stop(self) {
        let _ = self.stop_tx.send(());
        let _ = self.thread.join();
    }
}

impl JobWorker {
    pub fn new(
        queue: JobQueue,
        sandbox: Sandbox,
        results_dir: PathBuf,
        poll_interval: Duration,
    ) -> Self {
        Self {
            queue,
            sandbox,
            results_dir,
            poll_interval,
        }
    }

    /// Spawns the worker thread.
    pub fn start(self) -> std::io::Result<WorkerHandle> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let thread = std::thread::Builder::new()
            .name("docmill-worker".to_string())
            .spawn(move || self.run(stop_rx))?;
        Ok(WorkerHandle { stop_tx, thread })
    }

    fn run(&self, stop_rx: Receiver<()>) {
        log::info!(
            "worker started, polling every {}ms",
            self.poll_interval.as_millis()
        );
        loop {
            // Drain the backlog before sleeping again.
            while self.tick() {
                if let Ok(()) = stop_rx.try_recv() {
                    log::info!("worker stopping");
                    return;
                }
            }

            match stop_rx.recv_timeout(self.poll_interval) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    log::info!("worker stopping");
                    return;
                }
                Err(RecvTimeoutError::Timeout) => {}
            }
        }
    }

    /// Processes at most one job. Returns true when a job was picked
    /// up, so the caller knows to poll again immediately.
    fn tick(&self) -> bool {
        let job = match self.queue.next_pending() {
            Ok(Some(job)) => job,
            Ok(None) => return false,
            Err(e) => {
                log::error!("worker poll failed: {}", e);
                return false;
            }
        };

        match self.queue.mark_running(&job.job_id) {
            Ok(true) => {}
            Ok(false) => {
                // Cancelled between poll and claim.
                log::info!("job {} no longer pending, skipping", job.job_id);
                return true;
            }
            Err(e) => {
                log::error!("failed to claim job {}: {}", job.job_id, e);
                return false;
            }
        }

        self.process(job);
        true
    }

    fn process(&self, job: Job) {
        let span = tracing::info_span!("worker.process", job_id = %job.job_id);
        let _guard = span.enter();

        let extraction = match self
            .sandbox
            .extract(job.source_path.as_ref(), job.options.engine)
        {
            Ok(extraction) => extraction,
            Err(e) => {
                // Helper-level failures point at the sandbox setup or
                // resource limits; engine-level failures point at the
                // document. Keep the log lines distinguishable.
                match &e {
                    SandboxError::Extraction(message) => {
                        tracing::info!(job_id = %job.job_id, error = %message, "document failed extraction");
                    }
                    other => {
                        tracing::error!(job_id = %job.job_id, error = %other, "sandbox failure");
                    }
                }
                self.finish_failed(&job, &e.to_string());
                return;
            }
        };

        let rendered = match format::render(
            &extraction,
            job.options.output_format,
            job.options.include_metadata,
        ) {
            Ok(rendered) => rendered,
            Err(e) => {
                tracing::error!(job_id = %job.job_id, error = %e, "result rendering failed");
                self.finish_failed(&job, &e.to_string());
                return;
            }
        };

        let result_path = self
            .results_dir
            .join(format!("{}.{}", job.job_id, job.options.output_format.extension()));
        if let Err(e) = std::fs::create_dir_all(&self.results_dir)
            .and_then(|()| std::fs::write(&result_path, rendered))
        {
            tracing::error!(job_id = %job.job_id, error = %e, "failed to write result file");
            self.finish_failed(&job, &format!("failed to write result: {}", e));
            return;
        }

        match self.queue.mark_completed(&job.job_id, &result_path.to_string_lossy()) {
            Ok(true) => {
                tracing::info!(
                    job_id = %job.job_id,
                    result = %result_path.display(),
                    "job completed"
                );
            }
            Ok(false) => {
                // Cancelled while running; the cancel wins and the
                // result file is best-effort garbage collected.
                tracing::info!(job_id = %job.job_id, "job cancelled during processing");
                let _ = std::fs::remove_file(&result_path);
            }
            Err(e) => {
                log::error!("failed to record completion of job {}: {}", job.job_id, e);
            }
        }
    }

    fn finish_failed(&self, job: &Job, message: &str) {
        match self.queue.mark_failed(&job.job_id, message) {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!(job_id = %job.job_id, "job cancelled during processing");
            }
            Err(e) => {
                log::error!("failed to record failure of job {}: {}", job.job_id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::jobs::{JobOptions, JobStatus};
    use crate::sandbox::ResourceLimits;
    use std::path::PathBuf;
    use std::time::Instant;

    fn wait_for_terminal(queue: &JobQueue, job_id: &str) -> JobStatus {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let status = queue.get(job_id).unwrap().unwrap().status;
            if status.is_terminal() {
                return status;
            }
            assert!(Instant::now() < deadline, "job never reached a terminal state");
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    #[test]
    fn test_worker_stops_promptly_on_empty_queue() {
        let queue = JobQueue::new(Database::open_in_memory().unwrap());
        let sandbox = Sandbox::with_helper(
            PathBuf::from("/nonexistent/helper"),
            ResourceLimits::default(),
        );
        let dir = tempfile::tempdir().unwrap();
        let worker = JobWorker::new(
            queue,
            sandbox,
            dir.path().to_path_buf(),
            Duration::from_secs(60),
        );

        let handle = worker.start().unwrap();
        let started = Instant::now();
        handle.stop();
        // Shutdown must not wait out the poll interval.
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_sandbox_failure_marks_job_failed() {
        let queue = JobQueue::new(Database::open_in_memory().unwrap());
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("doc.pdf");
        std::fs::write(&source, b"%PDF-1.5").unwrap();
        let job = queue
            .create("alice", &source.to_string_lossy(), JobOptions::default())
            .unwrap();

        // A helper that cannot be spawned exercises the failure path
        // without a real sandbox binary.
        let sandbox = Sandbox::with_helper(
            PathBuf::from("/nonexistent/helper"),
            ResourceLimits::default(),
        );
        let worker = JobWorker::new(
            queue.clone(),
            sandbox,
            dir.path().join("results"),
            Duration::from_millis(10),
        );

        let handle = worker.start().unwrap();
        let status = wait_for_terminal(&queue, &job.job_id);
        handle.stop();

        assert_eq!(status, JobStatus::Failed);
        let job = queue.get(&job.job_id).unwrap().unwrap();
        assert!(job.error_message.unwrap().contains("spawn"));
    }

    #[test]
    fn test_worker_skips_throttled_jobs() {
        let queue = JobQueue::new(Database::open_in_memory().unwrap());
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("doc.pdf");
        std::fs::write(&source, b"%PDF-1.5").unwrap();
        let job = queue
            .create("alice", &source.to_string_lossy(), JobOptions::default())
            .unwrap();
        queue.set_throttle(&job.job_id, true, Some("admin")).unwrap();

        let sandbox = Sandbox::with_helper(
            PathBuf::from("/nonexistent/helper"),
            ResourceLimits::default(),
        );
        let worker = JobWorker::new(
            queue.clone(),
            sandbox,
            dir.path().join("results"),
            Duration::from_millis(10),
        );

        let handle = worker.start().unwrap();
        std::thread::sleep(Duration::from_millis(200));
        handle.stop();

        // Untouched: still PENDING, never claimed.
        let job = queue.get(&job.job_id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.started_at.is_none());
    }
}

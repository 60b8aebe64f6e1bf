use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::config::Config;
use crate::domain::JobStatus;
use crate::pipeline::job_runner;
use crate::queue::JobQueue;
use crate::registry::{now_seconds, Registry};
use crate::worker::lease::JobLease;

/// Fixed-size pool of worker threads pulling job ids and running the
/// pipeline under a cross-process lease. Grounded on the teacher's
/// `spawn_worker`/`worker_loop`/`guarded_job_runner` in
/// `engine/worker/spawner.rs`: `thread::Builder` per worker, a panic
/// boundary that converts panics into job errors instead of killing
/// the worker thread, and a blocking queue wait (§4.2).
pub struct WorkerPool {
    shutdown: Arc<AtomicBool>,
    queue: Arc<JobQueue>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(config: Arc<Config>, registry: Arc<Registry>, queue: Arc<JobQueue>) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut handles = Vec::with_capacity(config.job_workers);
        for index in 0..config.job_workers {
            let config = config.clone();
            let registry = registry.clone();
            let queue = queue.clone();
            let shutdown = shutdown.clone();
            let handle = thread::Builder::new()
                .name(format!("stt-worker-{index}"))
                .spawn(move || worker_loop(&config, &registry, &queue, &shutdown))
                .expect("failed to spawn worker thread");
            handles.push(handle);
        }
        WorkerPool { shutdown, queue, handles }
    }

    /// Set the stop flag and wake every worker blocked on the queue's
    /// condvar so `join` observes shutdown promptly instead of waiting
    /// for the next push (§4.2, §9 drain-cleanly).
    pub fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.queue.wake_all();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(config: &Arc<Config>, registry: &Arc<Registry>, queue: &Arc<JobQueue>, shutdown: &Arc<AtomicBool>) {
    loop {
        let should_stop = || shutdown.load(Ordering::SeqCst);
        let Some(job_id) = queue.pop_blocking(&should_stop) else {
            return;
        };

        let Some(job) = registry.get(&job_id) else {
            continue;
        };
        if job.is_terminal() {
            continue;
        }
        if job.cancel_requested && job.status == JobStatus::Queued {
            registry.update(&job_id, |j| {
                j.status = JobStatus::Cancelled;
                j.progress = 100.0;
                j.finished_at = Some(now_seconds());
            });
            continue;
        }

        let lease = match JobLease::acquire(config, &job_id) {
            Ok(Some(lease)) => lease,
            Ok(None) => {
                tracing::info!(job_id = %job_id, "lease held by another worker, skipping");
                continue;
            }
            Err(err) => {
                tracing::warn!(job_id = %job_id, error = %err, "failed to acquire lease");
                continue;
            }
        };

        registry.update(&job_id, |j| {
            j.status = JobStatus::Running;
            j.started_at = Some(now_seconds());
        });

        let result = guarded_job_runner(|| job_runner::process_job(config, registry, &job_id));

        if let Err(reason) = result {
            registry.update(&job_id, |j| {
                j.status = JobStatus::Error;
                j.progress = 100.0;
                j.finished_at = Some(now_seconds());
                j.error = Some(crate::error::truncate_chars(&reason, Config::ERROR_PERSIST_MAX_CHARS));
            });
            registry.append_log(
                &job_id,
                &crate::error::truncate_chars(&reason, Config::ERROR_LOG_MAX_CHARS),
            );
        }

        lease.release();
        queue.wake_all();
    }
}

fn guarded_job_runner<F>(f: F) -> Result<(), String>
where
    F: FnOnce() -> anyhow::Result<()> + std::panic::UnwindSafe,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(format!("{err:#}")),
        Err(payload) => Err(format!("job panicked: {}", panic_payload_to_string(&*payload))),
    }
}

fn panic_payload_to_string(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "unknown panic payload".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guarded_job_runner_turns_panics_into_errors() {
        let result = guarded_job_runner(|| -> anyhow::Result<()> {
            panic!("boom");
        });
        let msg = result.expect_err("expected panic to be converted into error");
        assert!(msg.contains("job panicked: boom"), "got: {msg}");
    }

    #[test]
    fn guarded_job_runner_passes_through_ok() {
        let result = guarded_job_runner(|| -> anyhow::Result<()> { Ok(()) });
        assert!(result.is_ok());
    }
}

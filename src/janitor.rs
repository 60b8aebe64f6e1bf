//! Heartbeat watchdog + retention reaper on one ticking loop (§4.7).
//! Grounded on the original's `cleanup_loop`/`_delete_job_artifacts`:
//! per-id purge failures are logged and the loop continues rather than
//! aborting the whole tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::Config;
use crate::domain::JobStatus;
use crate::registry::{now_seconds, Registry};
use crate::store::ArtifactStore;
use crate::worker::lease::JobLease;

pub struct Janitor {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Janitor {
    pub fn spawn(config: Arc<Config>, registry: Arc<Registry>) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();
        let handle = thread::Builder::new()
            .name("stt-janitor".to_string())
            .spawn(move || run(config, registry, shutdown_clone))
            .expect("failed to spawn janitor thread");
        Janitor {
            shutdown,
            handle: Some(handle),
        }
    }

    pub fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run(config: Arc<Config>, registry: Arc<Registry>, shutdown: Arc<AtomicBool>) {
    let interval = Duration::from_secs(config.cleanup_interval_seconds);
    loop {
        thread::sleep(interval);
        tick(&config, &registry);
        if shutdown.load(Ordering::SeqCst) {
            return;
        }
    }
}

fn tick(config: &Config, registry: &Registry) {
    let now = now_seconds();
    for id in registry.all_ids() {
        let Some(job) = registry.get(&id) else {
            continue;
        };

        if matches!(job.status, JobStatus::Queued | JobStatus::Running)
            && now - job.last_heartbeat > config.orphan_retention_seconds as f64
        {
            tracing::warn!(job_id = %id, "heartbeat timeout, marking job errored");
            registry.update(&id, |j| {
                j.status = JobStatus::Error;
                j.progress = 100.0;
                j.error = Some("heartbeat timeout".to_string());
                j.finished_at = Some(now);
            });
            JobLease::force_release(config, &id);
            continue;
        }

        if should_purge(config, &job, now) {
            tracing::info!(job_id = %id, "purging job artifacts per retention policy");
            ArtifactStore::purge(config, &id, config.secure_delete_passes);
            registry.remove(&id);
        }
    }
}

fn should_purge(config: &Config, job: &crate::domain::JobRecord, now: f64) -> bool {
    match job.status {
        JobStatus::Done => {
            if config.auto_cleanup_after_download {
                if let Some(downloaded_at) = job.downloaded_at {
                    if now - downloaded_at >= config.download_grace_seconds as f64 {
                        return true;
                    }
                }
            }
            now - job.updated_at >= config.done_retention_seconds as f64
        }
        JobStatus::Error | JobStatus::Cancelled => now - job.updated_at >= config.error_retention_seconds as f64,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobPayload;
    use serde_json::Map;
    use tempfile::tempdir;

    fn test_config(root: &std::path::Path) -> Config {
        let mut config = Config::from_env();
        config.data_root = root.to_path_buf();
        config.orphan_retention_seconds = 10;
        config.done_retention_seconds = 10;
        config.error_retention_seconds = 10;
        config.auto_cleanup_after_download = false;
        config
    }

    fn payload() -> JobPayload {
        JobPayload {
            file_path: "/tmp/in.wav".to_string(),
            language: "auto".to_string(),
            model: "nova-2-general".to_string(),
            original_name: "in.wav".to_string(),
            options: Map::new(),
        }
    }

    #[test]
    fn stale_running_job_is_marked_errored() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        std::fs::create_dir_all(config.locks_dir()).unwrap();
        let registry = Registry::new();
        registry.init("job1".to_string(), payload());
        registry.update("job1", |j| {
            j.status = JobStatus::Running;
            j.last_heartbeat = now_seconds() - 1000.0;
        });

        tick(&config, &registry);

        let job = registry.get("job1").unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.error.as_deref(), Some("heartbeat timeout"));
    }

    #[test]
    fn done_job_past_retention_is_purged() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        std::fs::create_dir_all(config.meta_dir()).unwrap();
        let registry = Registry::new();
        registry.init("job1".to_string(), payload());
        registry.update("job1", |j| {
            j.status = JobStatus::Done;
            j.updated_at = now_seconds() - 1000.0;
        });

        tick(&config, &registry);

        assert!(!registry.exists("job1"));
    }

    #[test]
    fn fresh_done_job_is_not_purged() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let registry = Registry::new();
        registry.init("job1".to_string(), payload());
        registry.update("job1", |j| j.status = JobStatus::Done);

        tick(&config, &registry);

        assert!(registry.exists("job1"));
    }
}

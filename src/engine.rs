//! The `TranscodingEngine`-equivalent facade: boot, submit, status,
//! cancel, shutdown. Grounded on `ffui_core/engine/mod.rs`'s
//! `TranscodingEngine`/`Inner` split and boot sequence (load settings,
//! rehydrate, spawn background tasks).

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::Config;
use crate::domain::{JobPayload, JobRecord, JobStatus};
use crate::janitor::Janitor;
use crate::queue::JobQueue;
use crate::registry::flusher::Flusher;
use crate::registry::{now_seconds, Registry};
use crate::store::ArtifactStore;
use crate::worker::WorkerPool;

pub struct SubmitRequest {
    pub id: String,
    pub file_path: PathBuf,
    pub language: String,
    pub model: String,
    pub original_name: String,
    pub options: Map<String, Value>,
}

#[derive(Debug, Serialize)]
pub struct StatusView {
    pub ok: bool,
    pub status: JobStatus,
    pub progress: f64,
    pub logs: Vec<crate::domain::LogLine>,
    pub next_since: u64,
    pub download_url: Option<String>,
    pub error: Option<String>,
    pub cancel_requested: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthView {
    pub ok: bool,
    pub queued: usize,
    pub running: usize,
    pub workers: usize,
    pub segment_concurrency: usize,
}

/// Owns the registry, queue, and every background task; the only entry
/// point the HTTP adapter (or any other caller) uses to talk to the
/// core engine.
pub struct Engine {
    config: Arc<Config>,
    registry: Arc<Registry>,
    queue: Arc<JobQueue>,
    worker_pool: Option<WorkerPool>,
    flusher: Option<Flusher>,
    janitor: Option<Janitor>,
}

impl Engine {
    /// Boot sequence (§2, §4.2 bootstrap recovery): create the artifact
    /// store, rehydrate `meta/`, re-enqueue restartable jobs, then spawn
    /// the worker pool, flusher, and janitor.
    pub fn boot(config: Config) -> anyhow::Result<Self> {
        let config = Arc::new(config);
        ArtifactStore::new(&config)?;

        let registry = Arc::new(Registry::new());
        let restartable = registry.rehydrate_all(&config)?;

        let queue = Arc::new(JobQueue::new());
        for id in &restartable {
            registry.update(id, |j| j.status = JobStatus::Queued);
            queue.push(id.clone());
        }
        tracing::info!(count = restartable.len(), "re-enqueued jobs recovered from meta");

        let worker_pool = WorkerPool::spawn(config.clone(), registry.clone(), queue.clone());
        let flusher = Flusher::spawn(config.clone(), registry.clone());
        let janitor = Janitor::spawn(config.clone(), registry.clone());

        Ok(Engine {
            config,
            registry,
            queue,
            worker_pool: Some(worker_pool),
            flusher: Some(flusher),
            janitor: Some(janitor),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Mint a job id the caller will use for both the upload directory
    /// and the job record (§6.1, §8 invariant 7) — must be called
    /// before writing `uploads/<id>/<name>` so the two never diverge.
    pub fn new_job_id(&self) -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }

    /// Accept a new job under `request.id` (copy semantics are the
    /// caller's responsibility: the HTTP adapter has already written the
    /// upload to `uploads/<id>/<name>` under the same id before calling
    /// this). Returns the id back for convenience.
    pub fn submit(&self, request: SubmitRequest) -> String {
        let id = request.id;
        let payload = JobPayload {
            file_path: request.file_path.display().to_string(),
            language: request.language,
            model: request.model,
            original_name: request.original_name,
            options: request.options,
        };
        self.registry.init(id.clone(), payload);
        self.queue.push(id.clone());
        id
    }

    pub fn status(&self, id: &str, since_seq: u64) -> Option<StatusView> {
        let job = self.registry.get(id)?;
        let logs = job.logs_since(since_seq);
        let next_since = logs.last().map(|l| l.seq).unwrap_or(since_seq);
        let download_url = (job.status == JobStatus::Done).then(|| format!("/api/download/{id}"));
        Some(StatusView {
            ok: true,
            status: job.status,
            progress: job.progress,
            logs,
            next_since,
            download_url,
            error: job.error.clone(),
            cancel_requested: job.cancel_requested,
        })
    }

    pub fn cancel(&self, id: &str) -> bool {
        let existed = self.registry.set_cancel_requested(id);
        self.queue.wake_all();
        existed
    }

    pub fn mark_downloaded(&self, id: &str) {
        self.registry.set_downloaded(id);
    }

    pub fn download_path(&self, id: &str) -> Option<(PathBuf, String, JobRecord)> {
        let job = self.registry.get(id)?;
        if job.status != JobStatus::Done {
            return None;
        }
        let result_path = job.result_path.clone()?;
        let download_name = job.download_name.clone().unwrap_or_else(|| format!("{id}.srt"));
        Some((PathBuf::from(result_path), download_name, job))
    }

    pub fn health(&self) -> HealthView {
        let ids = self.registry.all_ids();
        let mut queued = 0usize;
        let mut running = 0usize;
        for id in ids {
            if let Some(job) = self.registry.get(&id) {
                match job.status {
                    JobStatus::Queued => queued += 1,
                    JobStatus::Running => running += 1,
                    _ => {}
                }
            }
        }
        HealthView {
            ok: true,
            queued,
            running,
            workers: self.config.job_workers,
            segment_concurrency: self.config.concurrency,
        }
    }

    /// Drain cleanly: stop accepting new background wakeups, join the
    /// worker pool, then the janitor, then the flusher last so its
    /// final flush-all captures every worker's last write (§9).
    pub fn shutdown(mut self) {
        if let Some(pool) = self.worker_pool.take() {
            pool.shutdown();
        }
        if let Some(janitor) = self.janitor.take() {
            janitor.shutdown();
        }
        if let Some(flusher) = self.flusher.take() {
            flusher.shutdown();
        }
    }
}

pub fn unix_now() -> f64 {
    now_seconds()
}

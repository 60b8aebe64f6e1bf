pub mod flusher;

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::Config;
use crate::domain::{JobPayload, JobRecord, JobStatus, LogLine};
use crate::store::ArtifactStore;
use crate::sync_ext::MutexExt;

/// In-memory job map plus the dirty set that tracks which records need
/// to be written to `meta/`. Mirrors the teacher's boot-time rehydrate
/// and single coarse lock (`ffui_core/engine/mod.rs`), generalized from
/// one sidecar snapshot file to per-id `meta/<id>.json` files.
pub struct Registry {
    jobs: Mutex<HashMap<String, JobRecord>>,
    dirty: Mutex<HashSet<String>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            jobs: Mutex::new(HashMap::new()),
            dirty: Mutex::new(HashSet::new()),
        }
    }

    /// Scan `meta/*.json` and load every record into memory. Called once
    /// at boot (§4.2 bootstrap recovery).
    pub fn rehydrate_all(&self, config: &Config) -> std::io::Result<Vec<String>> {
        let ids = ArtifactStore::list_meta_ids(config)?;
        let mut jobs = self.jobs.lock_unpoisoned();
        let mut restartable = Vec::new();
        for id in &ids {
            let Ok(bytes) = ArtifactStore::read_meta(config, id) else {
                continue;
            };
            let Ok(record) = serde_json::from_slice::<JobRecord>(&bytes) else {
                continue;
            };
            if matches!(record.status, JobStatus::Queued | JobStatus::Running) && !record.cancel_requested {
                restartable.push(id.clone());
            }
            jobs.insert(id.clone(), record);
        }
        Ok(restartable)
    }

    pub fn init(&self, id: String, payload: JobPayload) {
        let now = now_seconds();
        let record = JobRecord::new(id.clone(), payload, now);
        self.jobs.lock_unpoisoned().insert(id.clone(), record);
        self.mark_dirty(&id);
    }

    pub fn get(&self, id: &str) -> Option<JobRecord> {
        self.jobs.lock_unpoisoned().get(id).cloned()
    }

    pub fn exists(&self, id: &str) -> bool {
        self.jobs.lock_unpoisoned().contains_key(id)
    }

    /// Mutate a record under the registry lock. The closure must be O(1)
    /// and must not perform I/O (§5 locking discipline).
    pub fn update<F>(&self, id: &str, f: F)
    where
        F: FnOnce(&mut JobRecord),
    {
        let mut jobs = self.jobs.lock_unpoisoned();
        if let Some(job) = jobs.get_mut(id) {
            f(job);
            job.touch(now_seconds());
        }
        drop(jobs);
        self.mark_dirty(id);
    }

    pub fn append_log(&self, id: &str, msg: &str) {
        let now = now_seconds();
        let mut jobs = self.jobs.lock_unpoisoned();
        if let Some(job) = jobs.get_mut(id) {
            job.append_log(now, msg);
        }
        drop(jobs);
        self.mark_dirty(id);
    }

    pub fn logs_since(&self, id: &str, since_seq: u64) -> Vec<LogLine> {
        self.jobs
            .lock_unpoisoned()
            .get(id)
            .map(|job| job.logs_since(since_seq))
            .unwrap_or_default()
    }

    pub fn set_cancel_requested(&self, id: &str) -> bool {
        let mut jobs = self.jobs.lock_unpoisoned();
        let Some(job) = jobs.get_mut(id) else {
            return false;
        };
        job.cancel_requested = true;
        if job.status == JobStatus::Queued {
            job.status = JobStatus::Cancelled;
            job.progress = 100.0;
            job.finished_at = Some(now_seconds());
        }
        job.touch(now_seconds());
        drop(jobs);
        self.mark_dirty(id);
        true
    }

    pub fn set_downloaded(&self, id: &str) {
        let now = now_seconds();
        let mut jobs = self.jobs.lock_unpoisoned();
        if let Some(job) = jobs.get_mut(id) {
            job.downloaded_at = Some(now);
        }
        drop(jobs);
        self.mark_dirty(id);
    }

    pub fn mark_dirty(&self, id: &str) {
        self.dirty.lock_unpoisoned().insert(id.to_string());
    }

    /// Swap out the current dirty set, returning its contents.
    pub fn take_dirty(&self) -> Vec<String> {
        let mut dirty = self.dirty.lock_unpoisoned();
        dirty.drain().collect()
    }

    pub fn all_ids(&self) -> Vec<String> {
        self.jobs.lock_unpoisoned().keys().cloned().collect()
    }

    pub fn remove(&self, id: &str) {
        self.jobs.lock_unpoisoned().remove(id);
        self.dirty.lock_unpoisoned().remove(id);
    }

    pub fn snapshot(&self, id: &str) -> Option<JobRecord> {
        self.get(id)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

pub fn now_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobPayload;
    use serde_json::Map;

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
    fn init_marks_dirty_and_is_gettable() {
        let registry = Registry::new();
        registry.init("id1".to_string(), payload());
        assert!(registry.exists("id1"));
        assert_eq!(registry.take_dirty(), vec!["id1".to_string()]);
    }

    #[test]
    fn cancel_queued_job_transitions_immediately() {
        let registry = Registry::new();
        registry.init("id1".to_string(), payload());
        registry.set_cancel_requested("id1");
        let job = registry.get("id1").unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(job.progress, 100.0);
    }

    #[test]
    fn cancel_running_job_only_sets_flag() {
        let registry = Registry::new();
        registry.init("id1".to_string(), payload());
        registry.update("id1", |job| job.status = JobStatus::Running);
        registry.set_cancel_requested("id1");
        let job = registry.get("id1").unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.cancel_requested);
    }
}

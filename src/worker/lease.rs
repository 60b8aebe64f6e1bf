use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use crate::config::Config;

/// Cross-process exclusive lease over a job id, backed by presence of
/// `locks/<id>.lock` (§4.2, §5, §9). Creation uses `O_CREAT | O_EXCL`
/// so exactly one racing worker wins; release is by unlink. A stale
/// lease left by a crashed holder is reclaimed only by the heartbeat
/// watchdog (`janitor`), never by this type.
pub struct JobLease {
    path: PathBuf,
    released: bool,
}

impl JobLease {
    /// Attempt to acquire the lease for `id`. Returns `None` if another
    /// worker already holds it.
    pub fn acquire(config: &Config, id: &str) -> std::io::Result<Option<Self>> {
        let path = config.locks_dir().join(format!("{id}.lock"));
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                let _ = write!(file, "{}", std::process::id());
                Ok(Some(JobLease { path, released: false }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Force-remove a lease file without owning it, used only by the
    /// heartbeat watchdog when reclaiming a stale lease.
    pub fn force_release(config: &Config, id: &str) {
        let path = config.locks_dir().join(format!("{id}.lock"));
        let _ = std::fs::remove_file(path);
    }

    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if !self.released {
            let _ = std::fs::remove_file(&self.path);
            self.released = true;
        }
    }
}

impl Drop for JobLease {
    fn drop(&mut self) {
        self.release_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_config(root: &std::path::Path) -> Config {
        let mut config = Config::from_env();
        config.data_root = root.to_path_buf();
        std::fs::create_dir_all(config.locks_dir()).unwrap();
        config
    }

    #[test]
    fn second_acquire_fails_while_first_holds_lease() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let first = JobLease::acquire(&config, "job1").unwrap();
        assert!(first.is_some());
        let second = JobLease::acquire(&config, "job1").unwrap();
        assert!(second.is_none());
    }

    #[test]
    fn release_allows_reacquire() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let first = JobLease::acquire(&config, "job1").unwrap().unwrap();
        first.release();
        let second = JobLease::acquire(&config, "job1").unwrap();
        assert!(second.is_some());
    }

    #[test]
    fn drop_releases_lease() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        {
            let _lease = JobLease::acquire(&config, "job1").unwrap().unwrap();
        }
        let second = JobLease::acquire(&config, "job1").unwrap();
        assert!(second.is_some());
    }
}

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::StoreError;

/// Filesystem layout with five sibling roots, plus atomic text writes and
/// best-effort secure-delete (§6.1). Grounded on the teacher's atomic
/// tmp+rename pattern in `engine/state_persist.rs`, generalized to a
/// per-id `meta/<id>.json` layout and extended with upload/output/lock
/// roots per the original Python helpers.
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(config: &Config) -> std::io::Result<Self> {
        let store = ArtifactStore {
            root: config.data_root.clone(),
        };
        for dir in [
            config.uploads_dir(),
            config.tmp_dir(),
            config.outputs_dir(),
            config.meta_dir(),
            config.locks_dir(),
        ] {
            fs::create_dir_all(&dir)?;
        }
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write `contents` to `path` atomically: write to `<path>.tmp`, fsync,
    /// rename over the final path. A crash leaves the previous snapshot
    /// intact (§4.1).
    pub fn atomic_write(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        let tmp_path = tmp_sibling(path);
        {
            let mut file = File::create(&tmp_path).map_err(|e| io_err(&tmp_path, e))?;
            file.write_all(contents).map_err(|e| io_err(&tmp_path, e))?;
            file.sync_all().map_err(|e| io_err(&tmp_path, e))?;
        }
        fs::rename(&tmp_path, path).map_err(|e| io_err(path, e))?;
        Ok(())
    }

    pub fn write_meta(&self, config: &Config, id: &str, json: &[u8]) -> Result<(), StoreError> {
        Self::atomic_write(&config.meta_dir().join(format!("{id}.json")), json)
    }

    pub fn read_meta(config: &Config, id: &str) -> std::io::Result<Vec<u8>> {
        fs::read(config.meta_dir().join(format!("{id}.json")))
    }

    /// List all job ids with a persisted meta snapshot (used at boot).
    pub fn list_meta_ids(config: &Config) -> std::io::Result<Vec<String>> {
        let mut ids = Vec::new();
        let dir = config.meta_dir();
        if !dir.exists() {
            return Ok(ids);
        }
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        Ok(ids)
    }

    /// Delete all artifacts for a job: uploads/<id>/, tmp/<id>/,
    /// outputs/<id>.srt, meta/<id>.json, locks/<id>.lock (§4.7 purge).
    ///
    /// Regular files up to 256MB get `passes` overwrite passes of
    /// alternating zero/random bytes before unlink, best-effort only.
    pub fn purge(config: &Config, id: &str, passes: u32) {
        let dir_targets = [config.uploads_dir().join(id), config.tmp_dir().join(id)];
        for dir in dir_targets {
            if dir.is_dir() {
                secure_delete_tree(&dir, passes);
                let _ = fs::remove_dir_all(&dir);
            }
        }
        let file_targets = [
            config.outputs_dir().join(format!("{id}.srt")),
            config.meta_dir().join(format!("{id}.json")),
            config.locks_dir().join(format!("{id}.lock")),
        ];
        for file in file_targets {
            if file.is_file() {
                secure_delete_file(&file, passes);
                let _ = fs::remove_file(&file);
            }
        }
    }
}

const SECURE_DELETE_MAX_BYTES: u64 = 256 * 1024 * 1024;

fn secure_delete_tree(dir: &Path, passes: u32) {
    if passes == 0 {
        return;
    }
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            secure_delete_tree(&path, passes);
        } else if path.is_file() {
            secure_delete_file(&path, passes);
        }
    }
}

fn secure_delete_file(path: &Path, passes: u32) {
    if passes == 0 {
        return;
    }
    let Ok(meta) = fs::metadata(path) else {
        return;
    };
    if meta.len() > SECURE_DELETE_MAX_BYTES {
        return;
    }
    let len = meta.len() as usize;
    let Ok(mut file) = OpenOptions::new().write(true).open(path) else {
        return;
    };
    for pass in 0..passes {
        let buf = if pass % 2 == 0 {
            vec![0u8; len]
        } else {
            random_bytes(len)
        };
        use std::io::{Seek, SeekFrom};
        if file.seek(SeekFrom::Start(0)).is_err() {
            return;
        }
        let _ = file.write_all(&buf);
        let _ = file.sync_all();
    }
}

/// Non-cryptographic filler for secure-delete overwrite passes; this is a
/// best-effort defense, not a forensic guarantee (§1 Non-goals).
fn random_bytes(len: usize) -> Vec<u8> {
    use std::time::{SystemTime, UNIX_EPOCH};
    let mut seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0x9E3779B9);
    let mut buf = Vec::with_capacity(len);
    for _ in 0..len {
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        buf.push((seed & 0xFF) as u8);
    }
    buf
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

fn io_err(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_config(root: &Path) -> Config {
        let mut config = Config::from_env();
        config.data_root = root.to_path_buf();
        config
    }

    #[test]
    fn atomic_write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        fs::create_dir_all(config.meta_dir()).unwrap();
        let store = ArtifactStore { root: dir.path().to_path_buf() };
        store.write_meta(&config, "abc", b"{\"x\":1}").unwrap();
        let contents = ArtifactStore::read_meta(&config, "abc").unwrap();
        assert_eq!(contents, b"{\"x\":1}");
    }

    #[test]
    fn atomic_write_leaves_no_tmp_file_behind() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("meta").join("abc.json");
        ArtifactStore::atomic_write(&path, b"hello").unwrap();
        assert!(path.exists());
        assert!(!tmp_sibling(&path).exists());
    }

    #[test]
    fn purge_removes_all_artifact_roots() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        let store = ArtifactStore::new(&config).unwrap();
        let _ = &store;
        fs::create_dir_all(config.uploads_dir().join("j1")).unwrap();
        fs::write(config.uploads_dir().join("j1").join("in.wav"), b"x").unwrap();
        fs::write(config.outputs_dir().join("j1.srt"), b"x").unwrap();
        fs::write(config.meta_dir().join("j1.json"), b"{}").unwrap();
        fs::write(config.locks_dir().join("j1.lock"), b"").unwrap();

        ArtifactStore::purge(&config, "j1", 0);

        assert!(!config.uploads_dir().join("j1").exists());
        assert!(!config.outputs_dir().join("j1.srt").exists());
        assert!(!config.meta_dir().join("j1.json").exists());
        assert!(!config.locks_dir().join("j1.lock").exists());
    }

    #[test]
    fn list_meta_ids_finds_json_stems() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        fs::create_dir_all(config.meta_dir()).unwrap();
        fs::write(config.meta_dir().join("a.json"), b"{}").unwrap();
        fs::write(config.meta_dir().join("b.json"), b"{}").unwrap();
        let mut ids = ArtifactStore::list_meta_ids(&config).unwrap();
        ids.sort();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }
}

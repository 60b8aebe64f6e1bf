use std::path::PathBuf;

/// Process-wide tunables, loaded once from the environment at boot.
///
/// Mirrors the Python original's `Config` class: every field has a
/// default and, where the original clamps, the same min/max.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_root: PathBuf,

    pub job_workers: usize,
    pub concurrency: usize,

    pub request_timeout_seconds: f64,
    pub request_retry_times: u32,

    pub meta_flush_interval_seconds: f64,
    pub log_max_lines: usize,
    pub meta_log_max_lines: usize,

    pub cleanup_interval_seconds: u64,
    pub orphan_retention_seconds: i64,
    pub auto_cleanup_after_download: bool,
    pub download_grace_seconds: i64,
    pub done_retention_seconds: i64,
    pub error_retention_seconds: i64,
    pub secure_delete_passes: u32,

    pub min_segment_seconds: f64,
    pub max_segment_seconds: f64,
    pub min_transcribe_segment_seconds: f64,
    pub short_segment_merge_gap_seconds: f64,

    pub deepgram_api_key: Option<String>,
    pub deepgram_base_url: String,
    pub hf_api_key: Option<String>,
    pub hf_base_url: String,

    pub api_auth_token: Option<String>,
    pub bind_addr: String,
}

impl Config {
    /// Load from the environment, applying the same defaults and clamps
    /// as the original's `_env_str`/`_env_int`/`_env_float`/`_env_bool`.
    pub fn from_env() -> Self {
        Config {
            data_root: env_path("STT_DATA_ROOT", "./data"),

            job_workers: env_int_clamped("JOB_WORKERS", 2, 1, 8) as usize,
            concurrency: env_int_clamped("CONCURRENCY", 8, 1, 64) as usize,

            request_timeout_seconds: env_float_clamped("REQUEST_TIMEOUT_SECONDS", 120.0, 10.0, 600.0),
            request_retry_times: env_int_clamped("REQUEST_RETRY_TIMES", 3, 0, 10) as u32,

            meta_flush_interval_seconds: env_float_clamped("META_FLUSH_INTERVAL_SECONDS", 1.0, 0.2, 5.0),
            log_max_lines: env_int_clamped("LOG_MAX_LINES", 1000, 50, 5000) as usize,
            meta_log_max_lines: env_int_clamped("META_LOG_MAX_LINES", 300, 20, 2000) as usize,

            cleanup_interval_seconds: env_int_clamped("CLEANUP_INTERVAL_SECONDS", 120, 5, 3600) as u64,
            orphan_retention_seconds: env_int_clamped("ORPHAN_RETENTION_SECONDS", 86_400, 60, 30 * 86_400),
            auto_cleanup_after_download: env_bool("AUTO_CLEANUP_AFTER_DOWNLOAD", true),
            download_grace_seconds: env_int_clamped("DOWNLOAD_GRACE_SECONDS", 60, 0, 86_400),
            done_retention_seconds: env_int_clamped("DONE_RETENTION_SECONDS", 86_400, 60, 30 * 86_400),
            error_retention_seconds: env_int_clamped("ERROR_RETENTION_SECONDS", 86_400, 60, 30 * 86_400),
            secure_delete_passes: env_int_clamped("SECURE_DELETE_PASSES", 0, 0, 8) as u32,

            min_segment_seconds: env_float_clamped("MIN_SEGMENT_SECONDS", 0.25, 0.05, 2.0),
            max_segment_seconds: env_float_clamped("MAX_SEGMENT_SECONDS", 15.0, 2.0, 60.0),
            min_transcribe_segment_seconds: env_float_clamped("MIN_TRANSCRIBE_SEGMENT_SECONDS", 0.6, 0.2, 2.0),
            short_segment_merge_gap_seconds: env_float_clamped("SHORT_SEGMENT_MERGE_GAP_SECONDS", 0.3, 0.0, 1.0),

            deepgram_api_key: env_opt_str("DEEPGRAM_API_KEY"),
            deepgram_base_url: env_str("DEEPGRAM_BASE_URL", "https://api.deepgram.com"),
            hf_api_key: env_opt_str("HF_API_KEY"),
            hf_base_url: env_str(
                "HF_BASE_URL",
                "https://api-inference.huggingface.co/models/kotoba-tech/kotoba-whisper-v2.2",
            ),

            api_auth_token: env_opt_str("API_AUTH_TOKEN"),
            bind_addr: env_str("BIND_ADDR", "127.0.0.1:8080"),
        }
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.data_root.join("uploads")
    }
    pub fn tmp_dir(&self) -> PathBuf {
        self.data_root.join("tmp")
    }
    pub fn outputs_dir(&self) -> PathBuf {
        self.data_root.join("outputs")
    }
    pub fn meta_dir(&self) -> PathBuf {
        self.data_root.join("meta")
    }
    pub fn locks_dir(&self) -> PathBuf {
        self.data_root.join("locks")
    }

    /// Persisted error-string cap (§7 of the design notes: kept at 4000
    /// pending operator confirmation, see DESIGN.md Open Question 1).
    pub const ERROR_PERSIST_MAX_CHARS: usize = 4000;
    /// Logged error-string cap.
    pub const ERROR_LOG_MAX_CHARS: usize = 180;
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt_str(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_path(key: &str, default: &str) -> PathBuf {
    PathBuf::from(env_str(key, default))
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

fn env_int_clamped(key: &str, default: i64, min: i64, max: i64) -> i64 {
    let value = std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<i64>().ok())
        .unwrap_or(default);
    value.clamp(min, max)
}

fn env_float_clamped(key: &str, default: f64, min: f64, max: f64) -> f64 {
    let value = std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<f64>().ok())
        .unwrap_or(default);
    value.clamp(min, max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_respects_bounds() {
        assert_eq!(env_int_clamped("STT_TEST_DOES_NOT_EXIST", 5, 1, 8), 5);
    }

    #[test]
    fn bool_parses_common_truthy_values() {
        std::env::set_var("STT_TEST_BOOL", "yes");
        assert!(env_bool("STT_TEST_BOOL", false));
        std::env::remove_var("STT_TEST_BOOL");
    }
}

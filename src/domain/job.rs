use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Lifecycle status of a job record (§3 DATA MODEL).
///
/// Transitions allowed: `Queued -> Running -> {Done, Error, Cancelled}`,
/// and `Queued -> Cancelled` directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Error,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Error | JobStatus::Cancelled)
    }
}

/// One entry in a job's bounded log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub seq: u64,
    /// `HH:MM:SS` wall-clock timestamp, matching the original's log format.
    pub ts: String,
    pub msg: String,
}

/// Immutable input parameters captured at job creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPayload {
    pub file_path: String,
    pub language: String,
    pub model: String,
    pub original_name: String,
    #[serde(default)]
    pub options: Map<String, Value>,
}

/// The canonical job record (§3). Held exclusively by its worker while
/// `status == Running`; the registry exposes read-only snapshots to
/// everyone else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub status: JobStatus,
    pub progress: f64,

    pub created_at: f64,
    pub updated_at: f64,
    pub started_at: Option<f64>,
    pub finished_at: Option<f64>,
    pub last_heartbeat: f64,
    pub downloaded_at: Option<f64>,

    pub payload: JobPayload,

    pub logs: Vec<LogLine>,
    pub log_seq: u64,

    pub error: Option<String>,
    pub result_path: Option<String>,
    pub download_name: Option<String>,

    pub cancel_requested: bool,
}

impl JobRecord {
    pub fn new(id: String, payload: JobPayload, now: f64) -> Self {
        JobRecord {
            id,
            status: JobStatus::Queued,
            progress: 0.0,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
            last_heartbeat: now,
            downloaded_at: None,
            payload,
            logs: Vec::new(),
            log_seq: 0,
            error: None,
            result_path: None,
            download_name: None,
            cancel_requested: false,
        }
    }

    /// Append a log line, stripping CR/LF and skipping empty messages, and
    /// bumping `log_seq`/`updated_at`/`last_heartbeat` (§4.1).
    pub fn append_log(&mut self, now: f64, msg: &str) {
        let cleaned: String = msg.chars().filter(|c| *c != '\r' && *c != '\n').collect();
        let cleaned = cleaned.trim();
        if cleaned.is_empty() {
            return;
        }
        self.log_seq += 1;
        self.logs.push(LogLine {
            seq: self.log_seq,
            ts: format_hms(now),
            msg: cleaned.to_string(),
        });
        self.touch(now);
    }

    /// Drop oldest log lines beyond `max_lines`.
    pub fn truncate_logs(&mut self, max_lines: usize) {
        if self.logs.len() > max_lines {
            let excess = self.logs.len() - max_lines;
            self.logs.drain(0..excess);
        }
    }

    pub fn touch(&mut self, now: f64) {
        self.updated_at = now;
        self.last_heartbeat = now;
    }

    /// True once no field besides `downloaded_at` may change (§3 invariant b).
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn logs_since(&self, since_seq: u64) -> Vec<LogLine> {
        self.logs
            .iter()
            .filter(|line| line.seq > since_seq)
            .cloned()
            .collect()
    }
}

/// Local-time `HH:MM:SS` for one log line, matching the original's log
/// format. Grounded on the teacher's `chrono::Local` usage for
/// human-facing timestamps (`engine/output_policy_paths.rs`).
fn format_hms(unix_seconds: f64) -> String {
    use chrono::{Local, TimeZone};
    let secs = unix_seconds.floor() as i64;
    match Local.timestamp_opt(secs, 0) {
        chrono::LocalResult::Single(dt) => dt.format("%H:%M:%S").to_string(),
        _ => {
            let total_seconds = unix_seconds.rem_euclid(86_400.0) as i64;
            let h = total_seconds / 3600;
            let m = (total_seconds % 3600) / 60;
            let s = total_seconds % 60;
            format!("{h:02}:{m:02}:{s:02}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payload() -> JobPayload {
        JobPayload {
            file_path: "/data/uploads/abc/in.mp4".to_string(),
            language: "auto".to_string(),
            model: "nova-2-general".to_string(),
            original_name: "in.mp4".to_string(),
            options: Map::new(),
        }
    }

    #[test]
    fn append_log_strips_newlines_and_skips_empty() {
        let mut job = JobRecord::new("abc".to_string(), sample_payload(), 0.0);
        job.append_log(1.0, "hello\r\nworld\n");
        job.append_log(2.0, "   ");
        assert_eq!(job.logs.len(), 1);
        assert_eq!(job.logs[0].msg, "helloworld");
        assert_eq!(job.log_seq, 1);
    }

    #[test]
    fn log_seq_is_monotone() {
        let mut job = JobRecord::new("abc".to_string(), sample_payload(), 0.0);
        for i in 0..5 {
            job.append_log(i as f64, &format!("line {i}"));
        }
        let seqs: Vec<u64> = job.logs.iter().map(|l| l.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn truncate_logs_keeps_most_recent() {
        let mut job = JobRecord::new("abc".to_string(), sample_payload(), 0.0);
        for i in 0..10 {
            job.append_log(i as f64, &format!("line {i}"));
        }
        job.truncate_logs(3);
        assert_eq!(job.logs.len(), 3);
        assert_eq!(job.logs[0].msg, "line 7");
    }

    #[test]
    fn logs_since_filters_by_seq() {
        let mut job = JobRecord::new("abc".to_string(), sample_payload(), 0.0);
        for i in 0..5 {
            job.append_log(i as f64, &format!("line {i}"));
        }
        assert_eq!(job.logs_since(3).len(), 2);
    }
}

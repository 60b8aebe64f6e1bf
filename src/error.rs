use thiserror::Error;

/// Stage-wide failures that abort an entire job (§7 taxonomy, job→error rows).
#[derive(Debug, Error, Clone)]
pub enum JobFailure {
    #[error("UPLOAD_MISSING: input file is missing")]
    UploadMissing,
    #[error("NORMALIZE_FAIL: {0}")]
    NormalizeFailed(String),
    #[error("NO_SPEECH: voice activity detection yielded nothing usable")]
    NoSpeech,
    #[error("CANCELLED")]
    Cancelled,
    #[error("heartbeat timeout")]
    HeartbeatTimeout,
}

impl JobFailure {
    /// Short machine-matchable code, as persisted in the job record.
    pub fn code(&self) -> &'static str {
        match self {
            JobFailure::UploadMissing => "UPLOAD_MISSING",
            JobFailure::NormalizeFailed(_) => "NORMALIZE_FAIL",
            JobFailure::NoSpeech => "NO_SPEECH",
            JobFailure::Cancelled => "CANCELLED",
            JobFailure::HeartbeatTimeout => "HEARTBEAT_TIMEOUT",
        }
    }
}

/// Per-segment outcomes (§7 taxonomy, segment-dropped rows). Soft failures
/// are aggregated; hard failures are logged at segment granularity.
#[derive(Debug, Error, Clone)]
pub enum SegmentFailure {
    #[error("FFMPEG_ERR: {0}")]
    CutFailed(String),
    #[error("EMPTY_TRANSCRIPT")]
    EmptyTranscript,
    #[error("EMPTY_AFTER_NORMALIZE")]
    EmptyAfterNormalize,
    #[error("HF_EMPTY_TRANSCRIPT")]
    HfEmptyTranscript,
    #[error("DG_ERR_{0}")]
    DeepgramHttp(u16),
    #[error("HF_ERR_{0}")]
    HfHttp(u16),
    #[error("TRANSCRIBE_FAIL: {0}")]
    Unclassified(String),
}

impl SegmentFailure {
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            SegmentFailure::EmptyTranscript
                | SegmentFailure::EmptyAfterNormalize
                | SegmentFailure::HfEmptyTranscript
        )
    }

    pub fn code(&self) -> String {
        match self {
            SegmentFailure::CutFailed(_) => "FFMPEG_ERR".to_string(),
            SegmentFailure::EmptyTranscript => "EMPTY_TRANSCRIPT".to_string(),
            SegmentFailure::EmptyAfterNormalize => "EMPTY_AFTER_NORMALIZE".to_string(),
            SegmentFailure::HfEmptyTranscript => "HF_EMPTY_TRANSCRIPT".to_string(),
            SegmentFailure::DeepgramHttp(code) => format!("DG_ERR_{code}"),
            SegmentFailure::HfHttp(code) => format!("HF_ERR_{code}"),
            SegmentFailure::Unclassified(_) => "TRANSCRIBE_FAIL".to_string(),
        }
    }
}

/// Filesystem/artifact-store level failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("lease already held for job {0}")]
    LeaseHeld(String),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Truncate an error message to at most `max_chars` characters (char-safe).
pub fn truncate_chars(message: &str, max_chars: usize) -> String {
    if message.chars().count() <= max_chars {
        return message.to_string();
    }
    message.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_chars_keeps_short_strings() {
        assert_eq!(truncate_chars("hello", 10), "hello");
    }

    #[test]
    fn truncate_chars_cuts_long_strings() {
        let long = "x".repeat(50);
        assert_eq!(truncate_chars(&long, 10).len(), 10);
    }

    #[test]
    fn segment_failure_soft_classification() {
        assert!(SegmentFailure::EmptyTranscript.is_soft());
        assert!(!SegmentFailure::DeepgramHttp(500).is_soft());
    }
}

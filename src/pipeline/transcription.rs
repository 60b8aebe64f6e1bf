//! Segment-level provider dispatch, empty-result retry, and the bounded
//! parallel fan-out pool (§4.5).

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use serde_json::{Map, Value};

use crate::config::Config;
use crate::domain::{Segment, SegmentResult};
use crate::error::SegmentFailure;
use crate::pipeline::normalize::extract_segment_wav;
use crate::pipeline::text::normalize_transcript_text;

static HTTP_CLIENT: OnceCell<reqwest::blocking::Client> = OnceCell::new();

/// Shared blocking HTTP client with pooled connections, built once at
/// first use (§4.5, §5: "immutable after init"). POSTs issued through
/// this client are never retried by the client itself — transcription
/// calls are non-idempotent (§4.5 HTTP policy, §9).
fn http_client() -> &'static reqwest::blocking::Client {
    HTTP_CLIENT.get_or_init(|| {
        reqwest::blocking::Client::builder()
            .pool_max_idle_per_host(32)
            .timeout(Duration::from_secs(120))
            .build()
            .expect("failed to build HTTP client")
    })
}

/// A model name containing "kotoba" routes to the HF-class endpoint;
/// everything else goes to the general provider (§4.5 step 2).
fn is_hf_model(model: &str) -> bool {
    model.to_ascii_lowercase().contains("kotoba")
}

/// Per-model boolean defaults for the general provider (§4.5 step 2).
fn deepgram_model_defaults(model: &str) -> Map<String, Value> {
    let mut defaults = Map::new();
    defaults.insert("smart_format".into(), Value::Bool(model != "whisper-large"));
    defaults.insert("punctuate".into(), Value::Bool(true));
    defaults.insert("diarize".into(), Value::Bool(false));
    defaults.insert("paragraphs".into(), Value::Bool(false));
    defaults.insert("numerals".into(), Value::Bool(false));
    defaults.insert("profanity_filter".into(), Value::Bool(false));
    defaults.insert("utterances".into(), Value::Bool(true));
    defaults.insert("filler_words".into(), Value::Bool(false));
    defaults
}

/// Symmetric pad widths for the empty-transcript retry bucket, keyed by
/// original segment duration (§4.5 step 3).
fn empty_retry_pad(duration: f64) -> f64 {
    if duration < 1.2 {
        0.22
    } else if duration < 3.0 {
        0.35
    } else {
        0.50
    }
}

struct ProviderOutcome {
    text: String,
}

fn transcribe_with_deepgram(
    config: &Config,
    audio: &[u8],
    model: &str,
    language: &str,
    options: &Map<String, Value>,
) -> std::result::Result<ProviderOutcome, SegmentFailure> {
    let api_key = config
        .deepgram_api_key
        .as_deref()
        .ok_or_else(|| SegmentFailure::Unclassified("missing DEEPGRAM_API_KEY".to_string()))?;

    let mut params: Vec<(String, String)> = vec![("model".to_string(), model.to_string())];
    if language == "auto" {
        params.push(("detect_language".to_string(), "true".to_string()));
    } else {
        params.push(("language".to_string(), language.to_string()));
    }

    let mut bools = deepgram_model_defaults(model);
    for key in [
        "smart_format",
        "punctuate",
        "diarize",
        "paragraphs",
        "numerals",
        "profanity_filter",
        "utterances",
        "filler_words",
    ] {
        if let Some(v) = options.get(key) {
            bools.insert(key.to_string(), v.clone());
        }
    }
    for (key, value) in bools {
        if let Some(b) = value.as_bool() {
            params.push((key, b.to_string()));
        }
    }

    if let Some(utt_split) = options.get("utt_split").and_then(Value::as_f64) {
        let clamped = utt_split.clamp(0.1, 5.0);
        params.push(("utt_split".to_string(), clamped.to_string()));
    }
    if let Some(keywords) = options.get("keywords").and_then(Value::as_array) {
        for keyword in keywords.iter().filter_map(Value::as_str) {
            params.push(("keywords".to_string(), keyword.to_string()));
        }
    }

    let url = format!("{}/v1/listen", config.deepgram_base_url.trim_end_matches('/'));
    let response = http_client()
        .post(&url)
        .query(&params)
        .header("Authorization", format!("Token {api_key}"))
        .header("Content-Type", "audio/wav")
        .body(audio.to_vec())
        .send()
        .map_err(|e| SegmentFailure::Unclassified(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(SegmentFailure::DeepgramHttp(status.as_u16()));
    }
    let body: Value = response.json().map_err(|e| SegmentFailure::Unclassified(e.to_string()))?;
    let transcript = body
        .pointer("/results/channels/0/alternatives/0/transcript")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    if transcript.trim().is_empty() {
        return Err(SegmentFailure::EmptyTranscript);
    }
    Ok(ProviderOutcome { text: transcript })
}

fn transcribe_with_hf(config: &Config, audio: &[u8]) -> std::result::Result<ProviderOutcome, SegmentFailure> {
    let api_key = config
        .hf_api_key
        .as_deref()
        .ok_or_else(|| SegmentFailure::Unclassified("missing HF_API_KEY".to_string()))?;

    let url = format!("{}?wait_for_model=true", config.hf_base_url);
    let response = http_client()
        .post(&url)
        .header("Authorization", format!("Bearer {api_key}"))
        .header("Content-Type", "audio/wav")
        .body(audio.to_vec())
        .send()
        .map_err(|e| SegmentFailure::Unclassified(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(SegmentFailure::HfHttp(status.as_u16()));
    }
    let body: Value = response.json().map_err(|e| SegmentFailure::Unclassified(e.to_string()))?;
    let text = body.get("text").and_then(Value::as_str).unwrap_or("").to_string();
    if text.trim().is_empty() {
        return Err(SegmentFailure::HfEmptyTranscript);
    }
    Ok(ProviderOutcome { text })
}

/// Run one segment end-to-end: extract -> dispatch -> empty-retry ->
/// normalize -> cleanup (§4.5 steps 1-5).
#[allow(clippy::too_many_arguments)]
pub fn transcribe_segment(
    config: &Config,
    normalized_wav: &Path,
    tmp_segments_dir: &Path,
    idx: usize,
    segment: Segment,
    model: &str,
    language: &str,
    options: &Map<String, Value>,
) -> SegmentResult {
    let segment_path = tmp_segments_dir.join(format!("seg_{idx:05}.wav"));
    let result = run_segment(config, normalized_wav, &segment_path, idx, segment, model, language, options);
    let _ = std::fs::remove_file(&segment_path);
    result
}

fn run_segment(
    config: &Config,
    normalized_wav: &Path,
    segment_path: &Path,
    idx: usize,
    segment: Segment,
    model: &str,
    language: &str,
    options: &Map<String, Value>,
) -> SegmentResult {
    if let Err(err) = extract_segment_wav(normalized_wav, segment_path, segment.start, segment.end) {
        return SegmentResult::failure(idx, segment, SegmentFailure::CutFailed(err.to_string()).code(), err.to_string());
    }

    let audio = match std::fs::read(segment_path) {
        Ok(bytes) => bytes,
        Err(err) => {
            let failure = SegmentFailure::CutFailed(err.to_string());
            return SegmentResult::failure(idx, segment, failure.code(), failure.to_string());
        }
    };

    let dispatch = |audio: &[u8], lang: &str| -> std::result::Result<ProviderOutcome, SegmentFailure> {
        if is_hf_model(model) {
            transcribe_with_hf(config, audio)
        } else {
            transcribe_with_deepgram(config, audio, model, lang, options)
        }
    };

    let first_attempt = dispatch(&audio, language);

    let outcome = match first_attempt {
        Ok(outcome) => Ok(outcome),
        Err(failure) if !is_hf_model(model) && failure.is_soft() => {
            // Empty-transcript retry: general provider only, widened pad,
            // auto language on retry (§4.5 step 3).
            let pad = empty_retry_pad(segment.duration());
            let retry_start = (segment.start - pad).max(0.0);
            let retry_end = segment.end + pad;
            let retry_path = segment_path.with_extension("retry.wav");
            let retry_result = extract_segment_wav(normalized_wav, &retry_path, retry_start, retry_end)
                .context("retry segment extraction failed")
                .and_then(|_| std::fs::read(&retry_path).context("reading retried segment"));
            let outcome = match retry_result {
                Ok(retry_audio) => dispatch(&retry_audio, "auto"),
                Err(_) => Err(failure),
            };
            let _ = std::fs::remove_file(&retry_path);
            outcome
        }
        Err(failure) => Err(failure),
    };

    match outcome {
        Ok(outcome) => {
            let normalized = normalize_transcript_text(&outcome.text, language, model);
            if normalized.is_empty() {
                let failure = SegmentFailure::EmptyAfterNormalize;
                SegmentResult::failure(idx, segment, failure.code(), failure.to_string())
            } else {
                SegmentResult::success(idx, segment, normalized)
            }
        }
        Err(failure) => SegmentResult::failure(idx, segment, failure.code(), failure.to_string()),
    }
}

/// Bounded parallel fan-out over all segments (§4.5, §5). Progress
/// starts at 14 and climbs to 94 as futures complete; heartbeat is
/// touched on every completion; cancellation is checked before each
/// dispatch and after each completion.
pub fn transcribe_all(
    config: &Config,
    normalized_wav: &Path,
    tmp_segments_dir: &Path,
    segments: &[Segment],
    model: &str,
    language: &str,
    options: &Map<String, Value>,
    on_progress: impl Fn(f64) + Send + Sync,
    cancel_requested: impl Fn() -> bool + Send + Sync,
) -> Result<Vec<SegmentResult>> {
    let total = segments.len().max(1);
    let concurrency = config.concurrency.min(segments.len().max(1));
    let pool = threadpool_scope(concurrency);

    let completed = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let cancelled_flag = Arc::new(AtomicBool::new(false));
    let results: Arc<std::sync::Mutex<Vec<SegmentResult>>> = Arc::new(std::sync::Mutex::new(Vec::new()));

    on_progress(14.0);

    std::thread::scope(|scope| {
        let mut handles = Vec::new();
        for (idx, segment) in segments.iter().enumerate() {
            if cancel_requested() || cancelled_flag.load(Ordering::SeqCst) {
                break;
            }
            let results = results.clone();
            let completed = completed.clone();
            let cancelled_flag = cancelled_flag.clone();
            let segment = *segment;
            let _permit = pool.acquire();
            let handle = scope.spawn(move || {
                let result = transcribe_segment(config, normalized_wav, tmp_segments_dir, idx, segment, model, language, options);
                results.lock().unwrap().push(result);
                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                on_progress(14.0 + 80.0 * done as f64 / total as f64);
                if cancel_requested() {
                    cancelled_flag.store(true, Ordering::SeqCst);
                }
                drop(_permit);
            });
            handles.push(handle);
        }
        for handle in handles {
            let _ = handle.join();
        }
    });

    let results = Arc::try_unwrap(results).map(|m| m.into_inner().unwrap()).unwrap_or_default();
    Ok(results)
}

/// Minimal counting semaphore so the thread-per-segment fan-out still
/// respects `CONCURRENCY` without pulling in a scheduler crate.
struct ThreadPoolScope {
    semaphore: Arc<(std::sync::Mutex<usize>, std::sync::Condvar)>,
}

struct Permit<'a> {
    scope: &'a ThreadPoolScope,
}

impl ThreadPoolScope {
    fn acquire(&self) -> Permit<'_> {
        let (lock, cv) = &*self.semaphore;
        let mut count = lock.lock().unwrap();
        while *count == 0 {
            count = cv.wait(count).unwrap();
        }
        *count -= 1;
        Permit { scope: self }
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        let (lock, cv) = &*self.scope.semaphore;
        let mut count = lock.lock().unwrap();
        *count += 1;
        cv.notify_one();
    }
}

fn threadpool_scope(capacity: usize) -> ThreadPoolScope {
    ThreadPoolScope {
        semaphore: Arc::new((std::sync::Mutex::new(capacity.max(1)), std::sync::Condvar::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_hf_model_matches_substring() {
        assert!(is_hf_model("kotoba-tech/kotoba-whisper-v2.2"));
        assert!(!is_hf_model("nova-2-general"));
    }

    #[test]
    fn deepgram_defaults_disable_smart_format_for_whisper_large() {
        let defaults = deepgram_model_defaults("whisper-large");
        assert_eq!(defaults.get("smart_format").unwrap(), &Value::Bool(false));
        let other = deepgram_model_defaults("nova-2-general");
        assert_eq!(other.get("smart_format").unwrap(), &Value::Bool(true));
    }

    #[test]
    fn empty_retry_pad_buckets_match_spec() {
        assert_eq!(empty_retry_pad(1.0), 0.22);
        assert_eq!(empty_retry_pad(2.0), 0.35);
        assert_eq!(empty_retry_pad(5.0), 0.50);
    }
}

//! Voice-activity segmentation: normalize -> detect -> filter/split ->
//! merge-short (§4.4).

use serde_json::{Map, Value};

use crate::domain::Segment;

#[derive(Debug, Clone, Copy)]
pub struct VadTunables {
    pub threshold: f64,
    pub min_silence_ms: u32,
    pub min_speech_ms: u32,
    pub speech_pad_ms: u32,
}

/// Named parameter bundles (§4.4 presets table).
pub fn vad_preset(name: &str) -> Option<VadTunables> {
    match name {
        "general" => Some(VadTunables {
            threshold: 0.55,
            min_silence_ms: 420,
            min_speech_ms: 240,
            speech_pad_ms: 110,
        }),
        "asmr" => Some(VadTunables {
            threshold: 0.35,
            min_silence_ms: 300,
            min_speech_ms: 140,
            speech_pad_ms: 180,
        }),
        "mixed" => Some(VadTunables {
            threshold: 0.45,
            min_silence_ms: 360,
            min_speech_ms: 180,
            speech_pad_ms: 140,
        }),
        _ => None,
    }
}

/// Resolve effective tunables from `options`, honoring preset selection,
/// per-tunable overrides, and the legacy `vad_profile`/`utterance_split`
/// compatibility options (§4.4, §6.4).
pub fn resolve_vad_options(options: &Map<String, Value>) -> VadTunables {
    let preset_name = options
        .get("vad_preset")
        .and_then(Value::as_str)
        .or_else(|| legacy_profile_to_preset(options))
        .unwrap_or("general");
    let mut tunables = vad_preset(preset_name).unwrap_or_else(|| vad_preset("general").unwrap());

    if let Some(v) = options.get("vad_threshold").and_then(Value::as_f64) {
        tunables.threshold = v;
    }
    if let Some(v) = options.get("vad_min_silence_ms").and_then(Value::as_u64) {
        tunables.min_silence_ms = v as u32;
    }
    if let Some(v) = options.get("vad_min_speech_ms").and_then(Value::as_u64) {
        tunables.min_speech_ms = v as u32;
    }
    if let Some(v) = options.get("vad_speech_pad_ms").and_then(Value::as_u64) {
        tunables.speech_pad_ms = v as u32;
    }
    if let Some(seconds) = options.get("utterance_split").and_then(Value::as_f64) {
        tunables.min_silence_ms = (seconds * 1000.0).round().max(0.0) as u32;
    }

    tunables
}

fn legacy_profile_to_preset(options: &Map<String, Value>) -> Option<&'static str> {
    match options.get("vad_profile").and_then(Value::as_str) {
        Some("asmr") => Some("asmr"),
        Some("balanced") => Some("mixed"),
        Some("general") => Some("general"),
        _ => None,
    }
}

pub const MIN_SEGMENT_SECONDS: f64 = 0.25;
pub const MAX_SEGMENT_SECONDS: f64 = 15.0;

/// A pluggable voice-activity detector (§4.4 Stage 1). The real neural
/// model is an external collaborator out of scope for this crate; see
/// `EnergyThresholdDetector` for the deterministic substitute shipped
/// here (DESIGN.md).
pub trait VoiceActivityDetector {
    /// Detect speech intervals, in seconds, within `[0, duration]`.
    fn detect(&self, samples: &[f32], sample_rate: u32, tunables: &VadTunables) -> Vec<Segment>;
}

/// Deterministic fallback: treats any run of samples whose short-window
/// RMS energy exceeds a threshold derived from `tunables.threshold` as
/// speech, extended by `speech_pad_ms` and split on silences longer than
/// `min_silence_ms`.
pub struct EnergyThresholdDetector;

impl VoiceActivityDetector for EnergyThresholdDetector {
    fn detect(&self, samples: &[f32], sample_rate: u32, tunables: &VadTunables) -> Vec<Segment> {
        if samples.is_empty() || sample_rate == 0 {
            return Vec::new();
        }
        let window = (sample_rate as usize / 100).max(1); // 10ms windows
        let min_silence_windows = (tunables.min_silence_ms as usize * sample_rate as usize) / (1000 * window.max(1));
        let min_speech_windows =
            ((tunables.min_speech_ms as usize * sample_rate as usize) / (1000 * window.max(1))).max(1);

        let energy_threshold = tunables.threshold.clamp(0.0, 1.0) as f32 * 0.1;

        let mut is_speech_window = Vec::new();
        let mut i = 0;
        while i < samples.len() {
            let end = (i + window).min(samples.len());
            let slice = &samples[i..end];
            let rms = (slice.iter().map(|s| s * s).sum::<f32>() / slice.len() as f32).sqrt();
            is_speech_window.push(rms > energy_threshold);
            i += window;
        }

        let mut raw_segments: Vec<(usize, usize)> = Vec::new();
        let mut run_start: Option<usize> = None;
        let mut silence_run = 0usize;
        for (idx, speech) in is_speech_window.iter().enumerate() {
            if *speech {
                if run_start.is_none() {
                    run_start = Some(idx);
                }
                silence_run = 0;
            } else if let Some(start) = run_start {
                silence_run += 1;
                if silence_run >= min_silence_windows.max(1) {
                    let seg_end = idx + 1 - silence_run;
                    if seg_end > start && seg_end - start >= min_speech_windows {
                        raw_segments.push((start, seg_end));
                    }
                    run_start = None;
                    silence_run = 0;
                }
            }
        }
        if let Some(start) = run_start {
            let end = is_speech_window.len();
            if end > start && end - start >= min_speech_windows {
                raw_segments.push((start, end));
            }
        }

        let window_seconds = window as f64 / sample_rate as f64;
        let pad_seconds = tunables.speech_pad_ms as f64 / 1000.0;
        let duration = samples.len() as f64 / sample_rate as f64;

        raw_segments
            .into_iter()
            .map(|(s, e)| {
                let start = (s as f64 * window_seconds - pad_seconds).max(0.0);
                let end = (e as f64 * window_seconds + pad_seconds).min(duration);
                Segment::new(start, end)
            })
            .collect()
    }
}

/// Stage 1+fallback: run the detector, falling back to one segment
/// covering the whole duration if it finds nothing.
pub fn detect_speech_segments(
    detector: &dyn VoiceActivityDetector,
    samples: &[f32],
    sample_rate: u32,
    duration: f64,
    tunables: &VadTunables,
) -> Vec<Segment> {
    let detected = detector.detect(samples, sample_rate, tunables);
    if detected.is_empty() {
        vec![Segment::new(0.0, duration)]
    } else {
        detected
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct OptimizeStats {
    pub forced_splits: usize,
    pub merges: usize,
    pub drops: usize,
}

/// Stages 2+3: filter tiny segments, force-split overlong ones, then
/// merge/drop short ones as a transcription-quality pass (§4.4).
pub fn optimize_segments_for_transcription(
    segments: Vec<Segment>,
    min_transcribe_seconds: f64,
    merge_gap_seconds: f64,
) -> (Vec<Segment>, OptimizeStats) {
    let mut stats = OptimizeStats::default();
    let fallback = segments.clone();

    // Stage 2a: drop below MIN_SEGMENT_SECONDS.
    let mut filtered: Vec<Segment> = segments
        .into_iter()
        .filter(|s| s.duration() >= MIN_SEGMENT_SECONDS)
        .collect();
    if filtered.is_empty() && !fallback.is_empty() {
        filtered = fallback.clone();
    }

    // Stage 2b: force-split anything longer than MAX_SEGMENT_SECONDS.
    let mut split: Vec<Segment> = Vec::new();
    for seg in filtered {
        if seg.duration() > MAX_SEGMENT_SECONDS {
            let mut cursor = seg.start;
            while cursor < seg.end {
                let piece_end = (cursor + MAX_SEGMENT_SECONDS).min(seg.end);
                split.push(Segment::new(cursor, piece_end));
                cursor = piece_end;
                stats.forced_splits += 1;
            }
        } else {
            split.push(seg);
        }
    }

    // Stage 3: merge-short quality pass.
    split.sort_by(|a, b| a.start.partial_cmp(&b.start).unwrap_or(std::cmp::Ordering::Equal));
    let keep_floor = (min_transcribe_seconds * 0.6).max(0.22);
    let mut merged: Vec<Segment> = Vec::new();
    for seg in split {
        if seg.duration() < min_transcribe_seconds {
            if let Some(prev) = merged.last_mut() {
                let gap = seg.start - prev.end;
                let would_span = seg.end - prev.start;
                if gap <= merge_gap_seconds && would_span <= MAX_SEGMENT_SECONDS {
                    prev.end = seg.end;
                    stats.merges += 1;
                    continue;
                }
            }
            if seg.duration() >= keep_floor {
                merged.push(seg);
            } else {
                stats.drops += 1;
            }
        } else {
            merged.push(seg);
        }
    }

    if merged.is_empty() && !fallback.is_empty() {
        merged.push(fallback[0]);
    }

    (merged, stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preset_lookup_matches_table() {
        let general = vad_preset("general").unwrap();
        assert_eq!(general.threshold, 0.55);
        assert_eq!(general.min_silence_ms, 420);
        let asmr = vad_preset("asmr").unwrap();
        assert_eq!(asmr.speech_pad_ms, 180);
    }

    #[test]
    fn legacy_profile_maps_to_preset() {
        let mut options = Map::new();
        options.insert("vad_profile".to_string(), Value::String("balanced".to_string()));
        let tunables = resolve_vad_options(&options);
        assert_eq!(tunables.threshold, 0.45); // mixed preset
    }

    #[test]
    fn utterance_split_overrides_min_silence() {
        let mut options = Map::new();
        options.insert("utterance_split".to_string(), Value::from(0.5));
        let tunables = resolve_vad_options(&options);
        assert_eq!(tunables.min_silence_ms, 500);
    }

    #[test]
    fn force_split_breaks_overlong_segments() {
        let segments = vec![Segment::new(0.0, 40.0)];
        let (result, stats) = optimize_segments_for_transcription(segments, 0.6, 0.3);
        assert!(result.iter().all(|s| s.duration() <= MAX_SEGMENT_SECONDS + 1e-9));
        assert!(stats.forced_splits > 0);
    }

    #[test]
    fn short_segment_merges_into_predecessor_within_gap() {
        let segments = vec![Segment::new(0.0, 2.0), Segment::new(2.2, 2.4)];
        let (result, stats) = optimize_segments_for_transcription(segments, 0.6, 0.3);
        assert_eq!(result.len(), 1);
        assert_eq!(stats.merges, 1);
        assert!((result[0].end - 2.4).abs() < 1e-9);
    }

    #[test]
    fn optimize_never_returns_empty_when_input_nonempty() {
        let segments = vec![Segment::new(0.0, 0.05)];
        let (result, _stats) = optimize_segments_for_transcription(segments, 0.6, 0.3);
        assert!(!result.is_empty());
    }

    #[test]
    fn boundary_min_segment_seconds_kept_and_epsilon_below_dropped() {
        let exactly_min = Segment::new(0.0, MIN_SEGMENT_SECONDS);
        let just_below = Segment::new(0.0, MIN_SEGMENT_SECONDS - 0.01);
        assert!(exactly_min.duration() >= MIN_SEGMENT_SECONDS);
        assert!(just_below.duration() < MIN_SEGMENT_SECONDS);
    }
}

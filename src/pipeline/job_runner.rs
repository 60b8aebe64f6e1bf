//! Orchestrates one job end-to-end: normalize -> VAD -> fan-out ->
//! assemble -> write SRT (§4, mirrors the original's `process_job`).

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};

use crate::config::Config;
use crate::domain::JobStatus;
use crate::error::JobFailure;
use crate::pipeline::normalize::{normalize_to_wav, probe_duration_seconds, read_pcm16_wav, resample_linear};
use crate::pipeline::srt::{assemble_cues, build_srt};
use crate::pipeline::transcription::transcribe_all;
use crate::pipeline::vad::{detect_speech_segments, optimize_segments_for_transcription, resolve_vad_options, EnergyThresholdDetector};
use crate::registry::Registry;
use crate::store::ArtifactStore;

const MINIMUM_AUDIBLE_SECONDS: f64 = 0.05;

/// Run the full pipeline for `job_id`. Idempotent: a rehydrated
/// `running` job re-enters here and restarts from normalization
/// (§9 Open Question 2) since the upload is still on disk.
pub fn process_job(config: &Arc<Config>, registry: &Arc<Registry>, job_id: &str) -> Result<()> {
    let job = registry.get(job_id).context("job vanished before processing")?;
    let payload = job.payload.clone();

    registry.append_log(job_id, "starting job");

    let input_path = Path::new(&payload.file_path);
    if !input_path.exists() {
        let failure = JobFailure::UploadMissing;
        registry.append_log(job_id, &failure.to_string());
        bail!(failure);
    }

    registry.update(job_id, |j| j.progress = 5.0);
    if is_cancelled(registry, job_id) {
        return mark_cancelled(config, registry, job_id);
    }

    let tmp_dir = config.tmp_dir().join(job_id);
    std::fs::create_dir_all(&tmp_dir)?;
    let normalized_wav = tmp_dir.join("normalized.wav");

    if let Err(e) = normalize_to_wav(input_path, &normalized_wav) {
        let failure = JobFailure::NormalizeFailed(e.to_string());
        registry.append_log(job_id, &failure.to_string());
        cleanup_tmp(config, job_id);
        bail!(failure);
    }
    registry.update(job_id, |j| j.progress = 10.0);

    let duration = probe_duration_seconds(&normalized_wav).unwrap_or(0.0);
    if duration <= MINIMUM_AUDIBLE_SECONDS {
        let failure = JobFailure::NoSpeech;
        registry.append_log(job_id, &failure.to_string());
        cleanup_tmp(config, job_id);
        bail!(failure);
    }

    let segments = run_vad(&normalized_wav, duration, &payload.options, config)?;
    if segments.is_empty() {
        let failure = JobFailure::NoSpeech;
        registry.append_log(job_id, &failure.to_string());
        cleanup_tmp(config, job_id);
        bail!(failure);
    }
    registry.append_log(job_id, &format!("{} segments ready for transcription", segments.len()));
    registry.update(job_id, |j| j.progress = 14.0);

    if is_cancelled(registry, job_id) {
        return mark_cancelled(config, registry, job_id);
    }

    let segments_dir = tmp_dir.join("segments");
    std::fs::create_dir_all(&segments_dir)?;

    let registry_for_progress = registry.clone();
    let job_id_owned = job_id.to_string();
    let registry_for_cancel = registry.clone();
    let job_id_for_cancel = job_id.to_string();

    let results = transcribe_all(
        config,
        &normalized_wav,
        &segments_dir,
        &segments,
        &payload.model,
        &payload.language,
        &payload.options,
        move |progress| {
            registry_for_progress.update(&job_id_owned, |j| {
                if progress > j.progress {
                    j.progress = progress;
                }
            });
        },
        move || {
            registry_for_cancel
                .get(&job_id_for_cancel)
                .map(|j| j.cancel_requested)
                .unwrap_or(false)
        },
    )?;

    if is_cancelled(registry, job_id) {
        return mark_cancelled(config, registry, job_id);
    }

    let ok_count = results.iter().filter(|r| r.ok).count();
    let soft_count = results
        .iter()
        .filter(|r| !r.ok)
        .filter(|r| r.code.as_deref().map(is_soft_code).unwrap_or(false))
        .count();
    let hard_failures: Vec<&crate::domain::SegmentResult> = results
        .iter()
        .filter(|r| !r.ok)
        .filter(|r| !r.code.as_deref().map(is_soft_code).unwrap_or(false))
        .collect();
    for failure in &hard_failures {
        registry.append_log(
            job_id,
            &format!("segment {} failed: {}", failure.idx, failure.error.clone().unwrap_or_default()),
        );
    }
    if soft_count > 0 {
        registry.append_log(job_id, &format!("{soft_count} segments produced no speech"));
    }

    if ok_count == 0 {
        cleanup_tmp(config, job_id);
        let failure = JobFailure::NoSpeech;
        registry.append_log(job_id, &failure.to_string());
        bail!(failure);
    }

    registry.update(job_id, |j| j.progress = 95.0);
    let cues = assemble_cues(results, &payload.language, &payload.model);
    let srt = build_srt(&cues);

    let output_path = config.outputs_dir().join(format!("{job_id}.srt"));
    ArtifactStore::atomic_write(&output_path, srt.as_bytes())?;

    let download_name = derive_download_name(&payload.original_name);
    registry.update(job_id, |j| {
        j.status = JobStatus::Done;
        j.progress = 100.0;
        j.finished_at = Some(crate::registry::now_seconds());
        j.result_path = Some(output_path.display().to_string());
        j.download_name = Some(download_name.clone());
    });
    registry.append_log(job_id, "job done");

    cleanup_tmp(config, job_id);
    Ok(())
}

fn is_soft_code(code: &str) -> bool {
    matches!(code, "EMPTY_TRANSCRIPT" | "EMPTY_AFTER_NORMALIZE" | "HF_EMPTY_TRANSCRIPT")
}

fn is_cancelled(registry: &Registry, job_id: &str) -> bool {
    registry.get(job_id).map(|j| j.cancel_requested).unwrap_or(false)
}

/// Stage-boundary cancellation lands in `status = cancelled`, never
/// `error` (§5 cancellation semantics, §8 scenario 3) — unlike every
/// other failure path in this function, this is not an `Err`.
fn mark_cancelled(config: &Config, registry: &Registry, job_id: &str) -> Result<()> {
    cleanup_tmp(config, job_id);
    registry.update(job_id, |j| {
        j.status = JobStatus::Cancelled;
        j.progress = 100.0;
        j.finished_at = Some(crate::registry::now_seconds());
    });
    Ok(())
}

fn cleanup_tmp(config: &Config, job_id: &str) {
    let _ = std::fs::remove_dir_all(config.tmp_dir().join(job_id));
}

fn derive_download_name(original_name: &str) -> String {
    let stem = Path::new(original_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("transcript");
    format!("{stem}.srt")
}

fn run_vad(
    normalized_wav: &Path,
    duration: f64,
    options: &serde_json::Map<String, serde_json::Value>,
    config: &Config,
) -> Result<Vec<crate::domain::Segment>> {
    let tunables = resolve_vad_options(options);
    let (samples, sample_rate) = read_pcm16_wav(normalized_wav).context("reading normalized wav for VAD")?;
    let resampled = resample_linear(&samples, sample_rate, 16000);

    let detector = EnergyThresholdDetector;
    let detected = detect_speech_segments(&detector, &resampled, 16000, duration, &tunables);

    let min_transcribe_seconds = options
        .get("min_transcribe_segment_seconds")
        .and_then(serde_json::Value::as_f64)
        .unwrap_or(config.min_transcribe_segment_seconds)
        .clamp(0.2, 2.0);
    let merge_gap_seconds = options
        .get("short_segment_merge_gap_seconds")
        .and_then(serde_json::Value::as_f64)
        .unwrap_or(config.short_segment_merge_gap_seconds)
        .clamp(0.0, 1.0);

    let (segments, _stats) = optimize_segments_for_transcription(detected, min_transcribe_seconds, merge_gap_seconds);
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_download_name_replaces_extension() {
        assert_eq!(derive_download_name("clip.mp4"), "clip.srt");
        assert_eq!(derive_download_name("no_extension"), "no_extension.srt");
    }

    #[test]
    fn is_soft_code_matches_empty_variants() {
        assert!(is_soft_code("EMPTY_TRANSCRIPT"));
        assert!(is_soft_code("HF_EMPTY_TRANSCRIPT"));
        assert!(!is_soft_code("DG_ERR_500"));
    }
}

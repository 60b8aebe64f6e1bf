//! Audio normalization and probing via an external ffmpeg-class
//! transcoder (§4.3). Out-of-process by design — the transcoder itself
//! is an external collaborator, not code this crate carries.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::{bail, Context, Result};

const NORMALIZE_TIMEOUT_SECONDS: u64 = 900;
const PROBE_TIMEOUT_SECONDS: u64 = 30;

/// Transcode arbitrary input to mono, 16kHz, 16-bit PCM WAV (§4.3).
pub fn normalize_to_wav(input: &Path, output: &Path) -> Result<()> {
    let mut child = Command::new("ffmpeg")
        .args([
            "-hide_banner",
            "-loglevel",
            "error",
            "-y",
            "-i",
        ])
        .arg(input)
        .args(["-vn", "-ac", "1", "-ar", "16000", "-c:a", "pcm_s16le"])
        .arg(output)
        .spawn()
        .context("failed to spawn ffmpeg for normalization")?;

    let status = wait_with_timeout(&mut child, Duration::from_secs(NORMALIZE_TIMEOUT_SECONDS))
        .context("ffmpeg normalization timed out or failed to exit")?;
    if !status.success() {
        bail!("ffmpeg exited with {status}");
    }
    Ok(())
}

/// Probe total duration in seconds via an external prober (ffprobe-class).
pub fn probe_duration_seconds(input: &Path) -> Result<f64> {
    let mut child = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(input)
        .stdout(std::process::Stdio::piped())
        .spawn()
        .context("failed to spawn ffprobe")?;

    let status = wait_with_timeout(&mut child, Duration::from_secs(PROBE_TIMEOUT_SECONDS))
        .context("ffprobe timed out or failed to exit")?;
    if !status.success() {
        bail!("ffprobe exited with {status}");
    }
    let mut stdout = String::new();
    if let Some(mut out) = child.stdout.take() {
        use std::io::Read;
        out.read_to_string(&mut stdout).ok();
    }
    stdout
        .trim()
        .parse::<f64>()
        .context("failed to parse ffprobe duration output")
}

/// Extract `[start, end]` from `input` into `output` with a light
/// dynamic-range-normalization filter, mono 16k PCM (§4.5 step 1).
pub fn extract_segment_wav(input: &Path, output: &Path, start: f64, end: f64) -> Result<()> {
    let duration = (end - start).max(0.0);
    let mut child = Command::new("ffmpeg")
        .args(["-hide_banner", "-loglevel", "error", "-y"])
        .args(["-ss", &format!("{start:.3}")])
        .arg("-i")
        .arg(input)
        .args(["-t", &format!("{duration:.3}")])
        .args(["-af", "dynaudnorm"])
        .args(["-ac", "1", "-ar", "16000", "-c:a", "pcm_s16le"])
        .arg(output)
        .spawn()
        .context("failed to spawn ffmpeg for segment extraction")?;

    let status = wait_with_timeout(&mut child, Duration::from_secs(180))
        .context("segment extraction timed out or failed to exit")?;
    if !status.success() {
        bail!("ffmpeg segment extraction exited with {status}");
    }
    Ok(())
}

fn wait_with_timeout(child: &mut std::process::Child, timeout: Duration) -> Result<std::process::ExitStatus> {
    let start = std::time::Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if start.elapsed() >= timeout {
            let _ = child.kill();
            let _ = child.wait();
            bail!("process exceeded {timeout:?} timeout");
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

/// Read a 16-bit PCM mono WAV file already at the target sample rate
/// into a float32 buffer (fallback path when the VAD library's own
/// loader is unavailable — §4.4 Stage 1).
pub fn read_pcm16_wav(path: &Path) -> Result<(Vec<f32>, u32)> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    if bytes.len() < 44 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        bail!("not a RIFF/WAVE file: {}", path.display());
    }

    let mut pos = 12;
    let mut sample_rate = 16000u32;
    let mut bits_per_sample = 16u16;
    let mut channels = 1u16;
    let mut data: &[u8] = &[];

    while pos + 8 <= bytes.len() {
        let chunk_id = &bytes[pos..pos + 4];
        let chunk_size = u32::from_le_bytes(bytes[pos + 4..pos + 8].try_into().unwrap()) as usize;
        let body_start = pos + 8;
        let body_end = (body_start + chunk_size).min(bytes.len());
        if chunk_id == b"fmt " && body_end - body_start >= 16 {
            let fmt = &bytes[body_start..body_end];
            channels = u16::from_le_bytes(fmt[2..4].try_into().unwrap());
            sample_rate = u32::from_le_bytes(fmt[4..8].try_into().unwrap());
            bits_per_sample = u16::from_le_bytes(fmt[14..16].try_into().unwrap());
        } else if chunk_id == b"data" {
            data = &bytes[body_start..body_end];
        }
        pos = body_end + (chunk_size % 2);
    }

    if data.is_empty() {
        bail!("no data chunk found in {}", path.display());
    }

    let samples = decode_pcm(data, bits_per_sample);
    let mono = downmix(&samples, channels.max(1) as usize);
    Ok((mono, sample_rate))
}

fn decode_pcm(data: &[u8], bits_per_sample: u16) -> Vec<f32> {
    match bits_per_sample {
        16 => data
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]) as f32 / i16::MAX as f32)
            .collect(),
        8 => data.iter().map(|&b| (b as f32 - 128.0) / 128.0).collect(),
        32 => data
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f32 / i32::MAX as f32)
            .collect(),
        _ => Vec::new(),
    }
}

fn downmix(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Resample by linear interpolation to `target_rate` (§4.4 Stage 1
/// fallback path, `samples * target_rate / source_rate` length).
pub fn resample_linear(samples: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    if samples.is_empty() || source_rate == target_rate || source_rate == 0 {
        return samples.to_vec();
    }
    let target_len = ((samples.len() as u64 * target_rate as u64) / source_rate as u64).max(1) as usize;
    let mut out = Vec::with_capacity(target_len);
    for i in 0..target_len {
        let src_pos = i as f64 * (samples.len() - 1).max(1) as f64 / (target_len - 1).max(1) as f64;
        let lo = src_pos.floor() as usize;
        let hi = (lo + 1).min(samples.len() - 1);
        let frac = (src_pos - lo as f64) as f32;
        out.push(samples[lo] * (1.0 - frac) + samples[hi] * frac);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_pcm16_normalizes_to_unit_range() {
        let bytes = i16::MAX.to_le_bytes();
        let decoded = decode_pcm(&bytes, 16);
        assert!((decoded[0] - 1.0).abs() < 1e-4);
    }

    #[test]
    fn downmix_averages_channels() {
        let stereo = vec![1.0, -1.0, 0.5, 0.5];
        let mono = downmix(&stereo, 2);
        assert_eq!(mono, vec![0.0, 0.5]);
    }

    #[test]
    fn resample_linear_scales_length_by_rate_ratio() {
        let samples = vec![0.0; 1000];
        let resampled = resample_linear(&samples, 48000, 16000);
        assert!((resampled.len() as i64 - 333).abs() <= 1);
    }

    #[test]
    fn resample_linear_noop_when_rates_match() {
        let samples = vec![0.1, 0.2, 0.3];
        let resampled = resample_linear(&samples, 16000, 16000);
        assert_eq!(resampled, samples);
    }
}

use serde::{Deserialize, Serialize};

/// One subtitle entry with timing and text (§3).
///
/// Invariants enforced by the assembler in `pipeline::srt`, not here:
/// `end >= start + 0.18`, cues non-overlapping, adjacent identical-text
/// cues with a small gap merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cue {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Minimum cue duration after overlap correction (§3, §4.6).
pub const MIN_CUE_SECONDS: f64 = 0.18;
/// Maximum gap between identical-text adjacent cues that still merges them.
pub const CUE_MERGE_GAP_SECONDS: f64 = 0.12;

/// Format seconds as `HH:MM:SS,mmm` for SRT serialization (§6.2).
pub fn format_srt_timestamp(seconds: f64) -> String {
    let total_millis = (seconds.max(0.0) * 1000.0).round() as i64;
    let ms = total_millis % 1000;
    let total_seconds = total_millis / 1000;
    let s = total_seconds % 60;
    let m = (total_seconds / 60) % 60;
    let h = total_seconds / 3600;
    format!("{h:02}:{m:02}:{s:02},{ms:03}")
}

/// Parse an `HH:MM:SS,mmm` timestamp back to seconds (round-trip property, §8).
pub fn parse_srt_timestamp(ts: &str) -> Option<f64> {
    let (hms, millis) = ts.split_once(',')?;
    let mut parts = hms.split(':');
    let h: i64 = parts.next()?.parse().ok()?;
    let m: i64 = parts.next()?.parse().ok()?;
    let s: i64 = parts.next()?.parse().ok()?;
    let ms: i64 = millis.parse().ok()?;
    Some((h * 3600 + m * 60 + s) as f64 + ms as f64 / 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_round_trip() {
        for x in [0.0, 1.2345, 59.999, 3661.001, 7199.9995] {
            let ts = format_srt_timestamp(x);
            let back = parse_srt_timestamp(&ts).unwrap();
            let expected = (x * 1000.0).round() / 1000.0;
            assert!((back - expected).abs() < 1e-6, "{x} -> {ts} -> {back}");
        }
    }

    #[test]
    fn format_pads_correctly() {
        assert_eq!(format_srt_timestamp(0.0), "00:00:00,000");
        assert_eq!(format_srt_timestamp(3661.5), "01:01:01,500");
    }
}

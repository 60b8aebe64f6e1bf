//! Per-line time allocation, cue assembly, and SRT serialization (§4.6).

use crate::domain::cue::{format_srt_timestamp, CUE_MERGE_GAP_SECONDS, MIN_CUE_SECONDS};
use crate::domain::{Cue, SegmentResult};
use crate::pipeline::text::split_text_for_srt;

/// Allocate per-line times within `[start, end]`, weighted by line
/// length; the last line ends exactly at `end`; each line is at least
/// 0.3s before overlap correction (§4.6).
pub fn allocate_line_times(start: f64, end: f64, lines: &[String]) -> Vec<(f64, f64)> {
    if lines.is_empty() {
        return Vec::new();
    }
    let total = (end - start).max(0.0);
    let weights: Vec<f64> = lines.iter().map(|l| l.chars().count().max(1) as f64).collect();
    let weight_sum: f64 = weights.iter().sum();

    let mut allocations = Vec::with_capacity(lines.len());
    let mut cursor = start;
    for (i, weight) in weights.iter().enumerate() {
        let is_last = i == weights.len() - 1;
        let share = if weight_sum > 0.0 { weight / weight_sum * total } else { total / weights.len() as f64 };
        let share = share.max(0.3);
        let line_end = if is_last { end } else { (cursor + share).min(end) };
        allocations.push((cursor, line_end.max(cursor)));
        cursor = line_end;
    }
    allocations
}

/// Sort results, expand to lines with allocated times, non-overlap
/// sweep, then compact adjacent identical-text cues (§4.6).
pub fn assemble_cues(mut results: Vec<SegmentResult>, language: &str, model: &str) -> Vec<Cue> {
    crate::domain::segment::sort_results(&mut results);

    let mut cues = Vec::new();
    for result in results.into_iter().filter(|r| r.ok) {
        let lines = split_text_for_srt(&result.text, language, model);
        if lines.is_empty() {
            continue;
        }
        let allocations = allocate_line_times(result.start, result.end, &lines);
        for (line, (start, end)) in lines.into_iter().zip(allocations) {
            cues.push(Cue { start, end, text: line });
        }
    }

    correct_overlaps(&mut cues);
    compact_identical(cues)
}

fn correct_overlaps(cues: &mut [Cue]) {
    let mut prev_end = f64::NEG_INFINITY;
    for cue in cues.iter_mut() {
        if cue.start < prev_end {
            cue.start = prev_end;
        }
        if cue.end < cue.start + MIN_CUE_SECONDS {
            cue.end = cue.start + MIN_CUE_SECONDS;
        }
        prev_end = cue.end;
    }
}

fn compact_identical(cues: Vec<Cue>) -> Vec<Cue> {
    let mut result: Vec<Cue> = Vec::with_capacity(cues.len());
    for cue in cues {
        if let Some(last) = result.last_mut() {
            if last.text == cue.text && cue.start - last.end <= CUE_MERGE_GAP_SECONDS {
                last.end = cue.end;
                continue;
            }
        }
        result.push(cue);
    }
    result
}

/// Serialize cues to SRT text: numbered from 1, `HH:MM:SS,mmm` timing,
/// blank line between cues, trailing newline (§6.2).
pub fn build_srt(cues: &[Cue]) -> String {
    let mut out = String::new();
    for (i, cue) in cues.iter().enumerate() {
        out.push_str(&(i + 1).to_string());
        out.push('\n');
        out.push_str(&format_srt_timestamp(cue.start));
        out.push_str(" --> ");
        out.push_str(&format_srt_timestamp(cue.end));
        out.push('\n');
        out.push_str(&cue.text);
        out.push('\n');
        out.push('\n');
    }
    if out.ends_with('\n') {
        out.pop();
    }
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_result(idx: usize, start: f64, end: f64, text: &str) -> SegmentResult {
        SegmentResult {
            ok: true,
            idx,
            start,
            end,
            text: text.to_string(),
            error: None,
            code: None,
        }
    }

    #[test]
    fn cues_are_non_overlapping_and_meet_min_duration() {
        let results = vec![
            ok_result(0, 0.0, 1.0, "hello"),
            ok_result(1, 0.9, 2.0, "world"),
        ];
        let cues = assemble_cues(results, "en", "nova-2-general");
        for w in cues.windows(2) {
            assert!(w[1].start >= w[0].end - 1e-9);
        }
        for cue in &cues {
            assert!(cue.end >= cue.start + MIN_CUE_SECONDS - 1e-9);
        }
    }

    #[test]
    fn identical_adjacent_cues_within_gap_are_merged() {
        let a = Cue { start: 0.0, end: 1.0, text: "same".to_string() };
        let b = Cue { start: 1.05, end: 2.0, text: "same".to_string() };
        let merged = compact_identical(vec![a, b]);
        assert_eq!(merged.len(), 1);
        assert!((merged[0].end - 2.0).abs() < 1e-9);
    }

    #[test]
    fn build_srt_format_matches_spec() {
        let cues = vec![Cue { start: 0.0, end: 1.5, text: "hi".to_string() }];
        let srt = build_srt(&cues);
        assert!(srt.starts_with("1\n00:00:00,000 --> 00:00:01,500\nhi\n"));
        assert!(srt.ends_with('\n'));
    }

    #[test]
    fn allocate_line_times_last_line_ends_exactly_at_segment_end() {
        let lines = vec!["a".to_string(), "bb".to_string(), "ccc".to_string()];
        let allocations = allocate_line_times(0.0, 3.0, &lines);
        assert_eq!(allocations.last().unwrap().1, 3.0);
    }
}

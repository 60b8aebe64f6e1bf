use serde::{Deserialize, Serialize};

/// A contiguous speech interval fed as one transcription request (§3).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
}

impl Segment {
    pub fn new(start: f64, end: f64) -> Self {
        Segment { start, end }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// The outcome of transcribing one segment. Indexed by original segment
/// order but arrives out-of-order from the fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentResult {
    pub ok: bool,
    pub idx: usize,
    pub start: f64,
    pub end: f64,
    pub text: String,
    pub error: Option<String>,
    pub code: Option<String>,
}

impl SegmentResult {
    pub fn success(idx: usize, segment: Segment, text: String) -> Self {
        SegmentResult {
            ok: true,
            idx,
            start: segment.start,
            end: segment.end,
            text,
            error: None,
            code: None,
        }
    }

    pub fn failure(idx: usize, segment: Segment, code: String, error: String) -> Self {
        SegmentResult {
            ok: false,
            idx,
            start: segment.start,
            end: segment.end,
            text: String::new(),
            error: Some(error),
            code: Some(code),
        }
    }
}

/// Sort results by `(start, end, idx)`, matching assembly order (§4.6).
pub fn sort_results(results: &mut [SegmentResult]) {
    results.sort_by(|a, b| {
        a.start
            .partial_cmp(&b.start)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.end.partial_cmp(&b.end).unwrap_or(std::cmp::Ordering::Equal))
            .then(a.idx.cmp(&b.idx))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_results_orders_by_start_then_end_then_idx() {
        let mut results = vec![
            SegmentResult::success(2, Segment::new(5.0, 6.0), "c".into()),
            SegmentResult::success(0, Segment::new(1.0, 2.0), "a".into()),
            SegmentResult::success(1, Segment::new(1.0, 3.0), "b".into()),
        ];
        sort_results(&mut results);
        let order: Vec<usize> = results.iter().map(|r| r.idx).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }
}

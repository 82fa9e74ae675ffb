/// Sequence gap detection
///
/// Tracks the seq expected next within one epoch and records any range the
/// server skipped over.

use crate::protocol::Seq;

#[derive(Debug, Clone)]
pub struct GapDetector {
    expected_next: Option<Seq>,
    gaps: Vec<(Seq, Seq)>, // (start, end) inclusive
    total_gap_count: u64,
}

impl GapDetector {
    pub fn new() -> Self {
        GapDetector {
            expected_next: None,
            gaps: Vec::new(),
            total_gap_count: 0,
        }
    }

    /// Expect `next` as the following seq, e.g. after a snapshot
    pub fn anchor(&mut self, next: Seq) {
        self.expected_next = Some(next);
    }

    /// Seq the detector expects next, if anchored
    pub fn expected_next(&self) -> Option<Seq> {
        self.expected_next
    }

    /// Record `seq`; returns the skipped range if it jumps past the expected seq
    ///
    /// Seqs at or below the expected one are not gaps and leave the
    /// expectation unchanged unless they advance it.
    pub fn process(&mut self, seq: Seq) -> Option<(Seq, Seq)> {
        let gap = match self.expected_next {
            Some(expected) if seq > expected => {
                let range = (expected, seq - 1);
                self.gaps.push(range);
                self.total_gap_count = self.total_gap_count.saturating_add(seq - expected);
                Some(range)
            }
            _ => None,
        };

        let next = seq.saturating_add(1);
        if self.expected_next.map_or(true, |expected| next > expected) {
            self.expected_next = Some(next);
        }
        gap
    }

    /// All detected gaps as (start, end) tuples (inclusive)
    pub fn gaps(&self) -> &[(Seq, Seq)] {
        &self.gaps
    }

    /// Total number of missing seqs
    pub fn total_gaps(&self) -> u64 {
        self.total_gap_count
    }

    pub fn gap_count(&self) -> usize {
        self.gaps.len()
    }

    pub fn is_in_gap(&self, seq: Seq) -> bool {
        self.gaps.iter().any(|&(start, end)| seq >= start && seq <= end)
    }
}

impl Default for GapDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_gaps() {
        let mut detector = GapDetector::new();
        for i in 0..100 {
            assert_eq!(detector.process(i), None);
        }
        assert_eq!(detector.total_gaps(), 0);
        assert_eq!(detector.expected_next(), Some(100));
    }

    #[test]
    fn test_gap_after_anchor() {
        let mut detector = GapDetector::new();
        detector.anchor(11);
        assert_eq!(detector.process(11), None);
        assert_eq!(detector.process(14), Some((12, 13)));
        assert_eq!(detector.total_gaps(), 2);
        assert_eq!(detector.gap_count(), 1);
    }

    #[test]
    fn test_multiple_gaps() {
        let mut detector = GapDetector::new();
        detector.process(1);
        detector.process(5); // 2-4
        detector.process(10); // 6-9
        detector.process(11);

        assert_eq!(detector.total_gaps(), 7);
        assert_eq!(detector.gaps(), &[(2, 4), (6, 9)]);
        assert!(detector.is_in_gap(3));
        assert!(!detector.is_in_gap(5));
        assert!(detector.is_in_gap(9));
        assert!(!detector.is_in_gap(10));
    }

    #[test]
    fn test_old_seq_is_not_a_gap() {
        let mut detector = GapDetector::new();
        detector.anchor(20);
        assert_eq!(detector.process(7), None);
        assert_eq!(detector.expected_next(), Some(20));
    }
}

//! Cross-segment CRF prediction.
//!
//! Neighboring segments usually need similar CRFs, so completed segments
//! seed the search bounds of the ones still queued. The predictor keeps the
//! final CRF of every completed segment and answers with a distance-weighted
//! mean of the nearest few. State is a plain map, which makes applying
//! completions commutative: any arrival order yields the same predictions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Number of nearest completed segments consulted per prediction.
const NEIGHBOR_COUNT: usize = 4;

/// Distance-weighted nearest-neighbor CRF predictor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrfPredictor {
    completed: BTreeMap<usize, u32>,
    disabled: bool,
}

impl CrfPredictor {
    pub fn new(disabled: bool) -> Self {
        Self {
            completed: BTreeMap::new(),
            disabled,
        }
    }

    /// Record a completed segment's final CRF.
    pub fn record(&mut self, segment: usize, final_crf: u32) {
        self.completed.insert(segment, final_crf);
    }

    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Whether `segment` has a completed neighbor at distance one; the
    /// scheduler prefers dispatching those to keep predictions warm.
    pub fn has_adjacent_completion(&self, segment: usize) -> bool {
        self.completed.contains_key(&(segment + 1))
            || (segment > 0 && self.completed.contains_key(&(segment - 1)))
    }

    /// Predict a starting CRF for `segment`.
    ///
    /// Up to four nearest completed segments vote, each weighted by the
    /// inverse of its index distance. Returns `None` when prediction is
    /// disabled or nothing has completed yet, in which case the search uses
    /// its full QP range.
    pub fn predict(&self, segment: usize) -> Option<u32> {
        if self.disabled || self.completed.is_empty() {
            return None;
        }

        let mut neighbors: Vec<(usize, u32)> = self
            .completed
            .iter()
            .map(|(&index, &crf)| (index.abs_diff(segment), crf))
            .collect();
        neighbors.sort_by_key(|&(distance, _)| distance);
        neighbors.truncate(NEIGHBOR_COUNT);

        let mut weight_sum = 0.0;
        let mut weighted = 0.0;
        for &(distance, crf) in &neighbors {
            // A completed segment is never the one being predicted.
            let w = 1.0 / distance.max(1) as f64;
            weight_sum += w;
            weighted += w * f64::from(crf);
        }
        Some((weighted / weight_sum).round() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_predictor_returns_none() {
        let predictor = CrfPredictor::new(false);
        assert_eq!(predictor.predict(5), None);
    }

    #[test]
    fn disabled_predictor_always_returns_none() {
        let mut predictor = CrfPredictor::new(true);
        predictor.record(4, 27);
        predictor.record(6, 29);
        assert_eq!(predictor.predict(5), None);
    }

    #[test]
    fn single_neighbor_dominates() {
        let mut predictor = CrfPredictor::new(false);
        predictor.record(4, 27);
        assert_eq!(predictor.predict(5), Some(27));
        assert_eq!(predictor.predict(100), Some(27));
    }

    #[test]
    fn nearer_neighbors_carry_more_weight() {
        let mut predictor = CrfPredictor::new(false);
        predictor.record(4, 20); // distance 1
        predictor.record(8, 32); // distance 3
        // (20 * 1 + 32 * 1/3) / (4/3) = 23
        assert_eq!(predictor.predict(5), Some(23));
    }

    #[test]
    fn only_four_nearest_vote() {
        let mut predictor = CrfPredictor::new(false);
        predictor.record(1, 20);
        predictor.record(2, 20);
        predictor.record(3, 20);
        predictor.record(4, 20);
        // Far away and should be outvoted entirely.
        predictor.record(100, 48);
        assert_eq!(predictor.predict(2), Some(20));
    }

    #[test]
    fn application_order_does_not_matter() {
        let completions = [(3usize, 25u32), (9, 31), (1, 22), (6, 28)];

        let mut forward = CrfPredictor::new(false);
        for &(index, crf) in &completions {
            forward.record(index, crf);
        }
        let mut backward = CrfPredictor::new(false);
        for &(index, crf) in completions.iter().rev() {
            backward.record(index, crf);
        }

        for segment in 0..12 {
            assert_eq!(
                forward.predict(segment),
                backward.predict(segment),
                "divergence at segment {}",
                segment
            );
        }
    }

    #[test]
    fn adjacency_detection() {
        let mut predictor = CrfPredictor::new(false);
        predictor.record(5, 27);
        assert!(predictor.has_adjacent_completion(4));
        assert!(predictor.has_adjacent_completion(6));
        assert!(!predictor.has_adjacent_completion(7));
        assert!(!predictor.has_adjacent_completion(0));
    }

    #[test]
    fn predictor_state_round_trips() {
        let mut predictor = CrfPredictor::new(false);
        predictor.record(2, 24);
        predictor.record(7, 30);
        let json = serde_json::to_string(&predictor).unwrap();
        let back: CrfPredictor = serde_json::from_str(&json).unwrap();
        assert_eq!(back.predict(3), predictor.predict(3));
        assert_eq!(back.completed_count(), 2);
    }
}

//! Pairing rules deciding whether two waiting players may play each other

use crate::types::{PlayerId, RatingTriplet};
use crate::utils::{intervals_overlap, rating_window};

/// A waiting player as seen by the pairing scan
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub player_id: PlayerId,
    pub rating: RatingTriplet,
    /// Current widening from waiting in the queue
    pub tolerance: f64,
}

impl Candidate {
    pub fn new(player_id: impl Into<PlayerId>, rating: RatingTriplet, tolerance: f64) -> Self {
        Self {
            player_id: player_id.into(),
            rating,
            tolerance,
        }
    }
}

/// Trait for pairing rules
pub trait PairingRule: Send + Sync {
    /// Must be symmetric in its arguments
    fn compatible(&self, first: &Candidate, second: &Candidate) -> bool;

    fn name(&self) -> &'static str;
}

/// Interval overlap on `[rating - deviation, rating + deviation]`
///
/// Each pair is given an allowance of `window + max(tolerance1, tolerance2)`;
/// the pair is compatible iff `high1 + allowance >= low2` and
/// `low1 - allowance <= high2`.
#[derive(Debug, Clone, Default)]
pub struct IntervalOverlapRule {
    pub window: f64,
}

impl IntervalOverlapRule {
    pub fn new(window: f64) -> Self {
        Self { window }
    }

    pub fn allowance(&self, first: &Candidate, second: &Candidate) -> f64 {
        self.window + first.tolerance.max(second.tolerance)
    }
}

impl PairingRule for IntervalOverlapRule {
    fn compatible(&self, first: &Candidate, second: &Candidate) -> bool {
        intervals_overlap(
            rating_window(&first.rating),
            rating_window(&second.rating),
            self.allowance(first, second),
        )
    }

    fn name(&self) -> &'static str {
        "interval_overlap"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, rating: f64, deviation: f64, tolerance: f64) -> Candidate {
        Candidate::new(id, RatingTriplet::new(rating, deviation, 0.06), tolerance)
    }

    #[test]
    fn test_overlapping_intervals() {
        let rule = IntervalOverlapRule::default();
        let a = candidate("a", 1500.0, 140.0, 0.0);
        let b = candidate("b", 1500.0, 140.0, 0.0);
        assert!(rule.compatible(&a, &b));

        // Touching edges count as overlap
        let c = candidate("c", 1780.0, 140.0, 0.0);
        assert!(rule.compatible(&a, &c));
        assert!(rule.compatible(&c, &a));
    }

    #[test]
    fn test_disjoint_intervals() {
        let rule = IntervalOverlapRule::default();
        let c = candidate("c", 1500.0, 50.0, 0.0);
        let d = candidate("d", 2200.0, 50.0, 0.0);
        assert!(!rule.compatible(&c, &d));
        assert!(!rule.compatible(&d, &c));
    }

    #[test]
    fn test_tolerance_closes_gap() {
        let rule = IntervalOverlapRule::default();
        let d = candidate("d", 2200.0, 50.0, 575.0);
        assert!(!rule.compatible(&candidate("c", 1500.0, 50.0, 575.0), &d));
        assert!(rule.compatible(&candidate("c", 1500.0, 50.0, 600.0), &d));

        // The larger of the two tolerances applies
        assert!(rule.compatible(&candidate("c", 1500.0, 50.0, 0.0), &candidate("d", 2200.0, 50.0, 600.0)));
    }

    #[test]
    fn test_window_widens_every_pair() {
        let rule = IntervalOverlapRule::new(600.0);
        assert_eq!(rule.name(), "interval_overlap");
        assert!(rule.compatible(
            &candidate("c", 1500.0, 50.0, 0.0),
            &candidate("d", 2200.0, 50.0, 0.0)
        ));
    }
}

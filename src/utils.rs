//! Utility functions for the matchmaking service

use crate::types::RatingTriplet;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Generate a new unique match ID
pub fn generate_match_id() -> Uuid {
    Uuid::new_v4()
}

/// Generate a new unique rating period ID
pub fn generate_period_id() -> Uuid {
    Uuid::new_v4()
}

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// The `[rating - deviation, rating + deviation]` interval of a triplet
pub fn rating_window(triplet: &RatingTriplet) -> (f64, f64) {
    (
        triplet.rating - triplet.deviation,
        triplet.rating + triplet.deviation,
    )
}

/// Check if two closed intervals intersect once each is widened by `allowance`
pub fn intervals_overlap(first: (f64, f64), second: (f64, f64), allowance: f64) -> bool {
    first.1 + allowance >= second.0 && first.0 - allowance <= second.1
}

/// Convert a std duration to a chrono duration, saturating on overflow
pub fn to_chrono(duration: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

/// Seconds elapsed between two timestamps, zero when `later` is earlier
pub fn seconds_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    let millis = (later - earlier).num_milliseconds().max(0);
    millis as f64 / 1000.0
}

//! Jittered requeue helpers
//!
//! Reconcilers never requeue on a fixed period: a randomised delay keeps
//! many failing objects from retrying in lockstep.

use std::time::Duration;

use kube::runtime::controller::Action;
use rand::Rng;

/// Lower bound in seconds for retries after an error
pub const SHORT_MIN_SECS: u64 = 3;
/// Exclusive upper bound in seconds for retries after an error
pub const SHORT_MAX_SECS: u64 = 5;
/// Lower bound in seconds for periodic resyncs
pub const RESYNC_MIN_SECS: u64 = 45;
/// Exclusive upper bound in seconds for periodic resyncs
pub const RESYNC_MAX_SECS: u64 = 60;

/// Pick a delay of `min..max` units, excluding `max`.
///
/// `min` equal to or greater than `max` is a fixed delay of `min` units.
pub fn jittered_delay(min: u64, max: u64, unit: Duration) -> Duration {
    let count = if min >= max {
        min
    } else {
        rand::rng().random_range(min..max)
    };
    unit * count as u32
}

/// Create an action that requeues after a random delay of `min..max` units
pub fn new_requeue_with_delay(min: u64, max: u64, unit: Duration) -> Action {
    Action::requeue(jittered_delay(min, max, unit))
}

/// Requeue after 3 or 4 seconds
pub fn short_requeue() -> Action {
    new_requeue_with_delay(SHORT_MIN_SECS, SHORT_MAX_SECS, Duration::from_secs(1))
}

/// Requeue after 45 to 59 seconds
pub fn resync_requeue() -> Action {
    new_requeue_with_delay(RESYNC_MIN_SECS, RESYNC_MAX_SECS, Duration::from_secs(1))
}

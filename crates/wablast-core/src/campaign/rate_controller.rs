//! Rate controller - inter-send delay and batch throttling

use std::time::Duration;

use rand::Rng;
use wablast_storage::models::ThrottleConfig;

/// Delay to wait before the next send of a campaign.
///
/// `processed` is the number of items already attempted (`sent + failed`).
/// The first message goes out immediately; every later one waits a random
/// whole number of seconds in `[min_delay, max_delay]`, plus the throttle
/// pause each time a full batch of `throttle_rate` messages has been sent.
pub fn next_delay(throttle: &ThrottleConfig, processed: i32) -> Duration {
    next_delay_with(&mut rand::rng(), throttle, processed)
}

/// [`next_delay`] with an explicit random source
pub fn next_delay_with<R: Rng + ?Sized>(
    rng: &mut R,
    throttle: &ThrottleConfig,
    processed: i32,
) -> Duration {
    if processed <= 0 {
        return Duration::ZERO;
    }

    let (low, high) = delay_bounds(throttle);
    let mut secs = if low == high {
        low
    } else {
        rng.random_range(low..=high)
    };

    if throttle.throttle_enabled
        && throttle.throttle_rate > 0
        && processed % throttle.throttle_rate == 0
    {
        secs += u64::try_from(throttle.throttle_delay).unwrap_or(0);
    }

    Duration::from_secs(secs)
}

/// Non-negative `(min, max)` with reversed bounds swapped
fn delay_bounds(throttle: &ThrottleConfig) -> (u64, u64) {
    let min = u64::try_from(throttle.min_delay).unwrap_or(0);
    let max = u64::try_from(throttle.max_delay).unwrap_or(0);
    if min <= max {
        (min, max)
    } else {
        (max, min)
    }
}

//! Exponential backoff for failed handler attempts.
//!
//! Kept as a pure function of the attempt count and base delay, with no
//! ambient time, so retry timing is independently testable. No jitter and
//! no configured ceiling; the exponent saturates at 2^31 purely as an
//! overflow guard.

use std::time::Duration;

/// Delay before the k-th retry: `base * 2^(attempts - 1)`.
///
/// `attempts` is the new, 1-indexed attempt count, so the first retry waits
/// exactly `base`, the second `2 * base`, and so on.
pub fn retry_delay(attempts: u32, base: Duration) -> Duration {
    let exponent = attempts.saturating_sub(1).min(31);
    let multiplier = 2_u32.saturating_pow(exponent);
    base.saturating_mul(multiplier)
}

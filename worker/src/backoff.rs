//! Job-level retry backoff (spec.md §4.1 "Retry policy"): distinct from
//! `drivescout_core::retry`, which governs intra-request HTTP retries —
//! this computes the `retry_after` timestamp an individual job is
//! persisted with across separate claim cycles.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;
use std::time::Duration;

pub const BASE_DELAY: Duration = Duration::from_secs(30);
pub const CAP_DELAY: Duration = Duration::from_secs(10 * 60);

/// `min(base * 2^(attempt-1), cap)` with up to 100% jitter applied on top.
/// `attempt` is the job's attempt count after the current claim (i.e. the
/// attempt that just failed), so the first retry uses `attempt=1`.
pub fn delay_for_attempt(attempt: i32) -> Duration {
    let exponent = attempt.saturating_sub(1).max(0) as u32;
    let scaled = BASE_DELAY.saturating_mul(1u32.checked_shl(exponent).unwrap_or(u32::MAX));
    let capped = scaled.min(CAP_DELAY);
    let jitter_frac: f64 = rand::thread_rng().gen_range(0.0..=1.0);
    capped.mul_f64(jitter_frac)
}

pub fn retry_after(attempt: i32, now: DateTime<Utc>) -> DateTime<Utc> {
    let delay = delay_for_attempt(attempt);
    now + ChronoDuration::from_std(delay).unwrap_or(ChronoDuration::zero())
}

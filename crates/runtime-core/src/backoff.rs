//! Exponential backoff with jitter, shared by the retrying executor (§4.C)
//! and the failure state machine (§4.H) so the two can never drift apart.

use std::time::Duration;

/// `delay = min(max, base * 2^(attempt-1)) * (1 ± jitter)`, `attempt` is 1-based.
pub fn compute(attempt: u32, base_s: f64, max_s: f64, jitter: f64) -> Duration {
    let attempt = attempt.max(1);
    let exp = base_s * 2f64.powi((attempt - 1) as i32);
    let bounded = exp.min(max_s).max(0.0);
    let jitter = jitter.clamp(0.0, 1.0);
    let offset = if jitter > 0.0 {
        let sign: f64 = if fastrand::bool() { 1.0 } else { -1.0 };
        bounded * jitter * fastrand::f64() * sign
    } else {
        0.0
    };
    let delay_s = (bounded + offset).max(0.0);
    Duration::from_secs_f64(delay_s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_exponentially_until_capped() {
        let d1 = compute(1, 1.0, 3600.0, 0.0);
        let d2 = compute(2, 1.0, 3600.0, 0.0);
        let d3 = compute(3, 1.0, 3600.0, 0.0);
        assert_eq!(d1.as_secs_f64(), 1.0);
        assert_eq!(d2.as_secs_f64(), 2.0);
        assert_eq!(d3.as_secs_f64(), 4.0);
    }

    #[test]
    fn never_exceeds_max() {
        let d = compute(20, 1.0, 30.0, 0.0);
        assert!(d.as_secs_f64() <= 30.0);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        for attempt in 1..10 {
            let d = compute(attempt, 1.0, 3600.0, 0.5);
            let base = 1.0 * 2f64.powi((attempt - 1) as i32);
            let max_expected = base * 1.5;
            assert!(d.as_secs_f64() <= max_expected + f64::EPSILON);
        }
    }
}

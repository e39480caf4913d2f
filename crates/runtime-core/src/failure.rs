//! Retry / failure state machine (§4.H): decides the disposition of a failed
//! queue record.

use crate::backoff;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How a handler classified its own failure (or how the registry classified it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureClassification {
    Retryable,
    NonRetryable,
}

/// Outcome of the decision table in §4.H. Serializable so it can be spooled
/// to the local operation queue (§4.E) when the database is unreachable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Disposition {
    /// `status='pending'`, lease cleared, `attempts += 1`, `next_visible_at` set.
    Retry { next_visible_at: DateTime<Utc> },
    /// `status='failed'`, `attempts += 1`, `completed_at` set, lease cleared.
    Failed,
    /// Same as `Failed` but `status='dead'`: attempt budget exhausted.
    Dead,
}

/// Backoff parameters for the retry disposition (mirrors `db_retry_*`, §4.A/§4.C).
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base_s: f64,
    pub max_s: f64,
    pub jitter: f64,
}

/// Decide the disposition of a record that just failed its `attempts_before`-th attempt.
///
/// `attempts_before` is the `attempts` value prior to this failure; the
/// post-increment attempt index (`attempts_before + 1`) is used both as the
/// dead-letter threshold and the backoff attempt index, per §4.H.
pub fn decide(
    classification: FailureClassification,
    attempts_before: u32,
    max_attempts: u32,
    backoff: BackoffPolicy,
    now: DateTime<Utc>,
) -> Disposition {
    let attempts_after = attempts_before + 1;

    if classification == FailureClassification::NonRetryable {
        return Disposition::Failed;
    }

    if attempts_after >= max_attempts {
        return Disposition::Dead;
    }

    let delay: Duration = backoff::compute(attempts_after, backoff.base_s, backoff.max_s, backoff.jitter);
    Disposition::Retry {
        next_visible_at: now + chrono::Duration::from_std(delay).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy { base_s: 1.0, max_s: 3600.0, jitter: 0.0 }
    }

    #[test]
    fn non_retryable_always_fails_permanently() {
        let now = Utc::now();
        let d = decide(FailureClassification::NonRetryable, 0, 3, policy(), now);
        assert_eq!(d, Disposition::Failed);
    }

    #[test]
    fn exhausting_attempts_dead_letters() {
        let now = Utc::now();
        // max_attempts=2: after this failure attempts_after == 2 == max_attempts -> dead.
        let d = decide(FailureClassification::Retryable, 1, 2, policy(), now);
        assert_eq!(d, Disposition::Dead);
    }

    #[test]
    fn otherwise_retries_with_backoff() {
        let now = Utc::now();
        match decide(FailureClassification::Retryable, 0, 3, policy(), now) {
            Disposition::Retry { next_visible_at } => assert!(next_visible_at > now),
            other => panic!("expected Retry, got {other:?}"),
        }
    }

    /// Invariant 4 (§8): attempts == max_attempts exactly when status becomes dead.
    #[test]
    fn attempt_bound_invariant_holds_at_dead_letter_boundary() {
        let now = Utc::now();
        for max_attempts in 1..10u32 {
            let attempts_before = max_attempts - 1;
            let d = decide(FailureClassification::Retryable, attempts_before, max_attempts, policy(), now);
            assert_eq!(d, Disposition::Dead);
            assert_eq!(attempts_before + 1, max_attempts);
        }
    }
}

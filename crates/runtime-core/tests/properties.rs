//! Property-based tests for the testable invariants in §8: backoff bounds,
//! the dead-letter attempt boundary, status terminality, and config
//! resolution order.

use chrono::Utc;
use proptest::prelude::*;
use runtime_core::backoff;
use runtime_core::config::{keys, ConfigProvider, Environment, LayeredConfig};
use runtime_core::failure::{self, BackoffPolicy, Disposition, FailureClassification};
use runtime_core::record::RecordStatus;

fn arb_status() -> impl Strategy<Value = RecordStatus> {
    prop_oneof![
        Just(RecordStatus::Pending),
        Just(RecordStatus::Claimed),
        Just(RecordStatus::Processing),
        Just(RecordStatus::Completed),
        Just(RecordStatus::Failed),
        Just(RecordStatus::Dead),
    ]
}

proptest! {
    /// Invariant 6 (§8): backoff delay never exceeds `max_s * (1 + jitter)`
    /// and is never negative, for any attempt/base/max/jitter in range.
    #[test]
    fn backoff_stays_within_bounds(
        attempt in 1u32..64,
        base_s in 0.01f64..10.0,
        max_s in 1.0f64..3600.0,
        jitter in 0.0f64..1.0,
    ) {
        let delay = backoff::compute(attempt, base_s, max_s, jitter);
        prop_assert!(delay.as_secs_f64() >= 0.0);
        prop_assert!(delay.as_secs_f64() <= max_s * (1.0 + jitter) + 1e-9);
    }

    /// Invariant 4 (§8): a record reaches `dead` exactly when
    /// `attempts_before + 1 >= max_attempts` and the failure was retryable.
    #[test]
    fn dead_letter_exactly_at_attempt_bound(
        attempts_before in 0u32..20,
        max_attempts in 1u32..20,
    ) {
        let policy = BackoffPolicy { base_s: 1.0, max_s: 60.0, jitter: 0.0 };
        let disposition = failure::decide(
            FailureClassification::Retryable,
            attempts_before,
            max_attempts,
            policy,
            Utc::now(),
        );
        let should_be_dead = attempts_before + 1 >= max_attempts;
        prop_assert_eq!(matches!(disposition, Disposition::Dead), should_be_dead);
    }

    /// Invariant 3 (§8): exactly the terminal statuses are sinks, nothing else is.
    #[test]
    fn only_documented_statuses_are_terminal(status in arb_status()) {
        let expected = matches!(status, RecordStatus::Completed | RecordStatus::Failed | RecordStatus::Dead);
        prop_assert_eq!(status.is_terminal(), expected);
    }

    /// Invariant 1 (§8), restated for the config layer: a flow-level override,
    /// when present, always wins regardless of what the other layers hold.
    #[test]
    fn flow_override_always_wins(
        default_value in "[a-z0-9]{1,8}",
        environment_value in "[a-z0-9]{1,8}",
        override_value in "[a-z0-9]{1,8}",
    ) {
        let cfg = LayeredConfig::new(Environment::Development, "test")
            .with_default(keys::MAX_ATTEMPTS, default_value)
            .with_environment_value(keys::MAX_ATTEMPTS, environment_value)
            .with_flow_override(keys::MAX_ATTEMPTS, override_value.clone());
        prop_assert_eq!(cfg.get(keys::MAX_ATTEMPTS), Some(override_value));
    }
}

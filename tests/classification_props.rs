//! Property sweeps over the outcome classification table.

use proptest::prelude::*;

use webhook_pipeline::delivery::{classify_outcome, EXPONENTIAL_BACKOFF, MAX_RETRY_ATTEMPTS};
use webhook_pipeline::models::WebhookStatus;

proptest! {
    /// At the attempt cap no failure is ever retried again; successes still
    /// deliver.
    #[test]
    fn attempt_cap_is_absorbing(code in 100u16..600, retry_after in proptest::option::of(0i64..3600)) {
        let outcome = classify_outcome(MAX_RETRY_ATTEMPTS, code, retry_after);
        if (200..300).contains(&code) {
            prop_assert_eq!(outcome.status, WebhookStatus::Delivered);
        } else {
            prop_assert_eq!(outcome.status, WebhookStatus::FailedPermanently);
        }
        if outcome.status != WebhookStatus::FailedTemporarily {
            prop_assert_eq!(outcome.retry_delay_secs, None);
        }
    }

    /// A retry delay exists exactly when the outcome is a temporary failure.
    #[test]
    fn delay_iff_temporary(
        attempt in 1i32..=MAX_RETRY_ATTEMPTS,
        code in 100u16..600,
        retry_after in proptest::option::of(0i64..3600),
    ) {
        let outcome = classify_outcome(attempt, code, retry_after);
        prop_assert_eq!(
            outcome.retry_delay_secs.is_some(),
            outcome.status == WebhookStatus::FailedTemporarily
        );
    }

    /// Without a Retry-After value, temporary failures follow the
    /// exponential schedule by attempt index.
    #[test]
    fn schedule_is_indexed_by_attempt(attempt in 1i32..MAX_RETRY_ATTEMPTS) {
        for code in [429u16, 500, 503, 504] {
            let outcome = classify_outcome(attempt, code, None);
            prop_assert_eq!(outcome.status, WebhookStatus::FailedTemporarily);
            prop_assert_eq!(
                outcome.retry_delay_secs,
                Some(EXPONENTIAL_BACKOFF[(attempt - 1) as usize])
            );
        }
    }

    /// Non-429 client errors never retry, at any attempt.
    #[test]
    fn other_4xx_is_always_permanent(
        attempt in 1i32..=MAX_RETRY_ATTEMPTS,
        code in 400u16..500,
        retry_after in proptest::option::of(0i64..3600),
    ) {
        prop_assume!(code != 429);
        let outcome = classify_outcome(attempt, code, retry_after);
        prop_assert_eq!(outcome.status, WebhookStatus::FailedPermanently);
    }
}

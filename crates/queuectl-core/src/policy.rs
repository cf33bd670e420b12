//! Pure retry/backoff decisions. No I/O, no async, these are plain
//! functions over integers so they can be exhaustively unit tested.

/// What to do after observing a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDecision {
    Retry,
    Dlq,
}

/// Exponential backoff, capped. `attempts` is the number of attempts
/// already completed (including the one that just failed), so the delay
/// after the first failure is `backoff_base ^ 1`.
pub fn backoff_seconds(attempts: i64, backoff_base: i64, backoff_max_delay: i64) -> i64 {
    let attempts = attempts.max(0) as u32;
    let delay = backoff_base.saturating_pow(attempts);
    delay.min(backoff_max_delay)
}

/// Decide whether a job that has now failed `attempts_after_this` times
/// should be retried or sent to the DLQ.
pub fn decide_after_failure(attempts_after_this: i64, max_retries: i64) -> FailureDecision {
    if attempts_after_this >= max_retries {
        FailureDecision::Dlq
    } else {
        FailureDecision::Retry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially() {
        assert_eq!(backoff_seconds(1, 2, 3600), 2);
        assert_eq!(backoff_seconds(2, 2, 3600), 4);
        assert_eq!(backoff_seconds(3, 2, 3600), 8);
        assert_eq!(backoff_seconds(10, 2, 3600), 1024);
    }

    #[test]
    fn backoff_caps_at_max_delay() {
        assert_eq!(backoff_seconds(20, 2, 3600), 3600);
        assert_eq!(backoff_seconds(100, 2, 60), 60);
    }

    #[test]
    fn backoff_is_total_for_zero_attempts() {
        assert_eq!(backoff_seconds(0, 2, 3600), 1);
    }

    #[test]
    fn decide_retries_below_budget() {
        assert_eq!(decide_after_failure(1, 3), FailureDecision::Retry);
        assert_eq!(decide_after_failure(2, 3), FailureDecision::Retry);
    }

    #[test]
    fn decide_dlqs_at_or_past_budget() {
        assert_eq!(decide_after_failure(3, 3), FailureDecision::Dlq);
        assert_eq!(decide_after_failure(4, 3), FailureDecision::Dlq);
    }
}

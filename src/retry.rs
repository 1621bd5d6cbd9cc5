//! The retry engine (C8, §4.8): classifies errors and replays transactional work with
//! exponential backoff.

use std::time::Duration;

use rand::Rng;

use crate::error::{Error, Result};

/// Backoff schedule: initial delay 1s, multiplier 2.0, jitter ±20%, cap 30s (§4.8, §8).
#[derive(Debug, Clone, Copy)]
pub struct BackoffSchedule {
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub jitter: f64,
    pub max_delay: Duration,
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: 0.2,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl BackoffSchedule {
    /// The next delay after `previous`, within `[1.6*previous, 2.4*previous]` when
    /// `multiplier == 2.0` and `jitter == 0.2` (§8), capped at `max_delay`.
    pub fn next_delay(&self, previous: Duration, rng: &mut impl Rng) -> Duration {
        let base = previous.as_secs_f64() * self.multiplier;
        let low = base * (1.0 - self.jitter);
        let high = base * (1.0 + self.jitter);
        let jittered = if high > low {
            rng.gen_range(low..high)
        } else {
            low
        };
        Duration::from_secs_f64(jittered.min(self.max_delay.as_secs_f64()))
    }
}

/// Whether a first-attempt-only error should be retried. On later attempts the same error
/// kinds remain retryable via `Error::is_retryable`; this only covers the first-attempt
/// carve-out in §4.8 (`ConnectionAcquisitionTimeout` is only retried once).
pub fn is_retryable(error: &Error, attempt: u32) -> bool {
    if error.is_retryable() {
        return true;
    }
    attempt == 0 && matches!(error, Error::Timeout(_))
}

/// Drives one piece of transactional work, represented here as a closure returning
/// `Result<T>`; a real session's `execute_read`/`execute_write` supplies the closure that
/// opens a transaction, runs the caller's function, and commits or rolls back.
///
/// Each failed attempt is recorded so the final error carries the history of earlier
/// attempts, per "chained list of suppressed earlier attempts" in §4.8.
pub struct RetryOutcome<T> {
    pub result: Result<T>,
    pub attempts: u32,
    pub suppressed: Vec<Error>,
}

pub async fn retry_async<T, F, Fut>(
    schedule: BackoffSchedule,
    budget: Duration,
    mut work: F,
) -> RetryOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut rng = rand::thread_rng();
    let mut delay = schedule.initial_delay;
    let mut attempt = 0u32;
    let mut suppressed = Vec::new();
    let deadline = tokio::time::Instant::now() + budget;

    loop {
        match work(attempt).await {
            Ok(value) => {
                return RetryOutcome {
                    result: Ok(value),
                    attempts: attempt + 1,
                    suppressed,
                };
            }
            Err(error) => {
                if !is_retryable(&error, attempt) || tokio::time::Instant::now() >= deadline {
                    suppressed.push(error);
                    let last = suppressed.pop().expect("just pushed");
                    return RetryOutcome {
                        result: Err(last),
                        attempts: attempt + 1,
                        suppressed,
                    };
                }
                suppressed.push(error);
                let sleep_for = delay.min(deadline.saturating_duration_since(tokio::time::Instant::now()));
                tokio::time::sleep(sleep_for).await;
                delay = schedule.next_delay(delay, &mut rng);
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Neo4jError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> Error {
        Error::TransientError(Neo4jError {
            code: "Neo.TransientError.Transaction.DeadlockDetected".into(),
            message: "deadlock".into(),
            gql_status: None,
        })
    }

    #[test]
    fn next_delay_stays_within_jitter_band() {
        let schedule = BackoffSchedule::default();
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let delay = schedule.next_delay(Duration::from_secs(1), &mut rng);
            assert!(delay.as_secs_f64() >= 1.6 && delay.as_secs_f64() <= 2.4);
        }
    }

    #[test]
    fn next_delay_never_exceeds_cap() {
        let schedule = BackoffSchedule::default();
        let mut rng = rand::thread_rng();
        let delay = schedule.next_delay(Duration::from_secs(100), &mut rng);
        assert!(delay <= schedule.max_delay);
    }

    #[test]
    fn transient_error_is_retryable_on_any_attempt() {
        assert!(is_retryable(&transient(), 0));
        assert!(is_retryable(&transient(), 5));
    }

    #[test]
    fn client_error_is_never_retryable() {
        let err = Error::ClientError(Neo4jError {
            code: "Neo.ClientError.Statement.SyntaxError".into(),
            message: "bad".into(),
            gql_status: None,
        });
        assert!(!is_retryable(&err, 0));
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures_within_budget() {
        let attempts = AtomicU32::new(0);
        let outcome = retry_async(
            BackoffSchedule {
                initial_delay: Duration::from_millis(1),
                ..BackoffSchedule::default()
            },
            Duration::from_secs(5),
            |_attempt| {
                let count = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if count < 2 {
                        Err(transient())
                    } else {
                        Ok(42)
                    }
                }
            },
        )
        .await;
        assert_eq!(outcome.result.unwrap(), 42);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.suppressed.len(), 2);
    }

    #[tokio::test]
    async fn fatal_error_is_not_retried() {
        let outcome: RetryOutcome<()> = retry_async(
            BackoffSchedule::default(),
            Duration::from_secs(5),
            |_attempt| async {
                Err(Error::ClientError(Neo4jError {
                    code: "Neo.ClientError.Statement.SyntaxError".into(),
                    message: "bad".into(),
                    gql_status: None,
                }))
            },
        )
        .await;
        assert!(outcome.result.is_err());
        assert_eq!(outcome.attempts, 1);
    }
}

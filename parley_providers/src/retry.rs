use std::future::Future;

use parley_core::{Error, Result, RetryPolicy};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Retry an async operation under `policy`.
///
/// `operation` receives the 1-based attempt number. A failure is retried only
/// while attempts remain and the policy classifies it as transient; the
/// backoff sleep grows per [`RetryPolicy::delay_for_attempt`]. Cancelling
/// `cancel` interrupts both the in-flight attempt and the sleep with
/// [`Error::Cancelled`], which is never retried.
///
/// # Returns
/// The first success, or the error that ended the loop, unchanged.
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1_u32;

    loop {
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(Error::Cancelled),
            result = operation(attempt) => result,
        };

        let error = match outcome {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if !policy.should_retry(attempt, &error) {
            if attempt > 1 {
                warn!(
                    "Request failed (attempt {}/{}): {error}. Giving up.",
                    attempt,
                    policy.max_attempts()
                );
            }
            return Err(error);
        }

        let delay = policy.delay_for_attempt(attempt);
        warn!(
            "Request failed (attempt {}/{}): {error}. Retrying after {:.2}s...",
            attempt,
            policy.max_attempts(),
            delay.as_secs_f64()
        );

        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::Cancelled),
            () = sleep(delay) => {}
        }
        attempt += 1;
    }
}

//! Fail-open helpers for infrastructure side channels
//!
//! Activity logs, credit-ledger reports and similar sinks must never stop an
//! agent. Failures are logged with `tracing::warn!` and swallowed.
//!
//! Never wrap agent execution, budget checks or the completion gate in these.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::Result;

/// Run an infrastructure operation, returning `None` instead of an error
///
/// ```no_run
/// use arbor_core::fail_open::fail_open;
/// use arbor_core::Result;
///
/// async fn append_activity() -> Result<()> {
///     Ok(())
/// }
///
/// async fn example() {
///     let logged = fail_open("activity_log", || append_activity()).await;
///     assert!(logged.is_some());
/// }
/// ```
pub async fn fail_open<F, Fut, T>(operation: &str, f: F) -> Option<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match f().await {
        Ok(val) => Some(val),
        Err(e) => {
            warn!(operation, error = %e, "fail-open operation failed");
            None
        }
    }
}

/// Like [`fail_open`] but retries with a linearly growing delay
///
/// Attempt `n` waits `base_delay * n` before the next try.
pub async fn fail_open_with_retries<F, Fut, T>(
    operation: &str,
    mut f: F,
    attempts: usize,
    base_delay: Duration,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    for attempt in 1..=attempts {
        match f().await {
            Ok(val) => return Some(val),
            Err(e) if attempt == attempts => {
                warn!(operation, attempts, error = %e, "fail-open operation gave up");
                return None;
            }
            Err(e) => {
                warn!(operation, attempt, attempts, error = %e, "fail-open operation failed, retrying");
                tokio::time::sleep(base_delay * attempt as u32).await;
            }
        }
    }
    None
}

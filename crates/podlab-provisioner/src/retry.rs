//! Backoff helpers for directory propagation lag.
//!
//! The directory is eventually consistent: an object created moments ago may
//! not be visible to lookups yet, and writes that reference it can fail with
//! a not-found until replication catches up. Both helpers retry under the
//! configured [`PropagationPolicy`] instead of sleeping a fixed interval.

use std::future::Future;

use tokio::time::sleep;
use tracing::debug;

use podlab_config::PropagationPolicy;
use podlab_directory::DirectoryError;

/// Run a lookup, retrying while it comes back empty.
///
/// Returns `Ok(None)` once the policy's attempts are exhausted; the caller
/// decides whether absence means skip or create. Errors are never retried
/// here, only genuine absence.
pub(crate) async fn resolve_with_backoff<T, F, Fut>(
    policy: &PropagationPolicy,
    what: &str,
    mut lookup: F,
) -> Result<Option<T>, DirectoryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, DirectoryError>>,
{
    let mut attempt = 1;
    loop {
        if let Some(found) = lookup().await? {
            return Ok(Some(found));
        }
        if attempt >= policy.max_attempts {
            return Ok(None);
        }
        let delay = policy.delay_after(attempt);
        debug!(
            what,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "not visible yet, waiting for propagation"
        );
        sleep(delay).await;
        attempt += 1;
    }
}

/// Run a write whose referenced objects may not have propagated yet,
/// retrying not-found failures while attempts remain. Every other error
/// surfaces immediately.
pub(crate) async fn write_with_backoff<T, F, Fut>(
    policy: &PropagationPolicy,
    what: &str,
    mut op: F,
) -> Result<T, DirectoryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DirectoryError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Err(e) if e.is_not_found() && attempt < policy.max_attempts => {
                let delay = policy.delay_after(attempt);
                debug!(
                    what,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "referenced object not visible yet, retrying write"
                );
                sleep(delay).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    fn instant_policy(max_attempts: u32) -> PropagationPolicy {
        PropagationPolicy {
            initial_delay_ms: 0,
            max_attempts,
            multiplier: 1,
        }
    }

    #[tokio::test]
    async fn lookup_retries_until_the_object_appears() {
        let calls = Cell::new(0u32);
        let found = resolve_with_backoff(&instant_policy(5), "thing", || {
            let n = calls.get() + 1;
            calls.set(n);
            async move { Ok::<_, DirectoryError>(if n < 3 { None } else { Some(n) }) }
        })
        .await
        .unwrap();

        assert_eq!(found, Some(3));
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn lookup_gives_up_after_the_attempt_budget() {
        let calls = Cell::new(0u32);
        let found: Option<u32> = resolve_with_backoff(&instant_policy(3), "thing", || {
            calls.set(calls.get() + 1);
            async { Ok(None) }
        })
        .await
        .unwrap();

        assert_eq!(found, None);
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn disabled_policy_looks_up_exactly_once() {
        let calls = Cell::new(0u32);
        let found: Option<u32> = resolve_with_backoff(&PropagationPolicy::none(), "thing", || {
            calls.set(calls.get() + 1);
            async { Ok(None) }
        })
        .await
        .unwrap();

        assert_eq!(found, None);
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn write_retries_only_not_found_failures() {
        let calls = Cell::new(0u32);
        let value = write_with_backoff(&instant_policy(4), "thing", || {
            let n = calls.get() + 1;
            calls.set(n);
            async move {
                if n < 2 {
                    Err(DirectoryError::Api {
                        code: "Request_ResourceNotFound".into(),
                        message: "not there yet".into(),
                    })
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 2);
        assert_eq!(calls.get(), 2);
    }

    #[tokio::test]
    async fn write_surfaces_other_errors_immediately() {
        let calls = Cell::new(0u32);
        let result: Result<(), _> = write_with_backoff(&instant_policy(4), "thing", || {
            calls.set(calls.get() + 1);
            async {
                Err(DirectoryError::Api {
                    code: "Request_BadRequest".into(),
                    message: "no".into(),
                })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }
}

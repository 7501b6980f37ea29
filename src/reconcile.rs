//! The two reconciler primitives shared by the read reconciler, the
//! transaction pipeline's nonce/broadcast/confirmation stages, and the
//! façade's raw query methods.
//!
//! `all_then_pick` always waits for every task and only fails if every one
//! of them did; `first_success` races every task and returns as soon as one
//! succeeds, tolerating "soft" failures from the others. Both primitives
//! are built on `futures_util`'s unordered combinators rather than
//! `tokio::spawn`, so they can race futures that borrow endpoint state
//! (the common case here) without an artificial `'static` bound — dropping
//! an unpolled future is itself cancellation, so no explicit abort step is
//! needed once a winner is found.

use std::future::Future;

use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;

use crate::error::MultiRpcError;

/// Awaits every task to completion; fails only if all of them did.
///
/// On success, `select` picks one value out of every successful result
/// (e.g. argmax-by-block-number, or max-nonce). On total failure, the
/// first error observed (in task order) is carried inside
/// [`MultiRpcError::FailedOnAllRpcs`].
pub async fn all_then_pick<T, F>(
    tasks: Vec<impl Future<Output = Result<T, MultiRpcError>>>,
    select: F,
) -> Result<T, MultiRpcError>
where
    F: FnOnce(Vec<T>) -> T,
{
    let results = futures_util::future::join_all(tasks).await;

    let mut successes = Vec::with_capacity(results.len());
    let mut first_error = None;
    for result in results {
        match result {
            Ok(value) => successes.push(value),
            Err(err) => {
                if first_error.is_none() {
                    first_error = Some(err.to_string());
                }
            }
        }
    }

    if successes.is_empty() {
        return Err(MultiRpcError::FailedOnAllRpcs(
            first_error.unwrap_or_else(|| "no tasks were provided".to_owned()),
        ));
    }

    Ok(select(successes))
}

/// Races every task; returns the first success, tolerating soft failures
/// from the rest.
///
/// `is_soft` classifies a failure as transient (logged, ignored, the race
/// keeps waiting on other branches) or terminal (the race stops
/// immediately and returns that error without waiting on the rest).
/// Whichever branches haven't resolved yet are simply dropped once this
/// function returns — a `FuturesUnordered` has no reason to keep polling
/// them, and dropping an in-flight request future is how its underlying
/// I/O gets cancelled.
///
/// Precedence on total failure (no winner observed): a terminal failure
/// takes priority over any soft failure, which in turn takes priority over
/// the generic [`MultiRpcError::FailedOnAllRpcs`] fallback.
pub async fn first_success<T>(
    tasks: Vec<impl Future<Output = Result<T, MultiRpcError>>>,
    is_soft: fn(&MultiRpcError) -> bool,
) -> Result<T, MultiRpcError> {
    let mut set: FuturesUnordered<_> = tasks.into_iter().collect();

    let mut soft_error: Option<MultiRpcError> = None;
    while let Some(result) = set.next().await {
        match result {
            Ok(value) => return Ok(value),
            Err(err) => {
                if is_soft(&err) {
                    soft_error = Some(err);
                } else {
                    return Err(err);
                }
            }
        }
    }

    Err(soft_error.map_or_else(
        || MultiRpcError::FailedOnAllRpcs("no tasks were provided".to_owned()),
        |err| MultiRpcError::FailedOnAllRpcs(err.to_string()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready<T>(value: T) -> impl Future<Output = Result<T, MultiRpcError>> {
        std::future::ready(Ok(value))
    }

    fn failed<T>(message: &str) -> impl Future<Output = Result<T, MultiRpcError>> {
        std::future::ready(Err(MultiRpcError::FailedOnAllRpcs(message.to_owned())))
    }

    #[tokio::test]
    async fn all_then_pick_selects_from_successes() {
        let tasks = vec![ready(1u64), ready(5u64), ready(3u64)];
        let result = all_then_pick(tasks, |values| values.into_iter().max().unwrap()).await;
        assert_eq!(result.unwrap(), 5);
    }

    #[tokio::test]
    async fn all_then_pick_fails_only_when_all_fail() {
        let tasks = vec![failed::<u64>("boom")];
        let result = all_then_pick(tasks, |values| values.into_iter().max().unwrap()).await;
        assert!(matches!(result, Err(MultiRpcError::FailedOnAllRpcs(_))));
    }

    #[tokio::test]
    async fn first_success_returns_first_winner() {
        let tasks: Vec<std::pin::Pin<Box<dyn Future<Output = Result<u64, MultiRpcError>>>>> = vec![
            Box::pin(async {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                Ok(1)
            }),
            Box::pin(async { Ok(2) }),
        ];
        let result = first_success(tasks, |_| true).await;
        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test]
    async fn first_success_propagates_terminal_failure_immediately() {
        let tasks: Vec<std::pin::Pin<Box<dyn Future<Output = Result<u64, MultiRpcError>>>>> = vec![
            Box::pin(async { Err(MultiRpcError::TransactionValueError("insufficient funds".to_owned())) }),
            Box::pin(async {
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                Ok(1)
            }),
        ];
        let result = first_success(tasks, MultiRpcError::is_soft_broadcast_error).await;
        assert!(matches!(result, Err(MultiRpcError::TransactionValueError(_))));
    }
}

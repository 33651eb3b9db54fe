//! Bounded parallel mapping over a collection of work items.

use crate::error::PipelineError;
use crate::task::cancellable;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Run `f` over every item with at most `limit` invocations in flight.
///
/// Results come back in input order. Once the cancellation token fires no
/// new invocations start; already-dispatched ones observe cancellation at
/// their own suspension points. Entries are `None` for items that were never
/// dispatched or settled as cancelled.
///
/// The first non-cancellation error is surfaced to the caller only after
/// every in-flight invocation has settled; errors from other items are
/// logged, not swallowed silently.
pub async fn map_in_parallel<T, R, F, Fut>(
    items: Vec<T>,
    limit: usize,
    cancel: &CancellationToken,
    mut f: F,
) -> Result<Vec<Option<R>>, PipelineError>
where
    T: Send + 'static,
    R: Send + 'static,
    F: FnMut(T) -> Fut,
    Fut: Future<Output = Result<R, PipelineError>> + Send + 'static,
{
    let total = items.len();
    let gate = Arc::new(Semaphore::new(limit));
    let mut tasks: JoinSet<(usize, Result<R, PipelineError>)> = JoinSet::new();
    let mut results: Vec<Option<R>> = std::iter::repeat_with(|| None).take(total).collect();
    let mut first_error: Option<PipelineError> = None;

    for (index, item) in items.into_iter().enumerate() {
        // An aborted acquire drops out of the queue without holding a slot.
        let permit = match cancellable(cancel, gate.clone().acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            // The gate is never closed, and cancellation stops dispatch.
            _ => {
                debug!("parallel map cancelled before dispatching item {}", index);
                break;
            }
        };
        let future = f(item);
        tasks.spawn(async move {
            let _permit = permit;
            (index, future.await)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, Ok(value))) => results[index] = Some(value),
            Ok((index, Err(error))) if error.is_cancelled() => {
                debug!("item {} settled as cancelled", index);
            }
            Ok((index, Err(error))) => {
                if first_error.is_none() {
                    first_error = Some(error);
                } else {
                    warn!("item {} also failed: {}", index, error);
                }
            }
            Err(join_error) => {
                if first_error.is_none() {
                    first_error = Some(PipelineError::Join(join_error.to_string()));
                } else {
                    warn!("worker task died: {}", join_error);
                }
            }
        }
    }

    match first_error {
        Some(error) => Err(error),
        None => Ok(results),
    }
}

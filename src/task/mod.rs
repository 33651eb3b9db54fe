//! Concurrency primitives: cancellable waits, bounded parallel mapping, and
//! single-assignment shared futures.

pub mod parallel;
pub mod shared;

pub use parallel::map_in_parallel;
pub use shared::SharedFuture;

use crate::error::PipelineError;
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Race a future against the run's cancellation token.
///
/// Every join point in the pipeline (semaphore queue, shared-future wait,
/// retry backoff, in-flight call) suspends through this one helper, so an
/// aborted run never hangs on any of them.
pub async fn cancellable<F: Future>(
    cancel: &CancellationToken,
    future: F,
) -> Result<F::Output, PipelineError> {
    match cancel.run_until_cancelled(future).await {
        Some(output) => Ok(output),
        None => Err(PipelineError::Cancelled),
    }
}

//! Single-assignment shared future.
//!
//! A value computed exactly once by a background producer task and awaited
//! by any number of independent consumers. Used for the run-scoped glossary
//! and speaker profiles.

use crate::error::PipelineError;
use crate::task::cancellable;
use std::future::Future;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// A shared, single-assignment value.
///
/// Cloning the handle is cheap; all clones observe the same published value.
/// If the producer fails, the type's default is published instead so
/// consumers proceed with degraded context rather than erroring out.
#[derive(Debug, Clone)]
pub struct SharedFuture<T> {
    rx: watch::Receiver<Option<T>>,
}

impl<T> SharedFuture<T>
where
    T: Clone + Default + Send + Sync + 'static,
{
    /// Spawn the producer and return the consumer handle plus the producer's
    /// join handle. The orchestrator keeps the join handle so the background
    /// task is supervised, not fire-and-forget.
    pub fn spawn<F>(label: &'static str, producer: F) -> (Self, JoinHandle<()>)
    where
        F: Future<Output = Result<T, PipelineError>> + Send + 'static,
    {
        let (tx, rx) = watch::channel(None);
        let handle = tokio::spawn(async move {
            let value = match producer.await {
                Ok(value) => value,
                Err(error) if error.is_cancelled() => {
                    info!("{} producer cancelled, publishing default", label);
                    T::default()
                }
                Err(error) => {
                    warn!(
                        "{} producer failed: {}, continuing with default",
                        label, error
                    );
                    T::default()
                }
            };
            let _ = tx.send(Some(value));
        });
        (Self { rx }, handle)
    }

    /// A future that is already resolved, for features switched off in
    /// configuration.
    pub fn ready(value: T) -> Self {
        let (tx, rx) = watch::channel(Some(value));
        drop(tx);
        Self { rx }
    }

    /// Await the published value.
    ///
    /// Returns immediately once the producer has published; suspends
    /// (cancellably) otherwise. A producer that died without publishing
    /// resolves to the default.
    pub async fn get(&self, cancel: &CancellationToken) -> Result<T, PipelineError> {
        let mut rx = self.rx.clone();
        match cancellable(cancel, rx.wait_for(|value| value.is_some())).await? {
            Ok(guard) => Ok(guard.as_ref().cloned().unwrap_or_default()),
            // Sender dropped before publishing: the producer panicked.
            Err(_) => Ok(T::default()),
        }
    }

    /// Non-blocking peek for progress display only; never a substitute for
    /// `get`.
    pub fn is_ready(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// The published value, or the default when nothing was published.
    /// Intended for after the producer has been joined.
    pub fn value_or_default(&self) -> T {
        self.rx.borrow().clone().unwrap_or_default()
    }
}

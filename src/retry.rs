//! Retry policies: transient-failure backoff and the generate/validate
//! post-check wrapper.

use crate::error::PipelineError;
use crate::task::cancellable;
use backon::{ExponentialBuilder, Retryable};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Backoff settings for transient inference failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first (default: 3)
    pub max_attempts: usize,
    /// First backoff delay in milliseconds
    pub base_delay_ms: u64,
    /// Backoff ceiling in milliseconds
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
        }
    }
}

/// Run `op`, retrying classified-retryable errors with exponential backoff
/// plus jitter. Fatal errors abort immediately; cancellation aborts the
/// attempt and any backoff sleep.
pub async fn with_retries<T, F, Fut>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    label: &str,
    op: F,
) -> Result<T, PipelineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PipelineError>>,
{
    let backoff = ExponentialBuilder::default()
        .with_jitter()
        .with_min_delay(Duration::from_millis(config.base_delay_ms))
        .with_max_delay(Duration::from_millis(config.max_delay_ms))
        .with_max_times(config.max_attempts.saturating_sub(1));

    let attempts = op
        .retry(backoff)
        .when(|error: &PipelineError| error.is_retryable())
        .notify(|error, delay| {
            warn!("{}: retrying in {:?} after error: {}", label, delay, error);
        });

    cancellable(cancel, attempts).await?
}

/// What a structural validator found wrong with generated output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub problems: Vec<String>,
}

impl ValidationReport {
    pub fn ok(&self) -> bool {
        self.problems.is_empty()
    }

    pub fn problem(&mut self, message: impl Into<String>) {
        self.problems.push(message.into());
    }
}

/// Generated output together with the validator's verdict on it.
///
/// When the retry budget runs out the last output is returned as-is with a
/// non-empty report; the caller decides whether to use it or fall back
/// further.
#[derive(Debug)]
pub struct Checked<T> {
    pub value: T,
    pub report: ValidationReport,
}

impl<T> Checked<T> {
    pub fn passed(&self) -> bool {
        self.report.ok()
    }
}

/// Generate, validate, and regenerate on structural failure.
///
/// `extra_attempts` is the regeneration budget after the first try
/// (default 1 for inference stages). Generation errors propagate; validation
/// failures never turn into errors.
pub async fn generate_checked<T, F, Fut, V>(
    extra_attempts: usize,
    label: &str,
    mut generate: F,
    validate: V,
) -> Result<Checked<T>, PipelineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PipelineError>>,
    V: Fn(&T) -> ValidationReport,
{
    let mut last: Option<Checked<T>> = None;

    for attempt in 1..=extra_attempts + 1 {
        let value = generate().await?;
        let report = validate(&value);
        if report.ok() {
            return Ok(Checked { value, report });
        }
        warn!(
            "{}: output failed validation on attempt {}: {:?}",
            label, attempt, report.problems
        );
        last = Some(Checked { value, report });
    }

    // Exhausted: hand back the last output with its report.
    Ok(last.expect("at least one generation attempt ran"))
}

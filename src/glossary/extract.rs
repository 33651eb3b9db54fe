//! Two-pass glossary extraction.
//!
//! Pass 1 extracts each sampled chunk independently with per-chunk transient
//! retries. Chunks still failing afterwards are retried once more as a batch
//! at half the original concurrency; anything failing both passes lands as a
//! low-confidence placeholder so the extraction always completes.

use super::{ChunkGlossary, Confidence, Glossary, GlossaryTerm};
use crate::config::GlossaryScope;
use crate::error::PipelineError;
use crate::pipeline::PipelineContext;
use crate::retry::with_retries;
use crate::services::{GenerativeResponse, ProgressEvent, TermExtractionRequest};
use crate::task::map_in_parallel;
use crate::types::{ChunkSpec, RecordingHandle};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{info, warn};

/// Second-pass concurrency: half the configured limit, at least one.
fn second_pass_limit(concurrency: usize) -> usize {
    (concurrency / 2).max(1)
}

fn select_chunks(scope: GlossaryScope, chunks: &[ChunkSpec]) -> Vec<ChunkSpec> {
    match scope {
        GlossaryScope::All => chunks.to_vec(),
        GlossaryScope::FirstSecs(budget) => chunks
            .iter()
            .filter(|spec| spec.start_secs < budget)
            .copied()
            .collect(),
        GlossaryScope::Disabled => Vec::new(),
    }
}

/// Extract and merge the run's glossary. Never fails: chunks that exhaust
/// their retries become low-confidence placeholders, and the aggregate is
/// whatever the successful chunks produced.
pub(crate) async fn extract_glossary(
    ctx: Arc<PipelineContext>,
    recording: RecordingHandle,
    chunks: Vec<ChunkSpec>,
) -> Glossary {
    let selected = select_chunks(ctx.config.glossary.scope, &chunks);
    if selected.is_empty() {
        return Glossary::default();
    }

    let total = selected.len();
    let completed = Arc::new(AtomicUsize::new(0));
    info!("extracting glossary from {} chunks", total);

    // Pass 1: all selected chunks at the configured concurrency.
    let concurrency = ctx.config.glossary.concurrency;
    let pass_one = run_pass(
        ctx.clone(),
        recording.clone(),
        selected.clone(),
        concurrency,
        completed.clone(),
        total,
    )
    .await;

    let mut by_index: BTreeMap<usize, ChunkGlossary> = BTreeMap::new();
    let mut failed: Vec<ChunkSpec> = Vec::new();
    for (spec, outcome) in selected.iter().zip(pass_one) {
        match outcome {
            Some(result) => {
                by_index.insert(spec.index, result);
            }
            None => failed.push(*spec),
        }
    }

    // Pass 2: the failure set once more, throttled harder since contention
    // likely caused the failures. Results replace placeholders in-place by
    // chunk index.
    if !failed.is_empty() && !ctx.cancel.is_cancelled() {
        let retry_limit = second_pass_limit(concurrency);
        warn!(
            "retrying glossary extraction for {} chunks at concurrency {}",
            failed.len(),
            retry_limit
        );
        let pass_two = run_pass(
            ctx.clone(),
            recording.clone(),
            failed.clone(),
            retry_limit,
            completed.clone(),
            total,
        )
        .await;

        for (spec, outcome) in failed.iter().zip(pass_two) {
            match outcome {
                Some(result) => {
                    by_index.insert(spec.index, result);
                }
                None => {
                    by_index.insert(spec.index, ChunkGlossary::exhausted(spec.index));
                    finalize_one(&ctx, &completed, total);
                }
            }
        }
    } else {
        for spec in &failed {
            by_index.insert(spec.index, ChunkGlossary::exhausted(spec.index));
            finalize_one(&ctx, &completed, total);
        }
    }

    let mut glossary = Glossary::from_chunks(by_index.into_values().collect());
    info!(
        "glossary extraction finished: {} terms from {} chunks",
        glossary.len(),
        total
    );

    // Optional human confirmation replaces the aggregated terms before the
    // shared future publishes, so every chunk waiter sees the edited list.
    if let Some(reviewer) = &ctx.services.reviewer {
        if !ctx.cancel.is_cancelled() {
            glossary.terms = reviewer.review(glossary.terms).await;
        }
    }

    glossary
}

async fn run_pass(
    ctx: Arc<PipelineContext>,
    recording: RecordingHandle,
    specs: Vec<ChunkSpec>,
    limit: usize,
    completed: Arc<AtomicUsize>,
    total: usize,
) -> Vec<Option<ChunkGlossary>> {
    let count = specs.len();
    let cancel = ctx.cancel.clone();
    let outcomes = map_in_parallel(specs, limit, &cancel, |spec| {
        let ctx = ctx.clone();
        let recording = recording.clone();
        let completed = completed.clone();
        Box::pin(async move { Ok(extract_one(ctx, recording, spec, completed, total).await) })
            as std::pin::Pin<
                Box<
                    dyn std::future::Future<Output = Result<Option<ChunkGlossary>, PipelineError>>
                        + Send,
                >,
            >
    })
    .await;

    match outcomes {
        Ok(results) => results.into_iter().map(Option::flatten).collect(),
        // map_in_parallel only errors on task panics here; treat the whole
        // pass as failed so pass 2 (or the placeholder path) picks it up.
        Err(error) => {
            warn!("glossary pass aborted: {}", error);
            vec![None; count]
        }
    }
}

/// One chunk's extraction with per-attempt transient retries. `None` marks a
/// chunk whose fate is not yet final (it goes into the failure set).
async fn extract_one(
    ctx: Arc<PipelineContext>,
    recording: RecordingHandle,
    spec: ChunkSpec,
    completed: Arc<AtomicUsize>,
    total: usize,
) -> Option<ChunkGlossary> {
    let label = format!("glossary chunk {}", spec.index);
    let generator = ctx.services.generator.clone();
    let cancel = ctx.cancel.clone();
    let request = TermExtractionRequest {
        recording,
        window: spec.window(),
        target_language: ctx.config.target_language.clone(),
    };

    let result = with_retries(&ctx.config.retry, &ctx.cancel, &label, move || {
        let generator = generator.clone();
        let request = request.clone();
        let cancel = cancel.clone();
        async move { generator.extract_terms(request, &cancel).await }
    })
    .await;

    match result {
        Ok(response) => {
            ctx.usage.record(&response.usage);
            finalize_one(&ctx, &completed, total);
            Some(ChunkGlossary {
                chunk_index: spec.index,
                terms: response.value,
                confidence: Confidence::High,
            })
        }
        Err(error) if error.is_cancelled() => None,
        Err(error) => {
            warn!("{} failed: {}", label, error);
            None
        }
    }
}

/// Advance the completed/total counter; called only once a chunk's fate is
/// final (success or exhausted failure).
fn finalize_one(ctx: &PipelineContext, completed: &AtomicUsize, total: usize) {
    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
    ctx.services
        .progress
        .on_progress(ProgressEvent::counted("glossary", done, total));
}

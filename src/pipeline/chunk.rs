//! Per-chunk state machine: transcribe → clean → join shared context →
//! refine → translate → reconcile → emit.
//!
//! Every stage has a best-effort fallback so a mid-pipeline failure still
//! yields the most refined result available, and errors never escape the
//! chunk boundary.

use crate::error::PipelineError;
use crate::glossary::{Glossary, GlossaryTerm};
use crate::pipeline::PipelineContext;
use crate::pipeline::reconcile::align_to_recording;
use crate::retry::{Checked, ValidationReport, generate_checked, with_retries};
use crate::services::{
    GenerativeResponse, ProgressEvent, ProgressStatus, RefineRequest, TranslateRequest,
    TranslatedLine,
};
use crate::speakers::SpeakerProfile;
use crate::task::{SharedFuture, cancellable};
use crate::types::{ChunkResult, ChunkSpec, ChunkStage, RecordingHandle, SubtitleSegment};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Bracketed non-speech annotations like `[music]` or `(laughs)`.
static NON_SPEECH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[[^\]]*\]|\([^)]*\)|♪").expect("Invalid regex"));

static MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s{2,}").expect("Invalid regex"));

/// Run one chunk through the full pipeline. Never fails: any error is
/// caught here, logged with the chunk index, and turned into an empty or
/// partial result.
pub(crate) async fn process_chunk(
    ctx: Arc<PipelineContext>,
    recording: RecordingHandle,
    spec: ChunkSpec,
    glossary: SharedFuture<Glossary>,
    speakers: SharedFuture<Vec<SpeakerProfile>>,
) -> ChunkResult {
    let mut result = ChunkResult::new(spec);

    match run_stages(&ctx, &recording, spec, &glossary, &speakers, &mut result).await {
        Ok(()) => {
            result.stage_reached = ChunkStage::Reconciling;
            align_to_recording(&mut result.segments, spec.start_secs);
            result.stage_reached = ChunkStage::Done;
            info!(
                "chunk {} done: {} segments, {} translation fallbacks",
                spec.index,
                result.segments.len(),
                result.translation_fallbacks
            );
            ctx.services.progress.on_progress(ProgressEvent::chunk(
                spec.index,
                ctx.total_chunks,
                ChunkStage::Done,
                ProgressStatus::Completed,
            ));
        }
        Err(err) if err.is_cancelled() => {
            info!(
                "chunk {} cancelled at {}",
                spec.index, result.stage_reached
            );
            result.error = Some(err.to_string());
            align_to_recording(&mut result.segments, spec.start_secs);
        }
        Err(err) => {
            error!("chunk {} failed at {}: {}", spec.index, result.stage_reached, err);
            result.error = Some(err.to_string());
            align_to_recording(&mut result.segments, spec.start_secs);
            ctx.services.progress.on_progress(
                ProgressEvent::chunk(
                    spec.index,
                    ctx.total_chunks,
                    result.stage_reached,
                    ProgressStatus::Error,
                )
                .with_message(err.to_string()),
            );
        }
    }

    result
}

async fn run_stages(
    ctx: &Arc<PipelineContext>,
    recording: &RecordingHandle,
    spec: ChunkSpec,
    glossary: &SharedFuture<Glossary>,
    speakers: &SharedFuture<Vec<SpeakerProfile>>,
    result: &mut ChunkResult,
) -> Result<(), PipelineError> {
    enter_stage(ctx, spec, result, ChunkStage::Transcribing);
    let raw = transcribe_stage(ctx, recording, spec).await?;

    enter_stage(ctx, spec, result, ChunkStage::Cleaning);
    let cleaned = clean_segments(raw);
    result.raw = cleaned.clone();
    result.segments = cleaned.clone();
    if cleaned.is_empty() {
        info!("chunk {} has no speech after cleaning", spec.index);
        return Ok(());
    }

    enter_stage(ctx, spec, result, ChunkStage::WaitingContext);
    let glossary = glossary.get(&ctx.cancel).await?;
    let speakers = speakers.get(&ctx.cancel).await?;

    enter_stage(ctx, spec, result, ChunkStage::Refining);
    let refined = refine_stage(ctx, recording, spec, &cleaned, &glossary.terms, &speakers).await?;
    result.refined = Some(refined.clone());
    result.segments = refined.clone();

    enter_stage(ctx, spec, result, ChunkStage::Translating);
    let (translated, fallbacks) = translate_stage(ctx, spec, refined, &glossary.terms).await?;
    result.translation_fallbacks = fallbacks;
    result.segments = translated;

    Ok(())
}

fn enter_stage(
    ctx: &PipelineContext,
    spec: ChunkSpec,
    result: &mut ChunkResult,
    stage: ChunkStage,
) {
    result.stage_reached = stage;
    ctx.services.progress.on_progress(ProgressEvent::chunk(
        spec.index,
        ctx.total_chunks,
        stage,
        ProgressStatus::Processing,
    ));
}

/// Transcription, gated by the transcription-specific admission limit.
async fn transcribe_stage(
    ctx: &Arc<PipelineContext>,
    recording: &RecordingHandle,
    spec: ChunkSpec,
) -> Result<Vec<SubtitleSegment>, PipelineError> {
    let _permit = cancellable(&ctx.cancel, ctx.transcribe_gate.clone().acquire_owned())
        .await?
        .map_err(|_| PipelineError::Cancelled)?;

    let label = format!("chunk {} transcribe", spec.index);
    let engine = ctx.services.transcriber.clone();
    let cancel = ctx.cancel.clone();
    let recording = recording.clone();
    let transcription = with_retries(&ctx.config.retry, &ctx.cancel, &label, move || {
        let engine = engine.clone();
        let recording = recording.clone();
        let cancel = cancel.clone();
        Box::pin(async move { engine.transcribe(&recording, spec.window(), &cancel).await })
            as std::pin::Pin<
                Box<
                    dyn std::future::Future<
                            Output = Result<crate::services::Transcription, PipelineError>,
                        > + Send + 'static,
                >,
            >
    })
    .await?;

    if let Some(usage) = &transcription.usage {
        ctx.usage.record(usage);
    }

    Ok(transcription
        .segments
        .into_iter()
        .enumerate()
        .map(|(i, seg)| SubtitleSegment::new(i as u32, seg.start_secs, seg.end_secs, seg.text))
        .collect())
}

/// Strip non-speech annotations and drop segments left empty. Local only,
/// no external call. Surviving segments keep their ids.
fn clean_segments(segments: Vec<SubtitleSegment>) -> Vec<SubtitleSegment> {
    segments
        .into_iter()
        .filter_map(|mut segment| {
            let stripped = NON_SPEECH.replace_all(&segment.text, " ");
            let cleaned = MULTI_SPACE.replace_all(stripped.trim(), " ").to_string();
            if cleaned.is_empty() {
                None
            } else {
                segment.text = cleaned;
                Some(segment)
            }
        })
        .collect()
}

/// Refinement through the post-check wrapper; falls back to the raw
/// transcript unchanged when the budget is exhausted or the service fails.
async fn refine_stage(
    ctx: &Arc<PipelineContext>,
    recording: &RecordingHandle,
    spec: ChunkSpec,
    raw: &[SubtitleSegment],
    glossary: &[GlossaryTerm],
    speakers: &[SpeakerProfile],
) -> Result<Vec<SubtitleSegment>, PipelineError> {
    let _permit = cancellable(&ctx.cancel, ctx.generate_gate.clone().acquire_owned())
        .await?
        .map_err(|_| PipelineError::Cancelled)?;

    let label = format!("chunk {} refine", spec.index);
    let expected: Vec<u32> = raw.iter().map(|s| s.id).collect();
    let request = RefineRequest {
        recording: recording.clone(),
        window: spec.window(),
        segments: raw.to_vec(),
        glossary: glossary.to_vec(),
        speakers: speakers.to_vec(),
    };

    let checked = generate_checked(
        1,
        &label,
        || {
            let ctx = ctx.clone();
            let request = request.clone();
            let label = label.clone();
            async move {
                let generator = ctx.services.generator.clone();
                let cancel = ctx.cancel.clone();
                let response =
                    with_retries(&ctx.config.retry, &ctx.cancel, &label, move || {
                        let generator = generator.clone();
                        let request = request.clone();
                        let cancel = cancel.clone();
                        Box::pin(async move { generator.refine(request, &cancel).await })
                            as std::pin::Pin<
                                Box<
                                    dyn std::future::Future<
                                            Output = Result<
                                                GenerativeResponse<Vec<SubtitleSegment>>,
                                                PipelineError,
                                            >,
                                        > + Send + 'static,
                                >,
                            >
                    })
                    .await?;
                ctx.usage.record(&response.usage);
                Ok(response.value)
            }
        },
        |segments| validate_refined(&expected, segments),
    )
    .await;

    match checked {
        Ok(Checked { value, report }) if report.ok() => Ok(value),
        Ok(_) => {
            warn!(
                "{}: refined output failed validation, keeping raw transcript",
                label
            );
            Ok(raw.to_vec())
        }
        Err(err) if err.is_cancelled() => Err(err),
        Err(err) => {
            warn!("{}: {}, keeping raw transcript", label, err);
            Ok(raw.to_vec())
        }
    }
}

/// Translation through the post-check wrapper. Missing or empty lines fall
/// back to the original text per id; ids are never dropped.
async fn translate_stage(
    ctx: &Arc<PipelineContext>,
    spec: ChunkSpec,
    segments: Vec<SubtitleSegment>,
    glossary: &[GlossaryTerm],
) -> Result<(Vec<SubtitleSegment>, u32), PipelineError> {
    let _permit = cancellable(&ctx.cancel, ctx.generate_gate.clone().acquire_owned())
        .await?
        .map_err(|_| PipelineError::Cancelled)?;

    let label = format!("chunk {} translate", spec.index);
    let expected: Vec<u32> = segments.iter().map(|s| s.id).collect();
    let request = TranslateRequest {
        segments: segments.clone(),
        target_language: ctx.config.target_language.clone(),
        glossary: glossary.to_vec(),
    };

    let checked = generate_checked(
        1,
        &label,
        || {
            let ctx = ctx.clone();
            let request = request.clone();
            let label = label.clone();
            async move {
                let generator = ctx.services.generator.clone();
                let cancel = ctx.cancel.clone();
                let response =
                    with_retries(&ctx.config.retry, &ctx.cancel, &label, move || {
                        let generator = generator.clone();
                        let request = request.clone();
                        let cancel = cancel.clone();
                        Box::pin(async move { generator.translate(request, &cancel).await })
                            as std::pin::Pin<
                                Box<
                                    dyn std::future::Future<
                                            Output = Result<
                                                GenerativeResponse<Vec<TranslatedLine>>,
                                                PipelineError,
                                            >,
                                        > + Send + 'static,
                                >,
                            >
                    })
                    .await?;
                ctx.usage.record(&response.usage);
                Ok(response.value)
            }
        },
        |lines| validate_translations(&expected, lines),
    )
    .await;

    match checked {
        Ok(Checked { value, .. }) => Ok(apply_translations(segments, &value)),
        Err(err) if err.is_cancelled() => Err(err),
        Err(err) => {
            warn!("{}: {}, emitting untranslated segments", label, err);
            Ok((segments, 0))
        }
    }
}

/// Merge translated lines into their segments by id, substituting the
/// original text (and counting the substitution) where a line is missing or
/// empty.
fn apply_translations(
    mut segments: Vec<SubtitleSegment>,
    lines: &[TranslatedLine],
) -> (Vec<SubtitleSegment>, u32) {
    let by_id: HashMap<u32, &str> = lines
        .iter()
        .map(|line| (line.id, line.text.as_str()))
        .collect();

    let mut fallbacks = 0u32;
    for segment in segments.iter_mut() {
        match by_id.get(&segment.id) {
            Some(text) if !text.trim().is_empty() => {
                segment.translation = Some(text.to_string());
            }
            _ => {
                segment.translation = Some(segment.text.clone());
                fallbacks += 1;
            }
        }
    }

    (segments, fallbacks)
}

fn validate_refined(expected: &[u32], segments: &[SubtitleSegment]) -> ValidationReport {
    let mut report = ValidationReport::default();
    let produced: HashSet<u32> = segments.iter().map(|s| s.id).collect();

    for id in expected {
        if !produced.contains(id) {
            report.problem(format!("missing segment id {}", id));
        }
    }
    if produced.len() != segments.len() {
        report.problem("duplicate segment ids");
    }
    for segment in segments {
        if segment.start_secs >= segment.end_secs {
            report.problem(format!("segment {} has start >= end", segment.id));
        }
        if segment.text.trim().is_empty() {
            report.problem(format!("segment {} has empty text", segment.id));
        }
    }

    report
}

fn validate_translations(expected: &[u32], lines: &[TranslatedLine]) -> ValidationReport {
    let mut report = ValidationReport::default();
    let produced: HashSet<u32> = lines.iter().map(|line| line.id).collect();

    for id in expected {
        if !produced.contains(id) {
            report.problem(format!("missing translation for id {}", id));
        }
    }
    for line in lines {
        if line.text.trim().is_empty() {
            report.problem(format!("empty translation for id {}", line.id));
        }
    }

    report
}

//! External collaborator contracts.
//!
//! The core only depends on these call shapes; decoding, wire formats, and
//! prompt content live behind them in the host application.

use crate::error::PipelineError;
use crate::glossary::GlossaryTerm;
use crate::speakers::SpeakerProfile;
use crate::types::{ChunkSpec, ChunkStage, RecordingHandle, SubtitleSegment, TimeWindow};
use crate::usage::UsageSample;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A segment as produced by the transcription engine: chunk-relative
/// timestamps, no ids yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSegment {
    pub start_secs: f64,
    pub end_secs: f64,
    pub text: String,
}

/// Output of one transcription call.
#[derive(Debug, Clone, Default)]
pub struct Transcription {
    pub segments: Vec<RawSegment>,
    pub language: Option<String>,
    pub usage: Option<UsageSample>,
}

/// Splits a recording into ordered chunk specs.
#[async_trait]
pub trait SegmentProvider: Send + Sync {
    async fn segment(
        &self,
        recording: &RecordingHandle,
        target_chunk_secs: f64,
        cancel: &CancellationToken,
    ) -> Result<Vec<ChunkSpec>, PipelineError>;
}

/// Speech-to-text over one audio window. Local or remote; its concurrency
/// limit is configured separately from the generative stages.
#[async_trait]
pub trait TranscriptionEngine: Send + Sync {
    async fn transcribe(
        &self,
        recording: &RecordingHandle,
        window: TimeWindow,
        cancel: &CancellationToken,
    ) -> Result<Transcription, PipelineError>;
}

/// One value plus the usage its call consumed.
#[derive(Debug, Clone)]
pub struct GenerativeResponse<T> {
    pub value: T,
    pub usage: UsageSample,
}

#[derive(Debug, Clone)]
pub struct RefineRequest {
    pub recording: RecordingHandle,
    pub window: TimeWindow,
    /// Cleaned raw transcript, chunk-relative
    pub segments: Vec<SubtitleSegment>,
    pub glossary: Vec<GlossaryTerm>,
    pub speakers: Vec<SpeakerProfile>,
}

#[derive(Debug, Clone)]
pub struct TranslateRequest {
    pub segments: Vec<SubtitleSegment>,
    pub target_language: String,
    pub glossary: Vec<GlossaryTerm>,
}

/// One translated line, matched to its input segment by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslatedLine {
    pub id: u32,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct TermExtractionRequest {
    pub recording: RecordingHandle,
    pub window: TimeWindow,
    pub target_language: String,
}

#[derive(Debug, Clone)]
pub struct SpeakerProfileRequest {
    pub recording: RecordingHandle,
    /// Sampled windows spread across the recording
    pub windows: Vec<TimeWindow>,
}

/// The generative refine/translate/extraction service.
///
/// Implementations classify their failures through `ServiceErrorKind` so the
/// retry wrapper can tell transient from fatal.
#[async_trait]
pub trait GenerativeService: Send + Sync {
    /// Re-derive timing and content from the original audio plus the raw
    /// transcript.
    async fn refine(
        &self,
        request: RefineRequest,
        cancel: &CancellationToken,
    ) -> Result<GenerativeResponse<Vec<SubtitleSegment>>, PipelineError>;

    /// Translate a batch of refined segments.
    async fn translate(
        &self,
        request: TranslateRequest,
        cancel: &CancellationToken,
    ) -> Result<GenerativeResponse<Vec<TranslatedLine>>, PipelineError>;

    /// Extract terminology needing consistent translation from one window.
    async fn extract_terms(
        &self,
        request: TermExtractionRequest,
        cancel: &CancellationToken,
    ) -> Result<GenerativeResponse<Vec<GlossaryTerm>>, PipelineError>;

    /// Produce labeled voice profiles from sampled audio.
    async fn profile_speakers(
        &self,
        request: SpeakerProfileRequest,
        cancel: &CancellationToken,
    ) -> Result<GenerativeResponse<Vec<SpeakerProfile>>, PipelineError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Processing,
    Completed,
    Error,
}

/// A progress update for one chunk or one background task.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    /// Chunk index, absent for run-scoped tasks (glossary, speakers)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<usize>,
    /// How many units the reporting task covers (chunks for the run,
    /// sampled chunks for glossary extraction)
    pub total: usize,
    /// Stage label, e.g. a [`ChunkStage`] label or "glossary"
    pub stage: &'static str,
    pub status: ProgressStatus,
    /// Units whose fate is final; only advances on success or exhausted
    /// failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProgressEvent {
    /// Event for one chunk entering or leaving a stage.
    pub fn chunk(index: usize, total: usize, stage: ChunkStage, status: ProgressStatus) -> Self {
        Self {
            chunk_index: Some(index),
            total,
            stage: stage.label(),
            status,
            completed: None,
            message: None,
        }
    }

    /// Event for a run-scoped task with a completed/total counter.
    pub fn counted(stage: &'static str, completed: usize, total: usize) -> Self {
        Self {
            chunk_index: None,
            total,
            stage,
            status: ProgressStatus::Processing,
            completed: Some(completed),
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_status(mut self, status: ProgressStatus) -> Self {
        self.status = status;
        self
    }
}

/// Fire-and-forget progress notifications. Implementations must return
/// quickly; anything slow belongs on the sink's own task.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, event: ProgressEvent);
}

/// Discards all progress events.
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn on_progress(&self, _event: ProgressEvent) {}
}

/// Optional sink for intermediate JSON/SRT dumps. Failures are logged and
/// swallowed, never fatal.
pub trait ArtifactSink: Send + Sync {
    fn save(&self, name: &str, content: &str) -> std::io::Result<()>;
}

/// Artifact sink writing each dump as a file under one directory.
pub struct DirArtifactSink {
    dir: std::path::PathBuf,
}

impl DirArtifactSink {
    pub fn new(dir: impl Into<std::path::PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl ArtifactSink for DirArtifactSink {
    fn save(&self, name: &str, content: &str) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(self.dir.join(name), content)
    }
}

/// Optional human-confirmation step for the aggregated glossary. The edited
/// list replaces the extracted one before publication, so every chunk sees
/// the confirmed terms.
#[async_trait]
pub trait GlossaryReviewer: Send + Sync {
    async fn review(&self, terms: Vec<GlossaryTerm>) -> Vec<GlossaryTerm>;
}

/// Everything the pipeline calls out to.
#[derive(Clone)]
pub struct Services {
    pub segmenter: Arc<dyn SegmentProvider>,
    pub transcriber: Arc<dyn TranscriptionEngine>,
    pub generator: Arc<dyn GenerativeService>,
    pub progress: Arc<dyn ProgressSink>,
    pub artifacts: Option<Arc<dyn ArtifactSink>>,
    pub reviewer: Option<Arc<dyn GlossaryReviewer>>,
}

impl Services {
    pub fn new(
        segmenter: Arc<dyn SegmentProvider>,
        transcriber: Arc<dyn TranscriptionEngine>,
        generator: Arc<dyn GenerativeService>,
    ) -> Self {
        Self {
            segmenter,
            transcriber,
            generator,
            progress: Arc::new(NullProgress),
            artifacts: None,
            reviewer: None,
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_artifacts(mut self, artifacts: Arc<dyn ArtifactSink>) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    pub fn with_reviewer(mut self, reviewer: Arc<dyn GlossaryReviewer>) -> Self {
        self.reviewer = Some(reviewer);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dir_artifact_sink_writes_files() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirArtifactSink::new(dir.path().join("debug"));

        sink.save("chunk_0001.json", "{}").unwrap();
        sink.save("subtitles.srt", "1\n").unwrap();

        let written = std::fs::read_to_string(dir.path().join("debug/chunk_0001.json")).unwrap();
        assert_eq!(written, "{}");
        assert!(dir.path().join("debug/subtitles.srt").exists());
    }

    #[test]
    fn test_progress_event_builders() {
        let event = ProgressEvent::chunk(3, 10, ChunkStage::Refining, ProgressStatus::Processing);
        assert_eq!(event.chunk_index, Some(3));
        assert_eq!(event.stage, "refining");

        let counted = ProgressEvent::counted("glossary", 2, 5).with_message("retrying");
        assert_eq!(counted.completed, Some(2));
        assert_eq!(counted.message.as_deref(), Some("retrying"));
    }
}

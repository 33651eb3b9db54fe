//! Concurrent subtitle pipeline.
//!
//! Converts long-form recordings into time-aligned, translated subtitles by
//! fanning the recording out into chunks that each run transcribe → clean →
//! refine → translate independently, while a run-scoped terminology glossary
//! and a speaker voice-profile set are produced once in the background and
//! shared with every chunk through single-assignment futures.
//!
//! Media decoding, inference wire formats, and UI live in the host
//! application behind the traits in [`services`].

pub mod config;
pub mod error;
pub mod glossary;
pub mod pipeline;
pub mod retry;
pub mod services;
pub mod speakers;
pub mod task;
pub mod types;
pub mod usage;

pub use config::{GlossaryConfig, GlossaryScope, PipelineConfig, SpeakerConfig};
pub use error::{PipelineError, ServiceErrorKind};
pub use glossary::{ChunkGlossary, Confidence, Glossary, GlossaryTerm};
pub use pipeline::{Pipeline, RunReport};
pub use services::{
    ArtifactSink, DirArtifactSink, GenerativeResponse, GenerativeService, GlossaryReviewer,
    ProgressEvent, ProgressSink, ProgressStatus, RawSegment, RefineRequest, SegmentProvider,
    Services, SpeakerProfileRequest, TermExtractionRequest, Transcription, TranscriptionEngine,
    TranslateRequest, TranslatedLine,
};
pub use speakers::{SpeakerProfile, VoiceCharacteristics};
pub use types::{
    ChunkResult, ChunkSpec, ChunkStage, RecordingHandle, SubtitleSegment, SubtitleTrack,
    TimeWindow,
};
pub use usage::{ModelUsage, UsageReport, UsageSample};

//! Core data model: chunk specs, subtitle segments, and export formats.
//!
//! Supports JSON, SRT, and VTT output for the merged track.

use serde::{Deserialize, Serialize};
use std::fmt::Write as FmtWrite;

/// A time window of the recording processed by exactly one chunk task.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChunkSpec {
    /// Chunk index (1-based, order-significant)
    pub index: usize,
    /// Absolute start within the recording, in seconds
    pub start_secs: f64,
    /// Absolute end within the recording, in seconds
    pub end_secs: f64,
}

impl ChunkSpec {
    pub fn duration_secs(&self) -> f64 {
        self.end_secs - self.start_secs
    }

    /// The audio window this chunk covers.
    pub fn window(&self) -> TimeWindow {
        TimeWindow {
            start_secs: self.start_secs,
            end_secs: self.end_secs,
        }
    }
}

/// A span of the recording, in absolute seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start_secs: f64,
    pub end_secs: f64,
}

impl TimeWindow {
    pub fn duration_secs(&self) -> f64 {
        self.end_secs - self.start_secs
    }
}

/// Opaque reference to the decoded recording held by the host application.
///
/// The core never touches sample data; collaborators resolve the handle
/// themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingHandle {
    pub id: String,
    pub duration_secs: f64,
}

impl RecordingHandle {
    pub fn new(id: impl Into<String>, duration_secs: f64) -> Self {
        Self {
            id: id.into(),
            duration_secs,
        }
    }
}

/// One caption line.
///
/// Timestamps are chunk-relative until reconciliation, recording-global
/// afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleSegment {
    /// Segment ID, unique within its chunk at every stage
    pub id: u32,
    /// Start time in seconds
    pub start_secs: f64,
    /// End time in seconds
    pub end_secs: f64,
    /// Transcribed text in the source language
    pub text: String,
    /// Translated text, if the translation stage ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translation: Option<String>,
    /// Speaker label assigned during refinement
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
}

impl SubtitleSegment {
    pub fn new(id: u32, start_secs: f64, end_secs: f64, text: impl Into<String>) -> Self {
        Self {
            id,
            start_secs,
            end_secs,
            text: text.into(),
            translation: None,
            speaker: None,
        }
    }

    pub fn duration_secs(&self) -> f64 {
        self.end_secs - self.start_secs
    }

    /// The line shown to the viewer: translation when available, the
    /// original text otherwise.
    pub fn display_text(&self) -> &str {
        self.translation.as_deref().unwrap_or(&self.text)
    }
}

/// Stages a chunk moves through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStage {
    Transcribing,
    Cleaning,
    WaitingContext,
    Refining,
    Translating,
    Reconciling,
    Done,
}

impl ChunkStage {
    pub fn label(self) -> &'static str {
        match self {
            ChunkStage::Transcribing => "transcribing",
            ChunkStage::Cleaning => "cleaning",
            ChunkStage::WaitingContext => "waiting-context",
            ChunkStage::Refining => "refining",
            ChunkStage::Translating => "translating",
            ChunkStage::Reconciling => "reconciling",
            ChunkStage::Done => "done",
        }
    }
}

impl std::fmt::Display for ChunkStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Final output of one chunk, built incrementally so a mid-pipeline failure
/// still yields the most refined result available.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkResult {
    pub spec: ChunkSpec,
    /// Post-transcription segments (chunk-relative, cleaned)
    pub raw: Vec<SubtitleSegment>,
    /// Refined segments, if refinement succeeded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refined: Option<Vec<SubtitleSegment>>,
    /// Best available segments, reconciled to recording time
    pub segments: Vec<SubtitleSegment>,
    /// Last stage the chunk reached
    pub stage_reached: ChunkStage,
    /// Count of segments whose translation fell back to the original text
    pub translation_fallbacks: u32,
    /// Error message, if the chunk ended early
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChunkResult {
    pub fn new(spec: ChunkSpec) -> Self {
        Self {
            spec,
            raw: Vec::new(),
            refined: None,
            segments: Vec::new(),
            stage_reached: ChunkStage::Transcribing,
            translation_fallbacks: 0,
            error: None,
        }
    }

    /// An empty result for a chunk that never ran (e.g. cancelled before
    /// dispatch).
    pub fn empty(spec: ChunkSpec, reason: impl Into<String>) -> Self {
        let mut result = Self::new(spec);
        result.error = Some(reason.into());
        result
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

/// The merged, ordered subtitle track for a whole recording.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubtitleTrack {
    pub segments: Vec<SubtitleSegment>,
}

impl SubtitleTrack {
    pub fn new(segments: Vec<SubtitleSegment>) -> Self {
        Self { segments }
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Export to compact JSON
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Export to pretty-printed JSON
    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Export to SRT format
    pub fn to_srt(&self) -> String {
        let mut output = String::new();

        for (i, segment) in self.segments.iter().enumerate() {
            let _ = writeln!(output, "{}", i + 1);
            let _ = writeln!(
                output,
                "{} --> {}",
                format_srt_time(segment.start_secs),
                format_srt_time(segment.end_secs)
            );

            if let Some(ref speaker) = segment.speaker {
                let _ = writeln!(output, "[{}] {}", speaker, segment.display_text());
            } else {
                let _ = writeln!(output, "{}", segment.display_text());
            }

            let _ = writeln!(output);
        }

        output
    }

    /// Export to WebVTT format
    pub fn to_vtt(&self) -> String {
        let mut output = String::from("WEBVTT\n\n");

        for (i, segment) in self.segments.iter().enumerate() {
            let _ = writeln!(output, "{}", i + 1);
            let _ = writeln!(
                output,
                "{} --> {}",
                format_vtt_time(segment.start_secs),
                format_vtt_time(segment.end_secs)
            );

            if let Some(ref speaker) = segment.speaker {
                let _ = writeln!(output, "<v {}>{}", speaker, segment.display_text());
            } else {
                let _ = writeln!(output, "{}", segment.display_text());
            }

            let _ = writeln!(output);
        }

        output
    }
}

/// Format time for SRT (HH:MM:SS,mmm)
fn format_srt_time(seconds: f64) -> String {
    let total_ms = (seconds * 1000.0) as u64;
    let ms = total_ms % 1000;
    let total_secs = total_ms / 1000;
    let secs = total_secs % 60;
    let total_mins = total_secs / 60;
    let mins = total_mins % 60;
    let hours = total_mins / 60;

    format!("{:02}:{:02}:{:02},{:03}", hours, mins, secs, ms)
}

/// Format time for VTT (HH:MM:SS.mmm)
fn format_vtt_time(seconds: f64) -> String {
    let total_ms = (seconds * 1000.0) as u64;
    let ms = total_ms % 1000;
    let total_secs = total_ms / 1000;
    let secs = total_secs % 60;
    let total_mins = total_secs / 60;
    let mins = total_mins % 60;
    let hours = total_mins / 60;

    format!("{:02}:{:02}:{:02}.{:03}", hours, mins, secs, ms)
}

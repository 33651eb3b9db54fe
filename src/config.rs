//! Run configuration for the subtitle pipeline.

use crate::error::PipelineError;
use crate::retry::RetryConfig;
use serde::{Deserialize, Serialize};

/// Which chunks glossary extraction samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GlossaryScope {
    /// Extract terminology from every chunk
    All,
    /// Extract from chunks starting within the first N seconds
    FirstSecs(f64),
    /// Skip glossary extraction entirely
    Disabled,
}

/// Glossary extraction settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlossaryConfig {
    pub scope: GlossaryScope,
    /// Parallel extraction calls in the first pass; the second pass runs at
    /// half this
    pub concurrency: usize,
}

impl Default for GlossaryConfig {
    fn default() -> Self {
        Self {
            scope: GlossaryScope::FirstSecs(1800.0), // first 30 minutes
            concurrency: 4,
        }
    }
}

/// Speaker voice-profile extraction settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeakerConfig {
    pub enabled: bool,
    /// Total duration of audio sampled across the recording, in seconds
    pub sample_secs: f64,
}

impl Default for SpeakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_secs: 180.0,
        }
    }
}

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Target duration of one chunk in seconds (default: 300 = 5 min)
    pub chunk_secs: f64,
    /// Outer fan-out limit; raised to the chunk count at run time so every
    /// chunk can queue on its resource gates immediately
    pub admission_limit: usize,
    /// Parallel transcription calls (local engines usually cap this low)
    pub transcribe_limit: usize,
    /// Parallel refine/translate calls against the generative service
    pub generate_limit: usize,
    /// Target language for translation (BCP-47 or ISO 639 code)
    pub target_language: String,
    pub glossary: GlossaryConfig,
    pub speakers: SpeakerConfig,
    pub retry: RetryConfig,
    /// Dump intermediate JSON/SRT artifacts through the artifact sink
    pub save_artifacts: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_secs: 300.0,
            admission_limit: 64,
            transcribe_limit: 2,
            generate_limit: 6,
            target_language: "en".to_string(),
            glossary: GlossaryConfig::default(),
            speakers: SpeakerConfig::default(),
            retry: RetryConfig::default(),
            save_artifacts: false,
        }
    }
}

impl PipelineConfig {
    /// Configuration translating into the given language
    pub fn for_language(target_language: impl Into<String>) -> Self {
        Self {
            target_language: target_language.into(),
            ..Default::default()
        }
    }

    pub fn with_chunk_secs(mut self, secs: f64) -> Self {
        self.chunk_secs = secs;
        self
    }

    pub fn with_limits(mut self, transcribe: usize, generate: usize) -> Self {
        self.transcribe_limit = transcribe;
        self.generate_limit = generate;
        self
    }

    pub fn with_glossary(mut self, scope: GlossaryScope) -> Self {
        self.glossary.scope = scope;
        self
    }

    pub fn without_speakers(mut self) -> Self {
        self.speakers.enabled = false;
        self
    }

    pub fn with_artifacts(mut self) -> Self {
        self.save_artifacts = true;
        self
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.chunk_secs <= 0.0 {
            return Err(PipelineError::Config(format!(
                "chunk_secs must be positive, got {}",
                self.chunk_secs
            )));
        }
        if self.transcribe_limit == 0 || self.generate_limit == 0 || self.admission_limit == 0 {
            return Err(PipelineError::Config(
                "concurrency limits must be at least 1".to_string(),
            ));
        }
        if self.glossary.concurrency == 0 {
            return Err(PipelineError::Config(
                "glossary concurrency must be at least 1".to_string(),
            ));
        }
        if self.target_language.is_empty() {
            return Err(PipelineError::Config(
                "target_language must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

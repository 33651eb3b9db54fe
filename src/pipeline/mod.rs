//! Pipeline orchestration.
//!
//! Fans a recording out into per-chunk tasks under a high admission limit,
//! runs glossary and speaker-profile extraction as supervised background
//! producers, and merges chunk results back in chunk-index order no matter
//! when they complete.

pub(crate) mod chunk;
pub mod reconcile;

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::glossary::{Glossary, extract_glossary};
use crate::services::{ProgressEvent, ProgressStatus, Services};
use crate::speakers::{SpeakerProfile, extract_speaker_profiles};
use crate::task::{SharedFuture, map_in_parallel};
use crate::types::{ChunkResult, ChunkStage, RecordingHandle, SubtitleTrack};
use crate::usage::{UsageRecorder, UsageReport};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Run-scoped shared state, passed by reference into every stage. The usage
/// recorder and the shared futures are the only values mutated by more than
/// one concurrent task.
pub(crate) struct PipelineContext {
    pub(crate) config: PipelineConfig,
    pub(crate) services: Services,
    pub(crate) cancel: CancellationToken,
    /// Gate for the transcription engine, typically much tighter than the
    /// generative gate
    pub(crate) transcribe_gate: Arc<Semaphore>,
    /// Gate for refine/translate calls
    pub(crate) generate_gate: Arc<Semaphore>,
    pub(crate) usage: Arc<UsageRecorder>,
    pub(crate) total_chunks: usize,
}

/// Everything one run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cancelled: bool,
    /// Merged subtitle track, in chunk-index order
    pub track: SubtitleTrack,
    /// Per-chunk results and status trail, in chunk-index order
    pub chunks: Vec<ChunkResult>,
    pub glossary: Glossary,
    pub speakers: Vec<SpeakerProfile>,
    pub usage: UsageReport,
}

impl RunReport {
    pub fn completed_chunks(&self) -> usize {
        self.chunks
            .iter()
            .filter(|c| c.stage_reached == ChunkStage::Done)
            .count()
    }
}

/// The subtitle pipeline.
pub struct Pipeline {
    config: PipelineConfig,
    services: Services,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, services: Services) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self { config, services })
    }

    /// Process one recording end to end.
    ///
    /// Returns a best-effort report even when chunks or the background
    /// producers failed; only segmentation failure, configuration problems
    /// and task panics surface as errors.
    pub async fn run(
        &self,
        recording: RecordingHandle,
        cancel: CancellationToken,
    ) -> Result<RunReport, PipelineError> {
        let started_at = Utc::now();

        let chunks = self
            .services
            .segmenter
            .segment(&recording, self.config.chunk_secs, &cancel)
            .await?;
        let total_chunks = chunks.len();
        info!(
            "recording {} segmented into {} chunks",
            recording.id, total_chunks
        );

        if chunks.is_empty() {
            warn!("segment provider returned no chunks");
            return Ok(self.empty_report(started_at, &cancel));
        }

        let ctx = Arc::new(PipelineContext {
            config: self.config.clone(),
            services: self.services.clone(),
            cancel: cancel.clone(),
            transcribe_gate: Arc::new(Semaphore::new(self.config.transcribe_limit)),
            generate_gate: Arc::new(Semaphore::new(self.config.generate_limit)),
            usage: Arc::new(UsageRecorder::new()),
            total_chunks,
        });

        // Background producers, supervised below rather than fire-and-forget.
        let (glossary_future, glossary_task) = SharedFuture::spawn("glossary", {
            let ctx = ctx.clone();
            let recording = recording.clone();
            let chunks = chunks.clone();
            async move { Ok(extract_glossary(ctx, recording, chunks).await) }
        });

        let (speakers_future, speakers_task) = if self.config.speakers.enabled {
            let ctx = ctx.clone();
            let recording = recording.clone();
            let (future, task) = SharedFuture::spawn("speaker profiles", async move {
                Ok(extract_speaker_profiles(ctx, recording).await)
            });
            (future, Some(task))
        } else {
            (SharedFuture::ready(Vec::new()), None)
        };

        // Admission is deliberately at least the chunk count so every chunk
        // can enter its resource queues immediately; the two inner gates
        // enforce the real service limits.
        let admission = self.config.admission_limit.max(total_chunks);
        let outcomes = map_in_parallel(chunks.clone(), admission, &cancel, |spec| {
            let ctx = ctx.clone();
            let recording = recording.clone();
            let glossary = glossary_future.clone();
            let speakers = speakers_future.clone();
            async move { Ok(chunk::process_chunk(ctx, recording, spec, glossary, speakers).await) }
        })
        .await?;

        // The run is not finished until both producers have settled, even
        // though chunks never block on them serially.
        if let Err(err) = glossary_task.await {
            warn!("glossary producer task died: {}", err);
        }
        if let Some(task) = speakers_task {
            if let Err(err) = task.await {
                warn!("speaker profile producer task died: {}", err);
            }
        }

        // Merge in chunk-index order regardless of completion order.
        let mut results: Vec<ChunkResult> = Vec::with_capacity(total_chunks);
        for (spec, outcome) in chunks.iter().zip(outcomes) {
            results.push(outcome.unwrap_or_else(|| {
                ChunkResult::empty(*spec, "not processed before cancellation")
            }));
        }

        let track = SubtitleTrack::new(
            results
                .iter()
                .flat_map(|result| result.segments.iter().cloned())
                .collect(),
        );

        let report = RunReport {
            started_at,
            finished_at: Utc::now(),
            cancelled: cancel.is_cancelled(),
            track,
            chunks: results,
            glossary: glossary_future.value_or_default(),
            speakers: speakers_future.value_or_default(),
            usage: ctx.usage.report(),
        };

        self.save_artifacts(&report);
        self.services.progress.on_progress(ProgressEvent {
            chunk_index: None,
            total: total_chunks,
            stage: "run",
            status: if report.cancelled {
                ProgressStatus::Error
            } else {
                ProgressStatus::Completed
            },
            completed: Some(report.completed_chunks()),
            message: None,
        });

        info!(
            "run finished: {}/{} chunks complete, {} segments, {} glossary terms",
            report.completed_chunks(),
            total_chunks,
            report.track.len(),
            report.glossary.len()
        );

        Ok(report)
    }

    fn empty_report(&self, started_at: DateTime<Utc>, cancel: &CancellationToken) -> RunReport {
        RunReport {
            started_at,
            finished_at: Utc::now(),
            cancelled: cancel.is_cancelled(),
            track: SubtitleTrack::default(),
            chunks: Vec::new(),
            glossary: Glossary::default(),
            speakers: Vec::new(),
            usage: UsageReport::default(),
        }
    }

    /// Dump intermediate artifacts through the sink. Failures are logged
    /// and swallowed, never fatal.
    fn save_artifacts(&self, report: &RunReport) {
        if !self.config.save_artifacts {
            return;
        }
        let Some(sink) = &self.services.artifacts else {
            return;
        };

        let mut dumps: Vec<(String, String)> = Vec::new();
        for chunk in &report.chunks {
            if let Ok(json) = serde_json::to_string_pretty(chunk) {
                dumps.push((format!("chunk_{:04}.json", chunk.spec.index), json));
            }
        }
        dumps.push(("subtitles.json".to_string(), report.track.to_json_pretty()));
        dumps.push(("subtitles.srt".to_string(), report.track.to_srt()));
        if let Ok(json) = serde_json::to_string_pretty(&report.glossary) {
            dumps.push(("glossary.json".to_string(), json));
        }

        for (name, content) in dumps {
            if let Err(err) = sink.save(&name, &content) {
                warn!("failed to save artifact {}: {}", name, err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GlossaryScope;
    use crate::error::ServiceErrorKind;
    use crate::glossary::{Confidence, GlossaryTerm};
    use crate::retry::RetryConfig;
    use crate::services::*;
    use crate::speakers::VoiceCharacteristics;
    use crate::types::{ChunkSpec, TimeWindow};
    use crate::usage::UsageSample;
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const CHUNK_SECS: f64 = 300.0;

    fn specs(n: usize) -> Vec<ChunkSpec> {
        (1..=n)
            .map(|i| ChunkSpec {
                index: i,
                start_secs: (i - 1) as f64 * CHUNK_SECS,
                end_secs: i as f64 * CHUNK_SECS,
            })
            .collect()
    }

    fn chunk_of(window: &TimeWindow) -> usize {
        (window.start_secs / CHUNK_SECS) as usize + 1
    }

    fn fast_config() -> PipelineConfig {
        let mut config = PipelineConfig::for_language("en").with_glossary(GlossaryScope::All);
        config.retry = RetryConfig {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 2,
        };
        config
    }

    struct FixedSegments(Vec<ChunkSpec>);

    #[async_trait]
    impl SegmentProvider for FixedSegments {
        async fn segment(
            &self,
            _recording: &RecordingHandle,
            _target_chunk_secs: f64,
            _cancel: &CancellationToken,
        ) -> Result<Vec<ChunkSpec>, PipelineError> {
            Ok(self.0.clone())
        }
    }

    /// Two chunk-relative segments per chunk; completion order is shuffled
    /// by making later chunks finish first.
    struct MockEngine {
        calls: AtomicUsize,
        invert_delays: bool,
        total: usize,
    }

    impl MockEngine {
        fn new(total: usize) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                invert_delays: false,
                total,
            }
        }

        fn with_inverted_delays(total: usize) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                invert_delays: true,
                total,
            }
        }
    }

    #[async_trait]
    impl TranscriptionEngine for MockEngine {
        async fn transcribe(
            &self,
            _recording: &RecordingHandle,
            window: TimeWindow,
            _cancel: &CancellationToken,
        ) -> Result<Transcription, PipelineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let index = chunk_of(&window);
            if self.invert_delays {
                let delay = 5 * (self.total.saturating_sub(index)) as u64;
                tokio::time::sleep(Duration::from_millis(delay)).await;
            } else {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }

            Ok(Transcription {
                segments: vec![
                    RawSegment {
                        start_secs: 0.5,
                        end_secs: 2.0,
                        text: format!("first line of chunk {}", index),
                    },
                    RawSegment {
                        start_secs: 2.5,
                        end_secs: 4.0,
                        text: format!("second line of chunk {}", index),
                    },
                ],
                language: Some("de".to_string()),
                usage: None,
            })
        }
    }

    #[derive(Default)]
    struct GeneratorBehavior {
        /// chunk index -> number of extract_terms attempts that fail first
        glossary_failures: HashMap<usize, usize>,
        /// translation ids omitted from every translate response
        omit_translation_ids: HashSet<u32>,
        /// refine responses drop the last segment (structurally invalid)
        truncate_refinements: bool,
        /// profile_speakers fails fatally
        fail_speakers: bool,
    }

    #[derive(Default)]
    struct MockGenerator {
        behavior: GeneratorBehavior,
        extract_attempts: Mutex<HashMap<usize, usize>>,
    }

    impl MockGenerator {
        fn new(behavior: GeneratorBehavior) -> Self {
            Self {
                behavior,
                extract_attempts: Mutex::new(HashMap::new()),
            }
        }

        fn attempts_for(&self, chunk_index: usize) -> usize {
            *self
                .extract_attempts
                .lock()
                .unwrap()
                .get(&chunk_index)
                .unwrap_or(&0)
        }

        fn usage(&self) -> UsageSample {
            UsageSample::new("mock-model", 100, 20)
        }
    }

    #[async_trait]
    impl GenerativeService for MockGenerator {
        async fn refine(
            &self,
            request: RefineRequest,
            _cancel: &CancellationToken,
        ) -> Result<GenerativeResponse<Vec<crate::types::SubtitleSegment>>, PipelineError> {
            let mut segments = request.segments;
            if self.behavior.truncate_refinements {
                segments.pop();
            } else {
                for segment in segments.iter_mut() {
                    segment.speaker = Some("Speaker 1".to_string());
                }
            }
            Ok(GenerativeResponse {
                value: segments,
                usage: self.usage(),
            })
        }

        async fn translate(
            &self,
            request: TranslateRequest,
            _cancel: &CancellationToken,
        ) -> Result<GenerativeResponse<Vec<TranslatedLine>>, PipelineError> {
            let lines = request
                .segments
                .iter()
                .filter(|s| !self.behavior.omit_translation_ids.contains(&s.id))
                .map(|s| TranslatedLine {
                    id: s.id,
                    text: format!("{} [en]", s.text),
                })
                .collect();
            Ok(GenerativeResponse {
                value: lines,
                usage: self.usage(),
            })
        }

        async fn extract_terms(
            &self,
            request: TermExtractionRequest,
            _cancel: &CancellationToken,
        ) -> Result<GenerativeResponse<Vec<GlossaryTerm>>, PipelineError> {
            let index = chunk_of(&request.window);
            let attempt = {
                let mut attempts = self.extract_attempts.lock().unwrap();
                let entry = attempts.entry(index).or_insert(0);
                *entry += 1;
                *entry
            };

            let failing = self
                .behavior
                .glossary_failures
                .get(&index)
                .copied()
                .unwrap_or(0);
            if attempt <= failing {
                return Err(PipelineError::service(
                    ServiceErrorKind::RateLimited,
                    format!("injected failure {} for chunk {}", attempt, index),
                ));
            }

            Ok(GenerativeResponse {
                value: vec![GlossaryTerm::new(
                    format!("term-{}", index),
                    format!("translation-{}", index),
                )],
                usage: self.usage(),
            })
        }

        async fn profile_speakers(
            &self,
            _request: SpeakerProfileRequest,
            _cancel: &CancellationToken,
        ) -> Result<GenerativeResponse<Vec<SpeakerProfile>>, PipelineError> {
            if self.behavior.fail_speakers {
                return Err(PipelineError::service(
                    ServiceErrorKind::Auth,
                    "injected auth failure",
                ));
            }
            Ok(GenerativeResponse {
                value: vec![SpeakerProfile {
                    id: "Speaker 1".to_string(),
                    voice: VoiceCharacteristics::default(),
                    sample_quotes: vec!["hello".to_string()],
                    confidence: 0.9,
                }],
                usage: self.usage(),
            })
        }
    }

    fn services(engine: Arc<MockEngine>, generator: Arc<MockGenerator>, n: usize) -> Services {
        Services::new(Arc::new(FixedSegments(specs(n))), engine, generator)
    }

    #[tokio::test]
    async fn test_end_to_end_with_transient_glossary_failure() -> anyhow::Result<()> {
        let engine = Arc::new(MockEngine::new(3));
        let generator = Arc::new(MockGenerator::new(GeneratorBehavior {
            glossary_failures: HashMap::from([(2, 1)]),
            ..Default::default()
        }));
        let pipeline = Pipeline::new(
            fast_config(),
            services(engine.clone(), generator.clone(), 3),
        )?;

        let report = pipeline
            .run(
                RecordingHandle::new("talk", 900.0),
                CancellationToken::new(),
            )
            .await?;

        assert!(!report.cancelled);
        assert_eq!(report.completed_chunks(), 3);
        // All segments, in chunk order, reconciled to recording time.
        assert_eq!(report.track.len(), 6);
        for (i, expected_chunk) in [1usize, 1, 2, 2, 3, 3].iter().enumerate() {
            assert!(
                report.track.segments[i]
                    .text
                    .contains(&format!("chunk {}", expected_chunk))
            );
        }
        assert_eq!(report.track.segments[2].start_secs, 300.5);
        assert_eq!(report.track.segments[4].start_secs, 600.5);
        // Chunk 2 needed a second attempt; the glossary is the full union.
        assert_eq!(generator.attempts_for(2), 2);
        let terms: HashSet<&str> = report
            .glossary
            .terms
            .iter()
            .map(|t| t.term.as_str())
            .collect();
        assert_eq!(terms, HashSet::from(["term-1", "term-2", "term-3"]));
        // Translations applied with no fallbacks.
        assert!(report.chunks.iter().all(|c| c.translation_fallbacks == 0));
        assert!(
            report.track.segments[0]
                .translation
                .as_deref()
                .unwrap()
                .ends_with("[en]")
        );
        // Usage accumulated across chunks and producers.
        assert!(report.usage.for_model("mock-model").unwrap().calls > 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_reviewer_edits_are_published_to_chunks() {
        struct FixedReviewer;

        #[async_trait]
        impl GlossaryReviewer for FixedReviewer {
            async fn review(&self, mut terms: Vec<GlossaryTerm>) -> Vec<GlossaryTerm> {
                terms.retain(|t| t.term == "term-1");
                terms.push(GlossaryTerm::new("added-by-user", "user translation"));
                terms
            }
        }

        let engine = Arc::new(MockEngine::new(2));
        let generator = Arc::new(MockGenerator::new(GeneratorBehavior::default()));
        let pipeline = Pipeline::new(
            fast_config().without_speakers(),
            services(engine, generator, 2).with_reviewer(Arc::new(FixedReviewer)),
        )
        .unwrap();

        let report = pipeline
            .run(
                RecordingHandle::new("talk", 600.0),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let terms: Vec<&str> = report.glossary.terms.iter().map(|t| t.term.as_str()).collect();
        assert_eq!(terms, vec!["term-1", "added-by-user"]);
        assert_eq!(report.completed_chunks(), 2);
    }

    #[tokio::test]
    async fn test_merge_preserves_chunk_order_under_any_completion_order() {
        let n = 6;
        let engine = Arc::new(MockEngine::with_inverted_delays(n));
        let generator = Arc::new(MockGenerator::new(GeneratorBehavior::default()));
        let mut config = fast_config().without_speakers();
        config.glossary.scope = GlossaryScope::Disabled;
        config.transcribe_limit = n; // let all transcriptions race

        let pipeline = Pipeline::new(config, services(engine, generator, n)).unwrap();
        let report = pipeline
            .run(
                RecordingHandle::new("talk", CHUNK_SECS * n as f64),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(report.chunks.len(), n);
        for (i, chunk) in report.chunks.iter().enumerate() {
            assert_eq!(chunk.spec.index, i + 1);
        }
        let starts: Vec<f64> = report.track.segments.iter().map(|s| s.start_secs).collect();
        let mut sorted = starts.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(starts, sorted);
    }

    #[tokio::test]
    async fn test_two_pass_glossary_retry() {
        let n = 5;
        let engine = Arc::new(MockEngine::new(n));
        // Chunk 2 fails all of pass 1 (3 attempts) and succeeds in pass 2;
        // chunk 4 fails both passes.
        let generator = Arc::new(MockGenerator::new(GeneratorBehavior {
            glossary_failures: HashMap::from([(2, 3), (4, 99)]),
            ..Default::default()
        }));
        let pipeline = Pipeline::new(
            fast_config().without_speakers(),
            services(engine, generator.clone(), n),
        )
        .unwrap();

        let report = pipeline
            .run(
                RecordingHandle::new("talk", CHUNK_SECS * n as f64),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        // Pass 2 retried exactly the failure set {2, 4}.
        assert_eq!(generator.attempts_for(1), 1);
        assert_eq!(generator.attempts_for(3), 1);
        assert_eq!(generator.attempts_for(5), 1);
        assert_eq!(generator.attempts_for(2), 4); // 3 in pass 1 + 1 in pass 2
        assert_eq!(generator.attempts_for(4), 6); // 3 in each pass

        let outcomes = &report.glossary.chunks;
        assert_eq!(outcomes.len(), n);
        for (i, outcome) in outcomes.iter().enumerate() {
            assert_eq!(outcome.chunk_index, i + 1);
        }
        assert_eq!(outcomes[1].confidence, Confidence::High);
        assert_eq!(outcomes[3].confidence, Confidence::Low);
        assert!(outcomes[3].terms.is_empty());

        let terms: HashSet<&str> = report
            .glossary
            .terms
            .iter()
            .map(|t| t.term.as_str())
            .collect();
        assert_eq!(
            terms,
            HashSet::from(["term-1", "term-2", "term-3", "term-5"])
        );
    }

    #[tokio::test]
    async fn test_speaker_failure_degrades_run_still_succeeds() {
        let engine = Arc::new(MockEngine::new(2));
        let generator = Arc::new(MockGenerator::new(GeneratorBehavior {
            fail_speakers: true,
            ..Default::default()
        }));
        let pipeline = Pipeline::new(
            fast_config(),
            services(engine, generator, 2),
        )
        .unwrap();

        let report = pipeline
            .run(
                RecordingHandle::new("talk", 600.0),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(report.speakers.is_empty());
        assert_eq!(report.completed_chunks(), 2);
    }

    #[tokio::test]
    async fn test_invalid_refinement_falls_back_to_raw() {
        let engine = Arc::new(MockEngine::new(1));
        let generator = Arc::new(MockGenerator::new(GeneratorBehavior {
            truncate_refinements: true,
            ..Default::default()
        }));
        let pipeline = Pipeline::new(
            fast_config().without_speakers(),
            services(engine, generator, 1),
        )
        .unwrap();

        let report = pipeline
            .run(
                RecordingHandle::new("talk", 300.0),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let chunk = &report.chunks[0];
        assert_eq!(chunk.stage_reached, ChunkStage::Done);
        // Raw transcript survived; the invalid refinement (with a segment
        // dropped) was discarded.
        assert_eq!(chunk.segments.len(), 2);
        assert!(chunk.segments.iter().all(|s| s.speaker.is_none()));
    }

    #[tokio::test]
    async fn test_missing_translation_substitutes_original() {
        let engine = Arc::new(MockEngine::new(1));
        let generator = Arc::new(MockGenerator::new(GeneratorBehavior {
            omit_translation_ids: HashSet::from([1]),
            ..Default::default()
        }));
        let pipeline = Pipeline::new(
            fast_config().without_speakers(),
            services(engine, generator, 1),
        )
        .unwrap();

        let report = pipeline
            .run(
                RecordingHandle::new("talk", 300.0),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let chunk = &report.chunks[0];
        assert_eq!(chunk.translation_fallbacks, 1);
        let missing = chunk.segments.iter().find(|s| s.id == 1).unwrap();
        assert_eq!(missing.translation.as_deref(), Some(missing.text.as_str()));
        let translated = chunk.segments.iter().find(|s| s.id == 0).unwrap();
        assert!(translated.translation.as_deref().unwrap().ends_with("[en]"));
    }

    #[tokio::test]
    async fn test_cancellation_settles_within_bounded_time() {
        let n = 12;
        let engine = Arc::new(MockEngine::new(n));
        let generator = Arc::new(MockGenerator::new(GeneratorBehavior::default()));
        let mut config = fast_config().without_speakers();
        config.glossary.scope = GlossaryScope::Disabled;
        config.transcribe_limit = 1; // queue most chunks behind the gate

        let pipeline = Pipeline::new(
            config,
            services(engine.clone(), generator, n),
        )
        .unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let report = tokio::time::timeout(
            Duration::from_secs(5),
            pipeline.run(RecordingHandle::new("talk", CHUNK_SECS * n as f64), cancel),
        )
        .await
        .expect("run must settle after cancellation")
        .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.chunks.len(), n);
        // Chunks queued behind the transcription gate never issued a call.
        assert!(engine.calls.load(Ordering::SeqCst) < n);
    }

    #[tokio::test]
    async fn test_transcription_gate_never_exceeds_limit() {
        /// Engine that records its high-water mark of concurrent calls.
        struct ProbeEngine {
            active: AtomicUsize,
            peak: AtomicUsize,
        }

        #[async_trait]
        impl TranscriptionEngine for ProbeEngine {
            async fn transcribe(
                &self,
                _recording: &RecordingHandle,
                window: TimeWindow,
                _cancel: &CancellationToken,
            ) -> Result<Transcription, PipelineError> {
                let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis((window.start_secs as u64 / 100) % 5))
                    .await;
                self.active.fetch_sub(1, Ordering::SeqCst);
                Ok(Transcription {
                    segments: vec![RawSegment {
                        start_secs: 0.5,
                        end_secs: 2.0,
                        text: "line".to_string(),
                    }],
                    language: None,
                    usage: None,
                })
            }
        }

        let n = 10;
        let engine = Arc::new(ProbeEngine {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let generator = Arc::new(MockGenerator::new(GeneratorBehavior::default()));
        let mut config = fast_config().without_speakers();
        config.glossary.scope = GlossaryScope::Disabled;
        config.transcribe_limit = 2;

        let pipeline = Pipeline::new(
            config,
            Services::new(Arc::new(FixedSegments(specs(n))), engine.clone(), generator),
        )
        .unwrap();

        pipeline
            .run(
                RecordingHandle::new("talk", CHUNK_SECS * n as f64),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(engine.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(engine.active.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_segmentation_yields_empty_report() {
        let engine = Arc::new(MockEngine::new(0));
        let generator = Arc::new(MockGenerator::new(GeneratorBehavior::default()));
        let pipeline = Pipeline::new(
            fast_config(),
            Services::new(Arc::new(FixedSegments(Vec::new())), engine, generator),
        )
        .unwrap();

        let report = pipeline
            .run(RecordingHandle::new("talk", 0.0), CancellationToken::new())
            .await
            .unwrap();
        assert!(report.track.is_empty());
        assert!(report.chunks.is_empty());
    }

    #[tokio::test]
    async fn test_artifacts_saved_when_enabled() {
        struct CollectingSink(Mutex<Vec<String>>);
        impl ArtifactSink for CollectingSink {
            fn save(&self, name: &str, _content: &str) -> std::io::Result<()> {
                self.0.lock().unwrap().push(name.to_string());
                Ok(())
            }
        }

        let sink = Arc::new(CollectingSink(Mutex::new(Vec::new())));
        let engine = Arc::new(MockEngine::new(2));
        let generator = Arc::new(MockGenerator::new(GeneratorBehavior::default()));
        let pipeline = Pipeline::new(
            fast_config().without_speakers().with_artifacts(),
            services(engine, generator, 2).with_artifacts(sink.clone()),
        )
        .unwrap();

        pipeline
            .run(
                RecordingHandle::new("talk", 600.0),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let names = sink.0.lock().unwrap();
        assert!(names.contains(&"chunk_0001.json".to_string()));
        assert!(names.contains(&"chunk_0002.json".to_string()));
        assert!(names.contains(&"subtitles.srt".to_string()));
        assert!(names.contains(&"glossary.json".to_string()));
    }
}

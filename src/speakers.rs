//! Speaker voice profiling.
//!
//! One inference call per run builds a reference set of voice profiles from
//! sampled audio; every chunk consults it so speaker labels stay consistent
//! across the recording. Failure degrades to an empty set and chunks fall
//! back to per-chunk voice detection.

use crate::error::PipelineError;
use crate::pipeline::PipelineContext;
use crate::retry::with_retries;
use crate::services::{GenerativeResponse, SpeakerProfileRequest};
use crate::types::{RecordingHandle, TimeWindow};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Duration of one sampled window, in seconds.
const SAMPLE_WINDOW_SECS: f64 = 30.0;

/// Descriptive characteristics of one voice.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VoiceCharacteristics {
    pub gender: String,
    pub pitch: String,
    pub speed: String,
    pub accent: String,
    pub tone: String,
}

/// One distinguishable voice in the recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakerProfile {
    pub id: String,
    pub voice: VoiceCharacteristics,
    /// Verbatim quotes heard from this speaker, for disambiguation
    pub sample_quotes: Vec<String>,
    /// Confidence in 0.0..=1.0
    pub confidence: f32,
}

/// Evenly spaced sample windows covering at most `budget_secs` of audio.
///
/// Spreading the windows across the recording (instead of taking the head)
/// keeps late-arriving speakers represented.
fn sample_windows(duration_secs: f64, budget_secs: f64) -> Vec<TimeWindow> {
    if duration_secs <= 0.0 || budget_secs <= 0.0 {
        return Vec::new();
    }
    if duration_secs <= budget_secs {
        return vec![TimeWindow {
            start_secs: 0.0,
            end_secs: duration_secs,
        }];
    }

    let count = (budget_secs / SAMPLE_WINDOW_SECS).ceil().max(1.0) as usize;
    let stride = duration_secs / count as f64;
    (0..count)
        .map(|i| {
            let start = i as f64 * stride;
            TimeWindow {
                start_secs: start,
                end_secs: (start + SAMPLE_WINDOW_SECS).min(duration_secs),
            }
        })
        .collect()
}

/// Build the run's speaker profile set. Runs once per pipeline run; any
/// failure degrades to an empty list rather than failing the run.
pub(crate) async fn extract_speaker_profiles(
    ctx: Arc<PipelineContext>,
    recording: RecordingHandle,
) -> Vec<SpeakerProfile> {
    let windows = sample_windows(recording.duration_secs, ctx.config.speakers.sample_secs);
    if windows.is_empty() {
        return Vec::new();
    }

    let generator = ctx.services.generator.clone();
    let cancel = ctx.cancel.clone();
    let request = SpeakerProfileRequest {
        recording,
        windows,
    };

    let result = with_retries(&ctx.config.retry, &ctx.cancel, "speaker profiling", move || {
        let generator = generator.clone();
        let request = request.clone();
        let cancel = cancel.clone();
        Box::pin(async move { generator.profile_speakers(request, &cancel).await })
            as std::pin::Pin<
                Box<
                    dyn std::future::Future<
                            Output = Result<
                                GenerativeResponse<Vec<SpeakerProfile>>,
                                PipelineError,
                            >,
                        > + Send + 'static,
                >,
            >
    })
    .await;

    match result {
        Ok(response) => {
            ctx.usage.record(&response.usage);
            info!("profiled {} speakers", response.value.len());
            response.value
        }
        Err(error) if error.is_cancelled() => Vec::new(),
        Err(error) => {
            warn!(
                "speaker profiling failed: {}, continuing without reference profiles",
                error
            );
            Vec::new()
        }
    }
}

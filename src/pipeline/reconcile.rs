//! Timestamp reconciliation.
//!
//! A generative call may return timestamps relative to the audio slice it
//! was given (0-based) or, inconsistently, absolute timestamps matching the
//! chunk's position in the recording. The heuristic compares the first
//! segment's start against both candidates and shifts the whole chunk when
//! the relative reading wins.

use crate::types::SubtitleSegment;

/// Convert chunk-local timestamps to recording-global ones.
///
/// Known limitation: when the chunk offset is small and the model's timing
/// error is comparably large, the distance comparison can misclassify. For
/// the first chunk (offset 0) both candidates coincide and no correction is
/// needed either way.
pub fn align_to_recording(segments: &mut [SubtitleSegment], chunk_start_secs: f64) {
    if segments.is_empty() || chunk_start_secs == 0.0 {
        return;
    }

    let first = segments[0].start_secs;
    let relative_distance = first.abs();
    let absolute_distance = (first - chunk_start_secs).abs();

    if relative_distance <= absolute_distance {
        for segment in segments.iter_mut() {
            segment.start_secs += chunk_start_secs;
            segment.end_secs += chunk_start_secs;
        }
    }
}

//! Per-model usage accumulation for cost reporting.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Resource usage reported by one inference call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageSample {
    pub model: String,
    pub prompt_tokens: u64,
    pub output_tokens: u64,
}

impl UsageSample {
    pub fn new(model: impl Into<String>, prompt_tokens: u64, output_tokens: u64) -> Self {
        Self {
            model: model.into(),
            prompt_tokens,
            output_tokens,
        }
    }
}

/// Accumulated usage for one model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelUsage {
    pub calls: u64,
    pub prompt_tokens: u64,
    pub output_tokens: u64,
}

/// Concurrent per-model accumulator.
///
/// Written to by every chunk task and both background producers; one of the
/// two shared-mutable points in the pipeline (the other being the shared
/// futures).
#[derive(Debug, Default)]
pub struct UsageRecorder {
    models: DashMap<String, ModelUsage>,
}

impl UsageRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, sample: &UsageSample) {
        let mut entry = self.models.entry(sample.model.clone()).or_default();
        entry.calls += 1;
        entry.prompt_tokens += sample.prompt_tokens;
        entry.output_tokens += sample.output_tokens;
    }

    /// Snapshot of all models, sorted by model name for stable reporting.
    pub fn report(&self) -> UsageReport {
        let mut models: Vec<(String, ModelUsage)> = self
            .models
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        models.sort_by(|a, b| a.0.cmp(&b.0));

        let mut totals = ModelUsage::default();
        for (_, usage) in &models {
            totals.calls += usage.calls;
            totals.prompt_tokens += usage.prompt_tokens;
            totals.output_tokens += usage.output_tokens;
        }

        UsageReport { models, totals }
    }
}

/// Final usage report for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageReport {
    pub models: Vec<(String, ModelUsage)>,
    pub totals: ModelUsage,
}

impl UsageReport {
    pub fn for_model(&self, model: &str) -> Option<&ModelUsage> {
        self.models
            .iter()
            .find(|(name, _)| name == model)
            .map(|(_, usage)| usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulates_per_model() {
        let recorder = UsageRecorder::new();
        recorder.record(&UsageSample::new("gemini-flash", 100, 50));
        recorder.record(&UsageSample::new("gemini-flash", 200, 25));
        recorder.record(&UsageSample::new("gemini-pro", 10, 5));

        let report = recorder.report();
        let flash = report.for_model("gemini-flash").unwrap();
        assert_eq!(flash.calls, 2);
        assert_eq!(flash.prompt_tokens, 300);
        assert_eq!(flash.output_tokens, 75);
        assert_eq!(report.totals.calls, 3);
        assert_eq!(report.totals.prompt_tokens, 310);
    }

    #[test]
    fn test_report_sorted_by_model_name() {
        let recorder = UsageRecorder::new();
        recorder.record(&UsageSample::new("zeta", 1, 1));
        recorder.record(&UsageSample::new("alpha", 1, 1));
        let report = recorder.report();
        assert_eq!(report.models[0].0, "alpha");
        assert_eq!(report.models[1].0, "zeta");
    }

    #[tokio::test]
    async fn test_concurrent_recording() {
        use std::sync::Arc;

        let recorder = Arc::new(UsageRecorder::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let recorder = recorder.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    recorder.record(&UsageSample::new("m", 1, 2));
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let report = recorder.report();
        assert_eq!(report.totals.calls, 800);
        assert_eq!(report.totals.output_tokens, 1600);
    }
}

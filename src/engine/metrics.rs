//! Passive run observability.
//!
//! [`RunMetrics`] is threaded alongside the pipeline state: stages record
//! their durations and the invoker records token usage per call. Nothing
//! here ever influences routing. The collected numbers are emitted as
//! structured `tracing` events when the run finishes.

use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::providers::{ModelTier, UsageStats};

/// Aggregated token usage across a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageTotals {
    /// Total prompt tokens across all invocations.
    pub input_tokens: u64,
    /// Total completion tokens across all invocations.
    pub output_tokens: u64,
    /// Number of model invocations that reported usage.
    pub calls: u32,
}

/// One recorded stage execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageTiming {
    /// Stage name as logged (e.g. `"planning"`).
    pub stage: String,
    /// Wall-clock duration of the stage.
    pub duration: Duration,
}

#[derive(Debug, Default)]
struct Inner {
    stages: Vec<StageTiming>,
    usage: UsageTotals,
}

/// Collector for per-stage durations and per-call token usage.
///
/// Interior-mutable so it can be shared behind an `Arc` with the
/// summarization fan-out tasks.
#[derive(Debug)]
pub struct RunMetrics {
    trace_id: String,
    started_at: DateTime<Utc>,
    inner: Mutex<Inner>,
}

impl RunMetrics {
    /// Start a fresh collector with a new trace id.
    pub fn new() -> Self {
        Self {
            trace_id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// The run's trace id.
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// When the run started.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Record one stage's wall-clock duration.
    pub fn record_stage(&self, stage: &str, duration: Duration) {
        info!(trace_id = %self.trace_id, stage, ?duration, "stage completed");
        if let Ok(mut inner) = self.inner.lock() {
            inner.stages.push(StageTiming {
                stage: stage.to_owned(),
                duration,
            });
        }
    }

    /// Record token usage from one model invocation.
    pub fn record_usage(&self, tier: ModelTier, usage: UsageStats) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.usage.input_tokens = inner
                .usage
                .input_tokens
                .saturating_add(u64::from(usage.input_tokens));
            inner.usage.output_tokens = inner
                .usage
                .output_tokens
                .saturating_add(u64::from(usage.output_tokens));
            inner.usage.calls = inner.usage.calls.saturating_add(1);
        }
        info!(
            trace_id = %self.trace_id,
            tier = %tier,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            "model invocation usage"
        );
    }

    /// Snapshot of the aggregated token usage.
    pub fn usage_totals(&self) -> UsageTotals {
        self.inner
            .lock()
            .map(|inner| inner.usage)
            .unwrap_or_default()
    }

    /// Snapshot of the recorded stage timings.
    pub fn stage_timings(&self) -> Vec<StageTiming> {
        self.inner
            .lock()
            .map(|inner| inner.stages.clone())
            .unwrap_or_default()
    }

    /// Emit the run summary event.
    pub fn log_summary(&self) {
        let totals = self.usage_totals();
        let stages = self.stage_timings();
        info!(
            trace_id = %self.trace_id,
            stages = stages.len(),
            input_tokens = totals.input_tokens,
            output_tokens = totals.output_tokens,
            model_calls = totals.calls,
            "run metrics"
        );
    }
}

impl Default for RunMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_accumulates() {
        let metrics = RunMetrics::new();
        metrics.record_usage(
            ModelTier::Primary,
            UsageStats {
                input_tokens: 100,
                output_tokens: 20,
            },
        );
        metrics.record_usage(
            ModelTier::Secondary,
            UsageStats {
                input_tokens: 50,
                output_tokens: 5,
            },
        );

        let totals = metrics.usage_totals();
        assert_eq!(totals.input_tokens, 150);
        assert_eq!(totals.output_tokens, 25);
        assert_eq!(totals.calls, 2);
    }

    #[test]
    fn test_stage_timings_recorded_in_order() {
        let metrics = RunMetrics::new();
        metrics.record_stage("planning", Duration::from_millis(5));
        metrics.record_stage("retrieval", Duration::from_millis(7));

        let stages = metrics.stage_timings();
        assert_eq!(stages.len(), 2);
        assert_eq!(stages[0].stage, "planning");
        assert_eq!(stages[1].stage, "retrieval");
    }

    #[test]
    fn test_trace_ids_are_unique() {
        let a = RunMetrics::new();
        let b = RunMetrics::new();
        assert_ne!(a.trace_id(), b.trace_id());
    }
}

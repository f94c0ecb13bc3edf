//! The pipeline engine.
//!
//! Owns the directed stage flow: evaluates the two routing predicates,
//! drives the stages to completion in a strictly sequential chain, and
//! guarantees that every run (including cancelled ones) resolves to
//! exactly one [`FinalBrief`]. All external I/O lives inside the stages;
//! the engine only sequences them.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::config::{PipelineConfig, SearchConfig};
use crate::providers::ModelTier;
use crate::search::SearchClient;
use crate::types::FinalBrief;

use super::invoker::StructuredInvoker;
use super::metrics::RunMetrics;
use super::state::PipelineState;
use super::{planner, recall, recovery, retrieval, summarizer, synthesizer, StageOutcome};

/// Entry predicate: route through context recall only for follow-up
/// requests that actually have history to recall.
///
/// Pure function of state; invokes no collaborators.
pub fn wants_context_recall(state: &PipelineState) -> bool {
    state.follow_up && !state.history.is_empty()
}

/// Post-summarization predicate: a set pipeline error routes to the error
/// terminal, otherwise the run exits through synthesis.
///
/// Pure function of state; invokes no collaborators.
pub fn wants_error_terminal(state: &PipelineState) -> bool {
    state.error.is_some()
}

/// Tunables the engine reads per run.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Worker pool bound for the summarization fan-out.
    pub max_concurrent_summaries: usize,
    /// Pacing delay between retrieval queries.
    pub query_pacing: Duration,
}

impl EngineOptions {
    /// Derive options from the loaded configuration.
    pub fn from_config(pipeline: &PipelineConfig, search: &SearchConfig) -> Self {
        Self {
            max_concurrent_summaries: pipeline.max_concurrent_summaries,
            query_pacing: Duration::from_millis(search.query_pacing_ms),
        }
    }
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default(), &SearchConfig::default())
    }
}

/// Drives one request through the research pipeline.
///
/// Shared across concurrent runs; each run exclusively owns its own
/// [`PipelineState`], so the engine needs no locking.
pub struct Engine {
    invoker: Arc<StructuredInvoker>,
    search: Arc<dyn SearchClient>,
    options: EngineOptions,
}

impl Engine {
    /// Assemble an engine from its collaborators.
    pub fn new(
        invoker: StructuredInvoker,
        search: Arc<dyn SearchClient>,
        options: EngineOptions,
    ) -> Self {
        Self {
            invoker: Arc::new(invoker),
            search,
            options,
        }
    }

    /// Run the pipeline to completion.
    ///
    /// Never fails: every failure path terminates in a brief carrying a
    /// diagnostic in its metadata.
    pub async fn run(&self, mut state: PipelineState) -> FinalBrief {
        let metrics = Arc::new(RunMetrics::new());
        state.metadata.insert(
            "trace_id".to_owned(),
            serde_json::json!(metrics.trace_id()),
        );
        state.metadata.insert(
            "started_at".to_owned(),
            serde_json::json!(metrics.started_at().to_rfc3339()),
        );
        state.metadata.insert(
            "primary_model".to_owned(),
            serde_json::json!(self.invoker.model_spec(ModelTier::Primary)),
        );

        info!(
            trace_id = %metrics.trace_id(),
            topic = %state.topic,
            depth = %state.depth,
            follow_up = state.follow_up,
            "pipeline run started"
        );

        // Entry predicate.
        if wants_context_recall(&state) {
            let timer = Instant::now();
            let outcome = recall::run(&self.invoker, &state, &metrics).await;
            metrics.record_stage("context_recall", timer.elapsed());
            state.continuity = outcome.into_value();
        }

        // Planning. Never fatal.
        let timer = Instant::now();
        let outcome = planner::run(&self.invoker, &state, &metrics).await;
        metrics.record_stage("planning", timer.elapsed());
        state.plan = outcome.into_value();

        // Retrieval. The one stage allowed to set the pipeline error.
        let timer = Instant::now();
        let outcome = retrieval::run(
            self.search.as_ref(),
            state.plan.as_ref(),
            self.options.query_pacing,
        )
        .await;
        metrics.record_stage("retrieval", timer.elapsed());
        match outcome {
            StageOutcome::Ok(sources) | StageOutcome::Degraded { value: sources, .. } => {
                state.sources = Some(sources);
            }
            StageOutcome::Fatal { reason } => state.error = Some(reason),
        }

        // Per-source summarization. Skipped once the error is set; a set
        // error is terminal and nothing downstream may clear it.
        if state.error.is_none() {
            let timer = Instant::now();
            let outcome = summarizer::run(
                &self.invoker,
                &metrics,
                &state.topic,
                state.sources.as_deref().unwrap_or_default(),
                self.options.max_concurrent_summaries,
            )
            .await;
            metrics.record_stage("summarization", timer.elapsed());
            match outcome {
                StageOutcome::Ok(summaries)
                | StageOutcome::Degraded {
                    value: summaries, ..
                } => state.summaries = Some(summaries),
                StageOutcome::Fatal { reason } => state.error = Some(reason),
            }
        }

        // Post-summarization predicate: exactly one terminal per run.
        let brief = if wants_error_terminal(&state) {
            let timer = Instant::now();
            let brief = recovery::run(&state);
            metrics.record_stage("error_terminal", timer.elapsed());
            brief
        } else {
            let timer = Instant::now();
            let outcome = synthesizer::run(&self.invoker, &state, &metrics).await;
            metrics.record_stage("synthesis", timer.elapsed());
            outcome.into_value().unwrap_or_else(|| {
                // Synthesis is never fatal by construction; keep the
                // no-throw contract even if that changes.
                recovery::error_brief(&state.topic, "synthesis produced no brief")
            })
        };

        state.final_brief = Some(brief.clone());
        metrics.log_summary();
        info!(
            trace_id = %metrics.trace_id(),
            references = brief.references.len(),
            degraded = brief.is_degraded(),
            "pipeline run finished"
        );
        brief
    }

    /// Run with a wall-clock budget.
    ///
    /// Cancellation drops the in-flight run, aborting outstanding
    /// collaborator calls and fan-out tasks with it, and resolves to an
    /// error-terminal brief. No partial state escapes.
    pub async fn run_with_timeout(&self, state: PipelineState, budget: Duration) -> FinalBrief {
        let topic = state.topic.clone();
        match tokio::time::timeout(budget, self.run(state)).await {
            Ok(brief) => brief,
            Err(_) => {
                warn!(topic = %topic, ?budget, "run cancelled by timeout");
                recovery::error_brief(
                    &topic,
                    &format!(
                        "Research run exceeded its {}s time budget",
                        budget.as_secs()
                    ),
                )
            }
        }
    }
}

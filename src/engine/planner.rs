//! Planning stage.
//!
//! Turns the topic, depth, and optional continuity digest into a
//! [`ResearchPlan`]. Uses the primary tier. The fallback plan is fully
//! deterministic, so this stage can never fail the pipeline.

use tracing::{info, warn};

use crate::providers::ModelTier;
use crate::types::{ContinuitySummary, ResearchPlan};

use super::invoker::StructuredInvoker;
use super::metrics::RunMetrics;
use super::state::PipelineState;
use super::StageOutcome;

const PLANNING_INSTRUCTIONS: &str = "\
You are an expert research planner. Create a comprehensive research plan \
for the given topic.

Consider:
1. Multiple search angles and perspectives
2. Different types of sources (academic, news, reports)
3. Recent vs. historical information
4. Specific focus areas within the topic

Generate search queries that will yield diverse, high-quality sources.";

/// Produce the research plan for this run.
///
/// Never fatal: a failed or malformed model response is replaced by the
/// templated fallback plan.
pub async fn run(
    invoker: &StructuredInvoker,
    state: &PipelineState,
    metrics: &RunMetrics,
) -> StageOutcome<ResearchPlan> {
    let mut input = format!(
        "Research topic: {topic}\nResearch depth: {depth}\n",
        topic = state.topic,
        depth = state.depth,
    );
    if let Some(continuity) = &state.continuity {
        input.push_str(&format!(
            "Previous research context:\n{}\n",
            continuity_digest(continuity)
        ));
    }
    input.push_str("\nCreate a research plan with search queries and rationale.");

    match invoker
        .invoke::<ResearchPlan>(ModelTier::Primary, PLANNING_INSTRUCTIONS, &input, metrics)
        .await
    {
        Ok(plan) => {
            info!(
                queries = plan.queries.len(),
                expected_sources = plan.expected_sources,
                "research plan created"
            );
            StageOutcome::Ok(plan)
        }
        Err(e) => {
            warn!(error = %e, "planning fell back to templated plan");
            StageOutcome::Degraded {
                value: fallback_plan(state),
                reason: e.to_string(),
            }
        }
    }
}

/// Render a continuity summary into the compact digest planning prompts use.
pub fn continuity_digest(continuity: &ContinuitySummary) -> String {
    format!(
        "Previous topics: {}\nKey findings: {}",
        continuity.previous_topics.join(", "),
        continuity.key_findings.join(", "),
    )
}

/// Deterministic plan derived from the topic and depth alone.
fn fallback_plan(state: &PipelineState) -> ResearchPlan {
    ResearchPlan {
        queries: vec![
            format!("{} research", state.topic),
            format!("{} analysis", state.topic),
            format!("{} trends", state.topic),
        ],
        rationale: "Basic search queries for the topic".to_owned(),
        expected_sources: state.depth.fallback_source_count(),
        focus_areas: vec![state.topic.clone()],
    }
}

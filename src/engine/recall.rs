//! Context recall stage.
//!
//! Runs only for follow-up requests with non-empty history: condenses the
//! user's recent briefs into a [`ContinuitySummary`] that downstream
//! prompts can reference. Uses the secondary tier: this is condensation
//! work, not reasoning.

use tracing::{info, warn};

use crate::providers::ModelTier;
use crate::types::ContinuitySummary;

use super::invoker::StructuredInvoker;
use super::metrics::RunMetrics;
use super::state::PipelineState;
use super::{truncate_chars, StageOutcome};

/// How many history entries feed the digest (most recent).
const HISTORY_WINDOW: usize = 3;

/// Executive-summary excerpt length inside the digest.
const SUMMARY_EXCERPT_CHARS: usize = 200;

const RECALL_INSTRUCTIONS: &str = "\
You are an expert research assistant. Summarize a user's previous research \
interactions to provide context for a new research request.

Focus on:
1. Key topics and findings from previous research
2. User preferences and patterns
3. How the new research might build on previous work

Be concise but comprehensive.";

/// Condense recent history into a continuity summary.
///
/// Never fatal: when the model call fails, the deterministic digest built
/// from the raw history is returned instead.
pub async fn run(
    invoker: &StructuredInvoker,
    state: &PipelineState,
    metrics: &RunMetrics,
) -> StageOutcome<ContinuitySummary> {
    let digest = history_digest(state);
    let input = format!(
        "Previous research context:\n{digest}\n\n\
         New research topic: {topic}\n\n\
         Provide a structured summary of the previous research context \
         relevant to this new topic.",
        topic = state.topic,
    );

    match invoker
        .invoke::<ContinuitySummary>(ModelTier::Secondary, RECALL_INSTRUCTIONS, &input, metrics)
        .await
    {
        Ok(summary) => {
            info!(
                topics = summary.previous_topics.len(),
                findings = summary.key_findings.len(),
                "context recall produced continuity summary"
            );
            StageOutcome::Ok(summary)
        }
        Err(e) => {
            warn!(error = %e, "context recall fell back to history digest");
            StageOutcome::Degraded {
                value: fallback_summary(state),
                reason: e.to_string(),
            }
        }
    }
}

/// Text digest of the most recent history entries, oldest first.
fn history_digest(state: &PipelineState) -> String {
    state
        .recent_history(HISTORY_WINDOW)
        .iter()
        .map(|brief| {
            format!(
                "Topic: {}\nKey Insights: {}\nExecutive Summary: {}",
                brief.topic,
                brief.key_insights.join(", "),
                truncate_chars(&brief.executive_summary, SUMMARY_EXCERPT_CHARS),
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Deterministic continuity summary built from the whole history.
fn fallback_summary(state: &PipelineState) -> ContinuitySummary {
    ContinuitySummary {
        previous_topics: state.history.iter().map(|b| b.topic.clone()).collect(),
        key_findings: state
            .history
            .iter()
            .flat_map(|b| b.key_insights.iter().cloned())
            .collect(),
        preferences: std::collections::HashMap::new(),
        continuity_notes: "Previous research context available".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::Utc;

    use crate::providers::router::ModelRouter;
    use crate::providers::{
        CompletionRequest, CompletionResponse, LlmProvider, ProviderError, UsageStats,
    };
    use crate::types::{BriefRequest, FinalBrief, ResearchDepth};

    struct EchoProvider {
        text: String,
    }

    #[async_trait]
    impl LlmProvider for EchoProvider {
        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, ProviderError> {
            Ok(CompletionResponse {
                text: self.text.clone(),
                usage: UsageStats::default(),
                model: "mock".to_owned(),
            })
        }

        fn model_id(&self) -> &str {
            "mock/echo"
        }
    }

    struct DownProvider;

    #[async_trait]
    impl LlmProvider for DownProvider {
        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, ProviderError> {
            Err(ProviderError::Unavailable("offline".to_owned()))
        }

        fn model_id(&self) -> &str {
            "mock/down"
        }
    }

    fn invoker(provider: Arc<dyn LlmProvider>) -> StructuredInvoker {
        StructuredInvoker::new(ModelRouter::for_testing(Arc::clone(&provider), provider))
    }

    fn brief(topic: &str, insights: &[&str]) -> FinalBrief {
        FinalBrief {
            topic: topic.to_owned(),
            executive_summary: "summary ".repeat(10),
            synthesis: String::new(),
            key_insights: insights.iter().map(|s| (*s).to_owned()).collect(),
            references: vec![],
            context_used: None,
            metadata: HashMap::new(),
            generated_at: Utc::now(),
        }
    }

    fn follow_up_state(history: Vec<FinalBrief>) -> PipelineState {
        PipelineState::new(
            &BriefRequest {
                topic: "battery recycling".to_owned(),
                user_id: "u1".to_owned(),
                depth: ResearchDepth::Moderate,
                follow_up: true,
                additional_context: None,
            },
            history,
        )
    }

    #[tokio::test]
    async fn test_recall_uses_model_output() {
        let json = r#"{
            "previous_topics": ["solar"],
            "key_findings": ["costs fell"],
            "preferences": {},
            "continuity_notes": "continues energy thread"
        }"#;
        let invoker = invoker(Arc::new(EchoProvider {
            text: json.to_owned(),
        }));
        let state = follow_up_state(vec![brief("solar", &["costs fell"])]);
        let metrics = RunMetrics::new();

        let outcome = run(&invoker, &state, &metrics).await;
        let summary = outcome.into_value().expect("has value");
        assert_eq!(summary.continuity_notes, "continues energy thread");
    }

    #[tokio::test]
    async fn test_recall_fallback_aggregates_all_history() {
        let invoker = invoker(Arc::new(DownProvider));
        let state = follow_up_state(vec![
            brief("solar", &["i1", "i2"]),
            brief("wind", &["i3"]),
        ]);
        let metrics = RunMetrics::new();

        let outcome = run(&invoker, &state, &metrics).await;
        assert!(outcome.is_degraded());
        let summary = outcome.into_value().expect("has value");
        assert_eq!(summary.previous_topics, vec!["solar", "wind"]);
        assert_eq!(summary.key_findings, vec!["i1", "i2", "i3"]);
        assert!(summary.preferences.is_empty());
        assert_eq!(
            summary.continuity_notes,
            "Previous research context available"
        );
    }

    #[test]
    fn test_digest_covers_only_recent_window() {
        let state = follow_up_state(vec![
            brief("one", &[]),
            brief("two", &[]),
            brief("three", &[]),
            brief("four", &[]),
        ]);
        let digest = history_digest(&state);
        assert!(!digest.contains("Topic: one"));
        assert!(digest.contains("Topic: two"));
        assert!(digest.contains("Topic: four"));
    }
}

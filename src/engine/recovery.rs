//! Error-terminal stage.
//!
//! Converts a pipeline failure into a well-formed, user-presentable brief
//! instead of propagating the failure. Fully deterministic, no external
//! calls. This is what guarantees the engine's no-throw contract.

use std::collections::HashMap;

use chrono::Utc;
use tracing::error;

use crate::types::{FinalBrief, SourceSummary};

use super::state::PipelineState;

/// Sentinel url carried by the error reference.
const SENTINEL_URL: &str = "https://error.example.com";

/// Build the terminal brief for a failed run.
pub fn run(state: &PipelineState) -> FinalBrief {
    let reason = state
        .error
        .clone()
        .unwrap_or_else(|| "unknown pipeline error".to_owned());
    error!(error = %reason, topic = %state.topic, "pipeline resolved through error terminal");
    error_brief(&state.topic, &reason)
}

/// Deterministic error brief for a topic and failure reason.
///
/// Also used by the run harness for cancellation, where no pipeline state
/// survives to consult.
pub fn error_brief(topic: &str, reason: &str) -> FinalBrief {
    let sentinel = SourceSummary {
        url: SENTINEL_URL.to_owned(),
        title: "Error in Research Generation".to_owned(),
        summary: format!("An error occurred during research generation: {reason}"),
        relevance_score: 0.0,
        key_points: vec!["Error occurred during research generation".to_owned()],
        source_type: "error".to_owned(),
        publication_date: None,
        author: None,
    };

    let mut metadata = HashMap::new();
    metadata.insert("error".to_owned(), serde_json::json!(reason));

    FinalBrief {
        topic: topic.to_owned(),
        executive_summary: format!(
            "Error generating research brief: {reason}. Please try again with a \
             different topic or check your API configuration."
        ),
        synthesis: "Unable to complete research due to errors. The system \
                    encountered issues while processing your request. This could \
                    be due to API configuration problems, network issues, or \
                    invalid search queries."
            .to_owned(),
        key_insights: vec![
            "Error occurred during research generation".to_owned(),
            "Please check API configuration".to_owned(),
            "Try with a different topic".to_owned(),
        ],
        references: vec![sentinel],
        context_used: None,
        metadata,
        generated_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BriefRequest, ResearchDepth, Structured};

    #[test]
    fn test_error_brief_shape() {
        let brief = error_brief("fusion timelines", "No content could be fetched");

        assert_eq!(brief.topic, "fusion timelines");
        assert_eq!(
            brief.metadata["error"],
            serde_json::json!("No content could be fetched")
        );
        assert!(brief.is_degraded());
        assert!(brief.validate().is_ok());

        assert_eq!(brief.references.len(), 1);
        let sentinel = &brief.references[0];
        assert_eq!(sentinel.url, SENTINEL_URL);
        assert_eq!(sentinel.source_type, "error");
        assert!((sentinel.relevance_score - 0.0).abs() < f64::EPSILON);

        assert_eq!(brief.key_insights.len(), 3);
    }

    #[test]
    fn test_run_embeds_state_error() {
        let mut state = PipelineState::new(
            &BriefRequest {
                topic: "t".to_owned(),
                user_id: "u".to_owned(),
                depth: ResearchDepth::Shallow,
                follow_up: false,
                additional_context: None,
            },
            vec![],
        );
        state.error = Some("search collapsed".to_owned());

        let brief = run(&state);
        assert!(brief.executive_summary.contains("search collapsed"));
        assert_eq!(brief.metadata["error"], serde_json::json!("search collapsed"));
    }
}

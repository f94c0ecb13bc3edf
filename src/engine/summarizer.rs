//! Per-source summarization stage.
//!
//! Every retrieved source is condensed independently on the secondary
//! tier. This is the one place in the pipeline where true parallelism
//! pays: invocations fan out under a bounded worker pool and fan back in
//! before synthesis. One source's failure never aborts the others.
//!
//! Two fallback tiers, deliberately distinct because they carry different
//! relevance semantics downstream:
//! - invocation failure → neutral-positive fallback built from the raw
//!   content (relevance [`FALLBACK_RELEVANCE`]);
//! - any other per-source failure (a panicked or cancelled task) →
//!   zero-relevance placeholder flagged "Error processing source".

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::providers::ModelTier;
use crate::types::{RawSource, SourceSummary};

use super::invoker::StructuredInvoker;
use super::metrics::RunMetrics;
use super::{truncate_chars, StageOutcome};

/// Relevance assigned by the invocation-failure fallback. A fixed
/// neutral-positive default, not derived from the content.
pub const FALLBACK_RELEVANCE: f64 = 0.7;

/// Relevance assigned by the unexpected-failure fallback.
pub const ERROR_RELEVANCE: f64 = 0.0;

/// Pipeline error when there is nothing to summarize. Unreachable given
/// retrieval's own empty-result gate; kept as a guard.
pub const NO_CONTENT_ERROR: &str = "No content available for summarization";

/// Source content excerpt length fed to the model.
const SOURCE_EXCERPT_CHARS: usize = 2000;

/// Summary length used by the invocation-failure fallback.
const FALLBACK_SUMMARY_CHARS: usize = 500;

/// Key-point excerpt length used by the invocation-failure fallback.
const FALLBACK_EXCERPT_CHARS: usize = 150;

const SUMMARIZATION_INSTRUCTIONS: &str = "\
You are an expert research analyst. Summarize web content in relation to \
a specific research topic.

For the source:
1. Summarize the content relevant to the topic
2. Assess relevance to the topic (0.0-1.0)
3. Extract the key points
4. Note the source type and any author or publication date

Be objective and focus on factual information.";

/// Summarize every source, one summary per source.
///
/// Count-preserving: the output length always equals the input length.
/// Never fatal for non-empty input.
pub async fn run(
    invoker: &Arc<StructuredInvoker>,
    metrics: &Arc<RunMetrics>,
    topic: &str,
    sources: &[RawSource],
    max_concurrent: usize,
) -> StageOutcome<Vec<SourceSummary>> {
    if sources.is_empty() {
        return StageOutcome::Fatal {
            reason: NO_CONTENT_ERROR.to_owned(),
        };
    }

    let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
    let mut join_set = JoinSet::new();

    for (idx, source) in sources.iter().enumerate() {
        let invoker = Arc::clone(invoker);
        let metrics = Arc::clone(metrics);
        let semaphore = Arc::clone(&semaphore);
        let topic = topic.to_owned();
        let source = source.clone();

        join_set.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            let (summary, degraded) = summarize_one(&invoker, &metrics, &topic, &source).await;
            (idx, summary, degraded)
        });
    }

    let mut slots: Vec<Option<SourceSummary>> = sources.iter().map(|_| None).collect();
    let mut degraded_count = 0usize;

    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((idx, summary, degraded)) => {
                if degraded {
                    degraded_count = degraded_count.saturating_add(1);
                }
                if let Some(slot) = slots.get_mut(idx) {
                    *slot = Some(summary);
                }
            }
            Err(e) => {
                // The task itself died; its slot is filled below.
                warn!(error = %e, "summarization task failed");
            }
        }
    }

    let mut summaries = Vec::with_capacity(sources.len());
    for (idx, slot) in slots.into_iter().enumerate() {
        match slot {
            Some(summary) => summaries.push(summary),
            None => {
                degraded_count = degraded_count.saturating_add(1);
                summaries.push(error_summary(&sources[idx], "summarization task failed"));
            }
        }
    }

    info!(
        sources = sources.len(),
        degraded = degraded_count,
        "per-source summarization complete"
    );

    if degraded_count > 0 {
        StageOutcome::Degraded {
            reason: format!(
                "{degraded_count} of {} sources used fallback summaries",
                summaries.len()
            ),
            value: summaries,
        }
    } else {
        StageOutcome::Ok(summaries)
    }
}

/// Summarize a single source. Returns the summary and whether it came
/// from the fallback path.
async fn summarize_one(
    invoker: &StructuredInvoker,
    metrics: &RunMetrics,
    topic: &str,
    source: &RawSource,
) -> (SourceSummary, bool) {
    let input = format!(
        "Research topic: {topic}\n\
         Source URL: {url}\n\
         Source title: {title}\n\
         Source content: {content}\n\n\
         Summarize this source in relation to the research topic.",
        url = source.url,
        title = source.title,
        content = truncate_chars(&source.content, SOURCE_EXCERPT_CHARS),
    );

    match invoker
        .invoke::<SourceSummary>(
            ModelTier::Secondary,
            SUMMARIZATION_INSTRUCTIONS,
            &input,
            metrics,
        )
        .await
    {
        Ok(mut summary) => {
            // The origin url is load-bearing for traceability; never trust
            // the model to echo it back correctly.
            summary.url = source.url.clone();
            if summary.title.trim().is_empty() {
                summary.title = source.title.clone();
            }
            debug!(url = %source.url, relevance = summary.relevance_score, "source summarized");
            (summary, false)
        }
        Err(e) => {
            warn!(url = %source.url, error = %e, "source summarization fell back");
            (fallback_summary(source), true)
        }
    }
}

/// Neutral-positive fallback built from the raw content.
fn fallback_summary(source: &RawSource) -> SourceSummary {
    SourceSummary {
        url: source.url.clone(),
        title: source.title.clone(),
        summary: truncate_chars(&source.content, FALLBACK_SUMMARY_CHARS),
        relevance_score: FALLBACK_RELEVANCE,
        key_points: vec![
            truncate_chars(&source.content, FALLBACK_EXCERPT_CHARS),
            "Content retrieved from web search".to_owned(),
            "Detailed analysis unavailable for this source".to_owned(),
        ],
        source_type: "web page".to_owned(),
        publication_date: None,
        author: None,
    }
}

/// Zero-relevance placeholder for a source whose processing failed outside
/// the invocation path.
fn error_summary(source: &RawSource, error: &str) -> SourceSummary {
    SourceSummary {
        url: source.url.clone(),
        title: source.title.clone(),
        summary: format!("Error processing source: {error}"),
        relevance_score: ERROR_RELEVANCE,
        key_points: vec!["Error processing source".to_owned()],
        source_type: "web page".to_owned(),
        publication_date: None,
        author: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use async_trait::async_trait;
    use chrono::Utc;

    use crate::providers::router::ModelRouter;
    use crate::providers::{
        CompletionRequest, CompletionResponse, LlmProvider, ProviderError, UsageStats,
    };

    /// Returns a valid summary JSON, unless the input mentions a poisoned
    /// url, in which case the call fails.
    struct SelectiveProvider {
        poison: Option<String>,
    }

    #[async_trait]
    impl LlmProvider for SelectiveProvider {
        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> Result<CompletionResponse, ProviderError> {
            if let Some(poison) = &self.poison {
                if request.input.contains(poison.as_str()) {
                    return Err(ProviderError::Unavailable("poisoned".to_owned()));
                }
            }
            Ok(CompletionResponse {
                text: r#"{
                    "url": "https://hallucinated.example/other",
                    "title": "Model title",
                    "summary": "Model-written summary.",
                    "relevance_score": 0.85,
                    "key_points": ["model point"],
                    "source_type": "article"
                }"#
                .to_owned(),
                usage: UsageStats::default(),
                model: "mock".to_owned(),
            })
        }

        fn model_id(&self) -> &str {
            "mock/selective"
        }
    }

    fn invoker_for(poison: Option<&str>) -> Arc<StructuredInvoker> {
        let provider: Arc<dyn LlmProvider> = Arc::new(SelectiveProvider {
            poison: poison.map(str::to_owned),
        });
        Arc::new(StructuredInvoker::new(ModelRouter::for_testing(
            Arc::clone(&provider),
            provider,
        )))
    }

    fn source(url: &str) -> RawSource {
        RawSource {
            url: url.to_owned(),
            title: format!("Title for {url}"),
            content: "some source content ".repeat(30),
            word_count: 90,
            fetched_at: Utc::now().timestamp(),
        }
    }

    #[tokio::test]
    async fn test_summaries_are_count_preserving_and_url_traceable() {
        let invoker = invoker_for(None);
        let metrics = Arc::new(RunMetrics::new());
        let sources = vec![
            source("https://a.example/1"),
            source("https://a.example/2"),
            source("https://a.example/3"),
        ];

        let outcome = run(&invoker, &metrics, "topic", &sources, 2).await;
        assert!(!outcome.is_degraded());
        let summaries = outcome.into_value().expect("has value");
        assert_eq!(summaries.len(), sources.len());

        // The model hallucinated its own url; origin urls must win.
        let expected: HashSet<&str> = sources.iter().map(|s| s.url.as_str()).collect();
        let actual: HashSet<&str> = summaries.iter().map(|s| s.url.as_str()).collect();
        assert_eq!(actual, expected);
    }

    #[tokio::test]
    async fn test_one_failure_does_not_abort_the_others() {
        let invoker = invoker_for(Some("https://bad.example"));
        let metrics = Arc::new(RunMetrics::new());
        let sources = vec![
            source("https://ok.example/1"),
            source("https://bad.example"),
            source("https://ok.example/2"),
        ];

        let outcome = run(&invoker, &metrics, "topic", &sources, 4).await;
        assert!(outcome.is_degraded());
        let summaries = outcome.into_value().expect("has value");
        assert_eq!(summaries.len(), 3);

        let fallback = summaries
            .iter()
            .find(|s| s.url == "https://bad.example")
            .expect("fallback entry present");
        assert!((fallback.relevance_score - FALLBACK_RELEVANCE).abs() < f64::EPSILON);
        assert_eq!(fallback.source_type, "web page");
        assert_eq!(fallback.key_points.len(), 3);

        let live = summaries
            .iter()
            .find(|s| s.url == "https://ok.example/1")
            .expect("live entry present");
        assert!((live.relevance_score - 0.85).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_all_failures_still_count_preserving() {
        let invoker = invoker_for(Some("https://"));
        let metrics = Arc::new(RunMetrics::new());
        let sources = vec![source("https://a.example"), source("https://b.example")];

        let outcome = run(&invoker, &metrics, "topic", &sources, 1).await;
        assert!(outcome.is_degraded());
        let summaries = outcome.into_value().expect("has value");
        assert_eq!(summaries.len(), 2);
        for summary in &summaries {
            assert!((summary.relevance_score - FALLBACK_RELEVANCE).abs() < f64::EPSILON);
        }
    }

    #[tokio::test]
    async fn test_empty_input_is_fatal_guard() {
        let invoker = invoker_for(None);
        let metrics = Arc::new(RunMetrics::new());
        let outcome = run(&invoker, &metrics, "topic", &[], 4).await;
        assert_eq!(
            outcome,
            StageOutcome::Fatal {
                reason: NO_CONTENT_ERROR.to_owned()
            }
        );
    }

    #[test]
    fn test_fallback_tiers_are_distinct() {
        let src = source("https://x.example");
        let soft = fallback_summary(&src);
        let hard = error_summary(&src, "boom");

        assert!((soft.relevance_score - FALLBACK_RELEVANCE).abs() < f64::EPSILON);
        assert!((hard.relevance_score - ERROR_RELEVANCE).abs() < f64::EPSILON);
        assert_eq!(hard.key_points, vec!["Error processing source"]);
        assert!(hard.summary.contains("boom"));
        assert_ne!(soft.key_points, hard.key_points);
    }

    #[test]
    fn test_fallback_validates_against_schema_bounds() {
        use crate::types::Structured;
        let src = source("https://x.example");
        assert!(fallback_summary(&src).validate().is_ok());
        assert!(error_summary(&src, "e").validate().is_ok());
    }
}

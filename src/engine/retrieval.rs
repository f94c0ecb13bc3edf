//! Retrieval stage.
//!
//! Executes each planned query against the search collaborator and
//! normalizes the hits into [`RawSource`] records. This is the one stage
//! whose failure is pipeline-fatal: with zero usable sources there is
//! nothing to summarize, so the run must route to the error terminal.

use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use crate::search::{is_valid_source_url, SearchClient};
use crate::types::{RawSource, ResearchPlan};

use super::StageOutcome;

/// Hits at or below this word count carry too little text to summarize.
pub const MIN_SOURCE_WORDS: usize = 20;

/// Pipeline error when the plan is missing. Unreachable given the engine's
/// stage ordering; kept as a guard.
pub const NO_PLAN_ERROR: &str = "No research plan available";

/// Pipeline error when every query came back empty or filtered out.
pub const NO_CONTENT_ERROR: &str = "No content could be fetched from search results";

/// Run all planned queries and collect usable sources.
///
/// A query that errors is logged and skipped, never retried. A fixed pacing
/// delay separates consecutive queries to respect the search provider's
/// rate limits; its length is collaborator-negotiated config, not a
/// pipeline invariant.
pub async fn run(
    search: &dyn SearchClient,
    plan: Option<&ResearchPlan>,
    pacing: Duration,
) -> StageOutcome<Vec<RawSource>> {
    let Some(plan) = plan else {
        return StageOutcome::Fatal {
            reason: NO_PLAN_ERROR.to_owned(),
        };
    };

    let mut sources: Vec<RawSource> = Vec::new();
    for (idx, query) in plan.queries.iter().enumerate() {
        if idx > 0 && !pacing.is_zero() {
            tokio::time::sleep(pacing).await;
        }

        match search.search(query).await {
            Ok(hits) => {
                let before = sources.len();
                for hit in hits {
                    if let Some(source) = normalize_hit(&hit.url, &hit.title, &hit.content) {
                        sources.push(source);
                    }
                }
                info!(
                    query,
                    kept = sources.len().saturating_sub(before),
                    "search query processed"
                );
            }
            Err(e) => {
                warn!(query, error = %e, "search query failed, skipping");
            }
        }
    }

    if sources.is_empty() {
        return StageOutcome::Fatal {
            reason: NO_CONTENT_ERROR.to_owned(),
        };
    }

    info!(sources = sources.len(), "retrieval complete");
    StageOutcome::Ok(sources)
}

/// Turn one search hit into a [`RawSource`], or drop it.
///
/// Drops hits with unsafe/invalid urls and hits whose content is at or
/// below [`MIN_SOURCE_WORDS`] words.
fn normalize_hit(url: &str, title: &str, content: &str) -> Option<RawSource> {
    if !is_valid_source_url(url) {
        return None;
    }
    let word_count = content.split_whitespace().count();
    if word_count <= MIN_SOURCE_WORDS {
        return None;
    }
    let title = if title.trim().is_empty() {
        "Untitled source"
    } else {
        title.trim()
    };
    Some(RawSource {
        url: url.trim().to_owned(),
        title: title.to_owned(),
        content: content.to_owned(),
        word_count,
        fetched_at: Utc::now().timestamp(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::search::{SearchError, SearchHit};

    /// Scripted search client: one Vec of hits (or an error) per query.
    struct ScriptedSearch {
        responses: Mutex<Vec<Result<Vec<SearchHit>, SearchError>>>,
        queries_seen: Mutex<Vec<String>>,
    }

    impl ScriptedSearch {
        fn new(responses: Vec<Result<Vec<SearchHit>, SearchError>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                queries_seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SearchClient for ScriptedSearch {
        async fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError> {
            self.queries_seen
                .lock()
                .expect("lock")
                .push(query.to_owned());
            let mut responses = self.responses.lock().expect("lock");
            if responses.is_empty() {
                Ok(vec![])
            } else {
                responses.remove(0)
            }
        }
    }

    fn hit(url: &str, words: usize) -> SearchHit {
        SearchHit {
            url: url.to_owned(),
            title: "A title".to_owned(),
            content: "word ".repeat(words).trim_end().to_owned(),
        }
    }

    fn plan(queries: &[&str]) -> ResearchPlan {
        ResearchPlan {
            queries: queries.iter().map(|q| (*q).to_owned()).collect(),
            rationale: "test".to_owned(),
            expected_sources: 5,
            focus_areas: vec![],
        }
    }

    #[tokio::test]
    async fn test_retrieval_collects_across_queries() {
        let search = ScriptedSearch::new(vec![
            Ok(vec![hit("https://a.example/1", 40)]),
            Ok(vec![hit("https://b.example/2", 40), hit("https://b.example/3", 40)]),
        ]);
        let plan = plan(&["q1", "q2"]);

        let outcome = run(&search, Some(&plan), Duration::ZERO).await;
        let sources = outcome.into_value().expect("has sources");
        assert_eq!(sources.len(), 3);
        assert_eq!(
            *search.queries_seen.lock().expect("lock"),
            vec!["q1", "q2"]
        );
    }

    #[tokio::test]
    async fn test_retrieval_filters_thin_and_invalid_hits() {
        let search = ScriptedSearch::new(vec![Ok(vec![
            hit("https://ok.example", 40),
            hit("https://thin.example", 20), // exactly at threshold: dropped
            hit("javascript:alert(1)", 100),
            hit("ftp://files.example/x", 100),
        ])]);
        let plan = plan(&["q"]);

        let outcome = run(&search, Some(&plan), Duration::ZERO).await;
        let sources = outcome.into_value().expect("has sources");
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].url, "https://ok.example");
        assert_eq!(sources[0].word_count, 40);
    }

    #[tokio::test]
    async fn test_failed_query_is_skipped_not_fatal() {
        let search = ScriptedSearch::new(vec![
            Err(SearchError::Parse("bad payload".to_owned())),
            Ok(vec![hit("https://b.example", 40)]),
        ]);
        let plan = plan(&["q1", "q2"]);

        let outcome = run(&search, Some(&plan), Duration::ZERO).await;
        let sources = outcome.into_value().expect("second query still ran");
        assert_eq!(sources.len(), 1);
    }

    #[tokio::test]
    async fn test_zero_sources_is_fatal_with_documented_message() {
        let search = ScriptedSearch::new(vec![Ok(vec![]), Ok(vec![hit("data:x", 100)])]);
        let plan = plan(&["q1", "q2"]);

        let outcome = run(&search, Some(&plan), Duration::ZERO).await;
        assert_eq!(
            outcome,
            StageOutcome::Fatal {
                reason: NO_CONTENT_ERROR.to_owned()
            }
        );
    }

    #[tokio::test]
    async fn test_missing_plan_is_fatal() {
        let search = ScriptedSearch::new(vec![]);
        let outcome = run(&search, None, Duration::ZERO).await;
        assert_eq!(
            outcome,
            StageOutcome::Fatal {
                reason: NO_PLAN_ERROR.to_owned()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacing_delay_between_queries() {
        let search = ScriptedSearch::new(vec![
            Ok(vec![hit("https://a.example", 40)]),
            Ok(vec![hit("https://b.example", 40)]),
        ]);
        let plan = plan(&["q1", "q2"]);

        let started = tokio::time::Instant::now();
        let outcome = run(&search, Some(&plan), Duration::from_secs(1)).await;
        assert!(outcome.into_value().is_some());
        // One inter-query gap for two queries; virtual clock makes this exact.
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_normalize_defaults_empty_title() {
        let source = normalize_hit("https://x.example", "  ", &"w ".repeat(30))
            .expect("should normalize");
        assert_eq!(source.title, "Untitled source");
    }
}

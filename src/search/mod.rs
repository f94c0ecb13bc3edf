//! Search collaborator boundary.
//!
//! The pipeline only depends on the [`SearchClient`] trait; the concrete
//! [`tavily::TavilyClient`] talks to the Tavily REST API. Retrieval treats
//! a failed query as contributing zero sources, with no retries anywhere.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

pub mod tavily;

/// A single hit returned by the search collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Result url.
    pub url: String,
    /// Result title.
    #[serde(default)]
    pub title: String,
    /// Extracted text content for the result.
    #[serde(default)]
    pub content: String,
}

/// Errors returned by search clients.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    /// HTTP transport failure.
    #[error("search request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// Response did not match the expected wire shape.
    #[error("search response parse error: {0}")]
    Parse(String),
    /// Upstream search API responded with an error status.
    #[error("search API returned status {status}: {body}")]
    HttpStatus {
        /// HTTP status code.
        status: u16,
        /// Response body excerpt.
        body: String,
    },
    /// No API key configured for the search provider.
    #[error("search API key not configured")]
    MissingCredential,
}

/// Web search interface consumed by the retrieval stage.
///
/// Implementations must be `Send + Sync`; a single client is shared across
/// concurrent pipeline runs.
#[async_trait]
pub trait SearchClient: Send + Sync {
    /// Execute one query and return its hits.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError`] on API, network, or parse failure. The
    /// caller logs and skips the query; it does not retry.
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError>;
}

/// Check that a hit's url is safe to keep as a reference.
///
/// Accepts only http/https urls with a non-empty host. Rejects urls whose
/// scheme prefix is one of the known-dangerous ones even before parsing, so
/// a malformed `javascript:` pseudo-url never reaches the parser.
pub fn is_valid_source_url(raw: &str) -> bool {
    let trimmed = raw.trim();
    let lowered = trimmed.to_lowercase();
    for blocked in ["javascript:", "data:", "file:", "ftp:"] {
        if lowered.starts_with(blocked) {
            return false;
        }
    }

    match Url::parse(trimmed) {
        Ok(parsed) => {
            matches!(parsed.scheme(), "http" | "https")
                && parsed.host_str().is_some_and(|h| !h.is_empty())
        }
        Err(_) => false,
    }
}

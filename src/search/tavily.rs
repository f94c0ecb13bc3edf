//! Tavily search client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::SearchConfig;

use super::{SearchClient, SearchError, SearchHit};

const TAVILY_API_BASE: &str = "https://api.tavily.com/search";

/// Tavily search request body.
#[derive(Debug, Serialize)]
struct TavilyRequest<'a> {
    query: &'a str,
    max_results: u32,
    include_answer: bool,
}

/// Tavily search response body.
#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

/// One result entry in a Tavily response.
#[derive(Debug, Deserialize)]
struct TavilyResult {
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
}

/// HTTP client for the Tavily search API.
#[derive(Clone)]
pub struct TavilyClient {
    api_key: String,
    max_results: u32,
    base_url: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for TavilyClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TavilyClient")
            .field("api_key", &"__REDACTED__")
            .field("max_results", &self.max_results)
            .finish()
    }
}

impl TavilyClient {
    /// Build a client from the `[search]` config section.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError::MissingCredential`] when no API key is set.
    pub fn from_config(config: &SearchConfig) -> Result<Self, SearchError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or(SearchError::MissingCredential)?;
        Ok(Self {
            api_key,
            max_results: config.max_results_per_query,
            base_url: TAVILY_API_BASE.to_owned(),
            client: reqwest::Client::new(),
        })
    }

    /// Override the API endpoint, for tests against a local server.
    #[doc(hidden)]
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }
}

#[async_trait]
impl SearchClient for TavilyClient {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError> {
        let body = TavilyRequest {
            query,
            max_results: self.max_results,
            include_answer: false,
        };

        let response = self
            .client
            .post(&self.base_url)
            .header("authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let payload = response.text().await?;
        if !status.is_success() {
            return Err(SearchError::HttpStatus {
                status: status.as_u16(),
                body: payload.chars().take(256).collect(),
            });
        }

        let parsed: TavilyResponse =
            serde_json::from_str(&payload).map_err(|e| SearchError::Parse(e.to_string()))?;

        Ok(parsed
            .results
            .into_iter()
            .map(|r| SearchHit {
                url: r.url,
                title: r.title,
                content: r.content,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_requires_key() {
        let config = SearchConfig::default();
        assert!(matches!(
            TavilyClient::from_config(&config),
            Err(SearchError::MissingCredential)
        ));
    }

    #[test]
    fn test_response_parses_with_missing_fields() {
        let body = r#"{"results": [{"url": "https://a.example"}]}"#;
        let parsed: TavilyResponse = serde_json::from_str(body).expect("should parse");
        assert_eq!(parsed.results.len(), 1);
        assert_eq!(parsed.results[0].url, "https://a.example");
        assert!(parsed.results[0].title.is_empty());
    }

    #[test]
    fn test_response_parses_without_results_key() {
        let parsed: TavilyResponse = serde_json::from_str("{}").expect("should parse");
        assert!(parsed.results.is_empty());
    }

    #[test]
    fn test_debug_redacts_key() {
        let config = SearchConfig {
            api_key: Some("tvly-secret".to_owned()),
            ..SearchConfig::default()
        };
        let client = TavilyClient::from_config(&config).expect("should build");
        assert!(!format!("{client:?}").contains("tvly-secret"));
    }
}

//! Ollama provider implementation using the `/api/generate` API.
//!
//! Used for local/offline runs. Token counts come from Ollama's
//! `prompt_eval_count` / `eval_count` fields when present.

use serde::{Deserialize, Serialize};

use super::{
    check_http_response, CompletionRequest, CompletionResponse, LlmProvider, ProviderError,
    UsageStats,
};

/// Ollama generate request body.
#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    stream: bool,
}

/// Ollama generate response body.
#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
    model: String,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
}

/// Ollama HTTP provider.
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    model_spec: String,
    model_name: String,
    base_url: String,
    client: reqwest::Client,
}

impl OllamaProvider {
    /// Create a new Ollama provider instance.
    pub fn new(model_spec: String, model_name: String, base_url: String) -> Self {
        Self {
            model_spec,
            model_name,
            base_url,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait::async_trait]
impl LlmProvider for OllamaProvider {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = OllamaRequest {
            model: self.model_name.clone(),
            prompt: request.input,
            system: request.system,
            stream: false,
        };

        let response = self.client.post(&url).json(&body).send().await?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Err(ProviderError::Unavailable(format!(
                "model '{}' not found on {}",
                self.model_name, self.base_url
            )));
        }

        let payload = check_http_response(response).await?;
        let resp: OllamaResponse =
            serde_json::from_str(&payload).map_err(|e| ProviderError::Parse(e.to_string()))?;

        Ok(CompletionResponse {
            text: resp.response,
            usage: UsageStats {
                input_tokens: resp.prompt_eval_count.unwrap_or_default(),
                output_tokens: resp.eval_count.unwrap_or_default(),
            },
            model: resp.model,
        })
    }

    fn model_id(&self) -> &str {
        &self.model_spec
    }
}

//! Model router resolving the two pipeline tiers to provider instances.

use std::sync::Arc;

use crate::config::ModelsConfig;

use super::anthropic::AnthropicProvider;
use super::ollama::OllamaProvider;
use super::{parse_model_spec, LlmProvider, ModelTier};

/// Provider routing errors.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// Model spec is not in `<provider>/<model>` format.
    #[error("invalid model spec '{spec}', expected '<provider>/<model>'")]
    InvalidModelSpec {
        /// Invalid raw spec.
        spec: String,
    },
    /// Unsupported provider type in spec prefix.
    #[error("unsupported provider '{provider}'")]
    UnsupportedProvider {
        /// Unsupported provider prefix.
        provider: String,
    },
    /// Required API credential missing for selected provider.
    #[error("missing credential for provider '{provider}': {key}")]
    MissingCredential {
        /// Provider name.
        provider: String,
        /// Missing credential key.
        key: String,
    },
}

/// Resolves [`ModelTier`] to a concrete provider instance.
///
/// Both tiers are constructed once at startup and shared across runs; the
/// providers themselves are stateless apart from their HTTP clients.
#[derive(Clone)]
pub struct ModelRouter {
    primary: Arc<dyn LlmProvider>,
    secondary: Arc<dyn LlmProvider>,
}

impl ModelRouter {
    /// Build a router from the `[models]` config section.
    ///
    /// # Errors
    ///
    /// Returns an error if either tier's spec is malformed, names an
    /// unsupported provider, or lacks a required credential.
    pub fn from_config(models: &ModelsConfig) -> anyhow::Result<Self> {
        Ok(Self {
            primary: instantiate_provider(&models.primary, models)?,
            secondary: instantiate_provider(&models.secondary, models)?,
        })
    }

    /// Create a router backed by explicit providers, for tests.
    #[doc(hidden)]
    pub fn for_testing(primary: Arc<dyn LlmProvider>, secondary: Arc<dyn LlmProvider>) -> Self {
        Self { primary, secondary }
    }

    /// Resolve the provider serving the given tier.
    pub fn resolve(&self, tier: ModelTier) -> Arc<dyn LlmProvider> {
        match tier {
            ModelTier::Primary => Arc::clone(&self.primary),
            ModelTier::Secondary => Arc::clone(&self.secondary),
        }
    }
}

fn instantiate_provider(
    spec: &str,
    models: &ModelsConfig,
) -> anyhow::Result<Arc<dyn LlmProvider>> {
    let (provider, model) =
        parse_model_spec(spec).map_err(|_| RouterError::InvalidModelSpec {
            spec: spec.to_owned(),
        })?;

    match provider {
        "anthropic" => {
            let api_key = models
                .anthropic
                .as_ref()
                .map(|c| c.api_key.clone())
                .filter(|k| !k.is_empty())
                .ok_or_else(|| RouterError::MissingCredential {
                    provider: provider.to_owned(),
                    key: "STRAYLIGHT_ANTHROPIC_API_KEY".to_owned(),
                })?;
            Ok(Arc::new(AnthropicProvider::new(
                spec.to_owned(),
                model.to_owned(),
                api_key,
            )))
        }
        "ollama" => Ok(Arc::new(OllamaProvider::new(
            spec.to_owned(),
            model.to_owned(),
            models.ollama.base_url.clone(),
        ))),
        other => Err(RouterError::UnsupportedProvider {
            provider: other.to_owned(),
        }
        .into()),
    }
}

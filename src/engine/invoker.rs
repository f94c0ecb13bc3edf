//! Structured-output invoker — mediates all model communication.
//!
//! Wraps a tier-routed completion call with a target result shape: the
//! type's JSON Schema is embedded in the system prompt, the response text
//! is searched for a JSON object (models love fencing and preambles), and
//! the parsed value is range-validated before it is handed back.
//!
//! Every failure mode collapses into [`InvocationError`]. Stages treat it
//! as recoverable and fall through to their deterministic fallback; the
//! invoker itself never touches pipeline state.

use std::time::Instant;

use regex::Regex;
use thiserror::Error;
use tracing::debug;

use crate::providers::router::ModelRouter;
use crate::providers::{CompletionRequest, ModelTier, ProviderError};
use crate::types::Structured;

use super::metrics::RunMetrics;

/// Response token ceiling for structured calls.
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Errors from a structured model invocation.
///
/// All variants are recoverable from the pipeline's point of view: the
/// calling stage substitutes its local fallback value.
#[derive(Debug, Error)]
pub enum InvocationError {
    /// The underlying provider call failed.
    #[error("provider call failed: {0}")]
    Provider(#[from] ProviderError),
    /// The response contained no JSON object at all.
    #[error("no JSON object found in model response")]
    NoJson,
    /// A JSON object was found but did not deserialize into the target.
    #[error("response did not match the {kind} schema: {reason}")]
    Shape {
        /// Target schema name.
        kind: &'static str,
        /// Deserializer message.
        reason: String,
    },
    /// The value deserialized but failed range validation.
    #[error("{kind} failed validation: {reason}")]
    Validation {
        /// Target schema name.
        kind: &'static str,
        /// Validation message.
        reason: String,
    },
}

/// Tier-routed structured-output caller shared by all stages.
pub struct StructuredInvoker {
    router: ModelRouter,
}

impl StructuredInvoker {
    /// Wrap a model router.
    pub fn new(router: ModelRouter) -> Self {
        Self { router }
    }

    /// Model spec string serving the given tier, for observability tags.
    pub fn model_spec(&self, tier: ModelTier) -> String {
        self.router.resolve(tier).model_id().to_owned()
    }

    /// Request a `T` from the given tier.
    ///
    /// `instructions` frame the task; `input` is the document the model
    /// works over. Token usage is recorded even when the response later
    /// fails to parse; the tokens were still spent.
    ///
    /// # Errors
    ///
    /// Returns [`InvocationError`] on provider failure, missing JSON,
    /// deserialization failure, or validation failure.
    pub async fn invoke<T: Structured>(
        &self,
        tier: ModelTier,
        instructions: &str,
        input: &str,
        metrics: &RunMetrics,
    ) -> Result<T, InvocationError> {
        let schema = schemars::gen::SchemaGenerator::default().into_root_schema_for::<T>();
        let schema_json =
            serde_json::to_string_pretty(&schema).unwrap_or_else(|_| "{}".to_owned());

        let system = format!(
            "{instructions}\n\n\
             Respond with a single JSON object for `{kind}` conforming to this JSON Schema:\n\
             {schema_json}\n\n\
             Output only the JSON object. No prose before or after it.",
            kind = T::KIND,
        );

        let provider = self.router.resolve(tier);
        let started = Instant::now();
        let response = provider
            .complete(CompletionRequest {
                system: Some(system),
                input: input.to_owned(),
                max_tokens: Some(DEFAULT_MAX_TOKENS),
            })
            .await?;

        metrics.record_usage(tier, response.usage);
        debug!(
            kind = T::KIND,
            tier = %tier,
            model = %response.model,
            elapsed = ?started.elapsed(),
            "structured invocation returned"
        );

        let json = extract_json(&response.text).ok_or(InvocationError::NoJson)?;
        let value: T = serde_json::from_str(&json).map_err(|e| InvocationError::Shape {
            kind: T::KIND,
            reason: e.to_string(),
        })?;
        value
            .validate()
            .map_err(|reason| InvocationError::Validation {
                kind: T::KIND,
                reason,
            })?;
        Ok(value)
    }
}

/// Extract a JSON object from model output.
///
/// Tolerates three shapes, tried in order: the whole trimmed response is
/// the object; the object sits inside a fenced ```json block; the object
/// is embedded in prose (found by brace matching).
fn extract_json(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.starts_with('{') && serde_json::from_str::<serde_json::Value>(trimmed).is_ok() {
        return Some(trimmed.to_owned());
    }

    if let Ok(re) = Regex::new(r"```(?:json)?\s*\n?([\s\S]*?)\n?```") {
        for cap in re.captures_iter(s) {
            if let Some(candidate) = cap.get(1) {
                let candidate = candidate.as_str().trim();
                if serde_json::from_str::<serde_json::Value>(candidate).is_ok() {
                    return Some(candidate.to_owned());
                }
            }
        }
    }

    scan_braces(s)
}

/// Find the first balanced `{...}` span that parses as JSON.
fn scan_braces(s: &str) -> Option<String> {
    let start = s.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in s[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth = depth.saturating_add(1),
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    let end = start.saturating_add(i).saturating_add(c.len_utf8());
                    let candidate = &s[start..end];
                    if serde_json::from_str::<serde_json::Value>(candidate).is_ok() {
                        return Some(candidate.to_owned());
                    }
                    return None;
                }
            }
            _ => {}
        }
    }
    None
}

//! Configuration loading and management.
//!
//! Loads configuration from `./straylight.toml` (or `$STRAYLIGHT_CONFIG`).
//! Environment variables override file values; file values override defaults.
//!
//! Precedence: env vars > config file > defaults.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

// ── Top-level config ────────────────────────────────────────────

/// Top-level configuration loaded from TOML.
///
/// Path: `./straylight.toml` or `$STRAYLIGHT_CONFIG`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StraylightConfig {
    /// Process-level settings (`[runtime]`).
    pub runtime: RuntimeConfig,
    /// Model tier specs and provider credentials (`[models]`).
    pub models: ModelsConfig,
    /// Search collaborator settings (`[search]`).
    pub search: SearchConfig,
    /// History store settings (`[storage]`).
    pub storage: StorageConfig,
    /// Pipeline execution settings (`[pipeline]`).
    pub pipeline: PipelineConfig,
}

impl StraylightConfig {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// If the config file does not exist, defaults are used.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_file()?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from TOML file only, no env overrides.
    fn load_from_file() -> Result<Self> {
        let path = Self::config_path_with(|key| std::env::var(key).ok());
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                let config: StraylightConfig =
                    toml::from_str(&contents).context("failed to parse config TOML")?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no config file found, using defaults");
                Ok(StraylightConfig::default())
            }
            Err(e) => Err(anyhow::anyhow!("failed to read config file: {e}")),
        }
    }

    /// Resolve config path using a custom env resolver (for testing).
    fn config_path_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
        env("STRAYLIGHT_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("straylight.toml"))
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function for testability.
    fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        // Runtime.
        if let Some(v) = env("STRAYLIGHT_LOG_LEVEL") {
            self.runtime.log_level = v;
        }
        if let Some(v) = env("STRAYLIGHT_LOGS_DIR") {
            self.runtime.logs_dir = v;
        }

        // Models.
        if let Some(v) = env("STRAYLIGHT_PRIMARY_MODEL") {
            self.models.primary = v;
        }
        if let Some(v) = env("STRAYLIGHT_SECONDARY_MODEL") {
            self.models.secondary = v;
        }
        if let Some(key) = env("STRAYLIGHT_ANTHROPIC_API_KEY") {
            self.models.anthropic = Some(AnthropicConfig { api_key: key });
        }
        if let Some(v) = env("STRAYLIGHT_OLLAMA_URL") {
            self.models.ollama.base_url = v;
        }

        // Search.
        if let Some(key) = env("STRAYLIGHT_TAVILY_API_KEY") {
            self.search.api_key = Some(key);
        }
        if let Some(v) = env("STRAYLIGHT_QUERY_PACING_MS") {
            match v.parse() {
                Ok(n) => self.search.query_pacing_ms = n,
                Err(_) => tracing::warn!(
                    var = "STRAYLIGHT_QUERY_PACING_MS",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }

        // Storage.
        if let Some(v) = env("STRAYLIGHT_DB_PATH") {
            self.storage.db_path = v;
        }

        // Pipeline.
        if let Some(v) = env("STRAYLIGHT_RUN_TIMEOUT_SECS") {
            match v.parse() {
                Ok(n) => self.pipeline.run_timeout_seconds = n,
                Err(_) => tracing::warn!(
                    var = "STRAYLIGHT_RUN_TIMEOUT_SECS",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
    }

    /// Parse a TOML string into config (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error on malformed TOML.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: StraylightConfig =
            toml::from_str(toml_str).context("failed to parse config TOML")?;
        Ok(config)
    }
}

// ── Runtime config ──────────────────────────────────────────────

/// Process-level settings (`[runtime]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Tracing log level filter.
    pub log_level: String,
    /// Directory for rotated JSON log files.
    pub logs_dir: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            logs_dir: "logs".to_string(),
        }
    }
}

// ── Models config ───────────────────────────────────────────────

/// Model tier specs and provider settings (`[models]`).
///
/// Tier specs use `<provider>/<model>` format, e.g.
/// `"anthropic/claude-sonnet-4-20250514"` or `"ollama/llama3"`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Spec for the primary (reasoning) tier.
    pub primary: String,
    /// Spec for the secondary (fast/cheap) tier.
    pub secondary: String,
    /// Anthropic credentials; required when a tier uses `anthropic/`.
    pub anthropic: Option<AnthropicConfig>,
    /// Ollama settings; used when a tier uses `ollama/`.
    pub ollama: OllamaConfig,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            primary: "ollama/llama3".to_string(),
            secondary: "ollama/llama3".to_string(),
            anthropic: None,
            ollama: OllamaConfig::default(),
        }
    }
}

/// Anthropic provider credentials.
#[derive(Clone, Deserialize)]
pub struct AnthropicConfig {
    /// API key; usually injected via `STRAYLIGHT_ANTHROPIC_API_KEY`.
    pub api_key: String,
}

impl std::fmt::Debug for AnthropicConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicConfig")
            .field("api_key", &"__REDACTED__")
            .finish()
    }
}

/// Ollama provider settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    /// Ollama base URL.
    pub base_url: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
        }
    }
}

// ── Search config ───────────────────────────────────────────────

/// Search collaborator settings (`[search]`).
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Tavily API key; usually injected via `STRAYLIGHT_TAVILY_API_KEY`.
    pub api_key: Option<String>,
    /// Maximum hits requested per query.
    pub max_results_per_query: u32,
    /// Delay between consecutive queries, to respect provider rate limits.
    pub query_pacing_ms: u64,
}

impl std::fmt::Debug for SearchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "__REDACTED__"))
            .field("max_results_per_query", &self.max_results_per_query)
            .field("query_pacing_ms", &self.query_pacing_ms)
            .finish()
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            max_results_per_query: 5,
            query_pacing_ms: 1000,
        }
    }
}

// ── Storage config ──────────────────────────────────────────────

/// History store settings (`[storage]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the sqlite history database.
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: "research_history.db".to_string(),
        }
    }
}

// ── Pipeline config ─────────────────────────────────────────────

/// Pipeline execution settings (`[pipeline]`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Worker pool bound for per-source summarization fan-out.
    pub max_concurrent_summaries: usize,
    /// Wall-clock budget for a whole run, after which the run resolves to
    /// an error-terminal brief.
    pub run_timeout_seconds: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_summaries: 4,
            run_timeout_seconds: 300,
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────

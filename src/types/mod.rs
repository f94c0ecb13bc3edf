//! Wire data model for the research pipeline.
//!
//! Every type here crosses a collaborator boundary: they are produced by
//! structured LLM calls, persisted to the history store, or rendered to the
//! user. All of them round-trip through JSON without loss.
//!
//! Types that serve as structured-output targets implement [`Structured`],
//! which pairs a JSON Schema (embedded in the prompt) with a post-parse
//! validation pass. Parsing alone is not enough: a response can deserialize
//! cleanly and still violate a range bound the model was asked to respect.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Hard lower bound on a plan's expected source count.
pub const EXPECTED_SOURCES_MIN: u32 = 1;

/// Hard upper bound on a plan's expected source count, independent of the
/// requested depth.
pub const EXPECTED_SOURCES_MAX: u32 = 15;

/// Schema-level floor for the executive summary, in characters.
///
/// Deliberately independent of [`EXECUTIVE_SUMMARY_TARGET_CHARS`]: the
/// prompt asks for more, the schema accepts less.
pub const EXECUTIVE_SUMMARY_MIN_CHARS: usize = 50;

/// Length the synthesis prompt asks the model to aim for. Not validated.
pub const EXECUTIVE_SUMMARY_TARGET_CHARS: usize = 200;

// ---------------------------------------------------------------------------
// Structured-output contract
// ---------------------------------------------------------------------------

/// A type that can be requested from a model as structured output.
///
/// The invoker embeds the type's JSON Schema in the prompt, parses the
/// response into `Self`, then runs [`Structured::validate`]. A validation
/// failure is treated the same as a parse failure: the stage falls back.
pub trait Structured: DeserializeOwned + JsonSchema {
    /// Short name used in prompts and log fields (e.g. `"research_plan"`).
    const KIND: &'static str;

    /// Check range bounds and structural requirements the schema alone
    /// cannot express. Returns a human-readable reason on failure.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// How much ground a research run should cover.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum ResearchDepth {
    /// Few sources, quick turnaround.
    Shallow,
    /// Balanced coverage.
    #[default]
    Moderate,
    /// Broad sweep across many sources.
    Deep,
}

impl ResearchDepth {
    /// Source count used when planning falls back to the templated plan.
    pub fn fallback_source_count(self) -> u32 {
        match self {
            Self::Shallow => 3,
            Self::Moderate => 5,
            Self::Deep => 8,
        }
    }

    /// The sqlite-stored string representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Shallow => "shallow",
            Self::Moderate => "moderate",
            Self::Deep => "deep",
        }
    }
}

impl std::fmt::Display for ResearchDepth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResearchDepth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shallow" => Ok(Self::Shallow),
            "moderate" => Ok(Self::Moderate),
            "deep" => Ok(Self::Deep),
            other => Err(format!(
                "unknown depth '{other}', expected shallow|moderate|deep"
            )),
        }
    }
}

/// A request to generate a research brief.
///
/// Echoed into the history store alongside the brief it produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BriefRequest {
    /// The research topic.
    pub topic: String,
    /// Identifier of the requesting user.
    pub user_id: String,
    /// Requested coverage depth.
    #[serde(default)]
    pub depth: ResearchDepth,
    /// Whether this builds on the user's earlier briefs.
    #[serde(default)]
    pub follow_up: bool,
    /// Free-text constraints or emphasis from the user.
    #[serde(default)]
    pub additional_context: Option<String>,
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// The structured plan a research run executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ResearchPlan {
    /// Search queries to execute, in order. Never empty.
    pub queries: Vec<String>,
    /// Why these queries were chosen.
    pub rationale: String,
    /// How many usable sources the plan expects to yield.
    pub expected_sources: u32,
    /// Key angles the research should cover.
    pub focus_areas: Vec<String>,
}

impl Structured for ResearchPlan {
    const KIND: &'static str = "research_plan";

    fn validate(&self) -> Result<(), String> {
        if self.queries.is_empty() {
            return Err("plan contains no queries".to_owned());
        }
        if !(EXPECTED_SOURCES_MIN..=EXPECTED_SOURCES_MAX).contains(&self.expected_sources) {
            return Err(format!(
                "expected_sources {} outside [{EXPECTED_SOURCES_MIN}, {EXPECTED_SOURCES_MAX}]",
                self.expected_sources
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// A document fetched by the retrieval collaborator.
///
/// Opaque input to the pipeline: only retrieval constructs these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSource {
    /// Where the content came from.
    pub url: String,
    /// Source title as reported by search.
    pub title: String,
    /// Extracted text content.
    pub content: String,
    /// Whitespace-delimited word count of `content`.
    pub word_count: usize,
    /// Unix timestamp (seconds) of the fetch.
    pub fetched_at: i64,
}

/// A condensed, scored summary of a single source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SourceSummary {
    /// Origin url, preserved for traceability back to the [`RawSource`].
    pub url: String,
    /// Source title.
    pub title: String,
    /// Summary of the content relevant to the topic.
    pub summary: String,
    /// Relevance to the topic, in [0.0, 1.0].
    pub relevance_score: f64,
    /// Key points extracted from the source.
    pub key_points: Vec<String>,
    /// Kind of source (article, paper, report, "web page", ...).
    pub source_type: String,
    /// Publication date if the source carries one.
    #[serde(default)]
    pub publication_date: Option<String>,
    /// Author or publishing organization if known.
    #[serde(default)]
    pub author: Option<String>,
}

impl Structured for SourceSummary {
    const KIND: &'static str = "source_summary";

    fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.relevance_score) {
            return Err(format!(
                "relevance_score {} outside [0.0, 1.0]",
                self.relevance_score
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Continuity
// ---------------------------------------------------------------------------

/// Digest of a user's prior research, built for follow-up requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct ContinuitySummary {
    /// Topics of previous briefs.
    pub previous_topics: Vec<String>,
    /// Findings aggregated from previous briefs' key insights.
    pub key_findings: Vec<String>,
    /// Inferred user preferences (freeform keys and values).
    #[serde(default)]
    pub preferences: HashMap<String, String>,
    /// How the new request relates to earlier work.
    pub continuity_notes: String,
}

impl Structured for ContinuitySummary {
    const KIND: &'static str = "continuity_summary";
}

// ---------------------------------------------------------------------------
// Brief
// ---------------------------------------------------------------------------

/// The final, compiled research brief handed back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FinalBrief {
    /// The original research topic.
    pub topic: String,
    /// High-level overview of the findings.
    pub executive_summary: String,
    /// Detailed synthesis across all sources.
    pub synthesis: String,
    /// Main conclusions and implications.
    pub key_insights: Vec<String>,
    /// All summarized sources backing the brief.
    pub references: Vec<SourceSummary>,
    /// Continuity digest that informed this brief, when one was used.
    #[serde(default)]
    pub context_used: Option<ContinuitySummary>,
    /// Freeform generation metadata (source counts, error markers, ...).
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// When the brief was generated.
    #[serde(default = "Utc::now")]
    pub generated_at: DateTime<Utc>,
}

impl FinalBrief {
    /// Whether this brief was produced by the error-terminal path.
    pub fn is_degraded(&self) -> bool {
        self.metadata.contains_key("error")
    }
}

impl Structured for FinalBrief {
    const KIND: &'static str = "final_brief";

    fn validate(&self) -> Result<(), String> {
        if self.executive_summary.chars().count() < EXECUTIVE_SUMMARY_MIN_CHARS {
            return Err(format!(
                "executive_summary shorter than {EXECUTIVE_SUMMARY_MIN_CHARS} characters"
            ));
        }
        Ok(())
    }
}

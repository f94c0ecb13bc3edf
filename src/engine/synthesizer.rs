//! Synthesis stage.
//!
//! Combines all source summaries (and the continuity digest, if any) into
//! the final brief on the primary tier. The fallback path is a pure
//! function of the summaries: key points are partitioned into comparison,
//! data, and trend themes by literal keyword matching, and the brief's
//! prose is composed from the non-empty buckets.

use std::collections::HashMap;

use chrono::Utc;
use tracing::{info, warn};

use crate::providers::ModelTier;
use crate::types::{
    FinalBrief, SourceSummary, EXECUTIVE_SUMMARY_TARGET_CHARS,
};

use super::invoker::StructuredInvoker;
use super::metrics::RunMetrics;
use super::planner::continuity_digest;
use super::state::PipelineState;
use super::StageOutcome;

/// Comparison-flavored keywords for the fallback theme partition.
const COMPARISON_KEYWORDS: &[&str] = &["compare", "versus", "vs", "than", "while", "whereas"];

/// Data-flavored keywords, including ordinals.
const DATA_KEYWORDS: &[&str] = &[
    "%", "percent", "million", "billion", "number", "rank", "top", "first", "second", "third",
];

/// Trend-flavored keywords.
const TREND_KEYWORDS: &[&str] = &[
    "trend", "growth", "increase", "decrease", "rise", "fall", "emerging", "growing",
];

/// Fixed closing sentence for the fallback synthesis.
const STRATEGIC_CLOSER: &str = "Strategic implications: these findings should inform \
prioritization, investment, and further investigation in this area.";

/// Points quoted per theme section in the fallback prose.
const POINTS_PER_THEME: usize = 3;

/// Build the final brief from the summaries.
///
/// Never fatal: a failed or malformed model response is replaced by the
/// deterministic thematic aggregation.
pub async fn run(
    invoker: &StructuredInvoker,
    state: &PipelineState,
    metrics: &RunMetrics,
) -> StageOutcome<FinalBrief> {
    let summaries: &[SourceSummary] = state.summaries.as_deref().unwrap_or_default();

    let instructions = format!(
        "You are an expert research analyst. Synthesize multiple sources into \
         a comprehensive research brief.\n\n\
         Structure your response with:\n\
         1. Executive summary: a high-level overview of at least \
         {EXECUTIVE_SUMMARY_TARGET_CHARS} characters\n\
         2. Synthesis: organized analysis across all sources\n\
         3. Key insights: at least 5 main conclusions\n\
         4. References: every source provided\n\n\
         Be thorough, objective, and well-organized."
    );

    let mut input = format!("Research topic: {}\n\n", state.topic);
    if let Some(continuity) = &state.continuity {
        input.push_str(&format!(
            "Previous research context:\n{}\n\n",
            continuity_digest(continuity)
        ));
    }
    input.push_str("Source summaries:\n");
    input.push_str(&serialize_summaries(summaries));
    input.push_str("\nCreate a comprehensive research brief synthesizing all sources.");

    match invoker
        .invoke::<FinalBrief>(ModelTier::Primary, &instructions, &input, metrics)
        .await
    {
        Ok(brief) => {
            info!(
                references = brief.references.len(),
                insights = brief.key_insights.len(),
                "synthesis produced final brief"
            );
            StageOutcome::Ok(finish_brief(brief, state, summaries))
        }
        Err(e) => {
            warn!(error = %e, "synthesis fell back to thematic aggregation");
            StageOutcome::Degraded {
                value: fallback_brief(state, summaries),
                reason: e.to_string(),
            }
        }
    }
}

/// Serialized representation of the summaries fed to the model.
fn serialize_summaries(summaries: &[SourceSummary]) -> String {
    summaries
        .iter()
        .enumerate()
        .map(|(i, s)| {
            format!(
                "Source {n}: {title}\nURL: {url}\nSummary: {summary}\n\
                 Relevance: {relevance}\nKey Points: {points}\nType: {kind}\n\
                 Author: {author}\nDate: {date}\n",
                n = i.saturating_add(1),
                title = s.title,
                url = s.url,
                summary = s.summary,
                relevance = s.relevance_score,
                points = s.key_points.join(", "),
                kind = s.source_type,
                author = s.author.as_deref().unwrap_or("unknown"),
                date = s.publication_date.as_deref().unwrap_or("unknown"),
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Normalize a modeled brief: the origin topic, continuity digest, and
/// reference list are authoritative pipeline state, not model output.
fn finish_brief(
    mut brief: FinalBrief,
    state: &PipelineState,
    summaries: &[SourceSummary],
) -> FinalBrief {
    if brief.topic.trim().is_empty() {
        brief.topic = state.topic.clone();
    }
    if brief.references.is_empty() {
        brief.references = summaries.to_vec();
    }
    if brief.context_used.is_none() {
        brief.context_used = state.continuity.clone();
    }
    brief
        .metadata
        .insert("source_count".to_owned(), serde_json::json!(summaries.len()));
    brief
}

/// Theme partition of all key points across the summaries.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct ThemeBuckets {
    /// Points with comparative framing.
    pub comparison: Vec<String>,
    /// Points carrying figures or rankings.
    pub data: Vec<String>,
    /// Points describing movement over time.
    pub trend: Vec<String>,
}

/// Partition key points by literal keyword matching.
///
/// A point can land in more than one bucket; points matching nothing are
/// dropped from the themed prose but still reachable via references.
pub(crate) fn classify_points(summaries: &[SourceSummary]) -> ThemeBuckets {
    let mut buckets = ThemeBuckets::default();
    for summary in summaries {
        for point in &summary.key_points {
            let lowered = point.to_lowercase();
            if COMPARISON_KEYWORDS.iter().any(|k| lowered.contains(k)) {
                buckets.comparison.push(point.clone());
            }
            if DATA_KEYWORDS.iter().any(|k| lowered.contains(k)) {
                buckets.data.push(point.clone());
            }
            if TREND_KEYWORDS.iter().any(|k| lowered.contains(k)) {
                buckets.trend.push(point.clone());
            }
        }
    }
    buckets
}

/// Deterministic brief aggregating themes across the summaries.
fn fallback_brief(state: &PipelineState, summaries: &[SourceSummary]) -> FinalBrief {
    let buckets = classify_points(summaries);

    let executive_summary = format!(
        "Research brief for {topic}, compiled from {n} sources. The collected \
         material yielded {cmp} comparative findings, {data} quantitative \
         observations, and {trend} trend signals, synthesized below together \
         with the full reference list.",
        topic = state.topic,
        n = summaries.len(),
        cmp = buckets.comparison.len(),
        data = buckets.data.len(),
        trend = buckets.trend.len(),
    );

    let mut sections: Vec<String> = Vec::new();
    if !buckets.comparison.is_empty() {
        sections.push(theme_section("Comparative analysis", &buckets.comparison));
    }
    if !buckets.data.is_empty() {
        sections.push(theme_section("Quantitative findings", &buckets.data));
    }
    if !buckets.trend.is_empty() {
        sections.push(theme_section("Trends", &buckets.trend));
    }
    if sections.is_empty() {
        sections.push(format!(
            "The {} collected sources cover {} from several angles; see the \
             references for their individual key points.",
            summaries.len(),
            state.topic,
        ));
    }
    sections.push(STRATEGIC_CLOSER.to_owned());
    let synthesis = sections.join("\n\n");

    let mut key_insights: Vec<String> = Vec::new();
    for bucket in [&buckets.comparison, &buckets.data, &buckets.trend] {
        if let Some(point) = bucket.first() {
            key_insights.push(point.clone());
        }
    }
    key_insights.push(format!(
        "Analysis drew on {} summarized sources",
        summaries.len()
    ));

    let mut metadata = HashMap::new();
    metadata.insert("source_count".to_owned(), serde_json::json!(summaries.len()));

    FinalBrief {
        topic: state.topic.clone(),
        executive_summary,
        synthesis,
        key_insights,
        references: summaries.to_vec(),
        context_used: state.continuity.clone(),
        metadata,
        generated_at: Utc::now(),
    }
}

fn theme_section(heading: &str, points: &[String]) -> String {
    let quoted: Vec<&str> = points
        .iter()
        .take(POINTS_PER_THEME)
        .map(String::as_str)
        .collect();
    format!("{heading}: {}.", quoted.join("; "))
}

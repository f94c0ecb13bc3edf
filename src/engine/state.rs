//! Pipeline state threaded through every stage.

use std::collections::HashMap;

use crate::types::{
    BriefRequest, ContinuitySummary, FinalBrief, RawSource, ResearchDepth, ResearchPlan,
    SourceSummary,
};

/// The single mutable record a run carries from stage to stage.
///
/// Created once per request, owned exclusively by the engine for the
/// duration of the run, and dropped when the final brief is handed back.
/// No stage retains a reference afterwards.
///
/// `history` is canonically ordered oldest-first (most recent last); every
/// "last N" slice takes from the end via [`PipelineState::recent_history`].
#[derive(Debug, Clone)]
pub struct PipelineState {
    /// The research topic. Never empty.
    pub topic: String,
    /// Identifier of the requesting user.
    pub user_id: String,
    /// Requested coverage depth.
    pub depth: ResearchDepth,
    /// Whether this request builds on the user's earlier briefs.
    pub follow_up: bool,
    /// Free-text constraints from the user, echoed into persistence.
    pub additional_context: Option<String>,
    /// Prior briefs for this user, oldest first.
    pub history: Vec<FinalBrief>,
    /// Continuity digest produced by context recall, when routed there.
    pub continuity: Option<ContinuitySummary>,
    /// The research plan, once planning has run.
    pub plan: Option<ResearchPlan>,
    /// Retrieved source documents.
    pub sources: Option<Vec<RawSource>>,
    /// Per-source summaries, one per retrieved source.
    pub summaries: Option<Vec<SourceSummary>>,
    /// The terminal brief.
    pub final_brief: Option<FinalBrief>,
    /// Pipeline error. Set only by retrieval or a violated precondition;
    /// once set it is never cleared.
    pub error: Option<String>,
    /// Execution metadata (trace id, start time, provider tag). Read by
    /// observability only; routing never consults it.
    pub metadata: HashMap<String, serde_json::Value>,
}

impl PipelineState {
    /// Build the initial state for a request plus the user's prior briefs.
    ///
    /// `history` must already be ordered oldest-first; the history store
    /// returns it that way.
    pub fn new(request: &BriefRequest, history: Vec<FinalBrief>) -> Self {
        Self {
            topic: request.topic.clone(),
            user_id: request.user_id.clone(),
            depth: request.depth,
            follow_up: request.follow_up,
            additional_context: request.additional_context.clone(),
            history,
            continuity: None,
            plan: None,
            sources: None,
            summaries: None,
            final_brief: None,
            error: None,
            metadata: HashMap::new(),
        }
    }

    /// The most recent `n` history entries, oldest first.
    pub fn recent_history(&self, n: usize) -> &[FinalBrief] {
        let start = self.history.len().saturating_sub(n);
        &self.history[start..]
    }
}

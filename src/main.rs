#![allow(missing_docs)]

//! straylight — evidence-linked research brief generator.
//!
//! One-shot CLI over the research pipeline: `brief` runs the full
//! pipeline for a topic and appends the result to the user's history;
//! `history` lists what has been generated so far.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::warn;

use straylight::config::StraylightConfig;
use straylight::engine::invoker::StructuredInvoker;
use straylight::engine::pipeline::{Engine, EngineOptions};
use straylight::engine::state::PipelineState;
use straylight::history::HistoryStore;
use straylight::logging;
use straylight::providers::router::ModelRouter;
use straylight::search::tavily::TavilyClient;
use straylight::search::SearchClient;
use straylight::types::{BriefRequest, FinalBrief, ResearchDepth};

/// History entries loaded for a follow-up run. Context recall digests the
/// most recent three; planning sees the continuity summary only.
const HISTORY_LOAD_LIMIT: u32 = 5;

#[derive(Parser)]
#[command(name = "straylight", version, about = "Evidence-linked research briefs")]
struct Cli {
    /// Also write JSON logs to the configured logs directory.
    #[arg(long, global = true)]
    log_file: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a research brief for a topic.
    Brief(BriefArgs),
    /// List previously generated briefs.
    History(HistoryArgs),
}

#[derive(Args)]
struct BriefArgs {
    /// The research topic.
    topic: String,

    /// User the brief is generated for.
    #[arg(long, default_value = "local")]
    user: String,

    /// Coverage depth: shallow, moderate, or deep.
    #[arg(long, default_value = "moderate")]
    depth: ResearchDepth,

    /// Treat this as a follow-up to the user's earlier briefs.
    #[arg(long)]
    follow_up: bool,

    /// Additional free-text context for the request.
    #[arg(long)]
    context: Option<String>,
}

#[derive(Args)]
struct HistoryArgs {
    /// User whose history to list.
    #[arg(long, default_value = "local")]
    user: String,

    /// Maximum entries to show.
    #[arg(long, default_value_t = 10)]
    limit: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = StraylightConfig::load().context("failed to load configuration")?;

    let _logging_guard = if cli.log_file {
        Some(logging::init_with_file(
            Path::new(&config.runtime.logs_dir),
            &config.runtime.log_level,
        )?)
    } else {
        logging::init_cli(&config.runtime.log_level);
        None
    };

    match cli.command {
        Commands::Brief(args) => run_brief(&config, args).await,
        Commands::History(args) => run_history(&config, args).await,
    }
}

async fn run_brief(config: &StraylightConfig, args: BriefArgs) -> Result<()> {
    let router =
        ModelRouter::from_config(&config.models).context("failed to build model router")?;
    let invoker = StructuredInvoker::new(router);
    let search: Arc<dyn SearchClient> = Arc::new(
        TavilyClient::from_config(&config.search).context("failed to build search client")?,
    );
    let store = HistoryStore::open(&config.storage.db_path)
        .await
        .context("failed to open history store")?;

    let request = BriefRequest {
        topic: args.topic,
        user_id: args.user,
        depth: args.depth,
        follow_up: args.follow_up,
        additional_context: args.context,
    };

    let history = if request.follow_up {
        store
            .recent_briefs(&request.user_id, HISTORY_LOAD_LIMIT)
            .await
            .context("failed to load brief history")?
    } else {
        Vec::new()
    };

    let engine = Engine::new(
        invoker,
        search,
        EngineOptions::from_config(&config.pipeline, &config.search),
    );
    let state = PipelineState::new(&request, history);
    let brief = engine
        .run_with_timeout(
            state,
            Duration::from_secs(config.pipeline.run_timeout_seconds),
        )
        .await;

    // Persistence failure must not eat the brief the user waited for.
    if let Err(e) = store.append(&request.user_id, &request, &brief).await {
        warn!(error = %e, "failed to append brief to history");
    }

    println!("{}", render_brief(&brief));
    Ok(())
}

async fn run_history(config: &StraylightConfig, args: HistoryArgs) -> Result<()> {
    let store = HistoryStore::open(&config.storage.db_path)
        .await
        .context("failed to open history store")?;

    let entries = store
        .recent_entries(&args.user, args.limit)
        .await
        .context("failed to list history")?;

    if entries.is_empty() {
        println!("No briefs recorded for user '{}'.", args.user);
        return Ok(());
    }

    for entry in entries {
        let marker = if entry.follow_up { " (follow-up)" } else { "" };
        println!(
            "{}  [{}]{}  {}",
            entry.created_at, entry.depth, marker, entry.topic
        );
    }
    Ok(())
}

fn render_brief(brief: &FinalBrief) -> String {
    let mut out = String::new();
    out.push_str(&format!("# {}\n\n", brief.topic));

    if let Some(error) = brief.metadata.get("error").and_then(|v| v.as_str()) {
        out.push_str(&format!("> Generation failed: {error}\n\n"));
    }

    out.push_str("## Executive summary\n\n");
    out.push_str(&brief.executive_summary);
    out.push_str("\n\n## Synthesis\n\n");
    out.push_str(&brief.synthesis);

    out.push_str("\n\n## Key insights\n\n");
    for insight in &brief.key_insights {
        out.push_str(&format!("- {insight}\n"));
    }

    out.push_str("\n## References\n\n");
    for (i, reference) in brief.references.iter().enumerate() {
        out.push_str(&format!(
            "{}. {} — {} (relevance {:.2})\n",
            i.saturating_add(1),
            reference.title,
            reference.url,
            reference.relevance_score,
        ));
    }

    out.push_str(&format!(
        "\nGenerated at {}\n",
        brief.generated_at.to_rfc3339()
    ));
    out
}

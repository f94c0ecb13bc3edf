//! Straylight — evidence-linked research brief generator.
//!
//! Turns a topic string into a structured, evidence-linked research brief
//! through a staged LLM pipeline: context recall, query planning, source
//! retrieval, per-source summarization, and synthesis. Every stage carries
//! a deterministic local fallback; a run always resolves to exactly one
//! well-formed brief, degraded or not.
//!
//! See `DESIGN.md` for the module-by-module design notes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod engine;
pub mod history;
pub mod logging;
pub mod providers;
pub mod search;
pub mod types;

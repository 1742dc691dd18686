//! Collaborator stage traits for the subtask pipeline.
//!
//! The pipeline consumes these as opaque request/response services; the
//! LLM-backed implementations live alongside the traits, and scripted
//! mocks for tests live in [`mock`].

mod chart;
mod sql;

#[cfg(test)]
pub(crate) mod mock;

pub use chart::D3Deriver;
pub use sql::{SqlRefiner, SqlSynthesizer};

use async_trait::async_trait;
use bytes::Bytes;

use crate::engine::TableData;
use crate::error::StageResult;

/// Output of the query synthesis stage: the query text plus the
/// synthesizer's proposed artifact name (a hint, not a final filename).
#[derive(Debug, Clone)]
pub struct SynthesizedQuery {
    pub sql: String,
    pub artifact_name: String,
}

/// Turns a subtask description into a first query attempt.
#[async_trait]
pub trait QuerySynthesizer: Send + Sync {
    async fn synthesize(&self, description: &str) -> StageResult<SynthesizedQuery>;
}

/// Produces the single replacement query after a classified execution
/// failure. Called at most once per subtask.
#[async_trait]
pub trait QueryRefiner: Send + Sync {
    async fn refine(&self, description: &str, failed_sql: &str, reason: &str)
        -> StageResult<String>;
}

/// Derives the rendering artifact from a non-empty tabular result.
#[async_trait]
pub trait ChartDeriver: Send + Sync {
    async fn derive(
        &self,
        table: &TableData,
        description: &str,
        artifact_name: &str,
    ) -> StageResult<Bytes>;
}

/// Strip a single surrounding markdown code fence, if any. Models keep
/// emitting fenced replies no matter what the prompt says.
pub(crate) fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Drop the language tag on the opening fence.
    match body.split_once('\n') {
        Some((first_line, remainder)) if !first_line.trim().contains(' ') => remainder.trim(),
        _ => body.trim(),
    }
}

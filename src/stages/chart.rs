//! LLM-backed rendering derivation: a D3.js module per tabular result.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

use super::{strip_code_fences, ChartDeriver};
use crate::engine::TableData;
use crate::error::{StageError, StageResult};
use crate::llm::{ChatMessage, ChatOptions, LlmClient};

/// Rows shown to the model; enough to infer types, small enough to not
/// blow up the prompt.
const SAMPLE_ROWS: usize = 5;

const CHART_SYSTEM: &str = "You are an expert in D3.js. Given a task, a csv \
filename and sample rows, write a D3.js visualization component that reads \
the csv file and renders it. Requirements: name the component function \
GeneratedViz; read the data from the csv file, never inline the sample \
rows; include a title, axis labels and a legend; render large axis numbers \
with SI prefixes; size the chart from its container and re-render through a \
ResizeObserver; remove the svg on unmount. Use the palette #0CFCDD #46E4FD \
#3C93FD #2669FC #7667E6. Reply with the JavaScript only, no code fences.";

/// Derivation stage that turns a tabular result into D3 rendering code.
pub struct D3Deriver {
    llm: Arc<dyn LlmClient>,
    model: String,
}

impl D3Deriver {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self {
            llm,
            model: model.into(),
        }
    }
}

#[async_trait]
impl ChartDeriver for D3Deriver {
    async fn derive(
        &self,
        table: &TableData,
        description: &str,
        artifact_name: &str,
    ) -> StageResult<Bytes> {
        let user = format!(
            "Task: {}\nCsv file: {}.csv\nColumns: {}\nSample rows:\n{}",
            description,
            artifact_name,
            table.columns.join(", "),
            table.sample_json(SAMPLE_ROWS)
        );
        let messages = [ChatMessage::system(CHART_SYSTEM), ChatMessage::user(user)];
        let options = ChatOptions {
            max_tokens: Some(16000),
            ..ChatOptions::default()
        };

        let response = self
            .llm
            .chat_completion(&self.model, &messages, options)
            .await
            .map_err(|e| StageError::Derivation(e.to_string()))?;
        let text = response
            .text()
            .map_err(|e| StageError::Derivation(e.to_string()))?;

        let code = strip_code_fences(text);
        if code.is_empty() {
            return Err(StageError::Derivation("derivation produced no code".into()));
        }
        Ok(Bytes::copy_from_slice(code.as_bytes()))
    }
}

//! LLM-backed SQL synthesis and refinement.
//!
//! Synthesis is two calls, mirroring how an analyst works: first pick the
//! most relevant table from the catalog, then write a Trino query against
//! that table's schema together with a proposed artifact filename.
//! Refinement is one corrective rewrite carrying the failed query and the
//! classified failure reason.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

use super::{strip_code_fences, QueryRefiner, QuerySynthesizer, SynthesizedQuery};
use crate::catalog::TableCatalog;
use crate::error::{StageError, StageResult};
use crate::llm::{ChatMessage, ChatOptions, LlmClient};

const TABLE_SELECT_SYSTEM: &str = "You are an expert in Dune Analytics. \
Given a task and a list of available tables, reply with the name of the \
single most relevant table. Reply with the table name only, nothing else.";

const SQL_SYSTEM: &str = "You are an expert in Dune Analytics. Given a task \
and one table schema, write an efficient Trino SQL query that answers the \
task. Select only the fields you need, filter early on indexed fields such \
as block_time or token_address, and aggregate instead of returning raw \
per-event data. Also propose a short snake_case filename for the result, \
derived from the task. Reply with a JSON object of the form \
{\"sql\": \"...\", \"filename\": \"...\"} and nothing else.";

const REFINE_SYSTEM: &str = "You are an expert in Dune Analytics. A Trino \
SQL query failed. Using the task, the failed query and the error, write one \
corrected Trino SQL query. Reply with the SQL only, no explanation and no \
code fences.";

/// Query synthesis stage backed by an LLM and the table catalog.
pub struct SqlSynthesizer {
    llm: Arc<dyn LlmClient>,
    model: String,
    catalog: TableCatalog,
}

impl SqlSynthesizer {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>, catalog: TableCatalog) -> Self {
        Self {
            llm,
            model: model.into(),
            catalog,
        }
    }

    async fn chat(&self, system: &str, user: String) -> StageResult<String> {
        let messages = [ChatMessage::system(system), ChatMessage::user(user)];
        let options = ChatOptions {
            temperature: Some(0.0),
            ..ChatOptions::default()
        };
        let response = self
            .llm
            .chat_completion(&self.model, &messages, options)
            .await
            .map_err(|e| StageError::Synthesis(e.to_string()))?;
        let text = response
            .text()
            .map_err(|e| StageError::Synthesis(e.to_string()))?;
        Ok(text.to_string())
    }
}

#[async_trait]
impl QuerySynthesizer for SqlSynthesizer {
    async fn synthesize(&self, description: &str) -> StageResult<SynthesizedQuery> {
        let table = if self.catalog.is_empty() {
            None
        } else {
            let reply = self
                .chat(
                    TABLE_SELECT_SYSTEM,
                    format!(
                        "Task: {}\n\nAvailable tables:\n{}",
                        description,
                        self.catalog.listing()
                    ),
                )
                .await?;
            Some(reply.trim().trim_matches('`').to_string())
        };

        let schema = table
            .as_deref()
            .map(|name| self.catalog.describe(name))
            .unwrap_or_default();
        if let Some(name) = &table {
            tracing::debug!("Selected table {} for synthesis", name);
        }

        let reply = self
            .chat(SQL_SYSTEM, format!("Task: {}\n\n{}", description, schema))
            .await?;

        parse_sql_reply(&reply)
    }
}

/// Parse the synthesis reply, tolerating code fences around the JSON.
pub(crate) fn parse_sql_reply(reply: &str) -> StageResult<SynthesizedQuery> {
    #[derive(Deserialize)]
    struct SqlReply {
        sql: String,
        filename: String,
    }

    let body = strip_code_fences(reply);
    let parsed: SqlReply = serde_json::from_str(body)
        .map_err(|e| StageError::Synthesis(format!("unparseable synthesis reply: {}", e)))?;

    if parsed.sql.trim().is_empty() {
        return Err(StageError::Synthesis("synthesis produced empty SQL".into()));
    }

    Ok(SynthesizedQuery {
        sql: parsed.sql,
        artifact_name: parsed.filename,
    })
}

/// Refinement stage backed by an LLM.
pub struct SqlRefiner {
    llm: Arc<dyn LlmClient>,
    model: String,
}

impl SqlRefiner {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self {
            llm,
            model: model.into(),
        }
    }
}

#[async_trait]
impl QueryRefiner for SqlRefiner {
    async fn refine(
        &self,
        description: &str,
        failed_sql: &str,
        reason: &str,
    ) -> StageResult<String> {
        let user = format!(
            "Task: {}\n\nFailed query:\n{}\n\nError: {}",
            description, failed_sql, reason
        );
        let messages = [ChatMessage::system(REFINE_SYSTEM), ChatMessage::user(user)];
        let options = ChatOptions {
            temperature: Some(0.0),
            ..ChatOptions::default()
        };

        let response = self
            .llm
            .chat_completion(&self.model, &messages, options)
            .await
            .map_err(|e| StageError::Refinement(e.to_string()))?;
        let text = response
            .text()
            .map_err(|e| StageError::Refinement(e.to_string()))?;

        let sql = strip_code_fences(text).to_string();
        if sql.is_empty() {
            return Err(StageError::Refinement("refinement produced empty SQL".into()));
        }
        Ok(sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_json_reply() {
        let query = parse_sql_reply(
            r#"{"sql": "SELECT 1", "filename": "one_row_results.csv"}"#,
        )
        .unwrap();
        assert_eq!(query.sql, "SELECT 1");
        assert_eq!(query.artifact_name, "one_row_results.csv");
    }

    #[test]
    fn test_parse_fenced_json_reply() {
        let reply = "```json\n{\"sql\": \"SELECT 1\", \"filename\": \"f\"}\n```";
        assert_eq!(parse_sql_reply(reply).unwrap().sql, "SELECT 1");
    }

    #[test]
    fn test_parse_rejects_empty_sql() {
        let reply = r#"{"sql": "  ", "filename": "f"}"#;
        assert!(matches!(
            parse_sql_reply(reply),
            Err(StageError::Synthesis(_))
        ));
    }

    #[test]
    fn test_parse_rejects_prose() {
        assert!(parse_sql_reply("Here is your query: SELECT 1").is_err());
    }
}

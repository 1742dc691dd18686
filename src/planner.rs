//! Planner - decomposes one user request into independent subtasks.
//!
//! Per-subtask failures never abort a batch, but the planner runs before
//! any subtask exists; its failure is the one condition that surfaces as
//! a hard error to the caller.

use std::sync::Arc;

use crate::llm::{ChatMessage, ChatOptions, LlmClient};
use crate::stages::strip_code_fences;
use crate::task::Subtask;

const PLAN_SYSTEM: &str = "You are an expert in Dune Analytics. Split the \
user's request into a list of independent tasks, each answerable with a \
single table query. Keep tasks self-contained: repeat wallet addresses, \
token names and time ranges from the request in every task that needs \
them. Reply with a JSON array of task strings and nothing else.";

pub struct Planner {
    llm: Arc<dyn LlmClient>,
    model: String,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self {
            llm,
            model: model.into(),
        }
    }

    /// Split the request into subtasks, one per retrievable question.
    pub async fn split_request(&self, prompt: &str) -> anyhow::Result<Vec<Subtask>> {
        let messages = [ChatMessage::system(PLAN_SYSTEM), ChatMessage::user(prompt)];
        let options = ChatOptions {
            temperature: Some(0.0),
            ..ChatOptions::default()
        };

        let response = self.llm.chat_completion(&self.model, &messages, options).await?;
        let descriptions = parse_task_list(response.text()?)?;

        let subtasks: Vec<Subtask> = descriptions.into_iter().map(Subtask::new).collect();
        for (idx, subtask) in subtasks.iter().enumerate() {
            tracing::info!("Planned subtask {}: {}", idx + 1, subtask.description);
        }
        Ok(subtasks)
    }
}

/// Parse the planner reply, tolerating code fences around the JSON array.
pub(crate) fn parse_task_list(reply: &str) -> anyhow::Result<Vec<String>> {
    let body = strip_code_fences(reply);
    let tasks: Vec<String> = serde_json::from_str(body)
        .map_err(|e| anyhow::anyhow!("unparseable plan reply: {}", e))?;

    let tasks: Vec<String> = tasks
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();

    anyhow::ensure!(!tasks.is_empty(), "planner produced no tasks");
    Ok(tasks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_array() {
        let tasks = parse_task_list(r#"["buys of 1inch", "sells of 1inch"]"#).unwrap();
        assert_eq!(tasks.len(), 2);
    }

    #[test]
    fn test_parse_fenced_array() {
        let tasks = parse_task_list("```json\n[\"one task\"]\n```").unwrap();
        assert_eq!(tasks, vec!["one task".to_string()]);
    }

    #[test]
    fn test_blank_entries_dropped() {
        let tasks = parse_task_list(r#"["a", "  ", ""]"#).unwrap();
        assert_eq!(tasks, vec!["a".to_string()]);
    }

    #[test]
    fn test_prose_reply_rejected() {
        assert!(parse_task_list("I would split this into two tasks.").is_err());
        assert!(parse_task_list("[]").is_err());
    }
}

//! Dune Analytics execution engine.
//!
//! Each execution creates a fresh saved query, starts it, polls the
//! execution status and fetches the result rows. The remote execution id
//! doubles as the cancellation handle: it is registered in the batch's
//! abort scope for exactly the duration of the call.

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::sync::OnceLock;
use std::time::Duration;

use super::{AbortScope, QueryEngine, QueryOutcome, TableData};

const DUNE_API_URL: &str = "https://api.dune.com/api/v1";

/// States the Dune execution API reports as terminal.
const STATE_COMPLETED: &str = "QUERY_STATE_COMPLETED";
const STATE_FAILED: &str = "QUERY_STATE_FAILED";
const STATE_CANCELLED: &str = "QUERY_STATE_CANCELLED";

/// Client for the Dune Analytics query API.
pub struct DuneEngine {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    poll_interval: Duration,
}

impl DuneEngine {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: DUNE_API_URL.to_string(),
            poll_interval: Duration::from_secs(2),
        }
    }

    /// Point the client at a different API root (used by tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn post(&self, path: &str, body: Option<Value>) -> Result<Value, String> {
        let mut req = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header("X-Dune-API-Key", &self.api_key);
        if let Some(body) = body {
            req = req.json(&body);
        }
        Self::read_json(req.send().await).await
    }

    async fn get(&self, path: &str) -> Result<Value, String> {
        let req = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .header("X-Dune-API-Key", &self.api_key);
        Self::read_json(req.send().await).await
    }

    async fn read_json(
        response: Result<reqwest::Response, reqwest::Error>,
    ) -> Result<Value, String> {
        let response = response.map_err(|e| format!("request failed: {}", e))?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(format!("HTTP {}: {}", status.as_u16(), body));
        }

        serde_json::from_str(&body).map_err(|e| format!("invalid response body: {}", e))
    }

    /// Save the SQL as a new Dune query and return its id.
    async fn create_query(&self, sql: &str) -> Result<u64, String> {
        let body = serde_json::json!({
            "name": "chainsight generated query",
            "query_sql": sql,
            "is_private": false,
        });
        let value = self.post("/query", Some(body)).await?;
        let created: CreateQueryResponse = serde_json::from_value(value)
            .map_err(|e| format!("unexpected create-query response: {}", e))?;
        Ok(created.query_id)
    }

    /// Start an execution of a saved query and return the execution id.
    async fn start_execution(&self, query_id: u64) -> Result<String, String> {
        let value = self
            .post(&format!("/query/{}/execute", query_id), None)
            .await?;
        let started: ExecuteResponse = serde_json::from_value(value)
            .map_err(|e| format!("unexpected execute response: {}", e))?;
        Ok(started.execution_id)
    }

    /// Poll until the execution reaches a terminal state.
    async fn await_completion(&self, execution_id: &str) -> Result<(), String> {
        loop {
            let value = self
                .get(&format!("/execution/{}/status", execution_id))
                .await?;
            let status: StatusResponse = serde_json::from_value(value)
                .map_err(|e| format!("unexpected status response: {}", e))?;

            match status.state.as_str() {
                STATE_COMPLETED => return Ok(()),
                STATE_FAILED | STATE_CANCELLED => {
                    let detail = status
                        .error
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| status.state.clone());
                    return Err(format!(
                        "execution_id={} state={}: {}",
                        execution_id, status.state, detail
                    ));
                }
                _ => tokio::time::sleep(self.poll_interval).await,
            }
        }
    }

    async fn fetch_results(&self, execution_id: &str) -> Result<TableData, String> {
        let value = self
            .get(&format!("/execution/{}/results", execution_id))
            .await?;
        let results: ResultsResponse = serde_json::from_value(value)
            .map_err(|e| format!("unexpected results response: {}", e))?;

        let payload = results
            .result
            .ok_or_else(|| format!("execution_id={}: results missing", execution_id))?;

        Ok(TableData {
            columns: payload.metadata.column_names,
            rows: payload.rows,
        })
    }

    async fn run(&self, sql: &str, scope: &AbortScope) -> Result<TableData, String> {
        let query_id = self.create_query(sql).await?;
        tracing::debug!("Created Dune query {}", query_id);

        let execution_id = self.start_execution(query_id).await?;
        tracing::info!("Started Dune execution {}", execution_id);

        scope.register(execution_id.clone());
        let completed = self.await_completion(&execution_id).await;
        let table = match completed {
            Ok(()) => self.fetch_results(&execution_id).await,
            Err(e) => Err(e),
        };
        scope.unregister(&execution_id);

        table
    }
}

#[async_trait]
impl QueryEngine for DuneEngine {
    async fn execute(&self, sql: &str, scope: &AbortScope) -> QueryOutcome {
        match self.run(sql, scope).await {
            Ok(table) => {
                tracing::info!("Query returned {} rows", table.rows.len());
                QueryOutcome::from_table(table)
            }
            Err(raw) => {
                let reason = summarize_engine_error(&raw);
                tracing::warn!("Query failed: {}", reason);
                QueryOutcome::Failed(reason)
            }
        }
    }

    async fn abort_scope(&self, scope: &AbortScope) {
        let cancels = scope.drain().into_iter().map(|execution_id| async move {
            match self
                .post(&format!("/execution/{}/cancel", execution_id), None)
                .await
            {
                Ok(_) => tracing::info!("Cancelled Dune execution {}", execution_id),
                Err(e) => {
                    tracing::warn!("Failed to cancel Dune execution {}: {}", execution_id, e)
                }
            }
        });
        futures::future::join_all(cancels).await;
    }
}

/// Condense a raw engine error into the short reason handed to the
/// refinement stage. Known SQL failure shapes are rewritten; anything
/// unrecognized passes through unchanged.
pub fn summarize_engine_error(raw: &str) -> String {
    static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        [
            (r#"syntax error at or near "([^"]+)""#, "syntax error near '{}'"),
            (r#"[Cc]olumn '?"?([\w.]+)'?"? (?:does not exist|cannot be resolved)"#, "unknown column {}"),
            (r#"(?:relation|[Tt]able) '?"?([\w.]+)'?"? does not exist"#, "table {} not found"),
            (r#"invalid input syntax for type (\w+)"#, "invalid input for type {}"),
            (r#"permission denied for (\S+)"#, "permission denied for {}"),
        ]
        .into_iter()
        .filter_map(|(pattern, template)| Regex::new(pattern).ok().map(|re| (re, template)))
        .collect()
    });

    for (re, template) in patterns {
        if let Some(caps) = re.captures(raw) {
            if let Some(m) = caps.get(1) {
                return template.replacen("{}", m.as_str(), 1);
            }
        }
    }

    raw.to_string()
}

#[derive(Debug, Deserialize)]
struct CreateQueryResponse {
    query_id: u64,
}

#[derive(Debug, Deserialize)]
struct ExecuteResponse {
    execution_id: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    state: String,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ResultsResponse {
    #[serde(default)]
    result: Option<ResultPayload>,
}

#[derive(Debug, Deserialize)]
struct ResultPayload {
    rows: Vec<Value>,
    metadata: ResultMetadata,
}

#[derive(Debug, Deserialize)]
struct ResultMetadata {
    column_names: Vec<String>,
}

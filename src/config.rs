//! Environment-driven configuration.
//!
//! Variables:
//! - `LLM_API_KEY`          - key for the LLM provider (required)
//! - `LLM_BASE_URL`         - OpenAI-compatible endpoint override
//! - `MODEL_NAME`           - chat model (default `openai/gpt-4o`)
//! - `DUNE_API_KEY`         - key for the Dune query API (required)
//! - `RESULT_DIR`           - artifact directory (default `results`)
//! - `TABLE_CATALOG_PATH`   - table catalog JSON file
//! - `WORKERS`              - worker pool size (default 5)
//! - `DEADLINE_SECS`        - batch deadline (default 60)
//! - `GRACE_SECS`           - post-deadline grace window (default 2)

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::scheduler::{DEFAULT_DEADLINE, DEFAULT_GRACE, DEFAULT_WORKERS};

const DEFAULT_MODEL: &str = "openai/gpt-4o";
const DEFAULT_RESULT_DIR: &str = "results";

#[derive(Debug, Clone)]
pub struct Config {
    pub llm_api_key: String,
    pub llm_base_url: Option<String>,
    pub model: String,
    pub dune_api_key: String,
    pub result_dir: PathBuf,
    pub table_catalog_path: Option<PathBuf>,
    pub workers: usize,
    pub deadline: Duration,
    pub grace: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            llm_api_key: required("LLM_API_KEY")?,
            llm_base_url: std::env::var("LLM_BASE_URL").ok(),
            model: std::env::var("MODEL_NAME").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            dune_api_key: required("DUNE_API_KEY")?,
            result_dir: std::env::var("RESULT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_RESULT_DIR)),
            table_catalog_path: std::env::var("TABLE_CATALOG_PATH").ok().map(PathBuf::from),
            workers: parsed("WORKERS")?.unwrap_or(DEFAULT_WORKERS),
            deadline: parsed("DEADLINE_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_DEADLINE),
            grace: parsed("GRACE_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_GRACE),
        })
    }
}

fn required(name: &str) -> anyhow::Result<String> {
    std::env::var(name).map_err(|_| anyhow::anyhow!("{} is not set", name))
}

fn parsed<T: FromStr>(name: &str) -> anyhow::Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("invalid {}: {}", name, e)),
        Err(_) => Ok(None),
    }
}

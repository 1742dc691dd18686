//! Chainsight CLI - run one analysis batch from the command line.

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use chainsight::artifacts::FsArtifactStore;
use chainsight::catalog::TableCatalog;
use chainsight::engine::DuneEngine;
use chainsight::llm::{LlmClient, OpenRouterClient};
use chainsight::planner::Planner;
use chainsight::stages::{D3Deriver, SqlRefiner, SqlSynthesizer};
use chainsight::{BatchScheduler, Config, Stages};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let prompt = parse_prompt()?;
    let config = Config::from_env()?;

    let llm: Arc<dyn LlmClient> = {
        let mut client = OpenRouterClient::new(config.llm_api_key.clone());
        if let Some(url) = &config.llm_base_url {
            client = client.with_api_url(url.clone());
        }
        Arc::new(client)
    };

    let catalog = match &config.table_catalog_path {
        Some(path) => TableCatalog::load(path)?,
        None => TableCatalog::default(),
    };

    let model = config.model.as_str();
    let stages = Stages {
        synthesizer: Arc::new(SqlSynthesizer::new(llm.clone(), model, catalog)),
        engine: Arc::new(DuneEngine::new(config.dune_api_key.clone())),
        refiner: Arc::new(SqlRefiner::new(llm.clone(), model)),
        deriver: Arc::new(D3Deriver::new(llm.clone(), model)),
        store: Arc::new(FsArtifactStore::new(&config.result_dir)),
    };

    let planner = Planner::new(llm, model);
    let subtasks = planner
        .split_request(&prompt)
        .await
        .context("request decomposition failed")?;

    let scheduler = BatchScheduler::new(stages)
        .with_workers(config.workers)
        .with_deadline(config.deadline)
        .with_grace(config.grace);
    let result = scheduler.run_batch(subtasks).await;

    for outcome in &result.outcomes {
        match outcome.artifact() {
            Some(artifact) => println!(
                "[{}] {} -> {}",
                outcome.state.label(),
                outcome.description,
                artifact.rendering
            ),
            None => println!("[{}] {}", outcome.state.label(), outcome.description),
        }
    }

    Ok(())
}

fn parse_prompt() -> anyhow::Result<String> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--prompt" {
            return args
                .next()
                .ok_or_else(|| anyhow::anyhow!("--prompt requires a value"));
        }
    }
    anyhow::bail!("usage: chainsight --prompt <request>")
}

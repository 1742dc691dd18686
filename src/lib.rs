//! # Chainsight
//!
//! An AI analyst that decomposes one natural-language request into
//! independent on-chain retrieval subtasks and runs them concurrently
//! under a single batch deadline.
//!
//! ## Batch flow
//! 1. The planner splits the request into subtasks
//! 2. The scheduler admits subtasks to a bounded worker pool
//! 3. Each pipeline synthesizes a Trino query, executes it on the remote
//!    engine, refines it exactly once on a classified failure, then
//!    derives and persists a rendering for non-empty results
//! 4. The aggregator merges outcomes into one ordered, duplicate-free
//!    batch result; admitted-but-unfinished subtasks are tagged timed-out
//!
//! ## Modules
//! - `scheduler`: worker pool, deadline and grace-window handling
//! - `pipeline`: one subtask from description to outcome
//! - `aggregator`: write-once outcome collection
//! - `stages`: collaborator traits and their LLM-backed implementations
//! - `engine`: remote query engine trait + Dune client
//! - `artifacts`: artifact naming and storage

pub mod aggregator;
pub mod artifacts;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod planner;
pub mod scheduler;
pub mod stages;
pub mod task;

pub use config::Config;
pub use pipeline::{Stages, SubtaskPipeline};
pub use scheduler::BatchScheduler;
pub use task::{BatchResult, OutcomeState, Subtask, SubtaskId, SubtaskOutcome};

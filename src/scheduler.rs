//! Batch scheduler - runs subtask pipelines under a bounded worker pool
//! and a single batch-wide deadline.
//!
//! Subtasks are admitted in submission order through a semaphore of `W`
//! permits. One shared cancellation token is the deadline signal for
//! every in-flight pipeline. When it fires: admission stops, in-flight
//! pipelines get a short grace window to report, stragglers are aborted
//! and synthesized as `TimedOut`, and the engine is asked (best effort)
//! to cancel the remote executions this batch registered. Subtasks never
//! admitted are absent from the result.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::aggregator::ResultAggregator;
use crate::engine::AbortScope;
use crate::pipeline::{Stages, SubtaskPipeline};
use crate::task::{BatchResult, OutcomeState, Subtask, SubtaskOutcome};

pub const DEFAULT_WORKERS: usize = 5;
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(60);
pub const DEFAULT_GRACE: Duration = Duration::from_secs(2);

pub struct BatchScheduler {
    stages: Stages,
    workers: usize,
    deadline: Duration,
    grace: Duration,
}

impl BatchScheduler {
    pub fn new(stages: Stages) -> Self {
        Self {
            stages,
            workers: DEFAULT_WORKERS,
            deadline: DEFAULT_DEADLINE,
            grace: DEFAULT_GRACE,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Run every subtask and return the consolidated batch result.
    ///
    /// Never fails for per-subtask reasons; each entry's state carries
    /// its own success / no-data / failure / timeout classification.
    pub async fn run_batch(&self, subtasks: Vec<Subtask>) -> BatchResult {
        let cancel = CancellationToken::new();
        let scope = Arc::new(AbortScope::default());
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let pipeline = Arc::new(SubtaskPipeline::new(self.stages.clone()));
        let mut join_set: JoinSet<SubtaskOutcome> = JoinSet::new();
        let mut aggregator = ResultAggregator::new();
        let mut admitted: Vec<Subtask> = Vec::new();

        let total = subtasks.len();
        tracing::info!(
            "Starting batch of {} subtasks (workers={}, deadline={:?})",
            total,
            self.workers,
            self.deadline
        );

        // One shared countdown for the whole batch, not per-pipeline timers.
        let watchdog = {
            let cancel = cancel.clone();
            let deadline = self.deadline;
            tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                tracing::warn!("Batch deadline fired after {:?}", deadline);
                cancel.cancel();
            })
        };

        for subtask in subtasks {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            tracing::debug!("Admitting subtask {}", subtask.id);
            admitted.push(subtask.clone());

            let pipeline = pipeline.clone();
            let cancel = cancel.clone();
            let scope = scope.clone();
            join_set.spawn(async move {
                let _permit = permit;
                pipeline.run(&subtask, &cancel, &scope).await
            });
        }

        if admitted.len() < total {
            tracing::warn!(
                "{} of {} subtasks were never admitted before the deadline",
                total - admitted.len(),
                total
            );
        }

        // Collect until every pipeline reported or the deadline fired.
        loop {
            tokio::select! {
                joined = join_set.join_next() => match joined {
                    Some(Ok(outcome)) => {
                        aggregator.record(outcome);
                    }
                    Some(Err(err)) => tracing::error!("Pipeline task aborted: {}", err),
                    None => break,
                },
                _ = cancel.cancelled() => break,
            }
        }

        let deadline_fired = cancel.is_cancelled();
        watchdog.abort();

        if deadline_fired && !join_set.is_empty() {
            // Cancel only the remote executions this batch registered,
            // concurrently with draining whatever still reports. The
            // cancel is best effort; the grace window bounds both, so a
            // stalled cancel call cannot hold up the batch.
            let graceful = async {
                let abort = self.stages.engine.abort_scope(&scope);
                let drain = async {
                    while let Some(joined) = join_set.join_next().await {
                        match joined {
                            Ok(outcome) => {
                                aggregator.record(outcome);
                            }
                            Err(err) => tracing::error!("Pipeline task aborted: {}", err),
                        }
                    }
                };
                tokio::join!(abort, drain);
            };
            if tokio::time::timeout(self.grace, graceful).await.is_err() {
                tracing::warn!("Grace window expired with work still in flight");
                join_set.abort_all();
            }
        }

        // Admitted pipelines that never reported get exactly one
        // synthesized outcome; the aggregator guards against a late
        // report racing this write.
        for subtask in &admitted {
            if !aggregator.contains(subtask.id) {
                let state = if deadline_fired {
                    OutcomeState::TimedOut
                } else {
                    OutcomeState::Failed {
                        reason: "pipeline aborted before reporting".into(),
                    }
                };
                aggregator.record(SubtaskOutcome::new(subtask, state));
            }
        }

        let result = aggregator.into_result();
        tracing::info!(
            "Batch finished: {} succeeded, {} not succeeded, {} never admitted",
            result.succeeded().count(),
            result.not_succeeded().count(),
            total - result.len()
        );
        result
    }
}

//! Subtask pipeline - drives one subtask from description to outcome.
//!
//! Sequence: synthesize -> execute -> (on failure) refine -> execute once
//! more -> (on non-empty rows) derive -> persist tabular, then rendering.
//! The retry budget is exactly one refinement; a second execution failure
//! is terminal and reports the second reason. The cancellation signal is
//! observed before every stage: after it fires no stage starts and the
//! outcome is `TimedOut`.

use bytes::Bytes;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::artifacts::{artifact_basename, ArtifactKind, ArtifactRef, ArtifactStore};
use crate::engine::{AbortScope, QueryEngine, QueryOutcome, TableData};
use crate::error::{StageError, StageResult};
use crate::stages::{ChartDeriver, QueryRefiner, QuerySynthesizer};
use crate::task::{Attempt, OutcomeState, QueryAttempt, Subtask, SubtaskOutcome};

/// The collaborators a pipeline calls, shared across every concurrent
/// pipeline of a batch. All of them must tolerate concurrent calls.
#[derive(Clone)]
pub struct Stages {
    pub synthesizer: Arc<dyn QuerySynthesizer>,
    pub engine: Arc<dyn QueryEngine>,
    pub refiner: Arc<dyn QueryRefiner>,
    pub deriver: Arc<dyn ChartDeriver>,
    pub store: Arc<dyn ArtifactStore>,
}

/// Runs one subtask end to end.
pub struct SubtaskPipeline {
    stages: Stages,
}

impl SubtaskPipeline {
    pub fn new(stages: Stages) -> Self {
        Self { stages }
    }

    /// Produce the subtask's single outcome. Never returns an error: any
    /// stage failure is folded into `Failed`, cancellation into
    /// `TimedOut`.
    ///
    /// If cancellation lands after the tabular artifact was persisted but
    /// before the rendering, the csv is left in place; the store has no
    /// rollback.
    pub async fn run(
        &self,
        subtask: &Subtask,
        cancel: &CancellationToken,
        scope: &AbortScope,
    ) -> SubtaskOutcome {
        match self.drive(subtask, cancel, scope).await {
            Ok(state) => SubtaskOutcome::new(subtask, state),
            Err(StageError::Timeout) => {
                tracing::info!("Subtask {} abandoned at deadline", subtask.id);
                SubtaskOutcome::new(subtask, OutcomeState::TimedOut)
            }
            Err(err) => {
                tracing::warn!(
                    "Subtask {} failed at {} stage: {}",
                    subtask.id,
                    err.stage(),
                    err
                );
                SubtaskOutcome::new(
                    subtask,
                    OutcomeState::Failed {
                        reason: err.to_string(),
                    },
                )
            }
        }
    }

    async fn drive(
        &self,
        subtask: &Subtask,
        cancel: &CancellationToken,
        scope: &AbortScope,
    ) -> StageResult<OutcomeState> {
        checkpoint(cancel)?;
        let synthesized = self.stages.synthesizer.synthesize(&subtask.description).await?;
        let first = QueryAttempt {
            subtask_id: subtask.id,
            sql: synthesized.sql,
            attempt: Attempt::First,
        };

        checkpoint(cancel)?;
        let executed = match self.stages.engine.execute(&first.sql, scope).await {
            QueryOutcome::Rows(table) => Some((table, first.attempt)),
            QueryOutcome::Empty => None,
            QueryOutcome::Failed(reason) => {
                tracing::info!("Subtask {} attempt 1 failed, refining: {}", subtask.id, reason);
                self.retry_once(subtask, &first, &reason, cancel, scope).await?
            }
        };
        let Some((table, attempt)) = executed else {
            return Ok(OutcomeState::NoData);
        };

        checkpoint(cancel)?;
        let name = artifact_basename(&synthesized.artifact_name, subtask.id);
        let rendering = self
            .stages
            .deriver
            .derive(&table, &subtask.description, &name)
            .await?;

        checkpoint(cancel)?;
        let tabular = self
            .stages
            .store
            .persist(ArtifactKind::Tabular, &name, Bytes::from(table.to_csv()))
            .await?;
        let rendering = self
            .stages
            .store
            .persist(ArtifactKind::Rendering, &name, rendering)
            .await?;

        tracing::info!(
            "Subtask {} succeeded on attempt {} ({} rows)",
            subtask.id,
            attempt.number(),
            table.rows.len()
        );
        Ok(OutcomeState::Success {
            artifact: ArtifactRef { tabular, rendering },
        })
    }

    /// The single refinement + re-execution. A second failure is terminal
    /// and surfaces the second reason, not the first; `None` means the
    /// refined query ran but returned no rows.
    async fn retry_once(
        &self,
        subtask: &Subtask,
        first: &QueryAttempt,
        reason: &str,
        cancel: &CancellationToken,
        scope: &AbortScope,
    ) -> StageResult<Option<(TableData, Attempt)>> {
        checkpoint(cancel)?;
        let refined_sql = self
            .stages
            .refiner
            .refine(&subtask.description, &first.sql, reason)
            .await?;
        let second = QueryAttempt {
            subtask_id: subtask.id,
            sql: refined_sql,
            attempt: Attempt::Refined,
        };

        checkpoint(cancel)?;
        match self.stages.engine.execute(&second.sql, scope).await {
            QueryOutcome::Rows(table) => Ok(Some((table, second.attempt))),
            QueryOutcome::Empty => Ok(None),
            QueryOutcome::Failed(second_reason) => Err(StageError::Execution(second_reason)),
        }
    }
}

fn checkpoint(cancel: &CancellationToken) -> StageResult<()> {
    if cancel.is_cancelled() {
        Err(StageError::Timeout)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::mock::{mock_stages, MockHandles, FIRST_REASON, SECOND_REASON};
    use std::sync::atomic::Ordering;

    fn pipeline() -> (SubtaskPipeline, MockHandles) {
        let (stages, handles) = mock_stages();
        (SubtaskPipeline::new(stages), handles)
    }

    async fn run(pipeline: &SubtaskPipeline, description: &str) -> SubtaskOutcome {
        let subtask = Subtask::new(description);
        pipeline
            .run(&subtask, &CancellationToken::new(), &AbortScope::default())
            .await
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let (pipeline, handles) = pipeline();
        let outcome = run(&pipeline, "daily swap volume").await;

        let artifact = outcome.artifact().expect("expected success");
        assert!(artifact.tabular.ends_with(".csv"));
        assert!(artifact.rendering.ends_with(".js"));

        // tabular first, rendering second, nothing else
        let persisted = handles.store.persisted.lock().unwrap();
        assert_eq!(persisted.len(), 2);
        assert_eq!(persisted[0].0, ArtifactKind::Tabular);
        assert_eq!(persisted[1].0, ArtifactKind::Rendering);
        assert_eq!(persisted[0].1, persisted[1].1);

        assert_eq!(handles.refiner.calls.load(Ordering::SeqCst), 0);
        assert_eq!(handles.engine.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_artifact_name_carries_subtask_id() {
        let (pipeline, handles) = pipeline();
        let subtask = Subtask::new("daily swap volume");
        pipeline
            .run(&subtask, &CancellationToken::new(), &AbortScope::default())
            .await;

        let persisted = handles.store.persisted.lock().unwrap();
        assert!(persisted[0].1.starts_with("mock_results_"));
        assert!(persisted[0].1.ends_with(&subtask.id.short()));
    }

    #[tokio::test]
    async fn test_empty_result_is_no_data_not_success() {
        let (pipeline, handles) = pipeline();
        let outcome = run(&pipeline, "empty wallet history").await;

        assert_eq!(outcome.state, OutcomeState::NoData);
        assert_eq!(handles.deriver.calls.load(Ordering::SeqCst), 0);
        assert!(handles.store.persisted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_refinement_recovers_first_failure() {
        let (pipeline, handles) = pipeline();
        let outcome = run(&pipeline, "volume fail-once").await;

        assert!(outcome.is_success());
        assert_eq!(handles.refiner.calls.load(Ordering::SeqCst), 1);
        assert_eq!(handles.engine.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_second_failure_is_terminal_with_second_reason() {
        let (pipeline, handles) = pipeline();
        let outcome = run(&pipeline, "volume fail-twice").await;

        let OutcomeState::Failed { reason } = &outcome.state else {
            panic!("expected failure, got {:?}", outcome.state);
        };
        assert!(reason.contains(SECOND_REASON));
        assert!(!reason.contains(FIRST_REASON));

        // retry budget is exactly one: one refinement, two executions
        assert_eq!(handles.refiner.calls.load(Ordering::SeqCst), 1);
        assert_eq!(handles.engine.calls.load(Ordering::SeqCst), 2);
        assert_eq!(handles.deriver.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_refined_empty_result_is_no_data() {
        let (pipeline, _handles) = pipeline();
        let outcome = run(&pipeline, "empty fail-once").await;
        assert_eq!(outcome.state, OutcomeState::NoData);
    }

    #[tokio::test]
    async fn test_refinement_error_fails_subtask() {
        let (pipeline, handles) = pipeline();
        let outcome = run(&pipeline, "volume fail-once refine-error").await;

        assert!(matches!(outcome.state, OutcomeState::Failed { .. }));
        assert_eq!(handles.engine.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_derivation_error_fails_subtask() {
        let (pipeline, handles) = pipeline();
        let outcome = run(&pipeline, "chart derive-error").await;

        assert!(matches!(outcome.state, OutcomeState::Failed { .. }));
        assert_eq!(handles.deriver.calls.load(Ordering::SeqCst), 1);
        // Derivation precedes persistence, so neither artifact lands.
        assert!(handles.store.persisted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_synthesis_error_fails_subtask() {
        let (pipeline, handles) = pipeline();
        let outcome = run(&pipeline, "synth-error nothing to query").await;

        assert!(matches!(outcome.state, OutcomeState::Failed { .. }));
        assert_eq!(handles.engine.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_reports_timed_out() {
        let (pipeline, handles) = pipeline();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let subtask = Subtask::new("anything");
        let outcome = pipeline
            .run(&subtask, &cancel, &AbortScope::default())
            .await;

        assert_eq!(outcome.state, OutcomeState::TimedOut);
        assert_eq!(handles.synthesizer.calls.load(Ordering::SeqCst), 0);
    }
}

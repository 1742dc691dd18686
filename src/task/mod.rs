//! Task module - subtasks, query attempts and per-subtask outcomes.
//!
//! A batch is the full set of subtasks spawned from one request. Each
//! subtask is identified by an opaque id; the description is display
//! text only and must never be used as an identity key (two subtasks
//! may legally carry identical descriptions).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::artifacts::ArtifactRef;

/// Opaque identity of a subtask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubtaskId(Uuid);

impl SubtaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Short prefix for filenames and log lines.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for SubtaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubtaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One independently retrievable unit of work derived from a user request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subtask {
    pub id: SubtaskId,
    pub description: String,
}

impl Subtask {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: SubtaskId::new(),
            description: description.into(),
        }
    }
}

/// Which of the (at most two) query attempts this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Attempt {
    First,
    Refined,
}

impl Attempt {
    pub fn number(&self) -> u8 {
        match self {
            Self::First => 1,
            Self::Refined => 2,
        }
    }
}

/// A query text bound to the subtask and attempt that produced it.
///
/// Invariant: at most two attempts exist per subtask; the second one only
/// ever comes out of the refinement stage.
#[derive(Debug, Clone)]
pub struct QueryAttempt {
    pub subtask_id: SubtaskId,
    pub sql: String,
    pub attempt: Attempt,
}

/// Terminal classification of a subtask.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum OutcomeState {
    /// Both artifacts were persisted.
    Success { artifact: ArtifactRef },
    /// The query ran but returned zero rows.
    NoData,
    /// A stage failed terminally (after the single refinement, if any).
    Failed { reason: String },
    /// The batch deadline fired before this subtask finished.
    TimedOut,
}

impl OutcomeState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::NoData => "no-data",
            Self::Failed { .. } => "failed",
            Self::TimedOut => "timed-out",
        }
    }
}

/// The single, write-once result record of a subtask.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtaskOutcome {
    pub subtask_id: SubtaskId,
    pub description: String,
    pub state: OutcomeState,
}

impl SubtaskOutcome {
    pub fn new(subtask: &Subtask, state: OutcomeState) -> Self {
        Self {
            subtask_id: subtask.id,
            description: subtask.description.clone(),
            state,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.state, OutcomeState::Success { .. })
    }

    pub fn artifact(&self) -> Option<&ArtifactRef> {
        match &self.state {
            OutcomeState::Success { artifact } => Some(artifact),
            _ => None,
        }
    }
}

/// Consolidated result of one batch: one entry per admitted subtask, in
/// first-write order, duplicate-free. Subtasks never admitted before the
/// deadline are absent entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub outcomes: Vec<SubtaskOutcome>,
    pub completed_at: DateTime<Utc>,
}

impl BatchResult {
    pub fn new(outcomes: Vec<SubtaskOutcome>) -> Self {
        Self {
            outcomes,
            completed_at: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn get(&self, id: SubtaskId) -> Option<&SubtaskOutcome> {
        self.outcomes.iter().find(|o| o.subtask_id == id)
    }

    /// Outcomes that produced artifacts.
    pub fn succeeded(&self) -> impl Iterator<Item = &SubtaskOutcome> {
        self.outcomes.iter().filter(|o| o.is_success())
    }

    /// Outcomes that did not (no-data, failed or timed out).
    pub fn not_succeeded(&self) -> impl Iterator<Item = &SubtaskOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_is_id_not_description() {
        let a = Subtask::new("same text");
        let b = Subtask::new("same text");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_batch_result_partitions() {
        let ok = Subtask::new("ok");
        let empty = Subtask::new("empty");
        let result = BatchResult::new(vec![
            SubtaskOutcome::new(
                &ok,
                OutcomeState::Success {
                    artifact: ArtifactRef {
                        tabular: "a.csv".into(),
                        rendering: "a.js".into(),
                    },
                },
            ),
            SubtaskOutcome::new(&empty, OutcomeState::NoData),
        ]);

        assert_eq!(result.succeeded().count(), 1);
        assert_eq!(result.not_succeeded().count(), 1);
        assert!(result.get(ok.id).unwrap().artifact().is_some());
    }
}

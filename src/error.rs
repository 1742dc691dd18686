//! Stage error taxonomy for the subtask pipeline.
//!
//! Every variant is scoped to a single subtask: a stage failure converts
//! that subtask's outcome to `Failed` and never aborts the batch.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StageError {
    #[error("query synthesis failed: {0}")]
    Synthesis(String),

    #[error("query execution failed: {0}")]
    Execution(String),

    #[error("query refinement failed: {0}")]
    Refinement(String),

    #[error("rendering derivation failed: {0}")]
    Derivation(String),

    #[error("artifact persistence failed: {0}")]
    Persistence(String),

    #[error("deadline elapsed before the stage could run")]
    Timeout,
}

impl StageError {
    /// The pipeline stage this error belongs to, for log attribution.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Synthesis(_) => "synthesis",
            Self::Execution(_) => "execution",
            Self::Refinement(_) => "refinement",
            Self::Derivation(_) => "derivation",
            Self::Persistence(_) => "persistence",
            Self::Timeout => "timeout",
        }
    }
}

impl From<std::io::Error> for StageError {
    fn from(err: std::io::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

pub type StageResult<T> = Result<T, StageError>;

//! Artifact storage - durable sink for the byproducts of a successful subtask.
//!
//! Each successful subtask persists exactly two artifacts, in order: the
//! tabular query result (csv) and the derived rendering (js). Filenames
//! come from the synthesizer's proposed name, sanitized and suffixed with
//! the subtask id so that two subtasks proposing the same name never
//! collide.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{StageError, StageResult};
use crate::task::SubtaskId;

/// The two artifact kinds a subtask can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// Tabular query result, stored as csv.
    Tabular,
    /// Derived rendering code, stored as a js module.
    Rendering,
}

impl ArtifactKind {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Tabular => "csv",
            Self::Rendering => "js",
        }
    }
}

/// Locators of the two persisted artifacts of a successful subtask.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub tabular: String,
    pub rendering: String,
}

/// Derive a collision-free base name from the synthesizer's proposal.
///
/// The proposal is treated as a hint: any extension is stripped, path
/// separators and other unsafe characters are replaced, and the subtask
/// id is appended so identical proposals from different subtasks stay
/// distinct.
pub fn artifact_basename(proposed: &str, id: SubtaskId) -> String {
    let stem = proposed
        .rsplit('/')
        .next()
        .unwrap_or(proposed)
        .trim_end_matches(".csv")
        .trim_end_matches(".js");

    let mut safe: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if safe.is_empty() {
        safe.push_str("result");
    }

    format!("{}_{}", safe, id.short())
}

/// Durable sink for subtask artifacts. Must tolerate concurrent calls
/// from multiple pipelines; calls for a single subtask are sequential.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Persist one artifact and return its locator.
    async fn persist(&self, kind: ArtifactKind, name: &str, bytes: Bytes) -> StageResult<String>;
}

/// Filesystem-backed artifact store writing under a result directory.
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn persist(&self, kind: ArtifactKind, name: &str, bytes: Bytes) -> StageResult<String> {
        let filename = format!("{}.{}", name, kind.extension());
        let path = self.root.join(&filename);

        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::write(&path, &bytes).await?;

        tracing::debug!(
            "Persisted {} artifact {} ({} bytes)",
            kind.extension(),
            path.display(),
            bytes.len()
        );

        path.to_str()
            .map(String::from)
            .ok_or_else(|| StageError::Persistence(format!("non-utf8 path: {}", path.display())))
    }
}

//! Scripted collaborators for pipeline and scheduler tests.
//!
//! Directive words in a subtask description steer the mock engine:
//! - `hang`       : the execution never returns (slept away until aborted)
//! - `empty`      : the query runs but yields zero rows
//! - `fail-once`  : the first attempt fails, the refined attempt succeeds
//! - `fail-twice` : both attempts fail, with two different reasons
//!
//! Anything else succeeds on the first attempt. The mock synthesizer and
//! refiner thread the description through the generated SQL so the engine
//! can see it.

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{ChartDeriver, QueryRefiner, QuerySynthesizer, SynthesizedQuery};
use crate::artifacts::{ArtifactKind, ArtifactStore};
use crate::engine::{AbortScope, QueryEngine, QueryOutcome, TableData};
use crate::error::{StageError, StageResult};
use crate::pipeline::Stages;

pub(crate) const FIRST_REASON: &str = "unknown column x";
pub(crate) const SECOND_REASON: &str = "table not found";

pub(crate) fn sample_table() -> TableData {
    TableData {
        columns: vec!["day".into(), "volume".into()],
        rows: vec![
            json!({"day": "2024-01-01", "volume": 10.0}),
            json!({"day": "2024-01-02", "volume": 12.5}),
        ],
    }
}

#[derive(Default)]
pub(crate) struct MockSynthesizer {
    pub calls: AtomicUsize,
}

#[async_trait]
impl QuerySynthesizer for MockSynthesizer {
    async fn synthesize(&self, description: &str) -> StageResult<SynthesizedQuery> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if description.contains("synth-error") {
            return Err(StageError::Synthesis("no viable table".into()));
        }
        Ok(SynthesizedQuery {
            sql: format!("SELECT 1 -- {}", description),
            artifact_name: "mock_results.csv".into(),
        })
    }
}

#[derive(Default)]
pub(crate) struct MockRefiner {
    pub calls: AtomicUsize,
}

#[async_trait]
impl QueryRefiner for MockRefiner {
    async fn refine(
        &self,
        description: &str,
        _failed_sql: &str,
        _reason: &str,
    ) -> StageResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if description.contains("refine-error") {
            return Err(StageError::Refinement("no better idea".into()));
        }
        Ok(format!("SELECT 2 -- refined {}", description))
    }
}

#[derive(Default)]
pub(crate) struct MockEngine {
    pub calls: AtomicUsize,
    pub aborted: Mutex<Vec<String>>,
    next_handle: AtomicUsize,
}

#[async_trait]
impl QueryEngine for MockEngine {
    async fn execute(&self, sql: &str, scope: &AbortScope) -> QueryOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let refined = sql.contains("refined");

        if sql.contains("hang") {
            let handle = format!("exec-{}", self.next_handle.fetch_add(1, Ordering::SeqCst));
            scope.register(handle.clone());
            tokio::time::sleep(Duration::from_secs(3600)).await;
            scope.unregister(&handle);
            return QueryOutcome::Failed("hung execution woke up".into());
        }
        if sql.contains("fail-twice") {
            let reason = if refined { SECOND_REASON } else { FIRST_REASON };
            return QueryOutcome::Failed(reason.into());
        }
        if sql.contains("fail-once") && !refined {
            return QueryOutcome::Failed(FIRST_REASON.into());
        }
        if sql.contains("empty") {
            return QueryOutcome::Empty;
        }
        QueryOutcome::from_table(sample_table())
    }

    async fn abort_scope(&self, scope: &AbortScope) {
        let mut aborted = self.aborted.lock().unwrap();
        aborted.extend(scope.drain());
    }
}

#[derive(Default)]
pub(crate) struct MockDeriver {
    pub calls: AtomicUsize,
}

#[async_trait]
impl ChartDeriver for MockDeriver {
    async fn derive(
        &self,
        _table: &TableData,
        description: &str,
        _artifact_name: &str,
    ) -> StageResult<Bytes> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if description.contains("derive-error") {
            return Err(StageError::Derivation("bad chart".into()));
        }
        Ok(Bytes::from_static(b"function GeneratedViz() {}"))
    }
}

#[derive(Default)]
pub(crate) struct MockStore {
    pub persisted: Mutex<Vec<(ArtifactKind, String)>>,
}

#[async_trait]
impl ArtifactStore for MockStore {
    async fn persist(&self, kind: ArtifactKind, name: &str, _bytes: Bytes) -> StageResult<String> {
        self.persisted.lock().unwrap().push((kind, name.to_string()));
        Ok(format!("mem://{}.{}", name, kind.extension()))
    }
}

/// Handles onto the individual mocks for assertions.
pub(crate) struct MockHandles {
    pub synthesizer: Arc<MockSynthesizer>,
    pub engine: Arc<MockEngine>,
    pub refiner: Arc<MockRefiner>,
    pub deriver: Arc<MockDeriver>,
    pub store: Arc<MockStore>,
}

/// A full stage bundle backed by mocks.
pub(crate) fn mock_stages() -> (Stages, MockHandles) {
    let handles = MockHandles {
        synthesizer: Arc::new(MockSynthesizer::default()),
        engine: Arc::new(MockEngine::default()),
        refiner: Arc::new(MockRefiner::default()),
        deriver: Arc::new(MockDeriver::default()),
        store: Arc::new(MockStore::default()),
    };
    let stages = Stages {
        synthesizer: handles.synthesizer.clone(),
        engine: handles.engine.clone(),
        refiner: handles.refiner.clone(),
        deriver: handles.deriver.clone(),
        store: handles.store.clone(),
    };
    (stages, handles)
}

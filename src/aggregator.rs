//! Result aggregator - write-once collection of subtask outcomes.
//!
//! The aggregator is the authoritative guard against duplicate outcomes:
//! completion signals may fire more than once for the same pipeline, but
//! only the first write per subtask id survives. Emission order is
//! first-write (completion) order, not submission order.

use std::collections::HashMap;

use crate::task::{BatchResult, SubtaskId, SubtaskOutcome};

#[derive(Debug, Default)]
pub struct ResultAggregator {
    order: Vec<SubtaskId>,
    outcomes: HashMap<SubtaskId, SubtaskOutcome>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an outcome. A second write for the same subtask id is
    /// discarded with a warning; the first write wins.
    pub fn record(&mut self, outcome: SubtaskOutcome) -> bool {
        if self.outcomes.contains_key(&outcome.subtask_id) {
            tracing::warn!(
                "Discarding duplicate outcome for subtask {} ({})",
                outcome.subtask_id,
                outcome.state.label()
            );
            return false;
        }
        self.order.push(outcome.subtask_id);
        self.outcomes.insert(outcome.subtask_id, outcome);
        true
    }

    pub fn contains(&self, id: SubtaskId) -> bool {
        self.outcomes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Consume the aggregator into the final batch result, in first-write
    /// order.
    pub fn into_result(mut self) -> BatchResult {
        let outcomes = self
            .order
            .iter()
            .filter_map(|id| self.outcomes.remove(id))
            .collect();
        BatchResult::new(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{OutcomeState, Subtask};

    fn outcome(subtask: &Subtask, state: OutcomeState) -> SubtaskOutcome {
        SubtaskOutcome::new(subtask, state)
    }

    #[test]
    fn test_first_write_wins() {
        let subtask = Subtask::new("a");
        let mut agg = ResultAggregator::new();

        assert!(agg.record(outcome(&subtask, OutcomeState::NoData)));
        assert!(!agg.record(outcome(
            &subtask,
            OutcomeState::Failed {
                reason: "late".into()
            }
        )));

        let result = agg.into_result();
        assert_eq!(result.len(), 1);
        assert_eq!(result.outcomes[0].state, OutcomeState::NoData);
    }

    #[test]
    fn test_completion_order_preserved() {
        let a = Subtask::new("a");
        let b = Subtask::new("b");
        let c = Subtask::new("c");

        let mut agg = ResultAggregator::new();
        // Completion order differs from any submission order on purpose.
        agg.record(outcome(&c, OutcomeState::NoData));
        agg.record(outcome(&a, OutcomeState::NoData));
        agg.record(outcome(&b, OutcomeState::TimedOut));

        let result = agg.into_result();
        let ids: Vec<_> = result.outcomes.iter().map(|o| o.subtask_id).collect();
        assert_eq!(ids, vec![c.id, a.id, b.id]);
    }

    #[test]
    fn test_no_duplicate_ids_in_result() {
        let subtask = Subtask::new("a");
        let mut agg = ResultAggregator::new();
        for _ in 0..3 {
            agg.record(outcome(&subtask, OutcomeState::TimedOut));
        }
        assert_eq!(agg.into_result().len(), 1);
    }
}

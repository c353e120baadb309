//! Results-store boundary used by the evaluator actor.
//!
//! Persistence of evaluation metrics is an external collaborator; the
//! in-memory implementation here backs tests and local runs.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use fedmesh_wire::ModelWeights;
use serde::Serialize;
use serde_json::Value;

/// One recorded aggregation result, keyed by round index when known.
#[derive(Debug, Clone, Serialize)]
pub struct RoundResult {
    pub round_idx: Option<u32>,
    pub weights: ModelWeights,
    pub recorded_at: DateTime<Utc>,
}

/// Sink for per-round global models.
pub trait ResultsStore: Send + Sync {
    fn record(&self, result: RoundResult);

    /// A JSON summary of everything recorded, for `EvalReport`.
    fn summary(&self) -> Value;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct InMemoryResultsStore {
    rounds: Mutex<Vec<RoundResult>>,
}

impl InMemoryResultsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> Option<RoundResult> {
        self.rounds.lock().unwrap().last().cloned()
    }
}

impl ResultsStore for InMemoryResultsStore {
    fn record(&self, result: RoundResult) {
        self.rounds.lock().unwrap().push(result);
    }

    fn summary(&self) -> Value {
        let rounds = self.rounds.lock().unwrap();
        serde_json::to_value(&*rounds).unwrap_or(Value::Null)
    }

    fn len(&self) -> usize {
        self.rounds.lock().unwrap().len()
    }
}

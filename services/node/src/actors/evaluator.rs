//! Evaluator boundary actor.
//!
//! Metric computation and playoff simulation are external collaborators;
//! this actor records every published global model into the results store
//! and answers evaluation requests from what has been recorded.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use fedmesh_runtime::{Actor, ActorContext, ActorError};
use fedmesh_wire::{Message, ModelWeights};
use tracing::{debug, info};

use crate::results::{ResultsStore, RoundResult};

/// Records global models and serves `EvalRequest`s.
pub struct EvaluatorActor {
    store: Arc<dyn ResultsStore>,
}

impl EvaluatorActor {
    pub fn new(store: Arc<dyn ResultsStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Actor for EvaluatorActor {
    async fn on_start(&mut self, ctx: &mut ActorContext) -> Result<(), ActorError> {
        info!(actor = ctx.name(), "evaluator ready");
        Ok(())
    }

    async fn handle(&mut self, msg: Message, ctx: &mut ActorContext) -> Result<(), ActorError> {
        match msg {
            Message::GlobalModel {
                coef,
                intercept,
                round_idx,
            } => {
                info!(
                    actor = ctx.name(),
                    round_idx,
                    width = coef.len(),
                    "recording global model"
                );
                self.store.record(RoundResult {
                    round_idx,
                    weights: ModelWeights::new(coef, intercept),
                    recorded_at: Utc::now(),
                });
            }
            Message::EvalRequest {
                reply_to,
                round_idx,
                best_of,
                ..
            } => {
                info!(
                    actor = ctx.name(),
                    round_idx,
                    best_of,
                    recorded = self.store.len(),
                    "evaluation requested"
                );
                if let Some(reply_to) = reply_to {
                    ctx.tell(
                        &reply_to,
                        Message::EvalReport {
                            results: self.store.summary(),
                        },
                    )
                    .await;
                }
            }
            Message::EvalReport { results } => {
                debug!(actor = ctx.name(), results = %results, "eval report received");
            }
            other => {
                debug!(actor = ctx.name(), kind = other.kind(), "ignored");
            }
        }
        Ok(())
    }
}

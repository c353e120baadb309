//! Training worker: pulls team assignments and ships model shares.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use fedmesh_runtime::{Actor, ActorContext, ActorError};
use fedmesh_wire::{Message, ModelWeights};
use tracing::{debug, info, warn};

use crate::training::{DatasetProvider, Trainer};

/// Continuous-pull worker: register, pull, train, share, repeat.
pub struct WorkerActor {
    scheduler: String,
    aggregator: String,
    trainer: Arc<dyn Trainer>,
    dataset: Arc<dyn DatasetProvider>,
    fedprox_mu: f64,
    global: Option<ModelWeights>,
}

impl WorkerActor {
    pub fn new(
        scheduler: impl Into<String>,
        aggregator: impl Into<String>,
        trainer: Arc<dyn Trainer>,
        dataset: Arc<dyn DatasetProvider>,
        fedprox_mu: f64,
    ) -> Self {
        Self {
            scheduler: scheduler.into(),
            aggregator: aggregator.into(),
            trainer,
            dataset,
            fedprox_mu,
            global: None,
        }
    }

    /// Close out an assignment and immediately pull the next one.
    async fn finish_assignment(&self, ctx: &ActorContext) {
        let worker = ctx.name().to_string();
        ctx.tell(
            &self.scheduler,
            Message::WorkDone {
                worker: worker.clone(),
            },
        )
        .await;
        ctx.tell(&self.scheduler, Message::GiveMeWork { worker }).await;
    }

    async fn handle_assignment(&mut self, team: String, ctx: &mut ActorContext) {
        info!(actor = ctx.name(), team = %team, "got work");

        let Some(slice) = self.dataset.team_slice(&team) else {
            warn!(actor = ctx.name(), team = %team, "no local data for team");
            self.finish_assignment(ctx).await;
            return;
        };
        if slice.class_count() < 2 {
            info!(actor = ctx.name(), team = %team, "single-class slice; skipping");
            self.finish_assignment(ctx).await;
            return;
        }

        let weights = match (&self.global, self.fedprox_mu > 0.0) {
            (Some(reference), true) => {
                self.trainer.fit_fedprox(&slice, self.fedprox_mu, reference)
            }
            _ => self.trainer.fit(&slice),
        };

        ctx.tell(
            &self.aggregator,
            Message::ModelShare {
                sender: team,
                coef: weights.coef,
                intercept: weights.intercept,
                version: None,
                ts_ms: Some(Utc::now().timestamp_millis()),
            },
        )
        .await;

        self.finish_assignment(ctx).await;
    }
}

#[async_trait]
impl Actor for WorkerActor {
    async fn on_start(&mut self, ctx: &mut ActorContext) -> Result<(), ActorError> {
        let worker = ctx.name().to_string();
        let (host, port) = match ctx.system().local_addr() {
            Some(addr) => (addr.ip().to_string(), addr.port()),
            None => ("127.0.0.1".to_string(), 0),
        };
        ctx.tell(
            &self.scheduler,
            Message::RegisterWorker {
                worker: worker.clone(),
                host,
                port,
            },
        )
        .await;
        ctx.tell(&self.scheduler, Message::GiveMeWork { worker }).await;
        Ok(())
    }

    async fn handle(&mut self, msg: Message, ctx: &mut ActorContext) -> Result<(), ActorError> {
        match msg {
            Message::HealthPing { monitor_name } => {
                ctx.tell(
                    &monitor_name,
                    Message::HealthAck {
                        actor_name: ctx.name().to_string(),
                    },
                )
                .await;
            }
            Message::CrashMe => {
                return Err(ActorError::Crashed("simulated crash".into()));
            }
            Message::SetGlobalModel { coef, intercept } => {
                debug!(actor = ctx.name(), "global model updated");
                self.global = Some(ModelWeights::new(coef, intercept));
            }
            Message::AssignTeam { team_name } => {
                self.handle_assignment(team_name, ctx).await;
            }
            Message::NoMoreWork => {
                info!(actor = ctx.name(), "no more work; idling");
            }
            other => {
                debug!(actor = ctx.name(), kind = other.kind(), "ignored");
            }
        }
        Ok(())
    }
}

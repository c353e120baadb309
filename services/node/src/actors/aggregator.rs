//! Aggregation actors: the provider-mode team node and fan-out
//! aggregator, and the scheduler-round share aggregator.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use fedmesh_runtime::{Actor, ActorContext, ActorError};
use fedmesh_wire::{Message, ModelWeights};
use tracing::{debug, info, warn};

use crate::aggregate;
use crate::training::{DatasetProvider, Trainer};

/// Cluster id used for shares whose sender has no cluster assignment.
const UNCLUSTERED: &str = "unclustered";

// =============================================================================
// Team Node (provider mode)
// =============================================================================

/// Team node lifecycle.
///
/// ```text
/// Idle -> Training -> Finished
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeamNodePhase {
    Idle,
    Training,
    Finished,
}

/// One data-owning team in provider mode: trains once on request and
/// reports its update to the fan-out aggregator.
pub struct TeamNodeActor {
    aggregator: String,
    team: String,
    trainer: Arc<dyn Trainer>,
    dataset: Arc<dyn DatasetProvider>,
    phase: TeamNodePhase,
}

impl TeamNodeActor {
    pub fn new(
        aggregator: impl Into<String>,
        team: impl Into<String>,
        trainer: Arc<dyn Trainer>,
        dataset: Arc<dyn DatasetProvider>,
    ) -> Self {
        Self {
            aggregator: aggregator.into(),
            team: team.into(),
            trainer,
            dataset,
            phase: TeamNodePhase::Idle,
        }
    }

    pub fn phase(&self) -> TeamNodePhase {
        self.phase
    }
}

#[async_trait]
impl Actor for TeamNodeActor {
    async fn on_start(&mut self, ctx: &mut ActorContext) -> Result<(), ActorError> {
        let (host, port) = match ctx.system().local_addr() {
            Some(addr) => (addr.ip().to_string(), addr.port()),
            None => ("127.0.0.1".to_string(), 0),
        };
        ctx.tell(
            &self.aggregator,
            Message::RegisterTeam {
                team: ctx.name().to_string(),
                host,
                port,
            },
        )
        .await;
        info!(actor = ctx.name(), team = %self.team, "team node ready (idle)");
        Ok(())
    }

    async fn handle(&mut self, msg: Message, ctx: &mut ActorContext) -> Result<(), ActorError> {
        match (self.phase, msg) {
            (TeamNodePhase::Idle, Message::TrainRequest) => {
                self.phase = TeamNodePhase::Training;
                info!(actor = ctx.name(), "training");

                let Some(slice) = self.dataset.team_slice(&self.team) else {
                    warn!(actor = ctx.name(), team = %self.team, "no data; staying idle");
                    self.phase = TeamNodePhase::Idle;
                    return Ok(());
                };
                let weights = self.trainer.fit(&slice);

                self.phase = TeamNodePhase::Finished;
                info!(actor = ctx.name(), "finished training");
                ctx.tell(
                    &self.aggregator,
                    Message::ModelUpdate {
                        coef: weights.coef,
                        intercept: weights.intercept,
                    },
                )
                .await;
            }
            (TeamNodePhase::Finished, msg) => {
                debug!(actor = ctx.name(), kind = msg.kind(), "finished; ignoring");
            }
            (_, other) => {
                debug!(actor = ctx.name(), kind = other.kind(), "ignored");
            }
        }
        Ok(())
    }
}

// =============================================================================
// Fan-out aggregator (provider mode)
// =============================================================================

/// Drives registered team nodes through one training pass and averages
/// their updates.
pub struct UpdateAggregatorActor {
    evaluator: String,
    counter: String,
    team_count: usize,
    registered: BTreeSet<String>,
    received: Vec<ModelWeights>,
    expected: Option<usize>,
}

impl UpdateAggregatorActor {
    /// `team_count` of zero means "expect one update per registered team".
    pub fn new(evaluator: impl Into<String>, counter: impl Into<String>, team_count: usize) -> Self {
        Self {
            evaluator: evaluator.into(),
            counter: counter.into(),
            team_count,
            registered: BTreeSet::new(),
            received: Vec::new(),
            expected: None,
        }
    }
}

#[async_trait]
impl Actor for UpdateAggregatorActor {
    async fn on_start(&mut self, ctx: &mut ActorContext) -> Result<(), ActorError> {
        info!(actor = ctx.name(), "waiting for team updates");
        Ok(())
    }

    async fn handle(&mut self, msg: Message, ctx: &mut ActorContext) -> Result<(), ActorError> {
        match msg {
            Message::RegisterTeam { team, host, port } => {
                ctx.system().register_peer(&team, &host, port, None).await;
                info!(actor = ctx.name(), team = %team, host = %host, port, "team registered");
                self.registered.insert(team);
            }
            Message::TrainRequest => {
                self.expected = Some(if self.team_count > 0 {
                    self.team_count
                } else {
                    self.registered.len()
                });
                self.received.clear();
                info!(
                    actor = ctx.name(),
                    teams = self.registered.len(),
                    expected = self.expected,
                    "fanning out train requests"
                );
                for team in self.registered.clone() {
                    ctx.tell(&team, Message::TrainRequest).await;
                }
            }
            Message::ModelUpdate { coef, intercept } => {
                self.received.push(ModelWeights::new(coef, intercept));
                let expected = self.expected.unwrap_or(self.team_count);
                if expected > 0 && self.received.len() >= expected {
                    let Some(global) = aggregate::mean(&self.received) else {
                        return Ok(());
                    };
                    info!(
                        actor = ctx.name(),
                        received = self.received.len(),
                        "publishing global model"
                    );
                    ctx.tell(&self.counter, Message::Increment).await;
                    ctx.tell(
                        &self.evaluator,
                        Message::GlobalModel {
                            coef: global.coef,
                            intercept: global.intercept,
                            round_idx: None,
                        },
                    )
                    .await;
                    self.received.clear();
                    self.expected = None;
                }
            }
            other => {
                debug!(actor = ctx.name(), kind = other.kind(), "ignored");
            }
        }
        Ok(())
    }
}

// =============================================================================
// Share aggregator (scheduler rounds)
// =============================================================================

/// Collects per-team `ModelShare`s for the current round and aggregates on
/// `RoundComplete` (FedAvg, optional FedProx blend, optional per-cluster
/// partitioning) or `AllDone` (plain FedAvg).
pub struct ShareAggregatorActor {
    scheduler: String,
    evaluator: String,
    counter: String,
    collected: BTreeMap<String, ModelWeights>,
    last_global: Option<ModelWeights>,
    last_cluster: BTreeMap<String, ModelWeights>,
    team_clusters: BTreeMap<String, String>,
}

impl ShareAggregatorActor {
    pub fn new(
        scheduler: impl Into<String>,
        evaluator: impl Into<String>,
        counter: impl Into<String>,
    ) -> Self {
        Self {
            scheduler: scheduler.into(),
            evaluator: evaluator.into(),
            counter: counter.into(),
            collected: BTreeMap::new(),
            last_global: None,
            last_cluster: BTreeMap::new(),
            team_clusters: BTreeMap::new(),
        }
    }

    async fn finalize(&mut self, round_idx: Option<u32>, mu: f64, ctx: &mut ActorContext) {
        if self.collected.is_empty() {
            warn!(actor = ctx.name(), round_idx, "no shares collected; nothing to aggregate");
            return;
        }

        let global = if self.team_clusters.is_empty() {
            self.finalize_flat(mu)
        } else {
            self.finalize_clustered(mu, ctx).await
        };
        let Some(global) = global else {
            self.collected.clear();
            return;
        };

        ctx.tell(&self.counter, Message::Increment).await;
        ctx.tell(
            &self.evaluator,
            Message::GlobalModel {
                coef: global.coef.clone(),
                intercept: global.intercept,
                round_idx,
            },
        )
        .await;
        if self.team_clusters.is_empty() {
            ctx.tell(
                &self.scheduler,
                Message::SetGlobalModel {
                    coef: global.coef.clone(),
                    intercept: global.intercept,
                },
            )
            .await;
        }
        info!(
            actor = ctx.name(),
            round_idx,
            shares = self.collected.len(),
            "published global model"
        );

        self.last_global = Some(global);
        self.collected.clear();
    }

    /// FedAvg over every share, blended toward the last global when a
    /// proximal coefficient is in play.
    fn finalize_flat(&mut self, mu: f64) -> Option<ModelWeights> {
        let shares: Vec<ModelWeights> = self.collected.values().cloned().collect();
        let avg = aggregate::mean(&shares)?;
        Some(match (&self.last_global, mu > 0.0) {
            (Some(previous), true) => aggregate::blend(&avg, previous, mu),
            _ => avg,
        })
    }

    /// Partition shares by cluster, aggregate each independently, publish
    /// the per-cluster models, and return the mean of cluster means.
    async fn finalize_clustered(
        &mut self,
        mu: f64,
        ctx: &mut ActorContext,
    ) -> Option<ModelWeights> {
        let mut by_cluster: BTreeMap<String, Vec<ModelWeights>> = BTreeMap::new();
        for (sender, weights) in &self.collected {
            let cluster = self
                .team_clusters
                .get(sender)
                .cloned()
                .unwrap_or_else(|| UNCLUSTERED.to_string());
            by_cluster.entry(cluster).or_default().push(weights.clone());
        }

        let mut cluster_models: BTreeMap<String, ModelWeights> = BTreeMap::new();
        for (cluster, shares) in by_cluster {
            let avg = aggregate::mean(&shares)?;
            let model = match (self.last_cluster.get(&cluster), mu > 0.0) {
                (Some(previous), true) => aggregate::blend(&avg, previous, mu),
                _ => avg,
            };
            cluster_models.insert(cluster, model);
        }

        ctx.tell(&self.scheduler, Message::SetClusterModels(cluster_models.clone()))
            .await;

        let means: Vec<ModelWeights> = cluster_models.values().cloned().collect();
        let global = aggregate::mean(&means)?;
        self.last_cluster = cluster_models;
        Some(global)
    }
}

#[async_trait]
impl Actor for ShareAggregatorActor {
    async fn on_start(&mut self, ctx: &mut ActorContext) -> Result<(), ActorError> {
        info!(actor = ctx.name(), "ready for model shares");
        Ok(())
    }

    async fn handle(&mut self, msg: Message, ctx: &mut ActorContext) -> Result<(), ActorError> {
        match msg {
            Message::ModelShare {
                sender,
                coef,
                intercept,
                ..
            } => {
                self.collected.insert(sender, ModelWeights::new(coef, intercept));
            }
            Message::SetTeamClusters { mapping } => {
                info!(actor = ctx.name(), teams = mapping.len(), "team clusters set");
                self.team_clusters = mapping;
            }
            Message::RoundComplete {
                round_idx,
                total_rounds,
                fedprox_mu,
            } => {
                debug!(
                    actor = ctx.name(),
                    round_idx, total_rounds, fedprox_mu, "round complete"
                );
                self.finalize(Some(round_idx), fedprox_mu, ctx).await;
            }
            Message::AllDone => {
                self.finalize(None, 0.0, ctx).await;
            }
            other => {
                debug!(actor = ctx.name(), kind = other.kind(), "ignored");
            }
        }
        Ok(())
    }
}

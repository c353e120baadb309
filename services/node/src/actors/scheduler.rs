//! Scheduler: pull-based task distribution with a round barrier.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use async_trait::async_trait;
use fedmesh_runtime::{Actor, ActorContext, ActorError};
use fedmesh_wire::{Message, ModelWeights};
use tracing::{debug, info};

/// How teams are handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulingMode {
    /// Pull queue with a round barrier: a round completes only when the
    /// queue is drained and no assignment is in flight.
    Barrier,
    /// Rotating assignment by index, no barrier, no round bookkeeping.
    /// Attaches the team's cluster model to the assignment when known.
    RoundRobin,
}

/// Hands teams to pulling workers and signals the aggregator at each
/// round barrier.
pub struct SchedulerActor {
    aggregator: String,
    mode: SchedulingMode,
    all_teams: Vec<String>,
    queue: VecDeque<String>,
    active_requests: usize,
    current_round: u32,
    total_rounds: u32,
    fedprox_mu: f64,
    round_open: bool,
    workers: BTreeSet<String>,
    team_clusters: BTreeMap<String, String>,
    cluster_models: BTreeMap<String, ModelWeights>,
    next_index: usize,
}

impl SchedulerActor {
    pub fn new(
        aggregator: impl Into<String>,
        teams: Vec<String>,
        rounds: u32,
        fedprox_mu: f64,
        mode: SchedulingMode,
    ) -> Self {
        Self {
            aggregator: aggregator.into(),
            mode,
            queue: teams.iter().cloned().collect(),
            all_teams: teams,
            active_requests: 0,
            current_round: 1,
            total_rounds: rounds.max(1),
            fedprox_mu,
            round_open: true,
            workers: BTreeSet::new(),
            team_clusters: BTreeMap::new(),
            cluster_models: BTreeMap::new(),
            next_index: 0,
        }
    }

    async fn handle_give_me_work(&mut self, worker: String, ctx: &mut ActorContext) {
        match self.mode {
            SchedulingMode::Barrier => {
                if let Some(team) = self.queue.pop_front() {
                    self.active_requests += 1;
                    info!(
                        actor = ctx.name(),
                        team = %team,
                        worker = %worker,
                        in_flight = self.active_requests,
                        "assigned team"
                    );
                    ctx.tell(&worker, Message::AssignTeam { team_name: team }).await;
                } else {
                    debug!(actor = ctx.name(), worker = %worker, "queue empty");
                    ctx.tell(&worker, Message::NoMoreWork).await;
                    self.maybe_finish_round(ctx).await;
                }
            }
            SchedulingMode::RoundRobin => {
                if self.all_teams.is_empty() {
                    ctx.tell(&worker, Message::NoMoreWork).await;
                    return;
                }
                let team = self.all_teams[self.next_index % self.all_teams.len()].clone();
                self.next_index += 1;
                if let Some(model) = self
                    .team_clusters
                    .get(&team)
                    .and_then(|cluster| self.cluster_models.get(cluster))
                {
                    ctx.tell(
                        &worker,
                        Message::SetGlobalModel {
                            coef: model.coef.clone(),
                            intercept: model.intercept,
                        },
                    )
                    .await;
                }
                debug!(actor = ctx.name(), team = %team, worker = %worker, "rotating assignment");
                ctx.tell(&worker, Message::AssignTeam { team_name: team }).await;
            }
        }
    }

    /// Barrier check: the round ends when the queue is drained and nothing
    /// is in flight. Emits exactly one `RoundComplete` per round.
    async fn maybe_finish_round(&mut self, ctx: &mut ActorContext) {
        if self.mode != SchedulingMode::Barrier
            || !self.round_open
            || !self.queue.is_empty()
            || self.active_requests != 0
        {
            return;
        }

        self.round_open = false;
        info!(
            actor = ctx.name(),
            round = self.current_round,
            total = self.total_rounds,
            "round complete"
        );
        ctx.tell(
            &self.aggregator,
            Message::RoundComplete {
                round_idx: self.current_round,
                total_rounds: self.total_rounds,
                fedprox_mu: self.fedprox_mu,
            },
        )
        .await;

        if self.current_round < self.total_rounds {
            self.current_round += 1;
            self.queue = self.all_teams.iter().cloned().collect();
            self.round_open = true;
            info!(actor = ctx.name(), round = self.current_round, "starting next round");
            // Kick every registered worker by re-queueing their pulls.
            let own_name = ctx.name().to_string();
            for worker in self.workers.clone() {
                ctx.tell(&own_name, Message::GiveMeWork { worker }).await;
            }
        } else {
            info!(actor = ctx.name(), "all rounds finished");
        }
    }
}

#[async_trait]
impl Actor for SchedulerActor {
    async fn on_start(&mut self, ctx: &mut ActorContext) -> Result<(), ActorError> {
        info!(
            actor = ctx.name(),
            teams = self.all_teams.len(),
            rounds = self.total_rounds,
            mode = ?self.mode,
            "scheduler ready"
        );
        Ok(())
    }

    async fn handle(&mut self, msg: Message, ctx: &mut ActorContext) -> Result<(), ActorError> {
        match msg {
            Message::RegisterWorker { worker, host, port } => {
                ctx.system().register_peer(&worker, &host, port, None).await;
                info!(actor = ctx.name(), worker = %worker, host = %host, port, "worker registered");
                self.workers.insert(worker);
            }
            Message::GiveMeWork { worker } => {
                self.handle_give_me_work(worker, ctx).await;
            }
            Message::WorkDone { worker } => {
                debug!(actor = ctx.name(), worker = %worker, "work done");
                self.active_requests = self.active_requests.saturating_sub(1);
                self.maybe_finish_round(ctx).await;
            }
            Message::SetGlobalModel { coef, intercept } => {
                // Fan the aggregator's model out to every worker, in
                // sorted order.
                for worker in &self.workers {
                    ctx.tell(
                        worker,
                        Message::SetGlobalModel {
                            coef: coef.clone(),
                            intercept,
                        },
                    )
                    .await;
                }
            }
            Message::SetClusterModels(models) => {
                debug!(actor = ctx.name(), clusters = models.len(), "cluster models updated");
                self.cluster_models = models;
            }
            Message::SetTeamClusters { mapping } => {
                info!(actor = ctx.name(), teams = mapping.len(), "team clusters set");
                self.team_clusters = mapping;
            }
            other => {
                debug!(actor = ctx.name(), kind = other.kind(), "ignored");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use fedmesh_runtime::{ActorSystem, SystemConfig, TransportKind};

    use super::*;
    use crate::probe::{await_until, count_matching, ProbeActor};

    fn teams() -> Vec<String> {
        vec!["ATL".into(), "BOS".into(), "MIA".into()]
    }

    fn local_system() -> std::sync::Arc<ActorSystem> {
        ActorSystem::new(SystemConfig::new("127.0.0.1", 0, TransportKind::Stream))
    }

    #[tokio::test]
    async fn drains_queue_then_replies_no_more_work() {
        let system = local_system();
        let (probe, log) = ProbeActor::new();
        system.create_actor("w1", probe).await;
        system
            .create_actor(
                "scheduler",
                SchedulerActor::new("agg", teams(), 1, 0.0, SchedulingMode::Barrier),
            )
            .await;

        for _ in 0..4 {
            system
                .tell("scheduler", Message::GiveMeWork { worker: "w1".into() })
                .await;
        }

        assert!(
            await_until(|| {
                count_matching(&log, |m| matches!(m, Message::AssignTeam { .. })) == 3
                    && count_matching(&log, |m| matches!(m, Message::NoMoreWork)) == 1
            })
            .await
        );
    }

    #[tokio::test]
    async fn round_completes_only_when_drained_and_idle() {
        let system = local_system();
        let (agg, agg_log) = ProbeActor::new();
        let (worker, _worker_log) = ProbeActor::new();
        system.create_actor("agg", agg).await;
        system.create_actor("w1", worker).await;
        system
            .create_actor(
                "scheduler",
                SchedulerActor::new("agg", teams(), 1, 0.0, SchedulingMode::Barrier),
            )
            .await;

        for _ in 0..3 {
            system
                .tell("scheduler", Message::GiveMeWork { worker: "w1".into() })
                .await;
        }
        // Queue drained, but three assignments still in flight.
        system
            .tell("scheduler", Message::GiveMeWork { worker: "w1".into() })
            .await;
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(
            count_matching(&agg_log, |m| matches!(m, Message::RoundComplete { .. })),
            0
        );

        for _ in 0..3 {
            system
                .tell("scheduler", Message::WorkDone { worker: "w1".into() })
                .await;
        }
        assert!(
            await_until(|| {
                count_matching(&agg_log, |m| matches!(m, Message::RoundComplete { .. })) == 1
            })
            .await
        );
    }

    #[tokio::test]
    async fn round_robin_attaches_cluster_model() {
        let system = local_system();
        let (probe, log) = ProbeActor::new();
        system.create_actor("w1", probe).await;

        let mut scheduler =
            SchedulerActor::new("agg", teams(), 1, 0.0, SchedulingMode::RoundRobin);
        scheduler
            .team_clusters
            .insert("ATL".into(), "0".into());
        scheduler
            .cluster_models
            .insert("0".into(), ModelWeights::new(vec![1.0], 0.5));
        system.create_actor("scheduler", scheduler).await;

        // First rotation lands on ATL, which has a cluster model.
        system
            .tell("scheduler", Message::GiveMeWork { worker: "w1".into() })
            .await;

        assert!(
            await_until(|| {
                let log = log.lock().unwrap();
                let set_then_assign = log
                    .iter()
                    .position(|m| matches!(m, Message::SetGlobalModel { .. }))
                    .zip(log.iter().position(|m| matches!(m, Message::AssignTeam { .. })))
                    .map(|(s, a)| s < a)
                    .unwrap_or(false);
                set_then_assign
            })
            .await
        );
    }
}

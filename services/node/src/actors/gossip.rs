//! Gossip node: peer-to-peer model exchange.
//!
//! Two modes:
//!
//! - **Synchronous rounds**: the reporter waits for `PeerReady` from every
//!   peer, broadcasts `StartRound`, and every node retrains, broadcasts
//!   its share, and averages once it holds one share per expected peer.
//!   Only the reporter publishes the mean and advances the round counter.
//! - **Continuous**: every node retrains and broadcasts on a fixed
//!   interval with a strictly increasing per-sender version. The reporter
//!   buffers deduplicated shares and flushes a (optionally
//!   staleness-weighted) average on a batch-size or time-window trigger,
//!   self-terminating on convergence or a hard stop.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use fedmesh_runtime::{Actor, ActorContext, ActorError};
use fedmesh_wire::{Message, ModelWeights};
use tracing::{debug, info, warn};

use crate::aggregate;
use crate::training::{TeamDataset, Trainer};

/// Gossip protocol mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GossipMode {
    SyncRounds,
    Continuous,
}

/// Gossip tuning knobs.
#[derive(Debug, Clone)]
pub struct GossipConfig {
    pub mode: GossipMode,
    pub evaluator: String,
    pub counter: String,
    /// Ask the evaluator for a final report before terminating.
    pub eval_after: bool,

    /// Continuous mode: retrain/broadcast interval.
    pub interval: Duration,
    /// Continuous mode: flush when the buffer reaches this size...
    pub batch_size: usize,
    /// ...or when this much time has passed since the last flush,
    /// whichever happens first.
    pub flush_window: Duration,
    /// Staleness weighting coefficient; `None` disables weighting.
    pub staleness_alpha: Option<f64>,

    /// Convergence: flush-over-flush distance at or below epsilon...
    pub epsilon: f64,
    /// ...for this many consecutive flushes terminates the reporter.
    pub patience: u32,

    /// Hard stops, whichever comes first.
    pub max_flushes: Option<u64>,
    pub max_runtime: Option<Duration>,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            mode: GossipMode::SyncRounds,
            evaluator: "evaluator".to_string(),
            counter: "crdt".to_string(),
            eval_after: false,
            interval: Duration::from_secs(2),
            batch_size: 8,
            flush_window: Duration::from_secs(5),
            staleness_alpha: None,
            epsilon: 1e-4,
            patience: 3,
            max_flushes: None,
            max_runtime: None,
        }
    }
}

struct BufferedShare {
    version: u64,
    weights: ModelWeights,
}

/// One gossip participant.
pub struct GossipNodeActor {
    config: GossipConfig,
    trainer: Arc<dyn Trainer>,
    data: TeamDataset,

    peers: Vec<String>,
    is_reporter: bool,
    reporter_name: Option<String>,
    total_rounds: u32,
    current_round: u32,

    // Synchronous round state.
    collected: BTreeMap<String, ModelWeights>,
    ready: BTreeSet<String>,

    // Continuous-mode state.
    next_version: u64,
    seen: HashMap<String, u64>,
    buffer: Vec<BufferedShare>,
    flush_count: u64,
    last_flush_at: Option<Instant>,
    started_at: Option<Instant>,
    prev_flush: Option<ModelWeights>,
    calm_streak: u32,
    finished: bool,
}

impl GossipNodeActor {
    pub fn new(config: GossipConfig, trainer: Arc<dyn Trainer>, data: TeamDataset) -> Self {
        Self {
            config,
            trainer,
            data,
            peers: Vec::new(),
            is_reporter: false,
            reporter_name: None,
            total_rounds: 1,
            current_round: 0,
            collected: BTreeMap::new(),
            ready: BTreeSet::new(),
            next_version: 1,
            seen: HashMap::new(),
            buffer: Vec::new(),
            flush_count: 0,
            last_flush_at: None,
            started_at: None,
            prev_flush: None,
            calm_streak: 0,
            finished: false,
        }
    }

    fn expected(&self, own_name: &str) -> BTreeSet<String> {
        let mut expected: BTreeSet<String> = self.peers.iter().cloned().collect();
        expected.insert(own_name.to_string());
        expected
    }

    async fn start_next_round(&mut self, ctx: &ActorContext) {
        for peer in &self.peers {
            ctx.tell(peer, Message::StartRound).await;
        }
        ctx.tell(ctx.name(), Message::StartRound).await;
    }

    async fn broadcast_share(&self, ctx: &ActorContext, weights: &ModelWeights, version: Option<u64>) {
        let share = Message::ModelShare {
            sender: ctx.name().to_string(),
            coef: weights.coef.clone(),
            intercept: weights.intercept,
            version,
            ts_ms: Some(Utc::now().timestamp_millis()),
        };
        for peer in &self.peers {
            ctx.tell(peer, share.clone()).await;
        }
    }

    // -------------------------------------------------------------------------
    // Synchronous rounds
    // -------------------------------------------------------------------------

    async fn handle_start_round(&mut self, ctx: &mut ActorContext) {
        let weights = self.trainer.fit(&self.data);
        self.collected.clear();
        self.collected
            .insert(ctx.name().to_string(), weights.clone());
        self.broadcast_share(ctx, &weights, None).await;
        // Degenerate single-node deployment: the barrier is already met.
        self.check_round_barrier(ctx).await;
    }

    async fn handle_sync_share(&mut self, sender: String, weights: ModelWeights, ctx: &mut ActorContext) {
        self.collected.insert(sender, weights);
        self.check_round_barrier(ctx).await;
    }

    async fn check_round_barrier(&mut self, ctx: &mut ActorContext) {
        let expected = self.expected(ctx.name());
        if !expected
            .iter()
            .all(|name| self.collected.contains_key(name))
        {
            return;
        }

        let shares: Vec<ModelWeights> = self.collected.values().cloned().collect();
        let Some(global) = aggregate::mean(&shares) else {
            return;
        };

        if !self.is_reporter {
            debug!(actor = ctx.name(), "computed global locally; reporter publishes");
            return;
        }

        self.current_round += 1;
        info!(
            actor = ctx.name(),
            round = self.current_round,
            total = self.total_rounds,
            "reporter publishing round mean"
        );
        ctx.tell(
            &self.config.evaluator,
            Message::GlobalModel {
                coef: global.coef.clone(),
                intercept: global.intercept,
                round_idx: None,
            },
        )
        .await;
        ctx.tell(&self.config.counter, Message::Increment).await;

        if self.current_round < self.total_rounds {
            self.start_next_round(ctx).await;
        } else if self.config.eval_after {
            ctx.tell(
                &self.config.evaluator,
                Message::EvalRequest {
                    pairs: None,
                    best_of: 7,
                    reply_to: None,
                    round_idx: Some(self.current_round),
                },
            )
            .await;
        }
    }

    // -------------------------------------------------------------------------
    // Continuous mode
    // -------------------------------------------------------------------------

    /// Version gate: accept only versions strictly greater than the last
    /// seen for that sender. Protects against duplicates and reordering,
    /// not gaps.
    fn accept_version(&mut self, sender: &str, version: u64) -> bool {
        let last = self.seen.get(sender).copied().unwrap_or(0);
        if version <= last {
            return false;
        }
        self.seen.insert(sender.to_string(), version);
        true
    }

    async fn handle_continuous_share(
        &mut self,
        sender: String,
        weights: ModelWeights,
        version: Option<u64>,
        ctx: &mut ActorContext,
    ) {
        let Some(version) = version else {
            debug!(actor = ctx.name(), sender = %sender, "unversioned share in continuous mode; dropped");
            return;
        };
        if !self.accept_version(&sender, version) {
            debug!(actor = ctx.name(), sender = %sender, version, "stale or duplicate share; dropped");
            return;
        }
        if self.is_reporter {
            self.buffer.push(BufferedShare { version, weights });
            self.maybe_flush(ctx).await;
        }
    }

    async fn gossip_tick(&mut self, ctx: &mut ActorContext) {
        if self.finished {
            return;
        }

        let weights = self.trainer.fit(&self.data);
        let version = self.next_version;
        self.next_version += 1;
        self.broadcast_share(ctx, &weights, Some(version)).await;
        // The reporter's own shares go through the same gate as everyone
        // else's.
        let own = ctx.name().to_string();
        self.handle_continuous_share(own, weights, Some(version), ctx)
            .await;

        if self.is_reporter && !self.finished {
            self.maybe_flush(ctx).await;
            self.check_hard_stops(ctx).await;
        }
    }

    async fn maybe_flush(&mut self, ctx: &mut ActorContext) {
        if self.finished {
            return;
        }
        let window_base = self.last_flush_at.or(self.started_at);
        let window_due =
            window_base.is_some_and(|base| base.elapsed() >= self.config.flush_window);
        let batch_due = self.buffer.len() >= self.config.batch_size;
        if !batch_due && !window_due {
            return;
        }
        if self.buffer.is_empty() {
            // A window can elapse with nothing buffered; just restart it.
            self.last_flush_at = Some(Instant::now());
            return;
        }
        self.flush(ctx).await;
    }

    async fn flush(&mut self, ctx: &mut ActorContext) {
        let max_version = self
            .buffer
            .iter()
            .map(|entry| entry.version)
            .max()
            .unwrap_or(0);
        let weights: Vec<f64> = match self.config.staleness_alpha {
            None => vec![1.0; self.buffer.len()],
            Some(alpha) => self
                .buffer
                .iter()
                .map(|entry| 1.0 / (1.0 + alpha * (max_version - entry.version) as f64))
                .collect(),
        };
        let shares: Vec<ModelWeights> = self
            .buffer
            .iter()
            .map(|entry| entry.weights.clone())
            .collect();
        let Some(global) = aggregate::weighted_mean(&shares, &weights) else {
            self.buffer.clear();
            return;
        };

        self.flush_count += 1;
        self.last_flush_at = Some(Instant::now());
        info!(
            actor = ctx.name(),
            flush = self.flush_count,
            batched = self.buffer.len(),
            max_version,
            "flushing gossip batch"
        );
        self.buffer.clear();

        ctx.tell(
            &self.config.evaluator,
            Message::GlobalModel {
                coef: global.coef.clone(),
                intercept: global.intercept,
                round_idx: None,
            },
        )
        .await;
        ctx.tell(&self.config.counter, Message::Increment).await;

        if let Some(previous) = &self.prev_flush {
            let dist = aggregate::distance(&global, previous);
            if dist <= self.config.epsilon {
                self.calm_streak += 1;
            } else {
                self.calm_streak = 0;
            }
            debug!(
                actor = ctx.name(),
                dist,
                calm_streak = self.calm_streak,
                "convergence check"
            );
            if self.calm_streak >= self.config.patience {
                self.finish(ctx, "converged").await;
            }
        }
        self.prev_flush = Some(global);

        self.check_hard_stops(ctx).await;
    }

    async fn check_hard_stops(&mut self, ctx: &mut ActorContext) {
        if self.finished {
            return;
        }
        if let Some(max_flushes) = self.config.max_flushes {
            if self.flush_count >= max_flushes {
                self.finish(ctx, "max flushes reached").await;
                return;
            }
        }
        if let (Some(max_runtime), Some(started)) = (self.config.max_runtime, self.started_at) {
            if started.elapsed() >= max_runtime {
                self.finish(ctx, "max runtime reached").await;
            }
        }
    }

    async fn finish(&mut self, ctx: &mut ActorContext, reason: &str) {
        if self.finished {
            return;
        }
        self.finished = true;
        info!(
            actor = ctx.name(),
            reason,
            flushes = self.flush_count,
            "gossip terminating"
        );
        if self.config.eval_after {
            ctx.tell(
                &self.config.evaluator,
                Message::EvalRequest {
                    pairs: None,
                    best_of: 7,
                    reply_to: None,
                    round_idx: None,
                },
            )
            .await;
        }
        ctx.stop_self().await;
    }
}

#[async_trait]
impl Actor for GossipNodeActor {
    async fn on_start(&mut self, ctx: &mut ActorContext) -> Result<(), ActorError> {
        info!(
            actor = ctx.name(),
            rows = self.data.len(),
            mode = ?self.config.mode,
            "gossip node ready"
        );
        Ok(())
    }

    async fn handle(&mut self, msg: Message, ctx: &mut ActorContext) -> Result<(), ActorError> {
        match msg {
            Message::PeerList {
                peers,
                is_reporter,
                reporter_name,
                total_rounds,
            } => {
                self.peers = peers;
                self.is_reporter = is_reporter;
                self.reporter_name = reporter_name;
                self.total_rounds = total_rounds;
                info!(
                    actor = ctx.name(),
                    peers = self.peers.len(),
                    reporter = self.is_reporter,
                    rounds = self.total_rounds,
                    "peer list set"
                );

                match self.config.mode {
                    GossipMode::SyncRounds => {
                        if self.is_reporter {
                            self.ready.insert(ctx.name().to_string());
                            if self.peers.is_empty() {
                                self.start_next_round(ctx).await;
                            }
                        } else {
                            let target = self
                                .reporter_name
                                .clone()
                                .or_else(|| self.peers.first().cloned());
                            match target {
                                Some(reporter) => {
                                    ctx.tell(
                                        &reporter,
                                        Message::PeerReady {
                                            peer_name: ctx.name().to_string(),
                                        },
                                    )
                                    .await;
                                }
                                None => {
                                    warn!(actor = ctx.name(), "no reporter to report readiness to")
                                }
                            }
                        }
                    }
                    GossipMode::Continuous => {
                        self.started_at = Some(Instant::now());
                        ctx.schedule_ticks(self.config.interval).await;
                    }
                }
            }

            Message::PeerReady { peer_name } => {
                if self.is_reporter {
                    self.ready.insert(peer_name);
                    if self.expected(ctx.name()).is_subset(&self.ready) {
                        self.start_next_round(ctx).await;
                    }
                }
            }

            Message::StartRound => {
                if self.config.mode == GossipMode::SyncRounds {
                    self.handle_start_round(ctx).await;
                }
            }

            Message::ModelShare {
                sender,
                coef,
                intercept,
                version,
                ..
            } => {
                let weights = ModelWeights::new(coef, intercept);
                match self.config.mode {
                    GossipMode::SyncRounds => {
                        self.handle_sync_share(sender, weights, ctx).await;
                    }
                    GossipMode::Continuous => {
                        self.handle_continuous_share(sender, weights, version, ctx)
                            .await;
                    }
                }
            }

            other => {
                debug!(actor = ctx.name(), kind = other.kind(), "ignored");
            }
        }
        Ok(())
    }

    async fn on_tick(&mut self, ctx: &mut ActorContext) -> Result<(), ActorError> {
        if self.config.mode == GossipMode::Continuous {
            self.gossip_tick(ctx).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn continuous_node(config: GossipConfig) -> GossipNodeActor {
        GossipNodeActor::new(
            config,
            Arc::new(crate::training::MockTrainer),
            TeamDataset::new(vec![vec![1.0], vec![0.0]], vec![1, 0]),
        )
    }

    #[test]
    fn version_gate_accepts_strictly_increasing() {
        let mut node = continuous_node(GossipConfig {
            mode: GossipMode::Continuous,
            ..GossipConfig::default()
        });
        let accepted: Vec<bool> = [1, 2, 2, 4, 3]
            .iter()
            .map(|v| node.accept_version("p2p_BOS", *v))
            .collect();
        assert_eq!(accepted, vec![true, true, false, true, false]);
    }

    #[test]
    fn version_gate_is_per_sender() {
        let mut node = continuous_node(GossipConfig {
            mode: GossipMode::Continuous,
            ..GossipConfig::default()
        });
        assert!(node.accept_version("a", 5));
        assert!(node.accept_version("b", 1));
        assert!(!node.accept_version("a", 5));
    }

    #[test]
    fn staleness_weights_favor_fresh_versions() {
        // Weight of an entry is 1 / (1 + alpha * (max_v - v)).
        let alpha = 0.5;
        let versions = [4u64, 2u64];
        let max_v = 4u64;
        let weights: Vec<f64> = versions
            .iter()
            .map(|v| 1.0 / (1.0 + alpha * (max_v - v) as f64))
            .collect();
        assert_eq!(weights[0], 1.0);
        assert_eq!(weights[1], 0.5);

        let shares = vec![
            ModelWeights::new(vec![3.0], 0.0),
            ModelWeights::new(vec![0.0], 0.0),
        ];
        let avg = aggregate::weighted_mean(&shares, &weights).unwrap();
        // Normalized weights 2/3 and 1/3.
        assert!((avg.coef[0] - 2.0).abs() < 1e-12);
    }
}

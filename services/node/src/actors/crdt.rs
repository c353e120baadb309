//! Replicated-store actors: PN-counter, LWW map, and the delta replicator.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use fedmesh_runtime::{Actor, ActorContext, ActorError};
use fedmesh_wire::{LwwDelta, LwwEntry, Message};
use serde_json::Value;
use tracing::{debug, info, warn};

// =============================================================================
// PN-Counter
// =============================================================================

/// Grow-only counter pair. Local-only: it counts aggregation rounds on the
/// node that hosts it and carries no merge operator.
#[derive(Debug, Default)]
pub struct PnCounterActor {
    positive: u64,
    negative: u64,
}

impl PnCounterActor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(&self) -> i64 {
        self.positive as i64 - self.negative as i64
    }
}

#[async_trait]
impl Actor for PnCounterActor {
    async fn on_start(&mut self, ctx: &mut ActorContext) -> Result<(), ActorError> {
        info!(actor = ctx.name(), "counter ready");
        Ok(())
    }

    async fn handle(&mut self, msg: Message, ctx: &mut ActorContext) -> Result<(), ActorError> {
        match msg {
            Message::Increment => {
                self.positive += 1;
                debug!(actor = ctx.name(), value = self.value(), "increment");
            }
            Message::Decrement => {
                self.negative += 1;
                debug!(actor = ctx.name(), value = self.value(), "decrement");
            }
            Message::GetValue => {
                info!(actor = ctx.name(), value = self.value(), "counter value");
            }
            other => {
                debug!(actor = ctx.name(), kind = other.kind(), "ignored");
            }
        }
        Ok(())
    }
}

// =============================================================================
// LWW-Map
// =============================================================================

/// Last-write-wins map replica.
///
/// An entry is applied iff `incoming_ts >= stored_ts`; ties favor the most
/// recently applied write, so equal-timestamp conflicts resolve by
/// application order.
pub struct LwwMapActor {
    replicator: String,
    store: BTreeMap<String, (Value, i64)>,
    clock: i64,
}

impl LwwMapActor {
    pub fn new(replicator: impl Into<String>) -> Self {
        Self {
            replicator: replicator.into(),
            store: BTreeMap::new(),
            clock: 0,
        }
    }

    /// Next local timestamp: wall clock nanoseconds, forced monotone.
    fn next_ts(&mut self) -> i64 {
        let now = Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX);
        self.clock = now.max(self.clock + 1);
        self.clock
    }

    fn merge_entry(&mut self, key: &str, value: Value, ts: i64) -> bool {
        match self.store.get(key) {
            Some((_, stored_ts)) if ts < *stored_ts => false,
            // Identical entry: accepting it changes nothing, so merges stay
            // idempotent. A different value at an equal timestamp still
            // wins - last applied write takes the tie.
            Some((stored_value, stored_ts)) if ts == *stored_ts && *stored_value == value => false,
            _ => {
                self.store.insert(key.to_string(), (value, ts));
                true
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&(Value, i64)> {
        self.store.get(key)
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

#[async_trait]
impl Actor for LwwMapActor {
    async fn on_start(&mut self, ctx: &mut ActorContext) -> Result<(), ActorError> {
        info!(actor = ctx.name(), "lww map ready");
        Ok(())
    }

    async fn handle(&mut self, msg: Message, ctx: &mut ActorContext) -> Result<(), ActorError> {
        match msg {
            Message::LwwPut { key, value, ts } => {
                let ts = match ts {
                    Some(ts) => ts,
                    None => self.next_ts(),
                };
                if self.merge_entry(&key, value.clone(), ts) {
                    debug!(actor = ctx.name(), key = %key, ts, "put applied");
                    let mut delta: LwwDelta = BTreeMap::new();
                    delta.insert(key, LwwEntry { value, ts });
                    ctx.tell(&self.replicator, Message::Replicate { delta }).await;
                } else {
                    debug!(actor = ctx.name(), key = %key, ts, "put superseded by newer entry");
                }
            }
            Message::CrdtMerge { delta } => {
                let mut applied = 0;
                for (key, entry) in delta {
                    if self.merge_entry(&key, entry.value, entry.ts) {
                        applied += 1;
                    }
                }
                info!(
                    actor = ctx.name(),
                    applied,
                    size = self.store.len(),
                    "merge applied"
                );
            }
            Message::LwwGet { key } => {
                info!(actor = ctx.name(), key = %key, value = ?self.store.get(&key), "get");
            }
            Message::LwwDump => {
                info!(actor = ctx.name(), size = self.store.len(), store = ?self.store, "dump");
            }
            other => {
                debug!(actor = ctx.name(), kind = other.kind(), "ignored");
            }
        }
        Ok(())
    }
}

// =============================================================================
// Replicator
// =============================================================================

/// Fans locally applied deltas out to remote map replicas and forwards
/// inbound merges to its attached local map. One hop only: loop
/// suppression is the receiving map's idempotent merge rule.
#[derive(Default)]
pub struct ReplicatorActor {
    map_actor: Option<String>,
    peers: Vec<String>,
}

impl ReplicatorActor {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Actor for ReplicatorActor {
    async fn on_start(&mut self, ctx: &mut ActorContext) -> Result<(), ActorError> {
        info!(actor = ctx.name(), "replicator ready");
        Ok(())
    }

    async fn handle(&mut self, msg: Message, ctx: &mut ActorContext) -> Result<(), ActorError> {
        match msg {
            Message::Attach { map_actor_name } => {
                info!(actor = ctx.name(), map = %map_actor_name, "attached to map");
                self.map_actor = Some(map_actor_name);
            }
            Message::AddPeer {
                remote_actor_name,
                host,
                port,
            } => {
                ctx.system()
                    .register_peer(&remote_actor_name, &host, port, None)
                    .await;
                if !self.peers.contains(&remote_actor_name) {
                    self.peers.push(remote_actor_name.clone());
                }
                info!(actor = ctx.name(), peer = %remote_actor_name, host = %host, port, "peer added");
            }
            Message::Replicate { delta } => {
                for peer in &self.peers {
                    ctx.tell(peer, Message::CrdtMerge { delta: delta.clone() }).await;
                }
            }
            Message::CrdtMerge { delta } => match &self.map_actor {
                Some(map) => ctx.tell(map, Message::CrdtMerge { delta }).await,
                None => warn!(actor = ctx.name(), "inbound merge with no attached map; dropped"),
            },
            other => {
                debug!(actor = ctx.name(), kind = other.kind(), "ignored");
            }
        }
        Ok(())
    }
}

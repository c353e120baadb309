//! The process-wide actor system: registry, peer table, and routing.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use fedmesh_wire::{Envelope, Message};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::actor::{run_actor_loop, Actor, ActorContext, Delivery};
use crate::transport::{self, PeerAddr, TransportError, TransportKind};

/// Static configuration of one actor system instance.
#[derive(Debug, Clone)]
pub struct SystemConfig {
    /// Address to listen on. Port 0 binds an ephemeral port.
    pub host: String,
    pub port: u16,

    /// Transport binding, fixed for the process lifetime.
    pub transport: TransportKind,
}

impl SystemConfig {
    pub fn new(host: impl Into<String>, port: u16, transport: TransportKind) -> Self {
        Self {
            host: host.into(),
            port,
            transport,
        }
    }
}

/// Owns the local actor registry and the peer table.
///
/// Both maps are guarded by `RwLock`: any handler may mutate them, but a
/// check and its corresponding update never straddle a suspension point
/// outside the lock.
pub struct ActorSystem {
    config: SystemConfig,
    actors: RwLock<HashMap<String, mpsc::UnboundedSender<Delivery>>>,
    peers: RwLock<HashMap<String, PeerAddr>>,
    local_addr: OnceLock<SocketAddr>,
    http: reqwest::Client,
}

impl ActorSystem {
    pub fn new(config: SystemConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            actors: RwLock::new(HashMap::new()),
            peers: RwLock::new(HashMap::new()),
            local_addr: OnceLock::new(),
            http: reqwest::Client::new(),
        })
    }

    /// The configured transport binding.
    pub fn transport(&self) -> TransportKind {
        self.config.transport
    }

    /// The bound listen address, once [`serve`](Self::serve) has run.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    /// Bind the network listener for the configured transport and start
    /// accepting inbound envelopes.
    pub async fn serve(self: &Arc<Self>) -> Result<SocketAddr, TransportError> {
        let addr = transport::bind(Arc::clone(self), &self.config.host, self.config.port).await?;
        let _ = self.local_addr.set(addr);
        info!(
            addr = %addr,
            transport = ?self.config.transport,
            "actor system listening"
        );
        Ok(addr)
    }

    /// Map a logical actor name to a remote address. The transport kind
    /// defaults to this system's own.
    pub async fn register_peer(
        &self,
        name: &str,
        host: &str,
        port: u16,
        kind: Option<TransportKind>,
    ) {
        let kind = kind.unwrap_or(self.config.transport);
        self.peers.write().await.insert(
            name.to_string(),
            PeerAddr {
                host: host.to_string(),
                port,
                kind,
            },
        );
        debug!(peer = name, host, port, "peer registered");
    }

    /// Register and start an actor under `name`.
    ///
    /// Re-registering an existing name silently replaces the entry;
    /// messages still queued on the old actor are lost.
    pub async fn create_actor<A: Actor>(self: &Arc<Self>, name: &str, actor: A) {
        self.create_boxed_actor(name, Box::new(actor)).await;
    }

    /// Boxed form of [`create_actor`](Self::create_actor), used by the
    /// supervisor's factory-based restarts.
    pub async fn create_boxed_actor(self: &Arc<Self>, name: &str, actor: Box<dyn Actor>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let replaced = self
            .actors
            .write()
            .await
            .insert(name.to_string(), tx)
            .is_some();
        if replaced {
            debug!(actor = name, "registration replaced; old mailbox dropped");
        }
        let ctx = ActorContext::new(name.to_string(), Arc::clone(self));
        tokio::spawn(run_actor_loop(actor, rx, ctx));
        info!(actor = name, "actor spawned");
    }

    /// Whether `name` is currently in the local registry.
    pub async fn is_registered(&self, name: &str) -> bool {
        self.actors.read().await.contains_key(name)
    }

    /// Route a message: local mailbox first, then the peer table, else
    /// log and drop. Never blocks on the target and reports no outcome.
    pub async fn tell(self: &Arc<Self>, target: &str, message: Message) {
        if let Some(tx) = self.actors.read().await.get(target) {
            // A dead-but-registered actor swallows the message, same as an
            // unread mailbox.
            let _ = tx.send(Delivery::Message(message));
            return;
        }

        let peer = self.peers.read().await.get(target).cloned();
        match peer {
            Some(peer) => {
                let envelope = Envelope::new(target, message);
                let http = self.http.clone();
                tokio::spawn(async move {
                    if let Err(e) = transport::send_envelope(&http, &peer, &envelope).await {
                        warn!(
                            target = %envelope.target,
                            host = %peer.host,
                            port = peer.port,
                            error = %e,
                            "remote send failed; envelope dropped"
                        );
                    }
                });
            }
            None => {
                warn!(
                    target,
                    kind = message.kind(),
                    "no local actor or peer route; message dropped"
                );
            }
        }
    }

    /// Deliver an envelope received from the network.
    pub async fn deliver(self: &Arc<Self>, envelope: Envelope) {
        let Envelope { target, message } = envelope;
        debug!(target = %target, kind = message.kind(), "inbound envelope");
        self.tell(&target, message).await;
    }

    /// Enqueue the stop sentinel on an actor's mailbox.
    pub async fn stop_actor(&self, name: &str) {
        if let Some(tx) = self.actors.read().await.get(name) {
            let _ = tx.send(Delivery::Stop);
        } else {
            debug!(actor = name, "stop requested for unknown actor");
        }
    }

    /// Feed periodic ticks into an actor's mailbox. The feed stops once
    /// the mailbox closes.
    pub(crate) async fn schedule_ticks(&self, name: &str, every: Duration) {
        let Some(tx) = self.actors.read().await.get(name).cloned() else {
            warn!(actor = name, "tick schedule requested for unknown actor");
            return;
        };
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            // Don't tick immediately on startup - wait for the first interval.
            interval.tick().await;
            loop {
                interval.tick().await;
                if tx.send(Delivery::Tick).is_err() {
                    break;
                }
            }
        });
    }
}

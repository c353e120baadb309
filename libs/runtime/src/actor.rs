//! Actor trait, context, and the receive loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fedmesh_wire::Message;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::system::ActorSystem;

/// Errors surfaced by actor handlers.
///
/// A handler error terminates that actor's receive loop; the rest of the
/// system is not notified. Detection is indirect, via missed health acks.
#[derive(Debug, Error)]
pub enum ActorError {
    /// The handler failed; the actor dies.
    #[error("crashed: {0}")]
    Crashed(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// One mailbox entry: a wire message, a local timer tick, or the stop
/// sentinel.
#[derive(Debug)]
pub enum Delivery {
    Message(Message),
    Tick,
    Stop,
}

/// An actor: a named unit of state that handles one message at a time.
///
/// Actors that the protocol models as finite state machines keep an
/// explicit typed phase field and match on it inside `handle`; there is no
/// dynamic behavior swapping.
#[async_trait]
pub trait Actor: Send + 'static {
    /// Called once before the first message.
    async fn on_start(&mut self, _ctx: &mut ActorContext) -> Result<(), ActorError> {
        Ok(())
    }

    /// Handle one wire message to completion.
    async fn handle(&mut self, msg: Message, ctx: &mut ActorContext) -> Result<(), ActorError>;

    /// Handle one timer tick (see [`ActorContext::schedule_ticks`]).
    async fn on_tick(&mut self, _ctx: &mut ActorContext) -> Result<(), ActorError> {
        Ok(())
    }

    /// Called after the stop sentinel is processed. Not called when the
    /// actor dies from a handler error.
    async fn on_stop(&mut self, _ctx: &mut ActorContext) {}
}

/// Per-actor context handed to every hook.
pub struct ActorContext {
    name: String,
    system: Arc<ActorSystem>,
    messages_processed: u64,
}

impl ActorContext {
    pub(crate) fn new(name: String, system: Arc<ActorSystem>) -> Self {
        Self {
            name,
            system,
            messages_processed: 0,
        }
    }

    /// The name this actor is registered under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The owning actor system.
    pub fn system(&self) -> &Arc<ActorSystem> {
        &self.system
    }

    /// Route a message by logical name (local mailbox or remote peer).
    pub async fn tell(&self, target: &str, message: Message) {
        self.system.tell(target, message).await;
    }

    /// Enqueue this actor's own stop sentinel.
    pub async fn stop_self(&self) {
        self.system.stop_actor(&self.name).await;
    }

    /// Start a periodic tick feed into this actor's mailbox. The feed ends
    /// on its own once the mailbox closes (actor stopped or replaced).
    pub async fn schedule_ticks(&self, every: Duration) {
        self.system.schedule_ticks(&self.name, every).await;
    }
}

/// The receive loop: `on_start`, then strictly-in-order handling until the
/// stop sentinel (or a handler error) ends the actor.
pub(crate) async fn run_actor_loop(
    mut actor: Box<dyn Actor>,
    mut rx: mpsc::UnboundedReceiver<Delivery>,
    mut ctx: ActorContext,
) {
    if let Err(e) = actor.on_start(&mut ctx).await {
        error!(actor = %ctx.name, error = %e, "actor failed to start");
        return;
    }
    debug!(actor = %ctx.name, "actor started");

    loop {
        match rx.recv().await {
            Some(Delivery::Message(msg)) => {
                ctx.messages_processed += 1;
                if let Err(e) = actor.handle(msg, &mut ctx).await {
                    // Mirrors an unhandled exception in a handler: the
                    // receive loop dies without running on_stop; only the
                    // health monitor will notice.
                    error!(actor = %ctx.name, error = %e, "actor handler failed; actor is dead");
                    return;
                }
            }
            Some(Delivery::Tick) => {
                if let Err(e) = actor.on_tick(&mut ctx).await {
                    error!(actor = %ctx.name, error = %e, "actor tick failed; actor is dead");
                    return;
                }
            }
            Some(Delivery::Stop) => {
                debug!(actor = %ctx.name, "actor received stop sentinel");
                break;
            }
            None => {
                // Mailbox sender dropped: the registration was replaced.
                debug!(actor = %ctx.name, "actor mailbox closed");
                break;
            }
        }
    }

    actor.on_stop(&mut ctx).await;
    info!(
        actor = %ctx.name,
        messages_processed = ctx.messages_processed,
        "actor stopped"
    );
}

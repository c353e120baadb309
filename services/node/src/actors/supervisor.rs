//! Supervisor: re-creates dead actors from remembered factories.

use std::collections::HashMap;

use async_trait::async_trait;
use fedmesh_runtime::{Actor, ActorContext, ActorError};
use fedmesh_wire::Message;
use serde_json::Value;
use tracing::{debug, info, warn};

/// Re-creates a watched actor under its original name.
pub type ActorFactory = Box<dyn Fn() -> Box<dyn Actor> + Send + Sync>;

/// Builds an actor from a kind tag and optional wire-carried args, for
/// `RestartRequest`s that name their own recipe.
pub type KindFactory = Box<dyn Fn(&str, Option<&Value>) -> Option<Box<dyn Actor>> + Send + Sync>;

/// Restarts actors on request.
///
/// Resolution order mirrors the request: an `actor_kind` carried by the
/// request is tried against the kind catalog first, then the watch
/// registry. With neither available the request is a no-op and the actor
/// stays dead.
#[derive(Default)]
pub struct SupervisorActor {
    watched: HashMap<String, ActorFactory>,
    catalog: HashMap<String, KindFactory>,
}

impl SupervisorActor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember how to re-create `name`.
    pub fn watch(&mut self, name: impl Into<String>, factory: ActorFactory) {
        self.watched.insert(name.into(), factory);
    }

    /// Register a factory for kind-carrying restart requests.
    pub fn register_kind(&mut self, kind: impl Into<String>, factory: KindFactory) {
        self.catalog.insert(kind.into(), factory);
    }
}

#[async_trait]
impl Actor for SupervisorActor {
    async fn on_start(&mut self, ctx: &mut ActorContext) -> Result<(), ActorError> {
        info!(
            actor = ctx.name(),
            watched = self.watched.len(),
            "supervisor started"
        );
        Ok(())
    }

    async fn handle(&mut self, msg: Message, ctx: &mut ActorContext) -> Result<(), ActorError> {
        match msg {
            Message::RestartRequest {
                actor_name,
                actor_kind,
                args,
            } => {
                let replacement = actor_kind
                    .as_deref()
                    .and_then(|kind| self.catalog.get(kind))
                    .and_then(|factory| factory(&actor_name, args.as_ref()))
                    .or_else(|| self.watched.get(&actor_name).map(|factory| factory()));

                match replacement {
                    Some(actor) => {
                        info!(actor = ctx.name(), restarting = %actor_name, "restarting actor");
                        ctx.system().create_boxed_actor(&actor_name, actor).await;
                    }
                    None => {
                        warn!(
                            actor = ctx.name(),
                            dead = %actor_name,
                            "no restart recipe; actor stays dead"
                        );
                    }
                }
            }
            other => {
                debug!(actor = ctx.name(), kind = other.kind(), "ignored");
            }
        }
        Ok(())
    }
}

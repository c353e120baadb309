//! Health monitor: periodic liveness probing of a watched actor set.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use fedmesh_runtime::{Actor, ActorContext, ActorError};
use fedmesh_wire::Message;
use tracing::{debug, info, warn};

/// Pings every watched actor on a fixed interval and asks the supervisor
/// to restart any that stops acknowledging.
///
/// Per-watched-actor state: never-acked (`None`) → live → suspected. An
/// actor that has never acked is not yet considered overdue; after a
/// `RestartRequest` the timer resets so each missed-timeout window
/// produces exactly one request.
pub struct HealthMonitorActor {
    supervisor: String,
    ping_interval: Duration,
    timeout: Duration,
    last_ack: HashMap<String, Option<Instant>>,
}

impl HealthMonitorActor {
    pub fn new(
        supervisor: impl Into<String>,
        watched: impl IntoIterator<Item = String>,
        ping_interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            supervisor: supervisor.into(),
            ping_interval,
            timeout,
            last_ack: watched.into_iter().map(|name| (name, None)).collect(),
        }
    }
}

#[async_trait]
impl Actor for HealthMonitorActor {
    async fn on_start(&mut self, ctx: &mut ActorContext) -> Result<(), ActorError> {
        info!(
            actor = ctx.name(),
            watched = self.last_ack.len(),
            ping_interval_ms = self.ping_interval.as_millis(),
            timeout_ms = self.timeout.as_millis(),
            "health monitor started"
        );
        ctx.schedule_ticks(self.ping_interval).await;
        Ok(())
    }

    async fn handle(&mut self, msg: Message, ctx: &mut ActorContext) -> Result<(), ActorError> {
        match msg {
            Message::HealthAck { actor_name } => {
                debug!(actor = ctx.name(), from = %actor_name, "ack");
                self.last_ack.insert(actor_name, Some(Instant::now()));
            }
            other => {
                debug!(actor = ctx.name(), kind = other.kind(), "ignored");
            }
        }
        Ok(())
    }

    async fn on_tick(&mut self, ctx: &mut ActorContext) -> Result<(), ActorError> {
        let monitor = ctx.name().to_string();
        let watched: Vec<String> = self.last_ack.keys().cloned().collect();

        for name in &watched {
            ctx.tell(
                name,
                Message::HealthPing {
                    monitor_name: monitor.clone(),
                },
            )
            .await;
        }

        for name in watched {
            match self.last_ack.get(&name) {
                Some(Some(last)) if last.elapsed() > self.timeout => {
                    warn!(
                        actor = %monitor,
                        suspect = %name,
                        silent_for_ms = last.elapsed().as_millis(),
                        "no ack past timeout; requesting restart"
                    );
                    ctx.tell(
                        &self.supervisor,
                        Message::RestartRequest {
                            actor_name: name.clone(),
                            actor_kind: None,
                            args: None,
                        },
                    )
                    .await;
                    // Reset so the next request waits a full window.
                    self.last_ack.insert(name, Some(Instant::now()));
                }
                Some(None) => {
                    debug!(actor = %monitor, suspect = %name, "never acked; not yet overdue");
                }
                _ => {}
            }
        }
        Ok(())
    }
}

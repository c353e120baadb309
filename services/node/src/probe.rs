//! Recording probe actor for tests.
//!
//! Registered under any logical name, it captures every message it
//! receives into a shared log the test can assert on.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use fedmesh_runtime::{Actor, ActorContext, ActorError};
use fedmesh_wire::Message;

/// Shared view of everything a probe has received, in arrival order.
pub type ProbeLog = Arc<Mutex<Vec<Message>>>;

/// Actor that records every message it receives.
pub struct ProbeActor {
    log: ProbeLog,
}

impl ProbeActor {
    pub fn new() -> (Self, ProbeLog) {
        let log: ProbeLog = Arc::new(Mutex::new(Vec::new()));
        (Self { log: Arc::clone(&log) }, log)
    }
}

#[async_trait]
impl Actor for ProbeActor {
    async fn handle(&mut self, msg: Message, _ctx: &mut ActorContext) -> Result<(), ActorError> {
        self.log.lock().unwrap().push(msg);
        Ok(())
    }
}

/// Poll `cond` for up to five seconds. Returns whether it became true.
pub async fn await_until<F: Fn() -> bool>(cond: F) -> bool {
    for _ in 0..250 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

/// Count the messages in a log matching a predicate.
pub fn count_matching<F: Fn(&Message) -> bool>(log: &ProbeLog, pred: F) -> usize {
    log.lock().unwrap().iter().filter(|m| pred(m)).count()
}

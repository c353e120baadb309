//! Protocol actors built on the fedmesh runtime.

pub mod aggregator;
pub mod crdt;
pub mod evaluator;
pub mod gossip;
pub mod health;
pub mod scheduler;
pub mod supervisor;
pub mod worker;

pub use aggregator::{ShareAggregatorActor, TeamNodeActor, UpdateAggregatorActor};
pub use crdt::{LwwMapActor, PnCounterActor, ReplicatorActor};
pub use evaluator::EvaluatorActor;
pub use gossip::{GossipConfig, GossipMode, GossipNodeActor};
pub use health::HealthMonitorActor;
pub use scheduler::{SchedulerActor, SchedulingMode};
pub use supervisor::SupervisorActor;
pub use worker::WorkerActor;

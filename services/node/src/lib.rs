//! fedmesh node library.
//!
//! The coordination actors of the federated training runtime, all built on
//! `fedmesh-runtime`:
//!
//! ```text
//! Scheduler ──AssignTeam──▶ Worker ──ModelShare──▶ Aggregator ──GlobalModel──▶ Evaluator
//!     ▲                       │                        │
//!     └───GiveMeWork/WorkDone─┘                        └──SetGlobalModel──▶ Scheduler
//!
//! GossipNode ◀──ModelShare──▶ GossipNode     (reporter flushes to Evaluator)
//!
//! LwwMap ──Replicate──▶ Replicator ──CrdtMerge──▶ remote LwwMap
//!
//! HealthMonitor ──HealthPing──▶ watched actors
//!       └──RestartRequest──▶ Supervisor ──respawn──▶ runtime
//! ```
//!
//! ## Modules
//!
//! - `actors`: the protocol actors
//! - `aggregate`: FedAvg/FedProx weight math shared by aggregator and gossip
//! - `training`: the Trainer and DatasetProvider boundaries
//! - `results`: the results-store boundary used by the evaluator
//! - `config`: CLI and environment tuning

pub mod actors;
pub mod aggregate;
pub mod config;
pub mod probe;
pub mod results;
pub mod training;

pub use training::{DatasetProvider, MockTrainer, StaticDataset, TeamDataset, Trainer};

//! Node configuration: CLI topology flags plus environment-driven tuning.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use fedmesh_runtime::TransportKind;
use tracing::warn;

/// Which protocol this node runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum NodeMode {
    /// Fan-out training over registered team nodes.
    Provider,
    /// Scheduler/worker pull rounds with barrier aggregation.
    Rounds,
    /// Gossip model exchange.
    Gossip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TransportArg {
    Stream,
    Rpc,
}

impl From<TransportArg> for TransportKind {
    fn from(arg: TransportArg) -> Self {
        match arg {
            TransportArg::Stream => TransportKind::Stream,
            TransportArg::Rpc => TransportKind::Rpc,
        }
    }
}

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(name = "fedmesh-node", about = "Federated training node")]
pub struct Cli {
    /// Node name (MIA, BOS, ...).
    #[arg(long, env = "FEDMESH_NODE")]
    pub node: String,

    #[arg(long, default_value = "127.0.0.1", env = "FEDMESH_HOST")]
    pub host: String,

    #[arg(long, env = "FEDMESH_PORT")]
    pub port: u16,

    /// Comma-separated peer list: NAME@HOST:PORT.
    #[arg(long, default_value = "", env = "FEDMESH_PEERS")]
    pub peers: String,

    #[arg(long, value_enum, default_value_t = NodeMode::Rounds)]
    pub mode: NodeMode,

    /// Transport binding, fixed for the process lifetime.
    #[arg(long, value_enum, default_value_t = TransportArg::Stream)]
    pub transport: TransportArg,

    /// Worker actors on a worker node.
    #[arg(long, default_value_t = 2)]
    pub workers: usize,

    /// Scheduler rounds.
    #[arg(long, default_value_t = 1)]
    pub rounds: u32,

    /// Proximal coefficient; 0 means plain FedAvg.
    #[arg(long, default_value_t = 0.0)]
    pub fedprox_mu: f64,

    /// Gossip: this node publishes global models to the evaluator.
    #[arg(long)]
    pub reporter: bool,

    /// Gossip: rounds in synchronous mode.
    #[arg(long, default_value_t = 1)]
    pub gossip_rounds: u32,

    /// Gossip: continuous interval-driven mode instead of synchronous
    /// rounds.
    #[arg(long)]
    pub gossip_async: bool,

    /// Gossip: request a final evaluation before terminating.
    #[arg(long)]
    pub gossip_eval: bool,

    /// Path to a `{team: {features, labels}}` JSON dataset. Without it a
    /// small built-in demo dataset is used.
    #[arg(long, env = "FEDMESH_DATASET")]
    pub dataset: Option<PathBuf>,
}

impl Cli {
    /// Parse the `NAME@HOST:PORT` peer list, skipping malformed entries
    /// with a warning.
    pub fn peer_addrs(&self) -> Vec<(String, String, u16)> {
        let mut addrs = Vec::new();
        for raw in self.peers.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            match parse_peer(raw) {
                Some(addr) => addrs.push(addr),
                None => warn!(peer = raw, "malformed peer entry; expected NAME@HOST:PORT"),
            }
        }
        addrs
    }
}

fn parse_peer(raw: &str) -> Option<(String, String, u16)> {
    let (name, addr) = raw.split_once('@')?;
    let (host, port) = addr.split_once(':')?;
    let port = port.parse().ok()?;
    if name.is_empty() || host.is_empty() {
        return None;
    }
    Some((name.to_string(), host.to_string(), port))
}

/// Interval and threshold tuning, loaded from `FEDMESH_*` environment
/// variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Tuning {
    pub health_ping_interval: Duration,
    pub health_timeout: Duration,

    pub gossip_interval: Duration,
    pub gossip_batch_size: usize,
    pub gossip_flush_window: Duration,
    pub gossip_staleness_alpha: Option<f64>,
    pub gossip_epsilon: f64,
    pub gossip_patience: u32,
    pub gossip_max_flushes: Option<u64>,
    pub gossip_max_runtime: Option<Duration>,
}

impl Tuning {
    pub fn from_env() -> Self {
        Self {
            health_ping_interval: Duration::from_secs_f64(env_or("FEDMESH_HEALTH_INTERVAL", 5.0)),
            health_timeout: Duration::from_secs_f64(env_or("FEDMESH_HEALTH_TIMEOUT", 10.0)),
            gossip_interval: Duration::from_secs_f64(env_or("FEDMESH_GOSSIP_INTERVAL", 2.0)),
            gossip_batch_size: env_or("FEDMESH_GOSSIP_BATCH", 8),
            gossip_flush_window: Duration::from_secs_f64(env_or("FEDMESH_GOSSIP_WINDOW", 5.0)),
            gossip_staleness_alpha: env_opt("FEDMESH_GOSSIP_ALPHA"),
            gossip_epsilon: env_or("FEDMESH_GOSSIP_EPSILON", 1e-4),
            gossip_patience: env_or("FEDMESH_GOSSIP_PATIENCE", 3),
            gossip_max_flushes: env_opt("FEDMESH_GOSSIP_MAX_FLUSHES"),
            gossip_max_runtime: env_opt::<f64>("FEDMESH_GOSSIP_MAX_RUNTIME")
                .map(Duration::from_secs_f64),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

fn env_opt<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|raw| raw.parse().ok())
}

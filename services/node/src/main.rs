//! fedmesh node binary.
//!
//! Boots one actor system, wires the actors for the selected protocol
//! mode, and runs until interrupted:
//!
//! - `provider`: fan-out training over local team nodes
//! - `rounds`: scheduler/worker pull rounds (reporter hosts the scheduler
//!   and aggregator; other nodes host workers under supervision)
//! - `gossip`: peer-to-peer model exchange, synchronous or continuous

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use serde_json::json;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use fedmesh_node::actors::{
    EvaluatorActor, GossipConfig, GossipMode, GossipNodeActor, HealthMonitorActor, LwwMapActor,
    PnCounterActor, ReplicatorActor, SchedulerActor, SchedulingMode, ShareAggregatorActor,
    SupervisorActor, TeamNodeActor, UpdateAggregatorActor, WorkerActor,
};
use fedmesh_node::config::{Cli, NodeMode, Tuning};
use fedmesh_node::results::{InMemoryResultsStore, ResultsStore};
use fedmesh_node::training::{DatasetProvider, MockTrainer, StaticDataset, TeamDataset, Trainer};
use fedmesh_runtime::{ActorSystem, SystemConfig};
use fedmesh_wire::Message;

type Peers = Vec<(String, String, u16)>;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let cli = Cli::parse();
    let tuning = Tuning::from_env();

    info!(node = %cli.node, mode = ?cli.mode, transport = ?cli.transport, "starting fedmesh node");

    let dataset = load_dataset(&cli)?;

    let system = ActorSystem::new(SystemConfig::new(
        cli.host.clone(),
        cli.port,
        cli.transport.into(),
    ));
    let addr = system.serve().await?;
    info!(addr = %addr, "listening");

    let peers = cli.peer_addrs();
    for (name, host, port) in &peers {
        system.register_peer(name, host, *port, None).await;
    }

    match cli.mode {
        NodeMode::Provider => wire_provider(&system, &dataset).await,
        NodeMode::Rounds => wire_rounds(&system, &cli, &tuning, &dataset, &peers).await,
        NodeMode::Gossip => wire_gossip(&system, &cli, &tuning, &dataset, &peers).await,
    }

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    Ok(())
}

fn load_dataset(cli: &Cli) -> Result<StaticDataset> {
    match &cli.dataset {
        Some(path) => {
            let dataset = StaticDataset::from_path(path)?;
            info!(path = %path.display(), teams = dataset.teams().len(), "dataset loaded");
            Ok(dataset)
        }
        None => {
            info!("no dataset given; using the built-in demo dataset");
            Ok(demo_dataset())
        }
    }
}

/// Small deterministic dataset so every mode runs out of the box.
fn demo_dataset() -> StaticDataset {
    let mut dataset = StaticDataset::new();
    for (t, team) in ["ATL", "BOS", "MIA", "LAL"].iter().enumerate() {
        let mut features = Vec::new();
        let mut labels = Vec::new();
        for row in 0..20u32 {
            let x = f64::from(row) / 20.0;
            let shift = t as f64 * 0.1;
            features.push(vec![x + shift, 1.0 - x]);
            labels.push(u8::from(row % 3 != 0));
        }
        dataset.insert(*team, TeamDataset::new(features, labels));
    }
    dataset
}

/// Fan-out training over local team nodes.
async fn wire_provider(system: &Arc<ActorSystem>, dataset: &StaticDataset) {
    let store: Arc<dyn ResultsStore> = Arc::new(InMemoryResultsStore::new());
    let trainer: Arc<dyn Trainer> = Arc::new(MockTrainer);
    let provider: Arc<dyn DatasetProvider> = Arc::new(dataset.clone());

    system.create_actor("supervisor", SupervisorActor::new()).await;
    system.create_actor("crdt", PnCounterActor::new()).await;
    system.create_actor("evaluator", EvaluatorActor::new(store)).await;
    system
        .create_actor("aggregator", UpdateAggregatorActor::new("evaluator", "crdt", 0))
        .await;

    for team in dataset.teams() {
        system
            .create_actor(
                &format!("team_{team}"),
                TeamNodeActor::new(
                    "aggregator",
                    team,
                    Arc::clone(&trainer),
                    Arc::clone(&provider),
                ),
            )
            .await;
    }

    system.tell("aggregator", Message::TrainRequest).await;
    system.tell("crdt", Message::GetValue).await;
}

/// Scheduler/worker pull rounds. The node with no peers is the reporter
/// and hosts the scheduler and aggregator; the others host workers.
async fn wire_rounds(
    system: &Arc<ActorSystem>,
    cli: &Cli,
    tuning: &Tuning,
    dataset: &StaticDataset,
    peers: &Peers,
) {
    let store: Arc<dyn ResultsStore> = Arc::new(InMemoryResultsStore::new());
    let trainer: Arc<dyn Trainer> = Arc::new(MockTrainer);
    let provider: Arc<dyn DatasetProvider> = Arc::new(dataset.clone());

    system.create_actor("crdt", PnCounterActor::new()).await;
    system.create_actor("evaluator", EvaluatorActor::new(store)).await;

    let is_reporter = peers.is_empty();
    if is_reporter {
        system
            .create_actor(
                "scheduler",
                SchedulerActor::new(
                    "aggregator_p2p",
                    dataset.teams(),
                    cli.rounds,
                    cli.fedprox_mu,
                    SchedulingMode::Barrier,
                ),
            )
            .await;
        system
            .create_actor(
                "aggregator_p2p",
                ShareAggregatorActor::new("scheduler", "evaluator", "crdt"),
            )
            .await;
        info!("scheduler running on reporter node");
    } else {
        // Coordination actors live on the first peer.
        let (_, host, port) = &peers[0];
        system.register_peer("scheduler", host, *port, None).await;
        system.register_peer("aggregator_p2p", host, *port, None).await;

        let mut supervisor = SupervisorActor::new();
        let mut worker_names = Vec::new();
        for i in 0..cli.workers {
            let name = format!("worker_{}_{}", cli.node, i);
            let factory_trainer = Arc::clone(&trainer);
            let factory_provider = Arc::clone(&provider);
            let mu = cli.fedprox_mu;
            supervisor.watch(
                name.clone(),
                Box::new(move || {
                    Box::new(WorkerActor::new(
                        "scheduler",
                        "aggregator_p2p",
                        Arc::clone(&factory_trainer),
                        Arc::clone(&factory_provider),
                        mu,
                    ))
                }),
            );
            system
                .create_actor(
                    &name,
                    WorkerActor::new(
                        "scheduler",
                        "aggregator_p2p",
                        Arc::clone(&trainer),
                        Arc::clone(&provider),
                        cli.fedprox_mu,
                    ),
                )
                .await;
            worker_names.push(name);
        }
        system.create_actor("supervisor", supervisor).await;
        system
            .create_actor(
                "health",
                HealthMonitorActor::new(
                    "supervisor",
                    worker_names,
                    tuning.health_ping_interval,
                    tuning.health_timeout,
                ),
            )
            .await;
    }

    system.tell("crdt", Message::GetValue).await;

    // Every node carries one LWW replica and its replicator.
    let lww_name = format!("lww_{}", cli.node);
    let repl_name = format!("crdt_replicator_{}", cli.node);
    system.create_actor(&repl_name, ReplicatorActor::new()).await;
    system
        .create_actor(&lww_name, LwwMapActor::new(repl_name.clone()))
        .await;
    system
        .tell(
            &repl_name,
            Message::Attach {
                map_actor_name: lww_name.clone(),
            },
        )
        .await;
    for (peer, host, port) in peers {
        system
            .tell(
                &repl_name,
                Message::AddPeer {
                    remote_actor_name: format!("lww_{peer}"),
                    host: host.clone(),
                    port: *port,
                },
            )
            .await;
    }

    let role_key = if is_reporter { "leader" } else { "peer" };
    system
        .tell(
            &lww_name,
            Message::LwwPut {
                key: role_key.to_string(),
                value: json!(cli.node.clone()),
                ts: None,
            },
        )
        .await;
    system.tell(&lww_name, Message::LwwDump).await;
}

/// Gossip model exchange.
async fn wire_gossip(
    system: &Arc<ActorSystem>,
    cli: &Cli,
    tuning: &Tuning,
    dataset: &StaticDataset,
    peers: &Peers,
) {
    if cli.reporter {
        let store: Arc<dyn ResultsStore> = Arc::new(InMemoryResultsStore::new());
        system.create_actor("crdt", PnCounterActor::new()).await;
        system.create_actor("evaluator", EvaluatorActor::new(store)).await;
    }

    for (peer, host, port) in peers {
        system
            .register_peer(&format!("p2p_{peer}"), host, *port, None)
            .await;
    }

    let config = GossipConfig {
        mode: if cli.gossip_async {
            GossipMode::Continuous
        } else {
            GossipMode::SyncRounds
        },
        evaluator: "evaluator".to_string(),
        counter: "crdt".to_string(),
        eval_after: cli.gossip_eval,
        interval: tuning.gossip_interval,
        batch_size: tuning.gossip_batch_size,
        flush_window: tuning.gossip_flush_window,
        staleness_alpha: tuning.gossip_staleness_alpha,
        epsilon: tuning.gossip_epsilon,
        patience: tuning.gossip_patience,
        max_flushes: tuning.gossip_max_flushes,
        max_runtime: tuning.gossip_max_runtime,
    };

    let own_name = format!("p2p_{}", cli.node);
    system
        .create_actor(
            &own_name,
            GossipNodeActor::new(config, Arc::new(MockTrainer), dataset.merged()),
        )
        .await;

    let peer_actors: Vec<String> = peers.iter().map(|(peer, _, _)| format!("p2p_{peer}")).collect();
    let reporter_name = if cli.reporter {
        Some(own_name.clone())
    } else {
        peer_actors.first().cloned()
    };
    system
        .tell(
            &own_name,
            Message::PeerList {
                peers: peer_actors,
                is_reporter: cli.reporter,
                reporter_name,
                total_rounds: cli.gossip_rounds,
            },
        )
        .await;
}

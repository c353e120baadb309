//! Full pipeline: scheduler, workers, share aggregator, evaluator probe.

use std::sync::Arc;

use fedmesh_node::actors::{SchedulerActor, SchedulingMode, ShareAggregatorActor, WorkerActor};
use fedmesh_node::probe::{await_until, count_matching, ProbeActor};
use fedmesh_node::training::{MockTrainer, StaticDataset, TeamDataset};
use fedmesh_runtime::{ActorSystem, SystemConfig, TransportKind};
use fedmesh_wire::Message;

/// Slices crafted so MockTrainer fits coef [1.0] for ATL and [3.0] for
/// BOS, making the round mean [2.0].
fn dataset() -> StaticDataset {
    let mut dataset = StaticDataset::new();
    dataset.insert(
        "ATL",
        TeamDataset::new(vec![vec![1.0], vec![0.0]], vec![1, 0]),
    );
    dataset.insert(
        "BOS",
        TeamDataset::new(vec![vec![3.0], vec![0.0]], vec![1, 0]),
    );
    dataset
}

#[tokio::test]
async fn rounds_produce_global_models_and_count_increments() {
    let system = ActorSystem::new(SystemConfig::new("127.0.0.1", 0, TransportKind::Stream));
    let (eval_probe, eval_log) = ProbeActor::new();
    let (counter_probe, counter_log) = ProbeActor::new();
    system.create_actor("evaluator", eval_probe).await;
    system.create_actor("crdt", counter_probe).await;

    system
        .create_actor(
            "aggregator_p2p",
            ShareAggregatorActor::new("scheduler", "evaluator", "crdt"),
        )
        .await;
    system
        .create_actor(
            "scheduler",
            SchedulerActor::new(
                "aggregator_p2p",
                vec!["ATL".to_string(), "BOS".to_string()],
                2,
                0.0,
                SchedulingMode::Barrier,
            ),
        )
        .await;

    let provider = Arc::new(dataset());
    system
        .create_actor(
            "worker_W_0",
            WorkerActor::new(
                "scheduler",
                "aggregator_p2p",
                Arc::new(MockTrainer),
                Arc::clone(&provider) as Arc<dyn fedmesh_node::DatasetProvider>,
                0.0,
            ),
        )
        .await;

    // Both rounds publish the same deterministic mean to the evaluator.
    assert!(
        await_until(|| {
            count_matching(&eval_log, |m| {
                matches!(
                    m,
                    Message::GlobalModel { coef, .. } if (coef[0] - 2.0).abs() < 1e-9
                )
            }) == 2
        })
        .await
    );

    let round_indices: Vec<Option<u32>> = eval_log
        .lock()
        .unwrap()
        .iter()
        .filter_map(|m| match m {
            Message::GlobalModel { round_idx, .. } => Some(*round_idx),
            _ => None,
        })
        .collect();
    assert_eq!(round_indices, vec![Some(1), Some(2)]);

    // One round-counter increment per aggregation.
    assert_eq!(
        count_matching(&counter_log, |m| matches!(m, Message::Increment)),
        2
    );
}

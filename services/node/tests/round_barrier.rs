//! End-to-end scheduler/worker rounds inside one process.

use std::sync::Arc;

use fedmesh_node::actors::{SchedulerActor, SchedulingMode, WorkerActor};
use fedmesh_node::probe::{await_until, count_matching, ProbeActor};
use fedmesh_node::training::{MockTrainer, StaticDataset, TeamDataset};
use fedmesh_runtime::{ActorSystem, SystemConfig, TransportKind};
use fedmesh_wire::Message;

fn dataset(teams: &[&str]) -> StaticDataset {
    let mut dataset = StaticDataset::new();
    for (i, team) in teams.iter().enumerate() {
        let scale = (i + 1) as f64;
        dataset.insert(
            *team,
            TeamDataset::new(
                vec![vec![scale], vec![0.0], vec![scale * 2.0], vec![0.0]],
                vec![1, 0, 1, 0],
            ),
        );
    }
    dataset
}

#[tokio::test]
async fn two_rounds_emit_exactly_two_round_completes() {
    let system = ActorSystem::new(SystemConfig::new("127.0.0.1", 0, TransportKind::Stream));
    let (agg_probe, agg_log) = ProbeActor::new();
    system.create_actor("aggregator_p2p", agg_probe).await;

    let teams = vec!["ATL".to_string(), "BOS".to_string(), "MIA".to_string()];
    system
        .create_actor(
            "scheduler",
            SchedulerActor::new("aggregator_p2p", teams, 2, 0.0, SchedulingMode::Barrier),
        )
        .await;

    let provider = Arc::new(dataset(&["ATL", "BOS", "MIA"]));
    for i in 0..2 {
        system
            .create_actor(
                &format!("worker_X_{i}"),
                WorkerActor::new(
                    "scheduler",
                    "aggregator_p2p",
                    Arc::new(MockTrainer),
                    Arc::clone(&provider) as Arc<dyn fedmesh_node::DatasetProvider>,
                    0.0,
                ),
            )
            .await;
    }

    // Workers register and pull on start; both rounds run to completion.
    assert!(
        await_until(|| {
            count_matching(&agg_log, |m| matches!(m, Message::RoundComplete { .. })) == 2
        })
        .await
    );

    // Round indices are 1 then 2, each after a fully drained queue.
    let rounds: Vec<u32> = agg_log
        .lock()
        .unwrap()
        .iter()
        .filter_map(|m| match m {
            Message::RoundComplete {
                round_idx,
                total_rounds,
                ..
            } => {
                assert_eq!(*total_rounds, 2);
                Some(*round_idx)
            }
            _ => None,
        })
        .collect();
    assert_eq!(rounds, vec![1, 2]);

    // Three teams per round, every share delivered before the barrier.
    assert_eq!(
        count_matching(&agg_log, |m| matches!(m, Message::ModelShare { .. })),
        6
    );

    // Workers keep pulling after the schedule ends; no extra completion
    // may appear.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert_eq!(
        count_matching(&agg_log, |m| matches!(m, Message::RoundComplete { .. })),
        2
    );
}

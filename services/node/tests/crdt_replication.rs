//! Cross-process LWW replication over both transports.

use fedmesh_node::actors::{LwwMapActor, ReplicatorActor};
use fedmesh_node::probe::{await_until, count_matching, ProbeActor};
use fedmesh_runtime::{ActorSystem, SystemConfig, TransportKind};
use fedmesh_wire::Message;
use serde_json::json;

/// Two systems, a real map and replicator on the writer side, a probe
/// standing in for the remote replica: a local put must fan out as a
/// `CrdtMerge` delta across the wire.
async fn replicate_over(kind: TransportKind) {
    let writer = ActorSystem::new(SystemConfig::new("127.0.0.1", 0, kind));
    writer.serve().await.unwrap();

    let reader = ActorSystem::new(SystemConfig::new("127.0.0.1", 0, kind));
    let reader_addr = reader.serve().await.unwrap();
    let (remote_map, remote_log) = ProbeActor::new();
    reader.create_actor("lww_B", remote_map).await;

    writer.create_actor("crdt_replicator_A", ReplicatorActor::new()).await;
    writer
        .create_actor("lww_A", LwwMapActor::new("crdt_replicator_A"))
        .await;
    writer
        .tell(
            "crdt_replicator_A",
            Message::Attach {
                map_actor_name: "lww_A".into(),
            },
        )
        .await;
    writer
        .tell(
            "crdt_replicator_A",
            Message::AddPeer {
                remote_actor_name: "lww_B".into(),
                host: "127.0.0.1".into(),
                port: reader_addr.port(),
            },
        )
        .await;

    writer
        .tell(
            "lww_A",
            Message::LwwPut {
                key: "leader".into(),
                value: json!("A"),
                ts: Some(100),
            },
        )
        .await;

    assert!(
        await_until(|| {
            remote_log.lock().unwrap().iter().any(|m| {
                matches!(
                    m,
                    Message::CrdtMerge { delta }
                        if delta.get("leader").map(|e| (e.value.clone(), e.ts))
                            == Some((json!("A"), 100))
                )
            })
        })
        .await
    );

    // A stale put is not applied and must not replicate.
    writer
        .tell(
            "lww_A",
            Message::LwwPut {
                key: "leader".into(),
                value: json!("B"),
                ts: Some(50),
            },
        )
        .await;
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert_eq!(
        count_matching(&remote_log, |m| matches!(m, Message::CrdtMerge { .. })),
        1
    );
}

#[tokio::test]
async fn lww_put_replicates_over_stream() {
    replicate_over(TransportKind::Stream).await;
}

#[tokio::test]
async fn lww_put_replicates_over_rpc() {
    replicate_over(TransportKind::Rpc).await;
}

/// Inbound merges are forwarded through the replicator to the attached
/// local map, and re-forwarded merges stay one-hop (no echo back out).
#[tokio::test]
async fn inbound_merge_reaches_attached_map() {
    let system = ActorSystem::new(SystemConfig::new("127.0.0.1", 0, TransportKind::Stream));
    let addr = system.serve().await.unwrap();

    system.create_actor("crdt_replicator_B", ReplicatorActor::new()).await;
    let (map_probe, map_log) = ProbeActor::new();
    system.create_actor("lww_B", map_probe).await;
    system
        .tell(
            "crdt_replicator_B",
            Message::Attach {
                map_actor_name: "lww_B".into(),
            },
        )
        .await;

    // Simulate the remote side: a sender system routing the replicator
    // name over the network.
    let sender = ActorSystem::new(SystemConfig::new("127.0.0.1", 0, TransportKind::Stream));
    sender
        .register_peer("crdt_replicator_B", "127.0.0.1", addr.port(), None)
        .await;

    let mut delta = std::collections::BTreeMap::new();
    delta.insert(
        "peer".to_string(),
        fedmesh_wire::LwwEntry {
            value: json!("MIA"),
            ts: 7,
        },
    );
    sender
        .tell("crdt_replicator_B", Message::CrdtMerge { delta })
        .await;

    assert!(
        await_until(|| {
            map_log.lock().unwrap().iter().any(|m| {
                matches!(m, Message::CrdtMerge { delta } if delta.contains_key("peer"))
            })
        })
        .await
    );
}

/// Full two-replica convergence: real maps on A and B, cross-wired, plus
/// an observer probe fed by A's replicator. After B's higher-timestamp
/// write crosses to A, an in-between timestamp must be rejected by A's
/// map - proof that the remote entry was applied - while a fresher one
/// still replicates.
#[tokio::test]
async fn replicas_converge_to_max_timestamp_across_the_wire() {
    let a = ActorSystem::new(SystemConfig::new("127.0.0.1", 0, TransportKind::Stream));
    let a_addr = a.serve().await.unwrap();
    let b = ActorSystem::new(SystemConfig::new("127.0.0.1", 0, TransportKind::Stream));
    let b_addr = b.serve().await.unwrap();
    let observer = ActorSystem::new(SystemConfig::new("127.0.0.1", 0, TransportKind::Stream));
    let observer_addr = observer.serve().await.unwrap();
    let (observer_map, observer_log) = ProbeActor::new();
    observer.create_actor("lww_C", observer_map).await;

    for (system, name, peer_name, peer_port) in [
        (&a, "A", "lww_B", b_addr.port()),
        (&b, "B", "lww_A", a_addr.port()),
    ] {
        let repl = format!("crdt_replicator_{name}");
        let map = format!("lww_{name}");
        system.create_actor(&repl, ReplicatorActor::new()).await;
        system.create_actor(&map, LwwMapActor::new(repl.clone())).await;
        system
            .tell(&repl, Message::Attach { map_actor_name: map })
            .await;
        system
            .tell(
                &repl,
                Message::AddPeer {
                    remote_actor_name: peer_name.to_string(),
                    host: "127.0.0.1".to_string(),
                    port: peer_port,
                },
            )
            .await;
    }
    // A also replicates to the observer.
    a.tell(
        "crdt_replicator_A",
        Message::AddPeer {
            remote_actor_name: "lww_C".to_string(),
            host: "127.0.0.1".to_string(),
            port: observer_addr.port(),
        },
    )
    .await;

    let put = |value: &str, ts: i64| Message::LwwPut {
        key: "leader".into(),
        value: json!(value),
        ts: Some(ts),
    };

    a.tell("lww_A", put("A", 10)).await;
    assert!(
        await_until(|| {
            observer_log.lock().unwrap().iter().any(|m| {
                matches!(m, Message::CrdtMerge { delta } if delta.get("leader").map(|e| e.ts) == Some(10))
            })
        })
        .await
    );

    // B overwrites with a newer timestamp; the merge crosses to A's map.
    b.tell("lww_B", put("B", 20)).await;
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;

    // A timestamp between the two must now lose on A - it only can if
    // B's ts=20 entry actually arrived. No replication may happen.
    a.tell("lww_A", put("stale", 15)).await;
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    assert_eq!(
        count_matching(&observer_log, |m| {
            matches!(m, Message::CrdtMerge { delta } if delta.get("leader").map(|e| e.ts) == Some(15))
        }),
        0
    );

    // A fresher write still wins and replicates.
    a.tell("lww_A", put("fresh", 30)).await;
    assert!(
        await_until(|| {
            observer_log.lock().unwrap().iter().any(|m| {
                matches!(m, Message::CrdtMerge { delta } if delta.get("leader").map(|e| e.ts) == Some(30))
            })
        })
        .await
    );
}

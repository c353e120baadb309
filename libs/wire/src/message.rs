//! Message variants exchanged between fedmesh nodes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A model parameter vector: coefficients plus intercept.
///
/// Used both as a wire payload (cluster models) and as the unit of
/// aggregation inside the coordination actors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelWeights {
    pub coef: Vec<f64>,
    pub intercept: f64,
}

impl ModelWeights {
    pub fn new(coef: Vec<f64>, intercept: f64) -> Self {
        Self { coef, intercept }
    }
}

/// One entry of a last-write-wins delta: an opaque value and its timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LwwEntry {
    pub value: serde_json::Value,
    pub ts: i64,
}

/// A batch of LWW entries keyed by map key, as carried by `CrdtMerge` and
/// `Replicate`.
pub type LwwDelta = BTreeMap<String, LwwEntry>;

fn default_best_of() -> u32 {
    7
}

fn default_total_rounds() -> u32 {
    1
}

/// The closed set of wire messages.
///
/// Adjacent tagging puts the variant name under `type` and the fields under
/// `payload`, matching the envelope schema. Unit variants carry no payload
/// on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Message {
    // --- Training lifecycle ---
    /// Kick off a training pass on a team node.
    TrainRequest,
    /// A team node announcing itself (and its address) to the aggregator.
    RegisterTeam {
        team: String,
        host: String,
        port: u16,
    },
    /// Locally trained weights sent to the barrier aggregator.
    ModelUpdate { coef: Vec<f64>, intercept: f64 },
    /// An aggregated model published to the evaluator.
    GlobalModel {
        coef: Vec<f64>,
        intercept: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        round_idx: Option<u32>,
    },
    /// The aggregator pushing the current global model to the scheduler
    /// and workers (FedProx reference).
    SetGlobalModel { coef: Vec<f64>, intercept: f64 },
    /// Final-round trigger for the aggregator.
    AllDone,
    /// Round barrier crossed: the scheduler's signal to aggregate.
    RoundComplete {
        round_idx: u32,
        total_rounds: u32,
        #[serde(default)]
        fedprox_mu: f64,
    },

    // --- Gossip ---
    /// Topology handed to a gossip node: its peers, role, and round budget.
    PeerList {
        peers: Vec<String>,
        #[serde(default)]
        is_reporter: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reporter_name: Option<String>,
        #[serde(default = "default_total_rounds")]
        total_rounds: u32,
    },
    /// A gossip node telling the reporter it is ready for the next round.
    PeerReady { peer_name: String },
    /// Reporter broadcast starting a synchronous gossip round.
    StartRound,
    /// A node's local weights shared with its peers.
    ModelShare {
        sender: String,
        coef: Vec<f64>,
        intercept: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ts_ms: Option<i64>,
    },

    // --- Scheduling ---
    /// A worker pulling its next task.
    GiveMeWork { worker: String },
    /// The scheduler handing one team to a worker.
    AssignTeam { team_name: String },
    /// The scheduler's reply when the round queue is empty.
    NoMoreWork,
    /// A worker announcing itself (and its address) to the scheduler.
    RegisterWorker {
        worker: String,
        host: String,
        port: u16,
    },
    /// A worker reporting one assignment finished.
    WorkDone { worker: String },
    /// Per-cluster models published by the aggregator; the payload is the
    /// cluster-id → model map itself.
    SetClusterModels(BTreeMap<String, ModelWeights>),
    /// One-time team → cluster assignment.
    SetTeamClusters { mapping: BTreeMap<String, String> },

    // --- CRDT ---
    Increment,
    Decrement,
    GetValue,
    /// Write to the LWW map; `ts` omitted means "stamp locally".
    LwwPut {
        key: String,
        value: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ts: Option<i64>,
    },
    LwwGet { key: String },
    LwwDump,
    /// Apply a replicated delta to the local map.
    CrdtMerge { delta: LwwDelta },
    /// A locally applied delta handed to the replicator for fan-out.
    Replicate { delta: LwwDelta },
    /// Bind a replicator to its local map actor.
    Attach { map_actor_name: String },
    /// Register a remote map replica with the replicator.
    AddPeer {
        remote_actor_name: String,
        host: String,
        port: u16,
    },

    // --- Health ---
    HealthPing { monitor_name: String },
    HealthAck { actor_name: String },
    /// Test hook: the receiving actor fails its handler on purpose.
    CrashMe,

    // --- Supervision ---
    /// Ask the supervisor to re-create a dead actor. `actor_kind`/`args`
    /// override the supervisor's watch registry when present.
    RestartRequest {
        actor_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        actor_kind: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        args: Option<serde_json::Value>,
    },

    // --- Evaluation boundary ---
    EvalRequest {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pairs: Option<serde_json::Value>,
        #[serde(default = "default_best_of")]
        best_of: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply_to: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        round_idx: Option<u32>,
    },
    EvalReport { results: serde_json::Value },
}

impl Message {
    /// The wire tag of this variant, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::TrainRequest => "TrainRequest",
            Message::RegisterTeam { .. } => "RegisterTeam",
            Message::ModelUpdate { .. } => "ModelUpdate",
            Message::GlobalModel { .. } => "GlobalModel",
            Message::SetGlobalModel { .. } => "SetGlobalModel",
            Message::AllDone => "AllDone",
            Message::RoundComplete { .. } => "RoundComplete",
            Message::PeerList { .. } => "PeerList",
            Message::PeerReady { .. } => "PeerReady",
            Message::StartRound => "StartRound",
            Message::ModelShare { .. } => "ModelShare",
            Message::GiveMeWork { .. } => "GiveMeWork",
            Message::AssignTeam { .. } => "AssignTeam",
            Message::NoMoreWork => "NoMoreWork",
            Message::RegisterWorker { .. } => "RegisterWorker",
            Message::WorkDone { .. } => "WorkDone",
            Message::SetClusterModels(_) => "SetClusterModels",
            Message::SetTeamClusters { .. } => "SetTeamClusters",
            Message::Increment => "Increment",
            Message::Decrement => "Decrement",
            Message::GetValue => "GetValue",
            Message::LwwPut { .. } => "LwwPut",
            Message::LwwGet { .. } => "LwwGet",
            Message::LwwDump => "LwwDump",
            Message::CrdtMerge { .. } => "CrdtMerge",
            Message::Replicate { .. } => "Replicate",
            Message::Attach { .. } => "Attach",
            Message::AddPeer { .. } => "AddPeer",
            Message::HealthPing { .. } => "HealthPing",
            Message::HealthAck { .. } => "HealthAck",
            Message::CrashMe => "CrashMe",
            Message::RestartRequest { .. } => "RestartRequest",
            Message::EvalRequest { .. } => "EvalRequest",
            Message::EvalReport { .. } => "EvalReport",
        }
    }
}

//! Envelope codec.
//!
//! One envelope carries exactly one message variant to one logical target.
//! The stream transport writes an envelope as a single newline-terminated
//! JSON line; the RPC transport carries the same data with the payload
//! embedded as a JSON string ([`RpcEnvelope`]).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::message::Message;

/// Codec failures. A decode failure means the message is dropped by the
/// receiver; it is never fatal to the process.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("encode failed: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("decode failed: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("malformed envelope: {0}")]
    Malformed(String),
}

/// The wire-level `{target, type, payload}` representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub target: String,
    #[serde(flatten)]
    pub message: Message,
}

impl Envelope {
    pub fn new(target: impl Into<String>, message: Message) -> Self {
        Self {
            target: target.into(),
            message,
        }
    }

    /// Serialize to one JSON document (no trailing newline).
    pub fn to_json(&self) -> Result<String, WireError> {
        serde_json::to_string(self).map_err(WireError::Encode)
    }

    /// Parse one JSON document.
    ///
    /// Senders omit `payload` for unit variants; an explicit empty or null
    /// payload is normalized away before dispatch so both forms parse.
    pub fn from_json(raw: &str) -> Result<Self, WireError> {
        let mut value: Value = serde_json::from_str(raw).map_err(WireError::Decode)?;
        normalize_payload(&mut value);
        serde_json::from_value(value).map_err(WireError::Decode)
    }
}

fn normalize_payload(value: &mut Value) {
    if let Some(obj) = value.as_object_mut() {
        let empty = match obj.get("payload") {
            Some(Value::Null) => true,
            Some(Value::Object(payload)) => payload.is_empty(),
            _ => false,
        };
        if empty {
            obj.remove("payload");
        }
    }
}

/// The unary-RPC carrier: the payload travels as an embedded JSON string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcEnvelope {
    pub target: String,
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub payload_json: String,
}

/// The unary-RPC acknowledgement.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Ack {
    pub ok: bool,
}

impl RpcEnvelope {
    /// Split an envelope into `(type, payload_json)` form for the RPC call.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, WireError> {
        let value = serde_json::to_value(envelope).map_err(WireError::Encode)?;
        let obj = value
            .as_object()
            .ok_or_else(|| WireError::Malformed("envelope did not serialize to an object".into()))?;
        let message_type = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| WireError::Malformed("missing type tag".into()))?
            .to_string();
        let payload = obj.get("payload").cloned().unwrap_or(Value::Object(Default::default()));
        Ok(Self {
            target: envelope.target.clone(),
            message_type,
            payload_json: serde_json::to_string(&payload).map_err(WireError::Encode)?,
        })
    }

    /// Reassemble the envelope the RPC call carried.
    pub fn into_envelope(self) -> Result<Envelope, WireError> {
        let payload: Value = if self.payload_json.is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_str(&self.payload_json).map_err(WireError::Decode)?
        };
        let mut obj = serde_json::Map::new();
        obj.insert("target".to_string(), Value::String(self.target));
        obj.insert("type".to_string(), Value::String(self.message_type));
        obj.insert("payload".to_string(), payload);
        let mut value = Value::Object(obj);
        normalize_payload(&mut value);
        serde_json::from_value(value).map_err(WireError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use rstest::rstest;
    use serde_json::json;

    use super::*;
    use crate::message::{LwwEntry, ModelWeights};

    fn roundtrip(message: Message) {
        let envelope = Envelope::new("someone", message);
        let line = envelope.to_json().unwrap();
        let back = Envelope::from_json(&line).unwrap();
        assert_eq!(envelope, back, "round-trip changed: {line}");
    }

    #[rstest]
    #[case(Message::TrainRequest)]
    #[case(Message::AllDone)]
    #[case(Message::StartRound)]
    #[case(Message::NoMoreWork)]
    #[case(Message::Increment)]
    #[case(Message::Decrement)]
    #[case(Message::GetValue)]
    #[case(Message::LwwDump)]
    #[case(Message::CrashMe)]
    fn unit_variants_roundtrip(#[case] message: Message) {
        roundtrip(message);
    }

    #[test]
    fn payload_variants_roundtrip() {
        let mut delta = BTreeMap::new();
        delta.insert(
            "leader".to_string(),
            LwwEntry {
                value: json!("MIA"),
                ts: 171,
            },
        );
        let mut clusters = BTreeMap::new();
        clusters.insert("0".to_string(), ModelWeights::new(vec![0.5, -0.5], 0.1));
        let mut mapping = BTreeMap::new();
        mapping.insert("BOS".to_string(), "0".to_string());

        let cases = vec![
            Message::RegisterTeam {
                team: "team_BOS".into(),
                host: "127.0.0.1".into(),
                port: 5001,
            },
            Message::ModelUpdate {
                coef: vec![1.0, 2.0],
                intercept: 0.25,
            },
            Message::GlobalModel {
                coef: vec![2.0, 4.0],
                intercept: 1.0,
                round_idx: Some(3),
            },
            Message::GlobalModel {
                coef: vec![2.0, 4.0],
                intercept: 1.0,
                round_idx: None,
            },
            Message::SetGlobalModel {
                coef: vec![0.1],
                intercept: -0.2,
            },
            Message::RoundComplete {
                round_idx: 1,
                total_rounds: 2,
                fedprox_mu: 0.5,
            },
            Message::PeerList {
                peers: vec!["p2p_BOS".into(), "p2p_MIA".into()],
                is_reporter: true,
                reporter_name: Some("p2p_MIA".into()),
                total_rounds: 4,
            },
            Message::PeerReady {
                peer_name: "p2p_BOS".into(),
            },
            Message::ModelShare {
                sender: "p2p_BOS".into(),
                coef: vec![1.0, 3.0],
                intercept: 0.5,
                version: Some(7),
                ts_ms: Some(1_700_000_000_000),
            },
            Message::ModelShare {
                sender: "BOS".into(),
                coef: vec![1.0],
                intercept: 0.0,
                version: None,
                ts_ms: None,
            },
            Message::GiveMeWork {
                worker: "worker_BOS_0".into(),
            },
            Message::AssignTeam {
                team_name: "BOS".into(),
            },
            Message::RegisterWorker {
                worker: "worker_BOS_0".into(),
                host: "127.0.0.1".into(),
                port: 5002,
            },
            Message::WorkDone {
                worker: "worker_BOS_0".into(),
            },
            Message::SetClusterModels(clusters),
            Message::SetTeamClusters { mapping },
            Message::LwwPut {
                key: "leader".into(),
                value: json!("MIA"),
                ts: Some(9),
            },
            Message::LwwPut {
                key: "peer".into(),
                value: json!({"nested": true}),
                ts: None,
            },
            Message::LwwGet { key: "leader".into() },
            Message::CrdtMerge { delta: delta.clone() },
            Message::Replicate { delta },
            Message::Attach {
                map_actor_name: "lww_MIA".into(),
            },
            Message::AddPeer {
                remote_actor_name: "lww_BOS".into(),
                host: "127.0.0.1".into(),
                port: 5003,
            },
            Message::HealthPing {
                monitor_name: "health".into(),
            },
            Message::HealthAck {
                actor_name: "worker_BOS_0".into(),
            },
            Message::RestartRequest {
                actor_name: "worker_BOS_0".into(),
                actor_kind: Some("worker".into()),
                args: Some(json!({"fedprox_mu": 0.0})),
            },
            Message::RestartRequest {
                actor_name: "worker_BOS_0".into(),
                actor_kind: None,
                args: None,
            },
            Message::EvalRequest {
                pairs: None,
                best_of: 7,
                reply_to: Some("p2p_MIA".into()),
                round_idx: Some(2),
            },
            Message::EvalReport {
                results: json!([{"round_idx": 1}]),
            },
        ];

        for message in cases {
            roundtrip(message);
        }
    }

    #[test]
    fn envelope_json_shape_matches_schema() {
        let envelope = Envelope::new(
            "aggregator_p2p",
            Message::ModelShare {
                sender: "BOS".into(),
                coef: vec![1.0, 3.0],
                intercept: 0.5,
                version: Some(2),
                ts_ms: None,
            },
        );
        let value: Value = serde_json::from_str(&envelope.to_json().unwrap()).unwrap();
        assert_eq!(value["target"], "aggregator_p2p");
        assert_eq!(value["type"], "ModelShare");
        assert_eq!(value["payload"]["sender"], "BOS");
        assert_eq!(value["payload"]["coef"], json!([1.0, 3.0]));
        assert_eq!(value["payload"]["version"], 2);
        assert!(value["payload"].get("ts_ms").is_none());
    }

    #[test]
    fn unit_variant_omits_payload() {
        let envelope = Envelope::new("crdt", Message::Increment);
        let value: Value = serde_json::from_str(&envelope.to_json().unwrap()).unwrap();
        assert!(value.get("payload").is_none());
    }

    #[test]
    fn unit_variant_accepts_explicit_empty_payload() {
        let parsed =
            Envelope::from_json(r#"{"target":"crdt","type":"Increment","payload":{}}"#).unwrap();
        assert_eq!(parsed.message, Message::Increment);
        let parsed =
            Envelope::from_json(r#"{"target":"crdt","type":"GetValue","payload":null}"#).unwrap();
        assert_eq!(parsed.message, Message::GetValue);
    }

    #[test]
    fn defaults_fill_missing_optional_fields() {
        let parsed = Envelope::from_json(
            r#"{"target":"agg","type":"RoundComplete","payload":{"round_idx":1,"total_rounds":2}}"#,
        )
        .unwrap();
        assert_eq!(
            parsed.message,
            Message::RoundComplete {
                round_idx: 1,
                total_rounds: 2,
                fedprox_mu: 0.0
            }
        );

        let parsed = Envelope::from_json(
            r#"{"target":"p2p_BOS","type":"PeerList","payload":{"peers":["p2p_MIA"]}}"#,
        )
        .unwrap();
        assert_eq!(
            parsed.message,
            Message::PeerList {
                peers: vec!["p2p_MIA".into()],
                is_reporter: false,
                reporter_name: None,
                total_rounds: 1
            }
        );
    }

    #[test]
    fn unknown_type_tag_is_a_decode_error() {
        let err = Envelope::from_json(r#"{"target":"x","type":"Bogus","payload":{}}"#);
        assert!(err.is_err());
    }

    #[test]
    fn rpc_envelope_roundtrip() {
        let envelope = Envelope::new(
            "scheduler",
            Message::GiveMeWork {
                worker: "worker_BOS_1".into(),
            },
        );
        let rpc = RpcEnvelope::from_envelope(&envelope).unwrap();
        assert_eq!(rpc.message_type, "GiveMeWork");
        assert_eq!(rpc.target, "scheduler");
        let back = rpc.into_envelope().unwrap();
        assert_eq!(back, envelope);
    }

    #[test]
    fn rpc_envelope_unit_variant_roundtrip() {
        let envelope = Envelope::new("crdt", Message::Increment);
        let rpc = RpcEnvelope::from_envelope(&envelope).unwrap();
        assert_eq!(rpc.payload_json, "{}");
        let back = rpc.into_envelope().unwrap();
        assert_eq!(back, envelope);
    }
}

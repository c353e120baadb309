//! # fedmesh-wire
//!
//! Wire protocol for the fedmesh runtime: the closed set of message
//! variants exchanged between nodes, and the envelope codec that carries
//! them over the network.
//!
//! Every message is one variant of [`Message`]; the envelope form on the
//! wire is `{"target": ..., "type": ..., "payload": {...}}`. The enum is
//! adjacently tagged so the derived serde impls produce exactly that shape
//! and dispatch on the `type` tag is exhaustive at compile time.

mod envelope;
mod message;

pub use envelope::{Ack, Envelope, RpcEnvelope, WireError};
pub use message::{LwwDelta, LwwEntry, Message, ModelWeights};

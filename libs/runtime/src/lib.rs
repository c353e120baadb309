//! # fedmesh-runtime
//!
//! The actor runtime: named actors with unbounded FIFO mailboxes, a
//! process-wide [`ActorSystem`] owning the actor registry and the peer
//! table, and two interchangeable network transports (line-framed stream,
//! unary RPC) that give remote actors the same addressing model as local
//! ones.
//!
//! ## Delivery model
//!
//! - Messages enqueued into one mailbox are processed strictly in enqueue
//!   order, one message to completion at a time.
//! - No ordering holds between different senders, and none holds for
//!   network-delivered messages relative to their send order.
//! - Remote sends are fire-and-forget: at-most-once, best-effort, no
//!   retry. Failures are logged and discarded.

mod actor;
mod system;
mod transport;

pub use actor::{Actor, ActorContext, ActorError, Delivery};
pub use system::{ActorSystem, SystemConfig};
pub use transport::{PeerAddr, TransportError, TransportKind};

//! PASER Mesh - Secure Routing Engine for Wireless Mesh Networks
//!
//! Implements the PASER route discovery and maintenance protocol: reactive,
//! AODV-style route finding in which every hop is authenticated and only
//! registered nodes take part.
//!
//! # Core Components
//!
//! - **Wire Codec**: Encoding of the nine control messages and the KDC exchange
//! - **Routing Table**: Sequence-numbered routes mirrored into a forwarding table
//! - **Neighbor Table**: Link trust state and the neighbors' authentication roots
//! - **Timer Queue**: Deadline-ordered retransmission and expiry timers
//! - **Protocol Engine**: [`PaserNode`], which validates, answers and forwards
//!
//! # Design Principles
//!
//! 1. **Authenticated Hops**: Untrusted links carry signatures, trusted links
//!    one-time secrets plus a keyed hash under the group key
//! 2. **Fail-Visible**: Every dropped message yields a [`DropReason`]
//! 3. **Single Owner**: All protocol state is owned by one engine that runs each
//!    input to completion; I/O is reached through the traits in [`network`]
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use paser_core::PaserConfig;
//! use paser_mesh::{Collaborators, PaserNode};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! # let collaborators: Collaborators = unimplemented!();
//! let mut node = PaserNode::new(PaserConfig::default(), collaborators)?;
//! node.start();
//!
//! // Feed received control datagrams and expired timers into the engine.
//! # let (bytes, ifindex): (Vec<u8>, u32) = (Vec::new(), 0);
//! if let Err(reason) = node.handle_incoming_message(&bytes, ifindex) {
//!     println!("dropped: {reason}");
//! }
//! node.dispatch_due_timers();
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod blacklist;
pub mod discovery;
pub mod error;
mod maintenance;
pub mod message;
pub mod neighbor;
pub mod network;
pub mod node;
mod outbound;
pub mod pending;
mod processing;
pub mod queue;
pub mod routing;
pub mod timer;
pub mod wire;

#[cfg(test)]
mod testing;

// Re-export main types
pub use discovery::OutboundDisposition;
pub use error::{DropReason, MeshError, MeshResult};
pub use message::{KdcBlock, KdcReply, KdcRequest, MessageType, Packet, PaserMessage};
pub use neighbor::{NeighborEntry, NeighborTable};
pub use network::{Clock, Datagram, ForwardingTable, KernelRoute, PositionSource, Transport};
pub use node::{Collaborators, PaserNode};
pub use routing::{RoutingEntry, RoutingTable};
pub use timer::{TimerKind, TimerQueue};

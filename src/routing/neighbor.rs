//! Collaborator interfaces of the routing overlay.
//!
//! The overlay does not know how neighbors are discovered, maintained, or
//! reached over the link layer; it only needs the three seams below. The
//! implementations live above this crate's core (the neighbor service keeps
//! hello/goodbye state, the discovery service floods route requests) and are
//! mocked in tests.

use core::task::Poll;

use thiserror::Error;

use crate::buffer::{FrameBufferReader, FrameBufferWriter};
use crate::node::{Cost, Destination, NodeId};

/// Why a routing send did not happen.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum SendError {
	#[error("no route to the destination node")]
	UnreachableNode,
	#[error("link-layer queue refused the frame")]
	QueueFull,
	#[error("send task timed out")]
	Timeout,
}

/// Frame transport between this node and its direct neighbors; the same
/// shape as a link socket, keyed to the routing protocol number.
pub trait NeighborSocket {
	/// Largest payload a neighbor frame can carry, headers included.
	fn max_payload_length(&self) -> usize;

	/// A writer for one outbound neighbor frame of exactly `length` bytes.
	fn poll_frame_writer(&mut self, length: usize) -> Poll<FrameBufferWriter>;

	fn poll_receive_frame(&mut self) -> Poll<FrameBufferReader>;

	/// Delivers `reader` to the neighbor with this id.
	fn poll_send_frame(
		&mut self,
		neighbor: &NodeId,
		reader: FrameBufferReader,
	) -> Poll<Result<(), SendError>>;

	/// Delivers `reader` to every current neighbor except `ignore`.
	fn poll_send_broadcast_frame(
		&mut self,
		reader: FrameBufferReader,
		ignore: Option<&NodeId>,
	) -> Poll<()>;
}

/// What the overlay asks the neighbor table.
pub trait NeighborService {
	/// Cost of the direct link to `neighbor`, if it is a neighbor at all.
	fn link_cost(&self, neighbor: &NodeId) -> Option<Cost>;
}

/// Next-hop resolution. Polled repeatedly; `Ready(None)` means the
/// destination is unreachable as far as discovery can tell.
pub trait DiscoveryService {
	fn poll_discover(&mut self, destination: &Destination) -> Poll<Option<NodeId>>;
}

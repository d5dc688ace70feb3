//! Routing overlay.
//!
//! Sits above the link layer (via a neighbor socket) and owns frame
//! identity, duplicate suppression and the unicast/broadcast forwarding
//! decision. Received frames rest in a delay pool for a cost-derived
//! interval before they are accepted locally, repeated toward their
//! destination, or both (a broadcast that includes this node).

pub mod cache;
pub mod frame;
pub mod neighbor;
pub mod pool;

use core::task::Poll;

use rand_chacha::rand_core::RngCore;
use thiserror::Error;

pub use self::cache::FrameIdCache;
pub use self::frame::{FrameId, RoutingFrame, RoutingFrameHeader};
pub use self::neighbor::{DiscoveryService, NeighborService, NeighborSocket, SendError};
pub use self::pool::DelayPool;
use crate::buffer::{FrameBufferReader, FrameBufferWriter};
use crate::node::{Destination, LocalNodeInfo, NodeId};
use crate::synch::{promise_pair, FutureValue, Promise};
use crate::time::Instant;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum FrameWriterError {
	/// Header plus payload would not fit into one neighbor frame.
	#[error("payload exceeds the neighbor socket MTU")]
	PayloadTooLong,
}

enum SendState {
	Discover { destination: Destination },
	Unicast { gateway: NodeId },
	Broadcast { ignore: Option<NodeId> },
}

struct SendTask {
	state: SendState,
	reader: FrameBufferReader,
	promise: Option<Promise<Result<(), SendError>>>,
}

/// The routing overlay's socket: one per node.
pub struct RoutingSocket<N: NeighborSocket> {
	socket: N,
	local: LocalNodeInfo,
	cache: FrameIdCache,
	delay_pool: DelayPool,
	/// At most one locally-deliverable frame awaiting the upper layer.
	accept_slot: Option<RoutingFrame>,
	/// At most one in-flight send or repeat.
	send_task: Option<SendTask>,
}

impl<N: NeighborSocket> RoutingSocket<N> {
	pub fn new(socket: N, local: LocalNodeInfo) -> Self {
		RoutingSocket {
			socket,
			local,
			cache: FrameIdCache::new(),
			delay_pool: DelayPool::new(),
			accept_slot: None,
			send_task: None,
		}
	}

	pub fn local_node(&self) -> &LocalNodeInfo {
		&self.local
	}

	pub fn set_local_node(&mut self, local: LocalNodeInfo) {
		self.local = local;
	}

	/// The frame most recently accepted for this node, if any.
	pub fn poll_receive_frame(&mut self) -> Poll<RoutingFrame> {
		match self.accept_slot.take() {
			Some(frame) => Poll::Ready(frame),
			None => Poll::Pending,
		}
	}

	/// Reserves a frame writer with the routing header already serialized:
	/// source and previous hop are this node, the frame id is freshly
	/// generated and cached. The caller appends exactly `payload_length`
	/// bytes.
	pub fn poll_frame_writer(
		&mut self,
		destination: &Destination,
		payload_length: usize,
		rng: &mut impl RngCore,
	) -> Poll<Result<FrameBufferWriter, FrameWriterError>> {
		let header = RoutingFrameHeader {
			source: self.local.id,
			destination: *destination,
			previous_hop: self.local.id,
			// generated lazily below; placeholder for length computation
			frame_id: FrameId(0),
		};
		let total_length = header.serialized_length() + payload_length;
		if total_length > self.socket.max_payload_length() {
			return Poll::Ready(Err(FrameWriterError::PayloadTooLong));
		}

		let mut writer = core::task::ready!(self.socket.poll_frame_writer(total_length));
		let header = RoutingFrameHeader {
			frame_id: self.cache.generate(rng),
			..header
		};
		header.serialize(&mut writer);
		Poll::Ready(Ok(writer))
	}

	/// Starts a send of a fully serialized routing frame (header included,
	/// as produced via [`poll_frame_writer`](Self::poll_frame_writer)).
	/// `Pending` while the single send slot is busy.
	pub fn poll_send_frame(
		&mut self,
		destination: &Destination,
		reader: FrameBufferReader,
	) -> Poll<FutureValue<Result<(), SendError>>> {
		if self.send_task.is_some() {
			return Poll::Pending;
		}
		let (future, promise) = promise_pair();
		let state = if destination.is_unicast() {
			SendState::Discover {
				destination: *destination,
			}
		} else {
			SendState::Broadcast { ignore: None }
		};
		self.send_task = Some(SendTask {
			state,
			reader: reader.origin(),
			promise: Some(promise),
		});
		Poll::Ready(future)
	}

	pub fn execute(
		&mut self,
		neighbor_service: &impl NeighborService,
		discovery_service: &mut impl DiscoveryService,
		now: Instant,
	) {
		self.drive_send(discovery_service);
		self.drive_receive(neighbor_service, now);
		self.drive_expiry(now);
		self.drive_send(discovery_service);
	}

	/// Pulls frames off the neighbor socket into the delay pool.
	fn drive_receive(&mut self, neighbor_service: &impl NeighborService, now: Instant) {
		loop {
			let Poll::Ready(mut reader) = self.socket.poll_receive_frame() else {
				return;
			};
			let Some(header) = RoutingFrameHeader::deserialize(&mut reader) else {
				debug!("routing: malformed frame header, dropped");
				continue;
			};
			if self.cache.insert_and_check_contains(header.frame_id) {
				trace!("routing: duplicate frame {:04x}, dropped", header.frame_id.0);
				continue;
			}

			// spacing the repeat out by the link cost gives closer nodes
			// the chance to flood first
			let delay = neighbor_service
				.link_cost(&header.previous_hop)
				.unwrap_or(self.local.cost)
				.into();

			let frame = RoutingFrame {
				source: header.source,
				destination: header.destination,
				previous_hop: header.previous_hop,
				frame_id: header.frame_id,
				payload: reader,
			};
			if self.delay_pool.push(now, frame, delay).is_err() {
				info!("routing: delay pool full, frame dropped");
			}
		}
	}

	/// Accepts and/or schedules repeats for every frame whose delay ran out.
	/// A frame whose required slots are busy goes back into the pool and is
	/// retried on a later tick.
	fn drive_expiry(&mut self, now: Instant) {
		while self.delay_pool.has_expired(now) {
			let Some(frame) = self.delay_pool.pop_expired(now) else {
				return;
			};
			let accepts = self.local.matches(&frame.destination);
			let repeats = !frame.destination.is_unicast() || !accepts;
			let accept_slot_busy = accepts && self.accept_slot.is_some();
			let send_slot_busy = repeats && self.send_task.is_some();
			if accept_slot_busy || send_slot_busy {
				if self
					.delay_pool
					.push(now, frame, core::time::Duration::ZERO)
					.is_err()
				{
					info!("routing: delay pool full, frame dropped");
				}
				return;
			}

			if repeats {
				self.schedule_repeat(&frame);
			}
			if accepts {
				self.accept_slot = Some(frame);
			}
		}
	}

	/// Re-emits a frame with the previous hop rewritten to this node. The
	/// frame id is preserved so downstream caches suppress the echo.
	fn schedule_repeat(&mut self, frame: &RoutingFrame) {
		let header = RoutingFrameHeader {
			source: frame.source,
			destination: frame.destination,
			previous_hop: self.local.id,
			frame_id: frame.frame_id,
		};
		let payload = frame.payload.subreader();
		let total_length = header.serialized_length() + payload.readable_length();

		let Poll::Ready(mut writer) = self.socket.poll_frame_writer(total_length) else {
			info!("routing: no buffer for repeat, frame dropped");
			return;
		};
		header.serialize(&mut writer);
		let mut payload = payload;
		while !payload.is_all_read() {
			let chunk = payload.readable_length().min(32);
			writer.write_slice(payload.read_buffer_unchecked(chunk));
		}

		let state = if frame.destination.is_unicast() {
			SendState::Discover {
				destination: frame.destination,
			}
		} else {
			SendState::Broadcast {
				ignore: Some(frame.previous_hop),
			}
		};
		self.send_task = Some(SendTask {
			state,
			reader: writer.create_reader(),
			promise: None,
		});
	}

	fn drive_send(&mut self, discovery_service: &mut impl DiscoveryService) {
		let Some(task) = &mut self.send_task else {
			return;
		};

		loop {
			match &task.state {
				SendState::Discover { destination } => {
					let Poll::Ready(gateway) = discovery_service.poll_discover(destination)
					else {
						return;
					};
					match gateway {
						Some(gateway) => task.state = SendState::Unicast { gateway },
						None => {
							debug!("routing: destination unreachable");
							if let Some(promise) = task.promise.take() {
								promise.set(Err(SendError::UnreachableNode));
							}
							self.send_task = None;
							return;
						}
					}
				}
				SendState::Unicast { gateway } => {
					let reader = task.reader.origin();
					let Poll::Ready(result) = self.socket.poll_send_frame(gateway, reader)
					else {
						return;
					};
					if let Some(promise) = task.promise.take() {
						promise.set(result);
					}
					self.send_task = None;
					return;
				}
				SendState::Broadcast { ignore } => {
					let reader = task.reader.origin();
					let Poll::Ready(()) = self
						.socket
						.poll_send_broadcast_frame(reader, ignore.as_ref())
					else {
						return;
					};
					if let Some(promise) = task.promise.take() {
						promise.set(Ok(()));
					}
					self.send_task = None;
					return;
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use std::collections::VecDeque;
	use std::vec::Vec as StdVec;

	use super::*;
	use crate::buffer::FrameBufferPool;
	use crate::link::{Address, SerialAddress};
	use crate::node::Cost;
	use crate::testutil::test_rng;

	fn node(n: u8) -> NodeId {
		NodeId::from(Address::from(SerialAddress(n)))
	}

	struct MockNeighborSocket {
		buffers: FrameBufferPool,
		inbound: VecDeque<FrameBufferReader>,
		sent: StdVec<(NodeId, StdVec<u8>)>,
		broadcasts: StdVec<(Option<NodeId>, StdVec<u8>)>,
	}

	impl MockNeighborSocket {
		fn new() -> Self {
			MockNeighborSocket {
				buffers: FrameBufferPool::new(),
				inbound: VecDeque::new(),
				sent: StdVec::new(),
				broadcasts: StdVec::new(),
			}
		}

		fn feed(&mut self, header: &RoutingFrameHeader, payload: &[u8]) {
			let length = header.serialized_length() + payload.len();
			let Poll::Ready(mut writer) = self.buffers.request_frame_writer(length) else {
				panic!("mock buffer pool exhausted");
			};
			header.serialize(&mut writer);
			writer.write_slice(payload);
			self.inbound.push_back(writer.create_reader());
		}
	}

	impl NeighborSocket for MockNeighborSocket {
		fn max_payload_length(&self) -> usize {
			crate::buffer::MAX_FRAME_BUFFER_LENGTH
		}

		fn poll_frame_writer(&mut self, length: usize) -> Poll<FrameBufferWriter> {
			self.buffers.request_frame_writer(length)
		}

		fn poll_receive_frame(&mut self) -> Poll<FrameBufferReader> {
			match self.inbound.pop_front() {
				Some(reader) => Poll::Ready(reader),
				None => Poll::Pending,
			}
		}

		fn poll_send_frame(
			&mut self,
			neighbor: &NodeId,
			mut reader: FrameBufferReader,
		) -> Poll<Result<(), SendError>> {
			let length = reader.readable_length();
			let bytes = reader.read_buffer_unchecked(length).to_vec();
			self.sent.push((*neighbor, bytes));
			Poll::Ready(Ok(()))
		}

		fn poll_send_broadcast_frame(
			&mut self,
			mut reader: FrameBufferReader,
			ignore: Option<&NodeId>,
		) -> Poll<()> {
			let length = reader.readable_length();
			let bytes = reader.read_buffer_unchecked(length).to_vec();
			self.broadcasts.push((ignore.copied(), bytes));
			Poll::Ready(())
		}
	}

	struct StaticNeighbors {
		cost: Option<Cost>,
	}

	impl NeighborService for StaticNeighbors {
		fn link_cost(&self, _neighbor: &NodeId) -> Option<Cost> {
			self.cost
		}
	}

	struct StaticDiscovery {
		gateway: Option<NodeId>,
	}

	impl DiscoveryService for StaticDiscovery {
		fn poll_discover(&mut self, _destination: &Destination) -> Poll<Option<NodeId>> {
			Poll::Ready(self.gateway)
		}
	}

	fn overlay(local: u8) -> RoutingSocket<MockNeighborSocket> {
		RoutingSocket::new(
			MockNeighborSocket::new(),
			LocalNodeInfo::new(node(local)),
		)
	}

	fn header(source: u8, destination: Destination, previous_hop: u8, id: u16) -> RoutingFrameHeader {
		RoutingFrameHeader {
			source: node(source),
			destination,
			previous_hop: node(previous_hop),
			frame_id: FrameId(id),
		}
	}

	#[test]
	fn duplicate_frame_ids_are_suppressed() {
		let mut socket = overlay(2);
		let neighbors = StaticNeighbors {
			cost: Some(Cost::new(0)),
		};
		let mut discovery = StaticDiscovery { gateway: None };

		let incoming = header(1, Destination::node(node(2)), 1, 0xbeef);
		socket.socket.feed(&incoming, b"pay");
		socket.socket.feed(&incoming, b"pay");

		socket.execute(&neighbors, &mut discovery, Instant::ZERO);
		socket.execute(&neighbors, &mut discovery, Instant::from_millis(1));

		// exactly one accept, and the second copy vanished
		assert!(socket.poll_receive_frame().is_ready());
		socket.execute(&neighbors, &mut discovery, Instant::from_millis(2));
		assert!(socket.poll_receive_frame().is_pending());
		assert!(socket.socket.sent.is_empty());
		assert!(socket.socket.broadcasts.is_empty());
	}

	#[test]
	fn unicast_repeat_rewrites_previous_hop() {
		// we are B; a frame from A toward C goes out via gateway D
		let mut socket = overlay(2);
		let neighbors = StaticNeighbors {
			cost: Some(Cost::new(10)),
		};
		let mut discovery = StaticDiscovery {
			gateway: Some(node(4)),
		};

		let incoming = header(1, Destination::node(node(3)), 1, 0x1234);
		socket.socket.feed(&incoming, b"pp");

		socket.execute(&neighbors, &mut discovery, Instant::ZERO);
		// still waiting out the link-cost delay
		assert!(socket.socket.sent.is_empty());

		socket.execute(&neighbors, &mut discovery, Instant::from_millis(10));
		let (gateway, bytes) = socket.socket.sent.pop().unwrap();
		assert_eq!(gateway, node(4));

		let repeated = {
			let buffers = FrameBufferPool::new();
			let Poll::Ready(mut writer) = buffers.request_frame_writer(bytes.len()) else {
				panic!("pool exhausted");
			};
			writer.write_slice(&bytes);
			let mut reader = writer.create_reader();
			let header = RoutingFrameHeader::deserialize(&mut reader).unwrap();
			let rest = reader.read_buffer_unchecked(reader.readable_length()).to_vec();
			(header, rest)
		};
		assert_eq!(repeated.0.source, node(1));
		assert_eq!(repeated.0.destination, Destination::node(node(3)));
		assert_eq!(repeated.0.previous_hop, node(2), "rewritten to us");
		assert_eq!(repeated.0.frame_id, FrameId(0x1234), "id preserved");
		assert_eq!(repeated.1, b"pp");
		// not for us, so nothing was accepted
		assert!(socket.poll_receive_frame().is_pending());
	}

	#[test]
	fn broadcast_accepts_and_repeats_exactly_once_each() {
		let mut socket = overlay(2);
		let neighbors = StaticNeighbors {
			cost: Some(Cost::new(0)),
		};
		let mut discovery = StaticDiscovery { gateway: None };

		let incoming = header(1, Destination::broadcast(), 1, 0x7777);
		socket.socket.feed(&incoming, b"b");

		socket.execute(&neighbors, &mut discovery, Instant::ZERO);
		socket.execute(&neighbors, &mut discovery, Instant::from_millis(1));

		assert!(socket.poll_receive_frame().is_ready());
		assert_eq!(socket.socket.broadcasts.len(), 1);
		let (ignore, _) = &socket.socket.broadcasts[0];
		assert_eq!(*ignore, Some(node(1)), "previous hop excluded");
	}

	#[test]
	fn unreachable_destination_fails_the_send_future() {
		let mut socket = overlay(2);
		let neighbors = StaticNeighbors { cost: None };
		let mut discovery = StaticDiscovery { gateway: None };
		let mut rng = test_rng();

		let destination = Destination::node(node(9));
		let Poll::Ready(Ok(mut writer)) =
			socket.poll_frame_writer(&destination, 2, &mut rng)
		else {
			panic!("writer must be available");
		};
		writer.write_slice(b"xy");
		let reader = writer.create_reader();

		let Poll::Ready(mut result) = socket.poll_send_frame(&destination, reader) else {
			panic!("send slot must be free");
		};
		socket.execute(&neighbors, &mut discovery, Instant::ZERO);
		assert_eq!(result.poll(), Poll::Ready(Ok(Err(SendError::UnreachableNode))));
	}

	#[test]
	fn send_writes_header_with_fresh_cached_id() {
		let mut socket = overlay(2);
		let mut rng = test_rng();

		let destination = Destination::node(node(9));
		let Poll::Ready(Ok(mut writer)) =
			socket.poll_frame_writer(&destination, 1, &mut rng)
		else {
			panic!("writer must be available");
		};
		writer.write_slice(b"z");
		let mut reader = writer.create_reader();
		let header = RoutingFrameHeader::deserialize(&mut reader).unwrap();
		assert_eq!(header.source, node(2));
		assert_eq!(header.previous_hop, node(2));
		assert_eq!(header.destination, destination);
		// our own echo would be suppressed
		assert!(socket.cache.contains(header.frame_id));
	}

	#[test]
	fn oversized_payload_is_rejected() {
		let mut socket = overlay(2);
		let mut rng = test_rng();
		let destination = Destination::node(node(9));
		let poll = socket.poll_frame_writer(&destination, crate::config::MTU + 1, &mut rng);
		assert!(matches!(
			poll,
			Poll::Ready(Err(FrameWriterError::PayloadTooLong))
		));
	}

	#[test]
	fn occupied_accept_slot_defers_expiry() {
		let mut socket = overlay(2);
		let neighbors = StaticNeighbors {
			cost: Some(Cost::new(0)),
		};
		let mut discovery = StaticDiscovery { gateway: None };

		socket.socket.feed(&header(1, Destination::node(node(2)), 1, 1), b"a");
		socket.socket.feed(&header(1, Destination::node(node(2)), 1, 2), b"b");

		socket.execute(&neighbors, &mut discovery, Instant::ZERO);
		socket.execute(&neighbors, &mut discovery, Instant::from_millis(1));
		// first frame occupies the slot; the second waits in the pool
		assert_eq!(socket.delay_pool.len(), 1);

		assert!(socket.poll_receive_frame().is_ready());
		socket.execute(&neighbors, &mut discovery, Instant::from_millis(2));
		assert!(socket.poll_receive_frame().is_ready());
	}
}

//! The node façade: owns the buffer pool, the frame broker, the media-port
//! registry and (optionally) the routing overlay, and drives them all from
//! one cooperative tick.

use heapless::Vec;
use rand_chacha::rand_core::RngCore;
use thiserror::Error;

use crate::buffer::FrameBufferPool;
use crate::config::MAX_MEDIA_PER_NODE;
use crate::link::{
	AddressTypeSet, LinkSocket, MediaPortNumber, ProtocolNumber, SharedLinkQueue,
};
use crate::media::ethernet::UdpSocketInterface;
use crate::media::{LinkStream, MediaInfo, MediaPort};
use crate::node::LocalNodeInfo;
use crate::routing::{DiscoveryService, NeighborService, NeighborSocket, RoutingSocket};
use crate::time::Instant;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum RegisterError {
	#[error("all media port slots are taken")]
	TooManyPorts,
	/// The Ethernet socket is a process-wide singleton.
	#[error("an ethernet port is already registered")]
	EthernetAlreadyRegistered,
}

/// One mesh node. `RW` is the host's serial-stream binding, `U` its
/// Ethernet socket binding and `N` the neighbor socket the routing overlay
/// runs on.
pub struct MeshNode<RW: LinkStream, U: UdpSocketInterface, N: NeighborSocket> {
	pool: FrameBufferPool,
	queue: SharedLinkQueue,
	ports: Vec<MediaPort<RW, U>, MAX_MEDIA_PER_NODE>,
	has_ethernet: bool,
	routing: Option<RoutingSocket<N>>,
}

impl<RW: LinkStream, U: UdpSocketInterface, N: NeighborSocket> MeshNode<RW, U, N> {
	pub fn new(now: Instant) -> Self {
		MeshNode {
			pool: FrameBufferPool::new(),
			queue: SharedLinkQueue::new(now),
			ports: Vec::new(),
			has_ethernet: false,
			routing: None,
		}
	}

	/// Registers a serial-attached port. Media detection decides which
	/// driver ends up running it.
	pub fn register_serial_port(
		&mut self,
		stream: RW,
		now: Instant,
	) -> Result<MediaPortNumber, RegisterError> {
		let number = self.next_port_number()?;
		let port = MediaPort::new_serial_attached(stream, self.queue.broker(number), now);
		let _ = self.ports.push(port);
		Ok(number)
	}

	pub fn register_ethernet_port(
		&mut self,
		socket: U,
		rng: &mut impl RngCore,
	) -> Result<MediaPortNumber, RegisterError> {
		if self.has_ethernet {
			return Err(RegisterError::EthernetAlreadyRegistered);
		}
		let number = self.next_port_number()?;
		let port = MediaPort::new_ethernet(socket, self.queue.broker(number), rng);
		let _ = self.ports.push(port);
		self.has_ethernet = true;
		Ok(number)
	}

	fn next_port_number(&self) -> Result<MediaPortNumber, RegisterError> {
		if self.ports.is_full() {
			return Err(RegisterError::TooManyPorts);
		}
		Ok(MediaPortNumber(self.ports.len() as u8))
	}

	/// Attaches the routing overlay on top of the given neighbor socket.
	pub fn attach_routing(&mut self, socket: N, local: LocalNodeInfo) {
		self.routing = Some(RoutingSocket::new(socket, local));
	}

	pub fn routing(&mut self) -> Option<&mut RoutingSocket<N>> {
		self.routing.as_mut()
	}

	/// Upper-layer handle for one protocol number.
	pub fn link_socket(&self, protocol_number: ProtocolNumber) -> LinkSocket {
		self.queue.socket(protocol_number)
	}

	pub fn buffer_pool(&self) -> FrameBufferPool {
		self.pool.clone()
	}

	pub fn port(&mut self, number: MediaPortNumber) -> Option<&mut MediaPort<RW, U>> {
		self.ports.get_mut(number.0 as usize)
	}

	/// Address types any registered port can currently send unicast to.
	pub fn unicast_supported_address_types(&self) -> AddressTypeSet {
		self.ports
			.iter()
			.fold(AddressTypeSet::empty(), |set, port| {
				set | port.unicast_supported_address_types()
			})
	}

	pub fn broadcast_supported_address_types(&self) -> AddressTypeSet {
		self.ports
			.iter()
			.fold(AddressTypeSet::empty(), |set, port| {
				set | port.broadcast_supported_address_types()
			})
	}

	/// Per-port media information, in port order.
	pub fn media_info(&mut self) -> Vec<MediaInfo, MAX_MEDIA_PER_NODE> {
		let mut infos = Vec::new();
		for port in &mut self.ports {
			let _ = infos.push(port.media_info());
		}
		infos
	}

	/// Runs the link layer only: broker sweep and every media port.
	pub fn execute_links(&mut self, now: Instant, rng: &mut impl RngCore) {
		self.queue.execute(now);
		for port in &mut self.ports {
			port.execute(&self.pool, now, rng);
		}
	}

	/// The node's full top-level tick.
	pub fn execute(
		&mut self,
		now: Instant,
		rng: &mut impl RngCore,
		neighbor_service: &impl NeighborService,
		discovery_service: &mut impl DiscoveryService,
	) {
		self.execute_links(now, rng);
		if let Some(routing) = &mut self.routing {
			routing.execute(neighbor_service, discovery_service, now);
		}
	}
}

#[cfg(test)]
mod tests {
	use core::task::Poll;

	use super::*;
	use crate::config::{DETECTOR_POWER_UP_LOCKOUT, DETECTOR_RESPONSE_WINDOW};
	use crate::link::{Address, LinkAddress, SerialAddress};
	use crate::media::serial::{PREAMBLE, PREAMBLE_LENGTH};
	use crate::node::{Cost, Destination, NodeId};
	use crate::routing::SendError;
	use crate::testutil::{test_rng, ScriptedUdpSocket, TestStream};
	use crate::buffer::{FrameBufferReader, FrameBufferWriter};

	struct NullNeighborSocket;

	impl NeighborSocket for NullNeighborSocket {
		fn max_payload_length(&self) -> usize {
			crate::buffer::MAX_FRAME_BUFFER_LENGTH
		}

		fn poll_frame_writer(&mut self, _length: usize) -> core::task::Poll<FrameBufferWriter> {
			core::task::Poll::Pending
		}

		fn poll_receive_frame(&mut self) -> core::task::Poll<FrameBufferReader> {
			core::task::Poll::Pending
		}

		fn poll_send_frame(
			&mut self,
			_neighbor: &NodeId,
			_reader: FrameBufferReader,
		) -> core::task::Poll<Result<(), SendError>> {
			core::task::Poll::Ready(Ok(()))
		}

		fn poll_send_broadcast_frame(
			&mut self,
			_reader: FrameBufferReader,
			_ignore: Option<&NodeId>,
		) -> core::task::Poll<()> {
			core::task::Poll::Ready(())
		}
	}

	struct NoNeighbors;

	impl NeighborService for NoNeighbors {
		fn link_cost(&self, _neighbor: &NodeId) -> Option<Cost> {
			None
		}
	}

	struct NoDiscovery;

	impl DiscoveryService for NoDiscovery {
		fn poll_discover(
			&mut self,
			_destination: &Destination,
		) -> core::task::Poll<Option<NodeId>> {
			core::task::Poll::Ready(None)
		}
	}

	type TestNode = MeshNode<TestStream, ScriptedUdpSocket, NullNeighborSocket>;

	#[test]
	fn serial_attached_port_becomes_serial_after_silent_probe() {
		let mut node = TestNode::new(Instant::ZERO);
		let mut rng = test_rng();
		let number = node
			.register_serial_port(TestStream::new(), Instant::ZERO)
			.unwrap();

		// silence through the whole probe window decides framed serial
		let mut now = Instant::ZERO + DETECTOR_POWER_UP_LOCKOUT;
		node.execute_links(now, &mut rng);
		now += DETECTOR_RESPONSE_WINDOW;
		node.execute_links(now, &mut rng);

		let port = node.port(number).unwrap();
		let serial = port.serial_mut().expect("detector should pick serial");
		serial
			.try_initialize_local_address(SerialAddress(0x05))
			.unwrap();

		// a frame addressed to us flows up to the link socket
		let stream = serial_stream(port);
		stream.feed(&[PREAMBLE; PREAMBLE_LENGTH]);
		stream.feed(&[0x01, 0x03, 0x05, 0x04]);
		stream.feed(b"abcd");
		node.execute_links(now, &mut rng);

		let socket = node.link_socket(ProtocolNumber::RoutingNeighbor);
		let Poll::Ready(frame) = socket.poll_receive_frame() else {
			panic!("frame not delivered");
		};
		assert_eq!(
			frame.remote,
			LinkAddress::from(Address::from(SerialAddress(0x03)))
		);
	}

	fn serial_stream<'a>(
		port: &'a mut MediaPort<TestStream, ScriptedUdpSocket>,
	) -> &'a mut TestStream {
		match port {
			MediaPort::Serial(serial) => serial.stream_mut(),
			_ => panic!("not a serial port"),
		}
	}

	#[test]
	fn port_slots_are_bounded() {
		let mut node = TestNode::new(Instant::ZERO);
		for _ in 0..MAX_MEDIA_PER_NODE {
			node.register_serial_port(TestStream::new(), Instant::ZERO)
				.unwrap();
		}
		assert_eq!(
			node.register_serial_port(TestStream::new(), Instant::ZERO),
			Err(RegisterError::TooManyPorts)
		);
	}

	#[test]
	fn second_ethernet_port_is_refused() {
		let mut node = TestNode::new(Instant::ZERO);
		let mut rng = test_rng();
		node.register_ethernet_port(ScriptedUdpSocket::new(), &mut rng)
			.unwrap();
		assert_eq!(
			node.register_ethernet_port(ScriptedUdpSocket::new(), &mut rng),
			Err(RegisterError::EthernetAlreadyRegistered)
		);
	}

	#[test]
	fn supported_address_types_aggregate_across_ports() {
		let mut node = TestNode::new(Instant::ZERO);
		let mut rng = test_rng();
		node.register_ethernet_port(ScriptedUdpSocket::new(), &mut rng)
			.unwrap();
		assert!(node
			.unicast_supported_address_types()
			.contains_type(crate::link::AddressType::Udp));
		assert!(!node
			.unicast_supported_address_types()
			.contains_type(crate::link::AddressType::Uhf));
	}

	#[test]
	fn full_tick_with_routing_attached() {
		let mut node = TestNode::new(Instant::ZERO);
		let mut rng = test_rng();
		let local = LocalNodeInfo::new(NodeId::from(Address::from(SerialAddress(1))));
		node.attach_routing(NullNeighborSocket, local);
		node.execute(Instant::ZERO, &mut rng, &NoNeighbors, &mut NoDiscovery);
		assert!(node.routing().unwrap().poll_receive_frame().is_pending());
	}
}

//! Ethernet-attached UDP port.
//!
//! The shield (W5x00-class hardware plus its UDP socket) stays behind the
//! [`UdpSocketInterface`] trait; this driver owns the policy: randomized
//! locally-administered MAC, DHCP at startup, a debounced link-state check,
//! and chunked transfers so one oversized datagram cannot monopolize a tick.

use core::task::Poll;

use rand_chacha::rand_core::RngCore;

use super::MediaInfo;
use crate::buffer::{FrameBufferPool, FrameBufferReader, FrameBufferWriter};
use crate::config::{ETHERNET_CHUNK_SIZE, ETHERNET_LINK_CHECK_INTERVAL, ETHERNET_UDP_PORT, MTU};
use crate::link::{
	Address, AddressType, FrameBroker, LinkAddress, LinkFrame, ProtocolNumber, UdpEndpoint,
};
use crate::synch::Debounce;
use crate::time::Instant;

/// Host binding to the Ethernet shield and its single UDP socket.
///
/// The stack treats this as a root-owned singleton; registering a second
/// Ethernet port is refused at the registry level.
pub trait UdpSocketInterface {
	/// `false` when no Ethernet hardware is attached at all.
	fn hardware_present(&mut self) -> bool;

	/// Programs the MAC, runs DHCP and opens the listener on `port`.
	/// Returns `false` when DHCP yielded no usable address.
	fn begin(&mut self, mac: [u8; 6], port: u16) -> bool;

	fn link_up(&mut self) -> bool;

	fn local_endpoint(&mut self) -> Option<UdpEndpoint>;

	/// Starts an outbound datagram. `false` aborts the send.
	fn begin_packet(&mut self, remote: UdpEndpoint) -> bool;

	fn write(&mut self, bytes: &[u8]);

	fn end_packet(&mut self);

	/// Length of the next waiting datagram, if any. Advancing to the next
	/// datagram discards unread bytes of the previous one.
	fn parse_packet(&mut self) -> Option<usize>;

	/// Sender of the current datagram.
	fn remote_endpoint(&mut self) -> Option<UdpEndpoint>;

	/// Reads up to `out.len()` bytes of the current datagram.
	fn read(&mut self, out: &mut [u8]) -> usize;

	fn set_local_ip(&mut self, ip: [u8; 4]);

	fn set_subnet_mask(&mut self, mask: [u8; 4]);
}

/// Placeholder socket type for nodes without an Ethernet attachment.
pub enum NoUdpSocket {}

impl UdpSocketInterface for NoUdpSocket {
	fn hardware_present(&mut self) -> bool {
		match *self {}
	}

	fn begin(&mut self, _mac: [u8; 6], _port: u16) -> bool {
		match *self {}
	}

	fn link_up(&mut self) -> bool {
		match *self {}
	}

	fn local_endpoint(&mut self) -> Option<UdpEndpoint> {
		match *self {}
	}

	fn begin_packet(&mut self, _remote: UdpEndpoint) -> bool {
		match *self {}
	}

	fn write(&mut self, _bytes: &[u8]) {
		match *self {}
	}

	fn end_packet(&mut self) {
		match *self {}
	}

	fn parse_packet(&mut self) -> Option<usize> {
		match *self {}
	}

	fn remote_endpoint(&mut self) -> Option<UdpEndpoint> {
		match *self {}
	}

	fn read(&mut self, _out: &mut [u8]) -> usize {
		match *self {}
	}

	fn set_local_ip(&mut self, _ip: [u8; 4]) {
		match *self {}
	}

	fn set_subnet_mask(&mut self, _mask: [u8; 4]) {
		match *self {}
	}
}

fn randomized_mac(rng: &mut impl RngCore) -> [u8; 6] {
	let mut mac = [0u8; 6];
	rng.fill_bytes(&mut mac);
	mac[0] |= 0b0000_0010; // locally administered
	mac[0] &= 0b1111_1110; // unicast
	mac
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LinkState {
	Up,
	Down,
	JustDown,
}

struct TxInFlight {
	reader: FrameBufferReader,
}

struct RxInFlight {
	remote: UdpEndpoint,
	protocol: ProtocolNumber,
	writer: FrameBufferWriter,
}

/// Driver for the Ethernet shield's UDP transport.
pub struct EthernetPort<U: UdpSocketInterface> {
	socket: U,
	broker: FrameBroker,
	has_hardware: bool,
	link_up: bool,
	link_check: Option<Debounce>,
	tx: Option<TxInFlight>,
	rx: Option<RxInFlight>,
	pending_dispatch: Option<LinkFrame>,
}

impl<U: UdpSocketInterface> EthernetPort<U> {
	pub fn new(mut socket: U, broker: FrameBroker, rng: &mut impl RngCore) -> Self {
		let mac = randomized_mac(rng);
		if !socket.begin(mac, ETHERNET_UDP_PORT) {
			info!("ethernet: DHCP configuration failed");
		}

		let has_hardware = socket.hardware_present();
		if !has_hardware {
			info!("ethernet: no shield found, port stays down");
		}
		let link_up = has_hardware && socket.link_up();

		EthernetPort {
			socket,
			broker,
			has_hardware,
			link_up,
			link_check: None,
			tx: None,
			rx: None,
			pending_dispatch: None,
		}
	}

	pub fn media_info(&mut self) -> MediaInfo {
		MediaInfo {
			address_type: Some(AddressType::Udp),
			local_address: self.socket.local_endpoint().map(Address::from),
		}
	}

	pub fn set_local_ip(&mut self, ip: [u8; 4]) {
		self.socket.set_local_ip(ip);
	}

	pub fn set_subnet_mask(&mut self, mask: [u8; 4]) {
		self.socket.set_subnet_mask(mask);
	}

	fn poll_link_state(&mut self, now: Instant) -> LinkState {
		if !self.has_hardware {
			return LinkState::Down;
		}

		let check = self
			.link_check
			.get_or_insert_with(|| Debounce::new(now, ETHERNET_LINK_CHECK_INTERVAL));
		if check.poll(now).is_pending() {
			return if self.link_up {
				LinkState::Up
			} else {
				LinkState::Down
			};
		}

		let was_up = self.link_up;
		self.link_up = self.socket.link_up();
		if was_up && !self.link_up {
			info!("ethernet: link went down");
			LinkState::JustDown
		} else if self.link_up {
			LinkState::Up
		} else {
			LinkState::Down
		}
	}

	pub fn execute(&mut self, pool: &FrameBufferPool, now: Instant) {
		match self.poll_link_state(now) {
			LinkState::Down => return,
			LinkState::JustDown => {
				// anything half-transferred is unusable after a link drop
				self.tx = None;
				self.rx = None;
				self.pending_dispatch = None;
				return;
			}
			LinkState::Up => {}
		}

		if let Some(frame) = self.pending_dispatch.take() {
			if let Err(frame) = self.broker.poll_dispatch_received_frame(frame) {
				self.pending_dispatch = Some(frame);
			}
		}

		self.execute_send();
		self.execute_receive(pool);
	}

	fn execute_send(&mut self) {
		if self.tx.is_none() {
			let Poll::Ready(frame) = self
				.broker
				.poll_get_send_requested_frame(AddressType::Udp, None)
			else {
				return;
			};
			let destination = frame
				.remote
				.unicast_address()
				.and_then(UdpEndpoint::try_from_address);
			let Some(destination) = destination else {
				debug!("ethernet: dropping frame without UDP destination");
				return;
			};
			if !self.socket.begin_packet(destination) {
				// socket refused the datagram; the frame is forfeit
				return;
			}
			self.socket.write(&[frame.protocol_number as u8]);
			self.tx = Some(TxInFlight {
				reader: frame.reader,
			});
		}

		let Some(tx) = self.tx.as_mut() else {
			return;
		};
		let chunk_length = tx.reader.readable_length().min(ETHERNET_CHUNK_SIZE);
		self.socket.write(tx.reader.read_buffer_unchecked(chunk_length));
		if tx.reader.is_all_read() {
			self.socket.end_packet();
			self.tx = None;
		}
	}

	fn execute_receive(&mut self, pool: &FrameBufferPool) {
		if self.rx.is_none() {
			if self.pending_dispatch.is_some() {
				return;
			}
			let Some(total_length) = self.socket.parse_packet() else {
				return;
			};

			// a datagram that cannot be a frame on this network is ignored
			let Some(body_length) = total_length.checked_sub(1) else {
				return;
			};
			if body_length > MTU {
				return;
			}

			let mut protocol_byte = [0u8; 1];
			if self.socket.read(&mut protocol_byte) != 1 {
				return;
			}
			let Some(protocol) = ProtocolNumber::from_byte(protocol_byte[0]) else {
				debug!("ethernet: unknown protocol number, ignoring datagram");
				return;
			};

			let Poll::Ready(writer) = pool.request_frame_writer(body_length) else {
				info!("ethernet: no frame buffer, discarding datagram");
				return;
			};
			let Some(remote) = self.socket.remote_endpoint() else {
				return;
			};
			self.rx = Some(RxInFlight {
				remote,
				protocol,
				writer,
			});
		}

		let Some(rx) = self.rx.as_mut() else {
			return;
		};
		let chunk_length = rx.writer.writable_length().min(ETHERNET_CHUNK_SIZE);
		if chunk_length > 0 {
			let chunk = rx.writer.write_buffer_unchecked(chunk_length);
			let read = self.socket.read(chunk);
			if read < chunk_length {
				// datagram ended early; drop the malformed frame
				debug!("ethernet: truncated datagram, dropped");
				self.rx = None;
				return;
			}
		}
		if rx.writer.is_all_written() {
			let Some(rx) = self.rx.take() else {
				return;
			};
			let frame = LinkFrame {
				protocol_number: rx.protocol,
				remote: LinkAddress::Unicast(Address::from(rx.remote)),
				reader: rx.writer.create_reader(),
			};
			if let Err(frame) = self.broker.poll_dispatch_received_frame(frame) {
				self.pending_dispatch = Some(frame);
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::link::{MediaPortNumber, SharedLinkQueue};
	use crate::testutil::{reader_from, test_rng, Datagram, ScriptedUdpSocket};

	fn port(
		socket: ScriptedUdpSocket,
	) -> (EthernetPort<ScriptedUdpSocket>, SharedLinkQueue, FrameBufferPool) {
		let queue = SharedLinkQueue::new(Instant::ZERO);
		let mut rng = test_rng();
		let port = EthernetPort::new(socket, queue.broker(MediaPortNumber(0)), &mut rng);
		(port, queue, FrameBufferPool::new())
	}

	#[test]
	fn startup_programs_randomized_local_mac() {
		let (port, _queue, _pool) = port(ScriptedUdpSocket::new());
		let ((mac, udp_port), _) = port.socket.began_with.unwrap();
		assert_eq!(udp_port, ETHERNET_UDP_PORT);
		assert_eq!(mac[0] & 0b0000_0010, 0b0000_0010, "locally administered");
		assert_eq!(mac[0] & 0b0000_0001, 0, "unicast");
	}

	#[test]
	fn sends_protocol_byte_then_chunked_payload() {
		let (mut port, queue, pool) = port(ScriptedUdpSocket::new());
		let destination = UdpEndpoint {
			ip: [10, 0, 0, 2],
			port: 9000,
		};
		let socket = queue.socket(ProtocolNumber::Rpc);
		let mut payload = std::vec::Vec::new();
		payload.resize(100, 0x5a);
		assert!(socket
			.poll_request_send_frame(
				Address::from(destination).into(),
				reader_from(&pool, &payload),
				None
			)
			.is_ready());

		// 100 bytes need two 64-byte chunks, so two ticks
		port.execute(&pool, Instant::ZERO);
		assert!(port.socket.sent.is_empty());
		port.execute(&pool, Instant::ZERO);

		let sent = &port.socket.sent;
		assert_eq!(sent.len(), 1);
		assert_eq!(sent[0].remote, destination);
		assert_eq!(sent[0].payload[0], ProtocolNumber::Rpc as u8);
		assert_eq!(&sent[0].payload[1..], payload.as_slice());
	}

	#[test]
	fn refused_begin_packet_drops_frame_silently() {
		let mut socket = ScriptedUdpSocket::new();
		socket.refuse_begin_packet = true;
		let (mut port, queue, pool) = port(socket);
		let destination = UdpEndpoint {
			ip: [10, 0, 0, 2],
			port: 9000,
		};
		let link_socket = queue.socket(ProtocolNumber::Rpc);
		assert!(link_socket
			.poll_request_send_frame(
				Address::from(destination).into(),
				reader_from(&pool, b"x"),
				None
			)
			.is_ready());
		port.execute(&pool, Instant::ZERO);
		port.execute(&pool, Instant::ZERO);
		assert!(port.socket.sent.is_empty());
	}

	#[test]
	fn receives_datagram_across_ticks() {
		let mut socket = ScriptedUdpSocket::new();
		let remote = UdpEndpoint {
			ip: [10, 0, 0, 7],
			port: 7001,
		};
		let mut payload = std::vec::Vec::new();
		payload.push(ProtocolNumber::Rpc as u8);
		payload.resize(1 + 100, 0x41);
		socket.inbound.push_back(Datagram { remote, payload });
		let (mut port, queue, pool) = port(socket);

		port.execute(&pool, Instant::ZERO);
		// 100 body bytes take two chunks
		port.execute(&pool, Instant::ZERO);

		let Poll::Ready(frame) = queue.socket(ProtocolNumber::Rpc).poll_receive_frame() else {
			panic!("datagram not dispatched");
		};
		assert_eq!(frame.remote, LinkAddress::Unicast(Address::from(remote)));
		assert_eq!(frame.reader.origin().buffer_length(), 100);
	}

	#[test]
	fn oversized_datagram_is_ignored() {
		let mut socket = ScriptedUdpSocket::new();
		let remote = UdpEndpoint {
			ip: [10, 0, 0, 7],
			port: 7001,
		};
		let mut payload = std::vec::Vec::new();
		payload.resize(1 + MTU + 1, 0);
		payload[0] = ProtocolNumber::Rpc as u8;
		socket.inbound.push_back(Datagram { remote, payload });
		let (mut port, queue, pool) = port(socket);

		port.execute(&pool, Instant::ZERO);
		port.execute(&pool, Instant::ZERO);
		assert!(queue
			.socket(ProtocolNumber::Rpc)
			.poll_receive_frame()
			.is_pending());
	}

	#[test]
	fn missing_hardware_keeps_port_down() {
		let mut socket = ScriptedUdpSocket::new();
		socket.hardware = false;
		let remote = UdpEndpoint {
			ip: [10, 0, 0, 7],
			port: 7001,
		};
		socket.inbound.push_back(Datagram {
			remote,
			payload: std::vec![ProtocolNumber::Rpc as u8, 0x61],
		});
		let (mut port, queue, pool) = port(socket);
		port.execute(&pool, Instant::ZERO);
		port.execute(&pool, Instant::ZERO);
		assert!(queue
			.socket(ProtocolNumber::Rpc)
			.poll_receive_frame()
			.is_pending());
	}

	#[test]
	fn link_drop_clears_in_flight_state() {
		let (mut port, queue, pool) = port(ScriptedUdpSocket::new());
		let destination = UdpEndpoint {
			ip: [10, 0, 0, 2],
			port: 9000,
		};
		let socket = queue.socket(ProtocolNumber::Rpc);
		let mut payload = std::vec::Vec::new();
		payload.resize(100, 0);
		assert!(socket
			.poll_request_send_frame(
				Address::from(destination).into(),
				reader_from(&pool, &payload),
				None
			)
			.is_ready());

		// first chunk goes out, then the link drops
		port.execute(&pool, Instant::ZERO);
		assert!(port.tx.is_some());
		port.socket.link = false;
		let later = Instant::ZERO + ETHERNET_LINK_CHECK_INTERVAL;
		port.execute(&pool, later);
		assert!(port.tx.is_none());
		assert!(port.socket.sent.is_empty());
	}
}

//! Deterministic collaborators for unit tests: an in-memory serial stream,
//! a scripted UDP socket, a fixed-seed RNG and frame-buffer shorthand.

use core::task::Poll;
use std::collections::VecDeque;
use std::vec::Vec;

use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::buffer::{FrameBufferPool, FrameBufferReader};
use crate::link::UdpEndpoint;
use crate::media::ethernet::UdpSocketInterface;
use crate::media::LinkStream;

pub fn test_rng() -> ChaCha8Rng {
	ChaCha8Rng::from_seed([7; 32])
}

/// Builds a frozen reader holding `bytes`.
pub fn reader_from(pool: &FrameBufferPool, bytes: &[u8]) -> FrameBufferReader {
	let Poll::Ready(mut writer) = pool.request_frame_writer(bytes.len()) else {
		panic!("test pool exhausted");
	};
	writer.write_slice(bytes);
	writer.create_reader()
}

/// In-memory serial line: tests feed inbound bytes and inspect what the
/// driver wrote.
pub struct TestStream {
	input: VecDeque<u8>,
	output: Vec<u8>,
}

impl TestStream {
	pub fn new() -> Self {
		TestStream {
			input: VecDeque::new(),
			output: Vec::new(),
		}
	}

	pub fn feed(&mut self, bytes: &[u8]) {
		self.input.extend(bytes);
	}

	pub fn remaining_input(&self) -> Vec<u8> {
		self.input.iter().copied().collect()
	}

	pub fn written(&self) -> &[u8] {
		&self.output
	}

	/// Returns and clears everything written so far.
	pub fn take_written(&mut self) -> Vec<u8> {
		core::mem::take(&mut self.output)
	}
}

impl LinkStream for TestStream {
	fn poll_readable(&mut self, count: usize) -> Poll<()> {
		if self.input.len() >= count {
			Poll::Ready(())
		} else {
			Poll::Pending
		}
	}

	fn readable_count(&self) -> usize {
		self.input.len()
	}

	fn read_unchecked(&mut self) -> u8 {
		self.input.pop_front().unwrap_or(0)
	}

	fn poll_writable(&mut self, _count: usize) -> Poll<()> {
		Poll::Ready(())
	}

	fn write_unchecked(&mut self, byte: u8) {
		self.output.push(byte);
	}
}

/// One datagram handed to or taken from the scripted socket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Datagram {
	pub remote: UdpEndpoint,
	pub payload: Vec<u8>,
}

/// Scripted Ethernet shield: hardware presence, link state and inbound
/// datagrams are all set by the test.
pub struct ScriptedUdpSocket {
	pub hardware: bool,
	pub link: bool,
	pub dhcp_ok: bool,
	pub local: Option<UdpEndpoint>,
	pub inbound: VecDeque<Datagram>,
	pub sent: Vec<Datagram>,
	pub refuse_begin_packet: bool,
	pub began_with: Option<(([u8; 6], u16), bool)>,
	current_rx: Option<Datagram>,
	rx_offset: usize,
	current_tx: Option<Datagram>,
	pub last_set_ip: Option<[u8; 4]>,
	pub last_set_mask: Option<[u8; 4]>,
}

impl ScriptedUdpSocket {
	pub fn new() -> Self {
		ScriptedUdpSocket {
			hardware: true,
			link: true,
			dhcp_ok: true,
			local: Some(UdpEndpoint {
				ip: [192, 168, 0, 10],
				port: 8888,
			}),
			inbound: VecDeque::new(),
			sent: Vec::new(),
			refuse_begin_packet: false,
			began_with: None,
			current_rx: None,
			rx_offset: 0,
			current_tx: None,
			last_set_ip: None,
			last_set_mask: None,
		}
	}
}

impl UdpSocketInterface for ScriptedUdpSocket {
	fn hardware_present(&mut self) -> bool {
		self.hardware
	}

	fn begin(&mut self, mac: [u8; 6], port: u16) -> bool {
		self.began_with = Some(((mac, port), self.dhcp_ok));
		self.dhcp_ok
	}

	fn link_up(&mut self) -> bool {
		self.link
	}

	fn local_endpoint(&mut self) -> Option<UdpEndpoint> {
		self.local
	}

	fn begin_packet(&mut self, remote: UdpEndpoint) -> bool {
		if self.refuse_begin_packet {
			return false;
		}
		self.current_tx = Some(Datagram {
			remote,
			payload: Vec::new(),
		});
		true
	}

	fn write(&mut self, bytes: &[u8]) {
		if let Some(tx) = self.current_tx.as_mut() {
			tx.payload.extend_from_slice(bytes);
		}
	}

	fn end_packet(&mut self) {
		if let Some(tx) = self.current_tx.take() {
			self.sent.push(tx);
		}
	}

	fn parse_packet(&mut self) -> Option<usize> {
		let datagram = self.inbound.pop_front()?;
		let length = datagram.payload.len();
		self.current_rx = Some(datagram);
		self.rx_offset = 0;
		Some(length)
	}

	fn remote_endpoint(&mut self) -> Option<UdpEndpoint> {
		self.current_rx.as_ref().map(|datagram| datagram.remote)
	}

	fn read(&mut self, out: &mut [u8]) -> usize {
		let Some(rx) = self.current_rx.as_ref() else {
			return 0;
		};
		let available = rx.payload.len() - self.rx_offset;
		let count = available.min(out.len());
		out[..count].copy_from_slice(&rx.payload[self.rx_offset..self.rx_offset + count]);
		self.rx_offset += count;
		count
	}

	fn set_local_ip(&mut self, ip: [u8; 4]) {
		self.last_set_ip = Some(ip);
	}

	fn set_subnet_mask(&mut self, mask: [u8; 4]) {
		self.last_set_mask = Some(mask);
	}
}

//! Framed point-to-point serial bus.
//!
//! Wire layout: 8 preamble bytes (`0xAA`), protocol number, source address,
//! destination address, payload length, payload. The receiver hunts for the
//! preamble to resynchronise after line noise; any non-preamble byte resets
//! the hunt.

use core::task::Poll;

use heapless::Vec;

use super::{LinkStream, MediaInfo, MediaOperationError};
use crate::buffer::{FrameBufferPool, FrameBufferReader, FrameBufferWriter};
use crate::link::{
	Address, AddressType, FrameBroker, LinkAddress, LinkFrame, ProtocolNumber, SerialAddress,
};

pub const PREAMBLE: u8 = 0b1010_1010;
pub const PREAMBLE_LENGTH: usize = 8;
const HEADER_LENGTH: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SerialFrameHeader {
	pub protocol_number: ProtocolNumber,
	pub source: SerialAddress,
	pub destination: SerialAddress,
	pub length: u8,
}

impl SerialFrameHeader {
	pub fn serialize(&self) -> [u8; HEADER_LENGTH] {
		[
			self.protocol_number as u8,
			self.source.0,
			self.destination.0,
			self.length,
		]
	}

	/// `None` when the protocol byte is not a recognised protocol number.
	pub fn deserialize(bytes: &[u8; HEADER_LENGTH]) -> Option<SerialFrameHeader> {
		Some(SerialFrameHeader {
			protocol_number: ProtocolNumber::from_byte(bytes[0])?,
			source: SerialAddress(bytes[1]),
			destination: SerialAddress(bytes[2]),
			length: bytes[3],
		})
	}
}

enum RxState {
	Preamble { seen: usize },
	Header { bytes: Vec<u8, HEADER_LENGTH> },
	Payload { header: SerialFrameHeader, writer: FrameBufferWriter },
	/// Dispatch could not be completed last tick; retry with the same frame.
	Dispatch { frame: LinkFrame },
	Discard { remaining: usize },
}

struct TxTask {
	wire_prefix: Vec<u8, { PREAMBLE_LENGTH + HEADER_LENGTH }>,
	prefix_sent: usize,
	reader: FrameBufferReader,
}

/// Driver for one framed serial bus attachment.
pub struct SerialPort<RW: LinkStream> {
	stream: RW,
	broker: FrameBroker,
	self_address: Option<SerialAddress>,
	rx: RxState,
	tx: Option<TxTask>,
}

impl<RW: LinkStream> SerialPort<RW> {
	pub fn new(stream: RW, broker: FrameBroker) -> Self {
		SerialPort {
			stream,
			broker,
			self_address: None,
			rx: RxState::Preamble { seen: 0 },
			tx: None,
		}
	}

	pub fn media_info(&self) -> MediaInfo {
		MediaInfo {
			address_type: Some(AddressType::Serial),
			local_address: self.self_address.map(Address::from),
		}
	}

	pub fn local_address(&self) -> Option<SerialAddress> {
		self.self_address
	}

	#[cfg(test)]
	pub(crate) fn stream_mut(&mut self) -> &mut RW {
		&mut self.stream
	}

	/// Assigns the bus address before the first frame arrives. After the
	/// address is fixed (assigned or adopted) it cannot change.
	pub fn try_initialize_local_address(
		&mut self,
		address: SerialAddress,
	) -> Result<(), MediaOperationError> {
		if self.self_address.is_some() {
			return Err(MediaOperationError::AlreadyConfigured);
		}
		self.self_address = Some(address);
		Ok(())
	}

	pub fn execute(&mut self, pool: &FrameBufferPool) {
		self.execute_receive(pool);
		self.execute_send();
	}

	fn execute_receive(&mut self, pool: &FrameBufferPool) {
		loop {
			let state = core::mem::replace(&mut self.rx, RxState::Preamble { seen: 0 });
			match state {
				RxState::Preamble { mut seen } => {
					while seen < PREAMBLE_LENGTH {
						if self.stream.poll_readable(1).is_pending() {
							self.rx = RxState::Preamble { seen };
							return;
						}
						if self.stream.read_unchecked() == PREAMBLE {
							seen += 1;
						} else {
							seen = 0;
						}
					}
					self.rx = RxState::Header { bytes: Vec::new() };
				}
				RxState::Header { mut bytes } => {
					while !bytes.is_full() {
						if self.stream.poll_readable(1).is_pending() {
							self.rx = RxState::Header { bytes };
							return;
						}
						let _ = bytes.push(self.stream.read_unchecked());
					}
					let mut raw = [0u8; HEADER_LENGTH];
					raw.copy_from_slice(&bytes);
					self.rx = self.classify_header(&raw, pool);
				}
				RxState::Payload { header, mut writer } => {
					while !writer.is_all_written() {
						if self.stream.poll_readable(1).is_pending() {
							self.rx = RxState::Payload { header, writer };
							return;
						}
						writer.write(self.stream.read_unchecked());
					}
					let frame = LinkFrame {
						protocol_number: header.protocol_number,
						remote: LinkAddress::from(Address::from(header.source)),
						reader: writer.create_reader(),
					};
					self.rx = RxState::Dispatch { frame };
				}
				RxState::Dispatch { frame } => {
					match self.broker.poll_dispatch_received_frame(frame) {
						Ok(()) => {
							self.rx = RxState::Preamble { seen: 0 };
						}
						Err(frame) => {
							// queue full; hold the frame and retry next tick
							self.rx = RxState::Dispatch { frame };
							return;
						}
					}
				}
				RxState::Discard { mut remaining } => {
					while remaining > 0 {
						if self.stream.poll_readable(1).is_pending() {
							self.rx = RxState::Discard { remaining };
							return;
						}
						self.stream.read_unchecked();
						remaining -= 1;
					}
					self.rx = RxState::Preamble { seen: 0 };
				}
			}
		}
	}

	fn classify_header(&mut self, raw: &[u8; HEADER_LENGTH], pool: &FrameBufferPool) -> RxState {
		let Some(header) = SerialFrameHeader::deserialize(raw) else {
			debug!("serial: invalid header, resyncing");
			return RxState::Discard {
				remaining: raw[3] as usize,
			};
		};

		// the first addressed frame tells a fresh node its own number
		if self.self_address.is_none() {
			debug!("serial: adopting self address {}", header.destination.0);
			self.self_address = Some(header.destination);
		}

		if Some(header.destination) != self.self_address {
			return RxState::Discard {
				remaining: header.length as usize,
			};
		}

		match pool.request_frame_writer(header.length as usize) {
			Poll::Ready(writer) => RxState::Payload { header, writer },
			Poll::Pending => {
				info!("serial: no frame buffer, discarding frame");
				RxState::Discard {
					remaining: header.length as usize,
				}
			}
		}
	}

	fn execute_send(&mut self) {
		loop {
			if self.tx.is_none() {
				// a node that does not know its own address yet cannot
				// stamp a source field
				let Some(self_address) = self.self_address else {
					return;
				};
				let Poll::Ready(frame) = self
					.broker
					.poll_get_send_requested_frame(AddressType::Serial, None)
				else {
					return;
				};
				let Some(destination) =
					frame.remote.unicast_address().and_then(SerialAddress::try_from_address)
				else {
					// broadcast has no wire form on this bus
					debug!("serial: dropping frame without unicast serial destination");
					continue;
				};
				let header = SerialFrameHeader {
					protocol_number: frame.protocol_number,
					source: self_address,
					destination,
					length: frame.reader.buffer_length() as u8,
				};
				let mut wire_prefix = Vec::new();
				let _ = wire_prefix.extend_from_slice(&[PREAMBLE; PREAMBLE_LENGTH]);
				let _ = wire_prefix.extend_from_slice(&header.serialize());
				self.tx = Some(TxTask {
					wire_prefix,
					prefix_sent: 0,
					reader: frame.reader,
				});
			}

			let Some(task) = self.tx.as_mut() else {
				return;
			};
			while task.prefix_sent < task.wire_prefix.len() {
				if self.stream.poll_writable(1).is_pending() {
					return;
				}
				self.stream.write_unchecked(task.wire_prefix[task.prefix_sent]);
				task.prefix_sent += 1;
			}
			while !task.reader.is_all_read() {
				if self.stream.poll_writable(1).is_pending() {
					return;
				}
				self.stream.write_unchecked(task.reader.read_byte());
			}
			self.tx = None;
		}
	}
}

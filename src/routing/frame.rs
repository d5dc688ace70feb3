//! Routing frame identity and header wire format.
//!
//! Header layout, big-endian, in order: source node id, destination node
//! id, destination cluster byte (`0` = none), previous-hop node id, 2-byte
//! frame id.

use crate::buffer::{FrameBufferReader, FrameBufferWriter};
use crate::node::{Destination, NodeId, OptionalClusterId};

/// Random tag a sender stamps on a frame so the mesh can suppress the
/// copies that flood back during propagation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FrameId(pub u16);

pub const FRAME_ID_LENGTH: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoutingFrameHeader {
	pub source: NodeId,
	pub destination: Destination,
	pub previous_hop: NodeId,
	pub frame_id: FrameId,
}

impl RoutingFrameHeader {
	pub fn serialized_length(&self) -> usize {
		self.source.serialized_length()
			+ self.destination.node_id.serialized_length()
			+ 1
			+ self.previous_hop.serialized_length()
			+ FRAME_ID_LENGTH
	}

	pub fn serialize(&self, writer: &mut FrameBufferWriter) {
		let mut scratch = [0u8; 7];

		let n = self.source.serialize(&mut scratch);
		writer.write_slice(&scratch[..n]);

		let n = self.destination.node_id.serialize(&mut scratch);
		writer.write_slice(&scratch[..n]);
		writer.write(self.destination.cluster_id.raw());

		let n = self.previous_hop.serialize(&mut scratch);
		writer.write_slice(&scratch[..n]);

		writer.write_slice(&self.frame_id.0.to_be_bytes());
	}

	/// Consumes the header from the front of `reader`. `None` leaves the
	/// reader in an unspecified position; the frame is discarded anyway.
	pub fn deserialize(reader: &mut FrameBufferReader) -> Option<RoutingFrameHeader> {
		let source = read_node_id(reader)?;
		let destination_id = read_node_id(reader)?;
		if reader.readable_length() < 1 {
			return None;
		}
		let cluster_id = OptionalClusterId::new(reader.read_byte());
		let previous_hop = read_node_id(reader)?;
		if reader.readable_length() < FRAME_ID_LENGTH {
			return None;
		}
		let frame_id = {
			let bytes = reader.read_buffer_unchecked(FRAME_ID_LENGTH);
			FrameId(u16::from_be_bytes([bytes[0], bytes[1]]))
		};
		Some(RoutingFrameHeader {
			source,
			destination: Destination {
				node_id: destination_id,
				cluster_id,
			},
			previous_hop,
			frame_id,
		})
	}
}

fn read_node_id(reader: &mut FrameBufferReader) -> Option<NodeId> {
	// longest node id on the wire is tag + 6 body bytes
	let available = reader.readable_length().min(7);
	let peeked = &reader.peek_remaining()[..available];
	let (node_id, consumed) = NodeId::deserialize(peeked)?;
	reader.read_buffer_unchecked(consumed);
	Some(node_id)
}

/// A parsed routing frame. The payload reader starts right after the
/// header.
#[derive(Debug)]
pub struct RoutingFrame {
	pub source: NodeId,
	pub destination: Destination,
	pub previous_hop: NodeId,
	pub frame_id: FrameId,
	pub payload: FrameBufferReader,
}

#[cfg(test)]
mod tests {
	use core::task::Poll;

	use super::*;
	use crate::buffer::FrameBufferPool;
	use crate::link::{Address, SerialAddress, UdpEndpoint};

	#[test]
	fn header_round_trip() {
		let pool = FrameBufferPool::new();
		let header = RoutingFrameHeader {
			source: NodeId::from(Address::from(SerialAddress(3))),
			destination: Destination {
				node_id: NodeId::from(Address::from(UdpEndpoint {
					ip: [10, 0, 0, 1],
					port: 8888,
				})),
				cluster_id: OptionalClusterId::new(4),
			},
			previous_hop: NodeId::from(Address::from(SerialAddress(9))),
			frame_id: FrameId(0xbeef),
		};

		let Poll::Ready(mut writer) = pool.request_frame_writer(header.serialized_length())
		else {
			panic!("pool exhausted");
		};
		header.serialize(&mut writer);
		let mut reader = writer.create_reader();
		let parsed = RoutingFrameHeader::deserialize(&mut reader).unwrap();
		assert_eq!(parsed, header);
		assert!(reader.is_all_read());
	}

	#[test]
	fn broadcast_destination_round_trip() {
		let pool = FrameBufferPool::new();
		let header = RoutingFrameHeader {
			source: NodeId::from(Address::from(SerialAddress(1))),
			destination: Destination::broadcast(),
			previous_hop: NodeId::from(Address::from(SerialAddress(1))),
			frame_id: FrameId(1),
		};
		let Poll::Ready(mut writer) = pool.request_frame_writer(header.serialized_length())
		else {
			panic!("pool exhausted");
		};
		header.serialize(&mut writer);
		let mut reader = writer.create_reader();
		assert_eq!(RoutingFrameHeader::deserialize(&mut reader), Some(header));
	}

	#[test]
	fn truncated_header_is_rejected() {
		let pool = FrameBufferPool::new();
		let Poll::Ready(mut writer) = pool.request_frame_writer(2) else {
			panic!("pool exhausted");
		};
		writer.write_slice(&[0x01, 0x05]); // serial source, then nothing
		let mut reader = writer.create_reader();
		assert_eq!(RoutingFrameHeader::deserialize(&mut reader), None);
	}
}

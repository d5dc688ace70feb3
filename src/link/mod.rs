//! Link layer: uniform addressing, frames, and the broker that mediates
//! between media ports and upper-layer protocols.

pub mod address;
pub mod queue;

use core::fmt;

pub use self::address::{
	Address, AddressType, AddressTypeSet, LinkAddress, SerialAddress, UdpEndpoint, UhfModemId,
};
pub use self::queue::{FrameBroker, LinkFrameQueue, LinkSocket, SharedLinkQueue};
use crate::buffer::FrameBufferReader;

/// Upper-layer protocols multiplexed over the link layer. The broker routes
/// inbound frames by this tag; unknown values never make it past a port's
/// wire parser.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ProtocolNumber {
	RoutingNeighbor = 0x01,
	RoutingReactive = 0x02,
	Rpc = 0x03,
	Observer = 0x04,
	Tunnel = 0x05,
}

impl ProtocolNumber {
	pub fn from_byte(byte: u8) -> Option<ProtocolNumber> {
		match byte {
			0x01 => Some(ProtocolNumber::RoutingNeighbor),
			0x02 => Some(ProtocolNumber::RoutingReactive),
			0x03 => Some(ProtocolNumber::Rpc),
			0x04 => Some(ProtocolNumber::Observer),
			0x05 => Some(ProtocolNumber::Tunnel),
			_ => None,
		}
	}
}

/// Index of a registered media port, assigned in registration order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct MediaPortNumber(pub u8);

impl fmt::Display for MediaPortNumber {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "port{}", self.0)
	}
}

/// One link-layer frame, either direction. The reader spans protocol-free
/// payload bytes; the protocol number and remote travel alongside.
#[derive(Debug)]
pub struct LinkFrame {
	pub protocol_number: ProtocolNumber,
	pub remote: LinkAddress,
	pub reader: FrameBufferReader,
}

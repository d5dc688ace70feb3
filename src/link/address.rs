//! Link-layer addressing.
//!
//! Each medium names its peers differently (modem id, bus number, IP/port);
//! [`Address`] is the uniform container the broker and upper layers work
//! with, tagged by [`AddressType`]. The per-medium types at the bottom of
//! this module convert between the uniform form and what actually goes on
//! the wire.

use core::fmt;

pub const MAX_ADDRESS_BODY_LENGTH: usize = 6;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum AddressType {
	Serial = 0x01,
	Uhf = 0x02,
	Udp = 0x03,
	WebSocket = 0x04,
}

impl AddressType {
	pub const ALL: [AddressType; 4] = [
		AddressType::Serial,
		AddressType::Uhf,
		AddressType::Udp,
		AddressType::WebSocket,
	];

	pub fn from_byte(byte: u8) -> Option<AddressType> {
		match byte {
			0x01 => Some(AddressType::Serial),
			0x02 => Some(AddressType::Uhf),
			0x03 => Some(AddressType::Udp),
			0x04 => Some(AddressType::WebSocket),
			_ => None,
		}
	}

	pub const fn body_length(self) -> usize {
		match self {
			AddressType::Serial | AddressType::Uhf => 1,
			AddressType::Udp | AddressType::WebSocket => 6,
		}
	}
}

bitflags::bitflags! {
	/// Set of address types, one bit per [`AddressType`].
	#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
	pub struct AddressTypeSet: u8 {
		const SERIAL = 0b0001;
		const UHF = 0b0010;
		const UDP = 0b0100;
		const WEB_SOCKET = 0b1000;
	}
}

impl AddressTypeSet {
	pub fn of(address_type: AddressType) -> AddressTypeSet {
		match address_type {
			AddressType::Serial => AddressTypeSet::SERIAL,
			AddressType::Uhf => AddressTypeSet::UHF,
			AddressType::Udp => AddressTypeSet::UDP,
			AddressType::WebSocket => AddressTypeSet::WEB_SOCKET,
		}
	}

	pub fn contains_type(self, address_type: AddressType) -> bool {
		self.contains(Self::of(address_type))
	}
}

impl From<AddressType> for AddressTypeSet {
	fn from(address_type: AddressType) -> Self {
		Self::of(address_type)
	}
}

/// A peer address: type tag plus a body whose length the tag dictates.
/// Comparison looks at the tag and exactly that many body bytes.
#[derive(Clone, Copy)]
pub struct Address {
	address_type: AddressType,
	body: [u8; MAX_ADDRESS_BODY_LENGTH],
}

impl Address {
	/// Panics if `body` does not match the tag's body length. Wire-facing
	/// callers validate lengths before constructing addresses.
	pub fn new(address_type: AddressType, body: &[u8]) -> Address {
		assert_eq!(body.len(), address_type.body_length());
		let mut stored = [0u8; MAX_ADDRESS_BODY_LENGTH];
		stored[..body.len()].copy_from_slice(body);
		Address {
			address_type,
			body: stored,
		}
	}

	pub fn address_type(&self) -> AddressType {
		self.address_type
	}

	pub fn body(&self) -> &[u8] {
		&self.body[..self.address_type.body_length()]
	}

	pub fn serialized_length(&self) -> usize {
		1 + self.address_type.body_length()
	}

	/// Writes tag + body into `out`, returning the number of bytes written.
	pub fn serialize(&self, out: &mut [u8]) -> usize {
		out[0] = self.address_type as u8;
		let body = self.body();
		out[1..1 + body.len()].copy_from_slice(body);
		1 + body.len()
	}

	/// Parses tag + body from the front of `bytes`, returning the address
	/// and the number of bytes consumed.
	pub fn deserialize(bytes: &[u8]) -> Option<(Address, usize)> {
		let address_type = AddressType::from_byte(*bytes.first()?)?;
		let body_length = address_type.body_length();
		let body = bytes.get(1..1 + body_length)?;
		Some((Address::new(address_type, body), 1 + body_length))
	}
}

impl PartialEq for Address {
	fn eq(&self, other: &Address) -> bool {
		self.address_type == other.address_type && self.body() == other.body()
	}
}

impl Eq for Address {}

impl fmt::Debug for Address {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{:?}(", self.address_type)?;
		for (i, byte) in self.body().iter().enumerate() {
			if i > 0 {
				write!(f, ".")?;
			}
			write!(f, "{byte}")?;
		}
		write!(f, ")")
	}
}

impl fmt::Display for Address {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Debug::fmt(self, f)
	}
}

/// Destination of a link-layer frame: a concrete peer, or everyone
/// reachable over one address type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkAddress {
	Unicast(Address),
	Broadcast(AddressType),
}

impl LinkAddress {
	pub fn address_type(&self) -> AddressType {
		match self {
			LinkAddress::Unicast(address) => address.address_type(),
			LinkAddress::Broadcast(address_type) => *address_type,
		}
	}

	pub fn is_unicast(&self) -> bool {
		matches!(self, LinkAddress::Unicast(_))
	}

	pub fn unicast_address(&self) -> Option<&Address> {
		match self {
			LinkAddress::Unicast(address) => Some(address),
			LinkAddress::Broadcast(_) => None,
		}
	}
}

impl From<Address> for LinkAddress {
	fn from(address: Address) -> Self {
		LinkAddress::Unicast(address)
	}
}

/// UHF modem id. `0x00` addresses every modem in range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UhfModemId(pub u8);

impl UhfModemId {
	pub const BROADCAST: UhfModemId = UhfModemId(0x00);

	pub fn is_broadcast(self) -> bool {
		self.0 == 0x00
	}

	pub fn try_from_address(address: &Address) -> Option<UhfModemId> {
		(address.address_type() == AddressType::Uhf).then(|| UhfModemId(address.body()[0]))
	}

	/// Broadcast link addresses map onto the modem's broadcast id.
	pub fn try_from_link_address(address: &LinkAddress) -> Option<UhfModemId> {
		match address {
			LinkAddress::Unicast(address) => Self::try_from_address(address),
			LinkAddress::Broadcast(AddressType::Uhf) => Some(UhfModemId::BROADCAST),
			LinkAddress::Broadcast(_) => None,
		}
	}
}

impl From<UhfModemId> for Address {
	fn from(id: UhfModemId) -> Address {
		Address::new(AddressType::Uhf, &[id.0])
	}
}

/// Node number on the wired serial bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SerialAddress(pub u8);

impl SerialAddress {
	pub fn try_from_address(address: &Address) -> Option<SerialAddress> {
		(address.address_type() == AddressType::Serial).then(|| SerialAddress(address.body()[0]))
	}
}

impl From<SerialAddress> for Address {
	fn from(address: SerialAddress) -> Address {
		Address::new(AddressType::Serial, &[address.0])
	}
}

/// IPv4 endpoint, stored as 4 address octets plus a big-endian port, the
/// exact body layout of `Udp` and `WebSocket` addresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UdpEndpoint {
	pub ip: [u8; 4],
	pub port: u16,
}

impl UdpEndpoint {
	pub fn try_from_address(address: &Address) -> Option<UdpEndpoint> {
		if address.address_type() != AddressType::Udp
			&& address.address_type() != AddressType::WebSocket
		{
			return None;
		}
		let body = address.body();
		Some(UdpEndpoint {
			ip: [body[0], body[1], body[2], body[3]],
			port: u16::from_be_bytes([body[4], body[5]]),
		})
	}

	pub fn to_address(self, address_type: AddressType) -> Address {
		debug_assert!(matches!(address_type, AddressType::Udp | AddressType::WebSocket));
		let port = self.port.to_be_bytes();
		Address::new(
			address_type,
			&[self.ip[0], self.ip[1], self.ip[2], self.ip[3], port[0], port[1]],
		)
	}
}

impl From<UdpEndpoint> for Address {
	fn from(endpoint: UdpEndpoint) -> Address {
		endpoint.to_address(AddressType::Udp)
	}
}

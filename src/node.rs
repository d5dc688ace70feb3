//! Logical node identity, routing destinations and path cost.

use core::fmt;
use core::time::Duration;

use crate::link::address::MAX_ADDRESS_BODY_LENGTH;
use crate::link::{Address, AddressType};

const BROADCAST_TAG: u8 = 0xff;

/// Identifies a node network-wide. Regular ids reuse the link-address tag
/// and body of the node's "home" medium; the broadcast id (tag `0xff`, no
/// body) addresses everyone.
#[derive(Clone, Copy)]
pub struct NodeId {
	tag: u8,
	body: [u8; MAX_ADDRESS_BODY_LENGTH],
	body_length: u8,
}

impl NodeId {
	pub const BROADCAST: NodeId = NodeId {
		tag: BROADCAST_TAG,
		body: [0; MAX_ADDRESS_BODY_LENGTH],
		body_length: 0,
	};

	pub fn from_address(address: &Address) -> NodeId {
		let mut body = [0u8; MAX_ADDRESS_BODY_LENGTH];
		let address_body = address.body();
		body[..address_body.len()].copy_from_slice(address_body);
		NodeId {
			tag: address.address_type() as u8,
			body,
			body_length: address_body.len() as u8,
		}
	}

	pub fn is_broadcast(&self) -> bool {
		self.tag == BROADCAST_TAG
	}

	pub fn body(&self) -> &[u8] {
		&self.body[..self.body_length as usize]
	}

	/// The link address this id is derived from; `None` for broadcast.
	pub fn to_address(&self) -> Option<Address> {
		let address_type = AddressType::from_byte(self.tag)?;
		Some(Address::new(address_type, self.body()))
	}

	pub fn serialized_length(&self) -> usize {
		1 + self.body_length as usize
	}

	pub fn serialize(&self, out: &mut [u8]) -> usize {
		out[0] = self.tag;
		let body = self.body();
		out[1..1 + body.len()].copy_from_slice(body);
		1 + body.len()
	}

	pub fn deserialize(bytes: &[u8]) -> Option<(NodeId, usize)> {
		let tag = *bytes.first()?;
		if tag == BROADCAST_TAG {
			return Some((NodeId::BROADCAST, 1));
		}
		let address_type = AddressType::from_byte(tag)?;
		let body_length = address_type.body_length();
		let body_bytes = bytes.get(1..1 + body_length)?;
		let mut body = [0u8; MAX_ADDRESS_BODY_LENGTH];
		body[..body_length].copy_from_slice(body_bytes);
		Some((
			NodeId {
				tag,
				body,
				body_length: body_length as u8,
			},
			1 + body_length,
		))
	}
}

impl From<Address> for NodeId {
	fn from(address: Address) -> NodeId {
		NodeId::from_address(&address)
	}
}

impl PartialEq for NodeId {
	fn eq(&self, other: &NodeId) -> bool {
		self.tag == other.tag && self.body() == other.body()
	}
}

impl Eq for NodeId {}

impl fmt::Debug for NodeId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if self.is_broadcast() {
			return write!(f, "NodeId(broadcast)");
		}
		write!(f, "NodeId({}", self.tag)?;
		for byte in self.body() {
			write!(f, ".{byte}")?;
		}
		write!(f, ")")
	}
}

/// One byte on the wire; zero means "no cluster".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OptionalClusterId(u8);

impl OptionalClusterId {
	pub const NONE: OptionalClusterId = OptionalClusterId(0);

	pub fn new(id: u8) -> OptionalClusterId {
		OptionalClusterId(id)
	}

	pub fn is_none(&self) -> bool {
		self.0 == 0
	}

	pub fn raw(&self) -> u8 {
		self.0
	}
}

/// Where a routing frame wants to go.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Destination {
	pub node_id: NodeId,
	pub cluster_id: OptionalClusterId,
}

impl Destination {
	pub fn broadcast() -> Destination {
		Destination {
			node_id: NodeId::BROADCAST,
			cluster_id: OptionalClusterId::NONE,
		}
	}

	pub fn node(node_id: NodeId) -> Destination {
		Destination {
			node_id,
			cluster_id: OptionalClusterId::NONE,
		}
	}

	pub fn cluster(cluster_id: OptionalClusterId) -> Destination {
		Destination {
			node_id: NodeId::BROADCAST,
			cluster_id,
		}
	}

	pub fn is_unicast(&self) -> bool {
		!self.node_id.is_broadcast()
	}

	pub fn is_multicast(&self) -> bool {
		self.node_id.is_broadcast() && !self.cluster_id.is_none()
	}

	pub fn is_broadcast(&self) -> bool {
		self.node_id.is_broadcast() && self.cluster_id.is_none()
	}
}

/// Additive path metric. One cost unit stretches a routing frame's repeat
/// delay by one millisecond.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Cost(u16);

impl Cost {
	pub const ZERO: Cost = Cost(0);

	pub const fn new(value: u16) -> Cost {
		Cost(value)
	}

	pub const fn value(&self) -> u16 {
		self.0
	}
}

impl core::ops::Add for Cost {
	type Output = Cost;

	fn add(self, rhs: Cost) -> Cost {
		Cost(self.0.saturating_add(rhs.0))
	}
}

impl From<Cost> for Duration {
	fn from(cost: Cost) -> Duration {
		Duration::from_millis(cost.0 as u64)
	}
}

/// What the routing overlay needs to know about the node it runs on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LocalNodeInfo {
	pub id: NodeId,
	pub cluster_id: OptionalClusterId,
	/// This node's own contribution to any path through it.
	pub cost: Cost,
}

impl LocalNodeInfo {
	pub fn new(id: NodeId) -> LocalNodeInfo {
		LocalNodeInfo {
			id,
			cluster_id: OptionalClusterId::NONE,
			cost: Cost::ZERO,
		}
	}

	/// Does a frame addressed to `destination` include this node?
	pub fn matches(&self, destination: &Destination) -> bool {
		if destination.is_unicast() {
			return destination.node_id == self.id;
		}
		if destination.is_multicast() {
			return destination.cluster_id == self.cluster_id;
		}
		true
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::link::SerialAddress;

	fn node(n: u8) -> NodeId {
		NodeId::from(Address::from(SerialAddress(n)))
	}

	#[test]
	fn node_id_round_trip() {
		for id in [node(7), NodeId::BROADCAST, NodeId::from(Address::new(
			AddressType::Udp,
			&[1, 2, 3, 4, 5, 6],
		))] {
			let mut wire = [0u8; 7];
			let written = id.serialize(&mut wire);
			let (parsed, consumed) = NodeId::deserialize(&wire).unwrap();
			assert_eq!(written, consumed);
			assert_eq!(parsed, id);
		}
	}

	#[test]
	fn destination_predicates() {
		assert!(Destination::node(node(1)).is_unicast());
		assert!(Destination::broadcast().is_broadcast());
		let multicast = Destination::cluster(OptionalClusterId::new(3));
		assert!(multicast.is_multicast());
		assert!(!multicast.is_broadcast());
	}

	#[test]
	fn local_node_matching() {
		let mut local = LocalNodeInfo::new(node(5));
		local.cluster_id = OptionalClusterId::new(2);

		assert!(local.matches(&Destination::node(node(5))));
		assert!(!local.matches(&Destination::node(node(6))));
		assert!(local.matches(&Destination::broadcast()));
		assert!(local.matches(&Destination::cluster(OptionalClusterId::new(2))));
		assert!(!local.matches(&Destination::cluster(OptionalClusterId::new(9))));
	}

	#[test]
	fn cost_to_duration() {
		assert_eq!(Duration::from(Cost::new(120)), Duration::from_millis(120));
		assert_eq!(Cost::new(65535) + Cost::new(10), Cost::new(65535));
	}
}

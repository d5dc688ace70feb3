//! Delay pool: received routing frames wait out a cost-derived delay here
//! before they are accepted or repeated, ordered by expiry rather than by
//! arrival.

use core::time::Duration;

use heapless::binary_heap::{BinaryHeap, Min};

use super::frame::RoutingFrame;
use crate::config::ROUTING_DELAY_POOL_CAPACITY;
use crate::time::Instant;

struct Entry {
	expires_at: Instant,
	/// Arrival order as a tiebreak so equal expiries stay stable.
	sequence: u32,
	frame: RoutingFrame,
}

impl PartialEq for Entry {
	fn eq(&self, other: &Entry) -> bool {
		self.expires_at == other.expires_at && self.sequence == other.sequence
	}
}

impl Eq for Entry {}

impl PartialOrd for Entry {
	fn partial_cmp(&self, other: &Entry) -> Option<core::cmp::Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for Entry {
	fn cmp(&self, other: &Entry) -> core::cmp::Ordering {
		(self.expires_at, self.sequence).cmp(&(other.expires_at, other.sequence))
	}
}

/// Min-heap of delayed routing frames, bounded at
/// [`ROUTING_DELAY_POOL_CAPACITY`].
pub struct DelayPool {
	heap: BinaryHeap<Entry, Min, ROUTING_DELAY_POOL_CAPACITY>,
	sequence: u32,
}

impl DelayPool {
	pub fn new() -> Self {
		DelayPool {
			heap: BinaryHeap::new(),
			sequence: 0,
		}
	}

	/// `Err` returns the frame when the pool is full.
	pub fn push(
		&mut self,
		now: Instant,
		frame: RoutingFrame,
		delay: Duration,
	) -> Result<(), RoutingFrame> {
		let entry = Entry {
			expires_at: now + delay,
			sequence: self.sequence,
			frame,
		};
		match self.heap.push(entry) {
			Ok(()) => {
				self.sequence = self.sequence.wrapping_add(1);
				Ok(())
			}
			Err(entry) => Err(entry.frame),
		}
	}

	/// Is the earliest-expiring frame due?
	pub fn has_expired(&self, now: Instant) -> bool {
		self.heap
			.peek()
			.is_some_and(|entry| entry.expires_at <= now)
	}

	/// Removes and returns the earliest-expiring frame if it is due.
	pub fn pop_expired(&mut self, now: Instant) -> Option<RoutingFrame> {
		if self.has_expired(now) {
			self.heap.pop().map(|entry| entry.frame)
		} else {
			None
		}
	}

	pub fn len(&self) -> usize {
		self.heap.len()
	}

	pub fn is_empty(&self) -> bool {
		self.heap.is_empty()
	}
}

impl Default for DelayPool {
	fn default() -> Self {
		Self::new()
	}
}

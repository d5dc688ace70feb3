//! Duplicate suppression for routing frames.

use heapless::Vec;
use rand_chacha::rand_core::RngCore;

use super::frame::FrameId;
use crate::config::FRAME_ID_CACHE_SIZE;

/// Ring of recently seen frame ids. Once the ring is full every insert
/// evicts the oldest entry, so an id suppresses duplicates for at least the
/// ring depth of distinct newer ids.
pub struct FrameIdCache {
	entries: Vec<FrameId, FRAME_ID_CACHE_SIZE>,
	next: usize,
}

impl FrameIdCache {
	pub fn new() -> Self {
		FrameIdCache {
			entries: Vec::new(),
			next: 0,
		}
	}

	pub fn contains(&self, id: FrameId) -> bool {
		self.entries.contains(&id)
	}

	/// Inserts `id` and reports whether it was already present.
	pub fn insert_and_check_contains(&mut self, id: FrameId) -> bool {
		if self.contains(id) {
			return true;
		}
		self.insert(id);
		false
	}

	fn insert(&mut self, id: FrameId) {
		if self.entries.is_full() {
			self.entries[self.next] = id;
			self.next = (self.next + 1) % self.entries.capacity();
		} else {
			let _ = self.entries.push(id);
		}
	}

	/// Draws a fresh id that is not currently cached and inserts it, so this
	/// node's own echo of the frame is suppressed on arrival.
	pub fn generate(&mut self, rng: &mut impl RngCore) -> FrameId {
		loop {
			let id = FrameId(rng.next_u32() as u16);
			if !self.contains(id) {
				self.insert(id);
				return id;
			}
		}
	}
}

impl Default for FrameIdCache {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testutil::test_rng;

	#[test]
	fn suppresses_duplicates() {
		let mut cache = FrameIdCache::new();
		assert!(!cache.insert_and_check_contains(FrameId(0xbeef)));
		assert!(cache.insert_and_check_contains(FrameId(0xbeef)));
	}

	#[test]
	fn retains_at_least_ring_depth() {
		let mut cache = FrameIdCache::new();
		cache.insert_and_check_contains(FrameId(0));
		for i in 1..FRAME_ID_CACHE_SIZE as u16 {
			cache.insert_and_check_contains(FrameId(i));
		}
		// the ring is exactly full; the first id is still suppressed
		assert!(cache.insert_and_check_contains(FrameId(0)));
	}

	#[test]
	fn evicts_oldest_when_full() {
		let mut cache = FrameIdCache::new();
		for i in 0..=FRAME_ID_CACHE_SIZE as u16 {
			cache.insert_and_check_contains(FrameId(i));
		}
		// id 0 was pushed out by the overflowing insert
		assert!(!cache.insert_and_check_contains(FrameId(0)));
	}

	#[test]
	fn generated_ids_are_cached() {
		let mut cache = FrameIdCache::new();
		let mut rng = test_rng();
		let id = cache.generate(&mut rng);
		assert!(cache.insert_and_check_contains(id));
	}
}

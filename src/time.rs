//! Millisecond-resolution wall clock handed in by the host.
//!
//! The stack never reads a hardware timer itself. Every `execute` and `poll`
//! that depends on time takes the current [`Instant`] as an argument, which
//! keeps the whole stack deterministic under test.

use core::fmt;
use core::ops::{Add, AddAssign, Sub};
use core::time::Duration;

/// A point in time, measured in milliseconds since an arbitrary epoch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Instant(u64);

impl Instant {
	pub const ZERO: Instant = Instant(0);

	pub const fn from_millis(millis: u64) -> Self {
		Instant(millis)
	}

	pub const fn as_millis(self) -> u64 {
		self.0
	}

	/// Duration since `earlier`, saturating to zero if `earlier` is later.
	pub fn duration_since(self, earlier: Instant) -> Duration {
		Duration::from_millis(self.0.saturating_sub(earlier.0))
	}
}

impl Add<Duration> for Instant {
	type Output = Instant;

	fn add(self, rhs: Duration) -> Instant {
		Instant(self.0 + rhs.as_millis() as u64)
	}
}

impl AddAssign<Duration> for Instant {
	fn add_assign(&mut self, rhs: Duration) {
		self.0 += rhs.as_millis() as u64;
	}
}

impl Sub<Instant> for Instant {
	type Output = Duration;

	fn sub(self, rhs: Instant) -> Duration {
		self.duration_since(rhs)
	}
}

impl fmt::Display for Instant {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}ms", self.0)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn arithmetic() {
		let t = Instant::from_millis(100);
		assert_eq!(t + Duration::from_millis(50), Instant::from_millis(150));
		assert_eq!(
			Instant::from_millis(150) - Instant::from_millis(100),
			Duration::from_millis(50)
		);
		// time differences saturate instead of wrapping
		assert_eq!(Instant::from_millis(10) - Instant::from_millis(20), Duration::ZERO);
	}
}

use core::task::Poll;
use core::time::Duration;

use crate::time::Instant;

/// One-shot timer. `poll` is `Pending` until the deadline passes, then
/// `Ready` on every subsequent call.
#[derive(Clone, Copy, Debug)]
pub struct Delay {
	deadline: Instant,
}

impl Delay {
	pub fn new(now: Instant, duration: Duration) -> Self {
		Delay {
			deadline: now + duration,
		}
	}

	pub fn poll(&self, now: Instant) -> Poll<()> {
		if now >= self.deadline {
			Poll::Ready(())
		} else {
			Poll::Pending
		}
	}

	pub fn deadline(&self) -> Instant {
		self.deadline
	}
}

/// Repeating interval timer. `poll` is `Ready` at most once per interval and
/// re-arms itself on firing.
#[derive(Clone, Copy, Debug)]
pub struct Debounce {
	deadline: Instant,
	interval: Duration,
}

impl Debounce {
	pub fn new(now: Instant, interval: Duration) -> Self {
		Debounce {
			deadline: now + interval,
			interval,
		}
	}

	pub fn poll(&mut self, now: Instant) -> Poll<()> {
		if now >= self.deadline {
			self.deadline = now + self.interval;
			Poll::Ready(())
		} else {
			Poll::Pending
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn delay_fires_once_reached() {
		let delay = Delay::new(Instant::ZERO, Duration::from_millis(10));
		assert!(delay.poll(Instant::from_millis(9)).is_pending());
		assert!(delay.poll(Instant::from_millis(10)).is_ready());
		assert!(delay.poll(Instant::from_millis(11)).is_ready());
	}

	#[test]
	fn debounce_rearms() {
		let mut debounce = Debounce::new(Instant::ZERO, Duration::from_millis(100));
		assert!(debounce.poll(Instant::from_millis(50)).is_pending());
		assert!(debounce.poll(Instant::from_millis(100)).is_ready());
		// fired once, not again within the same interval
		assert!(debounce.poll(Instant::from_millis(150)).is_pending());
		assert!(debounce.poll(Instant::from_millis(200)).is_ready());
	}
}

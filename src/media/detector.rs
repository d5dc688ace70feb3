//! Media detection for serial-attached devices.
//!
//! The probe exploits how differently the supported modems answer `@SN`:
//! the UHF modem reports its serial number as `*SN=…`, the ESP-family Wi-Fi
//! modem rejects the unknown command with `ERROR`, and a plain framed-serial
//! peer says nothing at all.

use core::task::Poll;

use super::line::LineBuffer;
use super::{drain, LinkStream, MediaType, WriteCursor};
use crate::config::{DETECTOR_POWER_UP_LOCKOUT, DETECTOR_RESPONSE_WINDOW};
use crate::link::FrameBroker;
use crate::synch::Delay;
use crate::time::Instant;

const PROBE_COMMAND: &[u8] = b"@SN\r\n";

enum State {
	/// The UHF modem ignores (and chokes on) commands right after power-up.
	PowerUpLockout(Delay),
	SendProbe(WriteCursor<&'static [u8]>),
	AwaitResponse(Delay),
}

/// One-shot probe owning a serial stream until the attached device is
/// identified. [`release`](Self::release) hands the stream back afterwards.
pub struct MediaDetector<RW: LinkStream> {
	stream: Option<RW>,
	broker: Option<FrameBroker>,
	state: State,
	line: LineBuffer<15>,
}

impl<RW: LinkStream> MediaDetector<RW> {
	pub fn new(stream: RW, broker: FrameBroker, now: Instant) -> Self {
		MediaDetector {
			stream: Some(stream),
			broker: Some(broker),
			state: State::PowerUpLockout(Delay::new(now, DETECTOR_POWER_UP_LOCKOUT)),
			line: LineBuffer::new(),
		}
	}

	pub fn poll(&mut self, now: Instant) -> Poll<MediaType> {
		let Some(stream) = self.stream.as_mut() else {
			return Poll::Pending;
		};

		if let State::PowerUpLockout(delay) = &self.state {
			core::task::ready!(delay.poll(now));
			// noise emitted during power-up must not count as a response
			drain(stream);
			self.state = State::SendProbe(WriteCursor::new(PROBE_COMMAND));
		}

		if let State::SendProbe(cursor) = &mut self.state {
			core::task::ready!(cursor.poll_write(stream));
			self.state = State::AwaitResponse(Delay::new(now, DETECTOR_RESPONSE_WINDOW));
		}

		let State::AwaitResponse(window) = &self.state else {
			return Poll::Pending;
		};

		if window.poll(now).is_ready() {
			info!("media detection: no probe response, assuming framed serial");
			return Poll::Ready(MediaType::Serial);
		}

		while stream.poll_readable(1).is_ready() {
			match self.line.poll_fill(stream) {
				Poll::Pending => break,
				Poll::Ready(false) => {
					self.line.reset();
					continue;
				}
				Poll::Ready(true) => {}
			}

			let line = self.line.line();
			if line.starts_with(b"*SN=") {
				info!("media detection: UHF modem");
				return Poll::Ready(MediaType::Uhf);
			}
			if line == b"ERROR\r\n" {
				info!("media detection: Wi-Fi modem");
				return Poll::Ready(MediaType::Wifi);
			}

			// unrelated chatter; keep scanning inside the window
			self.line.reset();
		}

		Poll::Pending
	}

	/// Returns the probed stream and the broker handle for the driver that
	/// takes over. Valid once after `poll` returned `Ready`.
	pub fn release(&mut self) -> Option<(RW, FrameBroker)> {
		Some((self.stream.take()?, self.broker.take()?))
	}
}

#[cfg(test)]
mod tests {
	use core::time::Duration;

	use super::*;
	use crate::link::{MediaPortNumber, SharedLinkQueue};
	use crate::testutil::TestStream;

	fn detector(stream: TestStream) -> MediaDetector<TestStream> {
		let queue = SharedLinkQueue::new(Instant::ZERO);
		MediaDetector::new(stream, queue.broker(MediaPortNumber(0)), Instant::ZERO)
	}

	fn past_lockout() -> Instant {
		Instant::ZERO + DETECTOR_POWER_UP_LOCKOUT
	}

	#[test]
	fn detects_uhf_from_serial_number_line() {
		let stream = TestStream::new();
		let mut detector = detector(stream);

		assert!(detector.poll(Instant::from_millis(10)).is_pending());
		let probe_sent = past_lockout();
		assert!(detector.poll(probe_sent).is_pending());
		detector.stream.as_mut().unwrap().feed(b"*SN=123456789\r\n");

		// response arrives 40 ms into the window
		let reply = probe_sent + Duration::from_millis(40);
		assert_eq!(detector.poll(reply), Poll::Ready(MediaType::Uhf));
	}

	#[test]
	fn detects_wifi_from_error_line() {
		let stream = TestStream::new();
		let mut detector = detector(stream);
		assert!(detector.poll(past_lockout()).is_pending());
		detector.stream.as_mut().unwrap().feed(b"ERROR\r\n");
		let reply = past_lockout() + Duration::from_millis(40);
		assert_eq!(detector.poll(reply), Poll::Ready(MediaType::Wifi));
	}

	#[test]
	fn detects_serial_on_silence() {
		let stream = TestStream::new();
		let mut detector = detector(stream);
		assert!(detector.poll(past_lockout()).is_pending());
		let window_closed = past_lockout() + DETECTOR_RESPONSE_WINDOW;
		assert_eq!(detector.poll(window_closed), Poll::Ready(MediaType::Serial));
	}

	#[test]
	fn probe_command_is_sent_after_lockout() {
		let stream = TestStream::new();
		let mut detector = detector(stream);
		let _ = detector.poll(past_lockout());
		assert_eq!(detector.stream.as_ref().unwrap().written(), b"@SN\r\n");
	}

	#[test]
	fn power_up_garbage_is_discarded() {
		let stream = TestStream::new();
		let mut detector = detector(stream);
		// bytes already buffered before the lockout expires
		detector.stream.as_mut().unwrap().feed(b"\xff\xfegarbage");
		assert!(detector.poll(past_lockout()).is_pending());
		detector.stream.as_mut().unwrap().feed(b"*SN=123456789\r\n");
		let reply = past_lockout() + Duration::from_millis(10);
		assert_eq!(detector.poll(reply), Poll::Ready(MediaType::Uhf));
	}

	#[test]
	fn garbage_inside_window_is_skipped() {
		let stream = TestStream::new();
		let mut detector = detector(stream);
		assert!(detector.poll(past_lockout()).is_pending());
		detector
			.stream
			.as_mut()
			.unwrap()
			.feed(b"noise\r\nERROR\r\n");
		let reply = past_lockout() + Duration::from_millis(10);
		assert_eq!(detector.poll(reply), Poll::Ready(MediaType::Wifi));
	}
}

//! Media ports: one driver instance per physical link.
//!
//! Serial-attached links (UHF modem, Wi-Fi modem, framed serial bus) start
//! out as a [`MediaDetector`] that probes the freshly powered device and then
//! hands the stream to the driver it identified. The Ethernet port drives a
//! host-supplied UDP socket directly. All drivers speak to the rest of the
//! node exclusively through their [`FrameBroker`] handle.

pub mod detector;
pub mod ethernet;
pub(crate) mod line;
pub mod serial;
pub mod uhf;
pub mod wifi;

use core::task::Poll;

use rand_chacha::rand_core::RngCore;
use thiserror::Error;

pub use self::detector::MediaDetector;
pub use self::ethernet::{EthernetPort, UdpSocketInterface};
pub use self::serial::SerialPort;
pub use self::uhf::UhfPort;
pub use self::wifi::WifiPort;
use crate::buffer::FrameBufferPool;
use crate::link::{Address, AddressType, AddressTypeSet, FrameBroker, SerialAddress};
use crate::time::Instant;

/// Byte stream of a serial-attached device. Implemented by the host's UART
/// binding; all reads and writes are non-blocking and the `*_unchecked`
/// calls are only valid after the matching poll reported `Ready`.
pub trait LinkStream {
	/// `Ready` when at least `count` bytes are buffered for reading.
	fn poll_readable(&mut self, count: usize) -> Poll<()>;

	/// Bytes currently buffered for reading.
	fn readable_count(&self) -> usize;

	fn read_unchecked(&mut self) -> u8;

	/// `Ready` when `count` bytes can be written without loss.
	fn poll_writable(&mut self, count: usize) -> Poll<()>;

	fn write_unchecked(&mut self, byte: u8);

	fn write_slice_unchecked(&mut self, bytes: &[u8]) {
		for &byte in bytes {
			self.write_unchecked(byte);
		}
	}
}

/// Drains and discards everything currently readable.
pub(crate) fn drain<S: LinkStream>(stream: &mut S) {
	while stream.poll_readable(1).is_ready() {
		stream.read_unchecked();
	}
}

/// Byte sequence on its way out of a stream, written incrementally across
/// ticks.
pub(crate) struct WriteCursor<B> {
	bytes: B,
	offset: usize,
}

impl<B: AsRef<[u8]>> WriteCursor<B> {
	pub fn new(bytes: B) -> Self {
		WriteCursor { bytes, offset: 0 }
	}

	pub fn poll_write(&mut self, stream: &mut impl LinkStream) -> Poll<()> {
		let bytes = self.bytes.as_ref();
		while self.offset < bytes.len() {
			core::task::ready!(stream.poll_writable(1));
			stream.write_unchecked(bytes[self.offset]);
			self.offset += 1;
		}
		Poll::Ready(())
	}
}

/// The kinds of serial-attached media the detector can identify.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaType {
	Uhf,
	Wifi,
	Serial,
}

/// What a port currently knows about itself.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MediaInfo {
	pub address_type: Option<AddressType>,
	pub local_address: Option<Address>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum MediaOperationError {
	/// The operation does not apply to this port's media type, or the port
	/// is still in detection.
	#[error("operation not supported by this media port")]
	Unsupported,
	/// The value is fixed and can no longer change.
	#[error("media port is already configured")]
	AlreadyConfigured,
}

/// A registered media port. Detection replaces the variant in place once the
/// attached device identifies itself; the closed set of drivers makes plain
/// `match` dispatch the obvious choice over trait objects.
pub enum MediaPort<RW: LinkStream, U: UdpSocketInterface> {
	Detector(MediaDetector<RW>),
	Uhf(UhfPort<RW>),
	Wifi(WifiPort<RW>),
	Serial(SerialPort<RW>),
	Ethernet(EthernetPort<U>),
}

impl<RW: LinkStream, U: UdpSocketInterface> MediaPort<RW, U> {
	/// A serial-attached port; the concrete driver is decided by probing.
	pub fn new_serial_attached(stream: RW, broker: FrameBroker, now: Instant) -> Self {
		MediaPort::Detector(MediaDetector::new(stream, broker, now))
	}

	pub fn new_ethernet(socket: U, broker: FrameBroker, rng: &mut impl RngCore) -> Self {
		MediaPort::Ethernet(EthernetPort::new(socket, broker, rng))
	}

	pub fn execute(&mut self, pool: &FrameBufferPool, now: Instant, rng: &mut impl RngCore) {
		if let MediaPort::Detector(detector) = self {
			let Poll::Ready(media_type) = detector.poll(now) else {
				return;
			};
			let Some((stream, broker)) = detector.release() else {
				return;
			};
			*self = match media_type {
				MediaType::Uhf => MediaPort::Uhf(UhfPort::new(stream, broker)),
				MediaType::Wifi => MediaPort::Wifi(WifiPort::new(stream, broker, now)),
				MediaType::Serial => MediaPort::Serial(SerialPort::new(stream, broker)),
			};
		}

		match self {
			MediaPort::Detector(_) => {}
			MediaPort::Uhf(port) => port.execute(pool, now, rng),
			MediaPort::Wifi(port) => port.execute(pool, now),
			MediaPort::Serial(port) => port.execute(pool),
			MediaPort::Ethernet(port) => port.execute(pool, now),
		}
	}

	pub fn unicast_supported_address_types(&self) -> AddressTypeSet {
		match self {
			MediaPort::Detector(_) => AddressTypeSet::empty(),
			MediaPort::Uhf(_) => AddressTypeSet::UHF,
			MediaPort::Wifi(_) => AddressTypeSet::UDP,
			MediaPort::Serial(_) => AddressTypeSet::SERIAL,
			MediaPort::Ethernet(_) => AddressTypeSet::UDP,
		}
	}

	pub fn broadcast_supported_address_types(&self) -> AddressTypeSet {
		match self {
			// only the UHF radio has a true broadcast id
			MediaPort::Uhf(_) => AddressTypeSet::UHF,
			_ => AddressTypeSet::empty(),
		}
	}

	pub fn media_info(&mut self) -> MediaInfo {
		match self {
			MediaPort::Detector(_) => MediaInfo::default(),
			MediaPort::Uhf(port) => port.media_info(),
			MediaPort::Wifi(port) => port.media_info(),
			MediaPort::Serial(port) => port.media_info(),
			MediaPort::Ethernet(port) => port.media_info(),
		}
	}

	/// Assigns the self-address of a framed-serial port. `Unsupported` on
	/// any other media type.
	pub fn try_initialize_serial_address(
		&mut self,
		address: SerialAddress,
	) -> Result<(), MediaOperationError> {
		match self {
			MediaPort::Serial(port) => port.try_initialize_local_address(address),
			_ => Err(MediaOperationError::Unsupported),
		}
	}

	/// Overrides the Ethernet port's IP configuration. `Unsupported` on any
	/// other media type.
	pub fn set_ethernet_local_ip(&mut self, ip: [u8; 4]) -> Result<(), MediaOperationError> {
		match self {
			MediaPort::Ethernet(port) => {
				port.set_local_ip(ip);
				Ok(())
			}
			_ => Err(MediaOperationError::Unsupported),
		}
	}

	pub fn set_ethernet_subnet_mask(
		&mut self,
		mask: [u8; 4],
	) -> Result<(), MediaOperationError> {
		match self {
			MediaPort::Ethernet(port) => {
				port.set_subnet_mask(mask);
				Ok(())
			}
			_ => Err(MediaOperationError::Unsupported),
		}
	}

	pub fn serial_mut(&mut self) -> Option<&mut SerialPort<RW>> {
		match self {
			MediaPort::Serial(port) => Some(port),
			_ => None,
		}
	}

	pub fn uhf_mut(&mut self) -> Option<&mut UhfPort<RW>> {
		match self {
			MediaPort::Uhf(port) => Some(port),
			_ => None,
		}
	}

	pub fn wifi_mut(&mut self) -> Option<&mut WifiPort<RW>> {
		match self {
			MediaPort::Wifi(port) => Some(port),
			_ => None,
		}
	}

	pub fn ethernet_mut(&mut self) -> Option<&mut EthernetPort<U>> {
		match self {
			MediaPort::Ethernet(port) => Some(port),
			_ => None,
		}
	}
}

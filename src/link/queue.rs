//! The frame broker.
//!
//! One bounded queue pair per node sits between the media ports and the
//! upper layers: ports push received frames in and pull send requests out,
//! upper layers do the reverse. Every operation is a single atomic call; a
//! full queue answers `Pending` and the caller retries on a later tick.
//!
//! Entries do not linger. A periodic sweep marks every entry it passes and
//! evicts entries it finds already marked, so nothing survives more than two
//! sweep intervals after its last touch.

use alloc::rc::Rc;
use core::cell::RefCell;
use core::task::Poll;

use heapless::Vec;

use super::address::{Address, AddressType, LinkAddress};
use super::{LinkFrame, MediaPortNumber, ProtocolNumber};
use crate::buffer::FrameBufferReader;
use crate::config::{LINK_FRAME_QUEUE_CAPACITY, SWEEP_INTERVAL};
use crate::synch::Debounce;
use crate::time::Instant;

struct ReceivedEntry {
	frame: LinkFrame,
	port: MediaPortNumber,
	marked_for_sweep: bool,
}

struct SendRequestedEntry {
	frame: LinkFrame,
	/// Pin to a specific port, or any port supporting the address type.
	port: Option<MediaPortNumber>,
	marked_for_sweep: bool,
}

/// Queue pair plus sweep state. Lives behind [`SharedLinkQueue`]; ports and
/// sockets hold cheap handles instead of borrowing the owner.
pub struct LinkFrameQueue {
	received: Vec<ReceivedEntry, LINK_FRAME_QUEUE_CAPACITY>,
	send_requested: Vec<SendRequestedEntry, LINK_FRAME_QUEUE_CAPACITY>,
	sweep: Debounce,
}

impl LinkFrameQueue {
	pub fn new(now: Instant) -> Self {
		LinkFrameQueue {
			received: Vec::new(),
			send_requested: Vec::new(),
			sweep: Debounce::new(now, SWEEP_INTERVAL),
		}
	}

	pub fn execute(&mut self, now: Instant) {
		if self.sweep.poll(now).is_pending() {
			return;
		}

		let mut i = 0;
		while i < self.received.len() {
			if self.received[i].marked_for_sweep {
				let entry = self.received.remove(i);
				info!(
					"sweeping received frame ({:?} from {:?} via {})",
					entry.frame.protocol_number, entry.frame.remote, entry.port
				);
			} else {
				self.received[i].marked_for_sweep = true;
				i += 1;
			}
		}

		let mut i = 0;
		while i < self.send_requested.len() {
			if self.send_requested[i].marked_for_sweep {
				let entry = self.send_requested.remove(i);
				info!(
					"sweeping send request ({:?} to {:?})",
					entry.frame.protocol_number, entry.frame.remote
				);
			} else {
				self.send_requested[i].marked_for_sweep = true;
				i += 1;
			}
		}
	}

	/// Queues an inbound frame. A full queue returns the frame to the caller,
	/// which holds it and retries on a later tick.
	fn poll_dispatch_received_frame(
		&mut self,
		frame: LinkFrame,
		port: MediaPortNumber,
	) -> Result<(), LinkFrame> {
		if self.received.is_full() {
			return Err(frame);
		}
		let entry = ReceivedEntry {
			frame,
			port,
			marked_for_sweep: false,
		};
		let _ = self.received.push(entry);
		Ok(())
	}

	fn poll_receive_frame(&mut self, protocol_number: ProtocolNumber) -> Poll<LinkFrame> {
		let position = self
			.received
			.iter()
			.position(|entry| entry.frame.protocol_number == protocol_number);
		match position {
			Some(i) => Poll::Ready(self.received.remove(i).frame),
			None => Poll::Pending,
		}
	}

	fn poll_request_send_frame(
		&mut self,
		protocol_number: ProtocolNumber,
		remote: LinkAddress,
		reader: FrameBufferReader,
		port: Option<MediaPortNumber>,
	) -> Poll<()> {
		if self.send_requested.is_full() {
			return Poll::Pending;
		}
		let entry = SendRequestedEntry {
			frame: LinkFrame {
				protocol_number,
				remote,
				reader: reader.origin(),
			},
			port,
			marked_for_sweep: false,
		};
		let _ = self.send_requested.push(entry);
		Poll::Ready(())
	}

	/// Picks the next send candidate for one port. Priority: a unicast entry
	/// matching `remote`, then an entry pinned to this port, then the first
	/// unpinned entry of the right address type. A pinned entry whose
	/// address type does not fit this port would never be sendable anywhere,
	/// so it is discarded on sight.
	fn poll_get_send_requested_frame(
		&mut self,
		address_type: AddressType,
		port: MediaPortNumber,
		remote: Option<&Address>,
	) -> Poll<LinkFrame> {
		let mut i = 0;
		while i < self.send_requested.len() {
			let entry = &self.send_requested[i];

			if let Some(remote) = remote {
				if entry.frame.remote.unicast_address() == Some(remote) {
					return Poll::Ready(self.send_requested.remove(i).frame);
				}
			}

			let same_address_type = entry.frame.remote.address_type() == address_type;

			if let Some(pinned) = entry.port {
				if pinned != port {
					i += 1;
					continue;
				}
				if !same_address_type {
					let entry = self.send_requested.remove(i);
					info!(
						"dropping send request pinned to {port} with mismatched address type {:?}",
						entry.frame.remote.address_type()
					);
					continue;
				}
				return Poll::Ready(self.send_requested.remove(i).frame);
			}

			if remote.is_none() && same_address_type {
				return Poll::Ready(self.send_requested.remove(i).frame);
			}

			i += 1;
		}
		Poll::Pending
	}
}

/// Shared handle to the node's queue pair.
#[derive(Clone)]
pub struct SharedLinkQueue {
	queue: Rc<RefCell<LinkFrameQueue>>,
}

impl SharedLinkQueue {
	pub fn new(now: Instant) -> Self {
		SharedLinkQueue {
			queue: Rc::new(RefCell::new(LinkFrameQueue::new(now))),
		}
	}

	pub fn execute(&self, now: Instant) {
		self.queue.borrow_mut().execute(now);
	}

	pub fn broker(&self, port: MediaPortNumber) -> FrameBroker {
		FrameBroker {
			queue: self.clone(),
			port,
		}
	}

	pub fn socket(&self, protocol_number: ProtocolNumber) -> LinkSocket {
		LinkSocket {
			queue: self.clone(),
			protocol_number,
		}
	}
}

/// A media port's view of the broker: dispatch what arrived, fetch what is
/// waiting to leave through this port. The handle carries the port number so
/// the queue can label entries and honor pins; it never owns the queue.
#[derive(Clone)]
pub struct FrameBroker {
	queue: SharedLinkQueue,
	port: MediaPortNumber,
}

impl FrameBroker {
	pub fn port(&self) -> MediaPortNumber {
		self.port
	}

	/// `Err` hands the frame back when the queue is full; the port keeps it
	/// and retries next tick.
	pub fn poll_dispatch_received_frame(&self, frame: LinkFrame) -> Result<(), LinkFrame> {
		self.queue
			.queue
			.borrow_mut()
			.poll_dispatch_received_frame(frame, self.port)
	}

	pub fn poll_get_send_requested_frame(
		&self,
		address_type: AddressType,
		remote: Option<&Address>,
	) -> Poll<LinkFrame> {
		self.queue.queue.borrow_mut().poll_get_send_requested_frame(
			address_type,
			self.port,
			remote,
		)
	}
}

/// An upper layer's view of the broker, fixed to one protocol number.
#[derive(Clone)]
pub struct LinkSocket {
	queue: SharedLinkQueue,
	protocol_number: ProtocolNumber,
}

impl LinkSocket {
	pub fn protocol_number(&self) -> ProtocolNumber {
		self.protocol_number
	}

	pub fn poll_receive_frame(&self) -> Poll<LinkFrame> {
		self.queue
			.queue
			.borrow_mut()
			.poll_receive_frame(self.protocol_number)
	}

	pub fn poll_request_send_frame(
		&self,
		remote: LinkAddress,
		reader: FrameBufferReader,
		port: Option<MediaPortNumber>,
	) -> Poll<()> {
		self.queue.queue.borrow_mut().poll_request_send_frame(
			self.protocol_number,
			remote,
			reader,
			port,
		)
	}
}

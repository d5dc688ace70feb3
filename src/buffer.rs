//! Pool-backed frame buffers.
//!
//! Every frame travelling through the stack lives in exactly one buffer from
//! the global pool. A buffer starts life as a [`FrameBufferWriter`] with a
//! fixed capacity; once [`FrameBufferWriter::create_reader`] is called the
//! content is frozen and any number of [`FrameBufferReader`]s (each with its
//! own cursor) observe the same immutable byte sequence. The pool tracks how
//! many buffers of each class are outstanding and answers `Pending` when
//! none are free, which is the stack-wide backpressure signal.

use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::vec;
use core::cell::Cell;
use core::fmt;
use core::task::Poll;

use crate::config::{
	MAX_LENGTH_FRAME_BUFFER_COUNT, MTU, PROTOCOL_SIZE, SHORT_FRAME_BUFFER_COUNT,
	SHORT_FRAME_BUFFER_LENGTH,
};

/// Longest body a single buffer can carry: payload plus the protocol byte.
pub const MAX_FRAME_BUFFER_LENGTH: usize = MTU + PROTOCOL_SIZE;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BufferClass {
	Short,
	MaxLength,
}

struct PoolShared {
	short_free: Cell<usize>,
	max_length_free: Cell<usize>,
}

/// Returns its buffer slot to the pool when the last handle drops.
struct PoolTicket {
	shared: Rc<PoolShared>,
	class: BufferClass,
}

impl Drop for PoolTicket {
	fn drop(&mut self) {
		let counter = match self.class {
			BufferClass::Short => &self.shared.short_free,
			BufferClass::MaxLength => &self.shared.max_length_free,
		};
		counter.set(counter.get() + 1);
	}
}

/// Bounded allocator for frame buffers, shared by every port and service.
#[derive(Clone)]
pub struct FrameBufferPool {
	shared: Rc<PoolShared>,
}

impl FrameBufferPool {
	pub fn new() -> Self {
		FrameBufferPool {
			shared: Rc::new(PoolShared {
				short_free: Cell::new(SHORT_FRAME_BUFFER_COUNT),
				max_length_free: Cell::new(MAX_LENGTH_FRAME_BUFFER_COUNT),
			}),
		}
	}

	/// Requests a writer with exactly `length` bytes of capacity.
	/// `Pending` until a buffer of the matching class is free.
	pub fn request_frame_writer(&self, length: usize) -> Poll<FrameBufferWriter> {
		debug_assert!(length <= MAX_FRAME_BUFFER_LENGTH);
		let class = if length <= SHORT_FRAME_BUFFER_LENGTH {
			BufferClass::Short
		} else {
			BufferClass::MaxLength
		};
		self.take(class, length)
	}

	/// Requests a writer sized for the largest possible frame.
	pub fn request_max_length_frame_writer(&self) -> Poll<FrameBufferWriter> {
		self.take(BufferClass::MaxLength, MAX_FRAME_BUFFER_LENGTH)
	}

	fn take(&self, class: BufferClass, length: usize) -> Poll<FrameBufferWriter> {
		let counter = match class {
			BufferClass::Short => &self.shared.short_free,
			BufferClass::MaxLength => &self.shared.max_length_free,
		};
		if counter.get() == 0 {
			return Poll::Pending;
		}
		counter.set(counter.get() - 1);

		Poll::Ready(FrameBufferWriter {
			data: vec![0; length].into_boxed_slice(),
			written: 0,
			ticket: PoolTicket {
				shared: self.shared.clone(),
				class,
			},
		})
	}
}

impl Default for FrameBufferPool {
	fn default() -> Self {
		Self::new()
	}
}

/// Exclusive write access to a pool buffer. Capacity is fixed at request
/// time; the writer is consumed by [`create_reader`](Self::create_reader).
pub struct FrameBufferWriter {
	data: Box<[u8]>,
	written: usize,
	ticket: PoolTicket,
}

impl FrameBufferWriter {
	pub fn buffer_length(&self) -> usize {
		self.data.len()
	}

	pub fn writable_length(&self) -> usize {
		self.data.len() - self.written
	}

	pub fn is_all_written(&self) -> bool {
		self.written == self.data.len()
	}

	pub fn write(&mut self, byte: u8) {
		debug_assert!(!self.is_all_written());
		self.data[self.written] = byte;
		self.written += 1;
	}

	pub fn write_slice(&mut self, bytes: &[u8]) {
		self.write_buffer_unchecked(bytes.len()).copy_from_slice(bytes);
	}

	/// Hands out the next `length` bytes for bulk filling and treats them as
	/// written. Callers must not request more than `writable_length()`.
	pub fn write_buffer_unchecked(&mut self, length: usize) -> &mut [u8] {
		debug_assert!(length <= self.writable_length());
		let start = self.written;
		self.written += length;
		&mut self.data[start..self.written]
	}

	/// Freezes the content. All readers created from the returned handle see
	/// the same immutable bytes.
	pub fn create_reader(self) -> FrameBufferReader {
		debug_assert!(self.is_all_written());
		let frozen = Rc::new(FrozenBuffer {
			data: self.data,
			_ticket: self.ticket,
		});
		FrameBufferReader {
			buffer: frozen,
			position: 0,
		}
	}
}

impl fmt::Debug for FrameBufferWriter {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("FrameBufferWriter")
			.field("capacity", &self.data.len())
			.field("written", &self.written)
			.finish()
	}
}

struct FrozenBuffer {
	data: Box<[u8]>,
	_ticket: PoolTicket,
}

/// Cursor over a frozen pool buffer. Cloning cursors is done through
/// [`subreader`](Self::subreader) and [`origin`](Self::origin); the bytes
/// themselves are shared, never copied.
pub struct FrameBufferReader {
	buffer: Rc<FrozenBuffer>,
	position: usize,
}

impl FrameBufferReader {
	/// Total frozen length of the underlying buffer.
	pub fn buffer_length(&self) -> usize {
		self.buffer.data.len()
	}

	pub fn readable_length(&self) -> usize {
		self.buffer.data.len() - self.position
	}

	pub fn is_all_read(&self) -> bool {
		self.position == self.buffer.data.len()
	}

	pub fn read_byte(&mut self) -> u8 {
		debug_assert!(!self.is_all_read());
		let byte = self.buffer.data[self.position];
		self.position += 1;
		byte
	}

	/// Returns the next `length` bytes and advances the cursor past them.
	pub fn read_buffer_unchecked(&mut self, length: usize) -> &[u8] {
		debug_assert!(length <= self.readable_length());
		let start = self.position;
		self.position += length;
		&self.buffer.data[start..self.position]
	}

	/// An independent cursor starting at this reader's current position.
	pub fn subreader(&self) -> FrameBufferReader {
		FrameBufferReader {
			buffer: self.buffer.clone(),
			position: self.position,
		}
	}

	/// An independent cursor rewound to the start of the buffer.
	pub fn origin(&self) -> FrameBufferReader {
		FrameBufferReader {
			buffer: self.buffer.clone(),
			position: 0,
		}
	}

	/// The not-yet-read remainder as a plain slice, without advancing.
	pub fn peek_remaining(&self) -> &[u8] {
		&self.buffer.data[self.position..]
	}
}

impl fmt::Debug for FrameBufferReader {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("FrameBufferReader")
			.field("length", &self.buffer.data.len())
			.field("position", &self.position)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn write_all(writer: &mut FrameBufferWriter, bytes: &[u8]) {
		writer.write_slice(bytes);
	}

	#[test]
	fn round_trip() {
		let pool = FrameBufferPool::new();
		let mut writer = match pool.request_frame_writer(4) {
			Poll::Ready(writer) => writer,
			Poll::Pending => panic!("fresh pool must have buffers"),
		};
		write_all(&mut writer, b"abcd");
		assert!(writer.is_all_written());

		let mut reader = writer.create_reader();
		assert_eq!(reader.buffer_length(), 4);
		assert_eq!(reader.read_buffer_unchecked(4), b"abcd");
		assert!(reader.is_all_read());
	}

	#[test]
	fn readers_never_exceed_capacity() {
		let pool = FrameBufferPool::new();
		let Poll::Ready(mut writer) = pool.request_frame_writer(3) else {
			panic!("fresh pool must have buffers");
		};
		write_all(&mut writer, b"xyz");
		let reader = writer.create_reader();
		assert!(reader.readable_length() <= reader.buffer_length());
	}

	#[test]
	fn subreader_has_independent_cursor() {
		let pool = FrameBufferPool::new();
		let Poll::Ready(mut writer) = pool.request_frame_writer(4) else {
			panic!("fresh pool must have buffers");
		};
		write_all(&mut writer, b"abcd");
		let mut reader = writer.create_reader();
		assert_eq!(reader.read_buffer_unchecked(2), b"ab");

		let mut sub = reader.subreader();
		assert_eq!(sub.read_buffer_unchecked(2), b"cd");
		// the parent cursor did not move
		assert_eq!(reader.readable_length(), 2);
		assert_eq!(reader.origin().readable_length(), 4);
	}

	#[test]
	fn exhaustion_and_reclaim() {
		let pool = FrameBufferPool::new();
		let mut held = std::vec::Vec::new();
		for _ in 0..SHORT_FRAME_BUFFER_COUNT {
			match pool.request_frame_writer(8) {
				Poll::Ready(writer) => held.push(writer),
				Poll::Pending => panic!("pool exhausted early"),
			}
		}
		assert!(pool.request_frame_writer(8).is_pending());
		// the max-length class is accounted separately
		assert!(pool.request_max_length_frame_writer().is_ready());

		held.pop();
		assert!(pool.request_frame_writer(8).is_ready());
	}

	#[test]
	fn reader_drop_returns_buffer() {
		let pool = FrameBufferPool::new();
		let mut writers = std::vec::Vec::new();
		for _ in 0..MAX_LENGTH_FRAME_BUFFER_COUNT {
			let Poll::Ready(writer) = pool.request_max_length_frame_writer() else {
				panic!("pool exhausted early");
			};
			writers.push(writer);
		}
		let mut writer = writers.pop().unwrap();
		for _ in 0..writer.buffer_length() {
			writer.write(0);
		}
		let reader = writer.create_reader();
		let second = reader.subreader();
		assert!(pool.request_max_length_frame_writer().is_pending());
		drop(reader);
		// one cursor still alive, buffer still owned
		assert!(pool.request_max_length_frame_writer().is_pending());
		drop(second);
		assert!(pool.request_max_length_frame_writer().is_ready());
	}
}

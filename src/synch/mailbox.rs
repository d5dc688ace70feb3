use alloc::rc::Rc;
use core::cell::RefCell;
use core::task::Poll;

use thiserror::Error;

/// The writing side was dropped without ever producing a value, typically
/// because its task timed out and the slot was reset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("promise dropped without a value")]
pub struct PromiseDropped;

enum Slot<T> {
	Empty,
	Value(T),
	Taken,
}

struct Channel<T> {
	slot: RefCell<Slot<T>>,
}

/// Write end of a single-slot mailbox. At most one value is ever written.
pub struct Promise<T> {
	channel: Rc<Channel<T>>,
}

/// Read end of a single-slot mailbox.
pub struct FutureValue<T> {
	channel: Rc<Channel<T>>,
}

/// Creates a connected future/promise pair.
pub fn promise_pair<T>() -> (FutureValue<T>, Promise<T>) {
	let channel = Rc::new(Channel {
		slot: RefCell::new(Slot::Empty),
	});
	(
		FutureValue {
			channel: channel.clone(),
		},
		Promise { channel },
	)
}

impl<T> Promise<T> {
	/// Stores the result. A second call on the same promise is a logic error
	/// and keeps the first value.
	pub fn set(self, value: T) {
		let mut slot = self.channel.slot.borrow_mut();
		if matches!(*slot, Slot::Empty) {
			*slot = Slot::Value(value);
		}
	}
}

impl<T> FutureValue<T> {
	/// `Ready(Ok(_))` once the promise was fulfilled, `Ready(Err(_))` once it
	/// is certain no value will ever arrive.
	pub fn poll(&mut self) -> Poll<Result<T, PromiseDropped>> {
		let mut slot = self.channel.slot.borrow_mut();
		match *slot {
			Slot::Value(_) => {
				let value = match core::mem::replace(&mut *slot, Slot::Taken) {
					Slot::Value(value) => value,
					_ => unreachable!(),
				};
				Poll::Ready(Ok(value))
			}
			Slot::Empty => {
				// the promise is gone and nothing was written
				if Rc::strong_count(&self.channel) == 1 {
					Poll::Ready(Err(PromiseDropped))
				} else {
					Poll::Pending
				}
			}
			Slot::Taken => Poll::Ready(Err(PromiseDropped)),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn delivers_value() {
		let (mut future, promise) = promise_pair::<u8>();
		assert!(future.poll().is_pending());
		promise.set(7);
		assert_eq!(future.poll(), Poll::Ready(Ok(7)));
	}

	#[test]
	fn dropped_promise_is_observable() {
		let (mut future, promise) = promise_pair::<u8>();
		drop(promise);
		assert_eq!(future.poll(), Poll::Ready(Err(PromiseDropped)));
	}

	#[test]
	fn value_survives_promise_drop() {
		let (mut future, promise) = promise_pair::<u8>();
		promise.set(3);
		assert_eq!(future.poll(), Poll::Ready(Ok(3)));
	}
}

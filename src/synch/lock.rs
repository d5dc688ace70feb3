use alloc::rc::Rc;
use core::cell::{Cell, RefCell, RefMut};
use core::task::Poll;

struct LockInner<T> {
	locked: Cell<bool>,
	value: RefCell<T>,
}

/// Cooperative exclusivity token over a shared resource.
///
/// `poll_lock` hands out at most one [`SharedLockGuard`] at a time; a holder
/// keeps exclusivity across ticks until the guard drops. Accessing the value
/// through the guard borrows it only for the duration of one call, so the
/// lock is never held inside a suspension point.
pub struct SharedLock<T> {
	inner: Rc<LockInner<T>>,
}

impl<T> Clone for SharedLock<T> {
	fn clone(&self) -> Self {
		SharedLock {
			inner: self.inner.clone(),
		}
	}
}

pub struct SharedLockGuard<T> {
	inner: Rc<LockInner<T>>,
}

impl<T> SharedLock<T> {
	pub fn new(value: T) -> Self {
		SharedLock {
			inner: Rc::new(LockInner {
				locked: Cell::new(false),
				value: RefCell::new(value),
			}),
		}
	}

	pub fn poll_lock(&self) -> Poll<SharedLockGuard<T>> {
		if self.inner.locked.get() {
			Poll::Pending
		} else {
			self.inner.locked.set(true);
			Poll::Ready(SharedLockGuard {
				inner: self.inner.clone(),
			})
		}
	}

	pub fn is_locked(&self) -> bool {
		self.inner.locked.get()
	}

	/// Briefly borrows the value without taking the guard. Panics if called
	/// re-entrantly; callers use it for single-call accesses only.
	pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
		f(&mut self.inner.value.borrow_mut())
	}
}

impl<T> SharedLockGuard<T> {
	pub fn get_mut(&self) -> RefMut<'_, T> {
		self.inner.value.borrow_mut()
	}
}

impl<T> Drop for SharedLockGuard<T> {
	fn drop(&mut self) {
		self.inner.locked.set(false);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn exclusivity_transfers_on_drop() {
		let lock = SharedLock::new(0u8);
		let guard = match lock.poll_lock() {
			Poll::Ready(guard) => guard,
			Poll::Pending => panic!("fresh lock must be free"),
		};
		assert!(lock.poll_lock().is_pending());
		*guard.get_mut() += 1;
		drop(guard);
		assert!(lock.poll_lock().is_ready());
		assert_eq!(lock.with(|v| *v), 1);
	}
}

//! Poll-driven concurrency primitives.
//!
//! Everything here is single-threaded. "Blocking" means returning
//! [`Poll::Pending`](core::task::Poll) and being re-polled on a later tick;
//! no primitive is ever held across a suspension point.

mod delay;
mod lock;
mod mailbox;

pub use self::delay::{Debounce, Delay};
pub use self::lock::{SharedLock, SharedLockGuard};
pub use self::mailbox::{promise_pair, FutureValue, Promise, PromiseDropped};

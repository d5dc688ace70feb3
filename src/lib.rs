//! Heterogeneous-link mesh networking stack for small embedded controllers.
//!
//! A node attaches to up to four physical links (UHF packet modem, wired
//! serial bus, Wi-Fi UDP, Ethernet UDP) and cooperates with its peers to
//! deliver frames to any reachable node by logical node id. The whole stack
//! is single-threaded and poll-driven: the host calls
//! [`MeshNode::execute`](stack::MeshNode::execute) once per loop iteration
//! with the current time and a pseudorandom source, and every component makes
//! bounded progress before returning. Operations that cannot complete yet
//! return [`Poll::Pending`](core::task::Poll) and are re-polled on the next
//! tick; nothing blocks.
//!
//! Hardware stays outside the crate: serial-attached media are generic over
//! the [`LinkStream`](media::LinkStream) byte-stream trait and the Ethernet
//! port over [`UdpSocketInterface`](media::ethernet::UdpSocketInterface), so
//! hosts (and tests) supply the concrete bindings.

#![warn(rust_2018_idioms)]
#![no_std]

extern crate alloc;
#[cfg(test)]
#[macro_use]
extern crate std;

#[macro_use]
extern crate log;

pub mod buffer;
pub mod config;
pub mod link;
pub mod media;
pub mod node;
pub mod routing;
pub mod stack;
pub mod synch;
#[cfg(test)]
pub(crate) mod testutil;
pub mod time;

pub use crate::stack::MeshNode;

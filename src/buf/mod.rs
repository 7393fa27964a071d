//! Fixed-capacity buffering primitives used by [`crate::channel::Channel`].
//!
//! These types know nothing about sockets, threads, or the reactor; they are
//! plain data structures with the contracts described in spec §3.

mod ring;
mod send_queue;

pub use ring::RingBuf;
pub use send_queue::{QueueFull, SendBuffer, SendQueue};

//! A portable, multi-threaded TCP networking library built around a
//! per-thread event reactor.
//!
//! Applications build one or more [`Loop`]s (each normally driven on its
//! own thread via [`LoopWorker`]), hand them a callback, and call
//! [`Loop::connect`] or [`Loop::listen`] to get back a [`ChannelRef`] —
//! the refcounted handle used to read, write, and close a channel for the
//! rest of its life. Listeners can be joined into a [`LoopBalancer`] fleet
//! so accepted connections spread across threads instead of piling up on
//! whichever loop owns the listening socket.
//!
//! Most operations are only safe to call from the channel's owning loop
//! thread; [`ChannelRef::write`] and [`ChannelRef::close`] are the
//! exceptions; they detect being called off-thread and hop onto the
//! owning loop's inbox instead of touching the socket directly.
mod balancer;
mod buf;
mod callback;
mod channel;
mod error;
mod inbox;
mod reactor;
mod reference;
mod socket;

pub use balancer::{BalancerConfig, LoopBalancer};
pub use callback::{Callback, Event};
pub use error::{IoStatus, NetError};
pub use reactor::{ChannelConfig, Loop, LoopConfig, LoopHandle, LoopWorker, WeakLoopHandle};
pub use reference::{ChannelRef, ChannelState};
pub use socket::ChannelFlags;

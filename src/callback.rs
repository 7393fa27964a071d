use std::sync::Arc;

use crate::reference::ChannelRef;

/// The lifecycle events a channel reference's callback can observe (§6).
/// `connect`/`accept` fire at most once, then zero or more `recv`/`send`,
/// then exactly one `close` — never out of order, never concurrently for
/// the same channel reference (§5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Accept,
    Connect,
    Recv,
    Send,
    Close,
}

/// `(ref, event)`, always invoked on the channel's owning loop thread.
pub type Callback = Arc<dyn Fn(&ChannelRef, Event) + Send + Sync>;

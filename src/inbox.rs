use crate::reference::ChannelRef;

/// A cross-thread request funneled into a loop's inbox (§4.3/§4.4). Drained
/// in FIFO order at the head of every `run_once` turn.
pub(crate) enum InboxMsg {
    Send(ChannelRef, Vec<u8>),
    Close(ChannelRef),
    Accept(ChannelRef),
}

use thiserror::Error;

/// Errors surfaced at the public API boundary.
///
/// `ok` is represented by `Result::Ok` rather than a variant here.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("destroy() called with live shares outstanding")]
    RefNonzero,
    #[error("connect failed: {0}")]
    ConnectFail(#[source] std::io::Error),
    #[error("bind failed: {0}")]
    BindFail(#[source] std::io::Error),
    #[error("listen failed: {0}")]
    ListenFail(#[source] std::io::Error),
    #[error("accept failed: {0}")]
    AcceptFail(#[source] std::io::Error),
    #[error("send only made partial progress")]
    SendPartial,
    #[error("send failed")]
    SendFail,
    #[error("recv failed")]
    RecvFail,
    #[error("recv buffer is full")]
    RecvBufferFull,
    #[error("failed to start reactor thread: {0}")]
    ThreadStartFail(#[source] std::io::Error),
    #[error("getpeername/getsockname failed: {0}")]
    GetpeernameFail(#[source] std::io::Error),
    #[error("channel is not open for this operation")]
    NotOpen,
}

/// The raw socket-operation result contract shared by `send`, `send_buffer`,
/// `update_recv` and `update_send` (§4.1). Deliberately not a `std::error::Error`:
/// this is a hot-path classification, not a reportable failure on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoStatus {
    /// All requested bytes were moved (or, for `update_recv`, at least one
    /// non-blocking read attempt completed without a fatal condition).
    Ok,
    /// Some (possibly zero) bytes moved; the remainder must be queued and
    /// re-driven once the socket is next writable.
    Partial,
    /// Unrecoverable: peer reset, or another fatal I/O error.
    Fail,
    /// `update_recv` only: the ring buffer is saturated. Treated as fatal.
    BufferFull,
}

//! Component C — the channel reference (§3, §4.2, §4.3).
//!
//! `ChannelRef` is the sharable, refcounted handle applications hold. It
//! mediates every channel operation and enforces the "operate on the owning
//! loop's thread" rule described in §5: the socket, ring buffer, send
//! queue, selector registration, state, event mask and `last_recv_ts` are
//! touched only while the owning loop is driving this reference.
//!
//! `share`/`leave` (original vocabulary) collapse into `Clone`/`Drop`
//! (DESIGN.md, "Refcounted handle with shared mutable info").
use std::io;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, error, warn};
use mio::{Interest, Registry, Token};

use crate::callback::{Callback, Event};
use crate::channel::Channel;
use crate::error::{IoStatus, NetError};
use crate::balancer::LoopBalancer;
use crate::reactor::{ChannelConfig, LoopHandle, Migration, WeakLoopHandle};
use crate::socket::{BindOrListenError, ChannelFlags};

/// One of `idle`, `connecting`, `accepting`, `active`, `closed` (§4.2). A
/// strict state machine; see the transition table there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Connecting,
    Accepting,
    Active,
    Closed,
}

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

struct RefState {
    channel: Channel,
    state: ChannelState,
    want_write: bool,
    connecting: bool,
    mask_dirty: bool,
    token: Option<Token>,
    last_recv_ts: u64,
    connect_deadline: u64,
    idle_timeout: u64,
    peer_addr: Option<SocketAddr>,
    local_addr: Option<SocketAddr>,
}

impl RefState {
    fn desired_interest(&self) -> Interest {
        if self.want_write || self.connecting {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        }
    }
}

struct RefInner {
    state: Mutex<RefState>,
    loop_handle: WeakLoopHandle,
    callback: Callback,
}

/// The sharable handle described in §3. Cloning bumps the reference count
/// (an `Arc` clone); leaving it to a plain `Drop` releases a share exactly
/// like [`ChannelRef::leave`]. Note that an owning loop holds its own
/// clone for as long as a channel is registered, so dropping every
/// application-held clone does not by itself close an open channel —
/// call [`ChannelRef::close`] first, the way [`ChannelRef::destroy`]
/// expects.
#[derive(Clone)]
pub struct ChannelRef(Arc<RefInner>);

impl ChannelRef {
    pub(crate) fn new_connecting(
        loop_handle: WeakLoopHandle,
        callback: Callback,
        mut channel: Channel,
        ip: &str,
        port: u16,
        connect_deadline: u64,
    ) -> Result<ChannelRef, NetError> {
        channel.connect(ip, port).map_err(NetError::ConnectFail)?;
        let state = RefState {
            channel,
            state: ChannelState::Connecting,
            want_write: false,
            connecting: true,
            mask_dirty: false,
            token: None,
            last_recv_ts: now_secs(),
            connect_deadline,
            idle_timeout: 0,
            peer_addr: None,
            local_addr: None,
        };
        Ok(ChannelRef(Arc::new(RefInner {
            state: Mutex::new(state),
            loop_handle,
            callback,
        })))
    }

    pub(crate) fn new_accepting(
        loop_handle: WeakLoopHandle,
        callback: Callback,
        mut channel: Channel,
        ip: &str,
        port: u16,
        backlog: u32,
    ) -> Result<ChannelRef, NetError> {
        channel.listen(ip, port, backlog).map_err(|e| match e {
            BindOrListenError::Bind(e) => NetError::BindFail(e),
            BindOrListenError::Listen(e) => NetError::ListenFail(e),
        })?;
        let state = RefState {
            channel,
            state: ChannelState::Accepting,
            want_write: false,
            connecting: false,
            mask_dirty: false,
            token: None,
            last_recv_ts: now_secs(),
            connect_deadline: 0,
            idle_timeout: 0,
            peer_addr: None,
            local_addr: None,
        };
        Ok(ChannelRef(Arc::new(RefInner {
            state: Mutex::new(state),
            loop_handle,
            callback,
        })))
    }

    /// An already-accepted child, constructed in state `active` directly
    /// (§4.2: "the child reference is instantiated directly in active").
    pub(crate) fn new_active_child(
        loop_handle: WeakLoopHandle,
        callback: Callback,
        channel: Channel,
    ) -> ChannelRef {
        let state = RefState {
            channel,
            state: ChannelState::Active,
            want_write: false,
            connecting: false,
            mask_dirty: false,
            token: None,
            last_recv_ts: now_secs(),
            connect_deadline: 0,
            idle_timeout: 0,
            peer_addr: None,
            local_addr: None,
        };
        ChannelRef(Arc::new(RefInner {
            state: Mutex::new(state),
            loop_handle,
            callback,
        }))
    }

    /// `share`: bumps the reference count. A plain `Clone`.
    pub fn share(&self) -> ChannelRef {
        self.clone()
    }

    /// `leave`: decrements the reference count. A plain `Drop`; spelled out
    /// for readers translating from the original vocabulary.
    pub fn leave(self) {
        drop(self)
    }

    /// `destroy`: valid only when this is believed to be the last live
    /// handle. Returns [`NetError::RefNonzero`] (and frees nothing) if
    /// other shares are still outstanding — the handle's own share is
    /// still released either way.
    pub fn destroy(self) -> Result<(), NetError> {
        if Arc::strong_count(&self.0) == 1 {
            Ok(())
        } else {
            Err(NetError::RefNonzero)
        }
    }

    pub fn state(&self) -> ChannelState {
        self.0.state.lock().unwrap().state
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ChannelState::Closed
    }

    /// Lazily materialize and cache the peer address (§4.6).
    pub fn peer_address(&self) -> Result<SocketAddr, NetError> {
        let mut st = self.0.state.lock().unwrap();
        if let Some(addr) = st.peer_addr {
            return Ok(addr);
        }
        let addr = st.channel.peer_addr().map_err(NetError::GetpeernameFail)?;
        st.peer_addr = Some(addr);
        Ok(addr)
    }

    /// Lazily materialize and cache the local address (§4.6).
    pub fn local_address(&self) -> Result<SocketAddr, NetError> {
        let mut st = self.0.state.lock().unwrap();
        if let Some(addr) = st.local_addr {
            return Ok(addr);
        }
        let addr = st.channel.local_addr().map_err(NetError::GetpeernameFail)?;
        st.local_addr = Some(addr);
        Ok(addr)
    }

    pub fn set_idle_timeout(&self, secs: u64) {
        self.0.state.lock().unwrap().idle_timeout = secs;
    }

    pub fn set_connect_deadline(&self, secs: u64) {
        self.0.state.lock().unwrap().connect_deadline = secs;
    }

    /// Pull up to `out.len()` bytes that a prior `recv` callback made
    /// available, out of the receive ring buffer.
    pub fn read(&self, out: &mut [u8]) -> usize {
        self.0.state.lock().unwrap().channel.read_received(out)
    }

    pub fn received_len(&self) -> usize {
        self.0.state.lock().unwrap().channel.received_len()
    }

    fn is_owning_thread(&self) -> bool {
        self.0.loop_handle.is_current_thread()
    }

    /// `write(data, size)` (§4.3).
    pub fn write(&self, data: &[u8]) -> Result<(), NetError> {
        if self.is_owning_thread() {
            self.write_same_thread(data);
            Ok(())
        } else {
            self.0
                .loop_handle
                .post_send(self.clone(), data.to_vec())
                .map_err(|_| NetError::NotOpen)
        }
    }

    fn write_same_thread(&self, data: &[u8]) {
        let mut st = self.0.state.lock().unwrap();
        if st.state != ChannelState::Active {
            // Not open yet (still connecting) or already closed: queue it
            // if there's still a channel to flush once active, otherwise
            // drop silently — mirrors "fail" for a closed channel without
            // re-entering the close path from inside a write.
            if st.state == ChannelState::Connecting {
                let _ = st.channel.queue(data.to_vec());
                st.want_write = true;
                st.mask_dirty = true;
            }
            return;
        }
        let (status, n) = st.channel.send(data);
        match status {
            IoStatus::Ok if n == data.len() => {}
            IoStatus::Ok => {
                let remainder = data[n..].to_vec();
                if st.channel.queue(remainder) == IoStatus::Fail {
                    drop(st);
                    self.run_close();
                    return;
                }
                st.want_write = true;
                st.mask_dirty = true;
            }
            IoStatus::Fail => {
                drop(st);
                self.run_close();
            }
            _ => {}
        }
    }

    /// Called by the loop when draining a `Send` inbox message: data
    /// arrives already copied; queue-and-flush exactly like a same-thread
    /// write that went straight to `partial`.
    pub(crate) fn enqueue_and_flush(&self, data: Vec<u8>) {
        let mut st = self.0.state.lock().unwrap();
        if st.state != ChannelState::Active {
            return;
        }
        match st.channel.queue(data) {
            IoStatus::Fail => {
                drop(st);
                self.run_close();
                return;
            }
            _ => {}
        }
        let status = st.channel.update_send();
        match status {
            IoStatus::Ok => {
                st.want_write = false;
                st.mask_dirty = true;
                drop(st);
                self.fire(Event::Send);
            }
            IoStatus::Partial => {
                st.want_write = true;
                st.mask_dirty = true;
            }
            IoStatus::Fail => {
                drop(st);
                self.run_close();
            }
            IoStatus::BufferFull => unreachable!("update_send never reports buffer_full"),
        }
    }

    /// `close()` (§4.3, §4.2 close path).
    pub fn close(&self) {
        if self.is_owning_thread() {
            self.run_close();
        } else {
            let _ = self.0.loop_handle.post_close(self.clone());
        }
    }

    pub(crate) fn close_same_thread(&self) {
        self.run_close();
    }

    /// The idempotent close path (§4.2). Marks closed, clears watches,
    /// closes the socket, invokes `callback(close)` exactly once.
    fn run_close(&self) {
        let already = {
            let mut st = self.0.state.lock().unwrap();
            if st.state == ChannelState::Closed {
                true
            } else {
                debug!("channel ref transitioning to closed");
                st.state = ChannelState::Closed;
                st.want_write = false;
                st.connecting = false;
                st.mask_dirty = true;
                false
            }
        };
        if !already {
            self.fire(Event::Close);
        }
    }

    /// Invoke the user callback, catching panics (§7) and treating one as
    /// an immediate close.
    pub(crate) fn fire(&self, event: Event) {
        let cb = &self.0.callback;
        let result = panic::catch_unwind(AssertUnwindSafe(|| cb(self, event)));
        if let Err(payload) = result {
            error!("channel reference callback panicked: {:?}", panic_message(&payload));
            if event != Event::Close {
                self.run_close();
            }
        }
    }

    pub(crate) fn desired_interest(&self) -> Interest {
        self.0.state.lock().unwrap().desired_interest()
    }

    pub(crate) fn token(&self) -> Option<Token> {
        self.0.state.lock().unwrap().token
    }

    pub(crate) fn set_token(&self, token: Option<Token>) {
        self.0.state.lock().unwrap().token = token;
    }

    pub(crate) fn take_mask_dirty(&self) -> bool {
        let mut st = self.0.state.lock().unwrap();
        std::mem::replace(&mut st.mask_dirty, false)
    }

    pub(crate) fn register_with(&self, registry: &Registry, token: Token) -> io::Result<()> {
        let mut st = self.0.state.lock().unwrap();
        let interest = st.desired_interest();
        register_socket(&mut st.channel, registry, token, interest)
    }

    pub(crate) fn reregister_with(&self, registry: &Registry, token: Token) -> io::Result<()> {
        let mut st = self.0.state.lock().unwrap();
        let interest = st.desired_interest();
        reregister_socket(&mut st.channel, registry, token, interest)
    }

    pub(crate) fn deregister_with(&self, registry: &Registry) -> io::Result<()> {
        let mut st = self.0.state.lock().unwrap();
        deregister_socket(&mut st.channel, registry)
    }

    /// Selector reported readable (§4.2 transition table). Handles the
    /// `connecting` and `active` cases; `accepting` is routed by the loop
    /// to [`ChannelRef::do_accept`] instead, since it needs the balancer.
    pub(crate) fn on_readable(&self, now: u64) {
        let state = self.state();
        match state {
            ChannelState::Active => self.do_recv(now),
            ChannelState::Connecting => { /* readable-before-writable: ignore, await writable */ }
            _ => {}
        }
    }

    fn do_recv(&self, now: u64) {
        let status = {
            let mut st = self.0.state.lock().unwrap();
            let status = st.channel.update_recv();
            if status == IoStatus::Ok {
                st.last_recv_ts = now;
            }
            status
        };
        match status {
            IoStatus::Ok => self.fire(Event::Recv),
            IoStatus::Fail | IoStatus::BufferFull => {
                if status == IoStatus::BufferFull {
                    warn!("ring buffer saturated; closing channel");
                }
                self.run_close();
            }
            IoStatus::Partial => unreachable!("update_recv never reports partial"),
        }
    }

    /// Selector reported writable.
    pub(crate) fn on_writable(&self, _now: u64) {
        let was_connecting = { self.0.state.lock().unwrap().connecting };
        if was_connecting {
            self.confirm_connect();
            return;
        }
        self.flush_pending();
    }

    fn confirm_connect(&self) {
        let outcome = {
            let st = self.0.state.lock().unwrap();
            st.channel.take_connect_error()
        };
        let failed = !matches!(outcome, Ok(None));
        if failed {
            self.run_close();
            return;
        }
        let has_pending = {
            let mut st = self.0.state.lock().unwrap();
            st.state = ChannelState::Active;
            st.connecting = false;
            let pending = st.channel.has_pending_send();
            st.want_write = pending;
            st.mask_dirty = true;
            pending
        };
        debug!("channel reference connected");
        self.fire(Event::Connect);
        if has_pending {
            self.flush_pending();
        }
    }

    fn flush_pending(&self) {
        let status = {
            let mut st = self.0.state.lock().unwrap();
            if st.state != ChannelState::Active || !st.channel.has_pending_send() {
                return;
            }
            let status = st.channel.update_send();
            match status {
                IoStatus::Ok => {
                    st.want_write = false;
                    st.mask_dirty = true;
                }
                IoStatus::Partial => {
                    st.want_write = true;
                    st.mask_dirty = true;
                }
                _ => {}
            }
            status
        };
        match status {
            IoStatus::Ok => self.fire(Event::Send),
            IoStatus::Fail => self.run_close(),
            _ => {}
        }
    }

    /// Per-turn timeout check (§5 cancellation & timeouts).
    pub(crate) fn check_timeout(&self, now: u64) {
        let timed_out = {
            let st = self.0.state.lock().unwrap();
            match st.state {
                ChannelState::Connecting if st.connect_deadline != 0 => now > st.connect_deadline,
                ChannelState::Active if st.idle_timeout != 0 => {
                    now.saturating_sub(st.last_recv_ts) > st.idle_timeout
                }
                _ => false,
            }
        };
        if timed_out {
            debug!("channel reference timed out");
            self.run_close();
        }
    }

    /// The accept path (§4.2, §4.3, §4.5): accept as many pending
    /// connections as are ready, and for each decide whether it stays on
    /// this loop or migrates to a less-loaded one.
    pub(crate) fn do_accept(
        &self,
        channel_config: &ChannelConfig,
        flags: ChannelFlags,
        balancer: Option<&LoopBalancer>,
        owning_handle: &LoopHandle,
    ) -> Vec<Migration> {
        let mut migrations = Vec::new();
        loop {
            let accepted = {
                let st = self.0.state.lock().unwrap();
                st.channel.accept_one()
            };
            let (stream, _peer) = match accepted {
                Ok(pair) => pair,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(_) => break,
            };
            let channel = match Channel::from_accepted(
                stream,
                channel_config.max_send_queue_len,
                channel_config.ring_capacity,
                flags,
            ) {
                Ok(c) => c,
                Err(_) => continue,
            };
            let target = balancer
                .map(|b| b.choose())
                .unwrap_or_else(|| owning_handle.clone());
            let same_loop = owning_handle.ptr_eq(&target) || owning_handle.thread_id().is_none();
            let child = ChannelRef::new_active_child(target.downgrade(), self.0.callback.clone(), channel);
            migrations.push(Migration { target, same_loop, child });
        }
        migrations
    }
}

fn register_socket(
    channel: &mut Channel,
    registry: &Registry,
    token: Token,
    interest: Interest,
) -> io::Result<()> {
    if let Some(s) = channel.stream_mut() {
        registry.register(s, token, interest)
    } else if let Some(l) = channel.listener_mut() {
        registry.register(l, token, Interest::READABLE)
    } else {
        Err(io::Error::new(io::ErrorKind::Other, "channel has no socket"))
    }
}

fn reregister_socket(
    channel: &mut Channel,
    registry: &Registry,
    token: Token,
    interest: Interest,
) -> io::Result<()> {
    if let Some(s) = channel.stream_mut() {
        registry.reregister(s, token, interest)
    } else if let Some(l) = channel.listener_mut() {
        registry.reregister(l, token, Interest::READABLE)
    } else {
        Err(io::Error::new(io::ErrorKind::Other, "channel has no socket"))
    }
}

fn deregister_socket(channel: &mut Channel, registry: &Registry) -> io::Result<()> {
    if let Some(s) = channel.stream_mut() {
        registry.deregister(s)
    } else if let Some(l) = channel.listener_mut() {
        registry.deregister(l)
    } else {
        Ok(())
    }
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}

impl Drop for RefInner {
    fn drop(&mut self) {
        // Covers references that never made it into a loop's channel
        // list (e.g. `connect`/`listen` failed after construction): mark
        // closed so the socket's own `Drop` is the only cleanup needed.
        let mut st = self.state.lock().unwrap();
        st.state = ChannelState::Closed;
    }
}

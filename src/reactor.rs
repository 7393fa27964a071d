//! Component D — the event loop / reactor (§4.4, §5).
//!
//! One `Loop` owns exactly one `mio::Poll` and is driven by exactly one
//! thread at a time (enforced only by convention and the recorded thread
//! id in `LoopShared`, not by the type system — see DESIGN.md). Everything
//! the loop itself does to a channel reference happens synchronously
//! inside `run_once`; everything another thread wants to ask it to do
//! instead goes through the inbox and a wakeup.
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use log::{debug, trace, warn};
use mio::{Events, Poll, Token, Waker};
use slab::Slab;

use crate::balancer::LoopBalancer;
use crate::callback::{Callback, Event as ChEvent};
use crate::channel::Channel;
use crate::error::NetError;
use crate::inbox::InboxMsg;
use crate::reference::{now_secs, ChannelRef, ChannelState};
use crate::socket::ChannelFlags;

pub(crate) const WAKER_TOKEN: Token = Token(usize::MAX);

/// Tuning knobs for a single channel's buffers (§4.8).
#[derive(Debug, Clone, Copy)]
pub struct ChannelConfig {
    pub max_send_queue_len: usize,
    pub ring_capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> ChannelConfig {
        ChannelConfig {
            max_send_queue_len: 16,
            ring_capacity: 64 * 1024,
        }
    }
}

/// Tuning knobs for a `Loop` (§4.8).
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Passed to `Poll::poll` as the timeout when the inbox is empty.
    pub poll_timeout: Option<Duration>,
    pub events_capacity: usize,
    /// Maximum inbox messages drained before yielding to I/O polling in
    /// one turn.
    pub messages_per_tick: usize,
    pub channel: ChannelConfig,
    pub flags: ChannelFlags,
    pub accept_backlog: u32,
}

impl Default for LoopConfig {
    fn default() -> LoopConfig {
        LoopConfig {
            poll_timeout: Some(Duration::from_secs(1)),
            events_capacity: 1024,
            messages_per_tick: 64,
            channel: ChannelConfig::default(),
            flags: ChannelFlags::default(),
            accept_backlog: 1024,
        }
    }
}

pub(crate) struct LoopShared {
    inbox: Mutex<VecDeque<InboxMsg>>,
    waker: Waker,
    thread_id: OnceLock<ThreadId>,
    running: AtomicBool,
    channel_count: AtomicUsize,
}

/// A cheap, cloneable, `Send + Sync` reference to a running (or
/// not-yet-started) loop, usable from any thread (§4.4).
#[derive(Clone)]
pub struct LoopHandle(pub(crate) Arc<LoopShared>);

/// The non-owning counterpart a [`crate::reference::ChannelRef`] actually
/// stores, so a channel reference never keeps its loop alive (§5).
#[derive(Clone)]
pub struct WeakLoopHandle(Weak<LoopShared>);

impl LoopHandle {
    pub fn downgrade(&self) -> WeakLoopHandle {
        WeakLoopHandle(Arc::downgrade(&self.0))
    }

    pub fn ptr_eq(&self, other: &LoopHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn thread_id(&self) -> Option<ThreadId> {
        self.0.thread_id.get().copied()
    }

    /// Currently-registered channel reference count, used by
    /// [`LoopBalancer::choose`](crate::balancer::LoopBalancer::choose) to
    /// pick the least-loaded loop (§4.5).
    pub fn channel_count(&self) -> usize {
        self.0.channel_count.load(Ordering::Relaxed)
    }

    fn set_thread_id(&self) {
        let _ = self.0.thread_id.set(thread::current().id());
    }

    /// Ask the loop to return from `run` after it finishes its current
    /// turn. Does not interrupt in-flight callbacks.
    pub fn request_stop(&self) {
        self.0.running.store(false, Ordering::SeqCst);
        self.wake();
    }

    fn wake(&self) {
        if let Err(e) = self.0.waker.wake() {
            warn!("failed to wake loop: {}", e);
        }
    }

    pub(crate) fn post_send(&self, ch: ChannelRef, data: Vec<u8>) -> Result<(), ()> {
        self.0.inbox.lock().unwrap().push_back(InboxMsg::Send(ch, data));
        self.wake();
        Ok(())
    }

    pub(crate) fn post_close(&self, ch: ChannelRef) -> Result<(), ()> {
        self.0.inbox.lock().unwrap().push_back(InboxMsg::Close(ch));
        self.wake();
        Ok(())
    }

    pub(crate) fn post_accept(&self, ch: ChannelRef) -> Result<(), ()> {
        self.0.inbox.lock().unwrap().push_back(InboxMsg::Accept(ch));
        self.wake();
        Ok(())
    }
}

impl WeakLoopHandle {
    pub(crate) fn upgrade(&self) -> Option<LoopHandle> {
        self.0.upgrade().map(LoopHandle)
    }

    /// Whether the current thread is this channel's owning loop thread
    /// (§5). A loop that hasn't started `run` yet has no recorded thread
    /// id; the constructing thread is treated as owning in that window,
    /// since `connect`/`listen` are `&mut Loop` methods called before the
    /// loop is ever driven.
    pub(crate) fn is_current_thread(&self) -> bool {
        match self.upgrade() {
            Some(h) => match h.thread_id() {
                Some(id) => id == thread::current().id(),
                None => true,
            },
            None => false,
        }
    }

    pub(crate) fn post_send(&self, ch: ChannelRef, data: Vec<u8>) -> Result<(), ()> {
        self.upgrade().ok_or(())?.post_send(ch, data)
    }

    pub(crate) fn post_close(&self, ch: ChannelRef) -> Result<(), ()> {
        self.upgrade().ok_or(())?.post_close(ch)
    }
}

/// A child connection accepted on a listener, destined for whichever loop
/// the balancer (or the listener's own loop, absent one) chose (§4.5).
pub(crate) struct Migration {
    pub target: LoopHandle,
    pub same_loop: bool,
    pub child: ChannelRef,
}

/// A single-threaded reactor driving one `mio::Poll` (§4.4).
pub struct Loop {
    poll: Poll,
    events: Events,
    channels: Slab<ChannelRef>,
    handle: LoopHandle,
    config: LoopConfig,
    balancer: Option<LoopBalancer>,
}

impl Loop {
    pub fn new(config: LoopConfig) -> io::Result<Loop> {
        let poll = Poll::new()?;
        let waker = Waker::new(poll.registry(), WAKER_TOKEN)?;
        let shared = Arc::new(LoopShared {
            inbox: Mutex::new(VecDeque::new()),
            waker,
            thread_id: OnceLock::new(),
            running: AtomicBool::new(true),
            channel_count: AtomicUsize::new(0),
        });
        let events = Events::with_capacity(config.events_capacity);
        Ok(Loop {
            poll,
            events,
            channels: Slab::new(),
            handle: LoopHandle(shared),
            config,
            balancer: None,
        })
    }

    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    /// Joins this loop into a balanced accept fleet (§4.5). Listeners
    /// created afterwards spray accepted children across the fleet
    /// instead of keeping them local.
    pub fn set_balancer(&mut self, balancer: LoopBalancer) {
        self.balancer = Some(balancer);
    }

    /// `connect(ip, port, callback)` (§4.3). Owning-thread only by
    /// construction — it takes `&mut Loop`, never routed through the
    /// inbox.
    pub fn connect(&mut self, ip: &str, port: u16, callback: Callback) -> Result<ChannelRef, NetError> {
        self.connect_with_deadline(ip, port, callback, 0)
    }

    pub fn connect_with_deadline(
        &mut self,
        ip: &str,
        port: u16,
        callback: Callback,
        connect_timeout_secs: u64,
    ) -> Result<ChannelRef, NetError> {
        let mut channel = Channel::new(
            self.config.channel.max_send_queue_len,
            self.config.channel.ring_capacity,
        );
        channel.set_flags(self.config.flags);
        let deadline = if connect_timeout_secs == 0 {
            0
        } else {
            now_secs() + connect_timeout_secs
        };
        let channel_ref =
            ChannelRef::new_connecting(self.handle.downgrade(), callback, channel, ip, port, deadline)?;
        self.add(channel_ref.clone())?;
        Ok(channel_ref)
    }

    /// `accept(ip, port, backlog, callback)` (§4.3).
    pub fn listen(&mut self, ip: &str, port: u16, callback: Callback) -> Result<ChannelRef, NetError> {
        let mut channel = Channel::new(
            self.config.channel.max_send_queue_len,
            self.config.channel.ring_capacity,
        );
        channel.set_flags(self.config.flags);
        let channel_ref = ChannelRef::new_accepting(
            self.handle.downgrade(),
            callback,
            channel,
            ip,
            port,
            self.config.accept_backlog,
        )?;
        self.add(channel_ref.clone())?;
        Ok(channel_ref)
    }

    fn add(&mut self, channel_ref: ChannelRef) -> Result<(), NetError> {
        let entry = self.channels.vacant_entry();
        let token = Token(entry.key());
        channel_ref
            .register_with(self.poll.registry(), token)
            .map_err(NetError::BindFail)?;
        channel_ref.set_token(Some(token));
        entry.insert(channel_ref);
        self.handle.0.channel_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Drive the loop until [`LoopHandle::request_stop`] is called, or
    /// forever if it never is. Each iteration is one `run_once`.
    pub fn run(&mut self) {
        self.handle.set_thread_id();
        debug!("loop starting on {:?}", thread::current().id());
        while self.run_once() {}
        // A stop request can race with the last turn's poll: drain once
        // more so a straggling close/send posted right at shutdown still
        // lands instead of being silently dropped.
        self.drain_inbox();
        debug!("loop exiting");
    }

    /// One reactor turn: drain the inbox, poll once, dispatch events, run
    /// timeouts, sweep deferred mutations. Returns `false` once
    /// [`LoopHandle::request_stop`] has been called.
    pub fn run_once(&mut self) -> bool {
        if self.handle.thread_id().is_none() {
            self.handle.set_thread_id();
        }
        if !self.handle.0.running.load(Ordering::SeqCst) {
            return false;
        }
        self.drain_inbox();
        if let Err(e) = self.poll.poll(&mut self.events, self.config.poll_timeout) {
            if e.kind() != io::ErrorKind::Interrupted {
                warn!("poll failed: {}", e);
            }
            return true;
        }
        let now = now_secs();
        let mut migrations = Vec::new();
        for event in self.events.iter() {
            let token = event.token();
            if token == WAKER_TOKEN {
                continue;
            }
            let Some(channel_ref) = self.channels.get(token.0).cloned() else {
                continue;
            };
            if channel_ref.state() == ChannelState::Accepting {
                if event.is_readable() {
                    let mut m = channel_ref.do_accept(
                        &self.config.channel,
                        self.config.flags,
                        self.balancer.as_ref(),
                        &self.handle,
                    );
                    migrations.append(&mut m);
                }
                continue;
            }
            if event.is_readable() {
                channel_ref.on_readable(now);
            }
            if event.is_writable() {
                channel_ref.on_writable(now);
            }
        }
        self.dispatch_migrations(migrations);
        self.check_timeouts(now);
        self.sweep();
        self.handle.0.running.load(Ordering::SeqCst)
    }

    fn dispatch_migrations(&mut self, migrations: Vec<Migration>) {
        for m in migrations {
            if m.same_loop {
                if let Err(e) = self.add(m.child.clone()) {
                    warn!("failed to register accepted child locally: {:?}", e);
                    continue;
                }
                m.child.fire(ChEvent::Accept);
            } else {
                trace!("migrating accepted child to another loop");
                if m.target.post_accept(m.child).is_err() {
                    warn!("target loop is gone; dropping migrated child");
                }
            }
        }
    }

    fn check_timeouts(&self, now: u64) {
        for (_, channel_ref) in self.channels.iter() {
            channel_ref.check_timeout(now);
        }
    }

    /// Drains every queued cross-thread request (§4.4), in FIFO order, at
    /// the head of the turn.
    fn drain_inbox(&mut self) {
        let messages: Vec<InboxMsg> = {
            let mut inbox = self.handle.0.inbox.lock().unwrap();
            let n = inbox.len().min(self.config.messages_per_tick);
            inbox.drain(..n).collect()
        };
        if !messages.is_empty() {
            trace!("draining {} inbox message(s)", messages.len());
        }
        for msg in messages {
            match msg {
                InboxMsg::Send(channel_ref, data) => {
                    channel_ref.enqueue_and_flush(data);
                }
                InboxMsg::Close(channel_ref) => {
                    channel_ref.close_same_thread();
                }
                InboxMsg::Accept(channel_ref) => {
                    if let Err(e) = self.add(channel_ref.clone()) {
                        warn!("failed to register migrated child: {:?}", e);
                        continue;
                    }
                    channel_ref.fire(ChEvent::Accept);
                }
            }
        }
    }

    /// The deferred-mutation pass (§5): actually deregister closed
    /// channels and reregister ones whose desired interest changed, now
    /// that doing so is safe on the owning thread between `poll` calls.
    fn sweep(&mut self) {
        let mut to_remove = Vec::new();
        for (key, channel_ref) in self.channels.iter() {
            if channel_ref.is_closed() {
                to_remove.push(key);
                continue;
            }
            if channel_ref.take_mask_dirty() {
                if let Some(token) = channel_ref.token() {
                    if let Err(e) = channel_ref.reregister_with(self.poll.registry(), token) {
                        warn!("reregister failed: {}", e);
                    }
                }
            }
        }
        for key in to_remove {
            if let Some(channel_ref) = self.channels.try_remove(key) {
                let _ = channel_ref.deregister_with(self.poll.registry());
                channel_ref.set_token(None);
                self.handle.0.channel_count.fetch_sub(1, Ordering::Relaxed);
            }
        }
    }
}

/// Runs a [`Loop`] on a dedicated background thread (§4.4, "worker
/// pool"). Dropping joins the thread after requesting it stop.
pub struct LoopWorker {
    handle: LoopHandle,
    join: Option<JoinHandle<()>>,
}

impl LoopWorker {
    pub fn spawn(config: LoopConfig) -> Result<LoopWorker, NetError> {
        Self::spawn_named("netloop-worker", config)
    }

    pub fn spawn_with_balancer(
        name: &str,
        config: LoopConfig,
        balancer: LoopBalancer,
    ) -> Result<LoopWorker, NetError> {
        let mut event_loop = Loop::new(config).map_err(NetError::ThreadStartFail)?;
        event_loop.set_balancer(balancer);
        Self::spawn_loop(name, event_loop)
    }

    pub(crate) fn spawn_named(name: &str, config: LoopConfig) -> Result<LoopWorker, NetError> {
        let event_loop = Loop::new(config).map_err(NetError::ThreadStartFail)?;
        Self::spawn_loop(name, event_loop)
    }

    /// Hands an already-configured [`Loop`] (one that's had `connect`/
    /// `listen` called on it directly, before any other thread could
    /// observe it) off to a background thread. The usual way to get a
    /// loop running once its channels are set up.
    pub fn from_loop(name: &str, event_loop: Loop) -> Result<LoopWorker, NetError> {
        Self::spawn_loop(name, event_loop)
    }

    fn spawn_loop(name: &str, mut event_loop: Loop) -> Result<LoopWorker, NetError> {
        let handle = event_loop.handle();
        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || event_loop.run())
            .map_err(NetError::ThreadStartFail)?;
        Ok(LoopWorker {
            handle,
            join: Some(join),
        })
    }

    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    /// Requests the loop return from `run`; does not block.
    pub fn stop(&self) {
        self.handle.request_stop();
    }

    /// Requests the loop stop and blocks until its thread has exited.
    pub fn join(mut self) {
        self.handle.request_stop();
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

impl Drop for LoopWorker {
    fn drop(&mut self) {
        self.handle.request_stop();
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

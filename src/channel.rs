//! Component B — the low-level channel (§4.1).
//!
//! Owns exactly one socket file descriptor, its receive ring buffer, and its
//! bounded queue of pending send buffers. Everything here is synchronous,
//! non-blocking, single-threaded plumbing; the thread-safety and lifecycle
//! rules live one layer up, in [`crate::reference::ChannelRef`].
use std::io;
use std::net::SocketAddr;

use mio::net::{TcpListener, TcpStream};

use crate::buf::{RingBuf, SendBuffer, SendQueue};
use crate::error::IoStatus;
use crate::socket::{self, ChannelFlags};

/// The socket a `Channel` wraps: either a connected/connecting stream, or a
/// bound listener. A channel never holds both at once.
pub enum Socket {
    Stream(TcpStream),
    Listener(TcpListener),
}

pub struct Channel {
    socket: Option<Socket>,
    ring: RingBuf,
    sendq: SendQueue,
    flags: ChannelFlags,
}

impl Channel {
    /// `create(max_send_list_len, max_ring_capacity)`: a channel with no
    /// socket yet, in state *idle*. `connect`/`listen` give it one.
    pub fn new(max_send_list_len: usize, max_ring_capacity: usize) -> Channel {
        Channel {
            socket: None,
            ring: RingBuf::new(max_ring_capacity),
            sendq: SendQueue::new(max_send_list_len),
            flags: ChannelFlags::default(),
        }
    }

    /// `create_from(fd, …)`: wrap an already-accepted descriptor. Used by
    /// the accept path (§4.3); the new channel starts with fresh buffers.
    pub fn from_accepted(
        stream: TcpStream,
        max_send_list_len: usize,
        max_ring_capacity: usize,
        flags: ChannelFlags,
    ) -> io::Result<Channel> {
        socket::apply_stream_flags(&stream, flags)?;
        Ok(Channel {
            socket: Some(Socket::Stream(stream)),
            ring: RingBuf::new(max_ring_capacity),
            sendq: SendQueue::new(max_send_list_len),
            flags,
        })
    }

    /// Overrides the default flags a channel applies to its socket once
    /// it has one. Must be called before `connect`/`listen`.
    pub fn set_flags(&mut self, flags: ChannelFlags) {
        self.flags = flags;
    }

    pub fn connect(&mut self, ip: &str, port: u16) -> io::Result<()> {
        let addr = socket::resolve(ip, port)?;
        let stream = socket::connect(addr, self.flags)?;
        self.socket = Some(Socket::Stream(stream));
        Ok(())
    }

    /// `accept(ip, port, backlog)`: bind, reuse-addr, disable linger, listen.
    pub fn listen(&mut self, ip: &str, port: u16, backlog: u32) -> Result<(), socket::BindOrListenError> {
        let addr = socket::resolve(ip, port).map_err(socket::BindOrListenError::Bind)?;
        let listener = socket::bind_and_listen(addr, backlog)?;
        self.socket = Some(Socket::Listener(listener));
        Ok(())
    }

    pub fn stream(&self) -> Option<&TcpStream> {
        match &self.socket {
            Some(Socket::Stream(s)) => Some(s),
            _ => None,
        }
    }

    pub fn stream_mut(&mut self) -> Option<&mut TcpStream> {
        match &mut self.socket {
            Some(Socket::Stream(s)) => Some(s),
            _ => None,
        }
    }

    pub fn listener(&self) -> Option<&TcpListener> {
        match &self.socket {
            Some(Socket::Listener(l)) => Some(l),
            _ => None,
        }
    }

    pub fn listener_mut(&mut self) -> Option<&mut TcpListener> {
        match &mut self.socket {
            Some(Socket::Listener(l)) => Some(l),
            _ => None,
        }
    }

    /// `accept()` on the underlying listener: a single pending connection.
    pub fn accept_one(&self) -> io::Result<(TcpStream, SocketAddr)> {
        match &self.socket {
            Some(Socket::Listener(l)) => socket::accept(l),
            _ => Err(io::Error::new(io::ErrorKind::InvalidInput, "not a listener")),
        }
    }

    /// Reads `SO_ERROR` to confirm (or refute) an in-progress connect.
    pub fn take_connect_error(&self) -> io::Result<Option<io::Error>> {
        match &self.socket {
            Some(Socket::Stream(s)) => socket::take_connect_error(s),
            _ => Ok(None),
        }
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        match &self.socket {
            Some(Socket::Stream(s)) => socket::getpeername(s),
            _ => Err(io::Error::new(io::ErrorKind::NotConnected, "no stream")),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match &self.socket {
            Some(Socket::Stream(s)) => socket::getsockname(s),
            Some(Socket::Listener(l)) => l.local_addr(),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "no socket")),
        }
    }

    /// `send(data, size)`: an immediate non-blocking attempt, bypassing the
    /// queue. The caller (`ChannelRef`) is responsible for queuing whatever
    /// doesn't go out.
    pub fn send(&mut self, data: &[u8]) -> (IoStatus, usize) {
        match self.stream_mut() {
            Some(stream) => socket::send(stream, data),
            None => (IoStatus::Fail, 0),
        }
    }

    /// Queue `data` for deferred sending. Fails with `BufferFull`-shaped
    /// rejection via the `SendQueue`'s own bound, surfaced to the caller as
    /// a `Fail` since a full send queue is unrecoverable for this write.
    pub fn queue(&mut self, data: Vec<u8>) -> IoStatus {
        match self.sendq.push(SendBuffer::new(data)) {
            Ok(()) => IoStatus::Partial,
            Err(_) => IoStatus::Fail,
        }
    }

    /// `update_send()`: drain the pending send queue as far as the socket
    /// currently allows.
    pub fn update_send(&mut self) -> IoStatus {
        let Some(stream) = self.stream_mut() else {
            return IoStatus::Fail;
        };
        match self.sendq.flush_into(stream) {
            Ok(true) => IoStatus::Ok,
            Ok(false) => IoStatus::Partial,
            Err(e) if is_transient(&e) => IoStatus::Partial,
            Err(_) => IoStatus::Fail,
        }
    }

    pub fn has_pending_send(&self) -> bool {
        !self.sendq.is_empty()
    }

    /// `update_recv()`: drain the socket into the ring buffer until the
    /// socket would block or the ring buffer saturates.
    pub fn update_recv(&mut self) -> IoStatus {
        let ring = &mut self.ring;
        let stream = match &mut self.socket {
            Some(Socket::Stream(s)) => s,
            _ => return IoStatus::Fail,
        };
        loop {
            if ring.is_full() {
                return IoStatus::BufferFull;
            }
            match ring.fill_from(stream) {
                // The ring wasn't full and its writable slice wasn't empty,
                // so a `0`-byte read here can only mean the peer's orderly
                // shutdown, not "no more data available right now."
                Ok(0) => return IoStatus::Fail,
                Ok(_) => continue,
                Err(e) if is_transient(&e) => return IoStatus::Ok,
                Err(_) => return IoStatus::Fail,
            }
        }
    }

    /// Pull up to `out.len()` accumulated bytes out of the ring buffer.
    pub fn read_received(&mut self, out: &mut [u8]) -> usize {
        self.ring.read_into(out)
    }

    pub fn received_len(&self) -> usize {
        self.ring.len()
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted)
}

//! Component A — the socket adapter (§6).
//!
//! A thin, uniform layer over non-blocking TCP primitives. The actual
//! readiness-notification backend (epoll/kqueue/IOCP) is never touched here
//! or anywhere else in this crate — that's `mio`'s job. This module only
//! creates sockets, sets options on them, and performs raw non-blocking
//! reads/writes whose return contract `Channel` (§4.1) classifies.
use std::io::{self, Read, Write};
use std::net::{IpAddr, SocketAddr};

use mio::net::{TcpListener, TcpStream};
use socket2::{Domain, Protocol, SockRef, Socket, Type};

use crate::error::IoStatus;

/// Construction-time flags, fixed for a channel's lifetime (§3).
#[derive(Debug, Clone, Copy)]
pub struct ChannelFlags {
    pub nodelay: bool,
    pub keepalive: bool,
    pub linger_off: bool,
    pub reuse_addr: bool,
}

impl Default for ChannelFlags {
    fn default() -> ChannelFlags {
        ChannelFlags {
            nodelay: true,
            keepalive: false,
            linger_off: true,
            reuse_addr: true,
        }
    }
}

/// Initiate a non-blocking connect. Mirrors `connect(fd, ip, port)`.
///
/// Returns `Ok` if the connect is already complete or still in progress
/// (`EINPROGRESS`/`WouldBlock`); the caller awaits writability to confirm.
pub fn connect(addr: SocketAddr, flags: ChannelFlags) -> io::Result<TcpStream> {
    let stream = TcpStream::connect(addr)?;
    apply_stream_flags(&stream, flags)?;
    Ok(stream)
}

/// Which of the two syscalls inside [`bind_and_listen`] failed, so callers
/// can report `bind_fail` and `listen_fail` as the distinct outcomes §6
/// names them.
pub enum BindOrListenError {
    Bind(io::Error),
    Listen(io::Error),
}

/// `bind_and_listen`: always sets `SO_REUSEADDR` and disables linger,
/// regardless of `flags` — a listening socket should always be free to
/// rebind after a restart.
pub fn bind_and_listen(addr: SocketAddr, backlog: u32) -> Result<TcpListener, BindOrListenError> {
    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP)).map_err(BindOrListenError::Bind)?;
    socket.set_reuse_address(true).map_err(BindOrListenError::Bind)?;
    socket.set_linger(None).map_err(BindOrListenError::Bind)?;
    socket.set_nonblocking(true).map_err(BindOrListenError::Bind)?;
    socket.bind(&addr.into()).map_err(BindOrListenError::Bind)?;
    socket.listen(backlog as i32).map_err(BindOrListenError::Listen)?;
    TcpListener::from_std(socket.into()).map_err(BindOrListenError::Listen)
}

/// `accept(fd)`: accept a single pending connection, if any.
pub fn accept(listener: &TcpListener) -> io::Result<(TcpStream, SocketAddr)> {
    listener.accept()
}

pub fn apply_stream_flags(stream: &TcpStream, flags: ChannelFlags) -> io::Result<()> {
    let sock = SockRef::from(stream);
    if flags.nodelay {
        set_nagle_off(stream)?;
    }
    if !flags.keepalive {
        set_keepalive_off(stream)?;
    }
    if flags.linger_off {
        sock.set_linger(None)?;
    }
    Ok(())
}

pub fn set_nagle_off(stream: &TcpStream) -> io::Result<()> {
    SockRef::from(stream).set_nodelay(true)
}

pub fn set_keepalive_off(stream: &TcpStream) -> io::Result<()> {
    SockRef::from(stream).set_keepalive(false)
}

pub fn set_recv_buffer_size(stream: &TcpStream, bytes: usize) -> io::Result<()> {
    SockRef::from(stream).set_recv_buffer_size(bytes)
}

pub fn set_send_buffer_size(stream: &TcpStream, bytes: usize) -> io::Result<()> {
    SockRef::from(stream).set_send_buffer_size(bytes)
}

/// `set_donot_route_on`: `SO_DONTROUTE`. Not exposed by `socket2`, so this
/// drops to the raw syscall on unix; a no-op elsewhere (matching the
/// original's own `#ifdef`-gated implementation for this option).
#[cfg(unix)]
pub fn set_donot_route_on(stream: &TcpStream) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;
    let fd = stream.as_raw_fd();
    let flag: libc::c_int = 1;
    let ret = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_DONTROUTE,
            &flag as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if ret == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
pub fn set_donot_route_on(_stream: &TcpStream) -> io::Result<()> {
    Ok(())
}

pub fn getpeername(stream: &TcpStream) -> io::Result<SocketAddr> {
    stream.peer_addr()
}

pub fn getsockname(stream: &TcpStream) -> io::Result<SocketAddr> {
    stream.local_addr()
}

/// Normalizes the `send`/`recv` return contract described in §6: transient
/// kernel conditions become `Ok` with zero bytes moved; a genuine fatal
/// error becomes `Fail`.
pub fn classify_io_result(result: io::Result<usize>) -> (IoStatus, usize) {
    match result {
        Ok(n) => (IoStatus::Ok, n),
        Err(e) if is_transient(&e) => (IoStatus::Ok, 0),
        Err(_) => (IoStatus::Fail, 0),
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// A single non-blocking send attempt. Positive count, `0` for soft
/// would-block, fatal errors are reported via the `IoStatus` alongside 0.
pub fn send(stream: &mut TcpStream, data: &[u8]) -> (IoStatus, usize) {
    classify_io_result(stream.write(data))
}

/// Confirms the outcome of an in-progress non-blocking connect by reading
/// `SO_ERROR` once the socket reports writable.
pub fn take_connect_error(stream: &TcpStream) -> io::Result<Option<io::Error>> {
    SockRef::from(stream).take_error()
}

pub fn resolve(ip: &str, port: u16) -> io::Result<SocketAddr> {
    let addr: IpAddr = ip
        .parse()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid IP literal"))?;
    Ok(SocketAddr::new(addr, port))
}

use std::io;
use std::net::SocketAddr;

use mio::net::TcpStream;
use socket2::{Domain, Protocol, Socket, Type};

/// Starts a non-blocking connect to `addr`.
///
/// The returned stream is still connecting; completion shows up as the first
/// writable event on the poll it gets registered with.
pub fn open_stream(addr: SocketAddr) -> io::Result<TcpStream> {
    let socket = create_socket(addr)?;

    match socket.connect(&addr.into()) {
        Ok(()) => {}
        Err(ref e) if connect_in_progress(e) => {}
        Err(e) => return Err(e),
    }

    Ok(TcpStream::from_std(socket.into()))
}

/// Outbound socket with latency-oriented flags.
///
/// * `TCP_NODELAY`: frames are small and go out immediately, no Nagle batching.
/// * `SO_KEEPALIVE`: lets the kernel notice a dead peer on an idle connection.
/// * Non-blocking, so `connect` returns before the handshake with the peer completes.
pub fn create_socket(addr: SocketAddr) -> io::Result<Socket> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nonblocking(true)?;
    socket.set_nodelay(true)?;
    socket.set_keepalive(true)?;
    Ok(socket)
}

// Unix reports a pending non-blocking connect as EINPROGRESS, Windows as
// WSAEWOULDBLOCK (which maps to `WouldBlock`).
fn connect_in_progress(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock || e.raw_os_error() == EINPROGRESS
}

#[cfg(any(target_os = "linux", target_os = "android"))]
const EINPROGRESS: Option<i32> = Some(115);

#[cfg(all(unix, not(any(target_os = "linux", target_os = "android"))))]
const EINPROGRESS: Option<i32> = Some(36);

#[cfg(not(unix))]
const EINPROGRESS: Option<i32> = None;

//! Interruptible socket primitives for the tunnel.
//!
//! Each blocking call arms the [`Interruptor`] with a duplicate of the socket
//! (`try_clone` yields a second descriptor for the same socket), performs the
//! call, and disarms.  An `interrupt()` from another thread shuts the
//! duplicate down, which makes the blocked call on the original return with an
//! error; that error is then reported as [`NetError::Interrupted`] rather than
//! as an I/O failure.  On Linux a shut-down stream makes a blocked `recv`
//! return 0 bytes, so [`recv`] treats end of stream after an interrupt the
//! same way.
//!
//! Only IPv4 loopback endpoints are used: `adb` binds its tunnel ends to
//! `127.0.0.1`.

use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, SocketAddrV4, TcpStream};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use thiserror::Error;
use tracing::debug;

use super::interrupt::Interruptor;

/// Backlog of the reverse-tunnel listening socket.  The device opens a small
/// fixed number of connections.
pub const LISTEN_BACKLOG: i32 = 1;

/// Error type for the socket primitives.
#[derive(Debug, Error)]
pub enum NetError {
    /// The operation was cancelled through the [`Interruptor`].
    #[error("socket operation interrupted")]
    Interrupted,

    /// The OS call failed.
    #[error("could not {op} {endpoint}: {source}")]
    Io {
        op: &'static str,
        endpoint: SocketAddrV4,
        #[source]
        source: io::Error,
    },
}

/// `127.0.0.1:<port>`.
pub fn loopback(port: u16) -> SocketAddrV4 {
    SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)
}

fn io_error(op: &'static str, endpoint: SocketAddrV4) -> impl FnOnce(io::Error) -> NetError {
    move |source| NetError::Io {
        op,
        endpoint,
        source,
    }
}

fn new_tcp_socket(endpoint: SocketAddrV4) -> Result<Socket, NetError> {
    Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
        .map_err(io_error("create socket for", endpoint))
}

/// Runs `call` on `socket` with a duplicate of it armed in `intr`.
fn armed<T>(
    intr: &Interruptor,
    socket: &Socket,
    op: &'static str,
    endpoint: SocketAddrV4,
    call: impl FnOnce(&Socket) -> io::Result<T>,
) -> Result<T, NetError> {
    let dup = socket.try_clone().map_err(io_error(op, endpoint))?;
    run_armed(intr, dup, op, endpoint, || call(socket))
}

/// Same as [`armed`] for a connected stream.
fn armed_stream<T>(
    intr: &Interruptor,
    stream: &TcpStream,
    op: &'static str,
    call: impl FnOnce(&TcpStream) -> io::Result<T>,
) -> Result<T, NetError> {
    let endpoint = peer_endpoint(stream);
    let dup = stream
        .try_clone()
        .map(Socket::from)
        .map_err(io_error(op, endpoint))?;
    run_armed(intr, dup, op, endpoint, || call(stream))
}

fn run_armed<T>(
    intr: &Interruptor,
    dup: Socket,
    op: &'static str,
    endpoint: SocketAddrV4,
    call: impl FnOnce() -> io::Result<T>,
) -> Result<T, NetError> {
    if !intr.arm_socket(dup) {
        return Err(NetError::Interrupted);
    }
    let result = call();
    intr.disarm();

    match result {
        Ok(value) => Ok(value),
        Err(_) if intr.is_interrupted() => Err(NetError::Interrupted),
        Err(source) => Err(NetError::Io {
            op,
            endpoint,
            source,
        }),
    }
}

/// Binds a TCP socket to `127.0.0.1:<port>` and starts listening.
///
/// # Errors
///
/// [`NetError::Io`] when the port is taken or the socket cannot be created,
/// [`NetError::Interrupted`] if `intr` was interrupted.
pub fn listen(intr: &Interruptor, port: u16) -> Result<Socket, NetError> {
    let endpoint = loopback(port);
    let socket = new_tcp_socket(endpoint)?;
    socket
        .set_reuse_address(true)
        .map_err(io_error("set SO_REUSEADDR on", endpoint))?;

    armed(intr, &socket, "listen on", endpoint, |s| {
        s.bind(&SockAddr::from(endpoint))?;
        s.listen(LISTEN_BACKLOG)
    })?;
    debug!("listening on {endpoint}");
    Ok(socket)
}

/// Accepts one connection on `listener`.
///
/// # Errors
///
/// [`NetError::Interrupted`] when cancelled while blocked, [`NetError::Io`]
/// otherwise.
pub fn accept(intr: &Interruptor, listener: &Socket) -> Result<TcpStream, NetError> {
    let endpoint = local_endpoint(listener);
    let (socket, peer) = armed(intr, listener, "accept on", endpoint, Socket::accept)?;
    match peer.as_socket() {
        Some(peer) => debug!("accepted connection from {peer} on {endpoint}"),
        None => debug!("accepted connection on {endpoint}"),
    }
    Ok(socket.into())
}

/// Connects to `127.0.0.1:<port>`.
///
/// # Errors
///
/// [`NetError::Io`] when the connection is refused, [`NetError::Interrupted`]
/// when cancelled.
pub fn connect(intr: &Interruptor, port: u16) -> Result<TcpStream, NetError> {
    let endpoint = loopback(port);
    let socket = new_tcp_socket(endpoint)?;
    armed(intr, &socket, "connect to", endpoint, |s| {
        s.connect(&SockAddr::from(endpoint))
    })?;
    Ok(socket.into())
}

/// Receives into `buf`, returning the number of bytes read (0 at EOF).
///
/// # Errors
///
/// [`NetError::Interrupted`] when cancelled while blocked, [`NetError::Io`]
/// otherwise.
pub fn recv(intr: &Interruptor, stream: &TcpStream, buf: &mut [u8]) -> Result<usize, NetError> {
    let read = armed_stream(intr, stream, "receive from", |mut s| s.read(buf))?;
    // A shut down socket reads as EOF rather than failing.
    if read == 0 && !buf.is_empty() && intr.is_interrupted() {
        return Err(NetError::Interrupted);
    }
    Ok(read)
}

/// Sends the whole of `buf`.
///
/// # Errors
///
/// [`NetError::Interrupted`] when cancelled while blocked, [`NetError::Io`]
/// otherwise.
pub fn send_all(intr: &Interruptor, stream: &TcpStream, buf: &[u8]) -> Result<(), NetError> {
    armed_stream(intr, stream, "send to", |mut s| s.write_all(buf))
}

/// Closes a listening socket.
pub fn close(socket: Socket) {
    debug!("closing socket on {}", local_endpoint(&socket));
    drop(socket);
}

/// Local address of `socket`, or `0.0.0.0:0` if it cannot be determined.
fn local_endpoint(socket: &Socket) -> SocketAddrV4 {
    socket
        .local_addr()
        .ok()
        .and_then(|addr| addr.as_socket_ipv4())
        .unwrap_or_else(|| SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0))
}

/// Remote address of `stream`, or `0.0.0.0:0` if it cannot be determined.
fn peer_endpoint(stream: &TcpStream) -> SocketAddrV4 {
    match stream.peer_addr() {
        Ok(std::net::SocketAddr::V4(addr)) => addr,
        _ => SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0),
    }
}

/// Port `socket` is bound to, if any.
pub fn local_port(socket: &Socket) -> Option<u16> {
    socket
        .local_addr()
        .ok()
        .and_then(|addr| addr.as_socket_ipv4())
        .map(|addr| addr.port())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_listen_on_ephemeral_port_reports_bound_port() {
        let intr = Interruptor::new();
        let socket = listen(&intr, 0).expect("listen");
        assert!(local_port(&socket).is_some_and(|p| p != 0));
    }

    #[test]
    fn test_listen_on_busy_port_is_an_io_error() {
        // Arrange
        let intr = Interruptor::new();
        let taken = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = taken.local_addr().expect("addr").port();

        // Act
        let result = listen(&intr, port);

        // Assert
        assert!(matches!(result, Err(NetError::Io { .. })));
        assert!(!intr.is_interrupted());
    }

    #[test]
    fn test_listen_after_interrupt_fails_fast() {
        let intr = Interruptor::new();
        intr.interrupt();
        assert!(matches!(listen(&intr, 0), Err(NetError::Interrupted)));
    }

    #[test]
    fn test_connect_then_accept_exchanges_bytes() {
        // Arrange
        let intr = Interruptor::new();
        let listener = listen(&intr, 0).expect("listen");
        let port = local_port(&listener).expect("port");

        // Act
        let client = thread::spawn(move || {
            let intr = Interruptor::new();
            let mut stream = connect(&intr, port).expect("connect");
            stream.write_all(b"ping").expect("write");
        });
        let mut server = accept(&intr, &listener).expect("accept");
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).expect("read");
        client.join().expect("join");

        // Assert
        assert_eq!(&buf, b"ping");
    }

    #[test]
    fn test_connect_to_closed_port_is_an_io_error() {
        let intr = Interruptor::new();
        let port = {
            let scratch = TcpListener::bind("127.0.0.1:0").expect("bind");
            scratch.local_addr().expect("addr").port()
        };
        assert!(matches!(connect(&intr, port), Err(NetError::Io { .. })));
    }

    #[test]
    fn test_accept_is_interrupted_from_other_thread() {
        // Arrange
        let intr = Arc::new(Interruptor::new());
        let listener = listen(&intr, 0).expect("listen");

        // Act
        let canceller = {
            let intr = Arc::clone(&intr);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                intr.interrupt();
            })
        };
        let result = accept(&intr, &listener);
        canceller.join().expect("join");

        // Assert
        assert!(matches!(result, Err(NetError::Interrupted)));
    }

    /// A connected loopback pair: (accepted side, connecting side).
    fn stream_pair(intr: &Interruptor) -> (TcpStream, TcpStream) {
        let listener = listen(intr, 0).expect("listen");
        let port = local_port(&listener).expect("port");
        let client = connect(intr, port).expect("connect");
        let server = accept(intr, &listener).expect("accept");
        (server, client)
    }

    #[test]
    fn test_send_all_then_recv_exchanges_bytes() {
        // Arrange
        let intr = Interruptor::new();
        let (server, client) = stream_pair(&intr);

        // Act
        send_all(&intr, &client, b"\0device").expect("send");
        let mut buf = [0u8; 16];
        let mut received = Vec::new();
        while received.len() < 7 {
            let n = recv(&intr, &server, &mut buf).expect("recv");
            assert_ne!(n, 0, "unexpected EOF");
            received.extend_from_slice(&buf[..n]);
        }

        // Assert
        assert_eq!(received, b"\0device");
    }

    #[test]
    fn test_recv_reports_eof_when_peer_closes() {
        let intr = Interruptor::new();
        let (server, client) = stream_pair(&intr);
        drop(client);

        let mut buf = [0u8; 8];
        assert_eq!(recv(&intr, &server, &mut buf).expect("recv"), 0);
    }

    #[test]
    fn test_recv_is_interrupted_from_other_thread() {
        // Arrange: nothing is ever sent, so recv blocks.
        let intr = Arc::new(Interruptor::new());
        let (server, _client) = stream_pair(&intr);

        // Act
        let canceller = {
            let intr = Arc::clone(&intr);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                intr.interrupt();
            })
        };
        let mut buf = [0u8; 8];
        let result = recv(&intr, &server, &mut buf);
        canceller.join().expect("join");

        // Assert
        assert!(matches!(result, Err(NetError::Interrupted)));
    }

    #[test]
    fn test_send_all_after_interrupt_fails_fast() {
        let intr = Interruptor::new();
        let (_server, client) = stream_pair(&intr);
        intr.interrupt();

        assert!(matches!(
            send_all(&intr, &client, b"ping"),
            Err(NetError::Interrupted)
        ));
    }
}

//! TCP Socket Implementation
//!
//! [`Socket`] over tokio's TCP types. The socket moves through
//! `fresh → bound → listening` on the server side and `fresh → connected` on
//! the client side; `close` is terminal from any state, and a graceful
//! `disconnect` of a connected socket ends in the same closed state.
//!
//! Reads and writes use `try_read`/`try_write` after awaiting readiness, so a
//! connected stream is shared by reference between the receive and send
//! loops. Every operation also watches an abort token; `close` and
//! `disconnect` fire it so pending operations complete as
//! [`SocketStatus::OperationAborted`].

use super::{OpKind, OpResult, Socket, SocketOp, SocketStatus};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::io;
use std::net::{Shutdown, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::debug;

enum State {
    Fresh,
    Bound(tokio::net::TcpSocket),
    Listening(Arc<TcpListener>),
    Connected(Stream),
    Closed,
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::Fresh => "fresh",
            State::Bound(_) => "bound",
            State::Listening(_) => "listening",
            State::Connected(_) => "connected",
            State::Closed => "closed",
        }
    }
}

struct Stream {
    io: Arc<TcpStream>,
    /// Duplicate handle for shutdown, which tokio only offers on `&mut`
    control: std::net::TcpStream,
}

/// Non-blocking TCP socket driven by the tokio reactor
pub struct TcpSocket {
    state: Mutex<State>,
    abort: Mutex<CancellationToken>,
    no_delay: AtomicBool,
    local: Mutex<Option<SocketAddr>>,
    remote: Mutex<Option<SocketAddr>>,
}

impl TcpSocket {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::Fresh),
            abort: Mutex::new(CancellationToken::new()),
            no_delay: AtomicBool::new(false),
            local: Mutex::new(None),
            remote: Mutex::new(None),
        }
    }

    /// Wrap an already connected stream
    pub fn from_stream(stream: TcpStream, no_delay: bool) -> io::Result<Self> {
        let socket = Self::new();
        socket.no_delay.store(no_delay, Ordering::Release);
        socket.adopt(stream)?;
        Ok(socket)
    }

    fn adopt(&self, stream: TcpStream) -> io::Result<()> {
        stream.set_nodelay(self.no_delay.load(Ordering::Acquire))?;
        let local = stream.local_addr()?;
        let peer = stream.peer_addr()?;

        let std_stream = stream.into_std()?;
        let control = std_stream.try_clone()?;
        let io = TcpStream::from_std(std_stream)?;

        let mut state = self.state.lock();
        if matches!(*state, State::Closed) {
            let _ = control.shutdown(Shutdown::Both);
            return Err(io::Error::from(io::ErrorKind::ConnectionAborted));
        }
        *state = State::Connected(Stream {
            io: Arc::new(io),
            control,
        });
        *self.local.lock() = Some(local);
        *self.remote.lock() = Some(peer);
        Ok(())
    }

    fn abort_token(&self) -> CancellationToken {
        self.abort.lock().clone()
    }

    fn stream(&self) -> Result<Arc<TcpStream>, SocketStatus> {
        match &*self.state.lock() {
            State::Connected(stream) => Ok(Arc::clone(&stream.io)),
            State::Closed => Err(SocketStatus::OperationAborted),
            _ => Err(SocketStatus::NotConnected),
        }
    }

    fn prepare_connect(&self, endpoint: SocketAddr) -> Result<tokio::net::TcpSocket, SocketStatus> {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, State::Fresh) {
            State::Bound(socket) => Ok(socket),
            State::Fresh => {
                let socket = if endpoint.is_ipv4() {
                    tokio::net::TcpSocket::new_v4()
                } else {
                    tokio::net::TcpSocket::new_v6()
                };
                socket.map_err(|e| SocketStatus::from(&e))
            }
            State::Closed => {
                *state = State::Closed;
                Err(SocketStatus::OperationAborted)
            }
            other => {
                *state = other;
                Err(SocketStatus::InvalidArgument)
            }
        }
    }
}

impl Default for TcpSocket {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TcpSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpSocket")
            .field("state", &self.state.lock().name())
            .field("local", &*self.local.lock())
            .field("remote", &*self.remote.lock())
            .finish()
    }
}

#[async_trait]
impl Socket for TcpSocket {
    async fn connect(&self, op: &mut SocketOp, endpoint: SocketAddr) -> SocketStatus {
        let abort = self.abort_token();
        op.run(OpKind::Connect, async {
            let socket = match self.prepare_connect(endpoint) {
                Ok(socket) => socket,
                Err(status) => return OpResult::status(status),
            };
            let result = tokio::select! {
                _ = abort.cancelled() => return OpResult::status(SocketStatus::OperationAborted),
                result = socket.connect(endpoint) => result,
            };
            match result.and_then(|stream| self.adopt(stream)) {
                Ok(()) => OpResult::status(SocketStatus::Success),
                Err(e) => OpResult::status(SocketStatus::from(&e)),
            }
        })
        .await
    }

    async fn accept(&self, op: &mut SocketOp) -> SocketStatus {
        let abort = self.abort_token();
        let listener = match &*self.state.lock() {
            State::Listening(listener) => Ok(Arc::clone(listener)),
            State::Closed => Err(SocketStatus::OperationAborted),
            _ => Err(SocketStatus::InvalidArgument),
        };
        let no_delay = self.no_delay.load(Ordering::Acquire);

        let mut accepted = None;
        let status = op
            .run(OpKind::Accept, async {
                let listener = match listener {
                    Ok(listener) => listener,
                    Err(status) => return OpResult::status(status),
                };
                let result = tokio::select! {
                    _ = abort.cancelled() => return OpResult::status(SocketStatus::OperationAborted),
                    result = listener.accept() => result,
                };
                match result.and_then(|(stream, _)| TcpSocket::from_stream(stream, no_delay)) {
                    Ok(socket) => {
                        accepted = Some(socket);
                        OpResult::status(SocketStatus::Success)
                    }
                    Err(e) => OpResult::status(SocketStatus::from(&e)),
                }
            })
            .await;

        if let Some(socket) = accepted {
            op.set_accepted(Arc::new(socket));
        }
        status
    }

    async fn receive(&self, op: &mut SocketOp, buf: &mut [u8]) -> SocketStatus {
        let abort = self.abort_token();
        let stream = self.stream();
        op.run(OpKind::Receive, async move {
            let stream = match stream {
                Ok(stream) => stream,
                Err(status) => return OpResult::status(status),
            };
            if buf.is_empty() {
                return OpResult::new(SocketStatus::Success, 0);
            }
            loop {
                tokio::select! {
                    _ = abort.cancelled() => return OpResult::status(SocketStatus::OperationAborted),
                    ready = stream.readable() => {
                        if let Err(e) = ready {
                            return OpResult::status(SocketStatus::from(&e));
                        }
                    }
                }
                match stream.try_read(buf) {
                    Ok(n) => return OpResult::new(SocketStatus::Success, n),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                    Err(e) => return OpResult::status(SocketStatus::from(&e)),
                }
            }
        })
        .await
    }

    async fn send(&self, op: &mut SocketOp, buf: &[u8]) -> SocketStatus {
        let abort = self.abort_token();
        let stream = self.stream();
        op.run(OpKind::Send, async move {
            let stream = match stream {
                Ok(stream) => stream,
                Err(status) => return OpResult::status(status),
            };
            if buf.is_empty() {
                return OpResult::new(SocketStatus::Success, 0);
            }
            loop {
                tokio::select! {
                    _ = abort.cancelled() => return OpResult::status(SocketStatus::OperationAborted),
                    ready = stream.writable() => {
                        if let Err(e) = ready {
                            return OpResult::status(SocketStatus::from(&e));
                        }
                    }
                }
                match stream.try_write(buf) {
                    Ok(n) => return OpResult::new(SocketStatus::Success, n),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                    Err(e) => return OpResult::status(SocketStatus::from(&e)),
                }
            }
        })
        .await
    }

    async fn disconnect(&self, op: &mut SocketOp) -> SocketStatus {
        op.run(OpKind::Disconnect, async {
            let previous = {
                let mut state = self.state.lock();
                match std::mem::replace(&mut *state, State::Closed) {
                    State::Connected(stream) => Some(stream),
                    other => {
                        *state = other;
                        None
                    }
                }
            };
            let Some(stream) = previous else {
                return OpResult::status(SocketStatus::NotConnected);
            };

            let status = match stream.control.shutdown(Shutdown::Both) {
                Ok(()) => SocketStatus::Success,
                Err(e) if e.kind() == io::ErrorKind::NotConnected => SocketStatus::Success,
                Err(e) => SocketStatus::from(&e),
            };

            self.abort.lock().cancel();
            let peer = self.remote.lock().take();
            debug!(peer = ?peer, %status, "TCP socket disconnected");

            OpResult::status(status)
        })
        .await
    }

    fn bind(&self, endpoint: SocketAddr) -> io::Result<()> {
        let mut state = self.state.lock();
        if !matches!(*state, State::Fresh) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("cannot bind a {} socket", state.name()),
            ));
        }

        let socket = if endpoint.is_ipv4() {
            tokio::net::TcpSocket::new_v4()?
        } else {
            tokio::net::TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(endpoint)?;

        *self.local.lock() = Some(socket.local_addr()?);
        *state = State::Bound(socket);
        Ok(())
    }

    fn listen(&self, backlog: u32) -> io::Result<()> {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, State::Fresh) {
            State::Bound(socket) => {
                let listener = socket.listen(backlog)?;
                *self.local.lock() = Some(listener.local_addr()?);
                *state = State::Listening(Arc::new(listener));
                Ok(())
            }
            other => {
                let name = other.name();
                *state = other;
                Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("cannot listen on a {} socket", name),
                ))
            }
        }
    }

    fn shutdown(&self) -> io::Result<()> {
        match &*self.state.lock() {
            State::Connected(stream) => stream.control.shutdown(Shutdown::Both),
            _ => Err(io::Error::from(io::ErrorKind::NotConnected)),
        }
    }

    fn close(&self) {
        let previous = std::mem::replace(&mut *self.state.lock(), State::Closed);
        self.abort.lock().cancel();
        if let State::Connected(stream) = previous {
            let _ = stream.control.shutdown(Shutdown::Both);
        }
        self.remote.lock().take();
    }

    fn set_no_delay(&self, no_delay: bool) -> io::Result<()> {
        self.no_delay.store(no_delay, Ordering::Release);
        if let State::Connected(stream) = &*self.state.lock() {
            stream.io.set_nodelay(no_delay)?;
        }
        Ok(())
    }

    fn no_delay(&self) -> bool {
        self.no_delay.load(Ordering::Acquire)
    }

    fn set_blocking(&self, blocking: bool) -> io::Result<()> {
        if blocking {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "TcpSocket is driven by the tokio reactor and cannot block",
            ));
        }
        Ok(())
    }

    fn is_blocking(&self) -> bool {
        false
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        *self.local.lock()
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        *self.remote.lock()
    }

    fn is_connected(&self) -> bool {
        matches!(*self.state.lock(), State::Connected(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::{receive_exact, send_all};
    use std::time::Duration;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    async fn listening_socket() -> TcpSocket {
        let server = TcpSocket::new();
        server.bind(loopback()).unwrap();
        server.listen(16).unwrap();
        server
    }

    #[tokio::test]
    async fn test_connect_accept_and_exchange_bytes() {
        let server = listening_socket().await;
        let addr = server.local_addr().unwrap();

        let client = TcpSocket::new();
        client.set_no_delay(true).unwrap();

        let mut accept_op = SocketOp::new();
        let mut connect_op = SocketOp::new();
        let (accepted, connected) = tokio::join!(
            server.accept(&mut accept_op),
            client.connect(&mut connect_op, addr)
        );
        assert_eq!(accepted, SocketStatus::Success);
        assert_eq!(connected, SocketStatus::Success);
        assert!(client.is_connected());
        assert_eq!(client.remote_addr(), Some(addr));

        let peer = accept_op.take_accepted().unwrap();
        assert!(peer.is_connected());

        let mut op = SocketOp::new();
        assert!(send_all(&client, &mut op, b"hello world").await.is_success());

        let mut buf = [0u8; 11];
        assert!(receive_exact(peer.as_ref(), &mut op, &mut buf).await.is_success());
        assert_eq!(&buf, b"hello world");
    }

    #[tokio::test]
    async fn test_close_aborts_pending_accept() {
        let server = Arc::new(listening_socket().await);
        let closer = Arc::clone(&server);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            closer.close();
        });

        let mut op = SocketOp::new();
        let status = server.accept(&mut op).await;
        assert_eq!(status, SocketStatus::OperationAborted);
        assert!(op.take_accepted().is_none());

        // Closed stays closed
        assert_eq!(server.accept(&mut op).await, SocketStatus::OperationAborted);
    }

    #[tokio::test]
    async fn test_peer_disconnect_reads_as_shutdown() {
        let server = listening_socket().await;
        let addr = server.local_addr().unwrap();
        let client = TcpSocket::new();

        let mut accept_op = SocketOp::new();
        let mut connect_op = SocketOp::new();
        let _ = tokio::join!(
            server.accept(&mut accept_op),
            client.connect(&mut connect_op, addr)
        );
        let peer = accept_op.take_accepted().unwrap();

        let mut op = SocketOp::new();
        assert_eq!(client.disconnect(&mut op).await, SocketStatus::Success);
        assert!(!client.is_connected());

        let mut buf = [0u8; 4];
        let status = receive_exact(peer.as_ref(), &mut op, &mut buf).await;
        assert_eq!(status, SocketStatus::Shutdown);

        // Disconnected sockets are not reused
        assert_eq!(client.connect(&mut op, addr).await, SocketStatus::OperationAborted);
        assert_eq!(client.disconnect(&mut op).await, SocketStatus::NotConnected);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Grab a free port, then release it so nothing listens there
        let addr = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();

        let client = TcpSocket::new();
        let mut op = SocketOp::new();
        let status = client.connect(&mut op, addr).await;
        assert_eq!(status, SocketStatus::ConnectionRefused);
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_operations_on_unconnected_socket() {
        let socket = TcpSocket::new();
        let mut op = SocketOp::new();
        let mut buf = [0u8; 4];
        assert_eq!(
            socket.receive(&mut op, &mut buf).await,
            SocketStatus::NotConnected
        );
        assert_eq!(socket.accept(&mut op).await, SocketStatus::InvalidArgument);
        assert!(socket.shutdown().is_err());
        assert!(socket.listen(8).is_err());
    }

    #[tokio::test]
    async fn test_bind_twice_rejected() {
        let socket = TcpSocket::new();
        socket.bind(loopback()).unwrap();
        let err = socket.bind(loopback()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_blocking_mode_is_refused() {
        let socket = TcpSocket::new();
        assert!(!socket.is_blocking());
        assert!(socket.set_blocking(false).is_ok());
        assert_eq!(
            socket.set_blocking(true).unwrap_err().kind(),
            io::ErrorKind::InvalidInput
        );
    }
}

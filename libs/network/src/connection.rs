//! # Connection
//!
//! One socket plus one inbound and one outbound pipeline, tied together by a
//! lifetime cancellation token.
//!
//! ## Lifecycle
//!
//! ```text
//! unconnected → connecting → connected → disconnected
//!        \____________\___________\______↗ (dispose)
//! ```
//!
//! Clients reach `connected` through [`Connection::connect`]; servers hand
//! accepted sockets to [`Connection::set_socket`]. Disposal cancels the
//! lifetime token, which stops both loops, refuses further sends and cancels
//! every pending response.
//!
//! ## Unsolicited messages
//!
//! Inbound messages that do not answer a pending request go to the
//! connection's [`MessageHandler`]. Each call runs on its own task, so a slow
//! handler never holds up frame reads.

use crate::config::ConnectionConfig;
use crate::error::{Result, TransportError};
use crate::metrics::{ConnectionMetrics, MetricsSnapshot};
use crate::pipeline::{Dispatch, InboundPipeline, OutboundPipeline, PendingResponse, PromiseTable};
use crate::pool::Pools;
use crate::socket::{Socket, TcpSocket};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use strand_codec::{Correlation, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unconnected,
    Connecting,
    Connected,
    Disconnected,
}

/// Application hook for messages that are not responses
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn on_message(&self, ctx: ConnectionContext, message: Message);
}

type ConnectedCallback = Arc<dyn Fn(&ConnectionContext) + Send + Sync>;

/// Socket and pipelines of the current connection attempt
struct Session {
    socket: Arc<dyn Socket>,
    inbound: Arc<InboundPipeline>,
    outbound: Arc<OutboundPipeline>,
    token: CancellationToken,
}

impl Session {
    fn abort(self) {
        self.token.cancel();
        self.socket.close();
    }
}

struct Inner {
    handler: Arc<dyn MessageHandler>,
    pools: Pools,
    config: ConnectionConfig,
    on_connected: Option<ConnectedCallback>,
    state: Mutex<ConnectionState>,
    session: Mutex<Option<Session>>,
    promises: Arc<PromiseTable>,
    metrics: Arc<ConnectionMetrics>,
    lifetime: CancellationToken,
    disposed: AtomicBool,
}

impl Inner {
    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.lifetime.cancel();
        let cancelled = self.promises.cancel_all();
        if let Some(session) = self.session.lock().take() {
            session.abort();
        }
        *self.state.lock() = ConnectionState::Disconnected;
        debug!(cancelled, "Connection disposed");
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Message connection over a stream socket
///
/// Cheap to clone; clones share the same socket and pipelines. The
/// connection is disposed when the last clone drops.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Connection with default pools and configuration
    pub fn new<H: MessageHandler>(handler: H) -> Self {
        Self::builder(handler).build()
    }

    pub fn builder<H: MessageHandler>(handler: H) -> ConnectionBuilder {
        ConnectionBuilder {
            handler: Arc::new(handler),
            pools: None,
            config: ConnectionConfig::default(),
            on_connected: None,
        }
    }

    /// Connect using the configured timeout
    pub async fn connect_to(&self, host: &str, port: u16) -> Result<()> {
        let timeout = self.inner.config.connect_timeout();
        self.connect(host, port, timeout).await
    }

    /// Connect to `host:port` and start the pipelines
    ///
    /// `host` may be an IP literal or a resolvable name; the first IPv4
    /// address wins, else the first address. Only an unconnected connection
    /// may connect.
    pub async fn connect(&self, host: &str, port: u16, timeout: Duration) -> Result<()> {
        if host.trim().is_empty() {
            return Err(TransportError::invalid_argument("host", "must not be empty"));
        }
        if port == 0 {
            return Err(TransportError::invalid_argument("port", "must be positive"));
        }
        self.ensure_live()?;
        {
            let mut state = self.inner.state.lock();
            if *state != ConnectionState::Unconnected {
                return Err(TransportError::invalid_state("connect", *state));
            }
            *state = ConnectionState::Connecting;
        }

        let result = self.establish(host, port, timeout).await;
        if result.is_err() {
            let mut state = self.inner.state.lock();
            if *state == ConnectionState::Connecting {
                *state = ConnectionState::Unconnected;
            }
        }
        result
    }

    async fn establish(&self, host: &str, port: u16, timeout: Duration) -> Result<()> {
        let endpoint = resolve(host, port).await?;

        let socket = Arc::new(TcpSocket::new());
        socket
            .set_no_delay(self.inner.config.no_delay)
            .map_err(|e| TransportError::cannot_connect(host, port, e.to_string()))?;

        let status = {
            let mut op = self.inner.pools.take_op();
            match tokio::time::timeout(timeout, socket.connect(&mut op, endpoint)).await {
                Ok(status) => status,
                Err(_) => {
                    socket.close();
                    return Err(TransportError::cannot_connect(
                        host,
                        port,
                        format!("timed out after {:?}", timeout),
                    ));
                }
            }
        };
        if !status.is_success() {
            return Err(TransportError::cannot_connect(host, port, status.to_string()));
        }

        self.set_socket(socket)?;
        info!(host, port, peer = %endpoint, "Connected");
        Ok(())
    }

    /// Adopt a connected socket and start both pipelines
    ///
    /// Only an unconnected connection (or one mid-connect) accepts a socket;
    /// a disconnected connection stays disconnected.
    pub fn set_socket(&self, socket: Arc<dyn Socket>) -> Result<()> {
        self.ensure_live()?;
        let inner = &self.inner;
        {
            let state = *inner.state.lock();
            if !matches!(state, ConnectionState::Unconnected | ConnectionState::Connecting) {
                socket.close();
                return Err(TransportError::invalid_state("adopt a socket for", state));
            }
        }

        let token = inner.lifetime.child_token();
        let inbound = InboundPipeline::new(
            Arc::clone(&socket),
            inner.pools.clone(),
            Arc::clone(&inner.promises),
            self.dispatcher(),
            Arc::clone(&inner.metrics),
            token.clone(),
        );
        let outbound = OutboundPipeline::new(
            Arc::clone(&socket),
            inner.pools.clone(),
            Arc::clone(&inner.metrics),
            token.clone(),
        );

        let session = Session {
            socket,
            inbound: Arc::clone(&inbound),
            outbound,
            token,
        };
        if let Some(previous) = inner.session.lock().replace(session) {
            debug!("Replacing previous socket");
            previous.abort();
        }

        inbound.start();
        *inner.state.lock() = ConnectionState::Connected;

        if let Some(callback) = &inner.on_connected {
            callback(&self.context());
        }
        Ok(())
    }

    fn dispatcher(&self) -> Dispatch {
        let handler = Arc::clone(&self.inner.handler);
        let context = self.context();
        Arc::new(move |message| {
            let handler = Arc::clone(&handler);
            let context = context.clone();
            tokio::spawn(async move {
                handler.on_message(context, message).await;
            });
        })
    }

    /// Flush queued messages, then close the socket gracefully
    ///
    /// No-op unless connected. Pending responses are cancelled.
    pub async fn disconnect(&self) -> Result<()> {
        let session = {
            let mut state = self.inner.state.lock();
            if *state != ConnectionState::Connected {
                return Ok(());
            }
            *state = ConnectionState::Disconnected;
            self.inner.session.lock().take()
        };
        let Some(session) = session else {
            return Ok(());
        };

        session.outbound.stop(true).await;

        let status = {
            let mut op = self.inner.pools.take_op();
            session.socket.disconnect(&mut op).await
        };
        if !status.is_success() {
            debug!(%status, "Socket disconnect reported failure");
        }

        session.inbound.stop().await;
        session.token.cancel();
        self.inner.promises.cancel_all();

        info!(peer = ?session.socket.remote_addr(), "Disconnected");
        Ok(())
    }

    /// Queue `message` for sending; returns once queued, not once sent
    pub fn send_message(&self, message: Message) -> Result<()> {
        self.ensure_live()?;
        let outbound = self
            .inner
            .session
            .lock()
            .as_ref()
            .map(|session| Arc::clone(&session.outbound))
            .ok_or(TransportError::NotConnected)?;

        if outbound.enqueue(message) {
            Ok(())
        } else {
            Err(TransportError::QueueClosed)
        }
    }

    /// Register interest in the response carrying `correlation`
    ///
    /// The returned handle resolves as cancelled if the connection is
    /// disposed first.
    pub fn receive_message(&self, correlation: Correlation) -> Result<PendingResponse> {
        self.ensure_live()?;
        self.inner
            .promises
            .register(correlation, self.inner.lifetime.clone())
    }

    /// Send `message` and wait for the response with the same correlation
    pub async fn send_and_await_response(&self, message: Message) -> Result<Message> {
        let pending = self.receive_message(message.correlation())?;
        self.send_message(message)?;
        pending.wait().await
    }

    /// Like [`send_and_await_response`](Self::send_and_await_response), but
    /// cancels the wait once `timeout` elapses
    pub async fn send_and_await_response_timeout(
        &self,
        message: Message,
        timeout: Duration,
    ) -> Result<Message> {
        self.ensure_live()?;
        let deadline = self.inner.lifetime.child_token();
        let pending = self
            .inner
            .promises
            .register(message.correlation(), deadline.clone())?;
        self.send_message(message)?;

        let wait = pending.wait();
        tokio::pin!(wait);
        tokio::select! {
            result = &mut wait => result,
            _ = tokio::time::sleep(timeout) => {
                deadline.cancel();
                wait.await
            }
        }
    }

    /// Cancel the lifetime token, cancel pending responses and close the socket
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Current state; a connection whose receive loop has ended reads as
    /// disconnected
    pub fn state(&self) -> ConnectionState {
        let state = *self.inner.state.lock();
        if state != ConnectionState::Connected {
            return state;
        }
        match self.inner.session.lock().as_ref() {
            Some(session) if !session.inbound.is_stopped() => ConnectionState::Connected,
            _ => ConnectionState::Disconnected,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.inner
            .session
            .lock()
            .as_ref()
            .and_then(|session| session.socket.remote_addr())
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Responses still awaited
    pub fn pending_responses(&self) -> usize {
        self.inner.promises.len()
    }

    pub fn pools(&self) -> &Pools {
        &self.inner.pools
    }

    /// Handle given to message handlers and callbacks
    pub fn context(&self) -> ConnectionContext {
        ConnectionContext {
            inner: Arc::downgrade(&self.inner),
        }
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(TransportError::Disposed {
                object: "Connection",
            });
        }
        Ok(())
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .field("remote", &self.remote_addr())
            .field("pending_responses", &self.pending_responses())
            .finish()
    }
}

/// Resolve `host`, preferring the first IPv4 address
async fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| TransportError::cannot_connect(host, port, e.to_string()))?
        .collect();
    addrs
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| TransportError::cannot_connect(host, port, "host resolved to no addresses"))
}

/// Builder for [`Connection`]
pub struct ConnectionBuilder {
    handler: Arc<dyn MessageHandler>,
    pools: Option<Pools>,
    config: ConnectionConfig,
    on_connected: Option<ConnectedCallback>,
}

impl ConnectionBuilder {
    /// Share pools with other connections
    pub fn pools(mut self, pools: Pools) -> Self {
        self.pools = Some(pools);
        self
    }

    pub fn config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Called each time a socket is adopted
    pub fn on_connected<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ConnectionContext) + Send + Sync + 'static,
    {
        self.on_connected = Some(Arc::new(callback));
        self
    }

    pub fn build(self) -> Connection {
        Connection {
            inner: Arc::new(Inner {
                handler: self.handler,
                pools: self.pools.unwrap_or_default(),
                config: self.config,
                on_connected: self.on_connected,
                state: Mutex::new(ConnectionState::Unconnected),
                session: Mutex::new(None),
                promises: PromiseTable::new(),
                metrics: Arc::new(ConnectionMetrics::new()),
                lifetime: CancellationToken::new(),
                disposed: AtomicBool::new(false),
            }),
        }
    }
}

/// Weak handle to a connection, passed to handlers
///
/// Does not keep the connection alive.
#[derive(Clone)]
pub struct ConnectionContext {
    inner: Weak<Inner>,
}

impl ConnectionContext {
    /// The connection, if it still exists
    pub fn connection(&self) -> Option<Connection> {
        self.inner.upgrade().map(|inner| Connection { inner })
    }

    pub fn send(&self, message: Message) -> Result<()> {
        match self.connection() {
            Some(connection) => connection.send_message(message),
            None => {
                warn!("Send on a dropped connection");
                Err(TransportError::Disposed {
                    object: "Connection",
                })
            }
        }
    }

    /// Send a response carrying the request's correlation id
    pub fn reply(&self, request: &Message, op_code: u32, content: impl Into<String>) -> Result<()> {
        self.send(Message::response_to(request, op_code, content))
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.connection().and_then(|connection| connection.remote_addr())
    }
}

impl fmt::Debug for ConnectionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionContext")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

//! # Server
//!
//! Accepts clients on a listening socket and hands each one to a fresh
//! [`Connection`] built by the caller's factory.
//!
//! ## Accept loop
//!
//! - reset-type failures: skipped, keep accepting
//! - aborted operation (listening socket closed): stop the server and exit
//! - anything else: logged, keep accepting
//!
//! Live clients are kept in a concurrent map keyed by an accept sequence
//! number.

use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::error::{Result, TransportError};
use crate::pool::Pools;
use crate::socket::{Socket, SocketStatus, TcpSocket};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type ConnectionFactory = Box<dyn Fn() -> Connection + Send + Sync>;

struct Shared {
    factory: ConnectionFactory,
    config: ServerConfig,
    pools: Pools,
    clients: DashMap<u64, Connection>,
    next_client: AtomicU64,
    cancel: CancellationToken,
}

/// TCP server materializing a [`Connection`] per accepted client
pub struct Server {
    shared: Arc<Shared>,
    listener: Mutex<Option<Arc<TcpSocket>>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    listening: AtomicBool,
    disposed: AtomicBool,
}

impl Server {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Connection + Send + Sync + 'static,
    {
        Self::with_config(factory, ServerConfig::default())
    }

    pub fn with_config<F>(factory: F, config: ServerConfig) -> Self
    where
        F: Fn() -> Connection + Send + Sync + 'static,
    {
        Self::with_pools(factory, config, Pools::default())
    }

    /// Server whose accept operations borrow from `pools`
    pub fn with_pools<F>(factory: F, config: ServerConfig, pools: Pools) -> Self
    where
        F: Fn() -> Connection + Send + Sync + 'static,
    {
        Self {
            shared: Arc::new(Shared {
                factory: Box::new(factory),
                config,
                pools,
                clients: DashMap::new(),
                next_client: AtomicU64::new(0),
                cancel: CancellationToken::new(),
            }),
            listener: Mutex::new(None),
            accept_task: Mutex::new(None),
            listening: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }
    }

    /// Bind `endpoint`, listen and start accepting
    ///
    /// Port 0 binds an ephemeral port. Returns the bound local address.
    pub async fn listen(&self, endpoint: SocketAddr) -> Result<SocketAddr> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(TransportError::Disposed { object: "Server" });
        }
        if self
            .listening
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(TransportError::AlreadyListening);
        }

        let socket = Arc::new(TcpSocket::new());
        let bound = socket
            .set_no_delay(self.shared.config.no_delay)
            .and_then(|_| socket.bind(endpoint))
            .and_then(|_| socket.listen(self.shared.config.backlog));
        if let Err(e) = bound {
            self.listening.store(false, Ordering::Release);
            socket.close();
            return Err(TransportError::io(format!("Failed to listen on {}", endpoint), e));
        }

        let local = socket.local_addr().unwrap_or(endpoint);
        *self.listener.lock() = Some(Arc::clone(&socket));

        let shared = Arc::clone(&self.shared);
        *self.accept_task.lock() = Some(tokio::spawn(accept_loop(shared, socket)));

        info!(addr = %local, backlog = self.shared.config.backlog, "Server listening");
        Ok(local)
    }

    /// Stop accepting, close the listener and dispose every client
    ///
    /// Idempotent.
    pub async fn stop(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.shared.cancel.cancel();
        if let Some(listener) = self.listener.lock().take() {
            listener.close();
        }

        let task = self.accept_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Accept loop ended abnormally");
            }
        }

        let clients = self.shared.clients.len();
        for entry in self.shared.clients.iter() {
            entry.value().dispose();
        }
        self.shared.clients.clear();
        self.listening.store(false, Ordering::Release);

        info!(clients, "Server stopped");
    }

    /// Snapshot of live clients
    pub fn clients(&self) -> Vec<Connection> {
        self.shared
            .clients
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn client_count(&self) -> usize {
        self.shared.clients.len()
    }

    /// Drop clients that are no longer connected; returns how many
    pub fn prune(&self) -> usize {
        let before = self.shared.clients.len();
        self.shared
            .clients
            .retain(|_, connection| connection.is_connected());
        before.saturating_sub(self.shared.clients.len())
    }

    /// True while the accept loop runs
    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Acquire) && !self.shared.cancel.is_cancelled()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener
            .lock()
            .as_ref()
            .and_then(|listener| listener.local_addr())
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
        if let Some(listener) = self.listener.get_mut().take() {
            listener.close();
        }
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.local_addr())
            .field("listening", &self.is_listening())
            .field("clients", &self.client_count())
            .finish()
    }
}

async fn accept_loop(shared: Arc<Shared>, listener: Arc<TcpSocket>) {
    loop {
        if shared.cancel.is_cancelled() {
            break;
        }

        let (status, accepted) = {
            let mut op = shared.pools.take_op();
            let status = listener.accept(&mut op).await;
            (status, op.take_accepted())
        };

        match status {
            SocketStatus::Success => {
                let Some(socket) = accepted else {
                    continue;
                };
                admit(&shared, socket);
            }
            status if status.is_reset() => {
                debug!(%status, "Client reset before accept completed");
            }
            SocketStatus::OperationAborted => {
                debug!("Accept aborted, stopping accept loop");
                shared.cancel.cancel();
                break;
            }
            status => {
                error!(%status, "Accept failed");
            }
        }
    }
}

fn admit(shared: &Shared, socket: Arc<dyn Socket>) {
    if let Err(e) = socket.set_no_delay(shared.config.no_delay) {
        warn!(error = %e, "Failed to configure accepted socket");
    }
    let peer = socket.remote_addr();

    let connection = (shared.factory)();
    if let Err(e) = connection.set_socket(socket) {
        warn!(peer = ?peer, error = %e, "Connection refused accepted socket");
        return;
    }

    let id = shared.next_client.fetch_add(1, Ordering::Relaxed);
    shared.clients.insert(id, connection);
    debug!(peer = ?peer, client = id, "Accepted client");
}

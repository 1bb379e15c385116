//! Shared helpers for transport integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Once;
use std::time::Duration;
use strand_network::{ConnectionContext, Message, MessageHandler};
use tokio::sync::mpsc;

static TRACING: Once = Once::new();

/// Route transport logs to the test harness; honours `RUST_LOG`
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("strand_network=debug")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Loopback endpoint asking the OS for an ephemeral port
pub fn any_loopback() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 0))
}

/// Loopback address on a port nothing is listening on
pub fn free_loopback_addr() -> SocketAddr {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
}

/// Forwards every unsolicited message to a channel
pub struct Recorder(pub mpsc::UnboundedSender<Message>);

#[async_trait]
impl MessageHandler for Recorder {
    async fn on_message(&self, _ctx: ConnectionContext, message: Message) {
        let _ = self.0.send(message);
    }
}

pub fn recorder() -> (Recorder, mpsc::UnboundedReceiver<Message>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Recorder(tx), rx)
}

/// Replies to every message with the same op code and an upper-cased body
pub struct Shouter;

#[async_trait]
impl MessageHandler for Shouter {
    async fn on_message(&self, ctx: ConnectionContext, message: Message) {
        let _ = ctx.reply(&message, message.op_code(), message.content().to_uppercase());
    }
}

/// Handler for connections that never expect unsolicited traffic
pub struct Ignore;

#[async_trait]
impl MessageHandler for Ignore {
    async fn on_message(&self, _ctx: ConnectionContext, _message: Message) {}
}

pub async fn recv(rx: &mut mpsc::UnboundedReceiver<Message>) -> Message {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a message")
        .expect("handler channel closed")
}

/// Poll `condition` until it holds or five seconds pass
pub async fn eventually<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

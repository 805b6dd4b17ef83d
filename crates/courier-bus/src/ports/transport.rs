//! Transport port
//!
//! A publish/subscribe transport with Redis-like semantics: a connection that
//! subscribes receives every message published on that topic by any
//! connection, including its own.

use crate::error::TransportError;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Something delivered on a subscription stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Raw payload published on `topic`.
    Message { topic: String, payload: Vec<u8> },

    /// Asynchronous transport fault (connection drop, protocol error).
    Error(TransportError),
}

/// Acknowledgment of a subscribe request.
#[derive(Debug)]
pub struct SubscribeAck {
    /// Active subscriptions held by the connection after this call.
    pub active_subscriptions: usize,

    /// Inbound events for the subscription. Ends when the connection closes.
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Factory for transport connections.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a new connection.
    async fn connect(&self) -> Result<Box<dyn TransportConnection>, TransportError>;
}

/// A single transport connection.
#[async_trait]
pub trait TransportConnection: Send + Sync {
    /// Subscribe to `topic`.
    async fn subscribe(&self, topic: &str) -> Result<SubscribeAck, TransportError>;

    /// Publish `payload` on `topic`.
    ///
    /// # Returns
    ///
    /// The number of subscriptions the payload was delivered to.
    async fn publish(&self, topic: &str, payload: &str) -> Result<usize, TransportError>;

    /// Close the connection. Idempotent.
    async fn disconnect(&self);
}

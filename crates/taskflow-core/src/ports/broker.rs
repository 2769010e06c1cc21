//! Broker port - 配送キュー（durable priority queue）
//!
//! The broker only carries opaque message bodies. Task state is never stored
//! here; a delivery is a hint that the referenced task may be runnable.

use async_trait::async_trait;

use crate::domain::BrokerError;

/// Queue declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueTopology {
    pub name: String,
    /// Queue definition survives a broker restart.
    pub durable: bool,
    /// Highest priority the queue orders by; larger values are clamped.
    pub max_priority: u8,
}

impl QueueTopology {
    pub fn durable(name: impl Into<String>, max_priority: u8) -> Self {
        Self {
            name: name.into(),
            durable: true,
            max_priority,
        }
    }
}

/// Per-message attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageProperties {
    pub priority: u8,
    /// Message survives a broker restart (when its queue is durable).
    pub persistent: bool,
}

impl MessageProperties {
    pub fn persistent(priority: u8) -> Self {
        Self {
            priority,
            persistent: true,
        }
    }
}

/// A message handed to a consumer.
/// The consumer owns it and must either `ack` or `nack`.
#[async_trait]
pub trait Delivery: Send {
    /// Broker-assigned tag, unique per broker.
    fn tag(&self) -> u64;

    fn body(&self) -> &[u8];

    fn properties(&self) -> MessageProperties;

    /// Has this message been delivered before?
    fn redelivered(&self) -> bool;

    /// Done with it; the broker forgets the message.
    async fn ack(self: Box<Self>) -> Result<(), BrokerError>;

    /// Reject it. `requeue = true` puts it back for another delivery.
    async fn nack(self: Box<Self>, requeue: bool) -> Result<(), BrokerError>;
}

/// A live subscription to one queue.
#[async_trait]
pub trait Consumer: Send {
    /// Wait for the next delivery.
    ///
    /// - `Ok(Some(_))`: a delivery (counts against the prefetch bound until acked/nacked)
    /// - `Ok(None)`: the consumer was closed cleanly
    /// - `Err(_)`: the connection was lost; reconnect
    async fn next(&mut self) -> Result<Option<Box<dyn Delivery>>, BrokerError>;
}

/// Broker は publish / consume を提供
#[async_trait]
pub trait Broker: Send + Sync {
    /// Declare a queue. Idempotent for identical arguments.
    async fn declare_queue(&self, topology: &QueueTopology) -> Result<(), BrokerError>;

    async fn publish(
        &self,
        queue: &str,
        body: Vec<u8>,
        properties: MessageProperties,
    ) -> Result<(), BrokerError>;

    /// Subscribe to `queue` with at most `prefetch` unacknowledged deliveries.
    async fn consume(&self, queue: &str, prefetch: u16) -> Result<Box<dyn Consumer>, BrokerError>;
}

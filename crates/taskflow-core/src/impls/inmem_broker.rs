//! InMemoryBroker - 開発用の durable priority queue
//!
//! # 学習ポイント
//! - BinaryHeap による priority 順の配送（同じ priority は到着順）
//! - Semaphore による prefetch 制限（ack/nack まで permit を保持）
//! - Notify + generation による切断の通知
//!
//! Broker semantics mirrored here:
//! - deliveries not acked when the connection drops go back to the queue
//!   marked `redelivered`
//! - `restart()` keeps durable queues and their persistent messages only

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::domain::BrokerError;
use crate::ports::{Broker, Consumer, Delivery, MessageProperties, QueueTopology};

/// A message waiting in (or taken from) a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
struct QueuedMessage {
    /// Arrival order, used to break priority ties.
    seq: u64,
    body: Vec<u8>,
    properties: MessageProperties,
    redelivered: bool,
}

impl PartialOrd for QueuedMessage {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedMessage {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Max-heap: higher priority first, then earlier arrival first.
        self.properties
            .priority
            .cmp(&other.properties.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct QueueState {
    topology: QueueTopology,
    ready: BinaryHeap<QueuedMessage>,
}

/// Delivered, not yet acked/nacked.
struct Unacked {
    queue: String,
    message: QueuedMessage,
}

struct BrokerState {
    online: bool,

    /// Bumped on every connection drop; consumers from an older generation are dead.
    generation: u64,

    queues: HashMap<String, QueueState>,
    unacked: HashMap<u64, Unacked>,

    next_seq: u64,
    next_tag: u64,
}

impl BrokerState {
    fn new() -> Self {
        Self {
            online: true,
            generation: 0,
            queues: HashMap::new(),
            unacked: HashMap::new(),
            next_seq: 1,
            next_tag: 1,
        }
    }

    fn ensure_online(&self) -> Result<(), BrokerError> {
        if self.online {
            Ok(())
        } else {
            Err(BrokerError::Unavailable("broker is offline".to_string()))
        }
    }

    fn allocate_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn allocate_tag(&mut self) -> u64 {
        let tag = self.next_tag;
        self.next_tag += 1;
        tag
    }

    /// Put a message back into its queue (if the queue still exists).
    fn requeue(&mut self, queue: &str, mut message: QueuedMessage) {
        message.redelivered = true;
        if let Some(q) = self.queues.get_mut(queue) {
            q.ready.push(message);
        }
    }

    /// Drop all live consumers: unacked deliveries go back to their queues.
    fn drop_connections(&mut self) {
        self.generation += 1;
        let unacked: Vec<Unacked> = self.unacked.drain().map(|(_, u)| u).collect();
        for u in unacked {
            self.requeue(&u.queue, u.message);
        }
    }
}

struct Shared {
    state: Mutex<BrokerState>,
    /// Woken on publish / requeue / connection drop.
    notify: Notify,
}

/// In-memory broker.
///
/// # 使用例
/// ```ignore
/// let broker = InMemoryBroker::new();
/// broker.declare_queue(&QueueTopology::durable("tasks_queue", 10)).await?;
/// broker.publish("tasks_queue", body, MessageProperties::persistent(3)).await?;
/// let mut consumer = broker.consume("tasks_queue", 1).await?;
/// ```
#[derive(Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BrokerState::new()),
                notify: Notify::new(),
            }),
        }
    }

    /// Simulate the broker becoming unreachable (`false`) or reachable again.
    ///
    /// Going offline drops every consumer; their unacked deliveries are requeued.
    pub async fn set_online(&self, online: bool) {
        {
            let mut state = self.shared.state.lock().await;
            if state.online == online {
                return;
            }
            state.online = online;
            if !online {
                state.drop_connections();
            }
        }
        warn!(online, "in-memory broker availability changed");
        self.shared.notify.notify_waiters();
    }

    /// Simulate a broker restart.
    ///
    /// Non-durable queues disappear; durable queues keep persistent messages only.
    pub async fn restart(&self) {
        {
            let mut state = self.shared.state.lock().await;
            state.drop_connections();
            state.queues.retain(|_, q| q.topology.durable);
            for q in state.queues.values_mut() {
                let kept: BinaryHeap<QueuedMessage> = q
                    .ready
                    .drain()
                    .filter(|m| m.properties.persistent)
                    .collect();
                q.ready = kept;
            }
        }
        debug!("in-memory broker restarted");
        self.shared.notify.notify_waiters();
    }

    /// Messages waiting in `queue` (not counting unacked deliveries).
    pub async fn queue_depth(&self, queue: &str) -> usize {
        let state = self.shared.state.lock().await;
        state.queues.get(queue).map(|q| q.ready.len()).unwrap_or(0)
    }

    /// Deliveries handed out and not yet acked/nacked.
    pub async fn unacked_count(&self) -> usize {
        let state = self.shared.state.lock().await;
        state.unacked.len()
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn declare_queue(&self, topology: &QueueTopology) -> Result<(), BrokerError> {
        let mut state = self.shared.state.lock().await;
        state.ensure_online()?;
        match state.queues.get(&topology.name) {
            Some(existing) if existing.topology != *topology => Err(BrokerError::TopologyMismatch {
                queue: topology.name.clone(),
                reason: format!("{:?} != {:?}", existing.topology, topology),
            }),
            Some(_) => Ok(()),
            None => {
                state.queues.insert(
                    topology.name.clone(),
                    QueueState {
                        topology: topology.clone(),
                        ready: BinaryHeap::new(),
                    },
                );
                Ok(())
            }
        }
    }

    async fn publish(
        &self,
        queue: &str,
        body: Vec<u8>,
        properties: MessageProperties,
    ) -> Result<(), BrokerError> {
        {
            let mut state = self.shared.state.lock().await;
            state.ensure_online()?;
            let seq = state.allocate_seq();
            let q = state
                .queues
                .get_mut(queue)
                .ok_or_else(|| BrokerError::QueueNotDeclared(queue.to_string()))?;
            let properties = MessageProperties {
                priority: properties.priority.min(q.topology.max_priority),
                ..properties
            };
            q.ready.push(QueuedMessage {
                seq,
                body,
                properties,
                redelivered: false,
            });
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }

    async fn consume(&self, queue: &str, prefetch: u16) -> Result<Box<dyn Consumer>, BrokerError> {
        let state = self.shared.state.lock().await;
        state.ensure_online()?;
        if !state.queues.contains_key(queue) {
            return Err(BrokerError::QueueNotDeclared(queue.to_string()));
        }
        Ok(Box::new(InMemoryConsumer {
            queue: queue.to_string(),
            generation: state.generation,
            permits: Arc::new(Semaphore::new(usize::from(prefetch.max(1)))),
            shared: Arc::clone(&self.shared),
        }))
    }
}

struct InMemoryConsumer {
    queue: String,
    generation: u64,
    /// One permit per allowed in-flight delivery.
    permits: Arc<Semaphore>,
    shared: Arc<Shared>,
}

impl InMemoryConsumer {
    fn is_alive(&self, state: &BrokerState) -> bool {
        state.online && state.generation == self.generation && state.queues.contains_key(&self.queue)
    }

    /// Wait for a free prefetch slot, bailing out if the connection drops meanwhile.
    async fn acquire_permit(&self) -> Result<OwnedSemaphorePermit, BrokerError> {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if !self.is_alive(&*self.shared.state.lock().await) {
                return Err(BrokerError::ConnectionLost);
            }

            tokio::select! {
                permit = Arc::clone(&self.permits).acquire_owned() => {
                    return permit.map_err(|_| BrokerError::ConnectionLost);
                }
                _ = &mut notified => {}
            }
        }
    }
}

#[async_trait]
impl Consumer for InMemoryConsumer {
    async fn next(&mut self) -> Result<Option<Box<dyn Delivery>>, BrokerError> {
        let permit = self.acquire_permit().await?;

        loop {
            // Register for wakeups before looking, so a publish in between is not missed.
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.shared.state.lock().await;
                if !self.is_alive(&state) {
                    return Err(BrokerError::ConnectionLost);
                }
                let message = state
                    .queues
                    .get_mut(&self.queue)
                    .and_then(|q| q.ready.pop());
                if let Some(message) = message {
                    let tag = state.allocate_tag();
                    state.unacked.insert(
                        tag,
                        Unacked {
                            queue: self.queue.clone(),
                            message: message.clone(),
                        },
                    );
                    return Ok(Some(Box::new(InMemoryDelivery {
                        tag,
                        message,
                        shared: Arc::clone(&self.shared),
                        _permit: permit,
                    })));
                }
            }

            notified.await;
        }
    }
}

struct InMemoryDelivery {
    tag: u64,
    message: QueuedMessage,
    shared: Arc<Shared>,
    /// Released when the delivery is settled (or dropped).
    _permit: OwnedSemaphorePermit,
}

#[async_trait]
impl Delivery for InMemoryDelivery {
    fn tag(&self) -> u64 {
        self.tag
    }

    fn body(&self) -> &[u8] {
        &self.message.body
    }

    fn properties(&self) -> MessageProperties {
        self.message.properties
    }

    fn redelivered(&self) -> bool {
        self.message.redelivered
    }

    async fn ack(self: Box<Self>) -> Result<(), BrokerError> {
        let mut state = self.shared.state.lock().await;
        state
            .unacked
            .remove(&self.tag)
            .map(|_| ())
            .ok_or(BrokerError::UnknownDelivery(self.tag))
    }

    async fn nack(self: Box<Self>, requeue: bool) -> Result<(), BrokerError> {
        {
            let mut state = self.shared.state.lock().await;
            let unacked = state
                .unacked
                .remove(&self.tag)
                .ok_or(BrokerError::UnknownDelivery(self.tag))?;
            if !requeue {
                return Ok(());
            }
            state.requeue(&unacked.queue, unacked.message);
        }
        self.shared.notify.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const QUEUE: &str = "tasks_queue";

    async fn broker_with_queue() -> InMemoryBroker {
        let broker = InMemoryBroker::new();
        broker
            .declare_queue(&QueueTopology::durable(QUEUE, 10))
            .await
            .unwrap();
        broker
    }

    async fn publish(broker: &InMemoryBroker, body: &str, priority: u8) {
        broker
            .publish(QUEUE, body.as_bytes().to_vec(), MessageProperties::persistent(priority))
            .await
            .unwrap();
    }

    async fn next(consumer: &mut Box<dyn Consumer>) -> Box<dyn Delivery> {
        tokio::time::timeout(Duration::from_secs(1), consumer.next())
            .await
            .expect("delivery in time")
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn higher_priority_is_delivered_first() {
        let broker = broker_with_queue().await;
        publish(&broker, "low", 1).await;
        publish(&broker, "medium", 2).await;
        publish(&broker, "high", 3).await;

        let mut consumer = broker.consume(QUEUE, 3).await.unwrap();
        let mut bodies = Vec::new();
        for _ in 0..3 {
            let d = next(&mut consumer).await;
            bodies.push(String::from_utf8(d.body().to_vec()).unwrap());
            d.ack().await.unwrap();
        }
        assert_eq!(bodies, vec!["high", "medium", "low"]);
    }

    #[tokio::test]
    async fn equal_priority_keeps_arrival_order() {
        let broker = broker_with_queue().await;
        publish(&broker, "first", 2).await;
        publish(&broker, "second", 2).await;

        let mut consumer = broker.consume(QUEUE, 1).await.unwrap();
        let d = next(&mut consumer).await;
        assert_eq!(d.body(), b"first");
        d.ack().await.unwrap();
        let d = next(&mut consumer).await;
        assert_eq!(d.body(), b"second");
    }

    #[tokio::test]
    async fn priority_above_max_is_clamped() {
        let broker = InMemoryBroker::new();
        broker
            .declare_queue(&QueueTopology::durable(QUEUE, 5))
            .await
            .unwrap();
        publish(&broker, "x", 200).await;

        let mut consumer = broker.consume(QUEUE, 1).await.unwrap();
        let d = next(&mut consumer).await;
        assert_eq!(d.properties().priority, 5);
    }

    #[tokio::test]
    async fn publish_to_undeclared_queue_fails() {
        let broker = InMemoryBroker::new();
        let err = broker
            .publish("nope", vec![], MessageProperties::persistent(1))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::QueueNotDeclared(_)));
    }

    #[tokio::test]
    async fn redeclare_with_other_arguments_fails() {
        let broker = broker_with_queue().await;
        assert!(broker.declare_queue(&QueueTopology::durable(QUEUE, 10)).await.is_ok());
        let err = broker
            .declare_queue(&QueueTopology::durable(QUEUE, 3))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::TopologyMismatch { .. }));
    }

    #[tokio::test]
    async fn prefetch_bounds_unacked_deliveries() {
        let broker = broker_with_queue().await;
        publish(&broker, "a", 1).await;
        publish(&broker, "b", 1).await;

        let mut consumer = broker.consume(QUEUE, 1).await.unwrap();
        let first = next(&mut consumer).await;

        // Second delivery must wait until the first one is settled.
        let blocked = tokio::time::timeout(Duration::from_millis(100), consumer.next()).await;
        assert!(blocked.is_err());
        assert_eq!(broker.unacked_count().await, 1);

        first.ack().await.unwrap();
        let second = next(&mut consumer).await;
        assert_eq!(second.body(), b"b");
    }

    #[tokio::test]
    async fn nack_with_requeue_redelivers() {
        let broker = broker_with_queue().await;
        publish(&broker, "a", 1).await;

        let mut consumer = broker.consume(QUEUE, 1).await.unwrap();
        let d = next(&mut consumer).await;
        assert!(!d.redelivered());
        d.nack(true).await.unwrap();

        let d = next(&mut consumer).await;
        assert!(d.redelivered());
        assert_eq!(d.body(), b"a");
    }

    #[tokio::test]
    async fn nack_without_requeue_drops() {
        let broker = broker_with_queue().await;
        publish(&broker, "poison", 1).await;

        let mut consumer = broker.consume(QUEUE, 1).await.unwrap();
        next(&mut consumer).await.nack(false).await.unwrap();

        assert_eq!(broker.queue_depth(QUEUE).await, 0);
        assert_eq!(broker.unacked_count().await, 0);
    }

    #[tokio::test]
    async fn publish_wakes_waiting_consumer() {
        let broker = broker_with_queue().await;
        let mut consumer = broker.consume(QUEUE, 1).await.unwrap();

        let waiter = tokio::spawn(async move { consumer.next().await.map(|d| d.map(|d| d.tag())) });
        tokio::time::sleep(Duration::from_millis(50)).await;
        publish(&broker, "late", 1).await;

        let tag = waiter.await.unwrap().unwrap();
        assert!(tag.is_some());
    }

    #[tokio::test]
    async fn going_offline_drops_consumers_and_requeues_unacked() {
        let broker = broker_with_queue().await;
        publish(&broker, "a", 1).await;

        let mut consumer = broker.consume(QUEUE, 1).await.unwrap();
        let d = next(&mut consumer).await;

        broker.set_online(false).await;
        assert!(matches!(consumer.next().await, Err(BrokerError::ConnectionLost)));
        assert!(matches!(d.ack().await, Err(BrokerError::UnknownDelivery(_))));
        assert!(matches!(
            broker.consume(QUEUE, 1).await.err(),
            Some(BrokerError::Unavailable(_))
        ));

        broker.set_online(true).await;
        let mut consumer = broker.consume(QUEUE, 1).await.unwrap();
        let d = next(&mut consumer).await;
        assert!(d.redelivered());
        assert_eq!(d.body(), b"a");
    }

    #[tokio::test]
    async fn restart_keeps_durable_queue_and_persistent_messages() {
        let broker = broker_with_queue().await;
        broker
            .declare_queue(&QueueTopology {
                name: "scratch".to_string(),
                durable: false,
                max_priority: 10,
            })
            .await
            .unwrap();
        publish(&broker, "keep", 1).await;
        broker
            .publish(
                QUEUE,
                b"transient".to_vec(),
                MessageProperties {
                    priority: 9,
                    persistent: false,
                },
            )
            .await
            .unwrap();

        broker.restart().await;

        assert_eq!(broker.queue_depth(QUEUE).await, 1);
        assert!(matches!(
            broker.consume("scratch", 1).await.err(),
            Some(BrokerError::QueueNotDeclared(_))
        ));
        let mut consumer = broker.consume(QUEUE, 1).await.unwrap();
        assert_eq!(next(&mut consumer).await.body(), b"keep");
    }
}

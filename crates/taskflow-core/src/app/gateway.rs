//! QueueGateway - task_id を durable priority queue に publish
//!
//! # フロー
//! 1. 初回 publish 前に queue topology を declare（成功したら以降は省略）
//! 2. `{"task_id": ...}` を persistent + priority=weight で publish
//! 3. 失敗はそのまま呼び出し側へ（API が task を FAILED にする）

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OnceCell;
use tracing::{error, info};

use crate::domain::{BrokerError, TaskId, TaskMessage};
use crate::ports::{Broker, MessageProperties, QueueTopology};

pub struct QueueGateway {
    broker: Arc<dyn Broker>,
    topology: QueueTopology,
    timeout: Duration,
    declared: OnceCell<()>,
}

impl QueueGateway {
    pub fn new(broker: Arc<dyn Broker>, topology: QueueTopology, timeout: Duration) -> Self {
        Self {
            broker,
            topology,
            timeout,
            declared: OnceCell::new(),
        }
    }

    pub fn topology(&self) -> &QueueTopology {
        &self.topology
    }

    /// Declare the queue (once per gateway).
    pub async fn declare(&self) -> Result<(), BrokerError> {
        self.declared
            .get_or_try_init(|| async {
                self.broker.declare_queue(&self.topology).await?;
                info!(
                    queue = %self.topology.name,
                    max_priority = self.topology.max_priority,
                    "queue declared"
                );
                Ok::<(), BrokerError>(())
            })
            .await
            .map(|_| ())
    }

    /// Hand `task_id` to the queue with `priority_weight` as message priority.
    pub async fn publish(&self, task_id: TaskId, priority_weight: u8) -> Result<(), BrokerError> {
        let body = TaskMessage::new(task_id).encode()?;
        let properties = MessageProperties::persistent(priority_weight);

        let attempt = async {
            self.declare().await?;
            self.broker
                .publish(&self.topology.name, body, properties)
                .await
        };
        let result = match tokio::time::timeout(self.timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(BrokerError::Timeout(self.timeout)),
        };

        match &result {
            Ok(()) => info!(%task_id, priority = priority_weight, "task published"),
            Err(e) => error!(%task_id, error = %e, "failed to publish task"),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::InMemoryBroker;
    use crate::ports::{Consumer, Delivery};

    fn gateway(broker: &InMemoryBroker) -> QueueGateway {
        QueueGateway::new(
            Arc::new(broker.clone()),
            QueueTopology::durable("tasks_queue", 10),
            Duration::from_secs(10),
        )
    }

    #[tokio::test]
    async fn publish_declares_queue_and_sends_reference() {
        let broker = InMemoryBroker::new();
        let gw = gateway(&broker);
        let id = TaskId::random();

        gw.publish(id, 3).await.unwrap();

        assert_eq!(broker.queue_depth("tasks_queue").await, 1);
        let mut consumer = broker.consume("tasks_queue", 1).await.unwrap();
        let delivery = consumer.next().await.unwrap().unwrap();
        assert_eq!(delivery.properties(), MessageProperties::persistent(3));
        assert_eq!(TaskMessage::decode(delivery.body()).unwrap().task_id, id);
    }

    #[tokio::test]
    async fn publish_failure_propagates() {
        let broker = InMemoryBroker::new();
        let gw = gateway(&broker);
        broker.set_online(false).await;

        let err = gw.publish(TaskId::random(), 1).await.unwrap_err();
        assert!(matches!(err, BrokerError::Unavailable(_)));

        // Declaration is retried once the broker is back.
        broker.set_online(true).await;
        gw.publish(TaskId::random(), 1).await.unwrap();
        assert_eq!(broker.queue_depth("tasks_queue").await, 1);
    }
}

//! WorkerLoop - broker から task_id を受け取り処理する
//!
//! # フロー（1 メッセージ）
//! 1. body を decode（壊れていれば nack requeue=false）
//! 2. datastore から task を読む（無い / PENDING 以外なら ack して捨てる）
//! 3. PENDING → IN_PROGRESS（負けたら ack して捨てる）
//! 4. work を実行 → COMPLETED / FAILED
//! 5. ack は datastore への書き込みが終わってから
//!    （IN_PROGRESS 以降の書き込み失敗は requeue せずにその場で再試行）
//!
//! # 接続
//! - connect = declare_queue + consume（connect_timeout 付き）
//! - 切断・接続失敗は reconnect_backoff 待って再接続
//! - InvalidTarget など再接続で直らないものは run() から Err で返す

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use super::task_store::TaskStore;
use crate::domain::{
    BrokerError, ExecutionError, Task, TaskError, TaskId, TaskMessage, TaskStatus, TaskUpdate,
};
use crate::ports::{Broker, Consumer, Delivery, QueueTopology, WorkExecutor};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub topology: QueueTopology,
    /// Max unacknowledged deliveries per worker.
    pub prefetch: u16,
    /// Wait between reconnect attempts (also before requeueing on a datastore outage).
    pub reconnect_backoff: Duration,
    pub connect_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            topology: QueueTopology::durable("tasks_queue", 10),
            prefetch: 1,
            reconnect_backoff: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Why a delivery was dropped without running anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discard {
    /// No such task in the datastore.
    Missing,
    /// The task is not PENDING (already done, cancelled, or never queued).
    NotPending(TaskStatus),
    /// Another writer moved the task out of PENDING first.
    LostRace,
}

/// Outcome of processing one task reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Processed {
    Completed,
    Failed(String),
    Discarded(Discard),
}

/// What to tell the broker about a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Reject { requeue: bool },
}

impl Disposition {
    /// Settlement for a delivery whose processing returned `err`.
    pub fn for_error(err: &TaskError) -> Self {
        match err {
            // Someone else owns the task now, or it is gone. Nothing to retry.
            TaskError::InvalidTransition(_) | TaskError::NotFound(_) => Disposition::Ack,
            // Datastore trouble: the message is still valid.
            TaskError::Storage(_) => Disposition::Reject { requeue: true },
            _ => Disposition::Reject { requeue: false },
        }
    }
}

/// Processes single deliveries. Cheap to clone; one clone per in-flight delivery.
#[derive(Clone)]
pub struct MessageHandler {
    worker_id: usize,
    store: Arc<TaskStore>,
    executor: Arc<dyn WorkExecutor>,
    retry_delay: Duration,
}

impl MessageHandler {
    pub fn new(
        worker_id: usize,
        store: Arc<TaskStore>,
        executor: Arc<dyn WorkExecutor>,
        retry_delay: Duration,
    ) -> Self {
        Self {
            worker_id,
            store,
            executor,
            retry_delay,
        }
    }

    /// Run `task_id` through PENDING → IN_PROGRESS → COMPLETED/FAILED.
    ///
    /// Safe to call any number of times for the same id: only the caller that
    /// wins PENDING → IN_PROGRESS runs the work.
    pub async fn process(&self, task_id: TaskId) -> Result<Processed, TaskError> {
        let Some(task) = self.store.get(task_id).await? else {
            return Ok(Processed::Discarded(Discard::Missing));
        };
        if task.status != TaskStatus::Pending {
            return Ok(Processed::Discarded(Discard::NotPending(task.status)));
        }

        let running = match self
            .store
            .transition(&task, TaskStatus::InProgress, TaskUpdate::started(self.store.now()))
            .await
        {
            Ok(running) => running,
            Err(TaskError::InvalidTransition(_)) => {
                return Ok(Processed::Discarded(Discard::LostRace));
            }
            Err(e) => return Err(e),
        };
        info!(worker_id = self.worker_id, %task_id, "task started");

        // Spawned so a panicking executor fails the task instead of the worker.
        let executor = Arc::clone(&self.executor);
        let work_on = running.clone();
        let outcome = tokio::spawn(async move { executor.execute(&work_on).await })
            .await
            .unwrap_or_else(|join_err| Err(ExecutionError::new(format!("work aborted: {join_err}"))));

        match outcome {
            Ok(summary) => {
                let update = TaskUpdate::completed(self.store.now(), summary);
                self.finish(&running, TaskStatus::Completed, update).await?;
                info!(worker_id = self.worker_id, %task_id, "task completed");
                Ok(Processed::Completed)
            }
            Err(e) => {
                let update = TaskUpdate::failed(self.store.now(), e.to_string());
                self.finish(&running, TaskStatus::Failed, update).await?;
                warn!(worker_id = self.worker_id, %task_id, error = %e, "task failed");
                Ok(Processed::Failed(e.0))
            }
        }
    }

    /// Record the outcome of a task this worker moved to IN_PROGRESS.
    ///
    /// Storage errors are retried every `retry_delay` until the write lands:
    /// a redelivered reference finds the task IN_PROGRESS and is dropped, so
    /// no one else can finish it.
    async fn finish(&self, running: &Task, to: TaskStatus, update: TaskUpdate) -> Result<Task, TaskError> {
        let mut attempt: u32 = 1;
        loop {
            match self.store.transition(running, to, update.clone()).await {
                Err(TaskError::Storage(e)) => {
                    warn!(
                        worker_id = self.worker_id,
                        task_id = %running.id,
                        %to,
                        attempt,
                        error = %e,
                        "could not record task outcome, retrying"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Decide the disposition for a raw message body.
    pub async fn dispatch(&self, body: &[u8]) -> Disposition {
        let message = match TaskMessage::decode(body) {
            Ok(message) => message,
            Err(e) => {
                error!(
                    worker_id = self.worker_id,
                    error = %e,
                    body = %String::from_utf8_lossy(body),
                    "malformed message, dropping"
                );
                return Disposition::Reject { requeue: false };
            }
        };
        let task_id = message.task_id;
        info!(worker_id = self.worker_id, %task_id, "received task message");

        match self.process(task_id).await {
            Ok(Processed::Discarded(reason)) => {
                info!(worker_id = self.worker_id, %task_id, ?reason, "message discarded");
                Disposition::Ack
            }
            Ok(_) => Disposition::Ack,
            Err(e) => {
                let disposition = Disposition::for_error(&e);
                match disposition {
                    Disposition::Ack => {
                        info!(worker_id = self.worker_id, %task_id, error = %e, "message discarded")
                    }
                    Disposition::Reject { requeue: true } => {
                        warn!(worker_id = self.worker_id, %task_id, error = %e, "processing failed, requeueing");
                        tokio::time::sleep(self.retry_delay).await;
                    }
                    Disposition::Reject { requeue: false } => {
                        error!(worker_id = self.worker_id, %task_id, error = %e, "processing failed, dropping message")
                    }
                }
                disposition
            }
        }
    }

    /// Process and settle one delivery.
    pub async fn handle(&self, delivery: Box<dyn Delivery>) {
        let tag = delivery.tag();
        if delivery.redelivered() {
            debug!(worker_id = self.worker_id, tag, "redelivered message");
        }
        let body = delivery.body().to_vec();
        let disposition = self.dispatch(&body).await;
        let settled = match disposition {
            Disposition::Ack => delivery.ack().await,
            Disposition::Reject { requeue } => delivery.nack(requeue).await,
        };
        if let Err(e) = settled {
            // The broker requeues unsettled deliveries on its own.
            warn!(worker_id = self.worker_id, tag, error = %e, "could not settle delivery");
        }
    }
}

/// Why a consume session ended.
enum SessionEnd {
    Shutdown,
    Disconnected(BrokerError),
}

/// One worker: a broker connection plus its in-flight deliveries.
pub struct WorkerLoop {
    worker_id: usize,
    broker: Arc<dyn Broker>,
    handler: MessageHandler,
    config: WorkerConfig,
}

impl WorkerLoop {
    pub fn new(
        worker_id: usize,
        store: Arc<TaskStore>,
        broker: Arc<dyn Broker>,
        executor: Arc<dyn WorkExecutor>,
        config: WorkerConfig,
    ) -> Self {
        let handler = MessageHandler::new(worker_id, store, executor, config.reconnect_backoff);
        Self {
            worker_id,
            broker,
            handler,
            config,
        }
    }

    pub fn handler(&self) -> &MessageHandler {
        &self.handler
    }

    /// Consume until `shutdown` flips to true (or its sender is dropped).
    ///
    /// Returns `Err` only for broker errors that reconnecting cannot fix.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), BrokerError> {
        let queue = self.config.topology.name.as_str();
        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.connect().await {
                Ok(consumer) => {
                    info!(worker_id = self.worker_id, queue, "consuming");
                    match self.consume(consumer, &mut shutdown).await {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Disconnected(e) => {
                            warn!(worker_id = self.worker_id, queue, error = %e, "broker connection lost")
                        }
                    }
                }
                Err(e) if e.is_fatal() => {
                    error!(worker_id = self.worker_id, queue, error = %e, "cannot connect to broker, giving up");
                    return Err(e);
                }
                Err(e) => {
                    warn!(worker_id = self.worker_id, queue, error = %e, "cannot connect to broker")
                }
            }

            let backoff = self.config.reconnect_backoff;
            info!(worker_id = self.worker_id, ?backoff, "reconnecting after backoff");
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = shutdown_requested(&mut shutdown) => break,
            }
        }
        info!(worker_id = self.worker_id, "worker stopped");
        Ok(())
    }

    async fn connect(&self) -> Result<Box<dyn Consumer>, BrokerError> {
        let attempt = async {
            self.broker.declare_queue(&self.config.topology).await?;
            self.broker
                .consume(&self.config.topology.name, self.config.prefetch)
                .await
        };
        match tokio::time::timeout(self.config.connect_timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(BrokerError::Timeout(self.config.connect_timeout)),
        }
    }

    /// Pull deliveries until the connection drops or shutdown is requested,
    /// then wait for everything in flight to be settled.
    async fn consume(
        &self,
        mut consumer: Box<dyn Consumer>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        let mut in_flight = JoinSet::new();

        let end = loop {
            tokio::select! {
                biased;
                _ = shutdown_requested(shutdown) => break SessionEnd::Shutdown,
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        error!(worker_id = self.worker_id, error = %e, "message handler aborted");
                    }
                }
                next = consumer.next() => match next {
                    Ok(Some(delivery)) => {
                        let handler = self.handler.clone();
                        in_flight.spawn(async move { handler.handle(delivery).await });
                    }
                    Ok(None) => break SessionEnd::Disconnected(BrokerError::ConnectionLost),
                    Err(e) => break SessionEnd::Disconnected(e),
                },
            }
        };

        if !in_flight.is_empty() {
            debug!(worker_id = self.worker_id, in_flight = in_flight.len(), "draining in-flight deliveries");
        }
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                error!(worker_id = self.worker_id, error = %e, "message handler aborted");
            }
        }
        end
    }
}

/// Resolves once shutdown is requested or the sender is gone.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Worker group handle.
/// - `shutdown_tx` を drop するとワーカー全体が止まる
/// - `shutdown_and_join()` で全ワーカーの終了を待てる
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<Result<(), BrokerError>>>,
}

impl WorkerGroup {
    /// Spawn `n` workers sharing the store, broker and executor.
    pub fn spawn(
        n: usize,
        store: Arc<TaskStore>,
        broker: Arc<dyn Broker>,
        executor: Arc<dyn WorkExecutor>,
        config: WorkerConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let worker = WorkerLoop::new(
                worker_id,
                Arc::clone(&store),
                Arc::clone(&broker),
                Arc::clone(&executor),
                config.clone(),
            );
            let rx = shutdown_rx.clone();
            joins.push(tokio::spawn(async move { worker.run(rx).await }));
        }
        info!(workers = n, queue = %config.topology.name, "worker group started");

        Self { shutdown_tx, joins }
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// Stop taking new deliveries. In-flight work still finishes and is settled.
    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown and wait for all workers. Returns the first worker error.
    pub async fn shutdown_and_join(self) -> Result<(), BrokerError> {
        self.request_shutdown();
        let mut first_err = None;
        for join in self.joins {
            match join.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    first_err.get_or_insert(e);
                }
                Err(e) => error!(error = %e, "worker task aborted"),
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

//! AppBuilder - Settings からの構築とワイヤリング
//!
//! # 学習ポイント
//! - 差し替えたい port だけ builder に渡す（残りは Settings から組み立てる）
//! - 起動時検証（broker URL の scheme が未対応なら build() で失敗）

use std::sync::Arc;

use axum::Router;

use crate::api;
use crate::app::{QueueGateway, TaskService, TaskStore, WorkerGroup};
use crate::config::{ConfigError, Settings};
use crate::impls::{InMemoryBroker, InMemoryTaskRepository, SimulatedWork};
use crate::ports::{Broker, TaskRepository, WorkExecutor};

/// # 使用例
/// ```ignore
/// let app = AppBuilder::new(Settings::from_env()?).build()?;
/// let workers = app.spawn_workers(app.settings().workers);
/// api::serve(listener, app.service(), shutdown).await?;
/// ```
pub struct AppBuilder {
    settings: Settings,
    repository: Option<Arc<dyn TaskRepository>>,
    broker: Option<Arc<dyn Broker>>,
    executor: Option<Arc<dyn WorkExecutor>>,
}

impl AppBuilder {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            repository: None,
            broker: None,
            executor: None,
        }
    }

    pub fn repository(mut self, repository: Arc<dyn TaskRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn broker(mut self, broker: Arc<dyn Broker>) -> Self {
        self.broker = Some(broker);
        self
    }

    pub fn executor(mut self, executor: Arc<dyn WorkExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn build(self) -> Result<App, ConfigError> {
        let settings = self.settings;

        let broker = match self.broker {
            Some(broker) => broker,
            None => match settings.broker_url.scheme() {
                "memory" => Arc::new(InMemoryBroker::new()) as Arc<dyn Broker>,
                other => return Err(ConfigError::UnsupportedBroker(other.to_string())),
            },
        };
        let repository = self
            .repository
            .unwrap_or_else(|| Arc::new(InMemoryTaskRepository::new()) as Arc<dyn TaskRepository>);
        let executor = self
            .executor
            .unwrap_or_else(|| Arc::new(SimulatedWork::new(settings.work_unit)) as Arc<dyn WorkExecutor>);

        let store = Arc::new(TaskStore::with_system_clock(repository));
        let gateway = Arc::new(QueueGateway::new(
            Arc::clone(&broker),
            settings.queue_topology(),
            settings.connect_timeout,
        ));
        let service = TaskService::new(Arc::clone(&store), gateway);

        Ok(App {
            settings,
            store,
            broker,
            executor,
            service,
        })
    }
}

/// Wired components sharing one datastore and one broker.
pub struct App {
    settings: Settings,
    store: Arc<TaskStore>,
    broker: Arc<dyn Broker>,
    executor: Arc<dyn WorkExecutor>,
    service: TaskService,
}

impl App {
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<TaskStore> {
        &self.store
    }

    pub fn service(&self) -> TaskService {
        self.service.clone()
    }

    pub fn router(&self) -> Router {
        api::router(self.service())
    }

    /// Start `n` workers consuming the task queue.
    pub fn spawn_workers(&self, n: usize) -> WorkerGroup {
        WorkerGroup::spawn(
            n,
            Arc::clone(&self.store),
            Arc::clone(&self.broker),
            Arc::clone(&self.executor),
            self.settings.worker_config(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_build() {
        let app = AppBuilder::new(Settings::defaults().unwrap()).build().unwrap();
        assert_eq!(app.settings().queue_name, "tasks_queue");
    }

    #[test]
    fn injected_broker_skips_scheme_check() {
        let mut settings = Settings::defaults().unwrap();
        settings.broker_url = "amqp://localhost".parse().unwrap();

        assert!(matches!(
            AppBuilder::new(settings.clone()).build(),
            Err(ConfigError::UnsupportedBroker(_))
        ));
        assert!(
            AppBuilder::new(settings)
                .broker(Arc::new(InMemoryBroker::new()))
                .build()
                .is_ok()
        );
    }
}

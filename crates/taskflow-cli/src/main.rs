use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio::time::{Instant, sleep};
use tracing::{info, warn};

use taskflow_core::api;
use taskflow_core::domain::{TaskPriority, TaskStatus};
use taskflow_core::observability::init_tracing;
use taskflow_core::{AppBuilder, Settings};

#[derive(Debug, Parser)]
#[command(name = "taskflow", version, about = "Asynchronous task processing service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP API and the workers in one process.
    Serve {
        /// Address for the HTTP API.
        #[arg(long, env = "TASKFLOW_BIND_ADDR")]
        bind: Option<SocketAddr>,

        /// Number of worker loops.
        #[arg(long, env = "TASKFLOW_WORKERS")]
        workers: Option<usize>,
    },

    /// Submit a few tasks, process them, and print the final records.
    Demo {
        /// Tasks per priority.
        #[arg(long, default_value_t = 1)]
        per_priority: usize,

        /// Length of one work unit in milliseconds.
        #[arg(long, default_value_t = 100)]
        unit_ms: u64,

        /// Number of worker loops.
        #[arg(long, default_value_t = 1)]
        workers: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let settings = Settings::from_env().context("failed to load settings")?;

    match cli.command {
        Command::Serve { bind, workers } => serve(settings, bind, workers).await,
        Command::Demo {
            per_priority,
            unit_ms,
            workers,
        } => demo(settings, per_priority, unit_ms, workers).await,
    }
}

async fn serve(
    mut settings: Settings,
    bind: Option<SocketAddr>,
    workers: Option<usize>,
) -> Result<()> {
    if let Some(bind) = bind {
        settings.bind_addr = bind;
    }
    if let Some(workers) = workers {
        settings.workers = workers;
    }

    let app = AppBuilder::new(settings)
        .build()
        .context("failed to build application")?;
    let listener = TcpListener::bind(app.settings().bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", app.settings().bind_addr))?;

    let workers = app.spawn_workers(app.settings().workers);

    api::serve(listener, app.service(), async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
        }
        info!("shutdown requested");
    })
    .await
    .context("http server failed")?;

    // API is closed; let workers finish what they hold.
    workers
        .shutdown_and_join()
        .await
        .context("worker stopped with an error")?;
    info!("bye");
    Ok(())
}

async fn demo(settings: Settings, per_priority: usize, unit_ms: u64, workers: usize) -> Result<()> {
    let settings = Settings {
        work_unit: Duration::from_millis(unit_ms),
        ..settings
    };
    let app = AppBuilder::new(settings)
        .build()
        .context("failed to build application")?;
    let service = app.service();

    // Submit before starting workers so the queue orders them by priority.
    let mut ids = Vec::new();
    for priority in TaskPriority::ALL {
        for i in 0..per_priority {
            let task = service
                .submit(format!("{priority}-{i}"), None, priority)
                .await
                .context("failed to submit task")?;
            println!("submitted: id={} priority={} status={}", task.id, task.priority, task.status);
            ids.push(task.id);
        }
    }

    let group = app.spawn_workers(workers);

    let deadline = Instant::now() + Duration::from_secs(60);
    loop {
        let mut done = 0;
        for id in &ids {
            let task = service.get(*id).await.context("failed to read task")?;
            if task.status.is_terminal() {
                done += 1;
            }
        }
        if done == ids.len() {
            break;
        }
        if Instant::now() >= deadline {
            warn!(done, total = ids.len(), "demo timed out waiting for tasks");
            break;
        }
        sleep(Duration::from_millis(50)).await;
    }

    group
        .shutdown_and_join()
        .await
        .context("worker stopped with an error")?;

    for id in &ids {
        let task = service.get(*id).await.context("failed to read task")?;
        println!("{}", serde_json::to_string(&task).context("failed to render task")?);
    }
    let completed = service
        .store()
        .count(Some(TaskStatus::Completed))
        .await
        .context("failed to count tasks")?;
    println!("completed: {completed}/{}", ids.len());
    Ok(())
}

//! Bounded worker pool for command tasks.
//!
//! Each submitted task occupies one permit for its whole retry loop, so at
//! most `max_concurrent` tasks talk to devices at the same time. No
//! ordering is guaranteed between tasks.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use qsmon_core::EngineConfig;

use crate::command::Command;
use crate::task::{CommandTask, TaskReport};

/// Pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    /// Maximum tasks running at once
    pub max_concurrent: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self { max_concurrent: 4 }
    }
}

impl From<&EngineConfig> for WorkerPoolConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            max_concurrent: config.max_concurrent.max(1),
        }
    }
}

/// Runs [`CommandTask`]s on tokio tasks, limited by a semaphore.
#[derive(Clone)]
pub struct WorkerPool {
    config: WorkerPoolConfig,
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig) -> Self {
        let max = config.max_concurrent.max(1);
        Self {
            config: WorkerPoolConfig { max_concurrent: max },
            permits: Arc::new(Semaphore::new(max)),
        }
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }

    /// Number of idle workers.
    pub fn available_workers(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn active_workers(&self) -> usize {
        self.config.max_concurrent - self.available_workers()
    }

    /// Queue `task`; it starts as soon as a worker is free.
    pub fn submit<C: Command + 'static>(&self, task: CommandTask<C>) -> JoinHandle<TaskReport> {
        let permits = self.permits.clone();
        tokio::spawn(async move {
            // The semaphore is never closed.
            let _permit = permits.acquire_owned().await.ok();
            tracing::trace!(task_id = %task.id(), "Worker acquired");
            task.run().await
        })
    }

    /// Run `task` on the pool and wait for its report.
    pub async fn run<C: Command + 'static>(&self, task: CommandTask<C>) -> Option<TaskReport> {
        match self.submit(task).await {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::error!(error = %e, "Worker task failed");
                None
            }
        }
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(WorkerPoolConfig::default())
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("max_concurrent", &self.config.max_concurrent)
            .field("available", &self.available_workers())
            .finish()
    }
}

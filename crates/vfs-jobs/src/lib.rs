//! # vfs-jobs
//!
//! Asynchronous publishing for the offline/online VFS.
//!
//! This crate provides:
//! - A publish queue worker that runs one publish at a time
//! - The [`PublishManager`] facade used to queue publishes and wait for them
//! - Worker events on a broadcast channel, plus [`ServerEvent`]s on an
//!   optional shared [`EventBus`]
//!
//! ## Example
//!
//! ```ignore
//! use vfs_jobs::{PublishBackend, WorkerConfig};
//! use vfs_db::Database;
//!
//! let db = Database::connect("postgres://...").await?;
//! let (manager, worker) = PublishBackend::postgres(&db).start(WorkerConfig::from_env(), 10, None);
//!
//! manager.publish_project(&ctx).await?;
//! manager.wait_while_running().await?;
//!
//! worker.shutdown().await?;
//! ```

pub mod handler;
pub mod manager;
pub mod worker;

use std::sync::Arc;

use vfs_db::{Database, MemoryStore};

// Re-export core types
pub use vfs_core::*;

pub use handler::{JobContext, JobHandler, JobResult, PublishHandler};
pub use manager::PublishManager;
pub use worker::{
    PublishWorker, QueueSignals, WorkerBuilder, WorkerConfig, WorkerEvent, WorkerHandle,
};

/// Default polling interval for the publish worker (milliseconds).
pub const DEFAULT_POLL_INTERVAL_MS: u64 = vfs_core::defaults::JOB_POLL_INTERVAL_MS;

/// The repositories asynchronous publishing runs on.
#[derive(Clone)]
pub struct PublishBackend {
    pub resources: Arc<dyn ResourceRepository>,
    pub publish: Arc<dyn PublishRepository>,
    pub jobs: Arc<dyn PublishJobRepository>,
}

impl PublishBackend {
    pub fn postgres(db: &Database) -> Self {
        Self {
            resources: Arc::new(db.resources.clone()),
            publish: Arc::new(db.publish.clone()),
            jobs: Arc::new(db.publish_jobs.clone()),
        }
    }

    pub fn memory(store: &MemoryStore) -> Self {
        Self {
            resources: Arc::new(store.clone()),
            publish: Arc::new(store.clone()),
            jobs: Arc::new(store.clone()),
        }
    }

    /// Spawn a publish worker and return a manager wired to it.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn start(
        &self,
        config: WorkerConfig,
        history_size: usize,
        event_bus: Option<EventBus>,
    ) -> (PublishManager, WorkerHandle) {
        let signals = QueueSignals::new();
        let handler = PublishHandler::new(self.publish.clone(), history_size);

        let mut worker = PublishWorker::new(self.jobs.clone(), Arc::new(handler), config.clone())
            .with_signals(signals.clone());
        let mut manager = PublishManager::new(self.resources.clone(), self.jobs.clone(), signals)
            .with_poll_interval(config.poll_interval());
        if let Some(bus) = event_bus {
            worker = worker.with_event_bus(bus.clone());
            manager = manager.with_event_bus(bus);
        }

        (manager, worker.start())
    }
}

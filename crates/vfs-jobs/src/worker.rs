//! Publish worker that drains the publish queue.
//!
//! The worker claims one job at a time, so at most one publish is active per
//! worker. Postgres serialises publishes across workers with an advisory
//! lock; the in-memory store serialises them behind its mutex.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, Notify};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use vfs_core::defaults::{
    EVENT_BUS_CAPACITY, JOB_KEEP_FINISHED, JOB_POLL_INTERVAL_MS, JOB_TIMEOUT_SECS,
};
use vfs_core::{
    Error, EventActor, EventBus, EventContext, PublishJob, PublishJobRepository, Result,
    ServerEvent,
};

use crate::handler::{JobContext, JobHandler, JobResult};

/// Enables or disables the worker loop.
pub const ENV_WORKER_ENABLED: &str = "PUBLISH_WORKER_ENABLED";
/// Idle polling interval in milliseconds.
pub const ENV_POLL_INTERVAL_MS: &str = "PUBLISH_POLL_INTERVAL_MS";
/// Per-job timeout in seconds.
pub const ENV_JOB_TIMEOUT_SECS: &str = "PUBLISH_JOB_TIMEOUT_SECS";

/// Configuration for the publish worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Polling interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Maximum time a single publish may take, in seconds.
    pub job_timeout_secs: u64,
    /// Whether to enable job processing.
    pub enabled: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: JOB_POLL_INTERVAL_MS,
            job_timeout_secs: JOB_TIMEOUT_SECS,
            enabled: true,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `PUBLISH_WORKER_ENABLED` | `true` | Enable/disable publish processing |
    /// | `PUBLISH_POLL_INTERVAL_MS` | `500` | Polling interval when the queue is empty |
    /// | `PUBLISH_JOB_TIMEOUT_SECS` | `300` | Timeout of a single publish |
    pub fn from_env() -> Self {
        let enabled = std::env::var(ENV_WORKER_ENABLED)
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let poll_interval_ms = std::env::var(ENV_POLL_INTERVAL_MS)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(JOB_POLL_INTERVAL_MS);

        let job_timeout_secs = std::env::var(ENV_JOB_TIMEOUT_SECS)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .unwrap_or(JOB_TIMEOUT_SECS);

        Self {
            poll_interval_ms,
            job_timeout_secs,
            enabled,
        }
    }

    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn with_job_timeout(mut self, secs: u64) -> Self {
        self.job_timeout_secs = secs;
        self
    }

    /// Enable or disable job processing.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }
}

/// Wake-ups shared between the publish manager and the worker.
#[derive(Clone, Default)]
pub struct QueueSignals {
    queued: Arc<Notify>,
    finished: Arc<Notify>,
}

impl QueueSignals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake the worker; stores a permit if it is busy.
    pub fn notify_queued(&self) {
        self.queued.notify_one();
    }

    /// Wake everyone waiting for a job to finish.
    pub fn notify_finished(&self) {
        self.finished.notify_waiters();
    }

    pub(crate) fn queued(&self) -> &Notify {
        &self.queued
    }

    pub(crate) fn finished(&self) -> &Notify {
        &self.finished
    }
}

/// Event emitted by the publish worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    JobStarted {
        job_id: Uuid,
    },
    JobProgress {
        job_id: Uuid,
        percent: i32,
        message: Option<String>,
    },
    JobCompleted {
        job_id: Uuid,
        history_id: Uuid,
        resource_count: i32,
    },
    JobFailed {
        job_id: Uuid,
        error: String,
    },
    WorkerStarted,
    WorkerStopped,
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
}

impl WorkerHandle {
    /// Signal the worker to shut down gracefully.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send shutdown signal".into()))?;
        Ok(())
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }
}

/// Worker that processes publish jobs from the queue.
pub struct PublishWorker {
    jobs: Arc<dyn PublishJobRepository>,
    handler: Arc<dyn JobHandler>,
    config: WorkerConfig,
    event_tx: broadcast::Sender<WorkerEvent>,
    event_bus: Option<EventBus>,
    signals: QueueSignals,
}

impl PublishWorker {
    pub fn new(
        jobs: Arc<dyn PublishJobRepository>,
        handler: Arc<dyn JobHandler>,
        config: WorkerConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self {
            jobs,
            handler,
            config,
            event_tx,
            event_bus: None,
            signals: QueueSignals::default(),
        }
    }

    /// Publish lifecycle events to the shared event bus as well.
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn with_signals(mut self, signals: QueueSignals) -> Self {
        self.signals = signals;
        self
    }

    pub fn signals(&self) -> QueueSignals {
        self.signals.clone()
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    /// Start the worker and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();

        tokio::spawn(async move {
            self.run(&mut shutdown_rx).await;
        });

        WorkerHandle {
            shutdown_tx,
            event_rx,
        }
    }

    /// Claim and execute one job if any is pending.
    ///
    /// Returns the id of the processed job.
    pub async fn run_once(&self) -> Result<Option<Uuid>> {
        match self.jobs.claim_next().await? {
            Some(job) => {
                let job_id = job.id;
                self.execute_job(job).await;
                Ok(Some(job_id))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self, shutdown_rx), fields(subsystem = "jobs", component = "worker"))]
    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!("Publish worker is disabled, not starting");
            return;
        }

        info!(
            poll_interval_ms = self.config.poll_interval_ms,
            job_timeout_secs = self.config.job_timeout_secs,
            handler = self.handler.name(),
            "Publish worker started"
        );
        let _ = self.event_tx.send(WorkerEvent::WorkerStarted);

        let poll_interval = self.config.poll_interval();
        loop {
            if shutdown_rx.try_recv().is_ok() {
                info!("Publish worker received shutdown signal");
                break;
            }

            match self.jobs.claim_next().await {
                Ok(Some(job)) => {
                    self.execute_job(job).await;
                    // no sleep, the queue may hold more work
                    continue;
                }
                Ok(None) => {}
                Err(e) => error!(error = %e, "Failed to claim publish job"),
            }

            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Publish worker received shutdown signal");
                    break;
                }
                _ = self.signals.queued().notified() => {
                    debug!("Woken by queued publish job");
                }
                _ = sleep(poll_interval) => {}
            }
        }

        let _ = self.event_tx.send(WorkerEvent::WorkerStopped);
        info!("Publish worker stopped");
    }

    fn emit(&self, event: ServerEvent, job: &PublishJob) {
        if let Some(ref bus) = self.event_bus {
            bus.emit_with_context(
                event,
                EventContext {
                    actor: Some(EventActor::user(
                        job.user_id.to_string(),
                        Some(job.user_name.clone()),
                    )),
                    correlation_id: Some(job.id),
                },
            );
        }
    }

    /// Execute a single claimed job and record its outcome.
    async fn execute_job(&self, job: PublishJob) {
        let start = Instant::now();
        let job_id = job.id;

        info!(
            subsystem = "jobs",
            component = "worker",
            op = "execute",
            job_id = %job_id,
            user = %job.user_name,
            "Processing publish job"
        );
        let _ = self.event_tx.send(WorkerEvent::JobStarted { job_id });
        self.emit(ServerEvent::PublishStarted { job_id }, &job);

        let event_tx = self.event_tx.clone();
        let ctx = JobContext::new(job.clone()).with_progress_callback(move |percent, message| {
            let _ = event_tx.send(WorkerEvent::JobProgress {
                job_id,
                percent,
                message: message.map(String::from),
            });
        });

        let timeout = self.config.job_timeout();
        let result = match tokio::time::timeout(timeout, self.handler.execute(ctx)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    job_id = %job_id,
                    "Publish job exceeded timeout of {}s",
                    self.config.job_timeout_secs
                );
                JobResult::Failed(format!(
                    "Publish job exceeded timeout of {}s",
                    self.config.job_timeout_secs
                ))
            }
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            JobResult::Success(report) => {
                let history_id = report.entry.history_id;
                if let Err(e) = self.jobs.complete(job_id, history_id).await {
                    error!(error = %e, job_id = %job_id, "Failed to mark publish job as completed");
                    // never leave a committed job running
                    let _ = self.jobs.fail(job_id, &e.to_string()).await;
                } else {
                    info!(
                        subsystem = "jobs",
                        component = "worker",
                        op = "execute",
                        job_id = %job_id,
                        history_id = %history_id,
                        resource_count = report.entry.resource_count,
                        purged = report.purged,
                        duration_ms,
                        "Publish job completed"
                    );
                    let _ = self.event_tx.send(WorkerEvent::JobCompleted {
                        job_id,
                        history_id,
                        resource_count: report.entry.resource_count,
                    });
                    self.emit(
                        ServerEvent::PublishCompleted {
                            job_id,
                            history_id,
                            resource_count: report.entry.resource_count,
                            duration_ms: Some(duration_ms),
                        },
                        &job,
                    );
                    if report.purged > 0 {
                        self.emit(
                            ServerEvent::HistoryPurged {
                                removed: report.purged,
                            },
                            &job,
                        );
                    }
                }
            }
            JobResult::Failed(error) => {
                if let Err(e) = self.jobs.fail(job_id, &error).await {
                    error!(error = %e, job_id = %job_id, "Failed to mark publish job as failed");
                } else {
                    warn!(
                        subsystem = "jobs",
                        component = "worker",
                        op = "execute",
                        job_id = %job_id,
                        %error,
                        duration_ms,
                        "Publish job failed"
                    );
                    let _ = self.event_tx.send(WorkerEvent::JobFailed {
                        job_id,
                        error: error.clone(),
                    });
                    self.emit(ServerEvent::PublishFailed { job_id, error }, &job);
                }
            }
        }

        match self.jobs.cleanup(JOB_KEEP_FINISHED).await {
            Ok(removed) if removed > 0 => debug!(removed, "Cleaned up finished publish jobs"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Failed to clean up finished publish jobs"),
        }
        self.signals.notify_finished();
    }
}

/// Builder for creating a publish worker.
pub struct WorkerBuilder {
    jobs: Arc<dyn PublishJobRepository>,
    config: WorkerConfig,
    handler: Option<Arc<dyn JobHandler>>,
    event_bus: Option<EventBus>,
    signals: QueueSignals,
}

impl WorkerBuilder {
    pub fn new(jobs: Arc<dyn PublishJobRepository>) -> Self {
        Self {
            jobs,
            config: WorkerConfig::default(),
            handler: None,
            event_bus: None,
            signals: QueueSignals::default(),
        }
    }

    /// Set the worker configuration.
    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_handler<H: JobHandler + 'static>(mut self, handler: H) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn with_signals(mut self, signals: QueueSignals) -> Self {
        self.signals = signals;
        self
    }

    /// Build the worker; a handler is required.
    pub fn build(self) -> Result<PublishWorker> {
        let handler = self
            .handler
            .ok_or_else(|| Error::Config("publish worker needs a job handler".to_string()))?;
        let mut worker =
            PublishWorker::new(self.jobs, handler, self.config).with_signals(self.signals);
        if let Some(bus) = self.event_bus {
            worker = worker.with_event_bus(bus);
        }
        Ok(worker)
    }
}

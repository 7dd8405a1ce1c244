//! Publish manager: the entry point for asynchronous publishing.
//!
//! Callers queue publish jobs here and may block until the queue drains.
//! The jobs themselves run on a [`PublishWorker`](crate::PublishWorker).

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};
use uuid::Uuid;

use vfs_core::defaults::{JOB_POLL_INTERVAL_MS, PAGE_LIMIT};
use vfs_core::{
    Error, EventActor, EventBus, EventContext, Project, PublishJob, PublishJobRepository,
    PublishScope, ResourceRepository, Result, Role, ServerEvent, UserContext,
};

use crate::worker::QueueSignals;

/// Queues publish jobs and waits for them.
#[derive(Clone)]
pub struct PublishManager {
    resources: Arc<dyn ResourceRepository>,
    jobs: Arc<dyn PublishJobRepository>,
    signals: QueueSignals,
    event_bus: Option<EventBus>,
    poll_interval: Duration,
}

impl PublishManager {
    /// `signals` must be shared with the worker draining `jobs`.
    pub fn new(
        resources: Arc<dyn ResourceRepository>,
        jobs: Arc<dyn PublishJobRepository>,
        signals: QueueSignals,
    ) -> Self {
        Self {
            resources,
            jobs,
            signals,
            event_bus: None,
            poll_interval: Duration::from_millis(JOB_POLL_INTERVAL_MS),
        }
    }

    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Re-check interval while waiting, covering workers in other processes.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Queue a publish of the resource at `path`.
    pub async fn publish_resource(&self, ctx: &UserContext, path: &str) -> Result<Uuid> {
        self.publish_resources(ctx, &[path]).await
    }

    /// Queue a publish of the resources at `paths`; folders pull in their changed descendants.
    pub async fn publish_resources<S: AsRef<str>>(
        &self,
        ctx: &UserContext,
        paths: &[S],
    ) -> Result<Uuid> {
        ctx.require_role(Role::Publisher)?;
        if paths.is_empty() {
            return Err(Error::InvalidInput("no resources to publish".to_string()));
        }
        let mut ids = Vec::with_capacity(paths.len());
        for path in paths {
            let resource = self.resources.read(Project::Offline, path.as_ref()).await?;
            ids.push(resource.structure_id);
        }
        self.enqueue(ctx, PublishScope::Resources(ids)).await
    }

    /// Queue a publish of every changed resource.
    pub async fn publish_project(&self, ctx: &UserContext) -> Result<Uuid> {
        ctx.require_role(Role::Publisher)?;
        self.enqueue(ctx, PublishScope::Project).await
    }

    async fn enqueue(&self, ctx: &UserContext, scope: PublishScope) -> Result<Uuid> {
        let job_id = self.jobs.queue(ctx, scope).await?;
        info!(
            subsystem = "jobs",
            component = "manager",
            op = "queue",
            job_id = %job_id,
            user = %ctx.user_name,
            "Publish job queued"
        );
        if let Some(ref bus) = self.event_bus {
            bus.emit_with_context(
                ServerEvent::PublishQueued {
                    job_id,
                    user_name: ctx.user_name.clone(),
                },
                EventContext {
                    actor: Some(EventActor::user(
                        ctx.user_id.to_string(),
                        Some(ctx.user_name.clone()),
                    )),
                    correlation_id: Some(job_id),
                },
            );
        }
        self.signals.notify_queued();
        Ok(job_id)
    }

    pub async fn job(&self, job_id: Uuid) -> Result<Option<PublishJob>> {
        self.jobs.get(job_id).await
    }

    /// Most recent jobs, newest first.
    pub async fn recent_jobs(&self, limit: Option<i64>) -> Result<Vec<PublishJob>> {
        self.jobs.list_recent(limit.unwrap_or(PAGE_LIMIT)).await
    }

    /// Whether any job is pending or running.
    pub async fn is_running(&self) -> Result<bool> {
        Ok(self.jobs.pending_count().await? + self.jobs.running_count().await? > 0)
    }

    /// Block until no publish job is pending or running.
    pub async fn wait_while_running(&self) -> Result<()> {
        loop {
            let finished = self.signals.finished().notified();
            tokio::pin!(finished);
            // register before checking so a completion in between is not lost
            finished.as_mut().enable();

            if !self.is_running().await? {
                debug!(subsystem = "jobs", component = "manager", "Publish queue drained");
                return Ok(());
            }
            let _ = tokio::time::timeout(self.poll_interval, finished).await;
        }
    }

    /// Block until the job has finished and return its final record.
    pub async fn wait_for_job(&self, job_id: Uuid) -> Result<PublishJob> {
        loop {
            let finished = self.signals.finished().notified();
            tokio::pin!(finished);
            finished.as_mut().enable();

            let job = self
                .jobs
                .get(job_id)
                .await?
                .ok_or_else(|| Error::NotFound(format!("publish job {}", job_id)))?;
            if job.status.is_finished() {
                return Ok(job);
            }
            let _ = tokio::time::timeout(self.poll_interval, finished).await;
        }
    }
}

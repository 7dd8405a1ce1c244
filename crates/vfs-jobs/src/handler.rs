//! Job handlers executed by the publish worker.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use vfs_core::{PublishJob, PublishReport, PublishRepository, Role, UserContext};

/// Progress callback type for job handlers.
pub type ProgressCallback = Box<dyn Fn(i32, Option<&str>) + Send + Sync>;

/// Context provided to job handlers.
pub struct JobContext {
    /// The job being processed.
    pub job: PublishJob,
    progress_callback: Option<ProgressCallback>,
}

impl JobContext {
    pub fn new(job: PublishJob) -> Self {
        Self {
            job,
            progress_callback: None,
        }
    }

    /// Set the progress callback.
    pub fn with_progress_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(i32, Option<&str>) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Box::new(callback));
        self
    }

    /// Report progress to the callback.
    pub fn report_progress(&self, percent: i32, message: Option<&str>) {
        if let Some(ref callback) = self.progress_callback {
            callback(percent, message);
        }
    }

    pub fn job_id(&self) -> Uuid {
        self.job.id
    }

    /// The acting user, restored from the queued job.
    ///
    /// The publisher role was checked when the job was queued.
    pub fn user_context(&self) -> UserContext {
        UserContext::new(self.job.user_id, self.job.user_name.clone()).with_role(Role::Publisher)
    }
}

/// Result of job execution.
#[derive(Debug)]
pub enum JobResult {
    /// The publish committed.
    Success(PublishReport),
    /// The publish failed; nothing was committed.
    Failed(String),
}

/// Trait for job handlers.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Execute the job.
    async fn execute(&self, ctx: JobContext) -> JobResult;
}

/// Runs queued publish jobs against a publish repository.
pub struct PublishHandler {
    publish: Arc<dyn PublishRepository>,
    history_size: usize,
}

impl PublishHandler {
    pub fn new(publish: Arc<dyn PublishRepository>, history_size: usize) -> Self {
        Self {
            publish,
            history_size,
        }
    }
}

#[async_trait]
impl JobHandler for PublishHandler {
    fn name(&self) -> &'static str {
        "publish"
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        ctx.report_progress(0, Some("Publishing"));
        let user = ctx.user_context();
        match self
            .publish
            .publish(&user, &ctx.job.scope, self.history_size)
            .await
        {
            Ok(report) => {
                ctx.report_progress(100, Some("Done"));
                JobResult::Success(report)
            }
            Err(e) => JobResult::Failed(e.to_string()),
        }
    }
}

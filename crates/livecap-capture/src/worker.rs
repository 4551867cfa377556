//! Job-queue entry point: turns a capture job into a running supervisor.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use livecap_core::{StreamId, StreamStatus, UniqueId};

use crate::registry::{CaptureRegistry, Registration};

/// Job payload as enqueued by the scheduler.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureJob {
    pub stream_id: StreamId,
    pub unique_id: UniqueId,
}

/// What the queue should do with a performed job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobOutcome {
    /// A new supervisor now owns the stream.
    Started,
    /// A supervisor was already running; nothing new was started.
    Attached,
    /// The stream is not in `capturing`; the job is done.
    Skipped(StreamStatus),
    /// Status could not be read. Re-enqueue after the delay.
    RetryAfter(Duration),
}

impl JobOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Attached => "attached",
            Self::Skipped(_) => "skipped",
            Self::RetryAfter(_) => "retry_after",
        }
    }
}

pub struct CaptureWorker {
    registry: Arc<CaptureRegistry>,
}

impl CaptureWorker {
    pub fn new(registry: Arc<CaptureRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<CaptureRegistry> {
        &self.registry
    }

    pub async fn perform(&self, job: &CaptureJob) -> JobOutcome {
        if self.registry.is_running(&job.stream_id) {
            tracing::debug!(stream_id = %job.stream_id, "capture already running");
            return JobOutcome::Attached;
        }

        let ctx = self.registry.context();
        match ctx.store.get_stream_status(&job.stream_id).await {
            Ok(status) if status.is_capturing() => {}
            Ok(status) => {
                tracing::info!(stream_id = %job.stream_id, status = %status, "stream not capturing, skipping job");
                return JobOutcome::Skipped(status);
            }
            Err(e) => {
                let delay = ctx.policy.startup_retry;
                tracing::warn!(
                    stream_id = %job.stream_id,
                    error = %e,
                    retry_in = ?delay,
                    "stream status unavailable, deferring job"
                );
                return JobOutcome::RetryAfter(delay);
            }
        }

        match self
            .registry
            .start(job.stream_id.clone(), job.unique_id.clone())
        {
            Registration::Started(handle) => {
                tracing::info!(
                    stream_id = %job.stream_id,
                    unique_id = %job.unique_id,
                    supervisor = handle.id(),
                    "capture started"
                );
                JobOutcome::Started
            }
            Registration::Attached(_) => JobOutcome::Attached,
        }
    }
}

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::job::SearchJob;

/// Notification emitted when a search job execution starts.
#[derive(Debug, Clone, Serialize)]
pub struct JobExecutionEvent {
    pub actor: String,
    pub job_id: Uuid,
    pub search_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl JobExecutionEvent {
    pub fn new(actor: impl Into<String>, job: &SearchJob) -> Self {
        Self {
            actor: actor.into(),
            job_id: job.id(),
            search_id: job.search().id.clone(),
            occurred_at: Utc::now(),
        }
    }
}

/// Injected sink for audit/notification events. No process-wide bus; the
/// facade passes events here explicitly.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: JobExecutionEvent);
}

/// Default sink that records events through the tracing pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn publish(&self, event: JobExecutionEvent) {
        info!(
            actor = %event.actor,
            job_id = %event.job_id,
            search_id = event.search_id.as_deref().unwrap_or("<ad hoc>"),
            "search job execution started"
        );
    }
}

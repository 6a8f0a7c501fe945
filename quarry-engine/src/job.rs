use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use uuid::Uuid;

use crate::backend::QueryResult;
use crate::error::EngineError;
use crate::search::{QueryId, Search};

/// Lifecycle state of a search job. `Created` and `Running` are transient;
/// `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobState {
    Created,
    Running,
    Completed,
    Failed,
}

/// Terminal outcome of one query within a job. A failure here never aborts
/// sibling queries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum QueryExecution {
    Completed { result: QueryResult },
    Failed { error: String },
}

/// Result container of a completed job, keyed by query id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchJobResult {
    pub results: BTreeMap<QueryId, QueryExecution>,
}

type JobCompletion = Result<SearchJobResult, String>;

struct JobInner {
    id: Uuid,
    owner: String,
    search: Arc<Search>,
    created_at: DateTime<Utc>,
    state: RwLock<JobState>,
    completion_tx: watch::Sender<Option<JobCompletion>>,
}

/// One execution instance of a search snapshot.
///
/// The result container is written exactly once by the executing task and
/// observed by any number of waiters; a timed-out wait abandons interest
/// without stopping the execution. There is no cancellation path.
#[derive(Clone)]
pub struct SearchJob {
    inner: Arc<JobInner>,
}

impl std::fmt::Debug for SearchJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchJob")
            .field("id", &self.id())
            .field("owner", &self.owner())
            .field("state", &self.state())
            .finish()
    }
}

impl SearchJob {
    pub fn new(search: Search, owner: impl Into<String>) -> Self {
        let (completion_tx, _) = watch::channel(None);
        Self {
            inner: Arc::new(JobInner {
                id: Uuid::new_v4(),
                owner: owner.into(),
                search: Arc::new(search),
                created_at: Utc::now(),
                state: RwLock::new(JobState::Created),
                completion_tx,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn owner(&self) -> &str {
        &self.inner.owner
    }

    /// The immutable search snapshot this job executes.
    pub fn search(&self) -> &Arc<Search> {
        &self.inner.search
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    pub fn state(&self) -> JobState {
        *self.inner.state.read()
    }

    pub fn mark_running(&self) {
        let mut state = self.inner.state.write();
        if *state == JobState::Created {
            *state = JobState::Running;
        }
    }

    /// Sets the terminal result. The first write wins; later calls are
    /// ignored so the container stays immutable once terminal.
    pub fn complete(&self, result: SearchJobResult) {
        self.finish(Ok(result), JobState::Completed);
    }

    /// Marks the job as failed as a whole, used only when no coherent
    /// result container could be produced.
    pub fn fail(&self, error: impl Into<String>) {
        self.finish(Err(error.into()), JobState::Failed);
    }

    fn finish(&self, completion: JobCompletion, terminal: JobState) {
        let assigned = self.inner.completion_tx.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = Some(completion);
                true
            } else {
                false
            }
        });
        if assigned {
            *self.inner.state.write() = terminal;
        }
    }

    /// The result container, if the job completed.
    pub fn result(&self) -> Option<SearchJobResult> {
        match self.inner.completion_tx.borrow().as_ref() {
            Some(Ok(result)) => Some(result.clone()),
            _ => None,
        }
    }

    /// The job-level failure, if the job failed as a whole.
    pub fn error(&self) -> Option<String> {
        match self.inner.completion_tx.borrow().as_ref() {
            Some(Err(error)) => Some(error.clone()),
            _ => None,
        }
    }

    /// Bounded wait on the job's result. Deadline expiry reports `Timeout`
    /// and leaves the job running in the background.
    pub async fn wait_for_result(&self, timeout: Duration) -> Result<SearchJobResult, EngineError> {
        let mut rx = self.inner.completion_tx.subscribe();
        // The slot ref borrows `rx`; bind the outcome so the borrow ends
        // before `rx` is dropped.
        let outcome = match tokio::time::timeout(timeout, rx.wait_for(|slot| slot.is_some())).await
        {
            Ok(Ok(slot)) => match &*slot {
                Some(Ok(result)) => Ok(result.clone()),
                Some(Err(error)) => Err(EngineError::ExecutionFailure(error.clone())),
                None => Err(EngineError::ExecutionFailure(
                    "result slot observed empty after completion".into(),
                )),
            },
            Ok(Err(_)) => Err(EngineError::ExecutionFailure(
                "result channel closed before completion".into(),
            )),
            Err(_) => Err(EngineError::Timeout),
        };
        outcome
    }
}

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};
use uuid::Uuid;

use crate::engine::QueryEngine;
use crate::error::EngineError;
use crate::events::{EventSink, JobExecutionEvent};
use crate::guard::ExecutionGuard;
use crate::job::SearchJob;
use crate::metadata::SearchMetadata;
use crate::permissions::{PermittedStreams, SearchUser};
use crate::registry::SearchJobService;
use crate::search::{ExecutionState, Search};
use crate::store::SearchStore;

/// Wait bounds used by the synchronous and status-poll paths.
#[derive(Debug, Clone, Copy)]
pub struct ExecutorConfig {
    pub default_sync_timeout: Duration,
    pub status_poll_wait: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_sync_timeout: Duration::from_millis(60_000),
            status_poll_wait: Duration::from_millis(5),
        }
    }
}

/// Orchestrates guard, normalization, execution and retrieval for the
/// client-facing execution modes.
pub struct SearchExecutor {
    engine: QueryEngine,
    store: Arc<dyn SearchStore>,
    jobs: SearchJobService,
    guard: ExecutionGuard,
    permitted_streams: PermittedStreams,
    events: Arc<dyn EventSink>,
    config: ExecutorConfig,
}

impl SearchExecutor {
    pub fn new(
        engine: QueryEngine,
        store: Arc<dyn SearchStore>,
        jobs: SearchJobService,
        permitted_streams: PermittedStreams,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            engine,
            store,
            jobs,
            guard: ExecutionGuard,
            permitted_streams,
            events,
            config: ExecutorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Creates or overwrites a search. Overwriting another owner's search
    /// requires admin rights; the stored owner becomes the requester.
    pub fn create_search(&self, search: Search, user: &SearchUser) -> Result<Search, EngineError> {
        search.validate()?;

        if let Some(id) = &search.id {
            if let Some(previous) = self.store.get(id) {
                if !user.is_admin() && !user.owns(&previous) {
                    return Err(EngineError::not_permitted(format!(
                        "unable to update search with id <{}>, already exists and user is not permitted to overwrite it",
                        id
                    )));
                }
            }
        }

        self.guard
            .check(&search, |stream| user.can_read_stream(stream))?;

        let saved = self.store.save(search.with_owner(user.username()))?;
        debug!(search_id = saved.id.as_deref().unwrap_or(""), "saved search");
        Ok(saved)
    }

    pub fn get_search(&self, id: &str, user: &SearchUser) -> Result<Search, EngineError> {
        self.store
            .get(id)
            .filter(|search| self.visible_to(search, user))
            .ok_or_else(|| EngineError::NotFound(format!("search with id <{}> does not exist", id)))
    }

    pub fn list_searches(&self, user: &SearchUser) -> Vec<Search> {
        self.store
            .list()
            .into_iter()
            .filter(|search| self.visible_to(search, user))
            .collect()
    }

    fn visible_to(&self, search: &Search, user: &SearchUser) -> bool {
        user.is_admin() || user.owns(search) || user.can_read_view(search)
    }

    /// Fire-and-forget execution of a persisted search: guard, normalize,
    /// start the job and return its handle immediately.
    pub fn execute_async(
        &self,
        id: &str,
        state: &ExecutionState,
        user: &SearchUser,
    ) -> Result<SearchJob, EngineError> {
        let search = self.get_search(id, user)?;
        let search =
            search.add_streams_to_queries_without_streams(&self.permitted_streams.load(user));
        self.guard
            .check(&search, |stream| user.can_read_stream(stream))?;
        let snapshot = search.apply_execution_state(state);
        self.start_job(snapshot, user)
    }

    /// Executes an ad-hoc search and waits for its result within the given
    /// bound. Deadline expiry reports `Timeout`; the job keeps executing
    /// and a later status poll may find it completed.
    pub async fn execute_sync(
        &self,
        search: Search,
        timeout: Option<Duration>,
        user: &SearchUser,
    ) -> Result<SearchJob, EngineError> {
        search.validate()?;
        let search =
            search.add_streams_to_queries_without_streams(&self.permitted_streams.load(user));
        self.guard
            .check(&search, |stream| user.can_read_stream(stream))?;

        let job = self.start_job(search, user)?;
        let timeout = timeout.unwrap_or(self.config.default_sync_timeout);
        match job.wait_for_result(timeout).await {
            Ok(_) => Ok(job),
            Err(EngineError::Timeout) => Err(EngineError::Timeout),
            Err(err) => {
                error!(job_id = %job.id(), %err, "error executing search job");
                Err(err)
            }
        }
    }

    fn start_job(&self, snapshot: Search, user: &SearchUser) -> Result<SearchJob, EngineError> {
        let job = self.jobs.create(snapshot, user.username());
        match self.engine.execute(job.clone()) {
            Ok(job) => {
                self.events
                    .publish(JobExecutionEvent::new(user.username(), &job));
                Ok(job)
            }
            Err(err) => {
                // The job is already registered; record the failure so a
                // status poll never finds it stuck in `Created`.
                job.fail(err.to_string());
                Err(err)
            }
        }
    }

    /// Owner-scoped status lookup with a very short conditional wait, so
    /// fast queries are observed completed without a second round trip.
    pub async fn job_status(
        &self,
        job_id: &Uuid,
        user: &SearchUser,
    ) -> Result<SearchJob, EngineError> {
        let job = self
            .jobs
            .load(job_id, user.username())
            .ok_or_else(|| EngineError::NotFound(format!("job <{}> not found", job_id)))?;

        // A wait timeout here is swallowed; the job is returned as-is.
        let _ = job.wait_for_result(self.config.status_poll_wait).await;
        Ok(job)
    }

    pub fn metadata(&self, id: &str, user: &SearchUser) -> Result<SearchMetadata, EngineError> {
        let search = self.get_search(id, user)?;
        self.metadata_for_search(&search)
    }

    /// Structural metadata for a search that need not be persisted. Never
    /// guarded and never dispatches to a backend.
    pub fn metadata_for_search(&self, search: &Search) -> Result<SearchMetadata, EngineError> {
        search.validate()?;
        let query_metadata = search
            .queries
            .iter()
            .map(|query| (query.id.clone(), self.engine.parse(search, query)))
            .collect();
        let declared_parameters = search
            .parameters
            .iter()
            .map(|parameter| (parameter.name.clone(), parameter.clone()))
            .collect();
        Ok(SearchMetadata {
            query_metadata,
            declared_parameters,
        })
    }
}

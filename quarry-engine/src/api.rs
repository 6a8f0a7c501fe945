use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query as QueryParams, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::info;
use uuid::Uuid;

use crate::error::EngineError;
use crate::facade::{ExecutorConfig, SearchExecutor};
use crate::job::{JobState, SearchJob, SearchJobResult};
use crate::metadata::SearchMetadata;
use crate::permissions::{SearchUser, UserProvider};
use crate::search::{ExecutionState, Search};

/// Header carrying the caller identity resolved by the fronting
/// authentication layer.
pub const USER_HEADER: &str = "x-quarry-user";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchServiceConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_dispatch_limit")]
    pub max_concurrent_dispatches: usize,
    #[serde(default = "default_sync_timeout_ms")]
    pub default_sync_timeout_ms: u64,
    #[serde(default = "default_status_poll_ms")]
    pub status_poll_ms: u64,
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_dispatch_limit() -> usize {
    4
}

fn default_sync_timeout_ms() -> u64 {
    60_000
}

fn default_status_poll_ms() -> u64 {
    5
}

impl Default for SearchServiceConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            max_concurrent_dispatches: default_dispatch_limit(),
            default_sync_timeout_ms: default_sync_timeout_ms(),
            status_poll_ms: default_status_poll_ms(),
        }
    }
}

impl SearchServiceConfig {
    /// Derives the service config from the shared core configuration,
    /// keeping everything but the bind address at its default.
    pub fn from_core(core: &quarry_core::CoreConfig) -> Self {
        let mut config = Self::default();
        if let Some(bind) = &core.http_bind {
            config.bind_address = bind.clone();
        }
        config
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            default_sync_timeout: Duration::from_millis(self.default_sync_timeout_ms),
            status_poll_wait: Duration::from_millis(self.status_poll_ms),
        }
    }
}

#[derive(Clone)]
struct SearchApiState {
    executor: Arc<SearchExecutor>,
    users: Arc<dyn UserProvider>,
}

/// Builder to bootstrap the search HTTP service.
pub struct SearchApiBuilder {
    executor: Arc<SearchExecutor>,
    users: Arc<dyn UserProvider>,
}

impl SearchApiBuilder {
    pub fn new(executor: Arc<SearchExecutor>, users: Arc<dyn UserProvider>) -> Self {
        Self { executor, users }
    }

    pub fn build_router(executor: Arc<SearchExecutor>, users: Arc<dyn UserProvider>) -> Router {
        let state = SearchApiState { executor, users };

        Router::new()
            .route("/search", post(create_search).get(list_searches))
            .route("/search/sync", post(execute_sync))
            .route("/search/metadata", post(metadata_for_search))
            .route("/search/metadata/:id", get(metadata))
            .route("/search/status/:job_id", get(job_status))
            .route("/search/:id", get(get_search))
            .route("/search/:id/execute", post(execute_async))
            .with_state(state)
    }

    pub async fn serve(self, config: SearchServiceConfig) -> anyhow::Result<oneshot::Sender<()>> {
        let router = Self::build_router(self.executor, self.users);
        let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            info!(address = %config.bind_address, "starting search service");
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = rx.await;
                })
                .await
                .ok();
        });

        Ok(tx)
    }
}

/// Wire representation of a search job.
#[derive(Debug, Serialize)]
struct JobResponse {
    id: Uuid,
    owner: String,
    search_id: Option<String>,
    state: JobState,
    created_at: DateTime<Utc>,
    result: Option<SearchJobResult>,
    error: Option<String>,
}

impl From<&SearchJob> for JobResponse {
    fn from(job: &SearchJob) -> Self {
        Self {
            id: job.id(),
            owner: job.owner().to_string(),
            search_id: job.search().id.clone(),
            state: job.state(),
            created_at: job.created_at(),
            result: job.result(),
            error: job.error(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: String,
    message: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn resolve_user(state: &SearchApiState, headers: &HeaderMap) -> Result<SearchUser, ApiError> {
    headers
        .get(USER_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|username| state.users.resolve(username))
        .ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    code: "unauthenticated".into(),
                    message: "request carries no resolvable user".into(),
                }),
            )
        })
}

async fn create_search(
    State(state): State<SearchApiState>,
    headers: HeaderMap,
    Json(search): Json<Search>,
) -> Result<impl IntoResponse, ApiError> {
    let user = resolve_user(&state, &headers)?;
    let saved = state
        .executor
        .create_search(search, &user)
        .map_err(map_error)?;
    let location = format!("/search/{}", saved.id.as_deref().unwrap_or(""));
    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, location)],
        Json(saved),
    ))
}

async fn get_search(
    State(state): State<SearchApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Search>, ApiError> {
    let user = resolve_user(&state, &headers)?;
    let search = state.executor.get_search(&id, &user).map_err(map_error)?;
    Ok(Json(search))
}

async fn list_searches(
    State(state): State<SearchApiState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Search>>, ApiError> {
    let user = resolve_user(&state, &headers)?;
    Ok(Json(state.executor.list_searches(&user)))
}

async fn execute_async(
    State(state): State<SearchApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    execution_state: Option<Json<ExecutionState>>,
) -> Result<impl IntoResponse, ApiError> {
    let user = resolve_user(&state, &headers)?;
    let execution_state = execution_state
        .map(|Json(state)| state)
        .unwrap_or_else(ExecutionState::empty);

    let job = state
        .executor
        .execute_async(&id, &execution_state, &user)
        .map_err(map_error)?;

    let location = format!("/search/status/{}", job.id());
    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, location)],
        Json(JobResponse::from(&job)),
    ))
}

#[derive(Debug, Deserialize)]
struct SyncParams {
    timeout: Option<u64>,
}

async fn execute_sync(
    State(state): State<SearchApiState>,
    QueryParams(params): QueryParams<SyncParams>,
    headers: HeaderMap,
    Json(search): Json<Search>,
) -> Result<Json<JobResponse>, ApiError> {
    let user = resolve_user(&state, &headers)?;
    let timeout = params.timeout.map(Duration::from_millis);
    let job = state
        .executor
        .execute_sync(search, timeout, &user)
        .await
        .map_err(map_error)?;
    Ok(Json(JobResponse::from(&job)))
}

async fn job_status(
    State(state): State<SearchApiState>,
    Path(job_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<JobResponse>, ApiError> {
    let user = resolve_user(&state, &headers)?;
    let job = state
        .executor
        .job_status(&job_id, &user)
        .await
        .map_err(map_error)?;
    Ok(Json(JobResponse::from(&job)))
}

async fn metadata(
    State(state): State<SearchApiState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<SearchMetadata>, ApiError> {
    let user = resolve_user(&state, &headers)?;
    let metadata = state.executor.metadata(&id, &user).map_err(map_error)?;
    Ok(Json(metadata))
}

async fn metadata_for_search(
    State(state): State<SearchApiState>,
    headers: HeaderMap,
    Json(search): Json<Search>,
) -> Result<Json<SearchMetadata>, ApiError> {
    // Metadata is never guarded, but the caller must still be a known user.
    resolve_user(&state, &headers)?;
    let metadata = state
        .executor
        .metadata_for_search(&search)
        .map_err(map_error)?;
    Ok(Json(metadata))
}

fn map_error(err: EngineError) -> ApiError {
    let (status, code) = match &err {
        EngineError::PermissionDenied { .. } => (StatusCode::FORBIDDEN, "permission_denied"),
        EngineError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        EngineError::CyclicDependency(_) => (StatusCode::BAD_REQUEST, "cyclic_dependency"),
        EngineError::InvalidDefinition(_) => (StatusCode::BAD_REQUEST, "invalid_definition"),
        EngineError::ExecutionFailure(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "execution_failure")
        }
        EngineError::Timeout => (StatusCode::INTERNAL_SERVER_ERROR, "timeout"),
    };
    (
        status,
        Json(ErrorResponse {
            code: code.into(),
            message: err.to_string(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::backend::AdapterRegistry;
    use crate::engine::QueryEngine;
    use crate::events::TracingEventSink;
    use crate::permissions::{PermittedStreams, StreamCatalog, UserPermissions};
    use crate::registry::SearchJobService;
    use crate::search::{Query, StreamId};
    use crate::store::InMemorySearchStore;

    struct OpenPermissions;

    impl UserPermissions for OpenPermissions {
        fn can_read_stream(&self, _username: &str, _stream: &str) -> bool {
            true
        }

        fn can_read_view(&self, _username: &str, _search: &Search) -> bool {
            false
        }
    }

    struct EmptyCatalog;

    impl StreamCatalog for EmptyCatalog {
        fn stream_ids(&self) -> BTreeSet<StreamId> {
            BTreeSet::new()
        }
    }

    struct HeaderUsers;

    impl UserProvider for HeaderUsers {
        fn resolve(&self, username: &str) -> Option<SearchUser> {
            Some(SearchUser::new(username, false, Arc::new(OpenPermissions)))
        }
    }

    fn api_state() -> SearchApiState {
        let executor = SearchExecutor::new(
            QueryEngine::new(AdapterRegistry::new(), 4),
            Arc::new(InMemorySearchStore::new()),
            SearchJobService::new(),
            PermittedStreams::new(Arc::new(EmptyCatalog)),
            Arc::new(TracingEventSink),
        );
        SearchApiState {
            executor: Arc::new(executor),
            users: Arc::new(HeaderUsers),
        }
    }

    #[tokio::test]
    async fn metadata_requires_a_resolvable_caller() {
        let state = api_state();
        let search = Search::builder().query(Query::new("q1")).build().unwrap();

        let anonymous =
            metadata_for_search(State(state.clone()), HeaderMap::new(), Json(search.clone()))
                .await;
        match anonymous {
            Err((status, _)) => assert_eq!(status, StatusCode::UNAUTHORIZED),
            Ok(_) => panic!("expected rejection without a user header"),
        }

        let mut headers = HeaderMap::new();
        headers.insert(USER_HEADER, "alice".parse().unwrap());
        let authenticated = metadata_for_search(State(state), headers, Json(search)).await;
        assert!(authenticated.is_ok());
    }

    #[test]
    fn maps_errors_to_contract_status_codes() {
        let cases = [
            (
                EngineError::streams_not_readable(vec!["sales".into()]),
                StatusCode::FORBIDDEN,
            ),
            (
                EngineError::NotFound("job".into()),
                StatusCode::NOT_FOUND,
            ),
            (
                EngineError::CyclicDependency(vec!["q1".into()]),
                StatusCode::BAD_REQUEST,
            ),
            (
                EngineError::InvalidDefinition("dup".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                EngineError::ExecutionFailure("boom".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (EngineError::Timeout, StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, expected) in cases {
            let (status, _) = map_error(err);
            assert_eq!(status, expected);
        }
    }

    #[test]
    fn timeout_is_distinguishable_from_execution_failure() {
        let (_, Json(timeout)) = map_error(EngineError::Timeout);
        let (_, Json(failure)) = map_error(EngineError::ExecutionFailure("boom".into()));
        assert_ne!(timeout.code, failure.code);
    }
}

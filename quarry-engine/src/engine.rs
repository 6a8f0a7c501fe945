use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::backend::{AdapterRegistry, BackendAdapter, QueryContext};
use crate::error::EngineError;
use crate::job::{QueryExecution, SearchJob, SearchJobResult};
use crate::metadata::{self, QueryMetadata};
use crate::search::{Query, QueryId, Search};

/// Parses query definitions into metadata and executes searches against the
/// registered backend adapters, respecting the dependency graph among the
/// queries of one search.
pub struct QueryEngine {
    adapters: AdapterRegistry,
    dispatch_limit: Arc<Semaphore>,
}

impl QueryEngine {
    /// `max_concurrent_dispatches` bounds backend dispatches across all
    /// jobs handled by this engine.
    pub fn new(adapters: AdapterRegistry, max_concurrent_dispatches: usize) -> Self {
        Self {
            adapters,
            dispatch_limit: Arc::new(Semaphore::new(max_concurrent_dispatches.max(1))),
        }
    }

    /// Pure structural analysis of one query. Never touches a backend,
    /// the network or storage.
    pub fn parse(&self, search: &Search, query: &Query) -> QueryMetadata {
        QueryMetadata {
            used_parameter_names: metadata::used_parameter_names(&query.query_string),
            referenced_streams: search.effective_streams(query),
        }
    }

    /// Starts asynchronous execution of the job and returns it immediately.
    /// Rejects cyclic query dependencies before any backend dispatch.
    pub fn execute(&self, job: SearchJob) -> Result<SearchJob, EngineError> {
        let waves = execution_waves(job.search())?;
        let adapter = self.adapters.for_target(&job.search().target)?;

        job.mark_running();
        info!(
            job_id = %job.id(),
            owner = job.owner(),
            queries = job.search().queries.len(),
            "starting search job"
        );

        let driver_job = job.clone();
        let dispatch_limit = self.dispatch_limit.clone();
        tokio::spawn(async move {
            drive_job(driver_job, waves, adapter, dispatch_limit).await;
        });

        Ok(job)
    }
}

/// Peels the dependency graph into waves: every query in a wave only
/// depends on queries of earlier waves. Remaining queries form a cycle.
fn execution_waves(search: &Search) -> Result<Vec<Vec<Query>>, EngineError> {
    let mut remaining: BTreeMap<QueryId, Query> = search
        .queries
        .iter()
        .map(|query| (query.id.clone(), query.clone()))
        .collect();
    let mut resolved: BTreeSet<QueryId> = BTreeSet::new();
    let mut waves = Vec::new();

    while !remaining.is_empty() {
        let ready: Vec<Query> = remaining
            .values()
            .filter(|query| query.depends_on.iter().all(|dep| resolved.contains(dep)))
            .cloned()
            .collect();

        if ready.is_empty() {
            return Err(EngineError::CyclicDependency(
                remaining.keys().cloned().collect(),
            ));
        }

        for query in &ready {
            remaining.remove(&query.id);
            resolved.insert(query.id.clone());
        }
        waves.push(ready);
    }

    Ok(waves)
}

/// Executes the waves in order; queries within one wave run concurrently up
/// to the engine-wide dispatch bound. A query failure is recorded in its
/// result slot and never aborts siblings.
async fn drive_job(
    job: SearchJob,
    waves: Vec<Vec<Query>>,
    adapter: Arc<dyn BackendAdapter>,
    dispatch_limit: Arc<Semaphore>,
) {
    let search = job.search().clone();
    let mut outcomes: BTreeMap<QueryId, QueryExecution> = BTreeMap::new();

    for wave in waves {
        let dispatches = wave.into_iter().map(|query| {
            let adapter = adapter.clone();
            let dispatch_limit = dispatch_limit.clone();
            let ctx = QueryContext {
                search: search.clone(),
                predecessors: query
                    .depends_on
                    .iter()
                    .filter_map(|dep| {
                        outcomes
                            .get(dep)
                            .map(|outcome| (dep.clone(), outcome.clone()))
                    })
                    .collect(),
            };
            let job_id = job.id();

            async move {
                let permit = match dispatch_limit.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return (
                            query.id.clone(),
                            QueryExecution::Failed {
                                error: "dispatch pool closed".to_string(),
                            },
                        );
                    }
                };

                debug!(job_id = %job_id, query_id = %query.id, "dispatching query");
                let outcome = match adapter.execute(&query, &ctx).await {
                    Ok(result) => QueryExecution::Completed { result },
                    Err(error) => {
                        warn!(job_id = %job_id, query_id = %query.id, %error, "query failed");
                        QueryExecution::Failed { error }
                    }
                };
                drop(permit);
                (query.id.clone(), outcome)
            }
        });

        for (query_id, outcome) in futures::future::join_all(dispatches).await {
            outcomes.insert(query_id, outcome);
        }
    }

    info!(job_id = %job.id(), "search job completed");
    job.complete(SearchJobResult { results: outcomes });
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::backend::QueryResult;
    use crate::job::JobState;
    use crate::search::Distribution;

    struct RecordingAdapter {
        calls: AtomicUsize,
        order: Mutex<Vec<QueryId>>,
        fail_query: Option<QueryId>,
    }

    impl RecordingAdapter {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                order: Mutex::new(Vec::new()),
                fail_query: None,
            }
        }

        fn failing_on(query_id: &str) -> Self {
            Self {
                fail_query: Some(query_id.to_string()),
                ..Self::new()
            }
        }
    }

    #[async_trait]
    impl BackendAdapter for RecordingAdapter {
        fn distribution(&self) -> Distribution {
            Distribution::Opensearch
        }

        async fn execute(&self, query: &Query, ctx: &QueryContext) -> Result<QueryResult, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.order.lock().push(query.id.clone());
            if self.fail_query.as_deref() == Some(query.id.as_str()) {
                return Err(format!("backend rejected query <{}>", query.id));
            }
            Ok(QueryResult::new(
                &query.id,
                serde_json::json!({ "predecessors": ctx.predecessors.len() }),
            ))
        }
    }

    fn engine_with(adapter: Arc<RecordingAdapter>) -> QueryEngine {
        QueryEngine::new(AdapterRegistry::new().register(adapter), 4)
    }

    fn chain_search() -> Search {
        Search::builder()
            .query(Query::new("q1"))
            .query(Query::new("q2").with_dependencies(["q1"]))
            .query(Query::new("q3"))
            .build()
            .unwrap()
    }

    #[test]
    fn waves_respect_dependencies() {
        let waves = execution_waves(&chain_search()).unwrap();
        assert_eq!(waves.len(), 2);
        let first: Vec<&str> = waves[0].iter().map(|q| q.id.as_str()).collect();
        assert_eq!(first, vec!["q1", "q3"]);
        assert_eq!(waves[1][0].id, "q2");
    }

    #[test]
    fn cycle_is_detected_before_any_dispatch() {
        let search = Search::builder()
            .query(Query::new("q1").with_dependencies(["q2"]))
            .query(Query::new("q2").with_dependencies(["q1"]))
            .build()
            .unwrap();

        let result = execution_waves(&search);
        match result {
            Err(EngineError::CyclicDependency(ids)) => {
                assert_eq!(ids, vec!["q1".to_string(), "q2".to_string()]);
            }
            other => panic!("expected cycle error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn executes_dependencies_before_dependents() {
        let adapter = Arc::new(RecordingAdapter::new());
        let engine = engine_with(adapter.clone());
        let job = SearchJob::new(chain_search(), "alice");

        let job = engine.execute(job).unwrap();
        let result = job.wait_for_result(Duration::from_secs(5)).await.unwrap();

        assert_eq!(result.results.len(), 3);
        let order = adapter.order.lock();
        let q1 = order.iter().position(|id| id == "q1").unwrap();
        let q2 = order.iter().position(|id| id == "q2").unwrap();
        assert!(q1 < q2);
        // The dependent query observed its predecessor's outcome.
        match &result.results["q2"] {
            QueryExecution::Completed { result } => {
                assert_eq!(result.payload["predecessors"], serde_json::json!(1));
            }
            other => panic!("expected completion, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn query_failure_is_isolated_to_its_result_slot() {
        let adapter = Arc::new(RecordingAdapter::failing_on("q1"));
        let engine = engine_with(adapter.clone());
        let job = SearchJob::new(chain_search(), "alice");

        let job = engine.execute(job).unwrap();
        let result = job.wait_for_result(Duration::from_secs(5)).await.unwrap();

        assert_eq!(job.state(), JobState::Completed);
        assert!(matches!(
            result.results["q1"],
            QueryExecution::Failed { .. }
        ));
        assert!(matches!(
            result.results["q3"],
            QueryExecution::Completed { .. }
        ));
        // q2 still ran and observed q1's recorded failure.
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cyclic_job_never_reaches_the_backend() {
        let adapter = Arc::new(RecordingAdapter::new());
        let engine = engine_with(adapter.clone());
        let search = Search::builder()
            .query(Query::new("q1").with_dependencies(["q2"]))
            .query(Query::new("q2").with_dependencies(["q1"]))
            .build()
            .unwrap();

        let result = engine.execute(SearchJob::new(search, "alice"));
        assert!(matches!(result, Err(EngineError::CyclicDependency(_))));
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn parse_extracts_parameters_and_streams() {
        let adapter = Arc::new(RecordingAdapter::new());
        let engine = engine_with(adapter.clone());
        let search = Search::builder()
            .query(
                Query::new("q1")
                    .with_query_string("source:$source$")
                    .with_streams(["sales"]),
            )
            .build()
            .unwrap();

        let metadata = engine.parse(&search, &search.queries[0]);
        assert_eq!(
            metadata.used_parameter_names,
            ["source".to_string()].into_iter().collect()
        );
        assert_eq!(
            metadata.referenced_streams,
            ["sales".to_string()].into_iter().collect()
        );
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 0);
    }
}

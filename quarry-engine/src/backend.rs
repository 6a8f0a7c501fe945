use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::job::QueryExecution;
use crate::search::{BackendTarget, Distribution, Query, QueryId, Search};

/// Result of one query dispatched against a backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryResult {
    pub query_id: QueryId,
    pub payload: serde_json::Value,
    pub finished_at: DateTime<Utc>,
}

impl QueryResult {
    pub fn new(query_id: impl Into<QueryId>, payload: serde_json::Value) -> Self {
        Self {
            query_id: query_id.into(),
            payload,
            finished_at: Utc::now(),
        }
    }
}

/// Context handed to an adapter for one dispatch: the immutable search
/// snapshot and the completed outcomes of the query's declared dependencies.
pub struct QueryContext {
    pub search: Arc<Search>,
    pub predecessors: BTreeMap<QueryId, QueryExecution>,
}

/// Pluggable capability translating a query into a result against a
/// specific search-index distribution.
#[async_trait]
pub trait BackendAdapter: Send + Sync + 'static {
    fn distribution(&self) -> Distribution;

    async fn execute(&self, query: &Query, ctx: &QueryContext) -> Result<QueryResult, String>;
}

/// Adapters keyed by distribution; the search's declared target selects one.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<Distribution, Arc<dyn BackendAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, adapter: Arc<dyn BackendAdapter>) -> Self {
        self.adapters.insert(adapter.distribution(), adapter);
        self
    }

    pub fn for_target(&self, target: &BackendTarget) -> Result<Arc<dyn BackendAdapter>, EngineError> {
        self.adapters
            .get(&target.distribution)
            .cloned()
            .ok_or_else(|| {
                EngineError::ExecutionFailure(format!(
                    "no backend adapter registered for {:?}",
                    target.distribution
                ))
            })
    }
}

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

pub type QueryId = String;
pub type StreamId = String;

/// Search-index distribution a search is executed against.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Distribution {
    Elasticsearch,
    Opensearch,
}

/// Backend a search declares as its execution target. The adapter is
/// selected by the distribution; the version is informational.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackendTarget {
    pub distribution: Distribution,
    #[serde(default)]
    pub version: Option<String>,
}

impl Default for BackendTarget {
    fn default() -> Self {
        Self {
            distribution: Distribution::Opensearch,
            version: None,
        }
    }
}

/// Time window a query is evaluated over.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimeRange {
    Relative { range_secs: u64 },
    Absolute { from: DateTime<Utc>, to: DateTime<Utc> },
}

impl Default for TimeRange {
    fn default() -> Self {
        TimeRange::Relative { range_secs: 300 }
    }
}

/// Declared type of a search parameter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    String,
    Number,
    Bool,
}

impl Default for ParameterType {
    fn default() -> Self {
        ParameterType::String
    }
}

/// Declared parameter of a search. Names are unique within one search.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Parameter {
    pub name: String,
    #[serde(default)]
    pub data_type: ParameterType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bound_value: Option<serde_json::Value>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, data_type: ParameterType) -> Self {
        Self {
            name: name.into(),
            data_type,
            default_value: None,
            bound_value: None,
        }
    }

    pub fn with_default(mut self, value: serde_json::Value) -> Self {
        self.default_value = Some(value);
        self
    }

    /// Effective value: execution-time binding wins over the declared default.
    pub fn value(&self) -> Option<&serde_json::Value> {
        self.bound_value.as_ref().or(self.default_value.as_ref())
    }
}

/// One unit of backend work within a search.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Query {
    pub id: QueryId,
    #[serde(default)]
    pub query_string: String,
    #[serde(default)]
    pub timerange: TimeRange,
    #[serde(default)]
    pub streams: BTreeSet<StreamId>,
    /// Ids of queries in the same search whose results this query consumes.
    #[serde(default)]
    pub depends_on: BTreeSet<QueryId>,
}

impl Query {
    pub fn new(id: impl Into<QueryId>) -> Self {
        Self {
            id: id.into(),
            query_string: String::new(),
            timerange: TimeRange::default(),
            streams: BTreeSet::new(),
            depends_on: BTreeSet::new(),
        }
    }

    pub fn with_query_string(mut self, query_string: impl Into<String>) -> Self {
        self.query_string = query_string.into();
        self
    }

    pub fn with_timerange(mut self, timerange: TimeRange) -> Self {
        self.timerange = timerange;
        self
    }

    pub fn with_streams<I, S>(mut self, streams: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<StreamId>,
    {
        self.streams = streams.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<QueryId>,
    {
        self.depends_on = dependencies.into_iter().map(Into::into).collect();
        self
    }
}

/// Overrides supplied at execution time. Immutable once constructed;
/// absence of overrides is represented by `ExecutionState::empty()`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecutionState {
    #[serde(default)]
    pub parameter_bindings: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub timerange_overrides: BTreeMap<QueryId, TimeRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_timerange: Option<TimeRange>,
}

impl ExecutionState {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.parameter_bindings.is_empty()
            && self.timerange_overrides.is_empty()
            && self.global_timerange.is_none()
    }
}

/// A collection of queries and parameters submitted for execution.
///
/// A search is immutable once submitted; normalization derives working
/// copies and never mutates the original.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Search {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub queries: Vec<Query>,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default)]
    pub target: BackendTarget,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Search {
    pub fn builder() -> SearchBuilder {
        SearchBuilder::default()
    }

    /// Structural validation: unique query ids, unique parameter names and
    /// dependencies referencing existing sibling queries. Duplicate
    /// parameter names are a hard error, never silently resolved.
    pub fn validate(&self) -> Result<(), EngineError> {
        let mut query_ids = BTreeSet::new();
        for query in &self.queries {
            if query.id.is_empty() {
                return Err(EngineError::InvalidDefinition(
                    "query id must not be empty".into(),
                ));
            }
            if !query_ids.insert(query.id.as_str()) {
                return Err(EngineError::InvalidDefinition(format!(
                    "duplicate query id <{}>",
                    query.id
                )));
            }
        }

        let mut parameter_names = BTreeSet::new();
        for parameter in &self.parameters {
            if !parameter_names.insert(parameter.name.as_str()) {
                return Err(EngineError::InvalidDefinition(format!(
                    "duplicate parameter name <{}>",
                    parameter.name
                )));
            }
        }

        for query in &self.queries {
            for dependency in &query.depends_on {
                if dependency == &query.id {
                    return Err(EngineError::InvalidDefinition(format!(
                        "query <{}> depends on itself",
                        query.id
                    )));
                }
                if !query_ids.contains(dependency.as_str()) {
                    return Err(EngineError::InvalidDefinition(format!(
                        "query <{}> depends on unknown query <{}>",
                        query.id, dependency
                    )));
                }
            }
        }

        Ok(())
    }

    /// Union of all streams explicitly referenced by this search's queries.
    pub fn used_streams(&self) -> BTreeSet<StreamId> {
        self.queries
            .iter()
            .flat_map(|query| query.streams.iter().cloned())
            .collect()
    }

    /// Streams a query effectively touches: its own set, or the search-wide
    /// set when the query declares none.
    pub fn effective_streams(&self, query: &Query) -> BTreeSet<StreamId> {
        if query.streams.is_empty() {
            self.used_streams()
        } else {
            query.streams.clone()
        }
    }

    /// Derives a copy with every stream-less query filled in with the
    /// provided fallback set.
    pub fn add_streams_to_queries_without_streams(&self, fallback: &BTreeSet<StreamId>) -> Self {
        let mut derived = self.clone();
        for query in &mut derived.queries {
            if query.streams.is_empty() {
                query.streams = fallback.clone();
            }
        }
        derived
    }

    /// Derives a copy with execution-time overrides applied: parameter
    /// bindings and per-query or global time-range overrides.
    pub fn apply_execution_state(&self, state: &ExecutionState) -> Self {
        if state.is_empty() {
            return self.clone();
        }

        let mut derived = self.clone();
        for query in &mut derived.queries {
            if let Some(timerange) = state.timerange_overrides.get(&query.id) {
                query.timerange = timerange.clone();
            } else if let Some(global) = &state.global_timerange {
                query.timerange = global.clone();
            }
        }
        for parameter in &mut derived.parameters {
            if let Some(value) = state.parameter_bindings.get(&parameter.name) {
                parameter.bound_value = Some(value.clone());
            }
        }
        derived
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

#[derive(Default)]
pub struct SearchBuilder {
    id: Option<String>,
    queries: Vec<Query>,
    parameters: Vec<Parameter>,
    owner: Option<String>,
    target: Option<BackendTarget>,
}

impl SearchBuilder {
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn query(mut self, query: Query) -> Self {
        self.queries.push(query);
        self
    }

    pub fn parameter(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn target(mut self, target: BackendTarget) -> Self {
        self.target = Some(target);
        self
    }

    pub fn build(self) -> Result<Search, EngineError> {
        let search = Search {
            id: self.id,
            queries: self.queries,
            parameters: self.parameters,
            owner: self.owner,
            target: self.target.unwrap_or_default(),
            created_at: Utc::now(),
        };
        search.validate()?;
        Ok(search)
    }
}

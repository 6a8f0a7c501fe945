//! Quarry Engine - search execution engine for the Quarry log-analytics platform.

pub mod api;
pub mod backend;
pub mod engine;
pub mod error;
pub mod events;
pub mod facade;
pub mod guard;
pub mod job;
pub mod metadata;
pub mod permissions;
pub mod registry;
pub mod search;
pub mod store;

pub use api::{SearchApiBuilder, SearchServiceConfig};
pub use backend::{AdapterRegistry, BackendAdapter, QueryContext, QueryResult};
pub use engine::QueryEngine;
pub use error::EngineError;
pub use events::{EventSink, JobExecutionEvent, TracingEventSink};
pub use facade::{ExecutorConfig, SearchExecutor};
pub use guard::ExecutionGuard;
pub use job::{JobState, QueryExecution, SearchJob, SearchJobResult};
pub use metadata::{QueryMetadata, SearchMetadata};
pub use permissions::{PermittedStreams, SearchUser, StreamCatalog, UserPermissions, UserProvider};
pub use registry::SearchJobService;
pub use search::{
    BackendTarget, Distribution, ExecutionState, Parameter, ParameterType, Query, QueryId,
    Search, StreamId, TimeRange,
};
pub use store::{InMemorySearchStore, SearchStore};

use thiserror::Error;

use crate::search::{QueryId, StreamId};

/// Errors that may occur while validating or executing a search.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("{message}")]
    PermissionDenied {
        message: String,
        streams: Vec<StreamId>,
    },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("cyclic dependency between queries: [{}]", .0.join(", "))]
    CyclicDependency(Vec<QueryId>),
    #[error("invalid search definition: {0}")]
    InvalidDefinition(String),
    #[error("error executing search job: {0}")]
    ExecutionFailure(String),
    #[error("timeout while executing search job")]
    Timeout,
}

impl EngineError {
    /// Guard failure naming every stream the caller may not read.
    pub fn streams_not_readable(streams: Vec<StreamId>) -> Self {
        let message = format!(
            "unable to execute search, streams not readable: [{}]",
            streams.join(", ")
        );
        EngineError::PermissionDenied { message, streams }
    }

    /// Permission failure unrelated to stream access (e.g. foreign overwrite).
    pub fn not_permitted(message: impl Into<String>) -> Self {
        EngineError::PermissionDenied {
            message: message.into(),
            streams: Vec::new(),
        }
    }
}

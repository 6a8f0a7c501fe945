use std::collections::BTreeSet;

use crate::error::EngineError;
use crate::search::{Search, StreamId};

/// Validates stream access for a search before any execution. Side-effect
/// free; runs before persisting a search and before every execution, never
/// before metadata extraction.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutionGuard;

impl ExecutionGuard {
    /// Checks every query's effective stream set against the permission
    /// predicate. Fails naming every stream the caller may not read.
    pub fn check<F>(&self, search: &Search, can_read_stream: F) -> Result<(), EngineError>
    where
        F: Fn(&StreamId) -> bool,
    {
        let mut denied: BTreeSet<StreamId> = BTreeSet::new();
        for query in &search.queries {
            for stream in search.effective_streams(query) {
                if !can_read_stream(&stream) {
                    denied.insert(stream);
                }
            }
        }

        if denied.is_empty() {
            Ok(())
        } else {
            Err(EngineError::streams_not_readable(
                denied.into_iter().collect(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::Query;

    fn search_with_streams() -> Search {
        Search::builder()
            .query(Query::new("q1").with_streams(["sales", "ops"]))
            .query(Query::new("q2"))
            .build()
            .unwrap()
    }

    #[test]
    fn denies_naming_unreadable_streams() {
        let search = search_with_streams();
        let result = ExecutionGuard.check(&search, |stream| stream == "sales");

        match result {
            Err(EngineError::PermissionDenied { streams, .. }) => {
                assert_eq!(streams, vec!["ops".to_string()]);
            }
            other => panic!("expected permission denial, got {:?}", other),
        }
    }

    #[test]
    fn passes_when_every_stream_is_readable() {
        let search = search_with_streams();
        assert!(ExecutionGuard.check(&search, |_| true).is_ok());
    }

    #[test]
    fn checks_fallback_streams_for_queries_without_streams() {
        // q2 declares no streams, so it inherits the search-wide set and
        // must be checked against it.
        let search = search_with_streams();
        let result = ExecutionGuard.check(&search, |stream| stream != "ops");
        assert!(matches!(
            result,
            Err(EngineError::PermissionDenied { .. })
        ));
    }
}

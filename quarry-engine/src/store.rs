use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::EngineError;
use crate::search::Search;

/// Persistence capability for search definitions. Storage proper lives
/// outside the engine; this is the narrow interface it consumes.
pub trait SearchStore: Send + Sync {
    fn get(&self, id: &str) -> Option<Search>;

    /// Persists the search, allocating an id when it has none, and returns
    /// the saved value.
    fn save(&self, search: Search) -> Result<Search, EngineError>;

    fn list(&self) -> Vec<Search>;
}

/// In-memory store used by the service wiring and tests.
#[derive(Clone, Default)]
pub struct InMemorySearchStore {
    searches: Arc<RwLock<HashMap<String, Search>>>,
}

impl InMemorySearchStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SearchStore for InMemorySearchStore {
    fn get(&self, id: &str) -> Option<Search> {
        self.searches.read().get(id).cloned()
    }

    fn save(&self, search: Search) -> Result<Search, EngineError> {
        let search = match search.id {
            Some(_) => search,
            None => search.with_id(Uuid::new_v4().to_string()),
        };
        let id = search
            .id
            .clone()
            .ok_or_else(|| EngineError::ExecutionFailure("saved search has no id".into()))?;
        self.searches.write().insert(id, search.clone());
        Ok(search)
    }

    fn list(&self) -> Vec<Search> {
        self.searches.read().values().cloned().collect()
    }
}

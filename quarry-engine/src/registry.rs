use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::job::SearchJob;
use crate::search::Search;

/// Creates, stores and retrieves search jobs. Ids are generated, never
/// client-supplied, so inserts are unique by construction.
#[derive(Clone, Default)]
pub struct SearchJobService {
    jobs: Arc<RwLock<HashMap<Uuid, SearchJob>>>,
}

impl SearchJobService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh job bound to the exact search snapshot and owner.
    /// Every call produces a new job; identical requests are not coalesced.
    pub fn create(&self, search: Search, owner: &str) -> SearchJob {
        let job = SearchJob::new(search, owner);
        debug!(job_id = %job.id(), owner, "created search job");
        self.jobs.write().insert(job.id(), job.clone());
        job
    }

    /// Owner-scoped lookup. A job owned by someone else resolves to `None`,
    /// indistinguishable from a job that does not exist.
    pub fn load(&self, job_id: &Uuid, owner: &str) -> Option<SearchJob> {
        self.jobs
            .read()
            .get(job_id)
            .filter(|job| job.owner() == owner)
            .cloned()
    }

    /// All jobs belonging to one owner.
    pub fn list_for_owner(&self, owner: &str) -> Vec<SearchJob> {
        self.jobs
            .read()
            .values()
            .filter(|job| job.owner() == owner)
            .cloned()
            .collect()
    }
}

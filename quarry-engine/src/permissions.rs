use std::collections::BTreeSet;
use std::sync::Arc;

use crate::search::{Search, StreamId};

/// Capability answering permission questions for a user. Owned by the
/// authorization layer; the engine only ever consults it.
pub trait UserPermissions: Send + Sync {
    fn can_read_stream(&self, username: &str, stream: &str) -> bool;

    fn can_read_view(&self, username: &str, search: &Search) -> bool;
}

/// Capability resolving request identities to search users. Authentication
/// itself lives outside the engine.
pub trait UserProvider: Send + Sync {
    fn resolve(&self, username: &str) -> Option<SearchUser>;
}

/// The caller on whose behalf a search is validated and executed.
#[derive(Clone)]
pub struct SearchUser {
    username: String,
    is_admin: bool,
    permissions: Arc<dyn UserPermissions>,
}

impl SearchUser {
    pub fn new(
        username: impl Into<String>,
        is_admin: bool,
        permissions: Arc<dyn UserPermissions>,
    ) -> Self {
        Self {
            username: username.into(),
            is_admin,
            permissions,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn is_admin(&self) -> bool {
        self.is_admin
    }

    pub fn can_read_stream(&self, stream: &StreamId) -> bool {
        self.permissions.can_read_stream(&self.username, stream)
    }

    pub fn can_read_view(&self, search: &Search) -> bool {
        self.permissions.can_read_view(&self.username, search)
    }

    pub fn owns(&self, search: &Search) -> bool {
        search.owner.as_deref() == Some(self.username.as_str())
    }
}

/// Capability listing every stream known to the platform.
pub trait StreamCatalog: Send + Sync {
    fn stream_ids(&self) -> BTreeSet<StreamId>;
}

/// Computes the full set of streams a user may read, used to normalize
/// queries that declare no streams of their own.
#[derive(Clone)]
pub struct PermittedStreams {
    catalog: Arc<dyn StreamCatalog>,
}

impl PermittedStreams {
    pub fn new(catalog: Arc<dyn StreamCatalog>) -> Self {
        Self { catalog }
    }

    pub fn load(&self, user: &SearchUser) -> BTreeSet<StreamId> {
        self.catalog
            .stream_ids()
            .into_iter()
            .filter(|stream| user.can_read_stream(stream))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StreamListPermissions(Vec<String>);

    impl UserPermissions for StreamListPermissions {
        fn can_read_stream(&self, _username: &str, stream: &str) -> bool {
            self.0.iter().any(|allowed| allowed == stream)
        }

        fn can_read_view(&self, _username: &str, _search: &Search) -> bool {
            true
        }
    }

    struct FixedCatalog(BTreeSet<StreamId>);

    impl StreamCatalog for FixedCatalog {
        fn stream_ids(&self) -> BTreeSet<StreamId> {
            self.0.clone()
        }
    }

    #[test]
    fn permitted_streams_filters_by_readability() {
        let catalog = Arc::new(FixedCatalog(
            ["sales".to_string(), "ops".to_string(), "audit".to_string()].into(),
        ));
        let user = SearchUser::new(
            "alice",
            false,
            Arc::new(StreamListPermissions(vec![
                "sales".to_string(),
                "audit".to_string(),
            ])),
        );

        let permitted = PermittedStreams::new(catalog).load(&user);
        assert_eq!(
            permitted,
            ["sales".to_string(), "audit".to_string()].into_iter().collect()
        );
    }
}

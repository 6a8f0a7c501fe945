use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::search::{Parameter, QueryId, StreamId};

/// Structural description of one query, derived without execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueryMetadata {
    pub used_parameter_names: BTreeSet<String>,
    pub referenced_streams: BTreeSet<StreamId>,
}

/// Per-query metadata keyed by query id plus the search's declared
/// parameters keyed by name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchMetadata {
    pub query_metadata: BTreeMap<QueryId, QueryMetadata>,
    pub declared_parameters: BTreeMap<String, Parameter>,
}

/// Extracts `$name$` parameter references from a query string.
pub fn used_parameter_names(query_string: &str) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    let mut rest = query_string;
    while let Some(start) = rest.find('$') {
        let after = &rest[start + 1..];
        let Some(end) = after.find('$') else {
            break;
        };
        let candidate = &after[..end];
        if !candidate.is_empty()
            && candidate
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            names.insert(candidate.to_string());
            rest = &after[end + 1..];
        } else {
            // Not a parameter reference; the closing dollar may open the next one.
            rest = after;
        }
    }
    names
}

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One distinct key's count within a facet. Keys are rendered through the
/// catalog's key type, so heterogeneous catalogs aggregate into one map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacetCount {
    pub key: String,
    pub count: u32,
}

/// Paged query outcome.
#[derive(Debug, Clone)]
pub struct QueryResult<PK> {
    /// At most `take` primary keys, in sort order.
    pub primary_keys: Vec<PK>,
    /// Candidate count before paging.
    pub total: u32,
    /// Facet counts per requested catalog name. Counts within a catalog
    /// are unordered.
    pub facets: HashMap<String, Vec<FacetCount>>,
    pub elapsed: Duration,
}

impl<PK> QueryResult<PK> {
    /// Facet counts for one catalog as a key -> count map.
    pub fn facet(&self, catalog: &str) -> HashMap<&str, u32> {
        self.facets
            .get(catalog)
            .map(|counts| {
                counts
                    .iter()
                    .map(|count| (count.key.as_str(), count.count))
                    .collect()
            })
            .unwrap_or_default()
    }
}

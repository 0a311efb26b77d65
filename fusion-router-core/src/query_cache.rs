use crate::prelude::graphql::*;
use std::sync::Arc;

/// A cache for parsed GraphQL queries, keyed by the exact document string.
///
/// Parse failures are cached as well so a repeatedly submitted bad document
/// is not reparsed on every request.
#[derive(Debug)]
pub struct QueryCache {
    cache: FifoCache<String, Result<Arc<Query>, PlanError>>,
    metadata: Arc<FusionMetadata>,
}

impl QueryCache {
    /// Instantiate a new cache for parsed GraphQL queries.
    pub fn new(cache_limit: usize, metadata: Arc<FusionMetadata>) -> Self {
        Self {
            cache: FifoCache::new(cache_limit),
            metadata,
        }
    }

    /// Attempt to parse a string to a [`Query`] using the cache if possible.
    pub async fn get_query(&self, query: impl AsRef<str>) -> Result<Arc<Query>, PlanError> {
        let key = query.as_ref().to_string();

        if let Some(cached) = self.cache.get(&key) {
            return cached;
        }

        let query_parsing_future = {
            let metadata = Arc::clone(&self.metadata);
            let key = key.clone();
            tokio::task::spawn_blocking(move || Query::parse(key, &metadata))
        };
        let parsed_query = match query_parsing_future.await {
            Ok(res) => res.map(Arc::new),
            Err(err) => {
                failfast_debug!("parsing query task failed: {}", err);
                Err(PlanError::ParseError {
                    reason: err.to_string(),
                })
            }
        };

        self.cache.insert(key, parsed_query.clone());
        parsed_query
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

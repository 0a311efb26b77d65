use crate::prelude::graphql::*;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A subgraph service is responsible for turning a subgraph request into a
/// graphql response.
///
/// The goal of this trait is to hide the transport: implementations may go
/// over HTTP, an in-process test double, or anything else.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SubgraphService: Send + Sync {
    async fn call(&self, request: SubgraphRequest) -> Result<Response, FetchError>;
}

/// Maintains a map of service names to subgraph services.
#[derive(Default)]
pub struct ServiceRegistry {
    services: HashMap<String, Arc<dyn SubgraphService>>,
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut debug = f.debug_tuple("ServiceRegistry");
        for name in self.services.keys() {
            debug.field(name);
        }
        debug.finish()
    }
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            services: Default::default(),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, service: impl SubgraphService + 'static) {
        self.services.insert(name.into(), Arc::new(service));
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn has(&self, name: impl AsRef<str>) -> bool {
        self.services.contains_key(name.as_ref())
    }

    pub fn get(&self, name: impl AsRef<str>) -> Option<Arc<dyn SubgraphService>> {
        self.services.get(name.as_ref()).map(Arc::clone)
    }
}

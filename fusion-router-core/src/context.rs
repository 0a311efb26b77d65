use crate::prelude::graphql::*;
use indexmap::IndexMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Per-request execution state shared by all plan nodes.
#[derive(Clone, Debug)]
pub struct Context {
    /// The client request being executed.
    pub request: Arc<Request>,

    /// Values published by `@export`-annotated fields.
    pub exports: ExportStore,

    /// Cooperative cancellation, checked before every subgraph fetch.
    pub cancellation: CancellationToken,
}

impl Context {
    pub fn new(request: Arc<Request>) -> Self {
        Self {
            request,
            exports: ExportStore::default(),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(request: Arc<Request>, cancellation: CancellationToken) -> Self {
        Self {
            request,
            exports: ExportStore::default(),
            cancellation,
        }
    }
}

/// The export store: values captured from `@export`-annotated fields while
/// merging subgraph responses, later read back as state variables by
/// dependent execution steps.
///
/// Writes append under a lock. A name keeps every value published for it;
/// single-valued reads return the first, so concurrent sibling fetches
/// observe a stable binding while list-typed consumers see them all.
#[derive(Clone, Debug, Default)]
pub struct ExportStore {
    values: Arc<Mutex<IndexMap<String, Vec<Value>>>>,
}

impl ExportStore {
    pub fn publish(&self, name: impl Into<String>, value: Value) {
        let mut values = self.values.lock().expect("export lock poisoned");
        values.entry(name.into()).or_default().push(value);
    }

    /// The first value published under `name`.
    pub fn get(&self, name: &str) -> Option<Value> {
        self.values
            .lock()
            .expect("export lock poisoned")
            .get(name)
            .and_then(|values| values.first())
            .cloned()
    }

    /// Every value published under `name`, in publication order.
    pub fn all(&self, name: &str) -> Vec<Value> {
        self.values
            .lock()
            .expect("export lock poisoned")
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    /// The first value per name, in publication order.
    pub fn snapshot(&self) -> Object {
        let values = self.values.lock().expect("export lock poisoned");
        let mut snapshot = Object::default();
        for (name, published) in values.iter() {
            if let Some(value) = published.first() {
                snapshot.insert(name.as_str(), value.clone());
            }
        }
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json_bytes::json;

    #[test]
    fn single_valued_reads_see_the_first_publication() {
        let store = ExportStore::default();
        store.publish("userId", json!("1"));
        store.publish("userId", json!("2"));
        assert_eq!(store.get("userId"), Some(json!("1")));
    }

    #[test]
    fn every_publication_is_kept_in_order() {
        let store = ExportStore::default();
        store.publish("userId", json!("1"));
        store.publish("userId", json!("2"));
        assert_eq!(store.all("userId"), vec![json!("1"), json!("2")]);
        assert_eq!(store.all("other"), Vec::<Value>::new());
    }

    #[test]
    fn snapshot_preserves_publication_order() {
        let store = ExportStore::default();
        store.publish("b", json!(2));
        store.publish("a", json!(1));
        let keys: Vec<_> = store
            .snapshot()
            .keys()
            .map(|k| k.as_str().to_string())
            .collect();
        assert_eq!(keys, ["b", "a"]);
    }
}

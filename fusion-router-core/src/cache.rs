use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::Mutex;

/// A bounded cache with strict FIFO-by-insertion eviction.
///
/// When capacity is exceeded the oldest *inserted* entry is evicted,
/// regardless of how recently it was read. The cache is an explicit object
/// owned by the planner session, not process-wide state.
#[derive(Debug)]
pub struct FifoCache<K, V> {
    inner: Mutex<FifoCacheInner<K, V>>,
    capacity: usize,
}

#[derive(Debug)]
struct FifoCacheInner<K, V> {
    map: HashMap<K, V>,
    insertion_order: VecDeque<K>,
}

impl<K, V> FifoCache<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone,
{
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "cache capacity must be non-zero");
        Self {
            inner: Mutex::new(FifoCacheInner {
                map: HashMap::with_capacity(capacity),
                insertion_order: VecDeque::with_capacity(capacity),
            }),
            capacity,
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let inner = self.inner.lock().expect("cache lock poisoned");
        inner.map.get(key).cloned()
    }

    /// Insert a value, evicting the least recently *inserted* entry if the
    /// capacity is exceeded. Re-inserting an existing key updates the value
    /// without refreshing its position in the eviction order.
    pub fn insert(&self, key: K, value: V) {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        if inner.map.insert(key.clone(), value).is_none() {
            inner.insertion_order.push_back(key);
            if inner.insertion_order.len() > self.capacity {
                if let Some(oldest) = inner.insertion_order.pop_front() {
                    inner.map.remove(&oldest);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("cache lock poisoned").map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

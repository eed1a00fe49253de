//! Bounded cache of recent outbound messages, keyed by message id.
//!
//! The network can ask for redelivery of a recently sent message; the
//! supervisor answers from this cache. Bounded at 1000 entries; overflow
//! evicts the oldest half in one operation.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use herald_transport::OutgoingMessage;

const CAPACITY: usize = 1000;

struct Inner {
    by_id: HashMap<String, OutgoingMessage>,
    order: VecDeque<String>,
}

pub struct RetryCache {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl Default for RetryCache {
    fn default() -> Self {
        Self::new(CAPACITY)
    }
}

impl RetryCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                by_id: HashMap::new(),
                order: VecDeque::new(),
            }),
            capacity,
        }
    }

    pub fn insert(&self, id: &str, message: OutgoingMessage) {
        let mut inner = self.inner.lock();
        if inner.by_id.insert(id.to_string(), message).is_none() {
            inner.order.push_back(id.to_string());
        }
        if inner.order.len() > self.capacity {
            let evict = inner.order.len() / 2;
            for _ in 0..evict {
                if let Some(old) = inner.order.pop_front() {
                    inner.by_id.remove(&old);
                }
            }
            tracing::debug!(evicted = evict, "retry cache purged oldest half");
        }
    }

    pub fn get(&self, id: &str) -> Option<OutgoingMessage> {
        self.inner.lock().by_id.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.by_id.clear();
        inner.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(n: usize) -> OutgoingMessage {
        OutgoingMessage::text(format!("m{n}"))
    }

    #[test]
    fn insert_and_get() {
        let cache = RetryCache::new(10);
        cache.insert("a", msg(1));
        assert_eq!(cache.get("a").unwrap().text.unwrap(), "m1");
        assert!(cache.get("b").is_none());
    }

    #[test]
    fn overflow_evicts_oldest_half() {
        let cache = RetryCache::new(4);
        for i in 0..5 {
            cache.insert(&format!("id{i}"), msg(i));
        }
        // 5 > 4: the oldest two (id0, id1) are gone in one purge.
        assert_eq!(cache.len(), 3);
        assert!(cache.get("id0").is_none());
        assert!(cache.get("id1").is_none());
        assert!(cache.get("id4").is_some());
    }

    #[test]
    fn reinsert_same_id_does_not_duplicate() {
        let cache = RetryCache::new(4);
        cache.insert("a", msg(1));
        cache.insert("a", msg(2));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("a").unwrap().text.unwrap(), "m2");
    }
}

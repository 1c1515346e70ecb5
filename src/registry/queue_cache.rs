// CLASSIFICATION: COMMUNITY
// Filename: queue_cache.rs v0.4
// Date Modified: 2026-12-03
// Author: Lukas Bower

//! One cached command queue per execution context.
//!
//! Entries are append-only: native queue release has a history of
//! corrupting driver state, so the engine quarantines these handles and
//! only tracks logical reference counts. The cached queue is reused for
//! every internal operation in its context.

use std::collections::HashMap;
use std::sync::Mutex;

use log::warn;

use crate::error::RuntimeError;
use crate::runtime::{ContextId, QueueId};

#[derive(Debug, Clone)]
struct Entry {
    queue: QueueId,
    ref_count: i64,
}

#[derive(Default)]
pub struct QueueCache {
    inner: Mutex<HashMap<u64, Entry>>,
}

impl QueueCache {
    /// Record a user-created queue for its context. Only the first queue
    /// per context is kept.
    pub fn insert_user_queue(&self, ctx: ContextId, queue: QueueId) {
        let mut map = self.inner.lock().unwrap();
        if map.contains_key(&ctx.0) {
            warn!("queue cache already holds a queue for context {ctx:?}");
            return;
        }
        map.insert(
            ctx.0,
            Entry {
                queue,
                ref_count: 1,
            },
        );
    }

    /// The cached queue for a context, creating one lazily through
    /// `make` when the context has none yet.
    pub fn get_or_create<F>(&self, ctx: ContextId, make: F) -> Result<QueueId, RuntimeError>
    where
        F: FnOnce() -> Result<QueueId, RuntimeError>,
    {
        let mut map = self.inner.lock().unwrap();
        if let Some(entry) = map.get(&ctx.0) {
            return Ok(entry.queue);
        }
        let queue = make()?;
        map.insert(
            ctx.0,
            Entry {
                queue,
                ref_count: 1,
            },
        );
        Ok(queue)
    }

    pub fn lookup(&self, ctx: ContextId) -> Option<QueueId> {
        self.inner.lock().unwrap().get(&ctx.0).map(|e| e.queue)
    }

    pub fn retain(&self, ctx: ContextId) {
        if let Some(entry) = self.inner.lock().unwrap().get_mut(&ctx.0) {
            entry.ref_count += 1;
        }
    }

    /// Logical release only. The entry stays; the native queue is never
    /// destroyed.
    pub fn release(&self, ctx: ContextId) {
        if let Some(entry) = self.inner.lock().unwrap().get_mut(&ctx.0) {
            entry.ref_count -= 1;
        }
    }

    pub fn logical_refs(&self, ctx: ContextId) -> Option<i64> {
        self.inner.lock().unwrap().get(&ctx.0).map(|e| e.ref_count)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_most_one_queue_per_context() {
        let cache = QueueCache::default();
        cache.insert_user_queue(ContextId(1), QueueId(10));
        cache.insert_user_queue(ContextId(1), QueueId(11));
        assert_eq!(cache.lookup(ContextId(1)), Some(QueueId(10)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn release_never_evicts() {
        let cache = QueueCache::default();
        cache.insert_user_queue(ContextId(2), QueueId(20));
        cache.release(ContextId(2));
        cache.release(ContextId(2));
        assert_eq!(cache.lookup(ContextId(2)), Some(QueueId(20)));
        assert_eq!(cache.logical_refs(ContextId(2)), Some(-1));
    }

    #[test]
    fn lazily_creates_once() {
        let cache = QueueCache::default();
        let q = cache
            .get_or_create(ContextId(3), || Ok(QueueId(30)))
            .unwrap();
        assert_eq!(q, QueueId(30));
        let q = cache
            .get_or_create(ContextId(3), || panic!("must not be called"))
            .unwrap();
        assert_eq!(q, QueueId(30));
    }
}

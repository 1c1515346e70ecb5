// CLASSIFICATION: COMMUNITY
// Filename: svm_pool.rs v0.5
// Date Modified: 2027-01-08
// Author: Lukas Bower

//! Reuse pool for fine-grained shared allocations.
//!
//! The underlying runtime does not reliably reclaim the fine-grained
//! subclass, so the engine never issues a real free for it: released
//! regions move to a size-keyed free list and new requests are served
//! best-fit from there before falling through to a real allocation. The
//! coarse-grained subclass must never enter this pool.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use crate::runtime::{ContextId, MemFlags};

/// One pooled padded allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolRegion {
    pub base: u64,
    pub size: usize,
    pub alignment: usize,
}

#[derive(Default)]
struct PoolState {
    allocated: HashMap<u64, PoolRegion>,
    /// Size-keyed free multimap.
    free: BTreeMap<usize, Vec<PoolRegion>>,
}

#[derive(Default)]
pub struct SvmPool {
    inner: Mutex<HashMap<u64, PoolState>>,
}

impl SvmPool {
    /// True when the allocation class must be served through the pool.
    pub fn manages(flags: MemFlags) -> bool {
        flags.contains(MemFlags::SVM_FINE_GRAIN)
    }

    /// Record a fresh fine-grained allocation as live.
    pub fn note_alloc(&self, ctx: ContextId, region: PoolRegion) {
        let mut pools = self.inner.lock().unwrap();
        let pool = pools.entry(ctx.0).or_default();
        pool.allocated.insert(region.base, region);
    }

    /// Move a live region to the free list instead of really freeing it.
    /// Returns false when the pointer was never pool-tracked, meaning the
    /// caller should issue a real free.
    pub fn quarantine(&self, ctx: ContextId, base: u64) -> bool {
        let mut pools = self.inner.lock().unwrap();
        let Some(pool) = pools.get_mut(&ctx.0) else {
            return false;
        };
        let Some(region) = pool.allocated.remove(&base) else {
            return false;
        };
        pool.free.entry(region.size).or_default().push(region);
        true
    }

    /// Best-fit reuse: smallest free region of at least `size` bytes with
    /// the requested alignment. The returned region moves back to the
    /// allocated set; its previous contents are unspecified.
    pub fn take(&self, ctx: ContextId, size: usize, alignment: usize) -> Option<PoolRegion> {
        let mut pools = self.inner.lock().unwrap();
        let pool = pools.get_mut(&ctx.0)?;
        let mut picked: Option<(usize, usize)> = None;
        'outer: for (&sz, regions) in pool.free.range(size..) {
            for (i, region) in regions.iter().enumerate() {
                if region.alignment == alignment {
                    picked = Some((sz, i));
                    break 'outer;
                }
            }
        }
        let (sz, i) = picked?;
        let regions = pool.free.get_mut(&sz).unwrap();
        let region = regions.swap_remove(i);
        if regions.is_empty() {
            pool.free.remove(&sz);
        }
        pool.allocated.insert(region.base, region);
        Some(region)
    }

    /// Number of regions currently live (allocated, not on the free list).
    pub fn live_count(&self, ctx: ContextId) -> usize {
        self.inner
            .lock()
            .unwrap()
            .get(&ctx.0)
            .map(|p| p.allocated.len())
            .unwrap_or(0)
    }

    /// Total regions ever retained by the pool for a context.
    pub fn tracked_count(&self, ctx: ContextId) -> usize {
        self.inner
            .lock()
            .unwrap()
            .get(&ctx.0)
            .map(|p| p.allocated.len() + p.free.values().map(Vec::len).sum::<usize>())
            .unwrap_or(0)
    }
}

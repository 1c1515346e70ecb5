// CLASSIFICATION: COMMUNITY
// Filename: memory.rs v0.6
// Date Modified: 2027-01-12
// Author: Lukas Bower

//! Region descriptors for buffers, sub-buffers, images, and shared memory.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use crate::layout::{ImageDesc, ImageFormat, ImageLayout};
use crate::runtime::{ContextId, MemFlags, MemId, SvmPtr};

/// Image metadata carried by a tracked region.
#[derive(Debug, Clone)]
pub struct ImageInfo {
    pub format: ImageFormat,
    /// Logical (user-visible) descriptor, normalized for its class.
    pub desc: ImageDesc,
    pub layout: ImageLayout,
}

/// One tracked memory region.
///
/// For padded buffers `handle` is the user-visible sub-region view and
/// `parent` the padded allocation underneath it. `size` is always the
/// user-visible byte size, excluding padding.
#[derive(Debug, Clone)]
pub struct MemRecord {
    pub handle: MemId,
    pub context: ContextId,
    pub flags: MemFlags,
    pub size: usize,
    pub has_canary: bool,
    pub is_sub: bool,
    /// Origin of the user bytes inside the parent allocation.
    pub origin: usize,
    pub parent: Option<MemId>,
    pub image: Option<ImageInfo>,
    /// Caller-owned backing storage; the engine must not grow it.
    pub host_backed: bool,
    pub ref_count: u32,
    /// Created by the engine itself; excluded from user accounting and
    /// from the shared-memory verification sweep.
    pub is_internal: bool,
}

impl MemRecord {
    pub fn is_image(&self) -> bool {
        self.image.is_some()
    }
}

/// Registry of tracked regions. Lookups return owned snapshots; updates
/// replace whole records.
#[derive(Default)]
pub struct MemRegistry {
    inner: Mutex<HashMap<u64, MemRecord>>,
}

impl MemRegistry {
    pub fn insert(&self, rec: MemRecord) {
        self.inner.lock().unwrap().insert(rec.handle.0, rec);
    }

    pub fn find(&self, mem: MemId) -> Option<MemRecord> {
        self.inner.lock().unwrap().get(&mem.0).cloned()
    }

    /// Bump the logical reference count; returns the new count.
    pub fn retain(&self, mem: MemId) -> Option<u32> {
        let mut map = self.inner.lock().unwrap();
        let rec = map.get_mut(&mem.0)?;
        rec.ref_count += 1;
        Some(rec.ref_count)
    }

    /// Drop one logical reference. At zero the record is removed and
    /// returned so the caller can release the underlying allocations.
    pub fn release(&self, mem: MemId) -> Option<(u32, Option<MemRecord>)> {
        let mut map = self.inner.lock().unwrap();
        let rec = map.get_mut(&mem.0)?;
        rec.ref_count = rec.ref_count.saturating_sub(1);
        let count = rec.ref_count;
        if count == 0 {
            let dead = map.remove(&mem.0);
            Some((0, dead))
        } else {
            Some((count, None))
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }
}

/// One tracked shared-virtual-memory region, addressed by pointer value.
#[derive(Debug, Clone)]
pub struct SvmRecord {
    /// User-visible base pointer.
    pub handle: SvmPtr,
    /// Base of the padded allocation underneath.
    pub base: SvmPtr,
    pub context: ContextId,
    pub flags: MemFlags,
    /// User-visible byte size, excluding padding.
    pub size: usize,
    pub alignment: usize,
    pub is_internal: bool,
}

/// Registry of shared regions, ordered by base pointer so any interior
/// pointer resolves to its containing region.
#[derive(Default)]
pub struct SvmRegistry {
    inner: Mutex<BTreeMap<u64, SvmRecord>>,
}

impl SvmRegistry {
    pub fn insert(&self, rec: SvmRecord) {
        self.inner.lock().unwrap().insert(rec.handle.0, rec);
    }

    pub fn find(&self, ptr: SvmPtr) -> Option<SvmRecord> {
        self.inner.lock().unwrap().get(&ptr.0).cloned()
    }

    /// Resolve any pointer inside `[handle, handle + size)`.
    pub fn find_containing(&self, ptr: SvmPtr) -> Option<SvmRecord> {
        let map = self.inner.lock().unwrap();
        let (_, rec) = map.range(..=ptr.0).next_back()?;
        if ptr.0 < rec.handle.0 + rec.size as u64 {
            Some(rec.clone())
        } else {
            None
        }
    }

    pub fn remove(&self, ptr: SvmPtr) -> Option<SvmRecord> {
        self.inner.lock().unwrap().remove(&ptr.0)
    }

    /// Snapshot of every live region, in pointer order.
    pub fn snapshot(&self) -> Vec<SvmRecord> {
        self.inner.lock().unwrap().values().cloned().collect()
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

    fn rec(handle: u64, size: usize) -> SvmRecord {
        SvmRecord {
            handle: SvmPtr(handle),
            base: SvmPtr(handle),
            context: ContextId(1),
            flags: MemFlags::READ_WRITE,
            size,
            alignment: 0,
            is_internal: false,
        }
    }

    #[test]
    fn interior_pointer_resolves() {
        let reg = SvmRegistry::default();
        reg.insert(rec(0x1000, 256));
        reg.insert(rec(0x2000, 64));
        assert_eq!(
            reg.find_containing(SvmPtr(0x1080)).unwrap().handle,
            SvmPtr(0x1000)
        );
        assert_eq!(
            reg.find_containing(SvmPtr(0x2000)).unwrap().handle,
            SvmPtr(0x2000)
        );
        assert!(reg.find_containing(SvmPtr(0x1100)).is_none());
        assert!(reg.find_containing(SvmPtr(0x500)).is_none());
    }

    #[test]
    fn release_at_zero_returns_record() {
        let reg = MemRegistry::default();
        reg.insert(MemRecord {
            handle: MemId(9),
            context: ContextId(1),
            flags: MemFlags::READ_WRITE,
            size: 128,
            has_canary: true,
            is_sub: false,
            origin: 0,
            parent: Some(MemId(8)),
            image: None,
            host_backed: false,
            ref_count: 1,
            is_internal: false,
        });
        reg.retain(MemId(9));
        assert_eq!(reg.release(MemId(9)).unwrap().0, 1);
        let (count, dead) = reg.release(MemId(9)).unwrap();
        assert_eq!(count, 0);
        assert_eq!(dead.unwrap().parent, Some(MemId(8)));
        assert!(reg.find(MemId(9)).is_none());
    }
}

// CLASSIFICATION: COMMUNITY
// Filename: kernel.rs v0.4
// Date Modified: 2026-12-03
// Author: Lukas Bower

//! Per-kernel argument tables.
//!
//! Each argument slot is replaced wholesale when the same index is set
//! again; the resolved region (if any) rides along so launch-time code
//! never re-parses raw bytes.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use crate::runtime::{ArgValue, KernelId, MemId, SvmPtr};

/// One recorded kernel argument.
#[derive(Debug, Clone)]
pub struct KernelArg {
    pub index: u32,
    pub value: ArgValue,
    /// Tracked region the argument denotes, when it is a memory handle.
    pub mem: Option<MemId>,
    /// Base pointer of the tracked shared region the argument points into.
    pub svm: Option<SvmPtr>,
}

/// Argument list and logical reference count for one kernel object.
#[derive(Debug, Clone)]
pub struct KernelRecord {
    pub handle: KernelId,
    pub name: String,
    pub args: BTreeMap<u32, KernelArg>,
    pub ref_count: u32,
}

/// Registry of in-flight kernel argument lists.
#[derive(Default)]
pub struct KernelRegistry {
    inner: Mutex<HashMap<u64, KernelRecord>>,
}

impl KernelRegistry {
    /// Record an argument, creating the kernel record on first contact.
    pub fn set_arg(&self, kernel: KernelId, name: &str, arg: KernelArg) {
        let mut map = self.inner.lock().unwrap();
        let rec = map.entry(kernel.0).or_insert_with(|| KernelRecord {
            handle: kernel,
            name: name.to_owned(),
            args: BTreeMap::new(),
            ref_count: 1,
        });
        rec.args.insert(arg.index, arg);
    }

    pub fn find(&self, kernel: KernelId) -> Option<KernelRecord> {
        self.inner.lock().unwrap().get(&kernel.0).cloned()
    }

    pub fn retain(&self, kernel: KernelId) {
        if let Some(rec) = self.inner.lock().unwrap().get_mut(&kernel.0) {
            rec.ref_count += 1;
        }
    }

    /// Drop one logical reference; the record goes away at zero.
    pub fn release(&self, kernel: KernelId) {
        let mut map = self.inner.lock().unwrap();
        if let Some(rec) = map.get_mut(&kernel.0) {
            rec.ref_count = rec.ref_count.saturating_sub(1);
            if rec.ref_count == 0 {
                map.remove(&kernel.0);
            }
        }
    }

    pub fn remove(&self, kernel: KernelId) -> Option<KernelRecord> {
        self.inner.lock().unwrap().remove(&kernel.0)
    }
}

// CLASSIFICATION: COMMUNITY
// Filename: event.rs v0.3
// Date Modified: 2026-11-20
// Author: Lukas Bower

//! External-to-internal completion signal aliases.
//!
//! When the engine splits one user operation into several internal steps,
//! the signal handed back to the caller is not the one that carries the
//! real operation's timing. This table maps the external signal to the
//! internal one so profiling queries land on the right event, and so the
//! internal event is released exactly when the external one dies.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::runtime::EventId;

#[derive(Debug, Clone)]
struct Alias {
    internal: Option<EventId>,
    ref_count: u32,
}

#[derive(Default)]
pub struct EventAliasTable {
    inner: Mutex<HashMap<u64, Alias>>,
}

impl EventAliasTable {
    /// Map an external signal to the internal signal carrying its timing.
    pub fn insert(&self, external: EventId, internal: EventId) {
        let mut map = self.inner.lock().unwrap();
        let entry = map.entry(external.0).or_insert(Alias {
            internal: None,
            ref_count: 1,
        });
        entry.internal = Some(internal);
    }

    /// The event profiling queries should actually look at.
    pub fn profiling_target(&self, external: EventId) -> EventId {
        self.inner
            .lock()
            .unwrap()
            .get(&external.0)
            .and_then(|a| a.internal)
            .unwrap_or(external)
    }

    pub fn retain(&self, external: EventId) {
        let mut map = self.inner.lock().unwrap();
        let entry = map.entry(external.0).or_insert(Alias {
            internal: None,
            ref_count: 1,
        });
        entry.ref_count += 1;
    }

    /// Drop one reference. Returns the internal event to release when the
    /// external signal's count reached zero.
    pub fn release(&self, external: EventId) -> Option<EventId> {
        let mut map = self.inner.lock().unwrap();
        let entry = map.get_mut(&external.0)?;
        entry.ref_count = entry.ref_count.saturating_sub(1);
        if entry.ref_count == 0 {
            let internal = entry.internal;
            map.remove(&external.0);
            internal
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profiling_redirects_until_last_release() {
        let table = EventAliasTable::default();
        let ext = EventId(100);
        let int = EventId(101);
        table.insert(ext, int);
        assert_eq!(table.profiling_target(ext), int);
        table.retain(ext);
        assert_eq!(table.release(ext), None);
        assert_eq!(table.release(ext), Some(int));
        // Alias gone; queries fall through to the external event itself.
        assert_eq!(table.profiling_target(ext), ext);
    }
}

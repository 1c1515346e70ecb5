// CLASSIFICATION: COMMUNITY
// Filename: stats.rs v0.5
// Date Modified: 2026-12-19
// Author: Lukas Bower

//! Append-only CSV performance counters.
//!
//! One sink per engine, one output file per run. The header row matches
//! whichever statistic class is enabled; rows are appended as launches
//! complete and the memory-overhead summary lands at teardown.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use log::warn;

use crate::config::StatsMode;

/// Memory accounting counters, user vs engine overhead bytes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MemCounters {
    pub total_user: u64,
    pub total_overhead: u64,
    pub current_user: u64,
    pub current_overhead: u64,
    pub high_user: u64,
    pub high_overhead: u64,
}

/// Interior-locked accounting, gated on the overhead statistic.
pub struct MemAccounting {
    enabled: bool,
    inner: Mutex<MemCounters>,
}

impl MemAccounting {
    pub fn new(mode: StatsMode) -> Self {
        MemAccounting {
            enabled: mode.contains(StatsMode::MEM_OVERHEAD),
            inner: Mutex::new(MemCounters::default()),
        }
    }

    pub fn on_alloc(&self, user_bytes: u64, overhead_bytes: u64) {
        if !self.enabled {
            return;
        }
        let mut c = self.inner.lock().unwrap();
        c.total_user += user_bytes;
        c.current_user += user_bytes;
        c.total_overhead += overhead_bytes;
        c.current_overhead += overhead_bytes;
        c.high_user = c.high_user.max(c.current_user);
        c.high_overhead = c.high_overhead.max(c.current_overhead);
    }

    pub fn on_free(&self, user_bytes: u64, overhead_bytes: u64) {
        if !self.enabled {
            return;
        }
        let mut c = self.inner.lock().unwrap();
        c.current_user = c.current_user.saturating_sub(user_bytes);
        c.current_overhead = c.current_overhead.saturating_sub(overhead_bytes);
    }

    pub fn snapshot(&self) -> MemCounters {
        *self.inner.lock().unwrap()
    }
}

/// The CSV sink itself.
pub struct StatsSink {
    mode: StatsMode,
    path: Option<PathBuf>,
    file: Mutex<Option<File>>,
}

impl StatsSink {
    pub fn new(mode: StatsMode, prefix: &str) -> Self {
        let path = if mode.is_empty() {
            None
        } else {
            Some(PathBuf::from(format!("{prefix}canaryguard_stats.csv")))
        };
        let file = path.as_ref().and_then(|p| {
            let created = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(p);
            match created {
                Ok(mut f) => {
                    let header = if mode.contains(StatsMode::KERN_ENQ_TIME) {
                        "total_durr_us, enq_durr_us, checker_enqueue_overhead_us"
                    } else if mode.contains(StatsMode::CHECKER_TIME) {
                        "checker_time_us"
                    } else {
                        "total_user_mem_B, total_overhead_mem_B, high_user_mem_B, high_overhead_mem_B"
                    };
                    let _ = writeln!(f, "{header}");
                    Some(f)
                }
                Err(e) => {
                    warn!("could not create stats file {}: {e}", p.display());
                    None
                }
            }
        });
        StatsSink {
            mode,
            path,
            file: Mutex::new(file),
        }
    }

    pub fn mode(&self) -> StatsMode {
        self.mode
    }

    pub fn output_path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }

    fn append(&self, line: &str) {
        if let Some(f) = self.file.lock().unwrap().as_mut() {
            let _ = writeln!(f, "{line}");
        }
    }

    /// Per-launch wrapper timing: full wrapper time vs real enqueue time.
    pub fn launch_timing(&self, total_us: u64, enq_us: u64) {
        if self.mode.contains(StatsMode::KERN_ENQ_TIME) {
            self.append(&format!(
                "{total_us}, {enq_us}, {}",
                total_us.saturating_sub(enq_us)
            ));
        }
    }

    /// Accumulated checker-kernel device time for one launch.
    pub fn checker_time(&self, us: u64) {
        if self.mode.contains(StatsMode::CHECKER_TIME) {
            self.append(&format!("{us}"));
        }
    }

    /// Memory-overhead summary row, written at engine teardown.
    pub fn mem_overhead(&self, c: MemCounters) {
        if self.mode.contains(StatsMode::MEM_OVERHEAD) {
            self.append(&format!(
                "{}, {}, {}, {}",
                c.total_user, c.total_overhead, c.high_user, c.high_overhead
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accounting_tracks_high_water() {
        let acc = MemAccounting::new(StatsMode::MEM_OVERHEAD);
        acc.on_alloc(100, 10);
        acc.on_alloc(50, 5);
        acc.on_free(100, 10);
        acc.on_alloc(20, 2);
        let c = acc.snapshot();
        assert_eq!(c.total_user, 170);
        assert_eq!(c.current_user, 70);
        assert_eq!(c.high_user, 150);
        assert_eq!(c.high_overhead, 15);
    }

    #[test]
    fn accounting_disabled_is_inert() {
        let acc = MemAccounting::new(StatsMode::empty());
        acc.on_alloc(100, 10);
        assert_eq!(acc.snapshot(), MemCounters::default());
    }
}

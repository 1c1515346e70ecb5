// CLASSIFICATION: COMMUNITY
// Filename: report.rs v0.7
// Date Modified: 2027-01-13
// Author: Lukas Bower

//! Corruption and bounds-violation reporting.
//!
//! Detection never unwinds: findings are logged to stderr, appended to the
//! optional log file, counted, and retained for inspection. The process
//! only dies here when the configuration asks for it.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use log::{error, warn};

use crate::config::DetectorConfig;
use crate::layout::ImageOverflowLoc;
use crate::runtime::{MemId, SvmPtr};

/// The region a finding refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionRef {
    Mem(MemId),
    Svm(SvmPtr),
}

/// Where in a region's padding the first corrupted byte sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorruptionSite {
    /// Offset into the trailing canary run; 0 is the first byte past the
    /// logical end.
    PastEnd { offset: u32 },
    /// Offset into the leading canary run (underflow checking only).
    BeforeStart { offset: u32 },
    /// Dimensional location inside an image's canary slabs.
    Image(ImageOverflowLoc),
}

/// What class of condition a finding records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindingKind {
    /// A tracked region's padding was overwritten by a kernel.
    CanaryCorruption,
    /// A data-transfer call's explicit arguments reached past a region's
    /// logical size; the transfer was skipped.
    ApiBoundsViolation { call: &'static str },
}

/// One reported condition.
#[derive(Debug, Clone)]
pub struct Finding {
    pub kind: FindingKind,
    pub region: RegionRef,
    pub kernel: Option<String>,
    pub arg_index: Option<u32>,
    pub site: CorruptionSite,
    /// Duplicate-argument advisory: `(index, first_index)` pairs for
    /// arguments aliasing an earlier one. Informational only.
    pub duplicates: Vec<(u32, u32)>,
    pub backtrace: Option<String>,
}

/// Sink for findings. Owned by the engine state, shared by reference.
pub struct Reporter {
    exit_on_overflow: bool,
    error_exitcode: i32,
    print_backtrace: bool,
    log: Mutex<Option<File>>,
    overflow_count: AtomicU64,
    findings: Mutex<Vec<Finding>>,
}

impl Reporter {
    pub fn new(config: &DetectorConfig) -> Self {
        let log = config.log_location.as_ref().and_then(|path| {
            match OpenOptions::new().create(true).append(true).open(path) {
                Ok(mut f) => {
                    let _ = writeln!(f, "Beginning buffer overflow detection run.");
                    Some(f)
                }
                Err(e) => {
                    warn!("could not open detector log {}: {e}", path.display());
                    None
                }
            }
        });
        Reporter {
            exit_on_overflow: config.exit_on_overflow,
            error_exitcode: config.error_exitcode,
            print_backtrace: config.print_backtrace,
            log: Mutex::new(log),
            overflow_count: AtomicU64::new(0),
            findings: Mutex::new(Vec::new()),
        }
    }

    /// Call-site backtrace string, when configured.
    pub fn capture_backtrace(&self) -> Option<String> {
        if self.print_backtrace {
            Some(std::backtrace::Backtrace::force_capture().to_string())
        } else {
            None
        }
    }

    fn describe_site(site: &CorruptionSite) -> String {
        match site {
            CorruptionSite::PastEnd { offset } => {
                format!("first observed writing {} byte(s) past the end", offset + 1)
            }
            CorruptionSite::BeforeStart { offset } => {
                format!(
                    "first observed writing {} byte(s) before the start",
                    offset + 1
                )
            }
            CorruptionSite::Image(ImageOverflowLoc::RowEnd {
                cols_past,
                row,
                slice,
            }) => format!(
                "first dimension overflow at row {row}, depth {slice}, {} column(s) past end",
                cols_past + 1
            ),
            CorruptionSite::Image(ImageOverflowLoc::SliceEnd { rows_past, slice }) => format!(
                "second dimension overflow at depth {slice}, {} row(s) past end",
                rows_past + 1
            ),
            CorruptionSite::Image(ImageOverflowLoc::Tail { slices_past }) => {
                format!("third dimension overflow {} slice(s) past end", slices_past + 1)
            }
        }
    }

    fn write_log_line(&self, line: &str) {
        if let Some(f) = self.log.lock().unwrap().as_mut() {
            let _ = writeln!(f, "{line}");
        }
    }

    /// Record one finding. Fatal only when configured so.
    pub fn report(&self, finding: Finding) {
        self.overflow_count.fetch_add(1, Ordering::Relaxed);
        let what = match finding.kind {
            FindingKind::CanaryCorruption => "Buffer overflow detected".to_owned(),
            FindingKind::ApiBoundsViolation { call } => {
                format!("Bounds violation in {call}; transfer skipped")
            }
        };
        let region = match finding.region {
            RegionRef::Mem(m) => format!("buffer {:#x}", m.0),
            RegionRef::Svm(p) => format!("shared pointer {:#x}", p.0),
        };
        let place = match (&finding.kernel, finding.arg_index) {
            (Some(k), Some(i)) => format!(" (kernel {k}, argument {i})"),
            (Some(k), None) => format!(" (kernel {k})"),
            _ => String::new(),
        };
        let site = Self::describe_site(&finding.site);
        error!("{what}: {region}{place}: {site}");
        self.write_log_line(&format!("{what}: {region}{place}: {site}"));

        if !finding.duplicates.is_empty() {
            warn!("some of this kernel's arguments point to identical buffers");
            for (idx, first) in &finding.duplicates {
                warn!("    argument {idx} is the same buffer as argument {first}");
            }
        }
        if let Some(bt) = &finding.backtrace {
            self.write_log_line(bt);
            error!("{bt}");
        }
        self.findings.lock().unwrap().push(finding);

        if self.exit_on_overflow {
            error!("exiting application because of buffer overflow");
            self.finalize();
            std::process::exit(self.error_exitcode);
        }
    }

    /// Total conditions observed so far.
    pub fn overflow_total(&self) -> u64 {
        self.overflow_count.load(Ordering::Relaxed)
    }

    /// Drain retained findings (test and embedding hook).
    pub fn take_findings(&self) -> Vec<Finding> {
        std::mem::take(&mut self.findings.lock().unwrap())
    }

    /// Write the closing summary to the log file.
    pub fn finalize(&self) {
        let total = self.overflow_total();
        self.write_log_line("Buffer overflow detection complete.");
        self.write_log_line(&format!("Found a total of {total} errors."));
    }
}

/// Build the advisory pairs out of a duplicate map.
pub fn dupe_pairs(dupe: &[u32]) -> Vec<(u32, u32)> {
    dupe.iter()
        .enumerate()
        .filter(|(i, &first)| first != *i as u32)
        .map(|(i, &first)| (i as u32, first))
        .collect()
}

// CLASSIFICATION: COMMUNITY
// Filename: common.rs v0.8
// Date Modified: 2027-01-16
// Author: Lukas Bower

//! Shared verification plumbing: the result buffer, the readback, and the
//! analysis continuation.
//!
//! A [`CheckTicket`] owns everything the deferred analysis needs: region
//! identities, the raw result slots, the duplicate map, and the scratch
//! resources to free. Nothing in the continuation reaches back into
//! ambient state it does not own.

use std::sync::{Arc, Mutex};

use log::error;

use crate::engine::EngineState;
use crate::error::DetectorResult;
use crate::layout::{ImageLayout, POISON_FILL_LENGTH};
use crate::report::{dupe_pairs, CorruptionSite, Finding, FindingKind, RegionRef};
use crate::runtime::{
    ComputeRuntime, ContextId, EventId, HostBuf, KernelId, MemId, QueueId, SvmPtr,
};
use crate::transfer;

/// No-corruption sentinel in a result slot.
pub(crate) const CLEAN: u32 = u32::MAX;

/// How a region's raw result offsets map back to a corruption site.
pub(crate) enum SiteMap {
    /// One slot, an offset into the trailing canary run.
    Trailing,
    /// Two slots, trailing then leading; merged by shifting the trailing
    /// offset past the leading run and taking the minimum.
    Split,
    /// One slot, a byte offset into the flattened image canary stream.
    ImageStream { elem: usize, layout: ImageLayout },
}

/// One verified region inside a ticket.
pub(crate) struct CheckedRegion {
    pub region: RegionRef,
    pub arg_index: Option<u32>,
    pub site: SiteMap,
    pub first_slot: usize,
    pub num_slots: usize,
}

/// Engine-owned resources released after analysis. Buffer entries carry
/// their byte size for the overhead accounting.
pub(crate) enum Scratch {
    Mem(MemId, usize),
    Svm(ContextId, SvmPtr),
    Kernel(KernelId),
}

/// Deferred verification analysis: reports findings and frees scratch.
pub(crate) struct CheckTicket<R: ComputeRuntime> {
    pub state: Arc<EngineState<R>>,
    pub kernel_name: Option<String>,
    pub regions: Vec<CheckedRegion>,
    pub dupe: Vec<u32>,
    pub backtrace: Option<String>,
    pub results: HostBuf,
    pub cleanup: Vec<Scratch>,
}

impl<R: ComputeRuntime> CheckTicket<R> {
    fn site_for(map: &SiteMap, slots: &[u32]) -> Option<CorruptionSite> {
        match map {
            SiteMap::Trailing => {
                let offset = *slots.first()?;
                (offset != CLEAN).then_some(CorruptionSite::PastEnd { offset })
            }
            SiteMap::Split => {
                let trailing = slots.first().copied().unwrap_or(CLEAN);
                let leading = slots.get(1).copied().unwrap_or(CLEAN);
                let merged = leading.min(trailing.saturating_add(POISON_FILL_LENGTH as u32));
                if merged == CLEAN {
                    return None;
                }
                if merged < POISON_FILL_LENGTH as u32 {
                    Some(CorruptionSite::BeforeStart { offset: merged })
                } else {
                    Some(CorruptionSite::PastEnd {
                        offset: merged - POISON_FILL_LENGTH as u32,
                    })
                }
            }
            SiteMap::ImageStream { elem, layout } => {
                let offset = *slots.first()?;
                if offset == CLEAN {
                    return None;
                }
                match layout.locate(offset as usize / elem) {
                    Some(loc) => Some(CorruptionSite::Image(loc)),
                    None => Some(CorruptionSite::PastEnd { offset }),
                }
            }
        }
    }

    /// Parse the result slots, report every corrupted region, then free
    /// the scratch resources. Consumes the ticket.
    pub fn analyze(self) {
        let raw: Vec<u32> = {
            let bytes = self.results.lock().unwrap();
            bytes
                .chunks_exact(4)
                .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect()
        };
        let pairs = dupe_pairs(&self.dupe);
        for checked in &self.regions {
            let end = (checked.first_slot + checked.num_slots).min(raw.len());
            if checked.first_slot >= end {
                continue;
            }
            let slots = &raw[checked.first_slot..end];
            if let Some(site) = Self::site_for(&checked.site, slots) {
                let backtrace = self.backtrace.clone();
                self.state.reporter.report(Finding {
                    kind: FindingKind::CanaryCorruption,
                    region: checked.region,
                    kernel: self.kernel_name.clone(),
                    arg_index: checked.arg_index,
                    site,
                    duplicates: pairs.clone(),
                    backtrace,
                });
            }
        }
        for scratch in self.cleanup {
            let result = match scratch {
                Scratch::Mem(mem, bytes) => {
                    self.state.accounting.on_free(0, bytes as u64);
                    self.state.runtime.release_mem(mem).map_err(|e| e.to_string())
                }
                Scratch::Svm(ctx, ptr) => {
                    transfer::svm_free_impl(&self.state, ctx, ptr).map_err(|e| e.to_string())
                }
                Scratch::Kernel(kernel) => self
                    .state
                    .runtime
                    .release_kernel(kernel)
                    .map_err(|e| e.to_string()),
            };
            if let Err(e) = result {
                // The engine's own invariants cannot be trusted past a
                // failed native call.
                error!("fatal: scratch release failed during analysis: {e}");
                std::process::exit(1);
            }
        }
        self.state.analyses.end();
    }
}

/// Allocate the per-region result buffer, filled with the no-corruption
/// sentinel. The returned signal completes when the fill lands.
pub(crate) fn create_result_buffer<R: ComputeRuntime>(
    state: &Arc<EngineState<R>>,
    ctx: ContextId,
    queue: QueueId,
    slots: usize,
) -> DetectorResult<(MemId, EventId)> {
    let result = state.runtime.create_buffer(
        ctx,
        crate::runtime::MemFlags::READ_WRITE,
        4 * slots.max(1),
        None,
    )?;
    state.accounting.on_alloc(0, 4 * slots.max(1) as u64);
    let init = state.runtime.enqueue_fill_buffer(
        queue,
        result,
        CLEAN.to_le_bytes().to_vec(),
        0,
        4 * slots.max(1),
        &[],
    )?;
    Ok((result, init))
}

/// Enqueue the result readback: non-blocking when analysis rides a
/// completion callback, blocking otherwise.
pub(crate) fn read_results<R: ComputeRuntime>(
    state: &Arc<EngineState<R>>,
    queue: QueueId,
    slots: usize,
    result: MemId,
    waits: &[EventId],
) -> DetectorResult<(HostBuf, EventId)> {
    let buf: HostBuf = Arc::new(Mutex::new(Vec::new()));
    let blocking = !state.config.async_report;
    let evt = state.runtime.enqueue_read_buffer(
        queue,
        result,
        blocking,
        0,
        4 * slots.max(1),
        buf.clone(),
        waits,
    )?;
    Ok((buf, evt))
}

/// Hand the ticket to its continuation: a completion callback on the
/// readback signal, or an inline run after a blocking wait.
pub(crate) fn finish_analysis<R: ComputeRuntime>(
    state: &Arc<EngineState<R>>,
    read_evt: EventId,
    ticket: CheckTicket<R>,
) -> DetectorResult<()> {
    state.analyses.begin();
    if state.config.async_report {
        state
            .runtime
            .on_event_complete(read_evt, Box::new(move || ticket.analyze()))?;
    } else {
        state.runtime.wait_events(&[read_evt])?;
        ticket.analyze();
    }
    Ok(())
}

/// Accumulate one checker kernel's device time when the statistic is on.
pub(crate) fn note_checker_time<R: ComputeRuntime>(
    state: &Arc<EngineState<R>>,
    queue: QueueId,
    evt: EventId,
) -> DetectorResult<()> {
    if state
        .config
        .stats_mode
        .contains(crate::config::StatsMode::CHECKER_TIME)
    {
        state.runtime.finish(queue)?;
        let times = state.runtime.event_profiling(evt)?;
        state.add_checker_runtime(times.end_ns.saturating_sub(times.start_ns) / 1000);
    }
    Ok(())
}

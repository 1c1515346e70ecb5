// CLASSIFICATION: COMMUNITY
// Filename: host_check.rs v0.7
// Date Modified: 2027-01-16
// Author: Lukas Bower

//! Host-side verification: read each region's canary bytes back and scan
//! them on the calling thread. Blocking, but free of launch overhead, so
//! it wins for small buffer-only check sets.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use log::debug;

use crate::config::StatsMode;
use crate::engine::EngineState;
use crate::error::DetectorResult;
use crate::layout::{BufferLayout, POISON_FILL, POISON_FILL_LENGTH};
use crate::registry::KernelRecord;
use crate::report::{dupe_pairs, CorruptionSite, Finding, FindingKind, RegionRef};
use crate::mend;
use crate::runtime::{ComputeRuntime, ContextId, EventId, HostBuf, QueueId};

use super::{arg_index_for, CheckSet};

/// First non-poison byte in a canary stream, scanned word-wise first the
/// way the device kernels do.
fn first_corrupted(stream: &[u8]) -> Option<usize> {
    for (w, chunk) in stream.chunks(4).enumerate() {
        let clean = chunk.iter().all(|&b| b == POISON_FILL);
        if clean {
            continue;
        }
        for (i, &b) in chunk.iter().enumerate() {
            if b != POISON_FILL {
                return Some(4 * w + i);
            }
        }
    }
    None
}

fn stream_site(underflow: bool, offset: usize) -> CorruptionSite {
    if underflow {
        if offset < POISON_FILL_LENGTH {
            CorruptionSite::BeforeStart {
                offset: offset as u32,
            }
        } else {
            CorruptionSite::PastEnd {
                offset: (offset - POISON_FILL_LENGTH) as u32,
            }
        }
    } else {
        CorruptionSite::PastEnd {
            offset: offset as u32,
        }
    }
}

/// Read back and scan every region in the set. Corruption is reported and
/// mended inline; the calling thread blocks until the checks are done.
#[allow(clippy::too_many_arguments)]
pub(crate) fn verify_on_host<R: ComputeRuntime>(
    state: &Arc<EngineState<R>>,
    kern_ctx: ContextId,
    caller_queue: QueueId,
    set: &CheckSet,
    kern: &KernelRecord,
    dupe: &[u32],
    s1: EventId,
) -> DetectorResult<()> {
    let timing = state.config.stats_mode.contains(StatsMode::CHECKER_TIME);
    let started = timing.then(Instant::now);
    let queue = state.cached_queue(kern_ctx)?;
    let underflow = state.config.underflow_check;
    let pad = POISON_FILL_LENGTH;
    let pairs = dupe_pairs(dupe);

    let report = |region: RegionRef, site: CorruptionSite| {
        state.reporter.report(Finding {
            kind: FindingKind::CanaryCorruption,
            region,
            kernel: Some(kern.name.clone()),
            arg_index: arg_index_for(kern, &region),
            site,
            duplicates: pairs.clone(),
            backtrace: state.reporter.capture_backtrace(),
        });
    };

    // Buffers: read the canary run(s) out of the padded parent.
    for rec in &set.buffers {
        let parent = rec.parent.unwrap_or(rec.handle);
        let layout = BufferLayout::new(rec.size, underflow);
        let mut stream = Vec::with_capacity(layout.canary_byte_count());
        if let Some(lead) = layout.leading_run() {
            let buf: HostBuf = Arc::new(Mutex::new(Vec::new()));
            state
                .runtime
                .enqueue_read_buffer(queue, parent, true, lead.start, pad, buf.clone(), &[s1])?;
            stream.extend_from_slice(&buf.lock().unwrap());
        }
        let buf: HostBuf = Arc::new(Mutex::new(Vec::new()));
        state.runtime.enqueue_read_buffer(
            queue,
            parent,
            true,
            layout.trailing_run().start,
            pad,
            buf.clone(),
            &[s1],
        )?;
        stream.extend_from_slice(&buf.lock().unwrap());

        if let Some(offset) = first_corrupted(&stream) {
            report(RegionRef::Mem(rec.handle), stream_site(underflow, offset));
            mend::mend_blocking(state, caller_queue, RegionRef::Mem(rec.handle))?;
        }
    }

    // Images: read every slab into the flattened stream, scan byte-wise.
    for rec in &set.images {
        let info = rec.image.as_ref().expect("image record without layout");
        let elem = info.layout.elem_size;
        let mut stream = vec![0u8; info.layout.canary_bytes()];
        for slab in info.layout.slabs() {
            let buf: HostBuf = Arc::new(Mutex::new(Vec::new()));
            state.runtime.enqueue_read_image(
                queue,
                rec.handle,
                true,
                slab.origin,
                slab.region,
                buf.clone(),
                &[s1],
            )?;
            let bytes = buf.lock().unwrap();
            let at = slab.stream_offset * elem;
            stream[at..at + bytes.len()].copy_from_slice(&bytes);
        }
        if let Some(offset) = stream.iter().position(|&b| b != POISON_FILL) {
            let site = match info.layout.locate(offset / elem) {
                Some(loc) => CorruptionSite::Image(loc),
                None => CorruptionSite::PastEnd {
                    offset: offset as u32,
                },
            };
            report(RegionRef::Mem(rec.handle), site);
            mend::mend_blocking(state, caller_queue, RegionRef::Mem(rec.handle))?;
        }
    }

    // Shared regions: map, scan, unmap. Regions owned by a different
    // context than the one doing the checking are skipped, matching the
    // native engine's observed behavior.
    for rec in &set.svms {
        if rec.context != kern_ctx {
            debug!(
                "skipping shared region {:#x}: owned by {:?}, checking in {:?}",
                rec.handle.0, rec.context, kern_ctx
            );
            continue;
        }
        let span = rec.size + crate::layout::poison_regions(underflow) * pad;
        let map_evt = state
            .runtime
            .enqueue_svm_map(queue, rec.base, span, &[s1])?;
        state.runtime.wait_events(&[map_evt])?;

        let mut stream = Vec::with_capacity(2 * pad);
        if underflow {
            stream.extend_from_slice(&state.runtime.svm_read(rec.base, pad)?);
        }
        let trailing_off = if underflow { pad } else { 0 } + rec.size;
        stream.extend_from_slice(&state.runtime.svm_read(rec.base.offset(trailing_off), pad)?);

        if let Some(offset) = first_corrupted(&stream) {
            report(RegionRef::Svm(rec.handle), stream_site(underflow, offset));
            mend::mend_blocking(state, caller_queue, RegionRef::Svm(rec.handle))?;
        }

        let unmap_evt = state.runtime.enqueue_svm_unmap(queue, rec.base, &[])?;
        state.runtime.wait_events(&[unmap_evt])?;
    }

    if let Some(t0) = started {
        state.stats.checker_time(t0.elapsed().as_micros() as u64);
    }
    Ok(())
}

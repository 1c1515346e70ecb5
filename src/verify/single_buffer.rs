// CLASSIFICATION: COMMUNITY
// Filename: single_buffer.rs v0.7
// Date Modified: 2027-01-16
// Author: Lukas Bower

//! Single-buffer verification: one small scan per region over that
//! region's own canary run, repairing the poison pattern while scanning.
//! No staging copy, at the cost of one launch per region; the only mode
//! that covers both canary runs when underflow checking is on.

use std::sync::Arc;

use crate::engine::EngineState;
use crate::error::DetectorResult;
use crate::layout::{
    poison_regions, BufferLayout, POISON_FILL_32B, POISON_WORD_LEN,
};
use crate::registry::KernelRecord;
use crate::report::RegionRef;
use crate::runtime::{
    ArgValue, BuiltinKernel, ComputeRuntime, ContextId, EventId, KernelId, MemFlags, QueueId,
};
use crate::{bridge, mend};

use super::common::{
    create_result_buffer, finish_analysis, note_checker_time, read_results, CheckTicket,
    CheckedRegion, Scratch, SiteMap,
};
use super::{arg_index_for, CheckSet};

fn u32_arg(v: u32) -> ArgValue {
    ArgValue::Bytes(v.to_le_bytes().to_vec())
}

/// Launch one in-place scan over a canary run.
#[allow(clippy::too_many_arguments)]
fn scan_run<R: ComputeRuntime>(
    state: &Arc<EngineState<R>>,
    queue: QueueId,
    check: KernelId,
    words: usize,
    slot: u32,
    offset: usize,
    target: ArgValue,
    result: ArgValue,
    waits: &[EventId],
) -> DetectorResult<EventId> {
    state.runtime.set_kernel_arg(check, 0, u32_arg(words as u32))?;
    state.runtime.set_kernel_arg(check, 1, u32_arg(slot))?;
    state
        .runtime
        .set_kernel_arg(check, 2, u32_arg(POISON_FILL_32B))?;
    state
        .runtime
        .set_kernel_arg(check, 3, u32_arg(offset as u32))?;
    state.runtime.set_kernel_arg(check, 4, target)?;
    state.runtime.set_kernel_arg(check, 5, result)?;
    let evt = state
        .runtime
        .enqueue_kernel(queue, check, [words, 1, 1], waits)?;
    note_checker_time(state, queue, evt)?;
    Ok(evt)
}

/// Verify linear regions in place, one scan per canary run.
pub(crate) fn verify_linear<R: ComputeRuntime>(
    state: &Arc<EngineState<R>>,
    ctx: ContextId,
    queue: QueueId,
    set: &CheckSet,
    kern: &KernelRecord,
    dupe: &[u32],
    s1: EventId,
) -> DetectorResult<EventId> {
    let nb = set.buffers.len();
    let ns = set.svms.len();
    let total = nb + ns;
    if total == 0 {
        return state.completed_event(ctx);
    }
    let underflow = state.config.underflow_check;
    let runs = poison_regions(underflow);

    let (result, init_evt) = create_result_buffer(state, ctx, queue, total * runs)?;
    let check = state
        .runtime
        .builtin_kernel(ctx, BuiltinKernel::CanaryScanInPlace)?;

    let mut check_evts = Vec::new();
    for (i, rec) in set.buffers.iter().enumerate() {
        let parent = rec.parent.unwrap_or(rec.handle);
        let layout = BufferLayout::new(rec.size, underflow);
        check_evts.push(scan_run(
            state,
            queue,
            check,
            POISON_WORD_LEN,
            (runs * i) as u32,
            layout.trailing_run().start,
            ArgValue::Mem(parent),
            ArgValue::Mem(result),
            &[s1, init_evt],
        )?);
        if underflow {
            check_evts.push(scan_run(
                state,
                queue,
                check,
                POISON_WORD_LEN,
                (runs * i + 1) as u32,
                0,
                ArgValue::Mem(parent),
                ArgValue::Mem(result),
                &[s1, init_evt],
            )?);
        }
    }
    for (j, rec) in set.svms.iter().enumerate() {
        let layout = BufferLayout::new(rec.size, underflow);
        let slot = runs * (nb + j);
        check_evts.push(scan_run(
            state,
            queue,
            check,
            POISON_WORD_LEN,
            slot as u32,
            layout.trailing_run().start,
            ArgValue::Svm(rec.base),
            ArgValue::Mem(result),
            &[s1, init_evt],
        )?);
        if underflow {
            check_evts.push(scan_run(
                state,
                queue,
                check,
                POISON_WORD_LEN,
                (slot + 1) as u32,
                0,
                ArgValue::Svm(rec.base),
                ArgValue::Mem(result),
                &[s1, init_evt],
            )?);
        }
    }

    let (results, read_evt) = read_results(state, queue, total * runs, result, &check_evts)?;

    let site = |idx: usize| -> (usize, SiteMap) {
        if underflow {
            (runs * idx, SiteMap::Split)
        } else {
            (idx, SiteMap::Trailing)
        }
    };
    let mut regions = Vec::with_capacity(total);
    for (i, rec) in set.buffers.iter().enumerate() {
        let region = RegionRef::Mem(rec.handle);
        let (first_slot, map) = site(i);
        regions.push(CheckedRegion {
            arg_index: arg_index_for(kern, &region),
            region,
            site: map,
            first_slot,
            num_slots: runs,
        });
    }
    for (j, rec) in set.svms.iter().enumerate() {
        let region = RegionRef::Svm(rec.handle);
        let (first_slot, map) = site(nb + j);
        regions.push(CheckedRegion {
            arg_index: arg_index_for(kern, &region),
            region,
            site: map,
            first_slot,
            num_slots: runs,
        });
    }

    let ticket = CheckTicket {
        state: state.clone(),
        kernel_name: Some(kern.name.clone()),
        regions,
        dupe: dupe.to_vec(),
        backtrace: state.reporter.capture_backtrace(),
        results,
        cleanup: vec![
            Scratch::Mem(result, 4 * total * runs),
            Scratch::Kernel(check),
        ],
    };
    finish_analysis(state, read_evt, ticket)?;
    Ok(read_evt)
}

/// Verify images one at a time: each image's canary slabs are staged into
/// their own scratch buffer and scanned there, and the image itself is
/// mended behind the staging copies.
pub(crate) fn verify_images<R: ComputeRuntime>(
    state: &Arc<EngineState<R>>,
    ctx: ContextId,
    queue: QueueId,
    set: &CheckSet,
    kern: &KernelRecord,
    dupe: &[u32],
    s1: EventId,
) -> DetectorResult<EventId> {
    let n = set.images.len();
    if n == 0 {
        return state.completed_event(ctx);
    }

    let (result, init_evt) = create_result_buffer(state, ctx, queue, n)?;
    let check = state
        .runtime
        .builtin_kernel(ctx, BuiltinKernel::CanaryScanInPlace)?;

    let mut wait_evts = Vec::new();
    let mut cleanup = vec![Scratch::Mem(result, 4 * n), Scratch::Kernel(check)];
    let mut regions = Vec::with_capacity(n);
    for (i, rec) in set.images.iter().enumerate() {
        let info = rec.image.as_ref().expect("image record without layout");
        let elem = info.layout.elem_size;
        let canary_bytes = info.layout.canary_bytes();
        let scratch = state
            .runtime
            .create_buffer(ctx, MemFlags::READ_WRITE, canary_bytes.max(4), None)?;
        state.accounting.on_alloc(0, canary_bytes.max(4) as u64);
        let mut slab_evts = Vec::new();
        for slab in info.layout.slabs() {
            slab_evts.push(bridge::copy_image_to_buffer_any(
                state,
                queue,
                rec.handle,
                scratch,
                slab.origin,
                slab.region,
                slab.stream_offset * elem,
                &[s1],
            )?);
        }
        let stage_evt = state.runtime.enqueue_marker(queue, &slab_evts)?;
        wait_evts.push(mend::mend_after_stage(
            state,
            ctx,
            queue,
            RegionRef::Mem(rec.handle),
            stage_evt,
        )?);
        wait_evts.push(scan_run(
            state,
            queue,
            check,
            canary_bytes / 4,
            i as u32,
            0,
            ArgValue::Mem(scratch),
            ArgValue::Mem(result),
            &[stage_evt, init_evt],
        )?);
        cleanup.push(Scratch::Mem(scratch, canary_bytes.max(4)));
        let region = RegionRef::Mem(rec.handle);
        regions.push(CheckedRegion {
            arg_index: arg_index_for(kern, &region),
            region,
            site: SiteMap::ImageStream {
                elem,
                layout: info.layout.clone(),
            },
            first_slot: i,
            num_slots: 1,
        });
    }

    let (results, read_evt) = read_results(state, queue, n, result, &wait_evts)?;

    let ticket = CheckTicket {
        state: state.clone(),
        kernel_name: Some(kern.name.clone()),
        regions,
        dupe: dupe.to_vec(),
        backtrace: state.reporter.capture_backtrace(),
        results,
        cleanup,
    };
    finish_analysis(state, read_evt, ticket)?;
    Ok(read_evt)
}

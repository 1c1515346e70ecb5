// CLASSIFICATION: COMMUNITY
// Filename: copy_canary.rs v0.8
// Date Modified: 2027-01-16
// Author: Lukas Bower

//! Copy-canary verification: stage every region's canary bytes into one
//! contiguous scratch region, then run a single reduction kernel over the
//! staging area. One launch amortizes dispatch overhead across all the
//! regions a kernel touched.

use std::sync::Arc;

use crate::engine::{AllocPurpose, EngineState};
use crate::error::DetectorResult;
use crate::layout::{BufferLayout, POISON_FILL, POISON_FILL_32B, POISON_FILL_LENGTH, POISON_WORD_LEN};
use crate::registry::KernelRecord;
use crate::report::RegionRef;
use crate::runtime::{
    ArgValue, BuiltinKernel, ComputeRuntime, ContextId, EventId, HostInit, MemFlags, MemId,
    QueueId, SvmPtr,
};
use crate::{bridge, mend, transfer};

use super::common::{
    create_result_buffer, finish_analysis, note_checker_time, read_results, CheckTicket,
    CheckedRegion, Scratch, SiteMap,
};
use super::{arg_index_for, CheckSet};

fn u32_arg(v: u32) -> ArgValue {
    ArgValue::Bytes(v.to_le_bytes().to_vec())
}

/// Verify all linear regions (buffers plus shared memory) in one checker
/// launch over staged canary copies. With `ptr_indirect`, shared regions
/// are reached through a device-side pointer table instead of copies.
#[allow(clippy::too_many_arguments)]
pub(crate) fn verify_linear<R: ComputeRuntime>(
    state: &Arc<EngineState<R>>,
    ctx: ContextId,
    queue: QueueId,
    set: &CheckSet,
    kern: &KernelRecord,
    dupe: &[u32],
    s1: EventId,
    ptr_indirect: bool,
) -> DetectorResult<EventId> {
    let nb = set.buffers.len();
    let ns = set.svms.len();
    let total = nb + ns;
    if total == 0 {
        return state.completed_event(ctx);
    }
    let pad = POISON_FILL_LENGTH;

    let scratch_bytes = pad * nb.max(1);
    let scratch = state
        .runtime
        .create_buffer(ctx, MemFlags::READ_WRITE, scratch_bytes, None)?;
    state.accounting.on_alloc(0, scratch_bytes as u64);

    let mut stage_evts = Vec::new();
    let mut mend_evts = Vec::new();
    for (i, rec) in set.buffers.iter().enumerate() {
        let parent = rec.parent.unwrap_or(rec.handle);
        let layout = BufferLayout::new(rec.size, state.config.underflow_check);
        let evt = bridge::copy_buffer_any(
            state,
            queue,
            parent,
            scratch,
            layout.trailing_run().start,
            i * pad,
            pad,
            &[s1],
        )?;
        mend_evts.push(mend::mend_after_stage(
            state,
            ctx,
            queue,
            RegionRef::Mem(rec.handle),
            evt,
        )?);
        stage_evts.push(evt);
    }

    let mut svm_scratch: Option<SvmPtr> = None;
    let mut ptr_table: Option<MemId> = None;
    if ns > 0 {
        if ptr_indirect {
            // Table of canary start pointers; the checker repairs these
            // regions in place, so no mend pass is scheduled for them.
            let mut entries = Vec::with_capacity(ns * 8);
            for rec in &set.svms {
                entries.extend_from_slice(&(rec.handle.0 + rec.size as u64).to_le_bytes());
            }
            let table = state.runtime.create_buffer(
                ctx,
                MemFlags::READ_WRITE | MemFlags::COPY_HOST_PTR,
                ns * 8,
                Some(HostInit::Copy(entries)),
            )?;
            state.accounting.on_alloc(0, (ns * 8) as u64);
            ptr_table = Some(table);
            for _ in 0..ns {
                mend_evts.push(state.completed_event(ctx)?);
            }
        } else {
            let base = transfer::svm_alloc_impl(
                state,
                ctx,
                MemFlags::READ_WRITE | MemFlags::SVM_FINE_GRAIN,
                pad * ns,
                0,
                AllocPurpose::Internal,
            )?;
            for (j, rec) in set.svms.iter().enumerate() {
                let evt = state.runtime.enqueue_svm_memcpy(
                    queue,
                    base.offset(j * pad),
                    rec.handle.offset(rec.size),
                    pad,
                    &[s1],
                )?;
                mend_evts.push(mend::mend_after_stage(
                    state,
                    ctx,
                    queue,
                    RegionRef::Svm(rec.handle),
                    evt,
                )?);
                stage_evts.push(evt);
            }
            svm_scratch = Some(base);
        }
    }

    let (result, init_evt) = create_result_buffer(state, ctx, queue, total)?;

    let builtin = if ptr_indirect {
        BuiltinKernel::CanaryScanSvmPtr
    } else {
        BuiltinKernel::CanaryScan
    };
    let check = state.runtime.builtin_kernel(ctx, builtin)?;
    let word_len = POISON_WORD_LEN as u32;
    state.runtime.set_kernel_arg(check, 0, u32_arg(word_len))?;
    state
        .runtime
        .set_kernel_arg(check, 1, u32_arg(nb as u32 * word_len))?;
    state
        .runtime
        .set_kernel_arg(check, 2, u32_arg(total as u32 * word_len))?;
    state
        .runtime
        .set_kernel_arg(check, 3, u32_arg(POISON_FILL_32B))?;
    state.runtime.set_kernel_arg(check, 4, ArgValue::Mem(scratch))?;
    let slot5 = if ptr_indirect {
        ArgValue::Mem(ptr_table.unwrap_or(scratch))
    } else {
        match svm_scratch {
            Some(base) => ArgValue::Svm(base),
            None => ArgValue::Bytes(Vec::new()),
        }
    };
    state.runtime.set_kernel_arg(check, 5, slot5)?;
    state.runtime.set_kernel_arg(check, 6, ArgValue::Mem(result))?;

    let mut waits = stage_evts;
    waits.push(init_evt);
    waits.push(s1);
    let kern_end =
        state
            .runtime
            .enqueue_kernel(queue, check, [total * POISON_WORD_LEN, 1, 1], &waits)?;
    note_checker_time(state, queue, kern_end)?;

    let finish = if state.config.exit_on_overflow {
        kern_end
    } else {
        let mend_finish = state.runtime.enqueue_marker(queue, &mend_evts)?;
        state
            .runtime
            .enqueue_marker(queue, &[mend_finish, kern_end])?
    };

    let (results, read_evt) = read_results(state, queue, total, result, &[finish])?;

    let mut regions = Vec::with_capacity(total);
    for (i, rec) in set.buffers.iter().enumerate() {
        let region = RegionRef::Mem(rec.handle);
        regions.push(CheckedRegion {
            arg_index: arg_index_for(kern, &region),
            region,
            site: SiteMap::Trailing,
            first_slot: i,
            num_slots: 1,
        });
    }
    for (j, rec) in set.svms.iter().enumerate() {
        let region = RegionRef::Svm(rec.handle);
        regions.push(CheckedRegion {
            arg_index: arg_index_for(kern, &region),
            region,
            site: SiteMap::Trailing,
            first_slot: nb + j,
            num_slots: 1,
        });
    }

    let mut cleanup = vec![
        Scratch::Mem(scratch, scratch_bytes),
        Scratch::Mem(result, 4 * total),
        Scratch::Kernel(check),
    ];
    if let Some(base) = svm_scratch {
        cleanup.push(Scratch::Svm(ctx, base));
    }
    if let Some(table) = ptr_table {
        cleanup.push(Scratch::Mem(table, ns * 8));
    }

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

/// Verify all image regions in one checker launch. Image canaries are
/// irregular, so a per-region end-offset side table segments the staged
/// stream for the reduction kernel.
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

    let mut ends = Vec::with_capacity(n);
    let mut running = 0u32;
    for rec in &set.images {
        let info = rec.image.as_ref().expect("image record without layout");
        running += info.layout.canary_bytes() as u32;
        ends.push(running);
    }
    let total_len = running as usize;

    let scratch = state
        .runtime
        .create_buffer(ctx, MemFlags::READ_WRITE, total_len.max(1), None)?;
    state.accounting.on_alloc(0, total_len.max(1) as u64);

    let mut stage_evts = Vec::new();
    let mut mend_evts = Vec::new();
    for (i, rec) in set.images.iter().enumerate() {
        let info = rec.image.as_ref().expect("image record without layout");
        let elem = info.layout.elem_size;
        let start = if i > 0 { ends[i - 1] as usize } else { 0 };
        let mut slab_evts = Vec::new();
        for slab in info.layout.slabs() {
            slab_evts.push(bridge::copy_image_to_buffer_any(
                state,
                queue,
                rec.handle,
                scratch,
                slab.origin,
                slab.region,
                start + slab.stream_offset * elem,
                &[s1],
            )?);
        }
        let img_evt = state.runtime.enqueue_marker(queue, &slab_evts)?;
        mend_evts.push(mend::mend_after_stage(
            state,
            ctx,
            queue,
            RegionRef::Mem(rec.handle),
            img_evt,
        )?);
        stage_evts.push(img_evt);
    }

    let mut ends_bytes = Vec::with_capacity(n * 4);
    for e in &ends {
        ends_bytes.extend_from_slice(&e.to_le_bytes());
    }
    let ends_mem = state.runtime.create_buffer(
        ctx,
        MemFlags::READ_WRITE | MemFlags::COPY_HOST_PTR,
        n * 4,
        Some(HostInit::Copy(ends_bytes)),
    )?;
    state.accounting.on_alloc(0, (n * 4) as u64);

    let (result, init_evt) = create_result_buffer(state, ctx, queue, n)?;

    let check = state
        .runtime
        .builtin_kernel(ctx, BuiltinKernel::CanaryScanImage)?;
    state
        .runtime
        .set_kernel_arg(check, 0, ArgValue::Bytes(vec![POISON_FILL]))?;
    state.runtime.set_kernel_arg(check, 1, u32_arg(n as u32))?;
    state.runtime.set_kernel_arg(check, 2, ArgValue::Mem(ends_mem))?;
    state.runtime.set_kernel_arg(check, 3, ArgValue::Mem(scratch))?;
    state.runtime.set_kernel_arg(check, 4, ArgValue::Mem(result))?;

    let mut waits = stage_evts;
    waits.push(init_evt);
    let kern_end = state
        .runtime
        .enqueue_kernel(queue, check, [total_len, 1, 1], &waits)?;
    note_checker_time(state, queue, kern_end)?;

    let finish = if state.config.exit_on_overflow {
        kern_end
    } else {
        let mend_finish = state.runtime.enqueue_marker(queue, &mend_evts)?;
        state
            .runtime
            .enqueue_marker(queue, &[mend_finish, kern_end])?
    };

    let (results, read_evt) = read_results(state, queue, n, result, &[finish])?;

    let regions = set
        .images
        .iter()
        .enumerate()
        .map(|(i, rec)| {
            let info = rec.image.as_ref().expect("image record without layout");
            let region = RegionRef::Mem(rec.handle);
            CheckedRegion {
                arg_index: arg_index_for(kern, &region),
                region,
                site: SiteMap::ImageStream {
                    elem: info.layout.elem_size,
                    layout: info.layout.clone(),
                },
                first_slot: i,
                num_slots: 1,
            }
        })
        .collect();

    let ticket = CheckTicket {
        state: state.clone(),
        kernel_name: Some(kern.name.clone()),
        regions,
        dupe: dupe.to_vec(),
        backtrace: state.reporter.capture_backtrace(),
        results,
        cleanup: vec![
            Scratch::Mem(scratch, total_len.max(1)),
            Scratch::Mem(ends_mem, n * 4),
            Scratch::Mem(result, 4 * n),
            Scratch::Kernel(check),
        ],
    };
    finish_analysis(state, read_evt, ticket)?;
    Ok(read_evt)
}

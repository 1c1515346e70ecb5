// CLASSIFICATION: COMMUNITY
// Filename: mend.rs v0.6
// Date Modified: 2027-01-15
// Author: Lukas Bower

//! Canary mending: rewrite the poison pattern into a region's padding so
//! the region is ready for the next launch.
//!
//! Mending always runs on the owning context's cached queue; incoming
//! signals from other contexts are translated first, and the signal
//! handed back is translated into the caller's context.

use std::sync::Arc;

use crate::engine::EngineState;
use crate::error::DetectorResult;
use crate::layout::{BufferLayout, POISON_FILL, POISON_FILL_LENGTH};
use crate::report::RegionRef;
use crate::bridge;
use crate::runtime::{ComputeRuntime, ContextId, EventId, QueueId};

/// Re-poison one region's canary bytes. Returns a signal in the context
/// of `caller_queue`, or `None` when the region is untracked or carries
/// no canary.
pub fn mend_region<R: ComputeRuntime>(
    state: &Arc<EngineState<R>>,
    caller_queue: QueueId,
    region: RegionRef,
    blocking: bool,
    waits: &[EventId],
) -> DetectorResult<Option<EventId>> {
    let finish = match region {
        RegionRef::Mem(mem) => {
            let Some(rec) = state.mems.find(mem) else {
                return Ok(None);
            };
            if !rec.has_canary {
                return Ok(None);
            }
            let fill_queue = state.cached_queue(rec.context)?;
            let mut local_waits = waits.to_vec();
            bridge::convert_events(state, rec.context, &mut local_waits)?;
            if let Some(info) = &rec.image {
                mend_image(state, fill_queue, mem, info, &local_waits)?
            } else {
                mend_buffer(state, fill_queue, &rec, &local_waits)?
            }
        }
        RegionRef::Svm(ptr) => {
            let Some(rec) = state.svms.find_containing(ptr) else {
                return Ok(None);
            };
            let fill_queue = state.cached_queue(rec.context)?;
            let mut local_waits = waits.to_vec();
            bridge::convert_events(state, rec.context, &mut local_waits)?;
            let underflow = state.config.underflow_check;
            let layout = BufferLayout::new(rec.size, underflow);
            let mut region_events = Vec::new();
            let trailing = layout.trailing_run();
            region_events.push(state.runtime.enqueue_svm_fill(
                fill_queue,
                rec.base.offset(trailing.start),
                vec![POISON_FILL],
                POISON_FILL_LENGTH,
                &local_waits,
            )?);
            if layout.leading_run().is_some() {
                region_events.push(state.runtime.enqueue_svm_fill(
                    fill_queue,
                    rec.base,
                    vec![POISON_FILL],
                    POISON_FILL_LENGTH,
                    &local_waits,
                )?);
            }
            state.runtime.enqueue_marker(fill_queue, &region_events)?
        }
    };

    if blocking {
        state.runtime.wait_events(&[finish])?;
    }
    let caller_ctx = state.runtime.queue_context(caller_queue)?;
    let out = bridge::event_for_context(state, caller_ctx, finish)?;
    Ok(Some(out))
}

fn mend_buffer<R: ComputeRuntime>(
    state: &Arc<EngineState<R>>,
    fill_queue: QueueId,
    rec: &crate::registry::MemRecord,
    waits: &[EventId],
) -> DetectorResult<EventId> {
    let parent = rec.parent.unwrap_or(rec.handle);
    let layout = BufferLayout::new(rec.size, state.config.underflow_check);
    let mut region_events = Vec::new();
    let trailing = layout.trailing_run();
    region_events.push(state.runtime.enqueue_fill_buffer(
        fill_queue,
        parent,
        vec![POISON_FILL],
        trailing.start,
        POISON_FILL_LENGTH,
        waits,
    )?);
    if let Some(lead) = layout.leading_run() {
        region_events.push(state.runtime.enqueue_fill_buffer(
            fill_queue,
            parent,
            vec![POISON_FILL],
            lead.start,
            POISON_FILL_LENGTH,
            waits,
        )?);
    }
    Ok(state.runtime.enqueue_marker(fill_queue, &region_events)?)
}

fn mend_image<R: ComputeRuntime>(
    state: &Arc<EngineState<R>>,
    fill_queue: QueueId,
    mem: crate::runtime::MemId,
    info: &crate::registry::ImageInfo,
    waits: &[EventId],
) -> DetectorResult<EventId> {
    let elem = info.layout.elem_size;
    for slab in info.layout.slabs() {
        let poison = vec![POISON_FILL; slab.elems() * elem];
        state.runtime.enqueue_write_image(
            fill_queue,
            mem,
            false,
            slab.origin,
            slab.region,
            poison,
            waits,
        )?;
    }
    Ok(state.runtime.enqueue_marker(fill_queue, &[])?)
}

/// Mend scheduled behind a staging copy, unless the run is configured to
/// die on the first corruption (no point repairing then).
pub fn mend_after_stage<R: ComputeRuntime>(
    state: &Arc<EngineState<R>>,
    ctx: ContextId,
    queue: QueueId,
    region: RegionRef,
    stage_evt: EventId,
) -> DetectorResult<EventId> {
    if state.config.exit_on_overflow {
        return state.completed_event(ctx);
    }
    match mend_region(state, queue, region, false, &[stage_evt])? {
        Some(evt) => Ok(evt),
        None => state.completed_event(ctx),
    }
}

/// Immediate, blocking mend used by the host-side verification paths.
pub fn mend_blocking<R: ComputeRuntime>(
    state: &Arc<EngineState<R>>,
    queue: QueueId,
    region: RegionRef,
) -> DetectorResult<()> {
    mend_region(state, queue, region, true, &[])?;
    Ok(())
}

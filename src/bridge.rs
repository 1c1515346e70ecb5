// CLASSIFICATION: COMMUNITY
// Filename: bridge.rs v0.7
// Date Modified: 2027-01-15
// Author: Lukas Bower

//! Cross-context data movement and completion-signal translation.
//!
//! Direct device-to-device operations are only legal inside one context.
//! When the source and destination of a copy live in different contexts,
//! the bridge stages the bytes through host memory: device-to-host in the
//! source context, wait, host-to-device in the destination context, with
//! the staging buffer released exactly once by a completion callback on
//! the second transfer.

use std::sync::{Arc, Mutex};

use log::debug;

use crate::engine::EngineState;
use crate::error::DetectorResult;
use crate::runtime::{ComputeRuntime, ContextId, EventId, HostBuf, MemId, QueueId};

/// Replace every signal from a foreign context with a user signal native
/// to `target` that fires when the original fires. Signals already in the
/// target context pass through untouched.
pub fn convert_events<R: ComputeRuntime>(
    state: &Arc<EngineState<R>>,
    target: ContextId,
    evts: &mut [EventId],
) -> DetectorResult<()> {
    for evt in evts.iter_mut() {
        let evt_ctx = state.runtime.event_context(*evt)?;
        if evt_ctx == target {
            continue;
        }
        let translated = state.runtime.create_user_event(target)?;
        let st = state.clone();
        state.runtime.on_event_complete(
            *evt,
            Box::new(move || {
                let _ = st.runtime.complete_user_event(translated);
            }),
        )?;
        debug!("translated event {evt:?} from {evt_ctx:?} into {target:?}");
        *evt = translated;
    }
    Ok(())
}

/// A completion signal usable from `target`, translating if necessary.
pub fn event_for_context<R: ComputeRuntime>(
    state: &Arc<EngineState<R>>,
    target: ContextId,
    evt: EventId,
) -> DetectorResult<EventId> {
    let mut one = [evt];
    convert_events(state, target, &mut one)?;
    Ok(one[0])
}

/// Buffer copy that works regardless of which contexts own the source,
/// the destination, and the supplied queue. The returned signal belongs
/// to the supplied queue's context.
#[allow(clippy::too_many_arguments)]
pub fn copy_buffer_any<R: ComputeRuntime>(
    state: &Arc<EngineState<R>>,
    queue: QueueId,
    from: MemId,
    to: MemId,
    from_offset: usize,
    to_offset: usize,
    len: usize,
    waits: &[EventId],
) -> DetectorResult<EventId> {
    let sample_ctx = state.runtime.queue_context(queue)?;
    let from_ctx = state.runtime.mem_context(from)?;
    let to_ctx = state.runtime.mem_context(to)?;

    if sample_ctx == from_ctx && from_ctx == to_ctx {
        let evt = state
            .runtime
            .enqueue_copy_buffer(queue, from, to, from_offset, to_offset, len, waits)?;
        return Ok(evt);
    }

    if from_ctx == to_ctx {
        // Same pair, foreign queue: run the copy on the pair's own cached
        // queue and hand back a signal valid for the caller's context.
        state.runtime.wait_events(waits)?;
        let pair_queue = state.cached_queue(from_ctx)?;
        let copy_evt = state
            .runtime
            .enqueue_copy_buffer(pair_queue, from, to, from_offset, to_offset, len, &[])?;
        return event_for_context(state, sample_ctx, copy_evt);
    }

    // Different contexts: relay through host memory.
    let staging: HostBuf = Arc::new(Mutex::new(Vec::new()));
    let src_queue = if sample_ctx == from_ctx {
        queue
    } else {
        state.runtime.wait_events(waits)?;
        state.cached_queue(from_ctx)?
    };
    let src_waits: &[EventId] = if sample_ctx == from_ctx { waits } else { &[] };
    let read_evt = state.runtime.enqueue_read_buffer(
        src_queue,
        from,
        false,
        from_offset,
        len,
        staging.clone(),
        src_waits,
    )?;
    state.runtime.wait_events(&[read_evt])?;

    let dst_queue = if sample_ctx == to_ctx {
        queue
    } else {
        state.cached_queue(to_ctx)?
    };
    let bytes = staging.lock().unwrap().clone();
    let write_evt = state
        .runtime
        .enqueue_write_buffer(dst_queue, to, false, to_offset, bytes, &[])?;

    // The staging buffer dies exactly once, after both transfers are
    // provably done.
    let keep = staging;
    state
        .runtime
        .on_event_complete(write_evt, Box::new(move || drop(keep)))?;

    if sample_ctx == to_ctx {
        Ok(write_evt)
    } else {
        state.runtime.wait_events(&[write_evt])?;
        state.completed_event(sample_ctx)
    }
}

/// Image-region copy into a buffer, bridged through the host when the
/// image's context differs from the buffer's.
#[allow(clippy::too_many_arguments)]
pub fn copy_image_to_buffer_any<R: ComputeRuntime>(
    state: &Arc<EngineState<R>>,
    queue: QueueId,
    from: MemId,
    to: MemId,
    origin: [usize; 3],
    region: [usize; 3],
    to_offset: usize,
    waits: &[EventId],
) -> DetectorResult<EventId> {
    let sample_ctx = state.runtime.queue_context(queue)?;
    let from_ctx = state.runtime.mem_context(from)?;
    let to_ctx = state.runtime.mem_context(to)?;

    if sample_ctx == from_ctx && from_ctx == to_ctx {
        let evt = state
            .runtime
            .enqueue_copy_image_to_buffer(queue, from, to, origin, region, to_offset, waits)?;
        return Ok(evt);
    }

    let staging: HostBuf = Arc::new(Mutex::new(Vec::new()));
    let src_queue = if sample_ctx == from_ctx {
        queue
    } else {
        state.runtime.wait_events(waits)?;
        state.cached_queue(from_ctx)?
    };
    let src_waits: &[EventId] = if sample_ctx == from_ctx { waits } else { &[] };
    let read_evt = state.runtime.enqueue_read_image(
        src_queue,
        from,
        false,
        origin,
        region,
        staging.clone(),
        src_waits,
    )?;
    state.runtime.wait_events(&[read_evt])?;

    let dst_queue = if sample_ctx == to_ctx {
        queue
    } else {
        state.cached_queue(to_ctx)?
    };
    let bytes = staging.lock().unwrap().clone();
    let write_evt =
        state
            .runtime
            .enqueue_write_buffer(dst_queue, to, false, to_offset, bytes, &[])?;
    let keep = staging;
    state
        .runtime
        .on_event_complete(write_evt, Box::new(move || drop(keep)))?;

    if sample_ctx == to_ctx {
        Ok(write_evt)
    } else {
        state.runtime.wait_events(&[write_evt])?;
        state.completed_event(sample_ctx)
    }
}

/// Image-to-image region copy; same-context fast path, host relay
/// otherwise.
#[allow(clippy::too_many_arguments)]
pub fn copy_image_any<R: ComputeRuntime>(
    state: &Arc<EngineState<R>>,
    queue: QueueId,
    from: MemId,
    to: MemId,
    src_origin: [usize; 3],
    dst_origin: [usize; 3],
    region: [usize; 3],
    waits: &[EventId],
) -> DetectorResult<EventId> {
    let sample_ctx = state.runtime.queue_context(queue)?;
    let from_ctx = state.runtime.mem_context(from)?;
    let to_ctx = state.runtime.mem_context(to)?;

    if sample_ctx == from_ctx && from_ctx == to_ctx {
        let evt = state.runtime.enqueue_copy_image(
            queue, from, to, src_origin, dst_origin, region, waits,
        )?;
        return Ok(evt);
    }

    let staging: HostBuf = Arc::new(Mutex::new(Vec::new()));
    let src_queue = if sample_ctx == from_ctx {
        queue
    } else {
        state.runtime.wait_events(waits)?;
        state.cached_queue(from_ctx)?
    };
    let src_waits: &[EventId] = if sample_ctx == from_ctx { waits } else { &[] };
    let read_evt = state.runtime.enqueue_read_image(
        src_queue,
        from,
        false,
        src_origin,
        region,
        staging.clone(),
        src_waits,
    )?;
    state.runtime.wait_events(&[read_evt])?;

    let dst_queue = if sample_ctx == to_ctx {
        queue
    } else {
        state.cached_queue(to_ctx)?
    };
    let bytes = staging.lock().unwrap().clone();
    let write_evt = state.runtime.enqueue_write_image(
        dst_queue, to, false, dst_origin, region, bytes, &[],
    )?;
    let keep = staging;
    state
        .runtime
        .on_event_complete(write_evt, Box::new(move || drop(keep)))?;

    if sample_ctx == to_ctx {
        Ok(write_evt)
    } else {
        state.runtime.wait_events(&[write_evt])?;
        state.completed_event(sample_ctx)
    }
}

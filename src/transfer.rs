// CLASSIFICATION: COMMUNITY
// Filename: transfer.rs v0.9
// Date Modified: 2027-01-17
// Author: Lukas Bower

//! Data-movement interception.
//!
//! Every transfer entry point runs a synchronous bounds pre-check against
//! the target region's logical size before the real operation is issued.
//! A violating transfer is reported and skipped; the caller gets back an
//! already-complete signal. Shared-memory allocation is also here, with
//! the reuse pool for the fine-grained subclass.

use log::{debug, warn};

use crate::engine::{AllocPurpose, CanaryAccess, Detector, EngineState};
use crate::error::{DetectorResult, RuntimeError};
use crate::layout::{poison_regions, ImageOverflowLoc, POISON_FILL, POISON_FILL_LENGTH};
use crate::registry::{PoolRegion, SvmRecord};
use crate::report::{CorruptionSite, Finding, FindingKind, RegionRef};
use crate::runtime::{
    ComputeRuntime, ContextId, EventId, HostBuf, MemFlags, MemId, QueueId, SvmPtr,
};

/// True when the call would reach past the region's logical size. The
/// finding is reported here; callers skip the real transfer.
pub(crate) fn bounds_check_buffer<R: ComputeRuntime>(
    state: &EngineState<R>,
    call: &'static str,
    mem: MemId,
    offset: usize,
    len: usize,
) -> bool {
    if state.config.disable_api_check {
        return false;
    }
    let Some(rec) = state.mems.find(mem) else {
        return false;
    };
    if offset + len <= rec.size {
        return false;
    }
    let bad_byte = offset.saturating_sub(rec.size);
    state.reporter.report(Finding {
        kind: FindingKind::ApiBoundsViolation { call },
        region: RegionRef::Mem(mem),
        kernel: None,
        arg_index: None,
        site: CorruptionSite::PastEnd {
            offset: bad_byte as u32,
        },
        duplicates: Vec::new(),
        backtrace: state.reporter.capture_backtrace(),
    });
    true
}

/// Rectangular-transfer variant of the bounds pre-check.
pub(crate) fn bounds_check_rect<R: ComputeRuntime>(
    state: &EngineState<R>,
    call: &'static str,
    mem: MemId,
    origin: [usize; 3],
    region: [usize; 3],
    mut row_pitch: usize,
    mut slice_pitch: usize,
) -> bool {
    if state.config.disable_api_check {
        return false;
    }
    let Some(rec) = state.mems.find(mem) else {
        return false;
    };
    let mut b_off = origin[0];
    let mut b_end = region[0];
    if row_pitch == 0 {
        row_pitch = region[0];
    }
    b_off += origin[1] * row_pitch;
    b_end *= region[1];
    if slice_pitch == 0 {
        slice_pitch = row_pitch * region[1];
    }
    b_off += origin[2] * slice_pitch;
    b_end *= region[2];
    b_end += b_off;
    if b_end <= rec.size {
        return false;
    }
    let bad_byte = b_off.saturating_sub(rec.size);
    state.reporter.report(Finding {
        kind: FindingKind::ApiBoundsViolation { call },
        region: RegionRef::Mem(mem),
        kernel: None,
        arg_index: None,
        site: CorruptionSite::PastEnd {
            offset: bad_byte as u32,
        },
        duplicates: Vec::new(),
        backtrace: state.reporter.capture_backtrace(),
    });
    true
}

/// Image-transfer bounds pre-check. Canary access is allowed only for
/// engine-internal staging and mending.
pub(crate) fn bounds_check_image<R: ComputeRuntime>(
    state: &EngineState<R>,
    call: &'static str,
    mem: MemId,
    origin: [usize; 3],
    region: [usize; 3],
    access: CanaryAccess,
) -> bool {
    if state.config.disable_api_check {
        return false;
    }
    let Some(rec) = state.mems.find(mem) else {
        return false;
    };
    let Some(info) = &rec.image else {
        return false;
    };
    let lim = if rec.has_canary && access == CanaryAccess::Denied {
        info.layout.logical
    } else {
        info.layout.padded
    };
    let site = if origin[2] + region[2] > lim[2] {
        Some(CorruptionSite::Image(ImageOverflowLoc::Tail {
            slices_past: origin[2].saturating_sub(lim[2]) as u32,
        }))
    } else if origin[1] + region[1] > lim[1] {
        Some(CorruptionSite::Image(ImageOverflowLoc::SliceEnd {
            rows_past: origin[1].saturating_sub(lim[1]) as u32,
            slice: origin[2] as u32,
        }))
    } else if origin[0] + region[0] > lim[0] {
        Some(CorruptionSite::Image(ImageOverflowLoc::RowEnd {
            cols_past: origin[0].saturating_sub(lim[0]) as u32,
            row: origin[1] as u32,
            slice: origin[2] as u32,
        }))
    } else {
        None
    };
    let Some(site) = site else { return false };
    state.reporter.report(Finding {
        kind: FindingKind::ApiBoundsViolation { call },
        region: RegionRef::Mem(mem),
        kernel: None,
        arg_index: None,
        site,
        duplicates: Vec::new(),
        backtrace: state.reporter.capture_backtrace(),
    });
    true
}

fn skipped<R: ComputeRuntime>(
    state: &EngineState<R>,
    queue: QueueId,
) -> DetectorResult<EventId> {
    let ctx = state.runtime.queue_context(queue)?;
    state.completed_event(ctx)
}

pub(crate) fn svm_alloc_impl<R: ComputeRuntime>(
    state: &EngineState<R>,
    ctx: ContextId,
    flags: MemFlags,
    size: usize,
    alignment: usize,
    purpose: AllocPurpose,
) -> DetectorResult<SvmPtr> {
    if flags.contains(MemFlags::SVM_ATOMICS) {
        // Atomic shared allocations imply host/device concurrency the
        // checker cannot schedule around.
        return Err(RuntimeError::Unsupported("shared atomics allocations").into());
    }
    let underflow = state.config.underflow_check;
    let pad_total = poison_regions(underflow) * POISON_FILL_LENGTH;
    let size_aug = size + pad_total;
    match purpose {
        AllocPurpose::User => state.accounting.on_alloc(size as u64, pad_total as u64),
        AllocPurpose::Internal => state.accounting.on_alloc(0, size_aug as u64),
    }

    let mut alloc_flags = flags;
    let base = if flags.contains(MemFlags::SVM_FINE_GRAIN) {
        // All fine-grained allocations are forced read-write so pooled
        // regions can serve any later request.
        alloc_flags = MemFlags::READ_WRITE | MemFlags::SVM_FINE_GRAIN;
        match state.svm_pool.take(ctx, size_aug, alignment) {
            Some(region) => {
                debug!("reusing pooled shared region {:#x}", region.base);
                SvmPtr(region.base)
            }
            None => {
                let base = state.runtime.svm_alloc(ctx, alloc_flags, size_aug, alignment)?;
                state.svm_pool.note_alloc(
                    ctx,
                    PoolRegion {
                        base: base.0,
                        size: size_aug,
                        alignment,
                    },
                );
                base
            }
        }
    } else {
        state.runtime.svm_alloc(ctx, alloc_flags, size_aug, alignment)?
    };

    let user = if underflow {
        base.offset(POISON_FILL_LENGTH)
    } else {
        base
    };

    let queue = state.cached_queue(ctx)?;
    let mut fills = Vec::new();
    let trailing_off = if underflow { POISON_FILL_LENGTH } else { 0 } + size;
    fills.push(state.runtime.enqueue_svm_fill(
        queue,
        base.offset(trailing_off),
        vec![POISON_FILL],
        POISON_FILL_LENGTH,
        &[],
    )?);
    if underflow {
        fills.push(state.runtime.enqueue_svm_fill(
            queue,
            base,
            vec![POISON_FILL],
            POISON_FILL_LENGTH,
            &[],
        )?);
    }
    state.runtime.wait_events(&fills)?;

    state.svms.insert(SvmRecord {
        handle: user,
        base,
        context: ctx,
        flags: alloc_flags,
        size,
        alignment,
        is_internal: purpose == AllocPurpose::Internal,
    });
    Ok(user)
}

pub(crate) fn svm_free_impl<R: ComputeRuntime>(
    state: &EngineState<R>,
    ctx: ContextId,
    ptr: SvmPtr,
) -> DetectorResult<()> {
    if let Some(rec) = state.svms.remove(ptr) {
        let pad_total = poison_regions(state.config.underflow_check) * POISON_FILL_LENGTH;
        if rec.is_internal {
            state.accounting.on_free(0, (rec.size + pad_total) as u64);
        } else {
            state.accounting.on_free(rec.size as u64, pad_total as u64);
        }
        // The fine-grained subclass is never really freed; it parks on
        // the reuse pool instead.
        if !state.svm_pool.quarantine(ctx, rec.base.0) {
            state.runtime.svm_free(ctx, rec.base)?;
        }
    } else if !state.svm_pool.quarantine(ctx, ptr.0) {
        warn!("freeing untracked shared pointer {:#x}", ptr.0);
        state.runtime.svm_free(ctx, ptr)?;
    }
    Ok(())
}

impl<R: ComputeRuntime> Detector<R> {
    // --- buffer transfers --------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn enqueue_read_buffer(
        &self,
        queue: QueueId,
        mem: MemId,
        blocking: bool,
        offset: usize,
        len: usize,
        dst: HostBuf,
        waits: &[EventId],
    ) -> DetectorResult<EventId> {
        if bounds_check_buffer(&self.state, "enqueue_read_buffer", mem, offset, len) {
            return skipped(&self.state, queue);
        }
        Ok(self
            .state
            .runtime
            .enqueue_read_buffer(queue, mem, blocking, offset, len, dst, waits)?)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn enqueue_write_buffer(
        &self,
        queue: QueueId,
        mem: MemId,
        blocking: bool,
        offset: usize,
        data: Vec<u8>,
        waits: &[EventId],
    ) -> DetectorResult<EventId> {
        if bounds_check_buffer(&self.state, "enqueue_write_buffer", mem, offset, data.len()) {
            return skipped(&self.state, queue);
        }
        Ok(self
            .state
            .runtime
            .enqueue_write_buffer(queue, mem, blocking, offset, data, waits)?)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn enqueue_fill_buffer(
        &self,
        queue: QueueId,
        mem: MemId,
        pattern: Vec<u8>,
        offset: usize,
        len: usize,
        waits: &[EventId],
    ) -> DetectorResult<EventId> {
        if bounds_check_buffer(&self.state, "enqueue_fill_buffer", mem, offset, len) {
            return skipped(&self.state, queue);
        }
        Ok(self
            .state
            .runtime
            .enqueue_fill_buffer(queue, mem, pattern, offset, len, waits)?)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn enqueue_copy_buffer(
        &self,
        queue: QueueId,
        src: MemId,
        dst: MemId,
        src_offset: usize,
        dst_offset: usize,
        len: usize,
        waits: &[EventId],
    ) -> DetectorResult<EventId> {
        if bounds_check_buffer(&self.state, "enqueue_copy_buffer", src, src_offset, len)
            || bounds_check_buffer(&self.state, "enqueue_copy_buffer", dst, dst_offset, len)
        {
            return skipped(&self.state, queue);
        }
        Ok(self
            .state
            .runtime
            .enqueue_copy_buffer(queue, src, dst, src_offset, dst_offset, len, waits)?)
    }

    /// Rectangular read into tightly packed rows of `dst`.
    #[allow(clippy::too_many_arguments)]
    pub fn enqueue_read_buffer_rect(
        &self,
        queue: QueueId,
        mem: MemId,
        origin: [usize; 3],
        region: [usize; 3],
        row_pitch: usize,
        slice_pitch: usize,
        dst: HostBuf,
        waits: &[EventId],
    ) -> DetectorResult<EventId> {
        if bounds_check_rect(
            &self.state,
            "enqueue_read_buffer_rect",
            mem,
            origin,
            region,
            row_pitch,
            slice_pitch,
        ) {
            return skipped(&self.state, queue);
        }
        let (rp, sp) = effective_pitches(region, row_pitch, slice_pitch);
        let mut rows = Vec::new();
        let mut evts = Vec::new();
        for z in 0..region[2] {
            for y in 0..region[1] {
                let off = origin[0] + (origin[1] + y) * rp + (origin[2] + z) * sp;
                let row: HostBuf = HostBuf::default();
                evts.push(self.state.runtime.enqueue_read_buffer(
                    queue,
                    mem,
                    false,
                    off,
                    region[0],
                    row.clone(),
                    waits,
                )?);
                rows.push(row);
            }
        }
        let done = self.state.runtime.enqueue_marker(queue, &evts)?;
        let width = region[0];
        self.state.runtime.on_event_complete(
            done,
            Box::new(move || {
                let mut out = dst.lock().unwrap();
                out.clear();
                for row in rows {
                    let bytes = row.lock().unwrap();
                    out.extend_from_slice(&bytes);
                    if bytes.len() < width {
                        let shortfall = width - bytes.len();
                        let new_len = out.len() + shortfall;
                        out.resize(new_len, 0);
                    }
                }
            }),
        )?;
        Ok(done)
    }

    /// Rectangular write from tightly packed rows of `data`.
    #[allow(clippy::too_many_arguments)]
    pub fn enqueue_write_buffer_rect(
        &self,
        queue: QueueId,
        mem: MemId,
        origin: [usize; 3],
        region: [usize; 3],
        row_pitch: usize,
        slice_pitch: usize,
        data: Vec<u8>,
        waits: &[EventId],
    ) -> DetectorResult<EventId> {
        if bounds_check_rect(
            &self.state,
            "enqueue_write_buffer_rect",
            mem,
            origin,
            region,
            row_pitch,
            slice_pitch,
        ) {
            return skipped(&self.state, queue);
        }
        let (rp, sp) = effective_pitches(region, row_pitch, slice_pitch);
        let mut evts = Vec::new();
        for z in 0..region[2] {
            for y in 0..region[1] {
                let off = origin[0] + (origin[1] + y) * rp + (origin[2] + z) * sp;
                let seq = (z * region[1] + y) * region[0];
                let row = data[seq.min(data.len())..(seq + region[0]).min(data.len())].to_vec();
                evts.push(
                    self.state
                        .runtime
                        .enqueue_write_buffer(queue, mem, false, off, row, waits)?,
                );
            }
        }
        Ok(self.state.runtime.enqueue_marker(queue, &evts)?)
    }

    /// Rectangular buffer-to-buffer copy.
    #[allow(clippy::too_many_arguments)]
    pub fn enqueue_copy_buffer_rect(
        &self,
        queue: QueueId,
        src: MemId,
        dst: MemId,
        src_origin: [usize; 3],
        dst_origin: [usize; 3],
        region: [usize; 3],
        src_row_pitch: usize,
        src_slice_pitch: usize,
        dst_row_pitch: usize,
        dst_slice_pitch: usize,
        waits: &[EventId],
    ) -> DetectorResult<EventId> {
        if bounds_check_rect(
            &self.state,
            "enqueue_copy_buffer_rect",
            src,
            src_origin,
            region,
            src_row_pitch,
            src_slice_pitch,
        ) || bounds_check_rect(
            &self.state,
            "enqueue_copy_buffer_rect",
            dst,
            dst_origin,
            region,
            dst_row_pitch,
            dst_slice_pitch,
        ) {
            return skipped(&self.state, queue);
        }
        let (srp, ssp) = effective_pitches(region, src_row_pitch, src_slice_pitch);
        let (drp, dsp) = effective_pitches(region, dst_row_pitch, dst_slice_pitch);
        let mut evts = Vec::new();
        for z in 0..region[2] {
            for y in 0..region[1] {
                let s_off = src_origin[0] + (src_origin[1] + y) * srp + (src_origin[2] + z) * ssp;
                let d_off = dst_origin[0] + (dst_origin[1] + y) * drp + (dst_origin[2] + z) * dsp;
                evts.push(self.state.runtime.enqueue_copy_buffer(
                    queue,
                    src,
                    dst,
                    s_off,
                    d_off,
                    region[0],
                    waits,
                )?);
            }
        }
        Ok(self.state.runtime.enqueue_marker(queue, &evts)?)
    }

    /// Map a buffer's user-visible bytes for host access.
    #[allow(clippy::too_many_arguments)]
    pub fn enqueue_map_buffer(
        &self,
        queue: QueueId,
        mem: MemId,
        blocking: bool,
        offset: usize,
        len: usize,
        waits: &[EventId],
    ) -> DetectorResult<(EventId, HostBuf)> {
        Ok(self
            .state
            .runtime
            .enqueue_map_buffer(queue, mem, blocking, offset, len, waits)?)
    }

    pub fn enqueue_unmap(
        &self,
        queue: QueueId,
        mem: MemId,
        waits: &[EventId],
    ) -> DetectorResult<EventId> {
        Ok(self.state.runtime.enqueue_unmap(queue, mem, waits)?)
    }

    // --- image transfers ---------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn enqueue_read_image(
        &self,
        queue: QueueId,
        mem: MemId,
        blocking: bool,
        origin: [usize; 3],
        region: [usize; 3],
        dst: HostBuf,
        waits: &[EventId],
    ) -> DetectorResult<EventId> {
        if bounds_check_image(
            &self.state,
            "enqueue_read_image",
            mem,
            origin,
            region,
            CanaryAccess::Denied,
        ) {
            return skipped(&self.state, queue);
        }
        Ok(self
            .state
            .runtime
            .enqueue_read_image(queue, mem, blocking, origin, region, dst, waits)?)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn enqueue_write_image(
        &self,
        queue: QueueId,
        mem: MemId,
        blocking: bool,
        origin: [usize; 3],
        region: [usize; 3],
        data: Vec<u8>,
        waits: &[EventId],
    ) -> DetectorResult<EventId> {
        if bounds_check_image(
            &self.state,
            "enqueue_write_image",
            mem,
            origin,
            region,
            CanaryAccess::Denied,
        ) {
            return skipped(&self.state, queue);
        }
        Ok(self
            .state
            .runtime
            .enqueue_write_image(queue, mem, blocking, origin, region, data, waits)?)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn enqueue_fill_image(
        &self,
        queue: QueueId,
        mem: MemId,
        color: Vec<u8>,
        origin: [usize; 3],
        region: [usize; 3],
        waits: &[EventId],
    ) -> DetectorResult<EventId> {
        if bounds_check_image(
            &self.state,
            "enqueue_fill_image",
            mem,
            origin,
            region,
            CanaryAccess::Denied,
        ) {
            return skipped(&self.state, queue);
        }
        Ok(self
            .state
            .runtime
            .enqueue_fill_image(queue, mem, color, origin, region, waits)?)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn enqueue_copy_image(
        &self,
        queue: QueueId,
        src: MemId,
        dst: MemId,
        src_origin: [usize; 3],
        dst_origin: [usize; 3],
        region: [usize; 3],
        waits: &[EventId],
    ) -> DetectorResult<EventId> {
        if bounds_check_image(
            &self.state,
            "enqueue_copy_image",
            src,
            src_origin,
            region,
            CanaryAccess::Denied,
        ) || bounds_check_image(
            &self.state,
            "enqueue_copy_image",
            dst,
            dst_origin,
            region,
            CanaryAccess::Denied,
        ) {
            return skipped(&self.state, queue);
        }
        Ok(self
            .state
            .runtime
            .enqueue_copy_image(queue, src, dst, src_origin, dst_origin, region, waits)?)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn enqueue_copy_image_to_buffer(
        &self,
        queue: QueueId,
        src: MemId,
        dst: MemId,
        src_origin: [usize; 3],
        region: [usize; 3],
        dst_offset: usize,
        waits: &[EventId],
    ) -> DetectorResult<EventId> {
        let row_bytes = self
            .state
            .mems
            .find(src)
            .and_then(|r| r.image.map(|i| i.layout.elem_size * region[0]))
            .unwrap_or(region[0]);
        let dst_origin = [dst_offset, 0, 0];
        if bounds_check_image(
            &self.state,
            "enqueue_copy_image_to_buffer",
            src,
            src_origin,
            region,
            CanaryAccess::Denied,
        ) || bounds_check_rect(
            &self.state,
            "enqueue_copy_image_to_buffer",
            dst,
            dst_origin,
            [row_bytes, region[1], region[2]],
            row_bytes,
            row_bytes * region[1],
        ) {
            return skipped(&self.state, queue);
        }
        Ok(self.state.runtime.enqueue_copy_image_to_buffer(
            queue, src, dst, src_origin, region, dst_offset, waits,
        )?)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn enqueue_copy_buffer_to_image(
        &self,
        queue: QueueId,
        src: MemId,
        dst: MemId,
        src_offset: usize,
        dst_origin: [usize; 3],
        region: [usize; 3],
        waits: &[EventId],
    ) -> DetectorResult<EventId> {
        let row_bytes = self
            .state
            .mems
            .find(dst)
            .and_then(|r| r.image.map(|i| i.layout.elem_size * region[0]))
            .unwrap_or(region[0]);
        let src_origin = [src_offset, 0, 0];
        if bounds_check_rect(
            &self.state,
            "enqueue_copy_buffer_to_image",
            src,
            src_origin,
            [row_bytes, region[1], region[2]],
            row_bytes,
            row_bytes * region[1],
        ) || bounds_check_image(
            &self.state,
            "enqueue_copy_buffer_to_image",
            dst,
            dst_origin,
            region,
            CanaryAccess::Denied,
        ) {
            return skipped(&self.state, queue);
        }
        Ok(self.state.runtime.enqueue_copy_buffer_to_image(
            queue, src, dst, src_offset, dst_origin, region, waits,
        )?)
    }

    // --- shared virtual memory ---------------------------------------

    /// Allocate a tracked shared region. The user-visible pointer hides
    /// the leading canary when underflow checking is on.
    pub fn svm_alloc(
        &self,
        ctx: ContextId,
        flags: MemFlags,
        size: usize,
        alignment: usize,
    ) -> DetectorResult<SvmPtr> {
        svm_alloc_impl(
            &self.state,
            ctx,
            flags,
            size,
            alignment,
            AllocPurpose::User,
        )
    }

    /// Free a tracked shared region. Fine-grained regions park on the
    /// reuse pool instead of being handed back to the runtime.
    pub fn svm_free(&self, ctx: ContextId, ptr: SvmPtr) -> DetectorResult<()> {
        svm_free_impl(&self.state, ctx, ptr)
    }

    /// Deferred shared-memory free: drain the queue, drop the records,
    /// then signal completion and run the caller's callback.
    pub fn enqueue_svm_free(
        &self,
        queue: QueueId,
        ptrs: Vec<SvmPtr>,
        done: Option<Box<dyn FnOnce(Vec<SvmPtr>) + Send>>,
        waits: &[EventId],
    ) -> DetectorResult<EventId> {
        // Drain so nothing queued still reads the regions being dropped.
        self.state.runtime.finish(queue)?;
        let ctx = self.state.runtime.queue_context(queue)?;
        for ptr in &ptrs {
            svm_free_impl(&self.state, ctx, *ptr)?;
        }
        let evt = self.state.runtime.enqueue_marker(queue, waits)?;
        if let Some(done) = done {
            self.state
                .runtime
                .on_event_complete(evt, Box::new(move || done(ptrs)))?;
        }
        Ok(evt)
    }

    /// Map a shared region for host access; the mapping is widened onto
    /// the padded allocation underneath.
    pub fn enqueue_svm_map(
        &self,
        queue: QueueId,
        ptr: SvmPtr,
        len: usize,
        waits: &[EventId],
    ) -> DetectorResult<EventId> {
        let (target, span) = match self.state.svms.find_containing(ptr) {
            Some(rec) => (
                rec.base,
                len + poison_regions(self.state.config.underflow_check) * POISON_FILL_LENGTH,
            ),
            None => (ptr, len),
        };
        Ok(self
            .state
            .runtime
            .enqueue_svm_map(queue, target, span, waits)?)
    }

    pub fn enqueue_svm_unmap(
        &self,
        queue: QueueId,
        ptr: SvmPtr,
        waits: &[EventId],
    ) -> DetectorResult<EventId> {
        let target = match self.state.svms.find_containing(ptr) {
            Some(rec) => rec.base,
            None => ptr,
        };
        Ok(self.state.runtime.enqueue_svm_unmap(queue, target, waits)?)
    }

    pub fn enqueue_svm_fill(
        &self,
        queue: QueueId,
        ptr: SvmPtr,
        pattern: Vec<u8>,
        len: usize,
        waits: &[EventId],
    ) -> DetectorResult<EventId> {
        Ok(self
            .state
            .runtime
            .enqueue_svm_fill(queue, ptr, pattern, len, waits)?)
    }

    pub fn enqueue_svm_memcpy(
        &self,
        queue: QueueId,
        dst: SvmPtr,
        src: SvmPtr,
        len: usize,
        waits: &[EventId],
    ) -> DetectorResult<EventId> {
        Ok(self
            .state
            .runtime
            .enqueue_svm_memcpy(queue, dst, src, len, waits)?)
    }
}

fn effective_pitches(region: [usize; 3], row_pitch: usize, slice_pitch: usize) -> (usize, usize) {
    let rp = if row_pitch == 0 { region[0] } else { row_pitch };
    let sp = if slice_pitch == 0 { rp * region[1] } else { slice_pitch };
    (rp, sp)
}

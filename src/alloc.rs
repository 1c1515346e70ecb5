// CLASSIFICATION: COMMUNITY
// Filename: alloc.rs v0.8
// Date Modified: 2027-01-16
// Author: Lukas Bower

//! Allocation interception.
//!
//! Buffer creation grows the request by the canary layout, poisons the
//! padding, and hands the caller a sub-region view that exposes only the
//! user bytes. Image creation grows every populated dimension and fills
//! the slabs. Two classes stay unpadded: caller-owned backing storage the
//! engine must not grow, and views of an already-padded parent.

use crate::engine::{AllocPurpose, Detector, EngineState};
use crate::error::{DetectorError, DetectorResult};
use crate::layout::{
    poison_regions, BufferLayout, ImageDesc, ImageFormat, ImageKind, ImageLayout,
    POISON_FILL_LENGTH,
};
use crate::registry::{ImageInfo, MemRecord};
use crate::runtime::{ComputeRuntime, ContextId, HostBuf, HostInit, MemFlags, MemId};

/// Initial contents for a tracked buffer.
pub enum BufferInit {
    /// Copy these bytes into the new allocation.
    Copy(Vec<u8>),
    /// Use the caller's storage as backing memory. The engine cannot
    /// safely grow memory it does not own, so such buffers carry no
    /// canary.
    Use(HostBuf),
}

fn sanitized_flags(flags: MemFlags) -> MemFlags {
    let mut f = flags;
    f.remove(MemFlags::READ_ONLY | MemFlags::WRITE_ONLY);
    f.insert(MemFlags::READ_WRITE);
    f
}

fn host_ptr_flags() -> MemFlags {
    MemFlags::USE_HOST_PTR | MemFlags::COPY_HOST_PTR | MemFlags::ALLOC_HOST_PTR
}

pub(crate) fn create_buffer_impl<R: ComputeRuntime>(
    state: &EngineState<R>,
    ctx: ContextId,
    flags: MemFlags,
    size: usize,
    init: Option<BufferInit>,
    purpose: AllocPurpose,
) -> DetectorResult<MemId> {
    if size == 0 {
        return Err(crate::error::RuntimeError::InvalidBufferSize.into());
    }
    let flags = sanitized_flags(flags);

    if let Some(BufferInit::Use(host)) = init {
        match purpose {
            AllocPurpose::User => state.accounting.on_alloc(size as u64, 0),
            AllocPurpose::Internal => state.accounting.on_alloc(0, size as u64),
        }
        let mem = state.runtime.create_buffer(
            ctx,
            flags | MemFlags::USE_HOST_PTR,
            size,
            Some(HostInit::Use(host)),
        )?;
        state.mems.insert(MemRecord {
            handle: mem,
            context: ctx,
            flags,
            size,
            has_canary: false,
            is_sub: false,
            origin: 0,
            parent: None,
            image: None,
            host_backed: true,
            ref_count: 1,
            is_internal: purpose == AllocPurpose::Internal,
        });
        return Ok(mem);
    }

    let layout = BufferLayout::new(size, state.config.underflow_check);
    match purpose {
        AllocPurpose::User => state
            .accounting
            .on_alloc(size as u64, layout.canary_byte_count() as u64),
        AllocPurpose::Internal => state.accounting.on_alloc(0, layout.padded_size() as u64),
    }
    let contents = match &init {
        Some(BufferInit::Copy(bytes)) => layout.build_poisoned(Some(bytes)),
        _ => layout.build_poisoned(None),
    };
    // An allocation failure here is the runtime's own condition; surface
    // it unchanged.
    let parent = state.runtime.create_buffer(
        ctx,
        (flags - host_ptr_flags()) | MemFlags::COPY_HOST_PTR,
        layout.padded_size(),
        Some(HostInit::Copy(contents)),
    )?;
    let view =
        state
            .runtime
            .create_sub_buffer(parent, flags - host_ptr_flags(), layout.origin(), size)?;
    state.mems.insert(MemRecord {
        handle: view,
        context: ctx,
        flags,
        size,
        has_canary: true,
        is_sub: false,
        origin: layout.origin(),
        parent: Some(parent),
        image: None,
        host_backed: false,
        ref_count: 1,
        is_internal: purpose == AllocPurpose::Internal,
    });
    Ok(view)
}

pub(crate) fn create_image_impl<R: ComputeRuntime>(
    state: &EngineState<R>,
    ctx: ContextId,
    flags: MemFlags,
    format: ImageFormat,
    desc: &ImageDesc,
    host: Option<Vec<u8>>,
    purpose: AllocPurpose,
) -> DetectorResult<MemId> {
    let desc = desc.normalized();
    let elem = format.element_size();
    if elem == 0 {
        return Err(crate::error::RuntimeError::InvalidBufferSize.into());
    }
    let flags = sanitized_flags(flags);

    if flags.contains(MemFlags::USE_HOST_PTR) {
        let layout = ImageLayout::unpadded(&desc, elem);
        state.accounting.on_alloc(layout.logical_bytes() as u64, 0);
        let mem = state
            .runtime
            .create_image(ctx, flags, format, &desc, host)?;
        state.mems.insert(MemRecord {
            handle: mem,
            context: ctx,
            flags,
            size: layout.logical_bytes(),
            has_canary: false,
            is_sub: false,
            origin: 0,
            parent: None,
            image: Some(ImageInfo {
                format,
                desc,
                layout,
            }),
            host_backed: true,
            ref_count: 1,
            is_internal: purpose == AllocPurpose::Internal,
        });
        return Ok(mem);
    }

    let layout = ImageLayout::new(&desc, elem);
    match purpose {
        AllocPurpose::User => state
            .accounting
            .on_alloc(layout.logical_bytes() as u64, layout.canary_bytes() as u64),
        AllocPurpose::Internal => state.accounting.on_alloc(0, layout.padded_bytes() as u64),
    }
    let contents = layout.build_poisoned(host.as_deref(), &desc);
    let padded_desc = layout.padded_desc(&desc);
    let mem = state.runtime.create_image(
        ctx,
        flags - host_ptr_flags(),
        format,
        &padded_desc,
        Some(contents),
    )?;
    state.mems.insert(MemRecord {
        handle: mem,
        context: ctx,
        flags,
        size: layout.logical_bytes(),
        has_canary: true,
        is_sub: false,
        origin: 0,
        parent: None,
        image: Some(ImageInfo {
            format,
            desc,
            layout,
        }),
        host_backed: false,
        ref_count: 1,
        is_internal: purpose == AllocPurpose::Internal,
    });
    Ok(mem)
}

pub(crate) fn release_mem_impl<R: ComputeRuntime>(
    state: &EngineState<R>,
    mem: MemId,
) -> DetectorResult<()> {
    let Some((count, dead)) = state.mems.release(mem) else {
        // Untracked object, forward as-is.
        state.runtime.release_mem(mem)?;
        return Ok(());
    };
    if count == 0 {
        if let Some(rec) = &dead {
            let (user, overhead) = freed_bytes(rec);
            state.accounting.on_free(user, overhead);
        }
    }
    state.runtime.release_mem(mem)?;
    if let Some(parent) = dead.as_ref().and_then(|r| r.parent) {
        state.runtime.release_mem(parent)?;
    } else if count > 0 {
        if let Some(rec) = state.mems.find(mem) {
            if let Some(parent) = rec.parent {
                state.runtime.release_mem(parent)?;
            }
        }
    }
    Ok(())
}

fn freed_bytes(rec: &MemRecord) -> (u64, u64) {
    if rec.is_internal {
        let overhead = if let Some(info) = &rec.image {
            info.layout.padded_bytes()
        } else if rec.has_canary {
            rec.size + poison_regions(rec.origin != 0) * POISON_FILL_LENGTH
        } else {
            rec.size
        };
        return (0, overhead as u64);
    }
    if !rec.has_canary {
        return (rec.size as u64, 0);
    }
    if let Some(info) = &rec.image {
        return (
            info.layout.logical_bytes() as u64,
            info.layout.canary_bytes() as u64,
        );
    }
    (
        rec.size as u64,
        (poison_regions(rec.origin != 0) * POISON_FILL_LENGTH) as u64,
    )
}

impl<R: ComputeRuntime> Detector<R> {
    /// Create a tracked linear buffer. The returned handle exposes only
    /// the user-visible bytes; the poisoned padding lives in a hidden
    /// parent allocation.
    pub fn create_buffer(
        &self,
        ctx: ContextId,
        flags: MemFlags,
        size: usize,
        init: Option<BufferInit>,
    ) -> DetectorResult<MemId> {
        create_buffer_impl(&self.state, ctx, flags, size, init, AllocPurpose::User)
    }

    /// Create a view into an existing buffer. Views are never padded;
    /// their addressing is adjusted onto the padded parent underneath.
    pub fn create_sub_buffer(
        &self,
        parent: MemId,
        flags: MemFlags,
        origin: usize,
        size: usize,
    ) -> DetectorResult<MemId> {
        let parent_rec = self
            .state
            .mems
            .find(parent)
            .ok_or(DetectorError::Runtime(
                crate::error::RuntimeError::InvalidMem,
            ))?;
        let (real_parent, shift) = if parent_rec.has_canary {
            (
                parent_rec.parent.unwrap_or(parent),
                parent_rec.origin,
            )
        } else {
            (parent, 0)
        };
        let sub = self.state.runtime.create_sub_buffer(
            real_parent,
            sanitized_flags(flags),
            shift + origin,
            size,
        )?;
        self.state.mems.insert(MemRecord {
            handle: sub,
            context: parent_rec.context,
            flags: sanitized_flags(flags),
            size,
            has_canary: false,
            is_sub: true,
            origin: shift + origin,
            parent: None,
            image: None,
            host_backed: parent_rec.host_backed,
            ref_count: 1,
            is_internal: parent_rec.is_internal,
        });
        Ok(sub)
    }

    /// Create a tracked image through the current descriptor-based entry
    /// point.
    pub fn create_image(
        &self,
        ctx: ContextId,
        flags: MemFlags,
        format: ImageFormat,
        desc: &ImageDesc,
        host: Option<Vec<u8>>,
    ) -> DetectorResult<MemId> {
        create_image_impl(
            &self.state,
            ctx,
            flags,
            format,
            desc,
            host,
            AllocPurpose::User,
        )
    }

    /// Legacy 2-D image creation entry point.
    #[allow(clippy::too_many_arguments)]
    pub fn create_image_2d(
        &self,
        ctx: ContextId,
        flags: MemFlags,
        format: ImageFormat,
        width: usize,
        height: usize,
        row_pitch: usize,
        host: Option<Vec<u8>>,
    ) -> DetectorResult<MemId> {
        let desc = ImageDesc {
            kind: ImageKind::Dim2,
            width,
            height,
            depth: 1,
            array_size: 1,
            row_pitch,
            slice_pitch: 0,
        };
        self.create_image(ctx, flags, format, &desc, host)
    }

    /// Legacy 3-D image creation entry point.
    #[allow(clippy::too_many_arguments)]
    pub fn create_image_3d(
        &self,
        ctx: ContextId,
        flags: MemFlags,
        format: ImageFormat,
        width: usize,
        height: usize,
        depth: usize,
        row_pitch: usize,
        slice_pitch: usize,
        host: Option<Vec<u8>>,
    ) -> DetectorResult<MemId> {
        let desc = ImageDesc {
            kind: ImageKind::Dim3,
            width,
            height,
            depth,
            array_size: 1,
            row_pitch,
            slice_pitch,
        };
        self.create_image(ctx, flags, format, &desc, host)
    }

    /// Bump a region's reference count, and its hidden parent's with it.
    pub fn retain_mem(&self, mem: MemId) -> DetectorResult<()> {
        let parent = self.state.mems.find(mem).and_then(|r| r.parent);
        self.state.mems.retain(mem);
        self.state.runtime.retain_mem(mem)?;
        if let Some(parent) = parent {
            self.state.runtime.retain_mem(parent)?;
        }
        Ok(())
    }

    /// Drop one reference. At zero the record dies and the padded parent
    /// allocation is released along with the view.
    pub fn release_mem(&self, mem: MemId) -> DetectorResult<()> {
        release_mem_impl(&self.state, mem)
    }
}

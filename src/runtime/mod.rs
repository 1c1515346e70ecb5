// CLASSIFICATION: COMMUNITY
// Filename: mod.rs v0.9
// Date Modified: 2027-01-14
// Author: Lukas Bower

//! The compute-runtime seam.
//!
//! Everything the detector needs from the native runtime is expressed on
//! [`ComputeRuntime`]: contexts with in-order command queues, completion
//! events carrying callbacks and profiling times, buffers with sub-region
//! views, flattened images, shared allocations addressed by pointer value,
//! and kernels. The engine's own checker kernels are requested through
//! [`BuiltinKernel`] so each runtime can supply its native form.

pub mod host;

use std::sync::{Arc, Mutex};

use bitflags::bitflags;

use crate::error::RuntimeError;
use crate::layout::{ImageDesc, ImageFormat};

macro_rules! handle_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);
    };
}

handle_type!(
    /// An isolated execution domain: devices plus memory.
    ContextId
);
handle_type!(
    /// One in-order command pipeline inside a context.
    QueueId
);
handle_type!(
    /// A buffer, sub-buffer, or image object.
    MemId
);
handle_type!(
    /// A kernel object with its argument slots.
    KernelId
);
handle_type!(
    /// A completion signal for one unit of enqueued work.
    EventId
);

/// A shared-virtual-memory pointer. Plain value arithmetic is allowed;
/// interior pointers resolve back to their allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SvmPtr(pub u64);

impl SvmPtr {
    pub fn offset(self, bytes: usize) -> SvmPtr {
        SvmPtr(self.0 + bytes as u64)
    }
}

bitflags! {
    /// Allocation flags, shared by buffers, images, and SVM.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MemFlags: u32 {
        const READ_WRITE     = 1 << 0;
        const READ_ONLY      = 1 << 1;
        const WRITE_ONLY     = 1 << 2;
        const USE_HOST_PTR   = 1 << 3;
        const COPY_HOST_PTR  = 1 << 4;
        const ALLOC_HOST_PTR = 1 << 5;
        const SVM_FINE_GRAIN = 1 << 6;
        const SVM_ATOMICS    = 1 << 7;
    }
}

/// Host-visible staging storage shared with the runtime.
pub type HostBuf = Arc<Mutex<Vec<u8>>>;

/// Initial contents for a new allocation.
pub enum HostInit {
    /// Copy these bytes in; the runtime owns its allocation.
    Copy(Vec<u8>),
    /// Use the caller's storage as backing memory.
    Use(HostBuf),
}

/// One kernel argument value.
#[derive(Debug, Clone)]
pub enum ArgValue {
    Bytes(Vec<u8>),
    Mem(MemId),
    Svm(SvmPtr),
}

/// Broad device class, used to place verification work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Cpu,
    Accelerator,
}

/// Raw device capability limits, before padding adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    pub image2d_max_width: usize,
    pub image2d_max_height: usize,
    pub image3d_max_width: usize,
    pub image3d_max_height: usize,
    pub image3d_max_depth: usize,
    pub image_buffer_max_elems: usize,
    pub max_alloc_size: usize,
}

/// Timestamps of one completed unit of work, in nanoseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProfilingTimes {
    pub queued_ns: u64,
    pub submit_ns: u64,
    pub start_ns: u64,
    pub end_ns: u64,
}

/// The engine's device-side checker kernels. Argument protocols are
/// fixed; see `verify` for the slot order each variant expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinKernel {
    /// Word-wise scan of staged canary copies (buffer scratch plus an
    /// optional shared scratch region), atomic-minimum first corrupted
    /// offset per source region.
    CanaryScan,
    /// CanaryScan over a staged buffer scratch plus a device-side table
    /// of shared-region canary pointers scanned indirectly, repairing
    /// the poison pattern while scanning.
    CanaryScanSvmPtr,
    /// Byte-wise scan of staged image canaries, segmented by a
    /// per-region end-offset table.
    CanaryScanImage,
    /// Scan one region's own canary run in place, repairing the poison
    /// pattern while scanning.
    CanaryScanInPlace,
}

/// Everything the engine asks of the underlying compute runtime.
#[allow(clippy::too_many_arguments)]
pub trait ComputeRuntime: Send + Sync + 'static {
    // --- introspection ------------------------------------------------
    fn device_kind(&self, ctx: ContextId) -> Result<DeviceKind, RuntimeError>;
    fn device_limits(&self, ctx: ContextId) -> Result<DeviceLimits, RuntimeError>;

    // --- queues -------------------------------------------------------
    fn create_queue(&self, ctx: ContextId, profiling: bool) -> Result<QueueId, RuntimeError>;
    fn queue_context(&self, queue: QueueId) -> Result<ContextId, RuntimeError>;
    fn finish(&self, queue: QueueId) -> Result<(), RuntimeError>;
    fn release_queue(&self, queue: QueueId) -> Result<(), RuntimeError>;

    // --- events -------------------------------------------------------
    fn create_user_event(&self, ctx: ContextId) -> Result<EventId, RuntimeError>;
    fn complete_user_event(&self, evt: EventId) -> Result<(), RuntimeError>;
    fn event_context(&self, evt: EventId) -> Result<ContextId, RuntimeError>;
    fn wait_events(&self, evts: &[EventId]) -> Result<(), RuntimeError>;
    /// Run `f` once the event completes; immediately when it already has.
    fn on_event_complete(
        &self,
        evt: EventId,
        f: Box<dyn FnOnce() + Send>,
    ) -> Result<(), RuntimeError>;
    fn retain_event(&self, evt: EventId) -> Result<(), RuntimeError>;
    fn release_event(&self, evt: EventId) -> Result<(), RuntimeError>;
    fn event_profiling(&self, evt: EventId) -> Result<ProfilingTimes, RuntimeError>;
    fn enqueue_marker(&self, queue: QueueId, waits: &[EventId]) -> Result<EventId, RuntimeError>;

    // --- memory objects ----------------------------------------------
    fn create_buffer(
        &self,
        ctx: ContextId,
        flags: MemFlags,
        size: usize,
        init: Option<HostInit>,
    ) -> Result<MemId, RuntimeError>;
    fn create_sub_buffer(
        &self,
        parent: MemId,
        flags: MemFlags,
        origin: usize,
        size: usize,
    ) -> Result<MemId, RuntimeError>;
    fn create_image(
        &self,
        ctx: ContextId,
        flags: MemFlags,
        format: ImageFormat,
        desc: &ImageDesc,
        init: Option<Vec<u8>>,
    ) -> Result<MemId, RuntimeError>;
    fn retain_mem(&self, mem: MemId) -> Result<(), RuntimeError>;
    fn release_mem(&self, mem: MemId) -> Result<(), RuntimeError>;
    fn mem_context(&self, mem: MemId) -> Result<ContextId, RuntimeError>;

    // --- buffer transfers --------------------------------------------
    fn enqueue_read_buffer(
        &self,
        queue: QueueId,
        mem: MemId,
        blocking: bool,
        offset: usize,
        len: usize,
        dst: HostBuf,
        waits: &[EventId],
    ) -> Result<EventId, RuntimeError>;
    fn enqueue_write_buffer(
        &self,
        queue: QueueId,
        mem: MemId,
        blocking: bool,
        offset: usize,
        data: Vec<u8>,
        waits: &[EventId],
    ) -> Result<EventId, RuntimeError>;
    fn enqueue_fill_buffer(
        &self,
        queue: QueueId,
        mem: MemId,
        pattern: Vec<u8>,
        offset: usize,
        len: usize,
        waits: &[EventId],
    ) -> Result<EventId, RuntimeError>;
    fn enqueue_copy_buffer(
        &self,
        queue: QueueId,
        src: MemId,
        dst: MemId,
        src_offset: usize,
        dst_offset: usize,
        len: usize,
        waits: &[EventId],
    ) -> Result<EventId, RuntimeError>;
    fn enqueue_map_buffer(
        &self,
        queue: QueueId,
        mem: MemId,
        blocking: bool,
        offset: usize,
        len: usize,
        waits: &[EventId],
    ) -> Result<(EventId, HostBuf), RuntimeError>;
    fn enqueue_unmap(
        &self,
        queue: QueueId,
        mem: MemId,
        waits: &[EventId],
    ) -> Result<EventId, RuntimeError>;

    // --- image transfers ---------------------------------------------
    fn enqueue_read_image(
        &self,
        queue: QueueId,
        mem: MemId,
        blocking: bool,
        origin: [usize; 3],
        region: [usize; 3],
        dst: HostBuf,
        waits: &[EventId],
    ) -> Result<EventId, RuntimeError>;
    fn enqueue_write_image(
        &self,
        queue: QueueId,
        mem: MemId,
        blocking: bool,
        origin: [usize; 3],
        region: [usize; 3],
        data: Vec<u8>,
        waits: &[EventId],
    ) -> Result<EventId, RuntimeError>;
    fn enqueue_fill_image(
        &self,
        queue: QueueId,
        mem: MemId,
        color: Vec<u8>,
        origin: [usize; 3],
        region: [usize; 3],
        waits: &[EventId],
    ) -> Result<EventId, RuntimeError>;
    fn enqueue_copy_image(
        &self,
        queue: QueueId,
        src: MemId,
        dst: MemId,
        src_origin: [usize; 3],
        dst_origin: [usize; 3],
        region: [usize; 3],
        waits: &[EventId],
    ) -> Result<EventId, RuntimeError>;
    fn enqueue_copy_image_to_buffer(
        &self,
        queue: QueueId,
        src: MemId,
        dst: MemId,
        src_origin: [usize; 3],
        region: [usize; 3],
        dst_offset: usize,
        waits: &[EventId],
    ) -> Result<EventId, RuntimeError>;
    fn enqueue_copy_buffer_to_image(
        &self,
        queue: QueueId,
        src: MemId,
        dst: MemId,
        src_offset: usize,
        dst_origin: [usize; 3],
        region: [usize; 3],
        waits: &[EventId],
    ) -> Result<EventId, RuntimeError>;

    // --- shared virtual memory ---------------------------------------
    fn svm_alloc(
        &self,
        ctx: ContextId,
        flags: MemFlags,
        size: usize,
        alignment: usize,
    ) -> Result<SvmPtr, RuntimeError>;
    fn svm_free(&self, ctx: ContextId, ptr: SvmPtr) -> Result<(), RuntimeError>;
    fn enqueue_svm_memcpy(
        &self,
        queue: QueueId,
        dst: SvmPtr,
        src: SvmPtr,
        len: usize,
        waits: &[EventId],
    ) -> Result<EventId, RuntimeError>;
    fn enqueue_svm_fill(
        &self,
        queue: QueueId,
        ptr: SvmPtr,
        pattern: Vec<u8>,
        len: usize,
        waits: &[EventId],
    ) -> Result<EventId, RuntimeError>;
    fn enqueue_svm_map(
        &self,
        queue: QueueId,
        ptr: SvmPtr,
        len: usize,
        waits: &[EventId],
    ) -> Result<EventId, RuntimeError>;
    fn enqueue_svm_unmap(
        &self,
        queue: QueueId,
        ptr: SvmPtr,
        waits: &[EventId],
    ) -> Result<EventId, RuntimeError>;
    /// Host read of mapped shared memory.
    fn svm_read(&self, ptr: SvmPtr, len: usize) -> Result<Vec<u8>, RuntimeError>;
    /// Host write into mapped shared memory.
    fn svm_write(&self, ptr: SvmPtr, data: &[u8]) -> Result<(), RuntimeError>;

    // --- kernels ------------------------------------------------------
    fn kernel_name(&self, kernel: KernelId) -> Result<String, RuntimeError>;
    fn kernel_context(&self, kernel: KernelId) -> Result<ContextId, RuntimeError>;
    fn kernel_num_args(&self, kernel: KernelId) -> Result<u32, RuntimeError>;
    /// New kernel object with the same entry point and an empty arg table.
    fn clone_kernel(&self, kernel: KernelId) -> Result<KernelId, RuntimeError>;
    fn set_kernel_arg(
        &self,
        kernel: KernelId,
        index: u32,
        value: ArgValue,
    ) -> Result<(), RuntimeError>;
    fn builtin_kernel(&self, ctx: ContextId, which: BuiltinKernel)
        -> Result<KernelId, RuntimeError>;
    fn enqueue_kernel(
        &self,
        queue: QueueId,
        kernel: KernelId,
        grid: [usize; 3],
        waits: &[EventId],
    ) -> Result<EventId, RuntimeError>;
    fn release_kernel(&self, kernel: KernelId) -> Result<(), RuntimeError>;
}

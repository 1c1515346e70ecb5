// CLASSIFICATION: COMMUNITY
// Filename: host.rs v0.9
// Date Modified: 2027-01-15
// Author: Lukas Bower

//! In-process reference implementation of [`ComputeRuntime`].
//!
//! Each queue is one worker thread draining an in-order command channel;
//! commands wait their input events before running, so the dependency DAG
//! behaves like a real accelerator pipeline. Buffers are byte arrays
//! shared between a parent allocation and its sub-region views, which
//! means an overrun through a view really lands in the parent's padding.
//! Kernels are registered closures; the engine's checker kernels are
//! implemented natively with the same semantics as their device forms.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread;
use std::time::Instant;

use log::debug;

use crate::error::RuntimeError;
use crate::layout::{ImageDesc, ImageFormat, ImageKind};

use super::{
    ArgValue, BuiltinKernel, ComputeRuntime, ContextId, DeviceKind, DeviceLimits, EventId, HostBuf,
    HostInit, KernelId, MemFlags, MemId, ProfilingTimes, QueueId, SvmPtr,
};

/// Closure form of a user kernel. The body runs once per launch with the
/// full grid available through [`KernelIo`].
pub type KernelBody = Arc<dyn Fn(&KernelIo<'_>) + Send + Sync>;

struct EventCore {
    id: u64,
    ctx: ContextId,
    state: Mutex<EvState>,
    cv: Condvar,
}

#[derive(Default)]
struct EvState {
    complete: bool,
    times: ProfilingTimes,
    callbacks: Vec<Box<dyn FnOnce() + Send>>,
    refs: i64,
}

impl EventCore {
    fn new(id: u64, ctx: ContextId) -> Arc<Self> {
        Arc::new(EventCore {
            id,
            ctx,
            state: Mutex::new(EvState {
                refs: 1,
                ..Default::default()
            }),
            cv: Condvar::new(),
        })
    }

    fn complete(&self, times: ProfilingTimes) {
        let callbacks = {
            let mut st = self.state.lock().unwrap();
            if st.complete {
                return;
            }
            st.complete = true;
            st.times = times;
            std::mem::take(&mut st.callbacks)
        };
        self.cv.notify_all();
        for cb in callbacks {
            cb();
        }
    }

    fn wait(&self) {
        let mut st = self.state.lock().unwrap();
        while !st.complete {
            st = self.cv.wait(st).unwrap();
        }
    }

    fn add_callback(&self, f: Box<dyn FnOnce() + Send>) {
        let run_now = {
            let mut st = self.state.lock().unwrap();
            if st.complete {
                true
            } else {
                st.callbacks.push(f);
                return;
            }
        };
        if run_now {
            f();
        }
    }
}

type Work = Box<dyn FnOnce(&Core) + Send>;

enum Command {
    Task {
        queued_ns: u64,
        waits: Vec<Arc<EventCore>>,
        work: Work,
        evt: Arc<EventCore>,
    },
    Finish(mpsc::Sender<()>),
}

struct QueueState {
    ctx: ContextId,
    tx: mpsc::Sender<Command>,
}

struct ContextState {
    device: DeviceKind,
    limits: DeviceLimits,
}

struct ImgMeta {
    elem: usize,
    dims: [usize; 3],
}

struct MemObject {
    ctx: ContextId,
    data: Arc<Mutex<Vec<u8>>>,
    origin: usize,
    len: usize,
    refs: i64,
    image: Option<ImgMeta>,
}

struct SvmAlloc {
    ctx: ContextId,
    base: u64,
    size: usize,
    data: Arc<Mutex<Vec<u8>>>,
}

enum KernelCode {
    User(KernelBody),
    Builtin(BuiltinKernel),
}

struct KernelObject {
    ctx: ContextId,
    name: String,
    nargs: u32,
    code: KernelCode,
    args: Mutex<BTreeMap<u32, ArgValue>>,
}

struct Core {
    next_handle: AtomicU64,
    next_svm: AtomicU64,
    epoch: Instant,
    contexts: Mutex<HashMap<u64, ContextState>>,
    queues: Mutex<HashMap<u64, QueueState>>,
    events: Mutex<HashMap<u64, Arc<EventCore>>>,
    mems: Mutex<HashMap<u64, MemObject>>,
    svms: Mutex<BTreeMap<u64, SvmAlloc>>,
    kernels: Mutex<HashMap<u64, KernelObject>>,
}

/// Reference runtime handle. Clones share one device state.
#[derive(Clone)]
pub struct HostRuntime {
    core: Arc<Core>,
}

impl Default for HostRuntime {
    fn default() -> Self {
        Self::new()
    }
}

const DEFAULT_LIMITS: DeviceLimits = DeviceLimits {
    image2d_max_width: 16384,
    image2d_max_height: 16384,
    image3d_max_width: 2048,
    image3d_max_height: 2048,
    image3d_max_depth: 2048,
    image_buffer_max_elems: 1 << 24,
    max_alloc_size: 1 << 30,
};

impl HostRuntime {
    pub fn new() -> Self {
        HostRuntime {
            core: Arc::new(Core {
                next_handle: AtomicU64::new(1),
                next_svm: AtomicU64::new(0x1000_0000),
                epoch: Instant::now(),
                contexts: Mutex::new(HashMap::new()),
                queues: Mutex::new(HashMap::new()),
                events: Mutex::new(HashMap::new()),
                mems: Mutex::new(HashMap::new()),
                svms: Mutex::new(BTreeMap::new()),
                kernels: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Create an execution context of the given device class.
    pub fn create_context(&self, device: DeviceKind) -> ContextId {
        let id = self.core.fresh_handle();
        self.core.contexts.lock().unwrap().insert(
            id,
            ContextState {
                device,
                limits: DEFAULT_LIMITS,
            },
        );
        ContextId(id)
    }

    /// Register a kernel body under a context. `nargs` is the declared
    /// argument count the engine will see.
    pub fn define_kernel(&self, ctx: ContextId, name: &str, nargs: u32, body: KernelBody) -> KernelId {
        let id = self.core.fresh_handle();
        self.core.kernels.lock().unwrap().insert(
            id,
            KernelObject {
                ctx,
                name: name.to_owned(),
                nargs,
                code: KernelCode::User(body),
                args: Mutex::new(BTreeMap::new()),
            },
        );
        KernelId(id)
    }

    /// Direct host inspection of a memory object's user-visible bytes.
    /// Test helper; bypasses the queue pipeline.
    pub fn debug_read_mem(&self, mem: MemId, offset: usize, len: usize) -> Vec<u8> {
        self.core.mem_read_raw(mem, offset, len)
    }
}

impl Core {
    fn fresh_handle(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::Relaxed)
    }

    fn now_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    fn new_event(&self, ctx: ContextId) -> Arc<EventCore> {
        let id = self.fresh_handle();
        let evt = EventCore::new(id, ctx);
        self.events.lock().unwrap().insert(id, evt.clone());
        evt
    }

    fn event(&self, evt: EventId) -> Result<Arc<EventCore>, RuntimeError> {
        self.events
            .lock()
            .unwrap()
            .get(&evt.0)
            .cloned()
            .ok_or(RuntimeError::InvalidEvent)
    }

    fn resolve_waits(&self, waits: &[EventId]) -> Result<Vec<Arc<EventCore>>, RuntimeError> {
        waits.iter().map(|e| self.event(*e)).collect()
    }

    fn mem_view(&self, mem: MemId) -> Result<(Arc<Mutex<Vec<u8>>>, usize, usize), RuntimeError> {
        let mems = self.mems.lock().unwrap();
        let obj = mems.get(&mem.0).ok_or(RuntimeError::InvalidMem)?;
        Ok((obj.data.clone(), obj.origin, obj.len))
    }

    /// Raw read relative to a view's origin, truncated at the end of the
    /// underlying allocation.
    fn mem_read_raw(&self, mem: MemId, offset: usize, len: usize) -> Vec<u8> {
        let Ok((data, origin, _)) = self.mem_view(mem) else {
            return Vec::new();
        };
        let bytes = data.lock().unwrap();
        let start = (origin + offset).min(bytes.len());
        let end = (start + len).min(bytes.len());
        bytes[start..end].to_vec()
    }

    /// Raw write relative to a view's origin. Writes past the view length
    /// spill into the rest of the underlying allocation, exactly like an
    /// out-of-bounds access through a sub-region on contiguous memory.
    fn mem_write_raw(&self, mem: MemId, offset: usize, src: &[u8]) {
        let Ok((data, origin, _)) = self.mem_view(mem) else {
            return;
        };
        let mut bytes = data.lock().unwrap();
        let start = (origin + offset).min(bytes.len());
        let end = (start + src.len()).min(bytes.len());
        let n = end - start;
        bytes[start..end].copy_from_slice(&src[..n]);
    }

    fn svm_locate(&self, ptr: SvmPtr) -> Result<(Arc<Mutex<Vec<u8>>>, usize, usize), RuntimeError> {
        let svms = self.svms.lock().unwrap();
        let (_, alloc) = svms
            .range(..=ptr.0)
            .next_back()
            .ok_or(RuntimeError::InvalidSvmPointer(ptr.0))?;
        let off = (ptr.0 - alloc.base) as usize;
        if off >= alloc.size {
            return Err(RuntimeError::InvalidSvmPointer(ptr.0));
        }
        Ok((alloc.data.clone(), off, alloc.size))
    }

    fn svm_read_raw(&self, ptr: SvmPtr, len: usize) -> Result<Vec<u8>, RuntimeError> {
        let (data, off, _) = self.svm_locate(ptr)?;
        let bytes = data.lock().unwrap();
        let start = off.min(bytes.len());
        let end = (start + len).min(bytes.len());
        Ok(bytes[start..end].to_vec())
    }

    fn svm_write_raw(&self, ptr: SvmPtr, src: &[u8]) -> Result<(), RuntimeError> {
        let (data, off, _) = self.svm_locate(ptr)?;
        let mut bytes = data.lock().unwrap();
        let start = off.min(bytes.len());
        let end = (start + src.len()).min(bytes.len());
        let n = end - start;
        bytes[start..end].copy_from_slice(&src[..n]);
        Ok(())
    }

    fn enqueue(
        &self,
        queue: QueueId,
        waits: &[EventId],
        work: Work,
    ) -> Result<Arc<EventCore>, RuntimeError> {
        let (tx, ctx) = {
            let queues = self.queues.lock().unwrap();
            let q = queues.get(&queue.0).ok_or(RuntimeError::InvalidQueue)?;
            (q.tx.clone(), q.ctx)
        };
        let evt = self.new_event(ctx);
        let waits = self.resolve_waits(waits)?;
        tx.send(Command::Task {
            queued_ns: self.now_ns(),
            waits,
            work,
            evt: evt.clone(),
        })
        .map_err(|_| RuntimeError::QueueGone)?;
        Ok(evt)
    }

    fn image_dims(desc: &ImageDesc) -> [usize; 3] {
        let d = desc.normalized();
        let y = if d.kind == ImageKind::Dim1Array {
            d.array_size
        } else {
            d.height
        };
        let z = if d.kind == ImageKind::Dim2Array {
            d.array_size
        } else {
            d.depth
        };
        [d.width, y, z]
    }

    fn image_meta(&self, mem: MemId) -> Result<(usize, [usize; 3]), RuntimeError> {
        let mems = self.mems.lock().unwrap();
        let obj = mems.get(&mem.0).ok_or(RuntimeError::InvalidMem)?;
        let meta = obj.image.as_ref().ok_or(RuntimeError::InvalidMem)?;
        Ok((meta.elem, meta.dims))
    }

    /// Copy one image region row-by-row through `f(flat_byte_off, row_bytes)`.
    fn for_image_rows(
        elem: usize,
        dims: [usize; 3],
        origin: [usize; 3],
        region: [usize; 3],
        mut f: impl FnMut(usize, usize, usize),
    ) {
        let row_bytes = region[0] * elem;
        for dz in 0..region[2] {
            for dy in 0..region[1] {
                let z = origin[2] + dz;
                let y = origin[1] + dy;
                let flat = ((z * dims[1] + y) * dims[0] + origin[0]) * elem;
                let seq = (dz * region[1] + dy) * row_bytes;
                f(flat, seq, row_bytes);
            }
        }
    }

    /// Launch-time snapshot of a kernel's body and argument slots, so the
    /// caller can keep reusing the kernel object for further launches.
    fn snapshot_kernel(
        &self,
        kernel: KernelId,
    ) -> Result<(KernelCode, BTreeMap<u32, ArgValue>), RuntimeError> {
        let kernels = self.kernels.lock().unwrap();
        let obj = kernels.get(&kernel.0).ok_or(RuntimeError::InvalidKernel)?;
        let code = match &obj.code {
            KernelCode::User(body) => KernelCode::User(body.clone()),
            KernelCode::Builtin(b) => KernelCode::Builtin(*b),
        };
        Ok((code, obj.args.lock().unwrap().clone()))
    }

    fn run_kernel(&self, code: &KernelCode, args: &BTreeMap<u32, ArgValue>, grid: [usize; 3]) {
        match code {
            KernelCode::User(body) => {
                let io = KernelIo {
                    core: self,
                    args,
                    grid,
                };
                body(&io);
            }
            KernelCode::Builtin(which) => self.run_builtin(*which, args),
        }
    }

    fn arg_u32(args: &BTreeMap<u32, ArgValue>, i: u32) -> u32 {
        match args.get(&i) {
            Some(ArgValue::Bytes(b)) if b.len() >= 4 => {
                u32::from_le_bytes([b[0], b[1], b[2], b[3]])
            }
            Some(ArgValue::Bytes(b)) if b.len() == 1 => b[0] as u32,
            _ => 0,
        }
    }

    fn arg_mem(args: &BTreeMap<u32, ArgValue>, i: u32) -> Option<MemId> {
        match args.get(&i) {
            Some(ArgValue::Mem(m)) => Some(*m),
            _ => None,
        }
    }

    fn result_min(&self, result: MemId, slot: u32, candidate: u32) {
        let cur_bytes = self.mem_read_raw(result, slot as usize * 4, 4);
        if cur_bytes.len() < 4 {
            return;
        }
        let cur = u32::from_le_bytes([cur_bytes[0], cur_bytes[1], cur_bytes[2], cur_bytes[3]]);
        if candidate < cur {
            self.mem_write_raw(result, slot as usize * 4, &candidate.to_le_bytes());
        }
    }

    fn run_builtin(&self, which: BuiltinKernel, args: &BTreeMap<u32, ArgValue>) {
        match which {
            BuiltinKernel::CanaryScan => self.builtin_scan(args),
            BuiltinKernel::CanaryScanSvmPtr => self.builtin_scan_svmptr(args),
            BuiltinKernel::CanaryScanImage => self.builtin_scan_image(args),
            BuiltinKernel::CanaryScanInPlace => self.builtin_scan_inplace(args),
        }
    }

    /// Word-wise scan of the staged canary copies. Slot order:
    /// 0 word_len, 1 buff_end, 2 svm_end, 3 poison, 4 scratch mem,
    /// 5 staged svm scratch (or empty bytes), 6 result.
    fn builtin_scan(&self, args: &BTreeMap<u32, ArgValue>) {
        let word_len = Self::arg_u32(args, 0);
        let buff_end = Self::arg_u32(args, 1);
        let svm_end = Self::arg_u32(args, 2);
        let poison = Self::arg_u32(args, 3);
        let Some(scratch) = Self::arg_mem(args, 4) else {
            return;
        };
        let svm_scratch = match args.get(&5) {
            Some(ArgValue::Svm(p)) => Some(*p),
            _ => None,
        };
        let Some(result) = Self::arg_mem(args, 6) else {
            return;
        };
        if word_len == 0 {
            return;
        }
        for w in 0..svm_end {
            let word = if w < buff_end {
                self.mem_read_raw(scratch, w as usize * 4, 4)
            } else {
                let Some(base) = svm_scratch else { continue };
                self.svm_read_raw(base.offset((w - buff_end) as usize * 4), 4)
                    .unwrap_or_default()
            };
            if word.len() < 4 {
                continue;
            }
            let val = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
            if val == poison {
                continue;
            }
            for (i, &b) in word.iter().enumerate() {
                if b != (poison & 0xff) as u8 {
                    let candidate = 4 * (w % word_len) + i as u32;
                    self.result_min(result, w / word_len, candidate);
                    break;
                }
            }
        }
    }

    /// Like `builtin_scan`, but shared regions are reached through a
    /// device-side pointer table and repaired while scanning. Slot order:
    /// 0 word_len, 1 buff_end, 2 svm_end, 3 poison, 4 scratch mem,
    /// 5 pointer table mem (u64 little-endian entries), 6 result.
    fn builtin_scan_svmptr(&self, args: &BTreeMap<u32, ArgValue>) {
        let word_len = Self::arg_u32(args, 0);
        let buff_end = Self::arg_u32(args, 1);
        let svm_end = Self::arg_u32(args, 2);
        let poison = Self::arg_u32(args, 3);
        let (Some(scratch), Some(table), Some(result)) = (
            Self::arg_mem(args, 4),
            Self::arg_mem(args, 5),
            Self::arg_mem(args, 6),
        ) else {
            return;
        };
        if word_len == 0 {
            return;
        }
        for w in 0..svm_end {
            let local = w % word_len;
            let (word, repair_to): (Vec<u8>, Option<SvmPtr>) = if w < buff_end {
                (self.mem_read_raw(scratch, w as usize * 4, 4), None)
            } else {
                let entry = (w - buff_end) / word_len;
                let raw = self.mem_read_raw(table, entry as usize * 8, 8);
                if raw.len() < 8 {
                    continue;
                }
                let ptr = SvmPtr(u64::from_le_bytes(raw.try_into().unwrap()));
                let target = ptr.offset(local as usize * 4);
                (
                    self.svm_read_raw(target, 4).unwrap_or_default(),
                    Some(target),
                )
            };
            if word.len() < 4 {
                continue;
            }
            let val = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
            if val == poison {
                continue;
            }
            for (i, &b) in word.iter().enumerate() {
                if b != (poison & 0xff) as u8 {
                    self.result_min(result, w / word_len, 4 * local + i as u32);
                    break;
                }
            }
            match repair_to {
                Some(target) => {
                    let _ = self.svm_write_raw(target, &poison.to_le_bytes());
                }
                None => self.mem_write_raw(scratch, w as usize * 4, &poison.to_le_bytes()),
            }
        }
    }

    /// Byte-wise scan of staged image canaries. Slot order: 0 poison
    /// byte, 1 region count, 2 end-offset table, 3 scratch, 4 result.
    fn builtin_scan_image(&self, args: &BTreeMap<u32, ArgValue>) {
        let poison = Self::arg_u32(args, 0) as u8;
        let num = Self::arg_u32(args, 1);
        let (Some(ends_mem), Some(scratch), Some(result)) = (
            Self::arg_mem(args, 2),
            Self::arg_mem(args, 3),
            Self::arg_mem(args, 4),
        ) else {
            return;
        };
        if num == 0 {
            return;
        }
        let raw = self.mem_read_raw(ends_mem, 0, num as usize * 4);
        let ends: Vec<u32> = raw
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        if ends.len() < num as usize {
            return;
        }
        let total = ends[num as usize - 1];
        let bytes = self.mem_read_raw(scratch, 0, total as usize);
        let mut region = 0u32;
        for (t, &b) in bytes.iter().enumerate() {
            while region < num && t as u32 >= ends[region as usize] {
                region += 1;
            }
            if region >= num {
                break;
            }
            if b != poison {
                let prev = if region > 0 {
                    ends[region as usize - 1]
                } else {
                    0
                };
                self.result_min(result, region, t as u32 - prev);
            }
        }
    }

    /// In-place scan of one region's canary run, repairing as it goes.
    /// Slot order: 0 run length in words, 1 result slot, 2 poison,
    /// 3 byte offset of the run, 4 target (mem or shared ptr), 5 result.
    fn builtin_scan_inplace(&self, args: &BTreeMap<u32, ArgValue>) {
        let len_words = Self::arg_u32(args, 0);
        let buff_id = Self::arg_u32(args, 1);
        let poison = Self::arg_u32(args, 2);
        let offset = Self::arg_u32(args, 3) as usize;
        let Some(result) = Self::arg_mem(args, 5) else {
            return;
        };
        for w in 0..len_words {
            let at = offset + w as usize * 4;
            let word = match args.get(&4) {
                Some(ArgValue::Mem(m)) => self.mem_read_raw(*m, at, 4),
                Some(ArgValue::Svm(p)) => {
                    self.svm_read_raw(p.offset(at), 4).unwrap_or_default()
                }
                _ => return,
            };
            if word.len() < 4 {
                continue;
            }
            let val = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
            if val == poison {
                continue;
            }
            for (i, &b) in word.iter().enumerate() {
                if b != (poison & 0xff) as u8 {
                    self.result_min(result, buff_id, 4 * w + i as u32);
                    break;
                }
            }
            match args.get(&4) {
                Some(ArgValue::Mem(m)) => self.mem_write_raw(*m, at, &poison.to_le_bytes()),
                Some(ArgValue::Svm(p)) => {
                    let _ = self.svm_write_raw(p.offset(at), &poison.to_le_bytes());
                }
                _ => {}
            }
        }
    }
}

/// Access surface handed to user kernel bodies.
pub struct KernelIo<'a> {
    core: &'a Core,
    args: &'a BTreeMap<u32, ArgValue>,
    grid: [usize; 3],
}

impl KernelIo<'_> {
    pub fn grid(&self) -> [usize; 3] {
        self.grid
    }

    pub fn arg(&self, index: u32) -> Option<ArgValue> {
        self.args.get(&index).cloned()
    }

    pub fn arg_mem(&self, index: u32) -> Option<MemId> {
        Core::arg_mem(self.args, index)
    }

    pub fn arg_svm(&self, index: u32) -> Option<SvmPtr> {
        match self.args.get(&index) {
            Some(ArgValue::Svm(p)) => Some(*p),
            _ => None,
        }
    }

    pub fn arg_u32(&self, index: u32) -> u32 {
        Core::arg_u32(self.args, index)
    }

    /// Read relative to the view origin; truncated at the allocation end.
    pub fn read_mem(&self, mem: MemId, offset: usize, len: usize) -> Vec<u8> {
        self.core.mem_read_raw(mem, offset, len)
    }

    /// Unchecked device-style write: bytes past the view length spill
    /// into the rest of the underlying allocation.
    pub fn write_mem(&self, mem: MemId, offset: usize, bytes: &[u8]) {
        self.core.mem_write_raw(mem, offset, bytes);
    }

    /// Signed-offset write, for kernels that index before a region's
    /// start. Clamped at the front of the underlying allocation.
    pub fn write_mem_at(&self, mem: MemId, offset: isize, bytes: &[u8]) {
        let Ok((data, origin, _)) = self.core.mem_view(mem) else {
            return;
        };
        let physical = origin as isize + offset;
        if physical < 0 {
            return;
        }
        let mut guard = data.lock().unwrap();
        let start = (physical as usize).min(guard.len());
        let end = (start + bytes.len()).min(guard.len());
        let n = end - start;
        guard[start..end].copy_from_slice(&bytes[..n]);
    }

    pub fn read_svm(&self, ptr: SvmPtr, len: usize) -> Vec<u8> {
        self.core.svm_read_raw(ptr, len).unwrap_or_default()
    }

    pub fn write_svm(&self, ptr: SvmPtr, bytes: &[u8]) {
        let _ = self.core.svm_write_raw(ptr, bytes);
    }

    /// Element write into an image at padded coordinates.
    pub fn write_image_elem(&self, mem: MemId, coord: [usize; 3], bytes: &[u8]) {
        if let Ok((elem, dims)) = self.core.image_meta(mem) {
            let flat = ((coord[2] * dims[1] + coord[1]) * dims[0] + coord[0]) * elem;
            self.core.mem_write_raw(mem, flat, bytes);
        }
    }
}

fn spawn_queue_worker(core: &Arc<Core>, rx: mpsc::Receiver<Command>, id: u64) {
    let weak: Weak<Core> = Arc::downgrade(core);
    thread::Builder::new()
        .name(format!("cg-queue-{id}"))
        .spawn(move || {
            while let Ok(cmd) = rx.recv() {
                match cmd {
                    Command::Task {
                        queued_ns,
                        waits,
                        work,
                        evt,
                    } => {
                        for w in &waits {
                            w.wait();
                        }
                        let Some(core) = weak.upgrade() else { break };
                        let submit = core.now_ns();
                        let start = core.now_ns();
                        work(&core);
                        let end = core.now_ns();
                        evt.complete(ProfilingTimes {
                            queued_ns,
                            submit_ns: submit,
                            start_ns: start,
                            end_ns: end,
                        });
                    }
                    Command::Finish(done) => {
                        let _ = done.send(());
                    }
                }
            }
            debug!("queue worker {id} exits");
        })
        .expect("spawn queue worker");
}

impl ComputeRuntime for HostRuntime {
    fn device_kind(&self, ctx: ContextId) -> Result<DeviceKind, RuntimeError> {
        self.core
            .contexts
            .lock()
            .unwrap()
            .get(&ctx.0)
            .map(|c| c.device)
            .ok_or(RuntimeError::InvalidContext)
    }

    fn device_limits(&self, ctx: ContextId) -> Result<DeviceLimits, RuntimeError> {
        self.core
            .contexts
            .lock()
            .unwrap()
            .get(&ctx.0)
            .map(|c| c.limits)
            .ok_or(RuntimeError::InvalidContext)
    }

    fn create_queue(&self, ctx: ContextId, _profiling: bool) -> Result<QueueId, RuntimeError> {
        if !self.core.contexts.lock().unwrap().contains_key(&ctx.0) {
            return Err(RuntimeError::InvalidContext);
        }
        let id = self.core.fresh_handle();
        let (tx, rx) = mpsc::channel();
        spawn_queue_worker(&self.core, rx, id);
        self.core
            .queues
            .lock()
            .unwrap()
            .insert(id, QueueState { ctx, tx });
        Ok(QueueId(id))
    }

    fn queue_context(&self, queue: QueueId) -> Result<ContextId, RuntimeError> {
        self.core
            .queues
            .lock()
            .unwrap()
            .get(&queue.0)
            .map(|q| q.ctx)
            .ok_or(RuntimeError::InvalidQueue)
    }

    fn finish(&self, queue: QueueId) -> Result<(), RuntimeError> {
        let tx = {
            let queues = self.core.queues.lock().unwrap();
            queues
                .get(&queue.0)
                .ok_or(RuntimeError::InvalidQueue)?
                .tx
                .clone()
        };
        let (done_tx, done_rx) = mpsc::channel();
        tx.send(Command::Finish(done_tx))
            .map_err(|_| RuntimeError::QueueGone)?;
        done_rx.recv().map_err(|_| RuntimeError::QueueGone)
    }

    fn release_queue(&self, queue: QueueId) -> Result<(), RuntimeError> {
        self.core
            .queues
            .lock()
            .unwrap()
            .remove(&queue.0)
            .map(|_| ())
            .ok_or(RuntimeError::InvalidQueue)
    }

    fn create_user_event(&self, ctx: ContextId) -> Result<EventId, RuntimeError> {
        if !self.core.contexts.lock().unwrap().contains_key(&ctx.0) {
            return Err(RuntimeError::InvalidContext);
        }
        Ok(EventId(self.core.new_event(ctx).id))
    }

    fn complete_user_event(&self, evt: EventId) -> Result<(), RuntimeError> {
        let now = self.core.now_ns();
        self.core.event(evt)?.complete(ProfilingTimes {
            queued_ns: now,
            submit_ns: now,
            start_ns: now,
            end_ns: now,
        });
        Ok(())
    }

    fn event_context(&self, evt: EventId) -> Result<ContextId, RuntimeError> {
        Ok(self.core.event(evt)?.ctx)
    }

    fn wait_events(&self, evts: &[EventId]) -> Result<(), RuntimeError> {
        for evt in self.core.resolve_waits(evts)? {
            evt.wait();
        }
        Ok(())
    }

    fn on_event_complete(
        &self,
        evt: EventId,
        f: Box<dyn FnOnce() + Send>,
    ) -> Result<(), RuntimeError> {
        self.core.event(evt)?.add_callback(f);
        Ok(())
    }

    fn retain_event(&self, evt: EventId) -> Result<(), RuntimeError> {
        let evt = self.core.event(evt)?;
        evt.state.lock().unwrap().refs += 1;
        Ok(())
    }

    fn release_event(&self, evt: EventId) -> Result<(), RuntimeError> {
        let core_evt = self.core.event(evt)?;
        let gone = {
            let mut st = core_evt.state.lock().unwrap();
            st.refs -= 1;
            st.refs <= 0 && st.complete
        };
        if gone {
            self.core.events.lock().unwrap().remove(&evt.0);
        }
        Ok(())
    }

    fn event_profiling(&self, evt: EventId) -> Result<ProfilingTimes, RuntimeError> {
        let evt = self.core.event(evt)?;
        let st = evt.state.lock().unwrap();
        Ok(st.times)
    }

    fn enqueue_marker(&self, queue: QueueId, waits: &[EventId]) -> Result<EventId, RuntimeError> {
        let evt = self.core.enqueue(queue, waits, Box::new(|_| {}))?;
        Ok(EventId(evt.id))
    }

    fn create_buffer(
        &self,
        ctx: ContextId,
        _flags: MemFlags,
        size: usize,
        init: Option<HostInit>,
    ) -> Result<MemId, RuntimeError> {
        if size == 0 {
            return Err(RuntimeError::InvalidBufferSize);
        }
        if !self.core.contexts.lock().unwrap().contains_key(&ctx.0) {
            return Err(RuntimeError::InvalidContext);
        }
        let data = match init {
            Some(HostInit::Use(buf)) => {
                let mut guard = buf.lock().unwrap();
                if guard.len() < size {
                    guard.resize(size, 0);
                }
                drop(guard);
                buf
            }
            Some(HostInit::Copy(mut v)) => {
                v.resize(size, 0);
                Arc::new(Mutex::new(v))
            }
            None => Arc::new(Mutex::new(vec![0u8; size])),
        };
        let id = self.core.fresh_handle();
        self.core.mems.lock().unwrap().insert(
            id,
            MemObject {
                ctx,
                data,
                origin: 0,
                len: size,
                refs: 1,
                image: None,
            },
        );
        Ok(MemId(id))
    }

    fn create_sub_buffer(
        &self,
        parent: MemId,
        _flags: MemFlags,
        origin: usize,
        size: usize,
    ) -> Result<MemId, RuntimeError> {
        let mut mems = self.core.mems.lock().unwrap();
        let p = mems.get(&parent.0).ok_or(RuntimeError::InvalidMem)?;
        if origin + size > p.len {
            return Err(RuntimeError::InvalidSubRegion {
                origin,
                size,
                parent_size: p.len,
            });
        }
        let obj = MemObject {
            ctx: p.ctx,
            data: p.data.clone(),
            origin: p.origin + origin,
            len: size,
            refs: 1,
            image: None,
        };
        let id = self.core.fresh_handle();
        mems.insert(id, obj);
        Ok(MemId(id))
    }

    fn create_image(
        &self,
        ctx: ContextId,
        _flags: MemFlags,
        format: ImageFormat,
        desc: &ImageDesc,
        init: Option<Vec<u8>>,
    ) -> Result<MemId, RuntimeError> {
        if !self.core.contexts.lock().unwrap().contains_key(&ctx.0) {
            return Err(RuntimeError::InvalidContext);
        }
        let dims = Core::image_dims(desc);
        let elem = format.element_size();
        let total = dims[0] * dims[1] * dims[2] * elem;
        if total == 0 {
            return Err(RuntimeError::InvalidBufferSize);
        }
        let mut data = init.unwrap_or_default();
        data.resize(total, 0);
        let id = self.core.fresh_handle();
        self.core.mems.lock().unwrap().insert(
            id,
            MemObject {
                ctx,
                data: Arc::new(Mutex::new(data)),
                origin: 0,
                len: total,
                refs: 1,
                image: Some(ImgMeta { elem, dims }),
            },
        );
        Ok(MemId(id))
    }

    fn retain_mem(&self, mem: MemId) -> Result<(), RuntimeError> {
        let mut mems = self.core.mems.lock().unwrap();
        let obj = mems.get_mut(&mem.0).ok_or(RuntimeError::InvalidMem)?;
        obj.refs += 1;
        Ok(())
    }

    fn release_mem(&self, mem: MemId) -> Result<(), RuntimeError> {
        let mut mems = self.core.mems.lock().unwrap();
        let obj = mems.get_mut(&mem.0).ok_or(RuntimeError::InvalidMem)?;
        obj.refs -= 1;
        if obj.refs <= 0 {
            mems.remove(&mem.0);
        }
        Ok(())
    }

    fn mem_context(&self, mem: MemId) -> Result<ContextId, RuntimeError> {
        self.core
            .mems
            .lock()
            .unwrap()
            .get(&mem.0)
            .map(|m| m.ctx)
            .ok_or(RuntimeError::InvalidMem)
    }

    fn enqueue_read_buffer(
        &self,
        queue: QueueId,
        mem: MemId,
        blocking: bool,
        offset: usize,
        len: usize,
        dst: HostBuf,
        waits: &[EventId],
    ) -> Result<EventId, RuntimeError> {
        let evt = self.core.enqueue(
            queue,
            waits,
            Box::new(move |core| {
                let bytes = core.mem_read_raw(mem, offset, len);
                *dst.lock().unwrap() = bytes;
            }),
        )?;
        if blocking {
            evt.wait();
        }
        Ok(EventId(evt.id))
    }

    fn enqueue_write_buffer(
        &self,
        queue: QueueId,
        mem: MemId,
        blocking: bool,
        offset: usize,
        data: Vec<u8>,
        waits: &[EventId],
    ) -> Result<EventId, RuntimeError> {
        let evt = self.core.enqueue(
            queue,
            waits,
            Box::new(move |core| {
                core.mem_write_raw(mem, offset, &data);
            }),
        )?;
        if blocking {
            evt.wait();
        }
        Ok(EventId(evt.id))
    }

    fn enqueue_fill_buffer(
        &self,
        queue: QueueId,
        mem: MemId,
        pattern: Vec<u8>,
        offset: usize,
        len: usize,
        waits: &[EventId],
    ) -> Result<EventId, RuntimeError> {
        if pattern.is_empty() {
            return Err(RuntimeError::InvalidBufferSize);
        }
        let evt = self.core.enqueue(
            queue,
            waits,
            Box::new(move |core| {
                let mut fill = Vec::with_capacity(len);
                while fill.len() < len {
                    let take = pattern.len().min(len - fill.len());
                    fill.extend_from_slice(&pattern[..take]);
                }
                core.mem_write_raw(mem, offset, &fill);
            }),
        )?;
        Ok(EventId(evt.id))
    }

    fn enqueue_copy_buffer(
        &self,
        queue: QueueId,
        src: MemId,
        dst: MemId,
        src_offset: usize,
        dst_offset: usize,
        len: usize,
        waits: &[EventId],
    ) -> Result<EventId, RuntimeError> {
        let evt = self.core.enqueue(
            queue,
            waits,
            Box::new(move |core| {
                let bytes = core.mem_read_raw(src, src_offset, len);
                core.mem_write_raw(dst, dst_offset, &bytes);
            }),
        )?;
        Ok(EventId(evt.id))
    }

    fn enqueue_map_buffer(
        &self,
        queue: QueueId,
        mem: MemId,
        blocking: bool,
        offset: usize,
        len: usize,
        waits: &[EventId],
    ) -> Result<(EventId, HostBuf), RuntimeError> {
        let view: HostBuf = Arc::new(Mutex::new(Vec::new()));
        let out = view.clone();
        let evt = self.core.enqueue(
            queue,
            waits,
            Box::new(move |core| {
                *out.lock().unwrap() = core.mem_read_raw(mem, offset, len);
            }),
        )?;
        if blocking {
            evt.wait();
        }
        Ok((EventId(evt.id), view))
    }

    fn enqueue_unmap(
        &self,
        queue: QueueId,
        _mem: MemId,
        waits: &[EventId],
    ) -> Result<EventId, RuntimeError> {
        self.enqueue_marker(queue, waits)
    }

    fn enqueue_read_image(
        &self,
        queue: QueueId,
        mem: MemId,
        blocking: bool,
        origin: [usize; 3],
        region: [usize; 3],
        dst: HostBuf,
        waits: &[EventId],
    ) -> Result<EventId, RuntimeError> {
        let (elem, dims) = self.core.image_meta(mem)?;
        let evt = self.core.enqueue(
            queue,
            waits,
            Box::new(move |core| {
                let mut out = vec![0u8; region[0] * region[1] * region[2] * elem];
                Core::for_image_rows(elem, dims, origin, region, |flat, seq, row| {
                    let bytes = core.mem_read_raw(mem, flat, row);
                    out[seq..seq + bytes.len()].copy_from_slice(&bytes);
                });
                *dst.lock().unwrap() = out;
            }),
        )?;
        if blocking {
            evt.wait();
        }
        Ok(EventId(evt.id))
    }

    fn enqueue_write_image(
        &self,
        queue: QueueId,
        mem: MemId,
        blocking: bool,
        origin: [usize; 3],
        region: [usize; 3],
        data: Vec<u8>,
        waits: &[EventId],
    ) -> Result<EventId, RuntimeError> {
        let (elem, dims) = self.core.image_meta(mem)?;
        let evt = self.core.enqueue(
            queue,
            waits,
            Box::new(move |core| {
                Core::for_image_rows(elem, dims, origin, region, |flat, seq, row| {
                    if seq + row <= data.len() {
                        core.mem_write_raw(mem, flat, &data[seq..seq + row]);
                    }
                });
            }),
        )?;
        if blocking {
            evt.wait();
        }
        Ok(EventId(evt.id))
    }

    fn enqueue_fill_image(
        &self,
        queue: QueueId,
        mem: MemId,
        color: Vec<u8>,
        origin: [usize; 3],
        region: [usize; 3],
        waits: &[EventId],
    ) -> Result<EventId, RuntimeError> {
        let (elem, dims) = self.core.image_meta(mem)?;
        let evt = self.core.enqueue(
            queue,
            waits,
            Box::new(move |core| {
                let mut row_data = Vec::with_capacity(region[0] * elem);
                for _ in 0..region[0] {
                    row_data.extend_from_slice(&color[..elem.min(color.len())]);
                    row_data.resize(row_data.len().next_multiple_of(elem), 0);
                }
                Core::for_image_rows(elem, dims, origin, region, |flat, _seq, row| {
                    core.mem_write_raw(mem, flat, &row_data[..row.min(row_data.len())]);
                });
            }),
        )?;
        Ok(EventId(evt.id))
    }

    fn enqueue_copy_image(
        &self,
        queue: QueueId,
        src: MemId,
        dst: MemId,
        src_origin: [usize; 3],
        dst_origin: [usize; 3],
        region: [usize; 3],
        waits: &[EventId],
    ) -> Result<EventId, RuntimeError> {
        let (s_elem, s_dims) = self.core.image_meta(src)?;
        let (d_elem, d_dims) = self.core.image_meta(dst)?;
        let evt = self.core.enqueue(
            queue,
            waits,
            Box::new(move |core| {
                let mut staged: Vec<(usize, Vec<u8>)> = Vec::new();
                Core::for_image_rows(s_elem, s_dims, src_origin, region, |flat, seq, row| {
                    staged.push((seq, core.mem_read_raw(src, flat, row)));
                });
                let mut by_seq = HashMap::new();
                for (seq, bytes) in staged {
                    by_seq.insert(seq, bytes);
                }
                Core::for_image_rows(d_elem, d_dims, dst_origin, region, |flat, seq, _row| {
                    if let Some(bytes) = by_seq.get(&seq) {
                        core.mem_write_raw(dst, flat, bytes);
                    }
                });
            }),
        )?;
        Ok(EventId(evt.id))
    }

    fn enqueue_copy_image_to_buffer(
        &self,
        queue: QueueId,
        src: MemId,
        dst: MemId,
        src_origin: [usize; 3],
        region: [usize; 3],
        dst_offset: usize,
        waits: &[EventId],
    ) -> Result<EventId, RuntimeError> {
        let (elem, dims) = self.core.image_meta(src)?;
        let evt = self.core.enqueue(
            queue,
            waits,
            Box::new(move |core| {
                Core::for_image_rows(elem, dims, src_origin, region, |flat, seq, row| {
                    let bytes = core.mem_read_raw(src, flat, row);
                    core.mem_write_raw(dst, dst_offset + seq, &bytes);
                });
            }),
        )?;
        Ok(EventId(evt.id))
    }

    fn enqueue_copy_buffer_to_image(
        &self,
        queue: QueueId,
        src: MemId,
        dst: MemId,
        src_offset: usize,
        dst_origin: [usize; 3],
        region: [usize; 3],
        waits: &[EventId],
    ) -> Result<EventId, RuntimeError> {
        let (elem, dims) = self.core.image_meta(dst)?;
        let evt = self.core.enqueue(
            queue,
            waits,
            Box::new(move |core| {
                Core::for_image_rows(elem, dims, dst_origin, region, |flat, seq, row| {
                    let bytes = core.mem_read_raw(src, src_offset + seq, row);
                    core.mem_write_raw(dst, flat, &bytes);
                });
            }),
        )?;
        Ok(EventId(evt.id))
    }

    fn svm_alloc(
        &self,
        ctx: ContextId,
        _flags: MemFlags,
        size: usize,
        alignment: usize,
    ) -> Result<SvmPtr, RuntimeError> {
        if size == 0 {
            return Err(RuntimeError::InvalidBufferSize);
        }
        if !self.core.contexts.lock().unwrap().contains_key(&ctx.0) {
            return Err(RuntimeError::InvalidContext);
        }
        let align = alignment.max(4096) as u64;
        let span = (size as u64).div_ceil(align) * align + align;
        let base = self.core.next_svm.fetch_add(span, Ordering::Relaxed);
        self.core.svms.lock().unwrap().insert(
            base,
            SvmAlloc {
                ctx,
                base,
                size,
                data: Arc::new(Mutex::new(vec![0u8; size])),
            },
        );
        Ok(SvmPtr(base))
    }

    fn svm_free(&self, ctx: ContextId, ptr: SvmPtr) -> Result<(), RuntimeError> {
        let mut svms = self.core.svms.lock().unwrap();
        match svms.get(&ptr.0) {
            Some(alloc) if alloc.ctx == ctx => {
                svms.remove(&ptr.0);
                Ok(())
            }
            Some(_) => Err(RuntimeError::InvalidContext),
            None => Err(RuntimeError::InvalidSvmPointer(ptr.0)),
        }
    }

    fn enqueue_svm_memcpy(
        &self,
        queue: QueueId,
        dst: SvmPtr,
        src: SvmPtr,
        len: usize,
        waits: &[EventId],
    ) -> Result<EventId, RuntimeError> {
        let evt = self.core.enqueue(
            queue,
            waits,
            Box::new(move |core| {
                if let Ok(bytes) = core.svm_read_raw(src, len) {
                    let _ = core.svm_write_raw(dst, &bytes);
                }
            }),
        )?;
        Ok(EventId(evt.id))
    }

    fn enqueue_svm_fill(
        &self,
        queue: QueueId,
        ptr: SvmPtr,
        pattern: Vec<u8>,
        len: usize,
        waits: &[EventId],
    ) -> Result<EventId, RuntimeError> {
        if pattern.is_empty() {
            return Err(RuntimeError::InvalidBufferSize);
        }
        let evt = self.core.enqueue(
            queue,
            waits,
            Box::new(move |core| {
                let mut fill = Vec::with_capacity(len);
                while fill.len() < len {
                    let take = pattern.len().min(len - fill.len());
                    fill.extend_from_slice(&pattern[..take]);
                }
                let _ = core.svm_write_raw(ptr, &fill);
            }),
        )?;
        Ok(EventId(evt.id))
    }

    fn enqueue_svm_map(
        &self,
        queue: QueueId,
        _ptr: SvmPtr,
        _len: usize,
        waits: &[EventId],
    ) -> Result<EventId, RuntimeError> {
        self.enqueue_marker(queue, waits)
    }

    fn enqueue_svm_unmap(
        &self,
        queue: QueueId,
        _ptr: SvmPtr,
        waits: &[EventId],
    ) -> Result<EventId, RuntimeError> {
        self.enqueue_marker(queue, waits)
    }

    fn svm_read(&self, ptr: SvmPtr, len: usize) -> Result<Vec<u8>, RuntimeError> {
        self.core.svm_read_raw(ptr, len)
    }

    fn svm_write(&self, ptr: SvmPtr, data: &[u8]) -> Result<(), RuntimeError> {
        self.core.svm_write_raw(ptr, data)
    }

    fn kernel_name(&self, kernel: KernelId) -> Result<String, RuntimeError> {
        self.core
            .kernels
            .lock()
            .unwrap()
            .get(&kernel.0)
            .map(|k| k.name.clone())
            .ok_or(RuntimeError::InvalidKernel)
    }

    fn kernel_context(&self, kernel: KernelId) -> Result<ContextId, RuntimeError> {
        self.core
            .kernels
            .lock()
            .unwrap()
            .get(&kernel.0)
            .map(|k| k.ctx)
            .ok_or(RuntimeError::InvalidKernel)
    }

    fn kernel_num_args(&self, kernel: KernelId) -> Result<u32, RuntimeError> {
        self.core
            .kernels
            .lock()
            .unwrap()
            .get(&kernel.0)
            .map(|k| k.nargs)
            .ok_or(RuntimeError::InvalidKernel)
    }

    fn clone_kernel(&self, kernel: KernelId) -> Result<KernelId, RuntimeError> {
        let mut kernels = self.core.kernels.lock().unwrap();
        let obj = kernels.get(&kernel.0).ok_or(RuntimeError::InvalidKernel)?;
        let copy = KernelObject {
            ctx: obj.ctx,
            name: obj.name.clone(),
            nargs: obj.nargs,
            code: match &obj.code {
                KernelCode::User(body) => KernelCode::User(body.clone()),
                KernelCode::Builtin(b) => KernelCode::Builtin(*b),
            },
            args: Mutex::new(BTreeMap::new()),
        };
        let id = self.core.fresh_handle();
        kernels.insert(id, copy);
        Ok(KernelId(id))
    }

    fn set_kernel_arg(
        &self,
        kernel: KernelId,
        index: u32,
        value: ArgValue,
    ) -> Result<(), RuntimeError> {
        let kernels = self.core.kernels.lock().unwrap();
        let obj = kernels.get(&kernel.0).ok_or(RuntimeError::InvalidKernel)?;
        obj.args.lock().unwrap().insert(index, value);
        Ok(())
    }

    fn builtin_kernel(
        &self,
        ctx: ContextId,
        which: BuiltinKernel,
    ) -> Result<KernelId, RuntimeError> {
        if !self.core.contexts.lock().unwrap().contains_key(&ctx.0) {
            return Err(RuntimeError::InvalidContext);
        }
        let id = self.core.fresh_handle();
        self.core.kernels.lock().unwrap().insert(
            id,
            KernelObject {
                ctx,
                name: format!("{which:?}"),
                nargs: 7,
                code: KernelCode::Builtin(which),
                args: Mutex::new(BTreeMap::new()),
            },
        );
        Ok(KernelId(id))
    }

    fn enqueue_kernel(
        &self,
        queue: QueueId,
        kernel: KernelId,
        grid: [usize; 3],
        waits: &[EventId],
    ) -> Result<EventId, RuntimeError> {
        let (code, args) = self.core.snapshot_kernel(kernel)?;
        let evt = self.core.enqueue(
            queue,
            waits,
            Box::new(move |core| core.run_kernel(&code, &args, grid)),
        )?;
        Ok(EventId(evt.id))
    }

    fn release_kernel(&self, kernel: KernelId) -> Result<(), RuntimeError> {
        self.core
            .kernels
            .lock()
            .unwrap()
            .remove(&kernel.0)
            .map(|_| ())
            .ok_or(RuntimeError::InvalidKernel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_runs_in_order_and_events_chain() {
        let rt = HostRuntime::new();
        let ctx = rt.create_context(DeviceKind::Accelerator);
        let q = rt.create_queue(ctx, false).unwrap();
        let mem = rt.create_buffer(ctx, MemFlags::READ_WRITE, 8, None).unwrap();
        let e1 = rt
            .enqueue_write_buffer(q, mem, false, 0, vec![1; 8], &[])
            .unwrap();
        let e2 = rt
            .enqueue_fill_buffer(q, mem, vec![9], 4, 4, &[e1])
            .unwrap();
        rt.wait_events(&[e2]).unwrap();
        assert_eq!(rt.debug_read_mem(mem, 0, 8), vec![1, 1, 1, 1, 9, 9, 9, 9]);
    }

    #[test]
    fn sub_buffer_overrun_spills_into_parent() {
        let rt = HostRuntime::new();
        let ctx = rt.create_context(DeviceKind::Accelerator);
        let parent = rt
            .create_buffer(ctx, MemFlags::READ_WRITE, 64, None)
            .unwrap();
        let view = rt
            .create_sub_buffer(parent, MemFlags::READ_WRITE, 0, 32)
            .unwrap();
        let q = rt.create_queue(ctx, false).unwrap();
        let body: KernelBody = Arc::new(|io: &KernelIo<'_>| {
            let mem = io.arg_mem(0).unwrap();
            io.write_mem(mem, 30, &[0xAA, 0xBB, 0xCC, 0xDD]);
        });
        let k = rt.define_kernel(ctx, "spill", 1, body);
        rt.set_kernel_arg(k, 0, ArgValue::Mem(view)).unwrap();
        let e = rt.enqueue_kernel(q, k, [1, 1, 1], &[]).unwrap();
        rt.wait_events(&[e]).unwrap();
        assert_eq!(rt.debug_read_mem(parent, 32, 2), vec![0xCC, 0xDD]);
    }

    #[test]
    fn user_event_gates_queue_work() {
        let rt = HostRuntime::new();
        let ctx = rt.create_context(DeviceKind::Accelerator);
        let q = rt.create_queue(ctx, false).unwrap();
        let mem = rt.create_buffer(ctx, MemFlags::READ_WRITE, 4, None).unwrap();
        let gate = rt.create_user_event(ctx).unwrap();
        let e = rt
            .enqueue_write_buffer(q, mem, false, 0, vec![5; 4], &[gate])
            .unwrap();
        assert_eq!(rt.debug_read_mem(mem, 0, 1), vec![0]);
        rt.complete_user_event(gate).unwrap();
        rt.wait_events(&[e]).unwrap();
        assert_eq!(rt.debug_read_mem(mem, 0, 1), vec![5]);
    }

    #[test]
    fn callback_fires_after_completion() {
        let rt = HostRuntime::new();
        let ctx = rt.create_context(DeviceKind::Accelerator);
        let gate = rt.create_user_event(ctx).unwrap();
        let hit = Arc::new(Mutex::new(false));
        let hit2 = hit.clone();
        rt.on_event_complete(gate, Box::new(move || *hit2.lock().unwrap() = true))
            .unwrap();
        assert!(!*hit.lock().unwrap());
        rt.complete_user_event(gate).unwrap();
        assert!(*hit.lock().unwrap());
    }

    #[test]
    fn svm_interior_pointer_arithmetic() {
        let rt = HostRuntime::new();
        let ctx = rt.create_context(DeviceKind::Accelerator);
        let base = rt.svm_alloc(ctx, MemFlags::READ_WRITE, 128, 64).unwrap();
        rt.svm_write(base.offset(100), &[1, 2, 3]).unwrap();
        assert_eq!(rt.svm_read(base.offset(100), 3).unwrap(), vec![1, 2, 3]);
    }
}

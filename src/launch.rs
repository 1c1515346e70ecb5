// CLASSIFICATION: COMMUNITY
// Filename: launch.rs v0.9
// Date Modified: 2027-01-17
// Author: Lukas Bower

//! Kernel-launch orchestration.
//!
//! Launch order: the real kernel work produces signal S1; verification
//! consumes S1 and produces the result readback signal; mending rides the
//! per-region staging copies independently. The signal handed back to the
//! caller completes after verification, but profiling queries on it are
//! aliased to S1 so callers timing their own kernel see only their
//! kernel.
//!
//! When an argument region cannot carry a canary (caller-owned storage),
//! the launch is redirected onto a shadow kernel whose canary-less
//! arguments are replaced with padded internal copies, and the copies are
//! written back into the original regions afterwards.

use std::time::Instant;

use log::debug;

use crate::alloc::{create_buffer_impl, create_image_impl, release_mem_impl};
use crate::config::StatsMode;
use crate::engine::{AllocPurpose, Detector};
use crate::error::DetectorResult;
use crate::registry::{KernelArg, KernelRecord, MemRecord};
use crate::runtime::{ArgValue, ComputeRuntime, EventId, KernelId, MemFlags, MemId, QueueId};
use crate::{bridge, verify};

/// `dupe[i] = j` where `j <= i` is the lowest argument index denoting the
/// same underlying region as argument `i`. Diagnostic only.
pub(crate) fn find_duplicates(nargs: u32, rec: &KernelRecord) -> Vec<u32> {
    let mut dupe: Vec<u32> = (0..nargs).collect();
    for i in 0..nargs {
        let key_i = rec.args.get(&i).and_then(arg_region_key);
        let Some(key_i) = key_i else { continue };
        for j in 0..i {
            if rec.args.get(&j).and_then(arg_region_key) == Some(key_i) {
                dupe[i as usize] = j;
                break;
            }
        }
    }
    dupe
}

#[derive(PartialEq, Eq, Clone, Copy)]
enum RegionKey {
    Mem(u64),
    Svm(u64),
}

fn arg_region_key(arg: &KernelArg) -> Option<RegionKey> {
    if let Some(mem) = arg.mem {
        return Some(RegionKey::Mem(mem.0));
    }
    arg.svm.map(|p| RegionKey::Svm(p.0))
}

/// A launch redirected onto an engine-built duplicate kernel.
struct ShadowLaunch {
    kernel: KernelId,
    /// (argument index, internal padded copy, original region record)
    replaced: Vec<(u32, MemId, MemRecord)>,
}

impl<R: ComputeRuntime> Detector<R> {
    // --- kernel argument interception --------------------------------

    /// Record and forward a by-value argument.
    pub fn set_kernel_arg_bytes(
        &self,
        kernel: KernelId,
        index: u32,
        bytes: &[u8],
    ) -> DetectorResult<()> {
        self.state
            .runtime
            .set_kernel_arg(kernel, index, ArgValue::Bytes(bytes.to_vec()))?;
        let name = self.state.runtime.kernel_name(kernel)?;
        self.state.kernels.set_arg(
            kernel,
            &name,
            KernelArg {
                index,
                value: ArgValue::Bytes(bytes.to_vec()),
                mem: None,
                svm: None,
            },
        );
        Ok(())
    }

    /// Record and forward a memory-handle argument, resolving it against
    /// the registry.
    pub fn set_kernel_arg_mem(
        &self,
        kernel: KernelId,
        index: u32,
        mem: MemId,
    ) -> DetectorResult<()> {
        self.state
            .runtime
            .set_kernel_arg(kernel, index, ArgValue::Mem(mem))?;
        let name = self.state.runtime.kernel_name(kernel)?;
        let tracked = self.state.mems.find(mem).map(|r| r.handle);
        self.state.kernels.set_arg(
            kernel,
            &name,
            KernelArg {
                index,
                value: ArgValue::Mem(mem),
                mem: tracked,
                svm: None,
            },
        );
        Ok(())
    }

    /// Record and forward a shared-pointer argument, resolving it through
    /// the shared-memory registry (interior pointers included).
    pub fn set_kernel_arg_svm(
        &self,
        kernel: KernelId,
        index: u32,
        ptr: crate::runtime::SvmPtr,
    ) -> DetectorResult<()> {
        self.state
            .runtime
            .set_kernel_arg(kernel, index, ArgValue::Svm(ptr))?;
        let base = self.state.svms.find_containing(ptr).map(|r| r.handle);
        if base.is_none() {
            log::warn!(
                "kernel argument {index} points at {:#x}, which no tracked shared allocation contains",
                ptr.0
            );
        }
        let name = self.state.runtime.kernel_name(kernel)?;
        self.state.kernels.set_arg(
            kernel,
            &name,
            KernelArg {
                index,
                value: ArgValue::Svm(ptr),
                mem: None,
                svm: base,
            },
        );
        Ok(())
    }

    // --- launch entry points -----------------------------------------

    /// Grid launch: the full orchestrated path.
    pub fn enqueue_kernel(
        &self,
        queue: QueueId,
        kernel: KernelId,
        grid: [usize; 3],
        waits: &[EventId],
    ) -> DetectorResult<EventId> {
        let state = &self.state;
        let timing = state.config.stats_mode.contains(StatsMode::KERN_ENQ_TIME);
        let t_total = timing.then(Instant::now);

        let nargs = state.runtime.kernel_num_args(kernel)?;
        let kern_rec = match state.kernels.find(kernel) {
            Some(rec) => rec,
            None => KernelRecord {
                handle: kernel,
                name: state.runtime.kernel_name(kernel)?,
                args: Default::default(),
                ref_count: 1,
            },
        };
        let dupe = find_duplicates(nargs, &kern_rec);

        let shadow = self.prepare_shadow(queue, kernel, &kern_rec, &dupe, nargs)?;
        let launch_kernel = shadow.as_ref().map(|s| s.kernel).unwrap_or(kernel);

        let t_enq = timing.then(Instant::now);
        let s1 = state.runtime.enqueue_kernel(queue, launch_kernel, grid, waits)?;
        let enq_us = t_enq.map(|t| t.elapsed().as_micros() as u64);

        let verify_rec = if shadow.is_some() {
            state.kernels.find(launch_kernel).unwrap_or(kern_rec)
        } else {
            kern_rec
        };
        let external = verify::run(state, queue, &verify_rec, &dupe, s1)?;
        state.event_aliases.insert(external, s1);

        if let Some(shadow) = shadow {
            self.copy_back_and_drop(queue, shadow, &dupe)?;
        }

        if let (Some(t0), Some(enq_us)) = (t_total, enq_us) {
            state
                .stats
                .launch_timing(t0.elapsed().as_micros() as u64, enq_us);
        }
        Ok(external)
    }

    /// Single-task launch: forwarded without verification.
    pub fn enqueue_task(
        &self,
        queue: QueueId,
        kernel: KernelId,
        waits: &[EventId],
    ) -> DetectorResult<EventId> {
        Ok(self
            .state
            .runtime
            .enqueue_kernel(queue, kernel, [1, 1, 1], waits)?)
    }

    /// Native-callback launch: the callback runs when its slot in the
    /// pipeline is reached. Forwarded without verification.
    pub fn enqueue_native(
        &self,
        queue: QueueId,
        func: Box<dyn FnOnce() + Send>,
        waits: &[EventId],
    ) -> DetectorResult<EventId> {
        let evt = self.state.runtime.enqueue_marker(queue, waits)?;
        self.state.runtime.on_event_complete(evt, func)?;
        Ok(evt)
    }

    // --- shadow kernels ----------------------------------------------

    fn prepare_shadow(
        &self,
        queue: QueueId,
        kernel: KernelId,
        rec: &KernelRecord,
        dupe: &[u32],
        nargs: u32,
    ) -> DetectorResult<Option<ShadowLaunch>> {
        let state = &self.state;
        let mut needs_internal = false;
        for i in 0..nargs {
            if dupe[i as usize] != i {
                continue;
            }
            if let Some(arg) = rec.args.get(&i) {
                if let Some(mem) = arg.mem {
                    if let Some(mem_rec) = state.mems.find(mem) {
                        if !mem_rec.has_canary {
                            needs_internal = true;
                            break;
                        }
                    }
                }
            }
        }
        if !needs_internal {
            return Ok(None);
        }

        let ctx = state.runtime.kernel_context(kernel)?;
        let clone = state.runtime.clone_kernel(kernel)?;
        debug!("launch of {} redirected onto shadow kernel", rec.name);
        let mut replaced = Vec::new();
        for i in 0..nargs {
            let source = dupe[i as usize];
            if source != i {
                // Aliased argument: reuse whatever the first occurrence
                // was set to on the shadow.
                if let Some(arg) = state
                    .kernels
                    .find(clone)
                    .and_then(|r| r.args.get(&source).cloned())
                {
                    match arg.value {
                        ArgValue::Bytes(b) => self.set_kernel_arg_bytes(clone, i, &b)?,
                        ArgValue::Mem(m) => self.set_kernel_arg_mem(clone, i, m)?,
                        ArgValue::Svm(p) => self.set_kernel_arg_svm(clone, i, p)?,
                    }
                }
                continue;
            }
            let Some(arg) = rec.args.get(&i) else { continue };
            match (&arg.value, arg.mem) {
                (ArgValue::Svm(p), _) => self.set_kernel_arg_svm(clone, i, *p)?,
                (ArgValue::Mem(m), Some(_)) => {
                    let mem_rec = state.mems.find(*m);
                    match mem_rec {
                        Some(mem_rec) if !mem_rec.has_canary => {
                            let internal =
                                self.build_internal_copy(queue, ctx, &mem_rec)?;
                            self.set_kernel_arg_mem(clone, i, internal)?;
                            replaced.push((i, internal, mem_rec));
                        }
                        _ => self.set_kernel_arg_mem(clone, i, *m)?,
                    }
                }
                (ArgValue::Mem(m), None) => self.set_kernel_arg_mem(clone, i, *m)?,
                (ArgValue::Bytes(b), _) => self.set_kernel_arg_bytes(clone, i, b)?,
            }
        }
        state.runtime.finish(queue)?;
        Ok(Some(ShadowLaunch {
            kernel: clone,
            replaced,
        }))
    }

    /// Padded internal copy of a canary-less region, contents included.
    fn build_internal_copy(
        &self,
        queue: QueueId,
        ctx: crate::runtime::ContextId,
        mem_rec: &MemRecord,
    ) -> DetectorResult<MemId> {
        let state = &self.state;
        let flags = mem_rec.flags
            - (MemFlags::USE_HOST_PTR | MemFlags::COPY_HOST_PTR | MemFlags::ALLOC_HOST_PTR);
        if let Some(info) = &mem_rec.image {
            let internal = create_image_impl(
                state,
                ctx,
                flags,
                info.format,
                &info.desc,
                None,
                AllocPurpose::Internal,
            )?;
            let region = info.layout.logical;
            let evt = bridge::copy_image_any(
                state,
                queue,
                mem_rec.handle,
                internal,
                [0, 0, 0],
                [0, 0, 0],
                region,
                &[],
            )?;
            state.runtime.wait_events(&[evt])?;
            Ok(internal)
        } else {
            let internal = create_buffer_impl(
                state,
                ctx,
                flags,
                mem_rec.size,
                None,
                AllocPurpose::Internal,
            )?;
            let evt = bridge::copy_buffer_any(
                state,
                queue,
                mem_rec.handle,
                internal,
                0,
                0,
                mem_rec.size,
                &[],
            )?;
            state.runtime.wait_events(&[evt])?;
            Ok(internal)
        }
    }

    /// Copy the shadow's engine-owned buffers back into the original
    /// kernel's regions, then tear the shadow down.
    fn copy_back_and_drop(
        &self,
        queue: QueueId,
        shadow: ShadowLaunch,
        dupe: &[u32],
    ) -> DetectorResult<()> {
        let state = &self.state;
        state.runtime.finish(queue)?;
        let mut evts = Vec::new();
        for (idx, internal, orig) in &shadow.replaced {
            if dupe.get(*idx as usize).copied() != Some(*idx) {
                continue;
            }
            if let Some(info) = &orig.image {
                evts.push(bridge::copy_image_any(
                    state,
                    queue,
                    *internal,
                    orig.handle,
                    [0, 0, 0],
                    [0, 0, 0],
                    info.layout.logical,
                    &[],
                )?);
            } else {
                evts.push(bridge::copy_buffer_any(
                    state,
                    queue,
                    *internal,
                    orig.handle,
                    0,
                    0,
                    orig.size,
                    &[],
                )?);
            }
        }
        state.runtime.wait_events(&evts)?;
        for (_, internal, _) in &shadow.replaced {
            release_mem_impl(state, *internal)?;
        }
        state.kernels.remove(shadow.kernel);
        state.runtime.release_kernel(shadow.kernel)?;
        Ok(())
    }
}

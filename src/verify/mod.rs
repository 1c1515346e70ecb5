// CLASSIFICATION: COMMUNITY
// Filename: mod.rs v0.8
// Date Modified: 2027-01-16
// Author: Lukas Bower

//! Post-launch canary verification.
//!
//! Two interchangeable device strategies (copy-canary and single-buffer)
//! plus a host readback-and-scan path, all producing the same contract:
//! a mapping from region to first corrupted offset, or "none". The
//! orchestrator only depends on that contract.

mod common;
mod copy_canary;
mod host_check;
mod single_buffer;

use std::sync::Arc;

use log::debug;

use crate::config::{DeviceSelect, VerifyStrategy};
use crate::engine::EngineState;
use crate::error::DetectorResult;
use crate::registry::{KernelRecord, MemRecord, SvmRecord};
use crate::report::RegionRef;
use crate::runtime::{ComputeRuntime, DeviceKind, EventId, QueueId};

/// The set of regions one launch must verify.
pub struct CheckSet {
    pub buffers: Vec<MemRecord>,
    pub images: Vec<MemRecord>,
    pub svms: Vec<SvmRecord>,
}

impl CheckSet {
    pub fn total(&self) -> usize {
        self.buffers.len() + self.images.len() + self.svms.len()
    }
}

/// Collect every region reachable from the kernel's arguments: tracked
/// handles directly, and, when any argument is a shared pointer, every
/// live non-internal shared region.
pub fn collect_check_set<R: ComputeRuntime>(
    state: &Arc<EngineState<R>>,
    kern: &KernelRecord,
    dupe: &[u32],
) -> CheckSet {
    let mut buffers = Vec::new();
    let mut images = Vec::new();
    let mut has_svm = false;
    for (&i, arg) in &kern.args {
        if dupe.get(i as usize).copied() != Some(i) {
            continue;
        }
        if let Some(mem) = arg.mem {
            if let Some(rec) = state.mems.find(mem) {
                if rec.is_image() {
                    images.push(rec);
                } else {
                    buffers.push(rec);
                }
            }
        } else if arg.svm.is_some() {
            has_svm = true;
        }
    }
    let svms = if has_svm {
        state
            .svms
            .snapshot()
            .into_iter()
            .filter(|r| !r.is_internal)
            .collect()
    } else {
        Vec::new()
    };
    CheckSet {
        buffers,
        images,
        svms,
    }
}

/// The argument index a region is bound to, for diagnostics.
pub(crate) fn arg_index_for(kern: &KernelRecord, region: &RegionRef) -> Option<u32> {
    for (&i, arg) in &kern.args {
        let hit = match region {
            RegionRef::Mem(m) => arg.mem == Some(*m),
            RegionRef::Svm(p) => arg.svm == Some(*p),
        };
        if hit {
            return Some(i);
        }
    }
    None
}

/// Run verification for one launch. `s1` is the completion signal of the
/// real kernel work; the returned signal completes when verification
/// results have been read back (device paths) or immediately (host path,
/// which blocks inline).
pub fn run<R: ComputeRuntime>(
    state: &Arc<EngineState<R>>,
    queue: QueueId,
    kern: &KernelRecord,
    dupe: &[u32],
    s1: EventId,
) -> DetectorResult<EventId> {
    let ctx = state.runtime.queue_context(queue)?;
    let set = collect_check_set(state, kern, dupe);
    if set.total() == 0 {
        return state.completed_event(ctx);
    }

    let device = state.runtime.device_kind(ctx)?;
    let select = state.config.device_select;
    let wants_device = device != DeviceKind::Cpu
        && (((!set.svms.is_empty() || !set.images.is_empty()) && select != DeviceSelect::Host)
            || select == DeviceSelect::Device);

    if wants_device {
        let strategy = state.config.strategy;
        let underflow = state.config.underflow_check;
        state.reset_checker_runtime();
        // Underflow checking needs both canary runs per linear region,
        // which only the in-place scan covers.
        let linear_evt = match (strategy, underflow) {
            (VerifyStrategy::SingleBuffer, _) | (_, true) => {
                single_buffer::verify_linear(state, ctx, queue, &set, kern, dupe, s1)?
            }
            (VerifyStrategy::PtrIndirect, false) => {
                copy_canary::verify_linear(state, ctx, queue, &set, kern, dupe, s1, true)?
            }
            (VerifyStrategy::CopyCanary, false) => {
                copy_canary::verify_linear(state, ctx, queue, &set, kern, dupe, s1, false)?
            }
        };
        let image_evt = match strategy {
            VerifyStrategy::SingleBuffer => {
                single_buffer::verify_images(state, ctx, queue, &set, kern, dupe, s1)?
            }
            _ => copy_canary::verify_images(state, ctx, queue, &set, kern, dupe, s1)?,
        };
        let finish = state
            .runtime
            .enqueue_marker(queue, &[linear_evt, image_evt])?;
        state.flush_checker_runtime();
        Ok(finish)
    } else {
        debug!(
            "host-side verification of {} region(s) for kernel {}",
            set.total(),
            kern.name
        );
        host_check::verify_on_host(state, ctx, queue, &set, kern, dupe, s1)?;
        state.completed_event(ctx)
    }
}

// CLASSIFICATION: COMMUNITY
// Filename: test_queue_cache.rs v0.3
// Date Modified: 2027-01-17
// Author: Lukas Bower

use std::sync::Arc;

use canaryguard::runtime::host::{HostRuntime, KernelIo};
use canaryguard::runtime::{ComputeRuntime, DeviceKind};
use canaryguard::{Detector, DetectorConfig, DeviceSelect, MemFlags, VerifyStrategy};

fn detector() -> (HostRuntime, Detector<HostRuntime>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let rt = HostRuntime::new();
    let cfg = DetectorConfig {
        strategy: VerifyStrategy::CopyCanary,
        device_select: DeviceSelect::Device,
        async_report: false,
        ..DetectorConfig::default()
    };
    (rt.clone(), Detector::new(rt, cfg))
}

#[test]
fn first_queue_per_context_is_cached() {
    let (rt, det) = detector();
    let ctx = rt.create_context(DeviceKind::Accelerator);
    let q1 = det.create_queue(ctx).unwrap();
    let _q2 = det.create_queue(ctx).unwrap();
    assert_eq!(det.state().queue_cache.lookup(ctx), Some(q1));
    assert_eq!(det.state().queue_cache.len(), 1);
}

#[test]
fn released_queues_keep_working_for_the_engine() {
    let (rt, det) = detector();
    let ctx = rt.create_context(DeviceKind::Accelerator);
    let q = det.create_queue(ctx).unwrap();
    det.retain_queue(q).unwrap();
    det.release_queue(q).unwrap();
    det.release_queue(q).unwrap();
    det.release_queue(q).unwrap();
    // The release was quarantined: the cached queue still drives
    // verification for this context.
    let mem = det
        .create_buffer(ctx, MemFlags::READ_WRITE, 128, None)
        .unwrap();
    let k = rt.define_kernel(
        ctx,
        "overrun_by_one",
        1,
        Arc::new(|io: &KernelIo<'_>| {
            let mem = io.arg_mem(0).unwrap();
            io.write_mem(mem, 128, &[1]);
        }),
    );
    det.set_kernel_arg_mem(k, 0, mem).unwrap();
    let evt = det.enqueue_kernel(q, k, [1, 1, 1], &[]).unwrap();
    rt.wait_events(&[evt]).unwrap();
    assert_eq!(det.overflow_total(), 1);
    assert!(det.state().queue_cache.logical_refs(ctx).unwrap() < 1);
}

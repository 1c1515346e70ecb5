// CLASSIFICATION: COMMUNITY
// Filename: test_svm_detection.rs v0.5
// Date Modified: 2027-01-17
// Author: Lukas Bower

use std::sync::Arc;

use canaryguard::runtime::host::{HostRuntime, KernelIo};
use canaryguard::runtime::{ComputeRuntime, DeviceKind, SvmPtr};
use canaryguard::{
    CorruptionSite, Detector, DetectorConfig, DeviceSelect, MemFlags, RegionRef, VerifyStrategy,
};

fn detector(strategy: VerifyStrategy, select: DeviceSelect) -> (HostRuntime, Detector<HostRuntime>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let rt = HostRuntime::new();
    let cfg = DetectorConfig {
        strategy,
        device_select: select,
        async_report: false,
        ..DetectorConfig::default()
    };
    (rt.clone(), Detector::new(rt, cfg))
}

/// Kernel writing `len` bytes from the start of its shared-pointer
/// argument.
fn svm_writer(rt: &HostRuntime, ctx: canaryguard::ContextId) -> canaryguard::KernelId {
    rt.define_kernel(
        ctx,
        "svm_stream_write",
        2,
        Arc::new(|io: &KernelIo<'_>| {
            let ptr = io.arg_svm(0).unwrap();
            let len = io.arg_u32(1) as usize;
            io.write_svm(ptr, &vec![0x33u8; len]);
        }),
    )
}

fn launch_svm(
    det: &Detector<HostRuntime>,
    queue: canaryguard::QueueId,
    kernel: canaryguard::KernelId,
    ptr: SvmPtr,
    len: u32,
) {
    det.set_kernel_arg_svm(kernel, 0, ptr).unwrap();
    det.set_kernel_arg_bytes(kernel, 1, &len.to_le_bytes()).unwrap();
    let evt = det
        .enqueue_kernel(queue, kernel, [len as usize, 1, 1], &[])
        .unwrap();
    det.runtime().wait_events(&[evt]).unwrap();
}

#[test]
fn in_bounds_shared_writes_report_nothing() {
    for strategy in [
        VerifyStrategy::CopyCanary,
        VerifyStrategy::SingleBuffer,
        VerifyStrategy::PtrIndirect,
    ] {
        let (rt, det) = detector(strategy, DeviceSelect::Auto);
        let ctx = rt.create_context(DeviceKind::Accelerator);
        let q = det.create_queue(ctx).unwrap();
        let ptr = det
            .svm_alloc(ctx, MemFlags::READ_WRITE | MemFlags::SVM_FINE_GRAIN, 512, 64)
            .unwrap();
        let k = svm_writer(&rt, ctx);
        launch_svm(&det, q, k, ptr, 512);
        assert_eq!(det.overflow_total(), 0, "false positive under {strategy:?}");
    }
}

#[test]
fn shared_overrun_is_detected_by_every_strategy() {
    for strategy in [
        VerifyStrategy::CopyCanary,
        VerifyStrategy::SingleBuffer,
        VerifyStrategy::PtrIndirect,
    ] {
        let (rt, det) = detector(strategy, DeviceSelect::Auto);
        let ctx = rt.create_context(DeviceKind::Accelerator);
        let q = det.create_queue(ctx).unwrap();
        let ptr = det
            .svm_alloc(ctx, MemFlags::READ_WRITE | MemFlags::SVM_FINE_GRAIN, 512, 64)
            .unwrap();
        let k = svm_writer(&rt, ctx);
        launch_svm(&det, q, k, ptr, 515);
        let findings = det.take_findings();
        assert_eq!(findings.len(), 1, "under {strategy:?}");
        assert_eq!(findings[0].region, RegionRef::Svm(ptr));
        assert!(
            matches!(findings[0].site, CorruptionSite::PastEnd { offset: 0 }),
            "site {:?} under {strategy:?}",
            findings[0].site
        );
    }
}

#[test]
fn repaired_shared_region_passes_the_next_launch() {
    for strategy in [VerifyStrategy::SingleBuffer, VerifyStrategy::CopyCanary] {
        let (rt, det) = detector(strategy, DeviceSelect::Auto);
        let ctx = rt.create_context(DeviceKind::Accelerator);
        let q = det.create_queue(ctx).unwrap();
        let ptr = det
            .svm_alloc(ctx, MemFlags::READ_WRITE | MemFlags::SVM_FINE_GRAIN, 256, 64)
            .unwrap();
        let k = svm_writer(&rt, ctx);
        launch_svm(&det, q, k, ptr, 260);
        det.runtime().finish(q).unwrap();
        launch_svm(&det, q, k, ptr, 256);
        assert_eq!(det.overflow_total(), 1, "under {strategy:?}");
    }
}

#[test]
fn host_check_skips_regions_owned_by_another_context() {
    let (rt, det) = detector(VerifyStrategy::CopyCanary, DeviceSelect::Host);
    let ctx_a = rt.create_context(DeviceKind::Accelerator);
    let ctx_b = rt.create_context(DeviceKind::Accelerator);
    let q = det.create_queue(ctx_a).unwrap();
    // Region lives in context B; the kernel launches in context A. Also
    // corrupt it so a check, if one ran, would fire.
    let foreign = det
        .svm_alloc(ctx_b, MemFlags::READ_WRITE | MemFlags::SVM_FINE_GRAIN, 128, 64)
        .unwrap();
    rt.svm_write(foreign.offset(128), &[0u8; 4]).unwrap();
    let local = det
        .svm_alloc(ctx_a, MemFlags::READ_WRITE | MemFlags::SVM_FINE_GRAIN, 128, 64)
        .unwrap();
    let k = svm_writer(&rt, ctx_a);
    det.set_kernel_arg_svm(k, 0, local).unwrap();
    det.set_kernel_arg_bytes(k, 1, &128u32.to_le_bytes()).unwrap();
    let evt = det.enqueue_kernel(q, k, [128, 1, 1], &[]).unwrap();
    det.runtime().wait_events(&[evt]).unwrap();
    // The foreign region's corruption goes unreported: the host check
    // silently skips regions it does not own.
    assert_eq!(det.overflow_total(), 0);
}

#[test]
fn same_context_host_check_detects_shared_overrun() {
    let (rt, det) = detector(VerifyStrategy::CopyCanary, DeviceSelect::Host);
    let ctx = rt.create_context(DeviceKind::Accelerator);
    let q = det.create_queue(ctx).unwrap();
    let ptr = det
        .svm_alloc(ctx, MemFlags::READ_WRITE | MemFlags::SVM_FINE_GRAIN, 128, 64)
        .unwrap();
    let k = svm_writer(&rt, ctx);
    launch_svm(&det, q, k, ptr, 130);
    let findings = det.take_findings();
    assert_eq!(findings.len(), 1);
    assert!(matches!(
        findings[0].site,
        CorruptionSite::PastEnd { offset: 0 }
    ));
}

#[test]
fn atomics_capable_allocations_are_refused() {
    let (rt, det) = detector(VerifyStrategy::CopyCanary, DeviceSelect::Auto);
    let ctx = rt.create_context(DeviceKind::Accelerator);
    let err = det.svm_alloc(
        ctx,
        MemFlags::READ_WRITE | MemFlags::SVM_FINE_GRAIN | MemFlags::SVM_ATOMICS,
        64,
        64,
    );
    assert!(err.is_err());
}

// CLASSIFICATION: COMMUNITY
// Filename: test_buffer_detection.rs v0.6
// Date Modified: 2027-01-17
// Author: Lukas Bower

use std::sync::Arc;

use canaryguard::runtime::host::{HostRuntime, KernelIo};
use canaryguard::runtime::{ComputeRuntime, DeviceKind, KernelId, MemId};
use canaryguard::{
    BufferInit, CorruptionSite, Detector, DetectorConfig, DeviceSelect, MemFlags, VerifyStrategy,
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

/// Kernel writing `len` bytes from the start of its buffer argument,
/// optionally with a stride between written bytes.
fn writer_kernel(rt: &HostRuntime, ctx: canaryguard::ContextId) -> KernelId {
    rt.define_kernel(
        ctx,
        "stream_write",
        3,
        Arc::new(|io: &KernelIo<'_>| {
            let mem = io.arg_mem(0).unwrap();
            let len = io.arg_u32(1) as usize;
            let stride = io.arg_u32(2).max(1) as usize;
            let mut off = 0;
            while off < len {
                io.write_mem(mem, off, &[0x5A]);
                off += stride;
            }
        }),
    )
}

fn launch(
    det: &Detector<HostRuntime>,
    queue: canaryguard::QueueId,
    kernel: KernelId,
    mem: MemId,
    len: u32,
    stride: u32,
) {
    det.set_kernel_arg_mem(kernel, 0, mem).unwrap();
    det.set_kernel_arg_bytes(kernel, 1, &len.to_le_bytes()).unwrap();
    det.set_kernel_arg_bytes(kernel, 2, &stride.to_le_bytes())
        .unwrap();
    let evt = det.enqueue_kernel(queue, kernel, [len as usize, 1, 1], &[]).unwrap();
    det.runtime().wait_events(&[evt]).unwrap();
}

fn all_strategies() -> Vec<(VerifyStrategy, DeviceSelect)> {
    vec![
        (VerifyStrategy::CopyCanary, DeviceSelect::Device),
        (VerifyStrategy::SingleBuffer, DeviceSelect::Device),
        (VerifyStrategy::CopyCanary, DeviceSelect::Host),
    ]
}

#[test]
fn in_bounds_writes_report_nothing() {
    for (strategy, select) in all_strategies() {
        let (rt, det) = detector(strategy, select);
        let ctx = rt.create_context(DeviceKind::Accelerator);
        let q = det.create_queue(ctx).unwrap();
        let mem = det
            .create_buffer(ctx, MemFlags::READ_WRITE, 1024, None)
            .unwrap();
        let k = writer_kernel(&rt, ctx);
        launch(&det, q, k, mem, 1024, 1);
        assert_eq!(
            det.overflow_total(),
            0,
            "false positive under {strategy:?}/{select:?}"
        );
    }
}

#[test]
fn writing_the_last_user_byte_is_never_reported() {
    let (rt, det) = detector(VerifyStrategy::CopyCanary, DeviceSelect::Device);
    let ctx = rt.create_context(DeviceKind::Accelerator);
    let q = det.create_queue(ctx).unwrap();
    let mem = det
        .create_buffer(ctx, MemFlags::READ_WRITE, 256, None)
        .unwrap();
    let k = rt.define_kernel(
        ctx,
        "last_byte",
        1,
        Arc::new(|io: &KernelIo<'_>| {
            let mem = io.arg_mem(0).unwrap();
            io.write_mem(mem, 255, &[0x77]);
        }),
    );
    det.set_kernel_arg_mem(k, 0, mem).unwrap();
    let evt = det.enqueue_kernel(q, k, [1, 1, 1], &[]).unwrap();
    det.runtime().wait_events(&[evt]).unwrap();
    assert_eq!(det.overflow_total(), 0);
}

#[test]
fn one_byte_past_the_end_is_detected_at_offset_zero() {
    for (strategy, select) in all_strategies() {
        let (rt, det) = detector(strategy, select);
        let ctx = rt.create_context(DeviceKind::Accelerator);
        let q = det.create_queue(ctx).unwrap();
        let mem = det
            .create_buffer(ctx, MemFlags::READ_WRITE, 512, None)
            .unwrap();
        let k = writer_kernel(&rt, ctx);
        launch(&det, q, k, mem, 513, 1);
        let findings = det.take_findings();
        assert_eq!(findings.len(), 1, "under {strategy:?}/{select:?}");
        assert!(
            matches!(findings[0].site, CorruptionSite::PastEnd { offset: 0 }),
            "site {:?} under {strategy:?}/{select:?}",
            findings[0].site
        );
    }
}

#[test]
fn strided_overrun_is_still_detected() {
    let (rt, det) = detector(VerifyStrategy::SingleBuffer, DeviceSelect::Device);
    let ctx = rt.create_context(DeviceKind::Accelerator);
    let q = det.create_queue(ctx).unwrap();
    let mem = det
        .create_buffer(ctx, MemFlags::READ_WRITE, 500, None)
        .unwrap();
    // Every 5th byte, running well past the logical end.
    let k = writer_kernel(&rt, ctx);
    launch(&det, q, k, mem, 600, 5);
    let findings = det.take_findings();
    assert_eq!(findings.len(), 1);
    // 500 is a multiple of 5, so the first padding byte is written.
    assert!(matches!(
        findings[0].site,
        CorruptionSite::PastEnd { offset: 0 }
    ));
}

#[test]
fn duplicate_arguments_report_one_region_with_advisory() {
    let (rt, det) = detector(VerifyStrategy::CopyCanary, DeviceSelect::Device);
    let ctx = rt.create_context(DeviceKind::Accelerator);
    let q = det.create_queue(ctx).unwrap();
    let mem = det
        .create_buffer(ctx, MemFlags::READ_WRITE, 128, None)
        .unwrap();
    let k = rt.define_kernel(
        ctx,
        "aliased",
        2,
        Arc::new(|io: &KernelIo<'_>| {
            let mem = io.arg_mem(0).unwrap();
            io.write_mem(mem, 130, &[1]);
        }),
    );
    det.set_kernel_arg_mem(k, 0, mem).unwrap();
    det.set_kernel_arg_mem(k, 1, mem).unwrap();
    let evt = det.enqueue_kernel(q, k, [1, 1, 1], &[]).unwrap();
    det.runtime().wait_events(&[evt]).unwrap();
    let findings = det.take_findings();
    assert_eq!(findings.len(), 1, "aliased region must be checked once");
    assert_eq!(findings[0].duplicates, vec![(1, 0)]);
}

#[test]
fn mended_region_passes_the_next_launch() {
    for (strategy, select) in all_strategies() {
        let (rt, det) = detector(strategy, select);
        let ctx = rt.create_context(DeviceKind::Accelerator);
        let q = det.create_queue(ctx).unwrap();
        let mem = det
            .create_buffer(ctx, MemFlags::READ_WRITE, 512, None)
            .unwrap();
        let k = writer_kernel(&rt, ctx);
        launch(&det, q, k, mem, 520, 1);
        det.runtime().finish(q).unwrap();
        launch(&det, q, k, mem, 512, 1);
        assert_eq!(
            det.overflow_total(),
            1,
            "exactly one corruption under {strategy:?}/{select:?}"
        );
    }
}

#[test]
fn deferred_analysis_reports_after_quiesce() {
    let _ = env_logger::builder().is_test(true).try_init();
    let rt = HostRuntime::new();
    let cfg = DetectorConfig {
        strategy: VerifyStrategy::CopyCanary,
        device_select: DeviceSelect::Device,
        ..DetectorConfig::default()
    };
    let det = Detector::new(rt.clone(), cfg);
    let ctx = rt.create_context(DeviceKind::Accelerator);
    let q = det.create_queue(ctx).unwrap();
    let mem = det
        .create_buffer(ctx, MemFlags::READ_WRITE, 256, None)
        .unwrap();
    let k = writer_kernel(&rt, ctx);
    launch(&det, q, k, mem, 300, 1);
    det.quiesce();
    assert_eq!(det.overflow_total(), 1);
}

#[test]
fn caller_owned_storage_is_exempt_from_padding() {
    let (rt, det) = detector(VerifyStrategy::CopyCanary, DeviceSelect::Device);
    let ctx = rt.create_context(DeviceKind::Accelerator);
    let storage = Arc::new(std::sync::Mutex::new(vec![9u8; 64]));
    let mem = det
        .create_buffer(
            ctx,
            MemFlags::READ_WRITE,
            64,
            Some(BufferInit::Use(storage.clone())),
        )
        .unwrap();
    let rec = det.state().mems.find(mem).unwrap();
    assert!(!rec.has_canary);
    assert!(rec.host_backed);
    assert_eq!(det.mem_size(mem).unwrap(), 64);
}

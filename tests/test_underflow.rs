// CLASSIFICATION: COMMUNITY
// Filename: test_underflow.rs v0.3
// Date Modified: 2027-01-17
// Author: Lukas Bower

use std::sync::Arc;

use canaryguard::layout::POISON_FILL_LENGTH;
use canaryguard::runtime::host::{HostRuntime, KernelIo};
use canaryguard::runtime::{ComputeRuntime, DeviceKind};
use canaryguard::{
    CorruptionSite, Detector, DetectorConfig, DeviceSelect, MemFlags, VerifyStrategy,
};

fn detector(select: DeviceSelect) -> (HostRuntime, Detector<HostRuntime>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let rt = HostRuntime::new();
    let cfg = DetectorConfig {
        // Copy-canary is configured, but underflow coverage routes linear
        // regions through the in-place scans.
        strategy: VerifyStrategy::CopyCanary,
        device_select: select,
        underflow_check: true,
        async_report: false,
        ..DetectorConfig::default()
    };
    (rt.clone(), Detector::new(rt, cfg))
}

fn underwriter(rt: &HostRuntime, ctx: canaryguard::ContextId) -> canaryguard::KernelId {
    rt.define_kernel(
        ctx,
        "write_before_start",
        2,
        Arc::new(|io: &KernelIo<'_>| {
            let mem = io.arg_mem(0).unwrap();
            let back = io.arg_u32(1) as isize;
            io.write_mem_at(mem, -back, &[0x11]);
        }),
    )
}

#[test]
fn write_before_the_start_is_detected() {
    for select in [DeviceSelect::Device, DeviceSelect::Host] {
        let (rt, det) = detector(select);
        let ctx = rt.create_context(DeviceKind::Accelerator);
        let q = det.create_queue(ctx).unwrap();
        let mem = det
            .create_buffer(ctx, MemFlags::READ_WRITE, 256, None)
            .unwrap();
        let k = underwriter(&rt, ctx);
        det.set_kernel_arg_mem(k, 0, mem).unwrap();
        det.set_kernel_arg_bytes(k, 1, &1u32.to_le_bytes()).unwrap();
        let evt = det.enqueue_kernel(q, k, [1, 1, 1], &[]).unwrap();
        rt.wait_events(&[evt]).unwrap();
        let findings = det.take_findings();
        assert_eq!(findings.len(), 1, "under {select:?}");
        // One byte before the user region is the last byte of the
        // leading run.
        assert!(
            matches!(
                findings[0].site,
                CorruptionSite::BeforeStart { offset } if offset as usize == POISON_FILL_LENGTH - 1
            ),
            "site {:?} under {select:?}",
            findings[0].site
        );
    }
}

#[test]
fn underflow_mode_still_detects_overflows_and_mends_both_runs() {
    let (rt, det) = detector(DeviceSelect::Device);
    let ctx = rt.create_context(DeviceKind::Accelerator);
    let q = det.create_queue(ctx).unwrap();
    let mem = det
        .create_buffer(ctx, MemFlags::READ_WRITE, 128, None)
        .unwrap();
    let k = rt.define_kernel(
        ctx,
        "both_ends",
        1,
        Arc::new(|io: &KernelIo<'_>| {
            let mem = io.arg_mem(0).unwrap();
            io.write_mem_at(mem, -4, &[0xFF; 2]);
            io.write_mem(mem, 130, &[0xFF]);
        }),
    );
    det.set_kernel_arg_mem(k, 0, mem).unwrap();
    let evt = det.enqueue_kernel(q, k, [1, 1, 1], &[]).unwrap();
    rt.wait_events(&[evt]).unwrap();
    let findings = det.take_findings();
    assert_eq!(findings.len(), 1, "one merged finding per region");
    // The underflow hit wins the merge: it is the earlier byte.
    assert!(matches!(
        findings[0].site,
        CorruptionSite::BeforeStart { .. }
    ));

    // The in-place scans repaired both runs; a clean launch stays clean.
    det.runtime().finish(q).unwrap();
    let k2 = rt.define_kernel(
        ctx,
        "clean",
        1,
        Arc::new(|io: &KernelIo<'_>| {
            let mem = io.arg_mem(0).unwrap();
            io.write_mem(mem, 0, &[1]);
        }),
    );
    det.set_kernel_arg_mem(k2, 0, mem).unwrap();
    let evt = det.enqueue_kernel(q, k2, [1, 1, 1], &[]).unwrap();
    rt.wait_events(&[evt]).unwrap();
    assert_eq!(det.overflow_total(), 1);
}

#[test]
fn addressing_is_shifted_but_user_bytes_stay_put() {
    let (rt, det) = detector(DeviceSelect::Device);
    let ctx = rt.create_context(DeviceKind::Accelerator);
    let mem = det
        .create_buffer(
            ctx,
            MemFlags::READ_WRITE,
            16,
            Some(canaryguard::BufferInit::Copy((0u8..16).collect())),
        )
        .unwrap();
    // The user view still reads its own bytes at offset zero even though
    // the physical allocation starts with a poison run.
    assert_eq!(rt.debug_read_mem(mem, 0, 4), vec![0, 1, 2, 3]);
    let rec = det.state().mems.find(mem).unwrap();
    assert_eq!(rec.origin, POISON_FILL_LENGTH);
}

// CLASSIFICATION: COMMUNITY
// Filename: test_image_detection.rs v0.5
// Date Modified: 2027-01-17
// Author: Lukas Bower

use std::sync::Arc;

use canaryguard::layout::{ImageDesc, ImageFormat, ImageKind, ImageOverflowLoc};
use canaryguard::runtime::host::{HostRuntime, KernelIo};
use canaryguard::runtime::{ComputeRuntime, DeviceKind};
use canaryguard::{CorruptionSite, Detector, DetectorConfig, DeviceSelect, MemFlags, VerifyStrategy};

const RGBA8: ImageFormat = ImageFormat {
    channels: 4,
    channel_bytes: 1,
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

fn desc_2d(width: usize, height: usize) -> ImageDesc {
    ImageDesc {
        kind: ImageKind::Dim2,
        width,
        height,
        depth: 1,
        array_size: 1,
        row_pitch: 0,
        slice_pitch: 0,
    }
}

/// Kernel writing one element at the coordinates passed as arguments.
fn poke_kernel(rt: &HostRuntime, ctx: canaryguard::ContextId) -> canaryguard::KernelId {
    rt.define_kernel(
        ctx,
        "poke_image",
        4,
        Arc::new(|io: &KernelIo<'_>| {
            let mem = io.arg_mem(0).unwrap();
            let x = io.arg_u32(1) as usize;
            let y = io.arg_u32(2) as usize;
            let z = io.arg_u32(3) as usize;
            io.write_image_elem(mem, [x, y, z], &[1, 2, 3, 4]);
        }),
    )
}

fn poke(
    det: &Detector<HostRuntime>,
    rt: &HostRuntime,
    queue: canaryguard::QueueId,
    kernel: canaryguard::KernelId,
    img: canaryguard::MemId,
    coord: [u32; 3],
) {
    det.set_kernel_arg_mem(kernel, 0, img).unwrap();
    for (i, c) in coord.iter().enumerate() {
        det.set_kernel_arg_bytes(kernel, i as u32 + 1, &c.to_le_bytes())
            .unwrap();
    }
    let evt = det.enqueue_kernel(queue, kernel, [1, 1, 1], &[]).unwrap();
    rt.wait_events(&[evt]).unwrap();
}

#[test]
fn in_bounds_image_writes_report_nothing() {
    for strategy in [VerifyStrategy::CopyCanary, VerifyStrategy::SingleBuffer] {
        let (rt, det) = detector(strategy, DeviceSelect::Auto);
        let ctx = rt.create_context(DeviceKind::Accelerator);
        let q = det.create_queue(ctx).unwrap();
        let img = det
            .create_image(ctx, MemFlags::READ_WRITE, RGBA8, &desc_2d(8, 4), None)
            .unwrap();
        let k = poke_kernel(&rt, ctx);
        poke(&det, &rt, q, k, img, [7, 3, 0]);
        assert_eq!(det.overflow_total(), 0, "false positive under {strategy:?}");
    }
}

#[test]
fn first_dimension_overrun_is_located() {
    for strategy in [VerifyStrategy::CopyCanary, VerifyStrategy::SingleBuffer] {
        let (rt, det) = detector(strategy, DeviceSelect::Auto);
        let ctx = rt.create_context(DeviceKind::Accelerator);
        let q = det.create_queue(ctx).unwrap();
        let img = det
            .create_image(ctx, MemFlags::READ_WRITE, RGBA8, &desc_2d(8, 4), None)
            .unwrap();
        let k = poke_kernel(&rt, ctx);
        poke(&det, &rt, q, k, img, [8, 1, 0]);
        let findings = det.take_findings();
        assert_eq!(findings.len(), 1, "under {strategy:?}");
        assert!(
            matches!(
                findings[0].site,
                CorruptionSite::Image(ImageOverflowLoc::RowEnd {
                    cols_past: 0,
                    row: 1,
                    slice: 0
                })
            ),
            "site {:?} under {strategy:?}",
            findings[0].site
        );
    }
}

#[test]
fn second_dimension_overrun_is_located() {
    let (rt, det) = detector(VerifyStrategy::CopyCanary, DeviceSelect::Auto);
    let ctx = rt.create_context(DeviceKind::Accelerator);
    let q = det.create_queue(ctx).unwrap();
    let img = det
        .create_image(ctx, MemFlags::READ_WRITE, RGBA8, &desc_2d(8, 4), None)
        .unwrap();
    let k = poke_kernel(&rt, ctx);
    // First row past the logical height.
    poke(&det, &rt, q, k, img, [0, 4, 0]);
    let findings = det.take_findings();
    assert_eq!(findings.len(), 1);
    assert!(matches!(
        findings[0].site,
        CorruptionSite::Image(ImageOverflowLoc::SliceEnd {
            rows_past: 0,
            slice: 0
        })
    ));
}

#[test]
fn host_path_locates_image_overruns_too() {
    let (rt, det) = detector(VerifyStrategy::CopyCanary, DeviceSelect::Host);
    let ctx = rt.create_context(DeviceKind::Accelerator);
    let q = det.create_queue(ctx).unwrap();
    let img = det
        .create_image(ctx, MemFlags::READ_WRITE, RGBA8, &desc_2d(8, 4), None)
        .unwrap();
    let k = poke_kernel(&rt, ctx);
    poke(&det, &rt, q, k, img, [9, 0, 0]);
    let findings = det.take_findings();
    assert_eq!(findings.len(), 1);
    assert!(matches!(
        findings[0].site,
        CorruptionSite::Image(ImageOverflowLoc::RowEnd {
            cols_past: 1,
            row: 0,
            slice: 0
        })
    ));
}

#[test]
fn mended_image_passes_the_next_launch() {
    for strategy in [VerifyStrategy::CopyCanary, VerifyStrategy::SingleBuffer] {
        let (rt, det) = detector(strategy, DeviceSelect::Auto);
        let ctx = rt.create_context(DeviceKind::Accelerator);
        let q = det.create_queue(ctx).unwrap();
        let img = det
            .create_image(ctx, MemFlags::READ_WRITE, RGBA8, &desc_2d(8, 4), None)
            .unwrap();
        let k = poke_kernel(&rt, ctx);
        poke(&det, &rt, q, k, img, [8, 0, 0]);
        det.runtime().finish(q).unwrap();
        poke(&det, &rt, q, k, img, [0, 0, 0]);
        assert_eq!(det.overflow_total(), 1, "under {strategy:?}");
    }
}

#[test]
fn three_d_tail_overrun_is_located() {
    let (rt, det) = detector(VerifyStrategy::CopyCanary, DeviceSelect::Auto);
    let ctx = rt.create_context(DeviceKind::Accelerator);
    let q = det.create_queue(ctx).unwrap();
    let desc = ImageDesc {
        kind: ImageKind::Dim3,
        width: 4,
        height: 3,
        depth: 2,
        array_size: 1,
        row_pitch: 0,
        slice_pitch: 0,
    };
    let img = det
        .create_image(ctx, MemFlags::READ_WRITE, RGBA8, &desc, None)
        .unwrap();
    let k = poke_kernel(&rt, ctx);
    // First slice past the logical depth.
    poke(&det, &rt, q, k, img, [0, 0, 2]);
    let findings = det.take_findings();
    assert_eq!(findings.len(), 1);
    assert!(matches!(
        findings[0].site,
        CorruptionSite::Image(ImageOverflowLoc::Tail { slices_past: 0 })
    ));
}

// CLASSIFICATION: COMMUNITY
// Filename: test_api_bounds.rs v0.4
// Date Modified: 2027-01-17
// Author: Lukas Bower

use std::sync::{Arc, Mutex};

use canaryguard::layout::{ImageDesc, ImageFormat, ImageKind};
use canaryguard::report::FindingKind;
use canaryguard::runtime::{ComputeRuntime, DeviceKind, HostBuf};
use canaryguard::{Detector, DetectorConfig, MemFlags};
use canaryguard::runtime::host::HostRuntime;

fn detector(disable_api_check: bool) -> (HostRuntime, Detector<HostRuntime>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let rt = HostRuntime::new();
    let cfg = DetectorConfig {
        disable_api_check,
        async_report: false,
        ..DetectorConfig::default()
    };
    (rt.clone(), Detector::new(rt, cfg))
}

#[test]
fn oversized_write_is_skipped_and_reported() {
    let (rt, det) = detector(false);
    let ctx = rt.create_context(DeviceKind::Accelerator);
    let q = det.create_queue(ctx).unwrap();
    let mem = det
        .create_buffer(ctx, MemFlags::READ_WRITE, 100, None)
        .unwrap();
    let evt = det
        .enqueue_write_buffer(q, mem, false, 0, vec![7u8; 101], &[])
        .unwrap();
    rt.wait_events(&[evt]).unwrap();
    let findings = det.take_findings();
    assert_eq!(findings.len(), 1);
    assert!(matches!(
        findings[0].kind,
        FindingKind::ApiBoundsViolation {
            call: "enqueue_write_buffer"
        }
    ));
    // The transfer itself was skipped: the buffer still holds zeroes.
    assert_eq!(rt.debug_read_mem(mem, 0, 4), vec![0, 0, 0, 0]);
}

#[test]
fn read_past_logical_size_is_rejected_even_inside_padding() {
    let (rt, det) = detector(false);
    let ctx = rt.create_context(DeviceKind::Accelerator);
    let q = det.create_queue(ctx).unwrap();
    let mem = det
        .create_buffer(ctx, MemFlags::READ_WRITE, 64, None)
        .unwrap();
    let dst: HostBuf = Arc::new(Mutex::new(Vec::new()));
    let evt = det
        .enqueue_read_buffer(q, mem, true, 60, 8, dst, &[])
        .unwrap();
    rt.wait_events(&[evt]).unwrap();
    assert_eq!(det.overflow_total(), 1);
}

#[test]
fn copy_checks_both_source_and_destination() {
    let (rt, det) = detector(false);
    let ctx = rt.create_context(DeviceKind::Accelerator);
    let q = det.create_queue(ctx).unwrap();
    let small = det
        .create_buffer(ctx, MemFlags::READ_WRITE, 32, None)
        .unwrap();
    let big = det
        .create_buffer(ctx, MemFlags::READ_WRITE, 128, None)
        .unwrap();
    let evt = det
        .enqueue_copy_buffer(q, big, small, 0, 0, 64, &[])
        .unwrap();
    rt.wait_events(&[evt]).unwrap();
    assert_eq!(det.overflow_total(), 1);
}

#[test]
fn fill_past_the_end_is_rejected() {
    let (rt, det) = detector(false);
    let ctx = rt.create_context(DeviceKind::Accelerator);
    let q = det.create_queue(ctx).unwrap();
    let mem = det
        .create_buffer(ctx, MemFlags::READ_WRITE, 64, None)
        .unwrap();
    let evt = det
        .enqueue_fill_buffer(q, mem, vec![0xAB], 32, 64, &[])
        .unwrap();
    rt.wait_events(&[evt]).unwrap();
    assert_eq!(det.overflow_total(), 1);
}

#[test]
fn rect_transfer_pitch_arithmetic_is_checked() {
    let (rt, det) = detector(false);
    let ctx = rt.create_context(DeviceKind::Accelerator);
    let q = det.create_queue(ctx).unwrap();
    // An 8x8 region starting two 10-byte rows in reaches byte 84 of a
    // 72-byte buffer.
    let mem = det
        .create_buffer(ctx, MemFlags::READ_WRITE, 72, None)
        .unwrap();
    let evt = det
        .enqueue_write_buffer_rect(
            q,
            mem,
            [0, 2, 0],
            [8, 8, 1],
            10,
            0,
            vec![1u8; 64],
            &[],
        )
        .unwrap();
    rt.wait_events(&[evt]).unwrap();
    assert_eq!(det.overflow_total(), 1);
}

#[test]
fn image_region_past_logical_extent_is_rejected() {
    let (rt, det) = detector(false);
    let ctx = rt.create_context(DeviceKind::Accelerator);
    let q = det.create_queue(ctx).unwrap();
    let desc = ImageDesc {
        kind: ImageKind::Dim2,
        width: 8,
        height: 4,
        depth: 1,
        array_size: 1,
        row_pitch: 0,
        slice_pitch: 0,
    };
    let fmt = ImageFormat {
        channels: 4,
        channel_bytes: 1,
    };
    let img = det
        .create_image(ctx, MemFlags::READ_WRITE, fmt, &desc, None)
        .unwrap();
    // The padded image is larger, but the logical width is 8: a write
    // touching column 8 must be refused.
    let evt = det
        .enqueue_write_image(q, img, false, [6, 0, 0], [3, 1, 1], vec![0u8; 48], &[])
        .unwrap();
    rt.wait_events(&[evt]).unwrap();
    assert_eq!(det.overflow_total(), 1);
    // A fully interior write passes.
    let evt = det
        .enqueue_write_image(q, img, false, [0, 0, 0], [8, 4, 1], vec![0u8; 128], &[])
        .unwrap();
    rt.wait_events(&[evt]).unwrap();
    assert_eq!(det.overflow_total(), 1);
}

#[test]
fn disabling_the_api_check_lets_transfers_through() {
    let (rt, det) = detector(true);
    let ctx = rt.create_context(DeviceKind::Accelerator);
    let q = det.create_queue(ctx).unwrap();
    let mem = det
        .create_buffer(ctx, MemFlags::READ_WRITE, 100, None)
        .unwrap();
    let evt = det
        .enqueue_write_buffer(q, mem, false, 0, vec![7u8; 104], &[])
        .unwrap();
    rt.wait_events(&[evt]).unwrap();
    // No synchronous report; the overflow now sits in the canary and
    // will be caught by the next launch's verification instead.
    assert_eq!(det.overflow_total(), 0);
    assert_eq!(rt.debug_read_mem(mem, 0, 2), vec![7, 7]);
}

// CLASSIFICATION: COMMUNITY
// Filename: test_queries.rs v0.3
// Date Modified: 2027-01-17
// Author: Lukas Bower

use canaryguard::layout::{
    ImageDesc, ImageFormat, ImageKind, IMAGE_POISON_DEPTH, IMAGE_POISON_HEIGHT,
    IMAGE_POISON_WIDTH,
};
use canaryguard::runtime::host::HostRuntime;
use canaryguard::runtime::{ComputeRuntime, DeviceKind};
use canaryguard::{Detector, DetectorConfig, MemFlags};

fn detector() -> (HostRuntime, Detector<HostRuntime>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let rt = HostRuntime::new();
    let cfg = DetectorConfig {
        async_report: false,
        ..DetectorConfig::default()
    };
    (rt.clone(), Detector::new(rt, cfg))
}

#[test]
fn buffer_size_queries_exclude_padding() {
    let (rt, det) = detector();
    let ctx = rt.create_context(DeviceKind::Accelerator);
    let mem = det
        .create_buffer(ctx, MemFlags::READ_WRITE, 777, None)
        .unwrap();
    assert_eq!(det.mem_size(mem).unwrap(), 777);
}

#[test]
fn image_queries_report_logical_extents() {
    let (rt, det) = detector();
    let ctx = rt.create_context(DeviceKind::Accelerator);
    let desc = ImageDesc {
        kind: ImageKind::Dim2Array,
        width: 12,
        height: 5,
        depth: 1,
        array_size: 3,
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
    assert_eq!(det.image_extents(img).unwrap(), [12, 5, 1, 3]);
    assert_eq!(det.mem_size(img).unwrap(), 12 * 5 * 3 * 4);
}

#[test]
fn device_limits_subtract_the_pads() {
    let (rt, det) = detector();
    let ctx = rt.create_context(DeviceKind::Accelerator);
    let raw = rt.device_limits(ctx).unwrap();
    let adjusted = det.device_limits(ctx).unwrap();
    assert_eq!(
        adjusted.image2d_max_width,
        raw.image2d_max_width - IMAGE_POISON_WIDTH
    );
    assert_eq!(
        adjusted.image2d_max_height,
        raw.image2d_max_height - IMAGE_POISON_HEIGHT
    );
    assert_eq!(
        adjusted.image3d_max_depth,
        raw.image3d_max_depth - IMAGE_POISON_DEPTH
    );
    assert_eq!(
        adjusted.image_buffer_max_elems,
        raw.image_buffer_max_elems - IMAGE_POISON_WIDTH
    );
    assert!(adjusted.max_alloc_size < raw.max_alloc_size);
    // An allocation sized to the adjusted maximum plus its padding must
    // still fit under the raw maximum.
    let depth = raw.max_alloc_size / (raw.image3d_max_width * raw.image3d_max_height);
    let padded = (adjusted.image3d_max_width + IMAGE_POISON_WIDTH)
        * (adjusted.image3d_max_height + IMAGE_POISON_HEIGHT)
        * ((depth - IMAGE_POISON_DEPTH) + IMAGE_POISON_DEPTH);
    assert!(padded <= raw.image3d_max_width * raw.image3d_max_height * depth);
}

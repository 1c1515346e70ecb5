// CLASSIFICATION: COMMUNITY
// Filename: test_stats_output.rs v0.3
// Date Modified: 2027-01-17
// Author: Lukas Bower

use std::fs;
use std::sync::Arc;

use canaryguard::runtime::host::{HostRuntime, KernelIo};
use canaryguard::runtime::{ComputeRuntime, DeviceKind};
use canaryguard::{Detector, DetectorConfig, DeviceSelect, MemFlags, StatsMode, VerifyStrategy};
use serial_test::serial;

fn temp_prefix(tag: &str) -> String {
    let dir = std::env::temp_dir().join(format!("canaryguard_{tag}_{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    format!("{}/", dir.display())
}

#[test]
#[serial]
fn launch_timing_rows_are_appended() {
    let _ = env_logger::builder().is_test(true).try_init();
    let prefix = temp_prefix("launch");
    let rt = HostRuntime::new();
    let cfg = DetectorConfig {
        stats_mode: StatsMode::KERN_ENQ_TIME,
        log_prefix: prefix.clone(),
        strategy: VerifyStrategy::CopyCanary,
        device_select: DeviceSelect::Device,
        async_report: false,
        ..DetectorConfig::default()
    };
    let det = Detector::new(rt.clone(), cfg);
    let ctx = rt.create_context(DeviceKind::Accelerator);
    let q = det.create_queue(ctx).unwrap();
    let mem = det
        .create_buffer(ctx, MemFlags::READ_WRITE, 64, None)
        .unwrap();
    let k = rt.define_kernel(
        ctx,
        "noopish",
        1,
        Arc::new(|io: &KernelIo<'_>| {
            let mem = io.arg_mem(0).unwrap();
            io.write_mem(mem, 0, &[1]);
        }),
    );
    det.set_kernel_arg_mem(k, 0, mem).unwrap();
    let evt = det.enqueue_kernel(q, k, [1, 1, 1], &[]).unwrap();
    rt.wait_events(&[evt]).unwrap();

    let path = det.state().stats.output_path().unwrap().clone();
    drop(det);
    let contents = fs::read_to_string(path).unwrap();
    let mut lines = contents.lines();
    assert_eq!(
        lines.next().unwrap(),
        "total_durr_us, enq_durr_us, checker_enqueue_overhead_us"
    );
    assert!(lines.next().is_some(), "one row per launch");
}

#[test]
#[serial]
fn memory_overhead_summary_lands_at_teardown() {
    let _ = env_logger::builder().is_test(true).try_init();
    let prefix = temp_prefix("mem");
    let rt = HostRuntime::new();
    let cfg = DetectorConfig {
        stats_mode: StatsMode::MEM_OVERHEAD,
        log_prefix: prefix.clone(),
        async_report: false,
        ..DetectorConfig::default()
    };
    let det = Detector::new(rt.clone(), cfg);
    let ctx = rt.create_context(DeviceKind::Accelerator);
    let mem = det
        .create_buffer(ctx, MemFlags::READ_WRITE, 1000, None)
        .unwrap();
    det.release_mem(mem).unwrap();

    let snapshot = det.state().accounting.snapshot();
    assert_eq!(snapshot.total_user, 1000);
    assert_eq!(snapshot.total_overhead, 8192);
    assert_eq!(snapshot.current_user, 0);

    let path = det.state().stats.output_path().unwrap().clone();
    drop(det);
    let contents = fs::read_to_string(path).unwrap();
    let mut lines = contents.lines();
    assert_eq!(
        lines.next().unwrap(),
        "total_user_mem_B, total_overhead_mem_B, high_user_mem_B, high_overhead_mem_B"
    );
    assert_eq!(lines.next().unwrap(), "1000, 8192, 1000, 8192");
}

#[test]
#[serial]
fn detector_log_records_the_run() {
    let _ = env_logger::builder().is_test(true).try_init();
    let prefix = temp_prefix("log");
    let log_path = std::path::PathBuf::from(format!("{prefix}detector.log"));
    let rt = HostRuntime::new();
    let cfg = DetectorConfig {
        log_location: Some(log_path.clone()),
        strategy: VerifyStrategy::CopyCanary,
        device_select: DeviceSelect::Device,
        async_report: false,
        ..DetectorConfig::default()
    };
    let det = Detector::new(rt.clone(), cfg);
    let ctx = rt.create_context(DeviceKind::Accelerator);
    let q = det.create_queue(ctx).unwrap();
    let mem = det
        .create_buffer(ctx, MemFlags::READ_WRITE, 64, None)
        .unwrap();
    let k = rt.define_kernel(
        ctx,
        "spill_one",
        1,
        Arc::new(|io: &KernelIo<'_>| {
            let mem = io.arg_mem(0).unwrap();
            io.write_mem(mem, 64, &[9]);
        }),
    );
    det.set_kernel_arg_mem(k, 0, mem).unwrap();
    let evt = det.enqueue_kernel(q, k, [1, 1, 1], &[]).unwrap();
    rt.wait_events(&[evt]).unwrap();
    drop(det);

    let contents = fs::read_to_string(log_path).unwrap();
    assert!(contents.contains("Beginning buffer overflow detection run."));
    assert!(contents.contains("Buffer overflow detected"));
    assert!(contents.contains("Found a total of 1 errors."));
}

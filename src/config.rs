// CLASSIFICATION: COMMUNITY
// Filename: config.rs v0.7
// Date Modified: 2027-01-09
// Author: Lukas Bower

//! Runtime configuration for the detector, read once from the environment.
//!
//! Every knob also has a plain field so embedding code and tests can build
//! a [`DetectorConfig`] directly without touching the process environment.

use std::env;
use std::path::PathBuf;

use bitflags::bitflags;
use log::warn;

bitflags! {
    /// Performance-statistics collection mask (`PERF_STATS_MODE`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StatsMode: u32 {
        /// Wall-clock launch timing: total wrapper time vs enqueue time.
        const KERN_ENQ_TIME = 1;
        /// Accumulated checker-kernel device time per launch.
        const CHECKER_TIME = 2;
        /// User vs overhead byte accounting with high-water marks.
        const MEM_OVERHEAD = 4;
    }
}

/// Which verification strategy the engine runs after a launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyStrategy {
    /// Stage every region's canary bytes into one scratch region, then run
    /// a single reduction kernel over the staging area.
    CopyCanary,
    /// Scan each region's own trailing bytes in place, one small kernel
    /// per region, repairing the poison pattern while scanning.
    SingleBuffer,
    /// Copy-canary for handles, but shared-memory regions are scanned
    /// through a device-side pointer table instead of staged copies.
    PtrIndirect,
}

/// Where verification runs when both sides are capable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSelect {
    /// Device for images/shared memory, host for small buffer-only sets.
    Auto,
    /// Force every check onto the accelerator.
    Device,
    /// Force every check onto the host.
    Host,
}

/// All recognized options. `Default` pulls from the process environment.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Abort the process when corruption is detected (`EXIT_ON_OVERFLOW`).
    pub exit_on_overflow: bool,
    /// Exit code used when aborting (`ERROR_EXITCODE`).
    pub error_exitcode: i32,
    /// Strategy selection (`VERIFY_STRATEGY`).
    pub strategy: VerifyStrategy,
    /// Skip the synchronous transfer bounds pre-check (`DISABLE_API_CHECK`).
    pub disable_api_check: bool,
    /// Performance statistics mask (`PERF_STATS_MODE`).
    pub stats_mode: StatsMode,
    /// Host/device check placement (`DEVICE_SELECT`).
    pub device_select: DeviceSelect,
    /// Attach a host call-site backtrace to reports (`PRINT_BACKTRACE`).
    pub print_backtrace: bool,
    /// Append-only detector log file (`LOG_LOCATION`).
    pub log_location: Option<PathBuf>,
    /// Prefix for CSV statistics output paths (`LOG_PREFIX`).
    pub log_prefix: String,
    /// Also pad and check the bytes before each region (`UNDERFLOW_CHECK`).
    pub underflow_check: bool,
    /// Analyze verification results from a completion callback instead of
    /// blocking the launching thread. Not environment-controlled.
    pub async_report: bool,
}

fn env_flag(name: &str) -> bool {
    match env::var(name) {
        Ok(v) => !matches!(v.trim(), "" | "0" | "false" | "off"),
        Err(_) => false,
    }
}

fn env_num(name: &str) -> Option<i64> {
    let raw = env::var(name).ok()?;
    match raw.trim().parse::<i64>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("ignoring unparsable {name}={raw}");
            None
        }
    }
}

impl DetectorConfig {
    /// Read the configuration from the environment.
    pub fn from_env() -> Self {
        let strategy = match env::var("VERIFY_STRATEGY").ok().as_deref() {
            Some("single-buffer") | Some("2") => VerifyStrategy::SingleBuffer,
            Some("ptr-indirect") | Some("0") => VerifyStrategy::PtrIndirect,
            Some("copy-canary") | Some("1") | None => VerifyStrategy::CopyCanary,
            Some(other) => {
                warn!("unknown VERIFY_STRATEGY={other}, using copy-canary");
                VerifyStrategy::CopyCanary
            }
        };
        let device_select = match env::var("DEVICE_SELECT").ok().as_deref() {
            Some("device") | Some("gpu") | Some("1") => DeviceSelect::Device,
            Some("host") | Some("cpu") | Some("2") => DeviceSelect::Host,
            _ => DeviceSelect::Auto,
        };
        let stats_mode = env_num("PERF_STATS_MODE")
            .map(|v| StatsMode::from_bits_truncate(v as u32))
            .unwrap_or(StatsMode::empty());
        DetectorConfig {
            exit_on_overflow: env_flag("EXIT_ON_OVERFLOW"),
            error_exitcode: env_num("ERROR_EXITCODE").unwrap_or(1) as i32,
            strategy,
            disable_api_check: env_flag("DISABLE_API_CHECK"),
            stats_mode,
            device_select,
            print_backtrace: env_flag("PRINT_BACKTRACE"),
            log_location: env::var("LOG_LOCATION").ok().map(PathBuf::from),
            log_prefix: env::var("LOG_PREFIX").unwrap_or_default(),
            underflow_check: env_flag("UNDERFLOW_CHECK"),
            async_report: true,
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        DetectorConfig {
            exit_on_overflow: false,
            error_exitcode: 1,
            strategy: VerifyStrategy::CopyCanary,
            disable_api_check: false,
            stats_mode: StatsMode::empty(),
            device_select: DeviceSelect::Auto,
            print_backtrace: false,
            log_location: None,
            log_prefix: String::new(),
            underflow_check: false,
            async_report: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn strategy_parsing() {
        std::env::set_var("VERIFY_STRATEGY", "single-buffer");
        assert_eq!(
            DetectorConfig::from_env().strategy,
            VerifyStrategy::SingleBuffer
        );
        std::env::set_var("VERIFY_STRATEGY", "ptr-indirect");
        assert_eq!(
            DetectorConfig::from_env().strategy,
            VerifyStrategy::PtrIndirect
        );
        std::env::remove_var("VERIFY_STRATEGY");
        assert_eq!(
            DetectorConfig::from_env().strategy,
            VerifyStrategy::CopyCanary
        );
    }

    #[test]
    #[serial]
    fn stats_mask_and_exitcode() {
        std::env::set_var("PERF_STATS_MODE", "5");
        std::env::set_var("ERROR_EXITCODE", "42");
        let cfg = DetectorConfig::from_env();
        assert!(cfg.stats_mode.contains(StatsMode::KERN_ENQ_TIME));
        assert!(cfg.stats_mode.contains(StatsMode::MEM_OVERHEAD));
        assert!(!cfg.stats_mode.contains(StatsMode::CHECKER_TIME));
        assert_eq!(cfg.error_exitcode, 42);
        std::env::remove_var("PERF_STATS_MODE");
        std::env::remove_var("ERROR_EXITCODE");
    }
}

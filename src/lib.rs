// CLASSIFICATION: COMMUNITY
// Filename: lib.rs v0.9
// Date Modified: 2027-01-14
// Author: Lukas Bower

//! canaryguard: transparent canary-based overflow detection for
//! accelerator compute kernels.
//!
//! The engine sits between a host program and its compute runtime. Every
//! call that creates, sizes, or consumes a tracked memory region, and every
//! kernel launch, goes through the [`Detector`] facade. Regions are grown
//! with poisoned padding at allocation time; after each launch the padding
//! is verified, corruption is reported, and the padding is mended for the
//! next launch.
//!
//! The native runtime is injected behind the [`runtime::ComputeRuntime`]
//! trait. [`runtime::host::HostRuntime`] is a complete in-process
//! implementation used by the test suite and by host-side checking.

/// Canary layout math: pure shape-to-shape functions.
pub mod layout;

/// Typed errors for the engine and the runtime seam.
pub mod error;

/// Environment-style configuration.
pub mod config;

/// Compute runtime trait and the in-process reference implementation.
pub mod runtime;

/// Handle-to-metadata registries, the queue cache, and the SVM reuse pool.
pub mod registry;

/// Process-wide engine state and the public detector facade.
pub mod engine;

/// Allocation interception (buffers, images, retain/release).
mod alloc;

/// Data-movement interception and the synchronous API bounds pre-check.
mod transfer;

/// Kernel-launch orchestration and duplicate-argument detection.
mod launch;

/// Post-launch canary verification strategies.
pub mod verify;

/// Cross-context copies and completion-signal translation.
pub mod bridge;

/// Canary mending (re-poisoning) after verification.
pub mod mend;

/// Corruption and bounds-violation reporting.
pub mod report;

/// Append-only CSV performance counters.
pub mod stats;

/// Size and capability queries with padding subtracted.
mod query;

/// Capability-gated symbol resolution for the interception shim.
pub mod resolver;

pub use alloc::BufferInit;
pub use config::{DetectorConfig, DeviceSelect, StatsMode, VerifyStrategy};
pub use engine::{default_detector, AllocPurpose, Detector, EngineState};
pub use error::{DetectorError, RuntimeError};
pub use layout::{BufferLayout, ImageLayout, POISON_FILL, POISON_FILL_LENGTH};
pub use report::{CorruptionSite, Finding, RegionRef};
pub use runtime::{
    ArgValue, ComputeRuntime, ContextId, DeviceKind, EventId, HostInit, KernelId, MemFlags, MemId,
    QueueId, SvmPtr,
};

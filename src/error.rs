// CLASSIFICATION: COMMUNITY
// Filename: error.rs v0.4
// Date Modified: 2026-11-02
// Author: Lukas Bower

//! Error types for the detector and the runtime seam.
//!
//! Canary corruption is never an error value; it is a finding routed
//! through [`crate::report`]. The enums here cover real failures: bad
//! handles, allocation failure, poisoned locks.

use thiserror::Error;

/// Failures surfaced by a [`crate::runtime::ComputeRuntime`] implementation.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("invalid context handle")]
    InvalidContext,
    #[error("invalid command queue handle")]
    InvalidQueue,
    #[error("invalid memory object handle")]
    InvalidMem,
    #[error("invalid kernel handle")]
    InvalidKernel,
    #[error("invalid event handle")]
    InvalidEvent,
    #[error("no shared allocation contains pointer {0:#x}")]
    InvalidSvmPointer(u64),
    #[error("allocation of {0} bytes failed")]
    OutOfMemory(usize),
    #[error("invalid buffer size")]
    InvalidBufferSize,
    #[error("sub-buffer region [{origin}, {origin}+{size}) outside parent of {parent_size} bytes")]
    InvalidSubRegion {
        origin: usize,
        size: usize,
        parent_size: usize,
    },
    #[error("kernel argument {0} was never set")]
    ArgNotSet(u32),
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
    #[error("command queue worker exited")]
    QueueGone,
}

/// Failures surfaced by the detector's own entry points.
#[derive(Debug, Error)]
pub enum DetectorError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error("registry lock poisoned")]
    LockPoisoned,
    #[error("kernel has no recorded argument list")]
    UnknownKernel,
    #[error("argument {0} of the launched kernel was never set")]
    MissingArgument(u32),
}

pub type DetectorResult<T> = Result<T, DetectorError>;

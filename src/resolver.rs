// CLASSIFICATION: COMMUNITY
// Filename: resolver.rs v0.3
// Date Modified: 2026-10-28
// Author: Lukas Bower

//! Capability-gated symbol resolution.
//!
//! The interception shim that forces callers onto the wrapped entry
//! points lives outside this crate; where it meets the engine, it asks
//! this resolver which symbols are wrapped, which are denied outright,
//! and which fall through to an injected loader.

use std::collections::HashSet;

/// What the shim should do with one symbol name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Route through the engine's wrapped entry point.
    Wrapped,
    /// Refuse to resolve.
    Denied,
    /// Resolve through the fallback loader.
    Fallback,
    /// Not ours; let the platform resolve it.
    PassThrough,
}

type FallbackLoader = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// Allow/deny sets plus an optional fallback loader probe.
pub struct SymbolPolicy {
    wrapped: HashSet<String>,
    denied: HashSet<String>,
    fallback: Option<FallbackLoader>,
}

impl SymbolPolicy {
    pub fn new<I: IntoIterator<Item = S>, S: Into<String>>(wrapped: I) -> Self {
        SymbolPolicy {
            wrapped: wrapped.into_iter().map(Into::into).collect(),
            denied: HashSet::new(),
            fallback: None,
        }
    }

    pub fn deny<S: Into<String>>(mut self, name: S) -> Self {
        self.denied.insert(name.into());
        self
    }

    /// Install a loader probe consulted for unknown names; it returns
    /// true when it can supply the symbol.
    pub fn with_fallback(mut self, loader: FallbackLoader) -> Self {
        self.fallback = Some(loader);
        self
    }

    pub fn resolve(&self, name: &str) -> Resolution {
        if self.denied.contains(name) {
            return Resolution::Denied;
        }
        if self.wrapped.contains(name) {
            return Resolution::Wrapped;
        }
        match &self.fallback {
            Some(probe) if probe(name) => Resolution::Fallback,
            _ => Resolution::PassThrough,
        }
    }
}

/// The entry points the engine wraps, by conventional name.
pub fn wrapped_entry_points() -> SymbolPolicy {
    SymbolPolicy::new([
        "clCreateBuffer",
        "clCreateSubBuffer",
        "clCreateImage",
        "clCreateImage2D",
        "clCreateImage3D",
        "clRetainMemObject",
        "clReleaseMemObject",
        "clGetMemObjectInfo",
        "clGetImageInfo",
        "clGetDeviceInfo",
        "clCreateCommandQueue",
        "clCreateCommandQueueWithProperties",
        "clRetainCommandQueue",
        "clReleaseCommandQueue",
        "clSVMAlloc",
        "clSVMFree",
        "clEnqueueSVMFree",
        "clEnqueueSVMMap",
        "clEnqueueSVMUnmap",
        "clEnqueueSVMMemFill",
        "clEnqueueSVMMemcpy",
        "clSetKernelArg",
        "clSetKernelArgSVMPointer",
        "clRetainKernel",
        "clReleaseKernel",
        "clEnqueueNDRangeKernel",
        "clEnqueueTask",
        "clEnqueueNativeKernel",
        "clEnqueueReadBuffer",
        "clEnqueueReadBufferRect",
        "clEnqueueWriteBuffer",
        "clEnqueueWriteBufferRect",
        "clEnqueueFillBuffer",
        "clEnqueueCopyBuffer",
        "clEnqueueCopyBufferRect",
        "clEnqueueReadImage",
        "clEnqueueWriteImage",
        "clEnqueueFillImage",
        "clEnqueueCopyImage",
        "clEnqueueCopyImageToBuffer",
        "clEnqueueCopyBufferToImage",
        "clEnqueueMapBuffer",
        "clEnqueueUnmapMemObject",
        "clRetainEvent",
        "clReleaseEvent",
        "clGetEventProfilingInfo",
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapped_names_resolve_to_wrapper() {
        let policy = wrapped_entry_points();
        assert_eq!(policy.resolve("clCreateBuffer"), Resolution::Wrapped);
        assert_eq!(policy.resolve("clGetPlatformIDs"), Resolution::PassThrough);
    }

    #[test]
    fn deny_wins_over_wrap() {
        let policy = wrapped_entry_points().deny("clEnqueueTask");
        assert_eq!(policy.resolve("clEnqueueTask"), Resolution::Denied);
    }

    #[test]
    fn fallback_probe_is_consulted_for_unknowns() {
        let policy =
            SymbolPolicy::new(["clEnqueueNDRangeKernel"]).with_fallback(Box::new(|name| {
                name.starts_with("clIcd")
            }));
        assert_eq!(policy.resolve("clIcdGetPlatformIDsKHR"), Resolution::Fallback);
        assert_eq!(policy.resolve("clUnknownThing"), Resolution::PassThrough);
    }
}

// CLASSIFICATION: COMMUNITY
// Filename: engine.rs v0.8
// Date Modified: 2027-01-15
// Author: Lukas Bower

//! Process-wide engine state and the public detector facade.
//!
//! One [`EngineState`] owns the configuration, every registry, the
//! accounting counters, and the statistics sinks. It is passed by shared
//! reference into every interceptor entry point; nothing in the engine is
//! a free-floating global. A lazily constructed default instance over the
//! in-process runtime is available for embedders that want one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use log::debug;
use once_cell::sync::Lazy;

use crate::config::{DetectorConfig, StatsMode};
use crate::error::DetectorResult;
use crate::registry::{
    EventAliasTable, KernelRegistry, MemRegistry, QueueCache, SvmPool, SvmRegistry,
};
use crate::report::{Finding, Reporter};
use crate::runtime::host::HostRuntime;
use crate::runtime::{ComputeRuntime, ContextId, EventId, KernelId, ProfilingTimes, QueueId};
use crate::stats::{MemAccounting, StatsSink};

/// Who an allocation is for. Threaded explicitly through every call that
/// needs the distinction; there is no ambient thread-local state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocPurpose {
    /// Requested by the application.
    User,
    /// Created by the engine for its own staging and bookkeeping.
    Internal,
}

/// Whether an operation is allowed to touch canary bytes. Engine-internal
/// staging and mending passes run with access allowed; application
/// transfers never do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanaryAccess {
    Denied,
    Allowed,
}

/// Tracks verification analyses that were deferred onto completion
/// callbacks, so shutdown and tests can drain them deterministically.
#[derive(Default)]
pub struct AnalysisGate {
    pending: Mutex<u64>,
    cv: Condvar,
}

impl AnalysisGate {
    pub(crate) fn begin(&self) {
        *self.pending.lock().unwrap() += 1;
    }

    pub(crate) fn end(&self) {
        let mut n = self.pending.lock().unwrap();
        *n = n.saturating_sub(1);
        if *n == 0 {
            self.cv.notify_all();
        }
    }

    /// Block until every deferred analysis has run.
    pub fn wait_idle(&self) {
        let mut n = self.pending.lock().unwrap();
        while *n != 0 {
            n = self.cv.wait(n).unwrap();
        }
    }
}

/// Everything one detector instance owns.
pub struct EngineState<R: ComputeRuntime> {
    pub runtime: R,
    pub config: DetectorConfig,
    pub mems: MemRegistry,
    pub svms: SvmRegistry,
    pub kernels: KernelRegistry,
    pub event_aliases: EventAliasTable,
    pub queue_cache: QueueCache,
    pub svm_pool: SvmPool,
    pub accounting: MemAccounting,
    pub stats: StatsSink,
    pub reporter: Reporter,
    /// Checker-kernel device time accumulated for the current launch.
    pub checker_runtime_us: AtomicU64,
    /// Outstanding deferred verification analyses.
    pub analyses: AnalysisGate,
}

impl<R: ComputeRuntime> EngineState<R> {
    pub fn new(runtime: R, config: DetectorConfig) -> Arc<Self> {
        let stats = StatsSink::new(config.stats_mode, &config.log_prefix);
        let accounting = MemAccounting::new(config.stats_mode);
        let reporter = Reporter::new(&config);
        Arc::new(EngineState {
            runtime,
            config,
            mems: MemRegistry::default(),
            svms: SvmRegistry::default(),
            kernels: KernelRegistry::default(),
            event_aliases: EventAliasTable::default(),
            queue_cache: QueueCache::default(),
            svm_pool: SvmPool::default(),
            accounting,
            stats,
            reporter,
            checker_runtime_us: AtomicU64::new(0),
            analyses: AnalysisGate::default(),
        })
    }

    /// The lazily created, cached internal queue for a context.
    pub fn cached_queue(&self, ctx: ContextId) -> DetectorResult<QueueId> {
        let profiling = self.config.stats_mode.contains(StatsMode::CHECKER_TIME);
        let queue = self
            .queue_cache
            .get_or_create(ctx, || self.runtime.create_queue(ctx, profiling))?;
        Ok(queue)
    }

    /// A user event that is already complete, for paths with nothing to
    /// wait on.
    pub fn completed_event(&self, ctx: ContextId) -> DetectorResult<EventId> {
        let evt = self.runtime.create_user_event(ctx)?;
        self.runtime.complete_user_event(evt)?;
        Ok(evt)
    }

    pub fn reset_checker_runtime(&self) {
        self.checker_runtime_us.store(0, Ordering::Relaxed);
    }

    pub fn add_checker_runtime(&self, us: u64) {
        self.checker_runtime_us.fetch_add(us, Ordering::Relaxed);
    }

    pub fn flush_checker_runtime(&self) {
        if self.config.stats_mode.contains(StatsMode::CHECKER_TIME) {
            self.stats
                .checker_time(self.checker_runtime_us.load(Ordering::Relaxed));
        }
    }
}

impl<R: ComputeRuntime> Drop for EngineState<R> {
    fn drop(&mut self) {
        if self.config.stats_mode.contains(StatsMode::MEM_OVERHEAD) {
            self.stats.mem_overhead(self.accounting.snapshot());
        }
        self.reporter.finalize();
    }
}

/// The public interception facade. Cheap to clone; all clones share one
/// engine state.
pub struct Detector<R: ComputeRuntime> {
    pub(crate) state: Arc<EngineState<R>>,
}

impl<R: ComputeRuntime> Clone for Detector<R> {
    fn clone(&self) -> Self {
        Detector {
            state: self.state.clone(),
        }
    }
}

impl<R: ComputeRuntime> Detector<R> {
    pub fn new(runtime: R, config: DetectorConfig) -> Self {
        Detector {
            state: EngineState::new(runtime, config),
        }
    }

    /// Build with configuration read from the environment.
    pub fn from_env(runtime: R) -> Self {
        Self::new(runtime, DetectorConfig::from_env())
    }

    pub fn state(&self) -> &Arc<EngineState<R>> {
        &self.state
    }

    pub fn runtime(&self) -> &R {
        &self.state.runtime
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.state.config
    }

    /// Total corruption and bounds findings so far.
    pub fn overflow_total(&self) -> u64 {
        self.state.reporter.overflow_total()
    }

    /// Drain retained findings.
    pub fn take_findings(&self) -> Vec<Finding> {
        self.state.reporter.take_findings()
    }

    /// Block until every deferred verification analysis has completed.
    pub fn quiesce(&self) {
        self.state.analyses.wait_idle();
    }

    // --- queue interception ------------------------------------------

    /// Create a command queue, upgrading it with profiling when checker
    /// timing is being collected, and cache the first queue per context.
    pub fn create_queue(&self, ctx: ContextId) -> DetectorResult<QueueId> {
        let profiling = self
            .state
            .config
            .stats_mode
            .contains(StatsMode::CHECKER_TIME);
        let queue = self.state.runtime.create_queue(ctx, profiling)?;
        self.state.queue_cache.insert_user_queue(ctx, queue);
        Ok(queue)
    }

    pub fn retain_queue(&self, queue: QueueId) -> DetectorResult<()> {
        let ctx = self.state.runtime.queue_context(queue)?;
        self.state.queue_cache.retain(ctx);
        Ok(())
    }

    /// Queue release is quarantined: the logical count drops, the native
    /// queue stays alive. Releasing queues has corrupted driver state in
    /// the past, and the cache reuses them anyway.
    pub fn release_queue(&self, queue: QueueId) -> DetectorResult<()> {
        let ctx = self.state.runtime.queue_context(queue)?;
        self.state.queue_cache.release(ctx);
        debug!("queue release for context {ctx:?} discarded (quarantined)");
        Ok(())
    }

    // --- event interception ------------------------------------------

    pub fn retain_event(&self, evt: EventId) -> DetectorResult<()> {
        self.state.event_aliases.retain(evt);
        self.state.runtime.retain_event(evt)?;
        Ok(())
    }

    pub fn release_event(&self, evt: EventId) -> DetectorResult<()> {
        if let Some(internal) = self.state.event_aliases.release(evt) {
            self.state.runtime.release_event(internal)?;
        }
        self.state.runtime.release_event(evt)?;
        Ok(())
    }

    /// Profiling query, redirected through the alias table so callers
    /// timing their own kernel see the real kernel's event.
    pub fn event_profiling(&self, evt: EventId) -> DetectorResult<ProfilingTimes> {
        let target = self.state.event_aliases.profiling_target(evt);
        Ok(self.state.runtime.event_profiling(target)?)
    }

    // --- kernel interception -----------------------------------------

    pub fn retain_kernel(&self, kernel: KernelId) -> DetectorResult<()> {
        self.state.kernels.retain(kernel);
        Ok(())
    }

    /// Kernel release is quarantined like queue release: bookkeeping is
    /// dropped at zero but the native object is left alive.
    pub fn release_kernel(&self, kernel: KernelId) -> DetectorResult<()> {
        self.state.kernels.release(kernel);
        Ok(())
    }
}

static DEFAULT_DETECTOR: Lazy<Detector<HostRuntime>> =
    Lazy::new(|| Detector::from_env(HostRuntime::new()));

/// The process-wide default detector over the in-process runtime,
/// constructed lazily on first use with environment configuration.
pub fn default_detector() -> &'static Detector<HostRuntime> {
    &DEFAULT_DETECTOR
}

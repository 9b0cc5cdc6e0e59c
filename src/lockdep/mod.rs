//! Runtime Lock-Dependency Validator
//!
//! Every lock primitive of the kernel reports its acquisitions and releases
//! here. The validator folds lock instances into classes, records which
//! classes were held while another one was taken, and proves on the first
//! occurrence of every new ordering that it cannot close a cycle or break
//! the IRQ-safety rules. A proven problem is reported once, after which
//! validation switches itself off; the lock primitives never see an error.
//!
//! # Concurrency
//!
//! One non-validated IRQ spinlock (the graph lock) serializes every write to
//! the shared tables. The class hash, dependency lists and chain hash are
//! append-only index lists, so lookups and list walks run without it.
//! Per-task state is only written by its owning task and is published
//! through a seqlock for diagnostic dumps.
//!
//! # Lifecycle
//!
//! A [`Lockdep`] allocates every table once from its [`LockdepConfig`] and
//! never resizes them. The kernel normally uses the process-wide instance
//! created by [`init`]; tests may build private instances.

/// Validator logging macros with consistent [LOCKDEP] subsystem tag
///
/// - lockdep_info!: Important information
/// - lockdep_warn!: Warnings
/// - lockdep_error!: Errors

/// Log important validator information
#[macro_export]
macro_rules! lockdep_info {
    ($($arg:tt)*) => {
        $crate::log_info!("LOCKDEP", $($arg)*)
    };
}

/// Log validator warnings
#[macro_export]
macro_rules! lockdep_warn {
    ($($arg:tt)*) => {
        $crate::log_warn!("LOCKDEP", $($arg)*)
    };
}

/// Log validator errors
#[macro_export]
macro_rules! lockdep_error {
    ($($arg:tt)*) => {
        $crate::log_error!("LOCKDEP", $($arg)*)
    };
}

mod acquire;
mod chain;
mod class;
mod dump;
mod error;
mod graph;
mod irq;
mod key;
mod list;
mod report;
mod search;
mod stat;
mod task;
mod trace;
mod usage;

use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

use spin::{Once, RwLock};

use crate::config::LockdepConfig;
use crate::log::{LogLevel, LogWriter};
use crate::metrics::{LockdepStats, StatsSnapshot};
use crate::platform::Platform;
use crate::sync::{IrqSpinLock, IrqSpinLockGuard, SpinLock};
use chain::ChainCache;
use class::ClassTable;
use graph::DepGraph;
use task::RecursionGuard;
use trace::TraceStore;

pub use chain::{iterate_chain_key, ChainInfo};
pub use class::ClassId;
pub use error::{LockdepError, LockdepResult};
pub use graph::{DepEntry, Direction, EdgeOutcome};
pub use key::{LockClassKey, LockMap};
pub use report::Report;
pub use search::{DepPath, SearchMatch};
pub use stat::{Bounce, LockClassStats, LockTime};
pub use task::{HeldLock, HeldLocks, IrqEvents, ReadMode, TaskId, TaskLockState};
pub use usage::{IrqKind, LockUsage, UsageBit, NR_USAGE_BITS};

/// State owned by the holder of the graph lock
///
/// Table writers take `&mut GraphState` as proof that they hold the lock.
pub(crate) struct GraphState {
    /// Generation stamped on classes visited by the current search
    search_gen: u32,
}

impl GraphState {
    pub(crate) const fn new() -> Self {
        Self { search_gen: 0 }
    }

    /// Generation for a new graph search; never 0, which marks "unvisited"
    pub(crate) fn next_search_gen(&mut self) -> u32 {
        self.search_gen = self.search_gen.wrapping_add(1);
        if self.search_gen == 0 {
            self.search_gen = 1;
        }
        self.search_gen
    }
}

/// Restores the local interrupt state on drop
pub(crate) struct IrqGuard<'a> {
    platform: &'a dyn Platform,
    flags: usize,
}

impl Drop for IrqGuard<'_> {
    fn drop(&mut self) {
        self.platform.irq_restore(self.flags);
    }
}

/// Held for the duration of one validator entry point
///
/// Fields drop in order: the recursion guard is cleared before interrupts
/// are let back in.
pub(crate) struct EntryGuard<'a> {
    _recursion: RecursionGuard<'a>,
    _irq: IrqGuard<'a>,
}

/// The validator
///
/// Owns the class table, the dependency graph, the chain cache, the
/// stack-trace storage and the trust flag. All tables are fixed-capacity
/// arenas addressed by index.
pub struct Lockdep {
    config: LockdepConfig,
    platform: &'static dyn Platform,
    /// Cleared exactly once, by the first reported problem
    debug_locks: AtomicBool,
    state: IrqSpinLock<GraphState>,
    classes: ClassTable,
    graph: DepGraph,
    chains: ChainCache,
    traces: TraceStore,
    stats: LockdepStats,
    tasks: RwLock<Vec<Weak<TaskLockState>>>,
    report: SpinLock<Option<Report>>,
}

impl Lockdep {
    /// Create a validator with every table allocated up front
    pub fn new(platform: &'static dyn Platform, config: LockdepConfig) -> Self {
        let config = config.clamped();
        Self {
            config,
            platform,
            debug_locks: AtomicBool::new(true),
            state: IrqSpinLock::new(GraphState::new()),
            classes: ClassTable::new(config.max_lock_classes),
            graph: DepGraph::new(config.max_list_entries),
            chains: ChainCache::new(config.max_lock_chains, config.max_chain_hlocks),
            traces: TraceStore::new(config.max_stack_trace_entries),
            stats: LockdepStats::new(),
            tasks: RwLock::new(Vec::new()),
            report: SpinLock::new(None),
        }
    }

    /// Effective configuration (after clamping)
    pub fn config(&self) -> &LockdepConfig {
        &self.config
    }

    /// Whether the validator is still trustworthy and validating
    pub fn is_enabled(&self) -> bool {
        self.debug_locks.load(Ordering::Acquire)
    }

    /// Switch validation off
    ///
    /// Returns `true` for the caller that actually turned it off.
    pub fn turn_off(&self) -> bool {
        self.debug_locks.swap(false, Ordering::AcqRel)
    }

    /// Take the graph lock, unless validation has been turned off
    pub(crate) fn graph_lock(&self) -> LockdepResult<IrqSpinLockGuard<'_, GraphState>> {
        let guard = self.state.lock(self.platform);
        if !self.is_enabled() {
            return Err(LockdepError::Disabled);
        }
        Ok(guard)
    }

    /// Mask local interrupts for the lifetime of the guard
    pub(crate) fn irq_guard(&self) -> IrqGuard<'_> {
        IrqGuard {
            platform: self.platform,
            flags: self.platform.irq_save(),
        }
    }

    /// Enter the validator on behalf of `task`
    ///
    /// `None` when validation is off or the task is already inside the
    /// validator (or turned it off for itself).
    pub(crate) fn enter<'a>(&'a self, task: &'a TaskLockState) -> Option<EntryGuard<'a>> {
        if !self.is_enabled() {
            return None;
        }
        let irq = self.irq_guard();
        let recursion = task.enter()?;
        Some(EntryGuard {
            _recursion: recursion,
            _irq: irq,
        })
    }

    /// Report `err` and stop validating
    ///
    /// Only the first failure is reported. `held` must be given whenever the
    /// caller owns the task's held-lock stack.
    pub(crate) fn fail(&self, task: Option<&TaskLockState>, held: Option<&HeldLocks>, err: LockdepError) {
        if err == LockdepError::Disabled {
            return;
        }
        if !self.turn_off() {
            return;
        }

        let held = held.copied().or_else(|| task.map(|t| t.held_locks()));
        let report = Report::new(task, held, err);
        *self.report.lock() = Some(report);

        let mut out = LogWriter::new(LogLevel::Error, "LOCKDEP");
        if report.render(self, &mut out).is_err() {
            lockdep_warn!("report truncated");
        }
    }

    /// The report that turned validation off, if any
    pub fn last_report(&self) -> Option<Report> {
        *self.report.lock()
    }

    /// Snapshot of the validator counters
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Make `task` visible to [`dump_all_held_locks`](Lockdep::dump_all_held_locks)
    pub fn register_task(&self, task: &Arc<TaskLockState>) {
        let mut tasks = self.tasks.write();
        tasks.retain(|t| t.strong_count() > 0);
        tasks.push(Arc::downgrade(task));
    }

    /// Forget a task registered with [`register_task`](Lockdep::register_task)
    pub fn unregister_task(&self, task: &TaskLockState) {
        let ptr = task as *const TaskLockState;
        self.tasks
            .write()
            .retain(|t| t.strong_count() > 0 && !core::ptr::eq(t.as_ptr(), ptr));
    }

    /// Remove every class whose key lies in `[start, start + size)`
    ///
    /// Used when the storage that defined the keys (a module image) goes
    /// away. Dependencies naming those classes are unlinked too. Runs even
    /// after validation has been turned off.
    pub fn free_key_range(&self, start: usize, size: usize) {
        let end = start.saturating_add(size);
        self.zap_classes(|key| key >= start && key < end);
    }

    /// Forget every class of `lock`'s key and its cached class
    pub fn reset_lock(&self, lock: &LockMap) {
        let base = lock.key().addr();
        let end = base + LockClassKey::span();
        self.zap_classes(|key| key >= base && key < end);
        lock.clear_cached_class();
    }

    fn zap_classes<F>(&self, in_range: F)
    where
        F: Fn(usize) -> bool,
    {
        let mut graph = self.state.lock(self.platform);
        let mut zapped = 0;
        for id in self.classes.live() {
            if !in_range(self.classes.class(id).key()) {
                continue;
            }
            self.graph.zap_entries_for(&mut graph, &self.classes, id);
            self.classes.zap(&mut graph, id);
            zapped += 1;
        }
        drop(graph);

        if zapped > 0 {
            lockdep_info!("zapped {} lock classes", zapped);
        }
    }

    /// Wipe per-task state and the chain cache, and trust the validator
    /// again
    ///
    /// Classes and dependencies survive. Every registered task and `task`
    /// lose their held locks; none of them may be running lock operations.
    pub fn reset_for_testing(&self, task: &TaskLockState) {
        let mut graph = self.state.lock(self.platform);
        self.chains.reset(&mut graph, &self.stats);
        drop(graph);

        task.held.write().clear();
        for other in self.tasks.read().iter().filter_map(Weak::upgrade) {
            other.held.write().clear();
        }

        *self.report.lock() = None;
        self.debug_locks.store(true, Ordering::Release);
    }
}

static LOCKDEP: Once<Lockdep> = Once::new();

/// Create the process-wide validator
///
/// The first call wins; later calls return the existing instance and ignore
/// their arguments.
pub fn init(platform: &'static dyn Platform, config: LockdepConfig) -> &'static Lockdep {
    LOCKDEP.call_once(|| {
        let lockdep = Lockdep::new(platform, config);
        let config = lockdep.config();
        lockdep_info!(
            "lock validator: {} classes, {} list entries, {} chains, depth {}",
            config.max_lock_classes,
            config.max_list_entries,
            config.max_lock_chains,
            config.max_lock_depth
        );
        lockdep
    })
}

/// The process-wide validator, once [`init`] has run
pub fn lockdep() -> Option<&'static Lockdep> {
    LOCKDEP.get()
}

/// Validator metrics collection module
/// Tracks process-wide statistics using atomic counters for SMP safety
/// Every counter is monotonic for the life of the validator instance

use core::sync::atomic::{AtomicU64, Ordering};

/// Global validator metrics
pub struct LockdepStats {
    /// Lock classes allocated
    pub lock_classes: AtomicU64,

    /// Dependency list entries allocated (two per dependency)
    pub list_entries: AtomicU64,

    /// Chains cached while in process context
    pub process_chains: AtomicU64,

    /// Chains cached while in softirq context
    pub softirq_chains: AtomicU64,

    /// Chains cached while in hardirq context
    pub hardirq_chains: AtomicU64,

    /// Class ids recorded for cached chains
    pub chain_hlocks: AtomicU64,

    /// Stack-trace frames stored
    pub stack_trace_entries: AtomicU64,

    /// Classes registered but never marked used
    pub unused_locks: AtomicU64,

    /// Chain cache hits
    pub chain_lookup_hits: AtomicU64,

    /// Chain cache misses
    pub chain_lookup_misses: AtomicU64,

    /// Graph nodes visited by the circular dependency check
    pub cyclic_checks: AtomicU64,

    /// Forward usage searches started
    pub find_usage_forwards_checks: AtomicU64,

    /// Backward usage searches started
    pub find_usage_backwards_checks: AtomicU64,

    /// Deepest held-lock stack observed
    pub max_lockdep_depth: AtomicU64,

    /// Deepest graph search observed
    pub max_recursion_depth: AtomicU64,

    /// Hard IRQ off -> on transitions
    pub hardirqs_on_events: AtomicU64,

    /// Hard IRQ on -> off transitions
    pub hardirqs_off_events: AtomicU64,

    /// Hard IRQ enables while already enabled
    pub redundant_hardirqs_on: AtomicU64,

    /// Hard IRQ disables while already disabled
    pub redundant_hardirqs_off: AtomicU64,

    /// Soft IRQ off -> on transitions
    pub softirqs_on_events: AtomicU64,

    /// Soft IRQ on -> off transitions
    pub softirqs_off_events: AtomicU64,

    /// Soft IRQ enables while already enabled
    pub redundant_softirqs_on: AtomicU64,

    /// Soft IRQ disables while already disabled
    pub redundant_softirqs_off: AtomicU64,
}

impl LockdepStats {
    /// Create a new LockdepStats instance with all counters at zero
    pub const fn new() -> Self {
        Self {
            lock_classes: AtomicU64::new(0),
            list_entries: AtomicU64::new(0),
            process_chains: AtomicU64::new(0),
            softirq_chains: AtomicU64::new(0),
            hardirq_chains: AtomicU64::new(0),
            chain_hlocks: AtomicU64::new(0),
            stack_trace_entries: AtomicU64::new(0),
            unused_locks: AtomicU64::new(0),
            chain_lookup_hits: AtomicU64::new(0),
            chain_lookup_misses: AtomicU64::new(0),
            cyclic_checks: AtomicU64::new(0),
            find_usage_forwards_checks: AtomicU64::new(0),
            find_usage_backwards_checks: AtomicU64::new(0),
            max_lockdep_depth: AtomicU64::new(0),
            max_recursion_depth: AtomicU64::new(0),
            hardirqs_on_events: AtomicU64::new(0),
            hardirqs_off_events: AtomicU64::new(0),
            redundant_hardirqs_on: AtomicU64::new(0),
            redundant_hardirqs_off: AtomicU64::new(0),
            softirqs_on_events: AtomicU64::new(0),
            softirqs_off_events: AtomicU64::new(0),
            redundant_softirqs_on: AtomicU64::new(0),
            redundant_softirqs_off: AtomicU64::new(0),
        }
    }

    /// Increment a counter
    #[inline]
    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement a counter that tracks a shrinking population
    #[inline]
    pub fn dec(counter: &AtomicU64) {
        let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }

    /// Add to a counter
    #[inline]
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Raise a high-water mark
    #[inline]
    pub fn record_max(counter: &AtomicU64, value: u64) {
        counter.fetch_max(value, Ordering::Relaxed);
    }

    /// Reset the per-context chain counters (chain cache reset)
    pub(crate) fn reset_chains(&self) {
        self.process_chains.store(0, Ordering::Relaxed);
        self.softirq_chains.store(0, Ordering::Relaxed);
        self.hardirq_chains.store(0, Ordering::Relaxed);
        self.chain_hlocks.store(0, Ordering::Relaxed);
    }

    /// Take a consistent-enough copy of every counter
    pub fn snapshot(&self) -> StatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            lock_classes: get(&self.lock_classes),
            list_entries: get(&self.list_entries),
            process_chains: get(&self.process_chains),
            softirq_chains: get(&self.softirq_chains),
            hardirq_chains: get(&self.hardirq_chains),
            chain_hlocks: get(&self.chain_hlocks),
            stack_trace_entries: get(&self.stack_trace_entries),
            unused_locks: get(&self.unused_locks),
            chain_lookup_hits: get(&self.chain_lookup_hits),
            chain_lookup_misses: get(&self.chain_lookup_misses),
            cyclic_checks: get(&self.cyclic_checks),
            find_usage_forwards_checks: get(&self.find_usage_forwards_checks),
            find_usage_backwards_checks: get(&self.find_usage_backwards_checks),
            max_lockdep_depth: get(&self.max_lockdep_depth),
            max_recursion_depth: get(&self.max_recursion_depth),
            hardirqs_on_events: get(&self.hardirqs_on_events),
            hardirqs_off_events: get(&self.hardirqs_off_events),
            redundant_hardirqs_on: get(&self.redundant_hardirqs_on),
            redundant_hardirqs_off: get(&self.redundant_hardirqs_off),
            softirqs_on_events: get(&self.softirqs_on_events),
            softirqs_off_events: get(&self.softirqs_off_events),
            redundant_softirqs_on: get(&self.redundant_softirqs_on),
            redundant_softirqs_off: get(&self.redundant_softirqs_off),
        }
    }
}

impl Default for LockdepStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the validator counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub lock_classes: u64,
    pub list_entries: u64,
    pub process_chains: u64,
    pub softirq_chains: u64,
    pub hardirq_chains: u64,
    pub chain_hlocks: u64,
    pub stack_trace_entries: u64,
    pub unused_locks: u64,
    pub chain_lookup_hits: u64,
    pub chain_lookup_misses: u64,
    pub cyclic_checks: u64,
    pub find_usage_forwards_checks: u64,
    pub find_usage_backwards_checks: u64,
    pub max_lockdep_depth: u64,
    pub max_recursion_depth: u64,
    pub hardirqs_on_events: u64,
    pub hardirqs_off_events: u64,
    pub redundant_hardirqs_on: u64,
    pub redundant_hardirqs_off: u64,
    pub softirqs_on_events: u64,
    pub softirqs_off_events: u64,
    pub redundant_softirqs_on: u64,
    pub redundant_softirqs_off: u64,
}

impl StatsSnapshot {
    /// Total chains cached across every IRQ context
    pub fn lock_chains(&self) -> u64 {
        self.process_chains + self.softirq_chains + self.hardirq_chains
    }

    /// Dependencies recorded (each one uses a forward and a backward entry)
    pub fn dependencies(&self) -> u64 {
        self.list_entries / 2
    }
}

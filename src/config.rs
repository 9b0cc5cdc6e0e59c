/// Configuration constants for the MelloOS lock validator

/// Bits of a class id folded into the chain hash per held lock
pub const MAX_LOCKDEP_KEYS_BITS: u32 = 13;

/// Maximum number of lock classes (class ids must fit in the chain hash step)
pub const MAX_LOCKDEP_KEYS: usize = (1 << MAX_LOCKDEP_KEYS_BITS) - 1;

/// Class hash table size (buckets = 1 << CLASSHASH_BITS)
pub const CLASSHASH_BITS: u32 = MAX_LOCKDEP_KEYS_BITS - 1;

/// Maximum number of dependency list entries (two per dependency)
pub const MAX_LOCKDEP_ENTRIES: usize = 16384;

/// Bits of the lock chain table size
pub const MAX_LOCKDEP_CHAINS_BITS: u32 = 15;

/// Maximum number of cached lock chains
pub const MAX_LOCKDEP_CHAINS: usize = 1 << MAX_LOCKDEP_CHAINS_BITS;

/// Chain hash table size (buckets = 1 << CHAINHASH_BITS)
pub const CHAINHASH_BITS: u32 = MAX_LOCKDEP_CHAINS_BITS - 1;

/// Class ids recorded for cached chains
pub const MAX_LOCKDEP_CHAIN_HLOCKS: usize = MAX_LOCKDEP_CHAINS * 5;

/// Stack-trace storage shared by classes and dependencies
pub const MAX_STACK_TRACE_ENTRIES: usize = 262144;

/// Maximum number of locks one task may hold at once
pub const MAX_LOCK_DEPTH: usize = 48;

/// Number of sub-classes one lock class key can express
pub const MAX_LOCKDEP_SUBCLASSES: usize = 8;

/// Depth cap for every dependency graph walk
///
/// Exceeding it means a miscalibrated table size or a corrupted graph.
pub const MAX_SEARCH_DEPTH: usize = 40;

/// Frames captured per stack trace
pub const MAX_TRACE_FRAMES: usize = 16;

/// Frames skipped at the top of each captured trace (validator internals)
pub const TRACE_SKIP: usize = 3;

/// Contention points tracked per class when lock statistics are enabled
pub const LOCKSTAT_POINTS: usize = 4;

/// Attempts made by diagnostic dumps before skipping a busy structure
pub const DUMP_RETRIES: usize = 10;

/// Runtime sizing and policy of a validator instance
///
/// Every table is allocated once from these values when the validator is
/// constructed and never resized afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockdepConfig {
    /// Capacity of the class table (clamped to `MAX_LOCKDEP_KEYS`)
    pub max_lock_classes: usize,
    /// Capacity of the dependency list-entry pool
    pub max_list_entries: usize,
    /// Capacity of the chain cache
    pub max_lock_chains: usize,
    /// Capacity of the per-chain class id array
    pub max_chain_hlocks: usize,
    /// Capacity of the stack-trace storage, in frames
    pub max_stack_trace_entries: usize,
    /// Held-lock stack depth per task (clamped to `MAX_LOCK_DEPTH`)
    pub max_lock_depth: usize,
    /// Full dependency proving; when off every acquisition is unchecked
    pub prove_locking: bool,
    /// Wait/hold time and contention statistics
    pub lock_stat: bool,
    /// Check read usage bits symmetrically with write usage bits
    pub strict_read_checks: bool,
    /// Recompute the chain hash from scratch after every transition
    pub check_chain_key: bool,
}

impl LockdepConfig {
    /// Configuration matching the compile-time limits
    pub const fn new() -> Self {
        Self {
            max_lock_classes: MAX_LOCKDEP_KEYS,
            max_list_entries: MAX_LOCKDEP_ENTRIES,
            max_lock_chains: MAX_LOCKDEP_CHAINS,
            max_chain_hlocks: MAX_LOCKDEP_CHAIN_HLOCKS,
            max_stack_trace_entries: MAX_STACK_TRACE_ENTRIES,
            max_lock_depth: MAX_LOCK_DEPTH,
            prove_locking: true,
            lock_stat: false,
            strict_read_checks: true,
            check_chain_key: cfg!(debug_assertions),
        }
    }

    /// Clamp every capacity to what the fixed-size structures can express
    pub(crate) fn clamped(mut self) -> Self {
        self.max_lock_classes = self.max_lock_classes.min(MAX_LOCKDEP_KEYS);
        self.max_lock_depth = self.max_lock_depth.clamp(1, MAX_LOCK_DEPTH);
        // List, chain and trace indices are stored in 32 bits
        self.max_list_entries = self.max_list_entries.min(u32::MAX as usize - 1);
        self.max_lock_chains = self.max_lock_chains.min(u32::MAX as usize - 1);
        self.max_chain_hlocks = self.max_chain_hlocks.min(u32::MAX as usize - 1);
        self.max_stack_trace_entries = self.max_stack_trace_entries.min(u32::MAX as usize - 1);
        self
    }
}

impl Default for LockdepConfig {
    fn default() -> Self {
        Self::new()
    }
}

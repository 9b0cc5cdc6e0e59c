//! Validator error taxonomy
//!
//! Every internal operation returns [`LockdepResult`]. None of these errors
//! ever reach the lock primitive that called into the validator: at the API
//! boundary they collapse into a single report and the trust flag turning
//! off.

use core::fmt;

use super::class::ClassId;
use super::search::DepPath;
use super::task::HeldLock;
use super::usage::UsageBit;

/// Everything that can stop the validator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockdepError {
    /// Validation is already off; nothing to report
    Disabled,

    /// The class table is full
    ClassTableFull,
    /// The dependency list-entry pool is full
    EdgeTableFull,
    /// The chain cache is full
    ChainTableFull,
    /// The stack-trace storage is full
    StackTraceFull,

    /// A class key does not live in static storage
    NonStaticKey { key: usize, name: &'static str },
    /// Sub-class beyond what a key can express
    InvalidSubclass { subclass: u32, name: &'static str },
    /// Incrementally maintained chain hash disagrees with a recomputation
    ChainKeyMismatch { expected: u64, found: u64 },
    /// Held-lock depth is not what a transition should have produced
    DepthMismatch { expected: usize, found: usize },
    /// A graph walk went deeper than the search cap
    SearchTooDeep { class: ClassId },
    /// The task tried to hold more locks than its stack can track
    LockDepthExceeded { depth: usize },

    /// `prev -> next` would close a cycle; `path` leads from `next` back
    /// to `prev` through existing dependencies
    CircularDependency {
        prev: HeldLock,
        next: HeldLock,
        path: DepPath,
    },
    /// A task acquired a class it already holds
    RecursiveLocking { prev: HeldLock, next: HeldLock },
    /// A class picked up both halves of an IRQ usage pair
    InconsistentLockState {
        lock: HeldLock,
        new_bit: UsageBit,
        bad_bit: UsageBit,
    },
    /// Marking `lock` with `new_bit` connects it through the graph to
    /// `other`, which carries `bad_bit`
    IrqInversion {
        lock: HeldLock,
        new_bit: UsageBit,
        bad_bit: UsageBit,
        other: ClassId,
        path: DepPath,
        forwards: bool,
    },
    /// The dependency `prev -> next` connects an IRQ-safe class behind
    /// `prev` with an IRQ-unsafe class after `next`
    BadIrqDependency {
        prev: HeldLock,
        next: HeldLock,
        safe_bit: UsageBit,
        unsafe_bit: UsageBit,
        safe_class: ClassId,
        safe_path: DepPath,
        unsafe_class: ClassId,
        unsafe_path: DepPath,
    },
    /// Release of a lock the task does not hold
    UnbalancedUnlock {
        instance: usize,
        name: &'static str,
        ip: usize,
    },
    /// Contention reported for a lock the task does not hold
    BadContention {
        instance: usize,
        name: &'static str,
        ip: usize,
    },
    /// Memory holding a lock was freed while the lock was held
    HeldLockFreed {
        lock: HeldLock,
        start: usize,
        len: usize,
    },
    /// A task exited with locks still held
    HeldAtExit { depth: usize },
}

/// Result type for validator operations
pub type LockdepResult<T> = Result<T, LockdepError>;

impl LockdepError {
    /// Headline of the report this error produces
    pub const fn title(&self) -> &'static str {
        match self {
            LockdepError::Disabled => "lock validator is off",
            LockdepError::ClassTableFull => "MAX_LOCKDEP_KEYS too low!",
            LockdepError::EdgeTableFull => "MAX_LOCKDEP_ENTRIES too low!",
            LockdepError::ChainTableFull => "MAX_LOCKDEP_CHAINS too low!",
            LockdepError::StackTraceFull => "MAX_STACK_TRACE_ENTRIES too low!",
            LockdepError::NonStaticKey { .. } => "trying to register non-static key",
            LockdepError::InvalidSubclass { .. } => "looking up invalid subclass",
            LockdepError::ChainKeyMismatch { .. } => "chain key mismatch",
            LockdepError::DepthMismatch { .. } => "held lock depth mismatch",
            LockdepError::SearchTooDeep { .. } => "infinite recursion detected in dependency graph",
            LockdepError::LockDepthExceeded { .. } => "MAX_LOCK_DEPTH too low!",
            LockdepError::CircularDependency { .. } => "possible circular locking dependency detected",
            LockdepError::RecursiveLocking { .. } => "possible recursive locking detected",
            LockdepError::InconsistentLockState { .. } => "inconsistent lock state",
            LockdepError::IrqInversion { .. } => "possible irq lock inversion dependency detected",
            LockdepError::BadIrqDependency { .. } => "irq-safe -> irq-unsafe lock order detected",
            LockdepError::UnbalancedUnlock { .. } => "bad unlock balance detected",
            LockdepError::BadContention { .. } => "bad contention detected",
            LockdepError::HeldLockFreed { .. } => "held lock freed",
            LockdepError::HeldAtExit { .. } => "lock held when returning to user space or exiting",
        }
    }

    /// Whether this error proves a locking bug in the monitored program
    /// (as opposed to a validator capacity or consistency problem)
    pub const fn is_locking_bug(&self) -> bool {
        matches!(
            self,
            LockdepError::CircularDependency { .. }
                | LockdepError::RecursiveLocking { .. }
                | LockdepError::InconsistentLockState { .. }
                | LockdepError::IrqInversion { .. }
                | LockdepError::BadIrqDependency { .. }
                | LockdepError::UnbalancedUnlock { .. }
                | LockdepError::BadContention { .. }
                | LockdepError::HeldLockFreed { .. }
                | LockdepError::HeldAtExit { .. }
        )
    }
}

impl fmt::Display for LockdepError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.title())
    }
}

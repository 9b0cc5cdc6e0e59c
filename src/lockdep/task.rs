//! Per-task validator state
//!
//! Each task owns one [`TaskLockState`]. The owner is the only writer of its
//! held-lock stack; the stack is published through a seqlock so diagnostic
//! dumps on other CPUs can take a consistent snapshot or give up, without
//! ever blocking the owner.

use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use super::class::ClassId;
use crate::config::MAX_LOCK_DEPTH;
use crate::sync::SeqLock;

/// Task identifier as seen by the validator
pub type TaskId = usize;

/// How a lock is acquired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Exclusive acquisition
    Write,
    /// Shared acquisition
    Read,
    /// Shared acquisition that may nest inside itself
    Recursive,
}

impl ReadMode {
    /// Whether this is any flavour of shared acquisition
    pub const fn is_read(self) -> bool {
        !matches!(self, ReadMode::Write)
    }
}

/// One entry of a task's held-lock stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeldLock {
    pub(crate) class: ClassId,
    pub(crate) acquire_ip: usize,
    pub(crate) instance: usize,
    pub(crate) name: &'static str,
    pub(crate) trylock: bool,
    pub(crate) read: ReadMode,
    pub(crate) check: bool,
    pub(crate) hardirqs_off: bool,
    /// Chain key before this lock was folded in
    pub(crate) prev_chain_key: u64,
    /// 0 process, 1 softirq, 2 or 3 hardirq
    pub(crate) irq_context: u8,
    pub(crate) waittime_stamp: u64,
    pub(crate) holdtime_stamp: u64,
}

impl HeldLock {
    pub(crate) const EMPTY: HeldLock = HeldLock {
        class: ClassId(0),
        acquire_ip: 0,
        instance: 0,
        name: "",
        trylock: false,
        read: ReadMode::Write,
        check: false,
        hardirqs_off: false,
        prev_chain_key: 0,
        irq_context: 0,
        waittime_stamp: 0,
        holdtime_stamp: 0,
    };

    pub fn class(&self) -> ClassId {
        self.class
    }

    pub fn acquire_ip(&self) -> usize {
        self.acquire_ip
    }

    pub fn instance(&self) -> usize {
        self.instance
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn read(&self) -> ReadMode {
        self.read
    }

    pub fn is_trylock(&self) -> bool {
        self.trylock
    }

    pub fn irq_context(&self) -> u8 {
        self.irq_context
    }
}

/// A task's held-lock stack and running chain key
#[derive(Debug, Clone, Copy)]
pub struct HeldLocks {
    pub(crate) locks: [HeldLock; MAX_LOCK_DEPTH],
    pub(crate) depth: usize,
    pub(crate) curr_chain_key: u64,
}

impl HeldLocks {
    pub(crate) const fn new() -> Self {
        Self {
            locks: [HeldLock::EMPTY; MAX_LOCK_DEPTH],
            depth: 0,
            curr_chain_key: 0,
        }
    }

    /// Number of locks held
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Incremental hash of the held classes
    pub fn chain_key(&self) -> u64 {
        self.curr_chain_key
    }

    /// Held locks, oldest first
    pub fn as_slice(&self) -> &[HeldLock] {
        &self.locks[..self.depth.min(MAX_LOCK_DEPTH)]
    }

    pub(crate) fn clear(&mut self) {
        self.depth = 0;
        self.curr_chain_key = 0;
    }
}

/// IRQ transition bookkeeping of one task, kept for reports
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IrqEvents {
    pub irq_events: u64,
    pub hardirq_enable_ip: usize,
    pub hardirq_enable_event: u64,
    pub hardirq_disable_ip: usize,
    pub hardirq_disable_event: u64,
    pub softirq_enable_ip: usize,
    pub softirq_enable_event: u64,
    pub softirq_disable_ip: usize,
    pub softirq_disable_event: u64,
}

pub(crate) struct IrqState {
    pub(crate) hardirqs_enabled: AtomicBool,
    pub(crate) softirqs_enabled: AtomicBool,
    pub(crate) hardirq_context: AtomicU32,
    pub(crate) softirq_context: AtomicU32,
    irq_events: AtomicU64,
    hardirq_enable_ip: AtomicUsize,
    hardirq_enable_event: AtomicU64,
    hardirq_disable_ip: AtomicUsize,
    hardirq_disable_event: AtomicU64,
    softirq_enable_ip: AtomicUsize,
    softirq_enable_event: AtomicU64,
    softirq_disable_ip: AtomicUsize,
    softirq_disable_event: AtomicU64,
}

/// Which IRQ transition an event records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IrqTransition {
    HardirqsOn,
    HardirqsOff,
    SoftirqsOn,
    SoftirqsOff,
}

impl IrqState {
    const fn new() -> Self {
        Self {
            hardirqs_enabled: AtomicBool::new(true),
            softirqs_enabled: AtomicBool::new(true),
            hardirq_context: AtomicU32::new(0),
            softirq_context: AtomicU32::new(0),
            irq_events: AtomicU64::new(0),
            hardirq_enable_ip: AtomicUsize::new(0),
            hardirq_enable_event: AtomicU64::new(0),
            hardirq_disable_ip: AtomicUsize::new(0),
            hardirq_disable_event: AtomicU64::new(0),
            softirq_enable_ip: AtomicUsize::new(0),
            softirq_enable_event: AtomicU64::new(0),
            softirq_disable_ip: AtomicUsize::new(0),
            softirq_disable_event: AtomicU64::new(0),
        }
    }

    /// Stamp a transition with the next event number
    pub(crate) fn record(&self, transition: IrqTransition, ip: usize) {
        let event = self.irq_events.fetch_add(1, Ordering::Relaxed) + 1;
        let (ip_slot, event_slot) = match transition {
            IrqTransition::HardirqsOn => (&self.hardirq_enable_ip, &self.hardirq_enable_event),
            IrqTransition::HardirqsOff => (&self.hardirq_disable_ip, &self.hardirq_disable_event),
            IrqTransition::SoftirqsOn => (&self.softirq_enable_ip, &self.softirq_enable_event),
            IrqTransition::SoftirqsOff => (&self.softirq_disable_ip, &self.softirq_disable_event),
        };
        ip_slot.store(ip, Ordering::Relaxed);
        event_slot.store(event, Ordering::Relaxed);
    }

    fn events(&self) -> IrqEvents {
        IrqEvents {
            irq_events: self.irq_events.load(Ordering::Relaxed),
            hardirq_enable_ip: self.hardirq_enable_ip.load(Ordering::Relaxed),
            hardirq_enable_event: self.hardirq_enable_event.load(Ordering::Relaxed),
            hardirq_disable_ip: self.hardirq_disable_ip.load(Ordering::Relaxed),
            hardirq_disable_event: self.hardirq_disable_event.load(Ordering::Relaxed),
            softirq_enable_ip: self.softirq_enable_ip.load(Ordering::Relaxed),
            softirq_enable_event: self.softirq_enable_event.load(Ordering::Relaxed),
            softirq_disable_ip: self.softirq_disable_ip.load(Ordering::Relaxed),
            softirq_disable_event: self.softirq_disable_event.load(Ordering::Relaxed),
        }
    }
}

/// Validator state owned by one task
///
/// A new task starts in process context with hard and soft interrupts
/// enabled and no locks held.
pub struct TaskLockState {
    id: TaskId,
    name: &'static str,
    pub(crate) held: SeqLock<HeldLocks>,
    /// Re-entrancy guard plus `lockdep_off` nesting
    recursion: AtomicU32,
    pub(crate) irq: IrqState,
}

/// Clears the re-entrancy guard on drop
pub(crate) struct RecursionGuard<'a> {
    task: &'a TaskLockState,
}

impl Drop for RecursionGuard<'_> {
    fn drop(&mut self) {
        self.task.recursion.fetch_sub(1, Ordering::Relaxed);
    }
}

impl TaskLockState {
    /// Create the state of a task
    pub const fn new(id: TaskId, name: &'static str) -> Self {
        Self {
            id,
            name,
            held: SeqLock::new(HeldLocks::new()),
            recursion: AtomicU32::new(0),
            irq: IrqState::new(),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Enter the validator; `None` if it is already running for this task
    /// or the task turned it off
    pub(crate) fn enter(&self) -> Option<RecursionGuard<'_>> {
        if self.recursion.load(Ordering::Relaxed) != 0 {
            return None;
        }
        self.recursion.store(1, Ordering::Relaxed);
        Some(RecursionGuard { task: self })
    }

    /// Whether validator calls from this task are currently ignored
    pub fn in_validator(&self) -> bool {
        self.recursion.load(Ordering::Relaxed) != 0
    }

    /// Stop validating this task's lock operations (nests)
    pub fn lockdep_off(&self) {
        self.recursion.fetch_add(1, Ordering::Relaxed);
    }

    /// Undo one `lockdep_off`
    pub fn lockdep_on(&self) {
        let _ = self
            .recursion
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }

    /// Snapshot of the held-lock stack
    ///
    /// Retries while the owner is mid-update; only the owner or a quiescent
    /// task should call this.
    pub fn held_locks(&self) -> HeldLocks {
        self.held.read(|h| *h)
    }

    /// Number of locks currently held
    pub fn depth(&self) -> usize {
        self.held.read(|h| h.depth)
    }

    /// Current chain key
    pub fn chain_key(&self) -> u64 {
        self.held.read(|h| h.curr_chain_key)
    }

    pub fn hardirqs_enabled(&self) -> bool {
        self.irq.hardirqs_enabled.load(Ordering::Relaxed)
    }

    pub fn softirqs_enabled(&self) -> bool {
        self.irq.softirqs_enabled.load(Ordering::Relaxed)
    }

    pub fn in_hardirq(&self) -> bool {
        self.irq.hardirq_context.load(Ordering::Relaxed) != 0
    }

    pub fn in_softirq(&self) -> bool {
        self.irq.softirq_context.load(Ordering::Relaxed) != 0
    }

    /// Context bucket of new acquisitions: `2 * hardirq + softirq`
    pub fn irq_context(&self) -> u8 {
        2 * self.in_hardirq() as u8 + self.in_softirq() as u8
    }

    /// IRQ transition history
    pub fn irq_events(&self) -> IrqEvents {
        self.irq.events()
    }
}

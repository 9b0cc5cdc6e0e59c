//! IRQ-context safety tracking
//!
//! Usage bits are only ever added. Setting a new IRQ bit on a class checks
//! it twice: against the class's own opposite bit, then through the graph
//! against every class that could be taken after it (for "used in" bits) or
//! before it (for "enabled" bits).

use core::sync::atomic::Ordering;

use super::error::{LockdepError, LockdepResult};
use super::task::{HeldLock, HeldLocks, IrqTransition, ReadMode, TaskLockState};
use super::usage::{IrqKind, UsageBit};
use super::{GraphState, Lockdep};
use crate::metrics::LockdepStats;

/// Usage pairs checked whenever a new dependency is added: a class behind
/// `prev` carrying the first bit must not reach a class after `next`
/// carrying the second
const IRQ_DEPENDENCY_PAIRS: [(UsageBit, UsageBit); 4] = [
    (UsageBit::UsedInHardirq, UsageBit::EnabledHardirq),
    (UsageBit::UsedInHardirqRead, UsageBit::EnabledHardirq),
    (UsageBit::UsedInSoftirq, UsageBit::EnabledSoftirq),
    (UsageBit::UsedInSoftirqRead, UsageBit::EnabledSoftirq),
];

impl Lockdep {
    /// Give the class of `hlock` a usage bit
    ///
    /// Already-set bits return without locking.
    pub(crate) fn mark_lock(&self, task: &TaskLockState, hlock: &HeldLock, bit: UsageBit) -> LockdepResult<()> {
        let class = self.classes.class(hlock.class);
        if class.usage().has(bit) {
            return Ok(());
        }

        let mut graph = self.graph_lock()?;
        if class.usage().has(bit) {
            return Ok(());
        }

        let trace = self.traces.save(&mut graph, self.platform, &self.stats)?;
        class.set_usage(&mut graph, bit, trace);

        match bit {
            UsageBit::Used => {
                LockdepStats::dec(&self.stats.unused_locks);
                Ok(())
            }
            _ => self.mark_lock_irq(&mut graph, task, hlock, bit),
        }
    }

    fn mark_lock_irq(
        &self,
        graph: &mut GraphState,
        _task: &TaskLockState,
        hlock: &HeldLock,
        bit: UsageBit,
    ) -> LockdepResult<()> {
        let Some(kind) = bit.irq_kind() else {
            return Ok(());
        };
        let strict = self.config.strict_read_checks;
        let used_in = UsageBit::used_in(kind, false);
        let used_in_read = UsageBit::used_in(kind, true);
        let enabled = UsageBit::enabled(kind, false);
        let enabled_read = UsageBit::enabled(kind, true);

        match (bit.is_used_in(), bit.is_read()) {
            // IRQ-safe: nothing taken after it may be IRQ-unsafe
            (true, false) => {
                self.valid_state(hlock, bit, enabled)?;
                self.valid_state(hlock, bit, enabled_read)?;
                self.check_usage_forwards(graph, hlock, bit, enabled)?;
                if strict {
                    self.check_usage_forwards(graph, hlock, bit, enabled_read)?;
                }
            }
            (true, true) => {
                self.valid_state(hlock, bit, enabled)?;
                self.check_usage_forwards(graph, hlock, bit, enabled)?;
            }
            // IRQ-unsafe: nothing held before it may be IRQ-safe
            (false, false) => {
                self.valid_state(hlock, bit, used_in)?;
                self.valid_state(hlock, bit, used_in_read)?;
                self.check_usage_backwards(graph, hlock, bit, used_in)?;
                if strict {
                    self.check_usage_backwards(graph, hlock, bit, used_in_read)?;
                }
            }
            (false, true) => {
                self.valid_state(hlock, bit, used_in)?;
                if strict {
                    self.check_usage_backwards(graph, hlock, bit, used_in)?;
                }
            }
        }
        Ok(())
    }

    /// The class itself must not carry `bad_bit`
    fn valid_state(&self, hlock: &HeldLock, new_bit: UsageBit, bad_bit: UsageBit) -> LockdepResult<()> {
        if self.classes.class(hlock.class).usage().has(bad_bit) {
            return Err(LockdepError::InconsistentLockState {
                lock: *hlock,
                new_bit,
                bad_bit,
            });
        }
        Ok(())
    }

    fn check_usage_forwards(
        &self,
        graph: &mut GraphState,
        hlock: &HeldLock,
        new_bit: UsageBit,
        bad_bit: UsageBit,
    ) -> LockdepResult<()> {
        match self.find_usage_forwards(graph, hlock.class, bad_bit)? {
            None => Ok(()),
            Some(found) => Err(LockdepError::IrqInversion {
                lock: *hlock,
                new_bit,
                bad_bit,
                other: found.class,
                path: found.path,
                forwards: true,
            }),
        }
    }

    fn check_usage_backwards(
        &self,
        graph: &mut GraphState,
        hlock: &HeldLock,
        new_bit: UsageBit,
        bad_bit: UsageBit,
    ) -> LockdepResult<()> {
        match self.find_usage_backwards(graph, hlock.class, bad_bit)? {
            None => Ok(()),
            Some(found) => Err(LockdepError::IrqInversion {
                lock: *hlock,
                new_bit,
                bad_bit,
                other: found.class,
                path: found.path,
                forwards: false,
            }),
        }
    }

    /// Usage bits implied by acquiring `hlock` in the task's current context
    pub(crate) fn mark_irqflags(&self, task: &TaskLockState, hlock: &HeldLock) -> LockdepResult<()> {
        let read = hlock.read != ReadMode::Write;

        if !hlock.trylock {
            if task.in_hardirq() {
                self.mark_lock(task, hlock, UsageBit::used_in(IrqKind::Hard, read))?;
            }
            if task.in_softirq() {
                self.mark_lock(task, hlock, UsageBit::used_in(IrqKind::Soft, read))?;
            }
        }

        if !hlock.hardirqs_off {
            self.mark_lock(task, hlock, UsageBit::enabled(IrqKind::Hard, read))?;
            if task.softirqs_enabled() {
                self.mark_lock(task, hlock, UsageBit::enabled(IrqKind::Soft, read))?;
            }
        }
        Ok(())
    }

    /// Mark every held lock "held with `kind` IRQs enabled"
    pub(crate) fn mark_held_locks(&self, task: &TaskLockState, held: &HeldLocks, kind: IrqKind) -> LockdepResult<()> {
        for hlock in held.as_slice() {
            let bit = UsageBit::enabled(kind, hlock.read != ReadMode::Write);
            self.mark_lock(task, hlock, bit)?;
        }
        Ok(())
    }

    /// Refuse `prev -> next` if it would let an IRQ-safe class behind
    /// `prev` reach an IRQ-unsafe class after `next`
    pub(crate) fn check_prev_add_irq(
        &self,
        graph: &mut GraphState,
        prev: &HeldLock,
        next: &HeldLock,
    ) -> LockdepResult<()> {
        for (safe_bit, unsafe_bit) in IRQ_DEPENDENCY_PAIRS {
            let Some(safe) = self.find_usage_backwards(graph, prev.class, safe_bit)? else {
                continue;
            };
            let Some(unsafe_) = self.find_usage_forwards(graph, next.class, unsafe_bit)? else {
                continue;
            };
            return Err(LockdepError::BadIrqDependency {
                prev: *prev,
                next: *next,
                safe_bit,
                unsafe_bit,
                safe_class: safe.class,
                safe_path: safe.path,
                unsafe_class: unsafe_.class,
                unsafe_path: unsafe_.path,
            });
        }
        Ok(())
    }

    /// Hard interrupts are being enabled on `task`
    pub fn enable_hardirqs(&self, task: &TaskLockState, ip: usize) {
        let Some(_entry) = self.enter(task) else {
            return;
        };
        if task.hardirqs_enabled() {
            LockdepStats::inc(&self.stats.redundant_hardirqs_on);
            return;
        }
        task.irq.hardirqs_enabled.store(true, Ordering::Relaxed);
        if task.in_hardirq() {
            return;
        }

        let held = task.held.write();
        let result = self.mark_held_locks(task, &held, IrqKind::Hard).and_then(|()| {
            if task.softirqs_enabled() {
                self.mark_held_locks(task, &held, IrqKind::Soft)
            } else {
                Ok(())
            }
        });
        if let Err(err) = result {
            self.fail(Some(task), Some(&*held), err);
            return;
        }
        drop(held);

        task.irq.record(IrqTransition::HardirqsOn, ip);
        LockdepStats::inc(&self.stats.hardirqs_on_events);
    }

    /// Hard interrupts are being disabled on `task`
    pub fn disable_hardirqs(&self, task: &TaskLockState, ip: usize) {
        let Some(_entry) = self.enter(task) else {
            return;
        };
        if task.hardirqs_enabled() {
            task.irq.hardirqs_enabled.store(false, Ordering::Relaxed);
            task.irq.record(IrqTransition::HardirqsOff, ip);
            LockdepStats::inc(&self.stats.hardirqs_off_events);
        } else {
            LockdepStats::inc(&self.stats.redundant_hardirqs_off);
        }
    }

    /// Soft interrupts are being enabled on `task`
    pub fn enable_softirqs(&self, task: &TaskLockState, ip: usize) {
        let Some(_entry) = self.enter(task) else {
            return;
        };
        if task.softirqs_enabled() {
            LockdepStats::inc(&self.stats.redundant_softirqs_on);
            return;
        }
        task.irq.softirqs_enabled.store(true, Ordering::Relaxed);
        task.irq.record(IrqTransition::SoftirqsOn, ip);
        LockdepStats::inc(&self.stats.softirqs_on_events);

        // With hard interrupts off the soft ones cannot run yet
        if task.hardirqs_enabled() {
            let held = task.held.write();
            if let Err(err) = self.mark_held_locks(task, &held, IrqKind::Soft) {
                self.fail(Some(task), Some(&*held), err);
            }
        }
    }

    /// Soft interrupts are being disabled on `task`
    pub fn disable_softirqs(&self, task: &TaskLockState, ip: usize) {
        let Some(_entry) = self.enter(task) else {
            return;
        };
        if task.softirqs_enabled() {
            task.irq.softirqs_enabled.store(false, Ordering::Relaxed);
            task.irq.record(IrqTransition::SoftirqsOff, ip);
            LockdepStats::inc(&self.stats.softirqs_off_events);
        } else {
            LockdepStats::inc(&self.stats.redundant_softirqs_off);
        }
    }

    /// `task` starts running a hard interrupt handler
    pub fn hardirq_enter(&self, task: &TaskLockState) {
        task.irq.hardirq_context.fetch_add(1, Ordering::Relaxed);
    }

    /// `task` leaves a hard interrupt handler
    pub fn hardirq_exit(&self, task: &TaskLockState) {
        let _ = task
            .irq
            .hardirq_context
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }

    /// `task` starts running soft interrupt work
    pub fn softirq_enter(&self, task: &TaskLockState) {
        task.irq.softirq_context.fetch_add(1, Ordering::Relaxed);
    }

    /// `task` finishes soft interrupt work
    pub fn softirq_exit(&self, task: &TaskLockState) {
        let _ = task
            .irq
            .softirq_context
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }
}

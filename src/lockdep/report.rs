//! Bug reports
//!
//! A [`Report`] is captured at the moment validation turns off and is
//! rendered in the classic lockdep layout: a boxed headline, the locks
//! involved, the dependency chain or usage history that proves the problem
//! (each step with the stack trace recorded when it was first observed),
//! then the task's held locks and IRQ event state.

use core::fmt::{self, Write};

use super::class::ClassId;
use super::error::LockdepError;
use super::search::DepPath;
use super::task::{HeldLock, HeldLocks, IrqEvents, TaskId, TaskLockState};
use super::trace::StackTrace;
use super::usage::{IrqKind, UsageBit};
use super::Lockdep;

/// Everything known about the failure that turned validation off
#[derive(Debug, Clone, Copy)]
pub struct Report {
    pub task_id: Option<TaskId>,
    pub task_name: Option<&'static str>,
    pub error: LockdepError,
    held: Option<HeldLocks>,
    irq: Option<IrqEvents>,
}

impl Report {
    pub(crate) fn new(task: Option<&TaskLockState>, held: Option<HeldLocks>, error: LockdepError) -> Self {
        Self {
            task_id: task.map(|t| t.id()),
            task_name: task.map(|t| t.name()),
            error,
            held,
            irq: task.map(|t| t.irq_events()),
        }
    }

    /// Locks the task held when the problem was found
    pub fn held_locks(&self) -> Option<&HeldLocks> {
        self.held.as_ref()
    }

    /// IRQ transition history of the task
    pub fn irq_events(&self) -> Option<IrqEvents> {
        self.irq
    }

    /// Write the full report
    pub fn render<W: Write>(&self, lockdep: &Lockdep, w: &mut W) -> fmt::Result {
        let out = ReportWriter { lockdep, w };
        out.render(self)
    }
}

struct ReportWriter<'a, W> {
    lockdep: &'a Lockdep,
    w: &'a mut W,
}

impl<W: Write> ReportWriter<'_, W> {
    fn render(mut self, report: &Report) -> fmt::Result {
        let task = TaskLabel(report.task_name, report.task_id);
        let err = &report.error;

        if !err.is_locking_bug() {
            writeln!(self.w, "BUG: {}", err.title())?;
            self.render_internal(err)?;
            return writeln!(self.w, "turning off the locking correctness validator.");
        }

        self.banner(err.title())?;
        match *err {
            LockdepError::CircularDependency { prev, next, path } => {
                writeln!(self.w, "{} is trying to acquire lock:", task)?;
                self.held_lock(&next)?;
                writeln!(self.w, "\nbut task is already holding lock:")?;
                self.held_lock(&prev)?;
                writeln!(self.w, "\nwhich lock already depends on the new lock.\n")?;
                writeln!(self.w, "the existing dependency chain (in reverse order) is:")?;
                self.chain(next.class, &path)?;
            }
            LockdepError::RecursiveLocking { prev, next } => {
                writeln!(self.w, "{} is trying to acquire lock:", task)?;
                self.held_lock(&next)?;
                writeln!(self.w, "\nbut task is already holding lock:")?;
                self.held_lock(&prev)?;
            }
            LockdepError::InconsistentLockState { lock, new_bit, bad_bit } => {
                writeln!(self.w, "inconsistent {{{}}} -> {{{}}} usage.", bad_bit, new_bit)?;
                writeln!(self.w, "{} {} takes:", task, context_flags(report))?;
                self.held_lock(&lock)?;
                writeln!(self.w, "{{{}}} state was registered at:", bad_bit)?;
                self.usage_trace(lock.class, bad_bit)?;
            }
            LockdepError::IrqInversion {
                lock,
                new_bit,
                bad_bit,
                other,
                path,
                forwards,
            } => {
                writeln!(self.w, "{} just changed the state of lock:", task)?;
                self.held_lock(&lock)?;
                if forwards {
                    writeln!(self.w, "but this lock took another, {}-unsafe lock in the past:", irq_name(bad_bit))?;
                } else {
                    writeln!(self.w, "but this lock was taken by another, {}-safe lock in the past:", irq_name(bad_bit))?;
                }
                self.class_line(other)?;
                writeln!(self.w, "\nand interrupts could create inverse lock ordering between them.\n")?;
                writeln!(self.w, "the shortest dependencies between the locks are:")?;
                self.chain(lock.class, &path)?;
                writeln!(self.w, "\nthe {} state of the other lock was registered at:", bad_bit)?;
                self.usage_trace(other, bad_bit)?;
                writeln!(self.w, "\nthe {} state of this lock is new.", new_bit)?;
            }
            LockdepError::BadIrqDependency {
                prev,
                next,
                safe_bit,
                unsafe_bit,
                safe_class,
                safe_path,
                unsafe_class,
                unsafe_path,
            } => {
                writeln!(self.w, "{} is trying to acquire:", task)?;
                self.held_lock(&next)?;
                writeln!(self.w, "\nand this task is already holding:")?;
                self.held_lock(&prev)?;
                writeln!(self.w, "which would create a new lock dependency:")?;
                self.class_name(prev.class)?;
                write!(self.w, " ->")?;
                self.class_name(next.class)?;
                writeln!(self.w)?;

                writeln!(self.w, "\nbut this new dependency connects a {}-safe lock:", irq_name(safe_bit))?;
                self.class_line(safe_class)?;
                writeln!(self.w, "... which became {}-safe at:", irq_name(safe_bit))?;
                self.usage_trace(safe_class, safe_bit)?;
                writeln!(self.w, "backward path to it:")?;
                self.chain(prev.class, &safe_path)?;

                writeln!(self.w, "\nto a {}-unsafe lock:", irq_name(unsafe_bit))?;
                self.class_line(unsafe_class)?;
                writeln!(self.w, "... which became {}-unsafe at:", irq_name(unsafe_bit))?;
                self.usage_trace(unsafe_class, unsafe_bit)?;
                writeln!(self.w, "forward path to it:")?;
                self.chain(next.class, &unsafe_path)?;
            }
            LockdepError::UnbalancedUnlock { instance, name, ip } => {
                writeln!(self.w, "{} is trying to release lock ({}) [{:#x}] at:", task, name, instance)?;
                writeln!(self.w, " [<{:#018x}>]", ip)?;
                writeln!(self.w, "but there are no more locks to release!")?;
            }
            LockdepError::BadContention { instance, name, ip } => {
                writeln!(self.w, "{} is trying to contend lock ({}) [{:#x}] at:", task, name, instance)?;
                writeln!(self.w, " [<{:#018x}>]", ip)?;
                writeln!(self.w, "but there are no locks held!")?;
            }
            LockdepError::HeldLockFreed { lock, start, len } => {
                writeln!(
                    self.w,
                    "{} is freeing memory {:#x}-{:#x}, with a lock still held there!",
                    task,
                    start,
                    start.saturating_add(len).saturating_sub(1)
                )?;
                self.held_lock(&lock)?;
            }
            LockdepError::HeldAtExit { depth } => {
                writeln!(self.w, "{} is exiting with {} locks still held!", task, depth)?;
            }
            _ => self.render_internal(err)?,
        }

        if let Some(held) = report.held.as_ref() {
            writeln!(self.w, "\nother info that might help us debug this:")?;
            write_held_locks(self.lockdep, self.w, report.task_name, report.task_id, held)?;
        }
        if let Some(events) = report.irq {
            if matches!(
                err,
                LockdepError::InconsistentLockState { .. }
                    | LockdepError::IrqInversion { .. }
                    | LockdepError::BadIrqDependency { .. }
            ) {
                writeln!(self.w)?;
                write_irq_events(self.w, &events)?;
            }
        }
        writeln!(self.w, "\nturning off the locking correctness validator.")
    }

    fn render_internal(&mut self, err: &LockdepError) -> fmt::Result {
        match *err {
            LockdepError::NonStaticKey { key, name } => {
                writeln!(self.w, "INFO: trying to register non-static key {:#x} ({}).", key, name)?;
                writeln!(self.w, "the code is fine but needs lockdep annotation.")
            }
            LockdepError::InvalidSubclass { subclass, name } => {
                writeln!(self.w, "lock ({}) looked up with subclass {}", name, subclass)
            }
            LockdepError::ChainKeyMismatch { expected, found } => {
                writeln!(self.w, "chain key {:#018x}, expected {:#018x}", found, expected)
            }
            LockdepError::DepthMismatch { expected, found } => {
                writeln!(self.w, "held lock depth {}, expected {}", found, expected)
            }
            LockdepError::SearchTooDeep { class } => {
                write!(self.w, "search aborted at")?;
                self.class_name(class)?;
                writeln!(self.w)
            }
            LockdepError::LockDepthExceeded { depth } => {
                writeln!(self.w, "depth: {}  max: {}", depth, self.lockdep.config.max_lock_depth)
            }
            _ => Ok(()),
        }
    }

    fn banner(&mut self, title: &str) -> fmt::Result {
        let width = title.len() + 10;
        writeln!(self.w)?;
        rule(self.w, '=', width)?;
        writeln!(self.w, "[ INFO: {} ]", title)?;
        rule(self.w, '-', width)
    }

    fn class_name(&mut self, class: ClassId) -> fmt::Result {
        write_class(self.lockdep, self.w, class)
    }

    fn class_line(&mut self, class: ClassId) -> fmt::Result {
        self.class_name(class)?;
        writeln!(self.w)
    }

    fn held_lock(&mut self, hlock: &HeldLock) -> fmt::Result {
        write_held_lock(self.lockdep, self.w, hlock)
    }

    fn usage_trace(&mut self, class: ClassId, bit: UsageBit) -> fmt::Result {
        let trace = match self.lockdep.classes.get(class) {
            Some(c) => c.usage_trace(bit),
            None => StackTrace::EMPTY,
        };
        write_trace(self.lockdep, self.w, trace, 2)
    }

    /// A search path from `start`, newest dependency first
    fn chain(&mut self, start: ClassId, path: &DepPath) -> fmt::Result {
        let entries = path.entries();
        for (n, &idx) in entries.iter().enumerate().rev() {
            let dep = self.lockdep.graph.entry(idx);
            write!(self.w, "\n-> #{} ", n + 1)?;
            self.class_name(dep.class)?;
            writeln!(self.w, ":")?;
            write_trace(self.lockdep, self.w, dep.trace, 7)?;
        }
        write!(self.w, "\n-> #0 ")?;
        self.class_name(start)?;
        writeln!(self.w)
    }
}

fn rule<W: Write>(w: &mut W, c: char, width: usize) -> fmt::Result {
    for _ in 0..width {
        w.write_char(c)?;
    }
    writeln!(w)
}

fn irq_name(bit: UsageBit) -> &'static str {
    match bit.irq_kind() {
        Some(IrqKind::Hard) => "hardirq",
        Some(IrqKind::Soft) => "softirq",
        None => "irq",
    }
}

struct TaskLabel(Option<&'static str>, Option<TaskId>);

impl fmt::Display for TaskLabel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match (self.0, self.1) {
            (Some(name), Some(id)) => write!(f, "{}/{}", name, id),
            _ => f.write_str("<unknown task>"),
        }
    }
}

/// `[HC1:SC0]` context summary of the newest held lock
struct ContextFlags(u8);

fn context_flags(report: &Report) -> ContextFlags {
    let ctx = report
        .held
        .as_ref()
        .and_then(|h| h.as_slice().last())
        .map_or(0, |h| h.irq_context);
    ContextFlags(ctx)
}

impl fmt::Display for ContextFlags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let hard = self.0 >> 1;
        let soft = self.0 & 1;
        write!(f, "[HC{}:SC{}]", hard, soft)
    }
}

/// ` (name#version/subclass){usage}`
pub(crate) fn write_class<W: Write>(lockdep: &Lockdep, w: &mut W, class: ClassId) -> fmt::Result {
    let Some(info) = lockdep.classes.get(class).and_then(|c| c.info()) else {
        return write!(w, " (<unknown class {}>)", class.index());
    };
    write!(w, " ({}", info.name)?;
    if info.name_version > 1 {
        write!(w, "#{}", info.name_version)?;
    }
    if info.subclass != 0 {
        write!(w, "/{}", info.subclass)?;
    }
    let usage = lockdep.class_usage(class).usage_chars();
    write!(w, "){{{}{}{}{}}}", usage[0], usage[1], usage[2], usage[3])
}

/// One held lock with its acquisition site
pub(crate) fn write_held_lock<W: Write>(lockdep: &Lockdep, w: &mut W, hlock: &HeldLock) -> fmt::Result {
    write_class(lockdep, w, hlock.class)?;
    writeln!(w, ", at: [<{:#018x}>] {}", hlock.acquire_ip, hlock.name)
}

/// Held-lock listing of one task
pub(crate) fn write_held_locks<W: Write>(
    lockdep: &Lockdep,
    w: &mut W,
    name: Option<&'static str>,
    id: Option<TaskId>,
    held: &HeldLocks,
) -> fmt::Result {
    let task = TaskLabel(name, id);
    if held.depth() == 0 {
        return writeln!(w, "no locks held by {}.", task);
    }
    writeln!(w, "{} lock{} held by {}:", held.depth(), if held.depth() > 1 { "s" } else { "" }, task)?;
    for (i, hlock) in held.as_slice().iter().enumerate() {
        write!(w, " #{}: ", i)?;
        write_held_lock(lockdep, w, hlock)?;
    }
    Ok(())
}

/// Frames of a recorded trace, one per line
pub(crate) fn write_trace<W: Write>(lockdep: &Lockdep, w: &mut W, trace: StackTrace, indent: usize) -> fmt::Result {
    if trace.is_empty() {
        for _ in 0..indent {
            w.write_char(' ')?;
        }
        return writeln!(w, "<no stack trace>");
    }
    for frame in lockdep.traces.frames(trace) {
        for _ in 0..indent {
            w.write_char(' ')?;
        }
        writeln!(w, "[<{:#018x}>]", frame)?;
    }
    Ok(())
}

pub(crate) fn write_irq_events<W: Write>(w: &mut W, events: &IrqEvents) -> fmt::Result {
    writeln!(w, "irq event stamp: {}", events.irq_events)?;
    writeln!(
        w,
        "hardirqs last  enabled at ({}): [<{:#018x}>]",
        events.hardirq_enable_event, events.hardirq_enable_ip
    )?;
    writeln!(
        w,
        "hardirqs last disabled at ({}): [<{:#018x}>]",
        events.hardirq_disable_event, events.hardirq_disable_ip
    )?;
    writeln!(
        w,
        "softirqs last  enabled at ({}): [<{:#018x}>]",
        events.softirq_enable_event, events.softirq_enable_ip
    )?;
    writeln!(
        w,
        "softirqs last disabled at ({}): [<{:#018x}>]",
        events.softirq_disable_event, events.softirq_disable_ip
    )
}

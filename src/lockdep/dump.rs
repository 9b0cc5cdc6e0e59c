//! Diagnostic dumps
//!
//! Everything here only reads shared state and may race with tasks taking
//! and releasing locks. Walks over the shared tables are lock-free; per-task
//! stacks and the task registry are read with bounded retries so a dump
//! skips a busy structure instead of hanging behind it.

use alloc::vec;
use core::fmt::{self, Write};

use super::class::ClassId;
use super::graph::Direction;
use super::list::NIL;
use super::report::{write_class, write_held_locks, write_trace};
use super::task::TaskLockState;
use super::usage::{LockUsage, UsageBit};
use super::Lockdep;
use crate::config::{DUMP_RETRIES, MAX_SEARCH_DEPTH};

impl Lockdep {
    /// Print the locks held by `task`
    pub fn dump_held_locks<W: Write>(&self, task: &TaskLockState, w: &mut W) -> fmt::Result {
        match task.held.read_bounded(DUMP_RETRIES, |h| *h) {
            Some(held) => write_held_locks(self, w, Some(task.name()), Some(task.id()), &held),
            None => writeln!(w, "INFO: {}/{} is busy, not printing its locks.", task.name(), task.id()),
        }
    }

    /// Print the forward dependency tree of `class`
    ///
    /// Every class is expanded once; the walk stops at the search depth
    /// cap.
    pub fn dump_class_dependencies<W: Write>(&self, class: ClassId, w: &mut W) -> fmt::Result {
        if self.classes.get(class).is_none() {
            return writeln!(w, "no such lock class {}", class.index());
        }

        let mut expanded = vec![false; self.classes.len()];
        self.class_header(w, class, 0)?;
        expanded[class.index()] = true;

        let mut cursor = [NIL; MAX_SEARCH_DEPTH + 1];
        let mut depth = 0;
        cursor[0] = self.graph.first(&self.classes, class, Direction::Forwards);
        loop {
            let idx = cursor[depth];
            if idx == NIL {
                if depth == 0 {
                    return Ok(());
                }
                depth -= 1;
                continue;
            }
            cursor[depth] = self.graph.next(idx);

            let dep = self.graph.entry(idx);
            let indent = (depth + 1) * 2;
            self.class_header(w, dep.class, indent)?;
            writeln!(w, "{:indent$} ... acquired at:", "", indent = indent)?;
            write_trace(self, w, dep.trace, indent + 2)?;

            // Entries may name classes registered after `expanded` was sized
            let seen = expanded.get(dep.class.index()).copied().unwrap_or(true);
            if seen {
                continue;
            }
            expanded[dep.class.index()] = true;
            if depth + 1 >= MAX_SEARCH_DEPTH {
                writeln!(w, "{:indent$} ... dependency chain too deep", "", indent = indent)?;
                continue;
            }
            depth += 1;
            cursor[depth] = self.graph.first(&self.classes, dep.class, Direction::Forwards);
        }
    }

    fn class_header<W: Write>(&self, w: &mut W, class: ClassId, indent: usize) -> fmt::Result {
        write!(w, "{:indent$}->", "", indent = indent)?;
        write_class(self, w, class)?;
        writeln!(w, " ops: {}", self.class_ops(class))?;

        let Some(slot) = self.classes.get(class) else {
            return Ok(());
        };
        for bit in UsageBit::ALL {
            if bit == UsageBit::Used || !slot.usage().has(bit) {
                continue;
            }
            writeln!(w, "{:indent$}   {} at:", "", bit, indent = indent)?;
            write_trace(self, w, slot.usage_trace(bit), indent + 5)?;
        }
        Ok(())
    }

    /// Print the held locks of every registered task
    ///
    /// Racy by nature: tasks keep running while they are printed.
    pub fn dump_all_held_locks<W: Write>(&self, w: &mut W) -> fmt::Result {
        writeln!(w, "\nShowing all locks held in the system:")?;

        let mut tasks = None;
        for _ in 0..DUMP_RETRIES {
            tasks = self.tasks.try_read();
            if tasks.is_some() {
                break;
            }
            writeln!(w, "hm, task list busy, retrying...")?;
            core::hint::spin_loop();
        }
        let Some(tasks) = tasks else {
            return writeln!(w, "task list busy, ignoring it.");
        };

        for task in tasks.iter().filter_map(|t| t.upgrade()) {
            match task.held.read_bounded(DUMP_RETRIES, |h| *h) {
                Some(held) if held.depth() > 0 => {
                    write_held_locks(self, w, Some(task.name()), Some(task.id()), &held)?;
                }
                Some(_) => {}
                None => writeln!(w, "{}/{} is busy, skipping it.", task.name(), task.id())?,
            }
        }
        writeln!(w, "\n=============================================")
    }

    /// One line per live class: ops, dependency counts, usage, name
    pub fn dump_classes<W: Write>(&self, w: &mut W) -> fmt::Result {
        for class in self.classes.live() {
            write!(
                w,
                "{:5} OPS:{:8} FD:{:5} BD:{:5}",
                class.index(),
                self.class_ops(class),
                self.dependency_count(class, Direction::Forwards),
                self.dependency_count(class, Direction::Backwards),
            )?;
            write_class(self, w, class)?;
            writeln!(w)?;
        }
        Ok(())
    }

    /// Every cached chain with its IRQ context and classes
    pub fn dump_chains<W: Write>(&self, w: &mut W) -> fmt::Result {
        for idx in 0..self.chains.len() as u32 {
            let info = self.chains.info(idx);
            writeln!(w, "irq_context: {}", info.irq_context)?;
            for class in self.chains.classes(&info) {
                write!(w, " [{}]", class.index())?;
                write_class(self, w, class)?;
                writeln!(w)?;
            }
            writeln!(w)?;
        }
        Ok(())
    }

    /// Validator counters with their capacities
    pub fn dump_stats<W: Write>(&self, w: &mut W) -> fmt::Result {
        let stats = self.stats();
        let config = &self.config;
        let census = UsageCensus::collect(self);

        line(w, "lock-classes", stats.lock_classes, Some(config.max_lock_classes))?;
        line(w, "direct dependencies", stats.list_entries, Some(config.max_list_entries))?;
        line(w, "indirect dependencies", self.indirect_dependencies(), None)?;
        line(w, "all direct dependencies", stats.dependencies(), None)?;
        line(w, "dependency chains", stats.lock_chains(), Some(config.max_lock_chains))?;
        line(w, "dependency chain hlocks", stats.chain_hlocks, Some(config.max_chain_hlocks))?;
        line(w, "in-hardirq chains", stats.hardirq_chains, None)?;
        line(w, "in-softirq chains", stats.softirq_chains, None)?;
        line(w, "in-process chains", stats.process_chains, None)?;
        line(
            w,
            "stack-trace entries",
            stats.stack_trace_entries,
            Some(config.max_stack_trace_entries),
        )?;
        line(w, "hardirq-safe locks", census.hardirq_safe, None)?;
        line(w, "hardirq-unsafe locks", census.hardirq_unsafe, None)?;
        line(w, "softirq-safe locks", census.softirq_safe, None)?;
        line(w, "softirq-unsafe locks", census.softirq_unsafe, None)?;
        line(w, "irq-safe locks", census.irq_safe, None)?;
        line(w, "irq-unsafe locks", census.irq_unsafe, None)?;
        line(w, "hardirq-read-safe locks", census.hardirq_read_safe, None)?;
        line(w, "hardirq-read-unsafe locks", census.hardirq_read_unsafe, None)?;
        line(w, "softirq-read-safe locks", census.softirq_read_safe, None)?;
        line(w, "softirq-read-unsafe locks", census.softirq_read_unsafe, None)?;
        line(w, "uncategorized locks", census.uncategorized, None)?;
        line(w, "unused locks", stats.unused_locks, None)?;
        line(w, "max locking depth", stats.max_lockdep_depth, None)?;
        line(w, "max recursion depth", stats.max_recursion_depth, None)?;
        line(w, "chain lookup misses", stats.chain_lookup_misses, None)?;
        line(w, "chain lookup hits", stats.chain_lookup_hits, None)?;
        line(w, "cyclic checks", stats.cyclic_checks, None)?;
        line(w, "find-mask forwards checks", stats.find_usage_forwards_checks, None)?;
        line(w, "find-mask backwards checks", stats.find_usage_backwards_checks, None)?;
        line(w, "hardirq on events", stats.hardirqs_on_events, None)?;
        line(w, "hardirq off events", stats.hardirqs_off_events, None)?;
        line(w, "redundant hardirq ons", stats.redundant_hardirqs_on, None)?;
        line(w, "redundant hardirq offs", stats.redundant_hardirqs_off, None)?;
        line(w, "softirq on events", stats.softirqs_on_events, None)?;
        line(w, "softirq off events", stats.softirqs_off_events, None)?;
        line(w, "redundant softirq ons", stats.redundant_softirqs_on, None)?;
        line(w, "redundant softirq offs", stats.redundant_softirqs_off, None)?;
        writeln!(
            w,
            " debug_locks:                   {:11}",
            u8::from(self.is_enabled())
        )
    }

    /// Dependencies reachable through more than one step
    fn indirect_dependencies(&self) -> u64 {
        self.classes
            .live()
            .flat_map(|c| self.dependencies(c, Direction::Forwards))
            .filter(|d| d.distance > 1)
            .count() as u64
    }
}

fn line<W: Write>(w: &mut W, label: &str, value: u64, max: Option<usize>) -> fmt::Result {
    let label_width = 30usize.saturating_sub(label.len());
    write!(w, " {}:{:pad$} {:11}", label, "", value, pad = label_width)?;
    match max {
        Some(max) => writeln!(w, " [max: {}]", max),
        None => writeln!(w),
    }
}

/// Class counts per IRQ safety category
#[derive(Default)]
struct UsageCensus {
    hardirq_safe: u64,
    hardirq_unsafe: u64,
    softirq_safe: u64,
    softirq_unsafe: u64,
    irq_safe: u64,
    irq_unsafe: u64,
    hardirq_read_safe: u64,
    hardirq_read_unsafe: u64,
    softirq_read_safe: u64,
    softirq_read_unsafe: u64,
    uncategorized: u64,
}

impl UsageCensus {
    fn collect(lockdep: &Lockdep) -> Self {
        let mut census = Self::default();
        for class in lockdep.classes.live() {
            let usage = lockdep.class_usage(class);
            let count = |flag: LockUsage| u64::from(usage.contains(flag));

            census.hardirq_safe += count(LockUsage::USED_IN_HARDIRQ);
            census.hardirq_unsafe += count(LockUsage::ENABLED_HARDIRQ);
            census.softirq_safe += count(LockUsage::USED_IN_SOFTIRQ);
            census.softirq_unsafe += count(LockUsage::ENABLED_SOFTIRQ);
            census.irq_safe += u64::from(usage.intersects(LockUsage::USED_IN_HARDIRQ | LockUsage::USED_IN_SOFTIRQ));
            census.irq_unsafe += u64::from(usage.intersects(LockUsage::ENABLED_HARDIRQ | LockUsage::ENABLED_SOFTIRQ));
            census.hardirq_read_safe += count(LockUsage::USED_IN_HARDIRQ_READ);
            census.hardirq_read_unsafe += count(LockUsage::ENABLED_HARDIRQ_READ);
            census.softirq_read_safe += count(LockUsage::USED_IN_SOFTIRQ_READ);
            census.softirq_read_unsafe += count(LockUsage::ENABLED_SOFTIRQ_READ);
            if usage == LockUsage::USED {
                census.uncategorized += 1;
            }
        }
        census
    }
}

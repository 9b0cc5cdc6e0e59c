//! Dependency graph
//!
//! Every dependency `A -> B` occupies two adjacent slots of the list-entry
//! pool: the even slot sits on A's `locks_after` list and names B, the odd
//! slot sits on B's `locks_before` list and names A. The owner of a slot is
//! therefore the class named by its partner (`idx ^ 1`).

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use super::class::{ClassId, ClassTable};
use super::error::{LockdepError, LockdepResult};
use super::list::{ListHead, NIL};
use super::trace::{StackTrace, TraceSlot};
use super::{GraphState, Lockdep};
use crate::metrics::LockdepStats;

/// Which adjacency list of a class to walk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Classes acquired while this one was held (`locks_after`)
    Forwards,
    /// Classes held when this one was acquired (`locks_before`)
    Backwards,
}

/// Result of recording a dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeOutcome {
    /// A new dependency was linked
    Added,
    /// The dependency existed; its distance may have been tightened
    AlreadyPresent,
}

/// Published state of one list entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepEntry {
    /// Class at the other end of the dependency
    pub class: ClassId,
    /// Closest held-stack distance the ordering was observed at
    pub distance: u32,
    /// Where the dependency was first observed
    pub trace: StackTrace,
}

struct LockListEntry {
    class: AtomicU32,
    distance: AtomicU32,
    trace: TraceSlot,
    next: AtomicU32,
}

impl LockListEntry {
    fn new() -> Self {
        Self {
            class: AtomicU32::new(0),
            distance: AtomicU32::new(0),
            trace: TraceSlot::new(),
            next: AtomicU32::new(NIL),
        }
    }
}

/// Flat pool of list entries
pub(crate) struct DepGraph {
    entries: Box<[LockListEntry]>,
    len: AtomicUsize,
}

fn head(classes: &ClassTable, class: ClassId, dir: Direction) -> &ListHead {
    let class = classes.class(class);
    match dir {
        Direction::Forwards => &class.locks_after,
        Direction::Backwards => &class.locks_before,
    }
}

impl DepGraph {
    pub(crate) fn new(capacity: usize) -> Self {
        let entries: Vec<LockListEntry> = (0..capacity).map(|_| LockListEntry::new()).collect();
        Self {
            entries: entries.into_boxed_slice(),
            len: AtomicUsize::new(0),
        }
    }

    fn link(&self, idx: u32) -> &AtomicU32 {
        &self.entries[idx as usize].next
    }

    /// Entries allocated so far
    pub(crate) fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// Read a published entry
    pub(crate) fn entry(&self, idx: u32) -> DepEntry {
        let e = &self.entries[idx as usize];
        DepEntry {
            class: ClassId(e.class.load(Ordering::Relaxed)),
            distance: e.distance.load(Ordering::Relaxed),
            trace: e.trace.get(),
        }
    }

    /// Class at the other end of an entry
    pub(crate) fn target(&self, idx: u32) -> ClassId {
        ClassId(self.entries[idx as usize].class.load(Ordering::Relaxed))
    }

    /// Lock-free walk over one adjacency list, yielding entry indices
    pub(crate) fn list<'a>(
        &'a self,
        classes: &'a ClassTable,
        class: ClassId,
        dir: Direction,
    ) -> impl Iterator<Item = u32> + 'a {
        head(classes, class, dir).iter(move |i| self.link(i))
    }

    /// First entry of a list, or `NIL`
    pub(crate) fn first(&self, classes: &ClassTable, class: ClassId, dir: Direction) -> u32 {
        head(classes, class, dir).first().unwrap_or(NIL)
    }

    /// Entry after `idx` on its list, or `NIL`
    pub(crate) fn next(&self, idx: u32) -> u32 {
        self.link(idx).load(Ordering::Acquire)
    }

    /// Forward entry `from -> to`, if recorded
    pub(crate) fn find(&self, classes: &ClassTable, from: ClassId, to: ClassId) -> Option<u32> {
        self.list(classes, from, Direction::Forwards)
            .find(|&idx| self.target(idx) == to)
    }

    /// Link a new dependency (graph lock held)
    pub(crate) fn insert(
        &self,
        _graph: &mut GraphState,
        classes: &ClassTable,
        from: ClassId,
        to: ClassId,
        distance: u32,
        trace: StackTrace,
        stats: &LockdepStats,
    ) -> LockdepResult<()> {
        let fwd = self.len.load(Ordering::Relaxed);
        if fwd + 2 > self.entries.len() {
            return Err(LockdepError::EdgeTableFull);
        }
        let bwd = fwd + 1;

        for (idx, class) in [(fwd, to), (bwd, from)] {
            let e = &self.entries[idx];
            e.class.store(class.0, Ordering::Relaxed);
            e.distance.store(distance, Ordering::Relaxed);
            e.trace.set(trace);
        }
        self.len.store(fwd + 2, Ordering::Release);

        head(classes, from, Direction::Forwards).push_tail(fwd as u32, |i| self.link(i));
        head(classes, to, Direction::Backwards).push_tail(bwd as u32, |i| self.link(i));
        LockdepStats::add(&stats.list_entries, 2);
        Ok(())
    }

    /// Unlink every entry naming `class` and empty its own lists
    /// (graph lock held)
    pub(crate) fn zap_entries_for(&self, _graph: &mut GraphState, classes: &ClassTable, class: ClassId) {
        let len = self.len.load(Ordering::Relaxed);
        for idx in 0..len as u32 {
            if self.target(idx) != class {
                continue;
            }
            let owner = self.target(idx ^ 1);
            let dir = if idx & 1 == 0 {
                Direction::Forwards
            } else {
                Direction::Backwards
            };
            head(classes, owner, dir).unlink(idx, |i| self.link(i));
        }

        let zapped = classes.class(class);
        zapped.locks_after.clear();
        zapped.locks_before.clear();
    }
}

impl Lockdep {
    /// Record that `from` was held while `to` was acquired
    ///
    /// An existing dependency only has its distance tightened to 1 when the
    /// new observation is adjacent; it is never loosened.
    pub(crate) fn add_dependency(
        &self,
        graph: &mut GraphState,
        from: ClassId,
        to: ClassId,
        distance: u32,
    ) -> LockdepResult<EdgeOutcome> {
        if let Some(idx) = self.graph.find(&self.classes, from, to) {
            if distance == 1 {
                self.graph.entries[idx as usize].distance.store(1, Ordering::Relaxed);
            }
            return Ok(EdgeOutcome::AlreadyPresent);
        }

        let trace = self.traces.save(graph, self.platform, &self.stats)?;
        self.graph
            .insert(graph, &self.classes, from, to, distance, trace, &self.stats)?;
        Ok(EdgeOutcome::Added)
    }

    /// Dependencies of a class in one direction (lock-free snapshot)
    pub fn dependencies(&self, class: ClassId, dir: Direction) -> impl Iterator<Item = DepEntry> + '_ {
        let valid = self.classes.get(class).is_some();
        valid
            .then(|| self.graph.list(&self.classes, class, dir))
            .into_iter()
            .flatten()
            .map(move |idx| self.graph.entry(idx))
    }

    /// Recorded distance of `from -> to`
    pub fn dependency_distance(&self, from: ClassId, to: ClassId) -> Option<u32> {
        self.classes.get(from)?;
        self.graph
            .find(&self.classes, from, to)
            .map(|idx| self.graph.entry(idx).distance)
    }

    /// Number of dependencies of a class in one direction
    pub fn dependency_count(&self, class: ClassId, dir: Direction) -> usize {
        self.dependencies(class, dir).count()
    }

    /// List entries allocated (two per dependency)
    pub fn nr_list_entries(&self) -> usize {
        self.graph.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        classes: ClassTable,
        graph: DepGraph,
        stats: LockdepStats,
        state: GraphState,
    }

    fn fixture(nclasses: usize, entries: usize) -> (Fixture, Vec<ClassId>) {
        let mut f = Fixture {
            classes: ClassTable::new(nclasses),
            graph: DepGraph::new(entries),
            stats: LockdepStats::new(),
            state: GraphState::new(),
        };
        let ids = (0..nclasses)
            .map(|i| {
                f.classes
                    .register(&mut f.state, 0x1000 * (i + 1), "c", 0, &f.stats)
                    .unwrap()
            })
            .collect();
        (f, ids)
    }

    #[test]
    fn test_insert_links_both_directions() {
        let (mut f, c) = fixture(3, 8);
        f.graph
            .insert(&mut f.state, &f.classes, c[0], c[1], 1, StackTrace::EMPTY, &f.stats)
            .unwrap();
        f.graph
            .insert(&mut f.state, &f.classes, c[0], c[2], 2, StackTrace::EMPTY, &f.stats)
            .unwrap();

        let after: Vec<ClassId> = f
            .graph
            .list(&f.classes, c[0], Direction::Forwards)
            .map(|i| f.graph.target(i))
            .collect();
        assert_eq!(after, [c[1], c[2]]);

        let before: Vec<DepEntry> = f
            .graph
            .list(&f.classes, c[2], Direction::Backwards)
            .map(|i| f.graph.entry(i))
            .collect();
        assert_eq!(before.len(), 1);
        assert_eq!(before[0].class, c[0]);
        assert_eq!(before[0].distance, 2);
        assert_eq!(f.graph.find(&f.classes, c[0], c[2]), Some(2));
        assert_eq!(f.graph.find(&f.classes, c[2], c[0]), None);
    }

    #[test]
    fn test_pool_exhaustion() {
        let (mut f, c) = fixture(3, 3);
        f.graph
            .insert(&mut f.state, &f.classes, c[0], c[1], 1, StackTrace::EMPTY, &f.stats)
            .unwrap();
        assert_eq!(
            f.graph
                .insert(&mut f.state, &f.classes, c[1], c[2], 1, StackTrace::EMPTY, &f.stats),
            Err(LockdepError::EdgeTableFull)
        );
        assert_eq!(f.graph.len(), 2);
    }

    #[test]
    fn test_zap_unlinks_entries_naming_class() {
        let (mut f, c) = fixture(3, 16);
        for (a, b) in [(0, 1), (1, 2), (0, 2)] {
            f.graph
                .insert(&mut f.state, &f.classes, c[a], c[b], 1, StackTrace::EMPTY, &f.stats)
                .unwrap();
        }
        f.graph.zap_entries_for(&mut f.state, &f.classes, c[1]);

        let after0: Vec<ClassId> = f
            .graph
            .list(&f.classes, c[0], Direction::Forwards)
            .map(|i| f.graph.target(i))
            .collect();
        assert_eq!(after0, [c[2]]);
        let before2: Vec<ClassId> = f
            .graph
            .list(&f.classes, c[2], Direction::Backwards)
            .map(|i| f.graph.target(i))
            .collect();
        assert_eq!(before2, [c[0]]);
        assert_eq!(f.graph.list(&f.classes, c[1], Direction::Forwards).count(), 0);
    }
}

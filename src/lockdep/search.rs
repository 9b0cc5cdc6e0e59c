//! Cycle and reachability checks
//!
//! All three questions the validator asks of the graph are one bounded
//! depth-first walk: from a source class, follow one direction of
//! dependencies until a class satisfies a predicate. The walk keeps an
//! explicit cursor per level, so the validator's own stack never grows with
//! the graph; going deeper than `MAX_SEARCH_DEPTH` dependencies is an
//! error, not a miss.
//!
//! Walks run under the graph lock. Every class visited is stamped with the
//! walk's generation number and is never expanded twice in one walk.

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

use super::class::ClassId;
use super::error::{LockdepError, LockdepResult};
use super::graph::Direction;
use super::list::NIL;
use super::usage::UsageBit;
use super::{GraphState, Lockdep};
use crate::config::MAX_SEARCH_DEPTH;
use crate::metrics::LockdepStats;

/// Dependencies walked from a search source to its match
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct DepPath {
    entries: [u32; MAX_SEARCH_DEPTH],
    len: u8,
}

impl DepPath {
    /// Path of a match at the source itself
    pub const EMPTY: DepPath = DepPath {
        entries: [NIL; MAX_SEARCH_DEPTH],
        len: 0,
    };

    /// Number of dependencies on the path
    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// List-entry indices along the path
    pub(crate) fn entries(&self) -> &[u32] {
        &self.entries[..self.len()]
    }

    fn push(&mut self, idx: u32) -> bool {
        if self.len() == MAX_SEARCH_DEPTH {
            return false;
        }
        self.entries[self.len()] = idx;
        self.len += 1;
        true
    }

    fn pop(&mut self) {
        self.len = self.len.saturating_sub(1);
    }
}

impl fmt::Debug for DepPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_list().entries(self.entries()).finish()
    }
}

/// A class found by a search and how it was reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchMatch {
    pub class: ClassId,
    pub path: DepPath,
}

impl Lockdep {
    fn search<F>(
        &self,
        graph: &mut GraphState,
        source: ClassId,
        dir: Direction,
        counter: &AtomicU64,
        per_node: bool,
        is_match: F,
    ) -> LockdepResult<Option<SearchMatch>>
    where
        F: Fn(ClassId) -> bool,
    {
        let gen = graph.next_search_gen();
        let classes = &self.classes;
        let deps = &self.graph;

        LockdepStats::inc(counter);
        classes.class(source).dep_gen_id.store(gen, Ordering::Relaxed);
        if is_match(source) {
            return Ok(Some(SearchMatch {
                class: source,
                path: DepPath::EMPTY,
            }));
        }

        // cursor[d] is the next entry to try at depth d
        let mut cursor = [NIL; MAX_SEARCH_DEPTH + 1];
        let mut path = DepPath::EMPTY;
        let mut depth = 0;
        cursor[0] = deps.first(classes, source, dir);

        loop {
            let idx = cursor[depth];
            if idx == NIL {
                if depth == 0 {
                    return Ok(None);
                }
                depth -= 1;
                path.pop();
                continue;
            }
            cursor[depth] = deps.next(idx);

            let target = deps.target(idx);
            let class = classes.class(target);
            if class.dep_gen_id.load(Ordering::Relaxed) == gen {
                continue;
            }
            class.dep_gen_id.store(gen, Ordering::Relaxed);
            if per_node {
                LockdepStats::inc(counter);
            }

            if !path.push(idx) {
                return Err(LockdepError::SearchTooDeep { class: target });
            }
            LockdepStats::record_max(&self.stats.max_recursion_depth, path.len() as u64);

            if is_match(target) {
                return Ok(Some(SearchMatch { class: target, path }));
            }

            depth += 1;
            cursor[depth] = deps.first(classes, target, dir);
        }
    }

    /// Prove that `next` cannot already reach `prev`
    ///
    /// A match means adding `prev -> next` would close a cycle; its path
    /// leads from `next` to `prev`.
    pub(crate) fn check_noncircular(
        &self,
        graph: &mut GraphState,
        next: ClassId,
        prev: ClassId,
    ) -> LockdepResult<Option<SearchMatch>> {
        self.search(
            graph,
            next,
            Direction::Forwards,
            &self.stats.cyclic_checks,
            true,
            |class| class == prev,
        )
    }

    /// First class reachable forwards from `class` carrying `bit`
    pub(crate) fn find_usage_forwards(
        &self,
        graph: &mut GraphState,
        class: ClassId,
        bit: UsageBit,
    ) -> LockdepResult<Option<SearchMatch>> {
        self.search(
            graph,
            class,
            Direction::Forwards,
            &self.stats.find_usage_forwards_checks,
            false,
            |c| self.classes.class(c).usage().has(bit),
        )
    }

    /// First class reachable backwards from `class` carrying `bit`
    pub(crate) fn find_usage_backwards(
        &self,
        graph: &mut GraphState,
        class: ClassId,
        bit: UsageBit,
    ) -> LockdepResult<Option<SearchMatch>> {
        self.search(
            graph,
            class,
            Direction::Backwards,
            &self.stats.find_usage_backwards_checks,
            false,
            |c| self.classes.class(c).usage().has(bit),
        )
    }

    /// Whether `to` is reachable from `from` through recorded dependencies
    pub fn depends_on(&self, from: ClassId, to: ClassId) -> bool {
        if self.classes.get(from).is_none() || self.classes.get(to).is_none() {
            return false;
        }
        let _irq = self.irq_guard();
        let Ok(mut graph) = self.graph_lock() else {
            return false;
        };
        matches!(self.check_noncircular(&mut graph, from, to), Ok(Some(_)))
    }

    /// Classes a path passes through, in walk order
    pub fn path_classes<'a>(&'a self, path: &'a DepPath) -> impl Iterator<Item = ClassId> + 'a {
        path.entries().iter().map(move |&idx| self.graph.target(idx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LockdepConfig;
    use crate::platform::HOST_PLATFORM;

    fn chain(lockdep: &Lockdep, n: usize) -> alloc::vec::Vec<ClassId> {
        let mut graph = lockdep.graph_lock().unwrap();
        let ids: alloc::vec::Vec<ClassId> = (0..n)
            .map(|i| {
                lockdep
                    .classes
                    .register(&mut graph, 0x10_000 + 0x100 * i, "n", 0, &lockdep.stats)
                    .unwrap()
            })
            .collect();
        for w in ids.windows(2) {
            lockdep.add_dependency(&mut graph, w[0], w[1], 1).unwrap();
        }
        ids
    }

    fn lockdep() -> Lockdep {
        let mut config = LockdepConfig::new();
        config.max_lock_classes = 64;
        config.max_list_entries = 256;
        config.max_lock_chains = 16;
        config.max_chain_hlocks = 64;
        config.max_stack_trace_entries = 64;
        Lockdep::new(&HOST_PLATFORM, config)
    }

    #[test]
    fn test_noncircular_finds_path() {
        let ld = lockdep();
        let c = chain(&ld, 4);
        let mut graph = ld.graph_lock().unwrap();

        let found = ld.check_noncircular(&mut graph, c[0], c[3]).unwrap().unwrap();
        assert_eq!(found.class, c[3]);
        assert_eq!(found.path.len(), 3);
        drop(graph);
        let via: alloc::vec::Vec<ClassId> = ld.path_classes(&found.path).collect();
        assert_eq!(via, [c[1], c[2], c[3]]);

        let mut graph = ld.graph_lock().unwrap();
        assert_eq!(ld.check_noncircular(&mut graph, c[3], c[0]).unwrap(), None);
    }

    #[test]
    fn test_source_matches_itself() {
        let ld = lockdep();
        let c = chain(&ld, 2);
        let mut graph = ld.graph_lock().unwrap();
        let found = ld.check_noncircular(&mut graph, c[1], c[1]).unwrap().unwrap();
        assert!(found.path.is_empty());
    }

    #[test]
    fn test_search_depth_cap() {
        let ld = lockdep();
        let c = chain(&ld, MAX_SEARCH_DEPTH + 2);
        let mut graph = ld.graph_lock().unwrap();
        let last = *c.last().unwrap();
        assert!(matches!(
            ld.check_noncircular(&mut graph, c[0], last),
            Err(LockdepError::SearchTooDeep { .. })
        ));
        // Within the cap the walk completes
        assert!(ld
            .check_noncircular(&mut graph, c[2], last)
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_diamond_visits_each_class_once() {
        let ld = lockdep();
        let c = chain(&ld, 3);
        {
            let mut graph = ld.graph_lock().unwrap();
            ld.add_dependency(&mut graph, c[0], c[2], 2).unwrap();
        }
        let before = ld.stats.cyclic_checks.load(Ordering::Relaxed);
        let mut graph = ld.graph_lock().unwrap();
        assert_eq!(ld.check_noncircular(&mut graph, c[0], ClassId(63)).unwrap(), None);
        let visited = ld.stats.cyclic_checks.load(Ordering::Relaxed) - before;
        // One start plus c1 and c2, each once
        assert_eq!(visited, 3);
    }

    #[test]
    fn test_usage_searches() {
        let ld = lockdep();
        let c = chain(&ld, 3);
        let mut graph = ld.graph_lock().unwrap();
        ld.classes
            .class(c[2])
            .set_usage(&mut graph, UsageBit::EnabledHardirq, Default::default());

        let fwd = ld
            .find_usage_forwards(&mut graph, c[0], UsageBit::EnabledHardirq)
            .unwrap()
            .unwrap();
        assert_eq!(fwd.class, c[2]);
        assert_eq!(
            ld.find_usage_backwards(&mut graph, c[0], UsageBit::EnabledHardirq)
                .unwrap(),
            None
        );
        let bwd = ld
            .find_usage_backwards(&mut graph, c[2], UsageBit::EnabledHardirq)
            .unwrap()
            .unwrap();
        assert_eq!(bwd.class, c[2]);
    }
}

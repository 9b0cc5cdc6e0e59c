//! Append-only index lists
//!
//! Every shared table of the validator (class hash buckets, dependency
//! lists, chain hash buckets) is a singly linked list threaded through a
//! flat pool by 32-bit slot indices. Writers hold the graph lock; readers
//! walk without any lock.
//!
//! A node is fully initialized before the release store that links it, and
//! readers follow links with acquire loads, so every node reachable from a
//! head is complete. Unlinking only redirects the predecessor: a reader
//! standing on the removed node keeps walking into the rest of the list.

use core::sync::atomic::{AtomicU32, Ordering};

/// End-of-list marker
pub(crate) const NIL: u32 = u32::MAX;

/// Head and tail of one list
pub(crate) struct ListHead {
    head: AtomicU32,
    tail: AtomicU32,
}

impl ListHead {
    pub(crate) const fn new() -> Self {
        Self {
            head: AtomicU32::new(NIL),
            tail: AtomicU32::new(NIL),
        }
    }

    /// First node, if any
    pub(crate) fn first(&self) -> Option<u32> {
        match self.head.load(Ordering::Acquire) {
            NIL => None,
            idx => Some(idx),
        }
    }

    /// Walk the list without locking
    pub(crate) fn iter<'a, F>(&self, link: F) -> ListIter<F>
    where
        F: Fn(u32) -> &'a AtomicU32,
    {
        ListIter {
            cur: self.head.load(Ordering::Acquire),
            link,
        }
    }

    /// Link `idx` at the tail
    ///
    /// Caller holds the graph lock and has fully initialized the node.
    pub(crate) fn push_tail<'a, F>(&self, idx: u32, link: F)
    where
        F: Fn(u32) -> &'a AtomicU32,
    {
        link(idx).store(NIL, Ordering::Relaxed);
        match self.tail.load(Ordering::Relaxed) {
            NIL => self.head.store(idx, Ordering::Release),
            tail => link(tail).store(idx, Ordering::Release),
        }
        self.tail.store(idx, Ordering::Relaxed);
    }

    /// Unlink `idx`; returns whether it was on the list
    ///
    /// Caller holds the graph lock. The removed node keeps its own link.
    pub(crate) fn unlink<'a, F>(&self, idx: u32, link: F) -> bool
    where
        F: Fn(u32) -> &'a AtomicU32,
    {
        let mut prev = NIL;
        let mut cur = self.head.load(Ordering::Relaxed);
        while cur != NIL && cur != idx {
            prev = cur;
            cur = link(cur).load(Ordering::Relaxed);
        }
        if cur == NIL {
            return false;
        }

        let next = link(idx).load(Ordering::Relaxed);
        match prev {
            NIL => self.head.store(next, Ordering::Release),
            p => link(p).store(next, Ordering::Release),
        }
        if self.tail.load(Ordering::Relaxed) == idx {
            self.tail.store(prev, Ordering::Relaxed);
        }
        true
    }

    /// Forget every node (caller holds the graph lock)
    pub(crate) fn clear(&self) {
        self.head.store(NIL, Ordering::Release);
        self.tail.store(NIL, Ordering::Relaxed);
    }
}

/// Lock-free list walk
pub(crate) struct ListIter<F> {
    cur: u32,
    link: F,
}

impl<'a, F> Iterator for ListIter<F>
where
    F: Fn(u32) -> &'a AtomicU32,
{
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if self.cur == NIL {
            return None;
        }
        let idx = self.cur;
        self.cur = (self.link)(idx).load(Ordering::Acquire);
        Some(idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    fn pool(n: usize) -> Vec<AtomicU32> {
        (0..n).map(|_| AtomicU32::new(NIL)).collect()
    }

    #[test]
    fn test_push_and_iterate_in_order() {
        let links = pool(4);
        let list = ListHead::new();
        assert_eq!(list.first(), None);
        for i in [2u32, 0, 3] {
            list.push_tail(i, |i| &links[i as usize]);
        }
        let seen: Vec<u32> = list.iter(|i| &links[i as usize]).collect();
        assert_eq!(seen, [2, 0, 3]);
    }

    #[test]
    fn test_unlink_head_middle_tail() {
        let links = pool(5);
        let list = ListHead::new();
        for i in 0..5u32 {
            list.push_tail(i, |i| &links[i as usize]);
        }
        assert!(list.unlink(0, |i| &links[i as usize]));
        assert!(list.unlink(2, |i| &links[i as usize]));
        assert!(list.unlink(4, |i| &links[i as usize]));
        assert!(!list.unlink(4, |i| &links[i as usize]));

        // The tail moved back, so appends land after 3
        list.push_tail(4, |i| &links[i as usize]);
        let seen: Vec<u32> = list.iter(|i| &links[i as usize]).collect();
        assert_eq!(seen, [1, 3, 4]);
    }

    #[test]
    fn test_clear() {
        let links = pool(2);
        let list = ListHead::new();
        list.push_tail(1, |i| &links[i as usize]);
        list.clear();
        assert_eq!(list.iter(|i| &links[i as usize]).count(), 0);
    }
}

//! Chain cache
//!
//! The classes a task holds, folded in order into a 64-bit key, identify a
//! lock chain. A chain that validated once never needs validating again, so
//! every acquisition first looks its key up here without locking and only
//! runs the graph checks on a miss.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

use super::class::ClassId;
use super::error::{LockdepError, LockdepResult};
use super::list::{ListHead, NIL};
use super::task::{HeldLocks, ReadMode};
use super::{GraphState, Lockdep};
use crate::config::{CHAINHASH_BITS, MAX_LOCKDEP_KEYS_BITS, MAX_LOCK_DEPTH};
use crate::metrics::LockdepStats;
use crate::sync::IrqSpinLockGuard;

const CHAINHASH_SIZE: usize = 1 << CHAINHASH_BITS;

fn chainhash(key: u64) -> usize {
    ((key >> CHAINHASH_BITS) + key) as usize & (CHAINHASH_SIZE - 1)
}

/// Fold one class id into a chain key
pub const fn iterate_chain_key(key: u64, id: u64) -> u64 {
    (key << MAX_LOCKDEP_KEYS_BITS) ^ (key >> (64 - MAX_LOCKDEP_KEYS_BITS)) ^ id
}

struct LockChain {
    key: AtomicU64,
    irq_context: AtomicU32,
    base: AtomicU32,
    depth: AtomicU32,
    next: AtomicU32,
}

impl LockChain {
    fn new() -> Self {
        Self {
            key: AtomicU64::new(0),
            irq_context: AtomicU32::new(0),
            base: AtomicU32::new(0),
            depth: AtomicU32::new(0),
            next: AtomicU32::new(NIL),
        }
    }
}

/// Snapshot of a cached chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainInfo {
    pub key: u64,
    pub irq_context: u8,
    /// Classes recorded for the chain (zero when the class array was full)
    pub depth: usize,
    base: usize,
}

/// Hashed, append-only table of validated chains
pub(crate) struct ChainCache {
    chains: Box<[LockChain]>,
    len: AtomicUsize,
    hash: Box<[ListHead]>,
    hlocks: Box<[AtomicU32]>,
    hlocks_len: AtomicUsize,
}

impl ChainCache {
    pub(crate) fn new(capacity: usize, hlocks: usize) -> Self {
        let chains: Vec<LockChain> = (0..capacity).map(|_| LockChain::new()).collect();
        let hash: Vec<ListHead> = (0..CHAINHASH_SIZE).map(|_| ListHead::new()).collect();
        let hlocks: Vec<AtomicU32> = (0..hlocks).map(|_| AtomicU32::new(0)).collect();
        Self {
            chains: chains.into_boxed_slice(),
            len: AtomicUsize::new(0),
            hash: hash.into_boxed_slice(),
            hlocks: hlocks.into_boxed_slice(),
            hlocks_len: AtomicUsize::new(0),
        }
    }

    fn link(&self, idx: u32) -> &AtomicU32 {
        &self.chains[idx as usize].next
    }

    /// Lock-free lookup
    pub(crate) fn lookup(&self, key: u64) -> Option<u32> {
        self.hash[chainhash(key)]
            .iter(|i| self.link(i))
            .find(|&idx| self.chains[idx as usize].key.load(Ordering::Relaxed) == key)
    }

    /// Cache a chain (graph lock held)
    ///
    /// `classes` is the context run ending in the new lock. When the class
    /// array is full the chain is cached without its class list.
    pub(crate) fn insert(
        &self,
        _graph: &mut GraphState,
        key: u64,
        irq_context: u8,
        classes: &[ClassId],
        stats: &LockdepStats,
    ) -> LockdepResult<u32> {
        let idx = self.len.load(Ordering::Relaxed);
        if idx >= self.chains.len() {
            return Err(LockdepError::ChainTableFull);
        }

        let chain = &self.chains[idx];
        let base = self.hlocks_len.load(Ordering::Relaxed);
        let depth = if base + classes.len() <= self.hlocks.len() {
            for (slot, class) in self.hlocks[base..].iter().zip(classes) {
                slot.store(class.0, Ordering::Relaxed);
            }
            self.hlocks_len.store(base + classes.len(), Ordering::Release);
            LockdepStats::add(&stats.chain_hlocks, classes.len() as u64);
            classes.len()
        } else {
            0
        };

        chain.key.store(key, Ordering::Relaxed);
        chain.irq_context.store(irq_context as u32, Ordering::Relaxed);
        chain.base.store(base as u32, Ordering::Relaxed);
        chain.depth.store(depth as u32, Ordering::Relaxed);
        self.len.store(idx + 1, Ordering::Release);
        self.hash[chainhash(key)].push_tail(idx as u32, |i| self.link(i));

        let counter = match irq_context {
            0 => &stats.process_chains,
            1 => &stats.softirq_chains,
            _ => &stats.hardirq_chains,
        };
        LockdepStats::inc(counter);
        Ok(idx as u32)
    }

    pub(crate) fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub(crate) fn info(&self, idx: u32) -> ChainInfo {
        let chain = &self.chains[idx as usize];
        ChainInfo {
            key: chain.key.load(Ordering::Relaxed),
            irq_context: chain.irq_context.load(Ordering::Relaxed) as u8,
            depth: chain.depth.load(Ordering::Relaxed) as usize,
            base: chain.base.load(Ordering::Relaxed) as usize,
        }
    }

    pub(crate) fn classes(&self, info: &ChainInfo) -> impl Iterator<Item = ClassId> + '_ {
        let start = info.base.min(self.hlocks.len());
        let end = (info.base + info.depth).min(self.hlocks.len());
        self.hlocks[start..end]
            .iter()
            .map(|c| ClassId(c.load(Ordering::Relaxed)))
    }

    /// Drop every cached chain (graph lock held, no concurrent users)
    pub(crate) fn reset(&self, _graph: &mut GraphState, stats: &LockdepStats) {
        for bucket in self.hash.iter() {
            bucket.clear();
        }
        self.len.store(0, Ordering::Release);
        self.hlocks_len.store(0, Ordering::Release);
        stats.reset_chains();
    }
}

/// Outcome of the self-deadlock scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeadlockCheck {
    /// The class is not held yet
    Clear,
    /// A recursive read nested inside a recursive read of the same class
    RecursiveRead,
}

/// Scan the held stack below `depth` for the class of the lock at `depth`
///
/// Re-acquiring a held class is only allowed when both the held entry and
/// the new one are recursive reads.
pub(crate) fn check_deadlock(held: &HeldLocks, depth: usize) -> LockdepResult<DeadlockCheck> {
    let next = held.locks[depth];
    for prev in &held.locks[..depth] {
        if prev.class != next.class {
            continue;
        }
        if prev.read == ReadMode::Recursive && next.read == ReadMode::Recursive {
            return Ok(DeadlockCheck::RecursiveRead);
        }
        return Err(LockdepError::RecursiveLocking { prev: *prev, next });
    }
    Ok(DeadlockCheck::Clear)
}

impl Lockdep {
    /// Look up the chain ending at `held.locks[depth]`
    ///
    /// `Ok(None)` is a hit. On a miss the chain is cached and the graph
    /// lock is handed back so the caller validates it under that lock.
    pub(crate) fn lookup_chain_cache(
        &self,
        held: &HeldLocks,
        depth: usize,
        chain_key: u64,
    ) -> LockdepResult<Option<IrqSpinLockGuard<'_, GraphState>>> {
        if self.chains.lookup(chain_key).is_some() {
            LockdepStats::inc(&self.stats.chain_lookup_hits);
            return Ok(None);
        }

        let mut graph = self.graph_lock()?;
        if self.chains.lookup(chain_key).is_some() {
            LockdepStats::inc(&self.stats.chain_lookup_hits);
            return Ok(None);
        }
        LockdepStats::inc(&self.stats.chain_lookup_misses);

        let irq_context = held.locks[depth].irq_context;
        let mut start = depth;
        while start > 0 && held.locks[start - 1].irq_context == irq_context {
            start -= 1;
        }
        let mut classes = [ClassId(0); MAX_LOCK_DEPTH];
        for (slot, hlock) in classes.iter_mut().zip(&held.locks[start..=depth]) {
            *slot = hlock.class;
        }

        self.chains.insert(
            &mut graph,
            chain_key,
            irq_context,
            &classes[..=depth - start],
            &self.stats,
        )?;
        Ok(Some(graph))
    }

    /// Whether a chain key has been validated and cached
    pub fn is_chain_cached(&self, chain_key: u64) -> bool {
        self.chains.lookup(chain_key).is_some()
    }

    /// Classes recorded for a cached chain, oldest first
    pub fn chain_classes(&self, chain_key: u64) -> Vec<ClassId> {
        match self.chains.lookup(chain_key) {
            Some(idx) => {
                let info = self.chains.info(idx);
                self.chains.classes(&info).collect()
            }
            None => Vec::new(),
        }
    }

    /// Chains cached so far
    pub fn nr_lock_chains(&self) -> usize {
        self.chains.len()
    }
}

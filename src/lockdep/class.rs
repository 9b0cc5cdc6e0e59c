//! Lock class registry
//!
//! Classes live in a flat table sized once at construction. A class slot is
//! claimed exactly once, under the graph lock, and published into its hash
//! bucket with a release store; lookups scan the bucket without locking and
//! compare keys, never slot addresses.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use spin::Once;

use super::error::{LockdepError, LockdepResult};
use super::key::{LockClassKey, LockMap};
use super::list::ListHead;
use super::stat::ClassLockStats;
use super::trace::{StackTrace, TraceSlot};
use super::usage::{LockUsage, UsageBit, NR_USAGE_BITS};
use super::{GraphState, Lockdep};
use crate::config::{CLASSHASH_BITS, MAX_LOCKDEP_SUBCLASSES};
use crate::metrics::LockdepStats;

/// Handle of a lock class (its slot in the class table)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClassId(pub(crate) u32);

impl ClassId {
    /// Slot index of the class
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Value folded into chain keys; never zero
    pub(crate) const fn chain_id(self) -> u64 {
        self.0 as u64 + 1
    }
}

const CLASSHASH_SIZE: usize = 1 << CLASSHASH_BITS;

fn classhash(key: usize) -> usize {
    ((key >> CLASSHASH_BITS) + key) & (CLASSHASH_SIZE - 1)
}

/// Immutable identity of a class, written once before publication
#[derive(Debug)]
pub(crate) struct ClassInfo {
    pub(crate) key: usize,
    pub(crate) name: &'static str,
    pub(crate) subclass: u32,
    pub(crate) name_version: u32,
}

/// One slot of the class table
pub(crate) struct LockClass {
    info: Once<ClassInfo>,
    usage: AtomicU32,
    usage_traces: [TraceSlot; NR_USAGE_BITS],
    ops: AtomicU64,
    /// Generation of the last search that visited this class
    pub(crate) dep_gen_id: AtomicU32,
    zapped: AtomicBool,
    hash_next: AtomicU32,
    pub(crate) locks_after: ListHead,
    pub(crate) locks_before: ListHead,
    pub(crate) stats: ClassLockStats,
}

impl LockClass {
    fn new() -> Self {
        Self {
            info: Once::new(),
            usage: AtomicU32::new(0),
            usage_traces: core::array::from_fn(|_| TraceSlot::new()),
            ops: AtomicU64::new(0),
            dep_gen_id: AtomicU32::new(0),
            zapped: AtomicBool::new(false),
            hash_next: AtomicU32::new(super::list::NIL),
            locks_after: ListHead::new(),
            locks_before: ListHead::new(),
            stats: ClassLockStats::new(),
        }
    }

    pub(crate) fn info(&self) -> Option<&ClassInfo> {
        self.info.get()
    }

    pub(crate) fn key(&self) -> usize {
        self.info().map_or(0, |i| i.key)
    }

    pub(crate) fn name(&self) -> &'static str {
        self.info().map_or("<unregistered>", |i| i.name)
    }

    pub(crate) fn usage(&self) -> LockUsage {
        LockUsage::from_bits_retain(self.usage.load(Ordering::Relaxed))
    }

    /// Set a usage bit (graph lock held); returns whether it was new
    pub(crate) fn set_usage(&self, _graph: &mut GraphState, bit: UsageBit, trace: StackTrace) -> bool {
        let old = self.usage.fetch_or(bit.mask().bits(), Ordering::Relaxed);
        if old & bit.mask().bits() != 0 {
            return false;
        }
        self.usage_traces[bit.index()].set(trace);
        true
    }

    pub(crate) fn usage_trace(&self, bit: UsageBit) -> StackTrace {
        self.usage_traces[bit.index()].get()
    }

    pub(crate) fn inc_ops(&self) {
        self.ops.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn ops(&self) -> u64 {
        self.ops.load(Ordering::Relaxed)
    }

    pub(crate) fn is_zapped(&self) -> bool {
        self.zapped.load(Ordering::Acquire)
    }
}

/// Flat, append-only class table with its hash buckets
pub(crate) struct ClassTable {
    slots: Box<[LockClass]>,
    len: AtomicUsize,
    hash: Box<[ListHead]>,
}

impl ClassTable {
    pub(crate) fn new(capacity: usize) -> Self {
        let slots: Vec<LockClass> = (0..capacity).map(|_| LockClass::new()).collect();
        let hash: Vec<ListHead> = (0..CLASSHASH_SIZE).map(|_| ListHead::new()).collect();
        Self {
            slots: slots.into_boxed_slice(),
            len: AtomicUsize::new(0),
            hash: hash.into_boxed_slice(),
        }
    }

    fn link(&self, idx: u32) -> &AtomicU32 {
        &self.slots[idx as usize].hash_next
    }

    /// Slot of a class minted by this table
    pub(crate) fn class(&self, id: ClassId) -> &LockClass {
        &self.slots[id.index()]
    }

    /// Slot of an externally supplied id
    pub(crate) fn get(&self, id: ClassId) -> Option<&LockClass> {
        if id.index() < self.len() {
            Some(&self.slots[id.index()])
        } else {
            None
        }
    }

    /// Number of slots ever claimed
    pub(crate) fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// Lock-free lookup by class key
    pub(crate) fn lookup(&self, key: usize) -> Option<ClassId> {
        self.hash[classhash(key)]
            .iter(|i| self.link(i))
            .find(|&idx| {
                let class = &self.slots[idx as usize];
                class.key() == key && !class.is_zapped()
            })
            .map(ClassId)
    }

    /// Every claimed class that has not been zapped
    pub(crate) fn live(&self) -> impl Iterator<Item = ClassId> + '_ {
        (0..self.len() as u32)
            .map(ClassId)
            .filter(move |&id| !self.class(id).is_zapped())
    }

    /// Insert a class (graph lock held)
    ///
    /// Re-scans first: another CPU may have registered the key between the
    /// caller's lock-free lookup and taking the lock.
    pub(crate) fn register(
        &self,
        _graph: &mut GraphState,
        base_key: usize,
        name: &'static str,
        subclass: u32,
        stats: &LockdepStats,
    ) -> LockdepResult<ClassId> {
        let key = base_key + subclass as usize;
        if let Some(id) = self.lookup(key) {
            return Ok(id);
        }

        let idx = self.len.load(Ordering::Relaxed);
        if idx >= self.slots.len() {
            return Err(LockdepError::ClassTableFull);
        }

        let name_version = self.name_version(base_key, name);
        let class = &self.slots[idx];
        class.info.call_once(|| ClassInfo {
            key,
            name,
            subclass,
            name_version,
        });

        self.len.store(idx + 1, Ordering::Release);
        self.hash[classhash(key)].push_tail(idx as u32, |i| self.link(i));

        LockdepStats::inc(&stats.lock_classes);
        LockdepStats::inc(&stats.unused_locks);
        Ok(ClassId(idx as u32))
    }

    /// Version suffix for a new class named `name`
    ///
    /// Sub-classes of one key share a version; otherwise it is one more than
    /// the highest version among live classes of the same name.
    fn name_version(&self, base_key: usize, name: &str) -> u32 {
        let mut count = 0;
        for id in self.live() {
            let Some(info) = self.class(id).info() else {
                continue;
            };
            if info.key - info.subclass as usize == base_key {
                return info.name_version;
            }
            if info.name == name {
                count = count.max(info.name_version);
            }
        }
        count + 1
    }

    /// Remove a class from lookup (graph lock held)
    pub(crate) fn zap(&self, _graph: &mut GraphState, id: ClassId) {
        let class = self.class(id);
        self.hash[classhash(class.key())].unlink(id.0, |i| self.link(i));
        class.zapped.store(true, Ordering::Release);
    }
}

impl Lockdep {
    /// Lock-free lookup of `(key, subclass)`
    pub(crate) fn look_up_class(&self, base_key: usize, subclass: u32, name: &'static str) -> LockdepResult<Option<ClassId>> {
        if subclass as usize >= MAX_LOCKDEP_SUBCLASSES {
            return Err(LockdepError::InvalidSubclass { subclass, name });
        }
        Ok(self.classes.lookup(base_key + subclass as usize))
    }

    /// Find or create the class of `(key, subclass)`
    pub(crate) fn register_class(&self, base_key: usize, name: &'static str, subclass: u32) -> LockdepResult<ClassId> {
        if let Some(id) = self.look_up_class(base_key, subclass, name)? {
            return Ok(id);
        }

        if !self.platform.is_static_object(base_key) {
            return Err(LockdepError::NonStaticKey { key: base_key, name });
        }

        let mut graph = self.graph_lock()?;
        self.classes.register(&mut graph, base_key, name, subclass, &self.stats)
    }

    /// Class of a lock instance, going through its subclass 0 cache
    pub(crate) fn class_of(&self, lock: &LockMap, subclass: u32) -> LockdepResult<ClassId> {
        let base_key = lock.key().addr();
        if subclass == 0 {
            if let Some(id) = lock.cached_class() {
                let class = self.classes.get(id);
                if class.is_some_and(|c| c.key() == base_key && !c.is_zapped()) {
                    return Ok(id);
                }
            }
        }

        let id = self.register_class(base_key, lock.name(), subclass)?;
        if subclass == 0 {
            lock.set_cached_class(id);
        }
        Ok(id)
    }

    /// Return the canonical class for `(key, subclass)`, creating it on
    /// first use
    ///
    /// A failure (invalid subclass, non-static key, full table) is reported
    /// and switches validation off; `None` is returned.
    pub fn register_or_lookup_class(
        &self,
        key: &'static LockClassKey,
        name: &'static str,
        subclass: u32,
    ) -> Option<ClassId> {
        if !self.is_enabled() {
            return None;
        }
        let _irq = self.irq_guard();
        match self.register_class(key.addr(), name, subclass) {
            Ok(id) => Some(id),
            Err(err) => {
                self.fail(None, None, err);
                None
            }
        }
    }

    /// Lock-free lookup without registration
    pub fn find_class(&self, key: &LockClassKey, subclass: u32) -> Option<ClassId> {
        if subclass as usize >= MAX_LOCKDEP_SUBCLASSES {
            return None;
        }
        self.classes.lookup(key.subkey(subclass))
    }

    /// First live class carrying `name`
    pub fn find_class_by_name(&self, name: &str) -> Option<ClassId> {
        self.classes.live().find(|&id| self.classes.class(id).name() == name)
    }

    /// Display name of a class
    pub fn class_name(&self, id: ClassId) -> Option<&'static str> {
        self.classes.get(id)?.info().map(|i| i.name)
    }

    /// Disambiguation version of a class name
    pub fn class_name_version(&self, id: ClassId) -> Option<u32> {
        self.classes.get(id)?.info().map(|i| i.name_version)
    }

    /// Sub-class of a class
    pub fn class_subclass(&self, id: ClassId) -> Option<u32> {
        self.classes.get(id)?.info().map(|i| i.subclass)
    }

    /// Usage bits a class has accumulated
    pub fn class_usage(&self, id: ClassId) -> LockUsage {
        self.classes.get(id).map_or(LockUsage::empty(), |c| c.usage())
    }

    /// Acquisitions observed for a class
    pub fn class_ops(&self, id: ClassId) -> u64 {
        self.classes.get(id).map_or(0, |c| c.ops())
    }

    /// Whether a class was removed by a key range free
    pub fn class_is_zapped(&self, id: ClassId) -> bool {
        self.classes.get(id).is_some_and(|c| c.is_zapped())
    }

    /// Number of class slots allocated
    pub fn nr_lock_classes(&self) -> usize {
        self.classes.len()
    }
}

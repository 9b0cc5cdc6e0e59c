//! Acquire and release transitions
//!
//! Every lock operation of a task goes through here: the held-lock stack is
//! updated, the chain key folded, and on a chain-cache miss the new lock is
//! validated against the locks held before it in the same IRQ context.
//! Releasing a lock other than the newest one rebuilds the tail of the stack
//! by replaying the acquisitions made after it.

use core::mem::size_of;

use super::chain::{check_deadlock, iterate_chain_key, DeadlockCheck};
use super::class::ClassId;
use super::error::{LockdepError, LockdepResult};
use super::key::LockMap;
use super::task::{HeldLock, HeldLocks, ReadMode, TaskLockState};
use super::usage::UsageBit;
use super::{GraphState, Lockdep};
use crate::metrics::LockdepStats;

/// One acquisition as the validator sees it
#[derive(Debug, Clone, Copy)]
struct AcquireRequest {
    class: ClassId,
    instance: usize,
    name: &'static str,
    trylock: bool,
    read: ReadMode,
    check: bool,
    hardirqs_off: bool,
    ip: usize,
}

impl AcquireRequest {
    fn replay(hlock: &HeldLock) -> Self {
        Self {
            class: hlock.class,
            instance: hlock.instance,
            name: hlock.name,
            trylock: hlock.trylock,
            read: hlock.read,
            check: hlock.check,
            hardirqs_off: hlock.hardirqs_off,
            ip: hlock.acquire_ip,
        }
    }
}

impl Lockdep {
    /// `task` is acquiring `lock`
    ///
    /// `check = false` tracks the lock on the held stack without proving
    /// its dependencies.
    #[allow(clippy::too_many_arguments)]
    pub fn acquire(
        &self,
        task: &TaskLockState,
        lock: &LockMap,
        subclass: u32,
        trylock: bool,
        read: ReadMode,
        check: bool,
        ip: usize,
    ) {
        let Some(_entry) = self.enter(task) else {
            return;
        };
        let class = match self.class_of(lock, subclass) {
            Ok(class) => class,
            Err(err) => {
                self.fail(Some(task), None, err);
                return;
            }
        };

        let req = AcquireRequest {
            class,
            instance: lock.instance(),
            name: lock.name(),
            trylock,
            read,
            check,
            hardirqs_off: !task.hardirqs_enabled(),
            ip,
        };
        let mut held = task.held.write();
        if let Err(err) = self.__acquire(task, &mut held, req) {
            self.fail(Some(task), Some(&*held), err);
        }
    }

    /// Acquire by class handle for locks without a [`LockMap`]
    ///
    /// `instance` identifies the lock for the matching
    /// [`release_instance`](Lockdep::release_instance).
    #[allow(clippy::too_many_arguments)]
    pub fn acquire_class(
        &self,
        task: &TaskLockState,
        class: ClassId,
        instance: usize,
        trylock: bool,
        read: ReadMode,
        check: bool,
        ip: usize,
    ) {
        let Some(_entry) = self.enter(task) else {
            return;
        };
        let Some(name) = self.class_name(class) else {
            return;
        };
        if self.class_is_zapped(class) {
            return;
        }

        let req = AcquireRequest {
            class,
            instance,
            name,
            trylock,
            read,
            check,
            hardirqs_off: !task.hardirqs_enabled(),
            ip,
        };
        let mut held = task.held.write();
        if let Err(err) = self.__acquire(task, &mut held, req) {
            self.fail(Some(task), Some(&*held), err);
        }
    }

    /// `task` is releasing `lock`
    ///
    /// `nested` hints that the lock is the most recent one taken; any
    /// other lock is found in the stack and released out of order.
    pub fn release(&self, task: &TaskLockState, lock: &LockMap, nested: bool, ip: usize) {
        self.release_named(task, lock.instance(), lock.name(), nested, ip);
    }

    /// Release by instance identity
    pub fn release_instance(&self, task: &TaskLockState, instance: usize, nested: bool, ip: usize) {
        self.release_named(task, instance, "<instance>", nested, ip);
    }

    fn release_named(&self, task: &TaskLockState, instance: usize, name: &'static str, nested: bool, ip: usize) {
        let Some(_entry) = self.enter(task) else {
            return;
        };
        let mut held = task.held.write();
        let result = self.__release(task, &mut held, instance, name, nested, ip);
        if let Err(err) = result {
            self.fail(Some(task), Some(&*held), err);
        }
    }

    fn __acquire(&self, task: &TaskLockState, held: &mut HeldLocks, req: AcquireRequest) -> LockdepResult<()> {
        self.classes.class(req.class).inc_ops();

        let depth = held.depth;
        if depth >= self.config.max_lock_depth {
            return Err(LockdepError::LockDepthExceeded { depth });
        }

        let mut hlock = HeldLock {
            class: req.class,
            acquire_ip: req.ip,
            instance: req.instance,
            name: req.name,
            trylock: req.trylock,
            read: req.read,
            check: req.check && self.config.prove_locking,
            hardirqs_off: req.hardirqs_off,
            prev_chain_key: 0,
            irq_context: task.irq_context(),
            waittime_stamp: 0,
            holdtime_stamp: 0,
        };
        if self.config.lock_stat {
            hlock.holdtime_stamp = self.platform.clock();
        }

        if hlock.check {
            self.mark_irqflags(task, &hlock)?;
        }
        self.mark_lock(task, &hlock, UsageBit::Used)?;

        let mut chain_key = held.curr_chain_key;
        let mut chain_head = false;
        if depth == 0 {
            if chain_key != 0 {
                return Err(LockdepError::ChainKeyMismatch {
                    expected: 0,
                    found: chain_key,
                });
            }
            chain_head = true;
        }
        hlock.prev_chain_key = chain_key;
        // Chains never cross an IRQ context boundary
        if depth > 0 && held.locks[depth - 1].irq_context != hlock.irq_context {
            chain_key = 0;
            chain_head = true;
        }
        chain_key = iterate_chain_key(chain_key, req.class.chain_id());

        held.locks[depth] = hlock;
        self.validate_chain(held, depth, chain_key, chain_head)?;

        held.curr_chain_key = chain_key;
        held.depth = depth + 1;
        if self.config.check_chain_key {
            verify_chain_key(held)?;
        }
        LockdepStats::record_max(&self.stats.max_lockdep_depth, held.depth as u64);
        Ok(())
    }

    /// Prove the chain ending at `held.locks[depth]`, unless it is cached
    fn validate_chain(
        &self,
        held: &HeldLocks,
        depth: usize,
        chain_key: u64,
        chain_head: bool,
    ) -> LockdepResult<()> {
        let hlock = held.locks[depth];
        if hlock.trylock || !hlock.check {
            return Ok(());
        }

        let Some(mut graph) = self.lookup_chain_cache(held, depth, chain_key)? else {
            return Ok(());
        };

        let nesting = check_deadlock(held, depth)?;
        if nesting == DeadlockCheck::Clear && !chain_head {
            self.check_prevs_add(&mut graph, held, depth)?;
        }
        Ok(())
    }

    /// Add dependencies from the relevant held locks to the new one
    ///
    /// Walks back over trylocks and recursive reads up to and including the
    /// first lock taken normally, without crossing an IRQ context boundary.
    fn check_prevs_add(
        &self,
        graph: &mut GraphState,
        held: &HeldLocks,
        depth: usize,
    ) -> LockdepResult<()> {
        let next = held.locks[depth];
        let mut i = depth;
        loop {
            let prev = held.locks[i - 1];
            let distance = (depth - i + 1) as u32;
            // Recursive reads order nothing, so the walk steps past them
            if prev.read != ReadMode::Recursive {
                self.check_prev_add(graph, &prev, &next, distance)?;
                if !prev.trylock {
                    break;
                }
            }
            i -= 1;
            if i == 0 || held.locks[i].irq_context != held.locks[i - 1].irq_context {
                break;
            }
        }
        Ok(())
    }

    fn check_prev_add(
        &self,
        graph: &mut GraphState,
        prev: &HeldLock,
        next: &HeldLock,
        distance: u32,
    ) -> LockdepResult<()> {
        if let Some(cycle) = self.check_noncircular(graph, next.class, prev.class)? {
            return Err(LockdepError::CircularDependency {
                prev: *prev,
                next: *next,
                path: cycle.path,
            });
        }

        self.check_prev_add_irq(graph, prev, next)?;

        // Recursive reads are checked but never create ordering
        if prev.read == ReadMode::Recursive || next.read == ReadMode::Recursive {
            return Ok(());
        }

        self.add_dependency(graph, prev.class, next.class, distance)?;
        Ok(())
    }

    fn __release(
        &self,
        task: &TaskLockState,
        held: &mut HeldLocks,
        instance: usize,
        name: &'static str,
        nested: bool,
        ip: usize,
    ) -> LockdepResult<()> {
        if held.depth == 0 {
            return Err(LockdepError::UnbalancedUnlock { instance, name, ip });
        }

        if nested && held.locks[held.depth - 1].instance == instance {
            self.release_nested(held)
        } else {
            self.release_non_nested(task, held, instance, name, ip)
        }
    }

    fn release_nested(&self, held: &mut HeldLocks) -> LockdepResult<()> {
        let depth = held.depth - 1;
        let hlock = held.locks[depth];

        held.depth = depth;
        held.curr_chain_key = hlock.prev_chain_key;
        self.record_hold_time(&hlock);

        if self.config.check_chain_key {
            verify_chain_key(held)?;
        }
        Ok(())
    }

    fn release_non_nested(
        &self,
        task: &TaskLockState,
        held: &mut HeldLocks,
        instance: usize,
        name: &'static str,
        ip: usize,
    ) -> LockdepResult<()> {
        let depth = held.depth;
        let top_context = held.locks[depth - 1].irq_context;

        // A lock cannot be released across an IRQ context boundary
        let found = (0..depth)
            .rev()
            .take_while(|&i| held.locks[i].irq_context == top_context)
            .find(|&i| held.locks[i].instance == instance);
        let Some(i) = found else {
            return Err(LockdepError::UnbalancedUnlock { instance, name, ip });
        };

        let hlock = held.locks[i];
        self.record_hold_time(&hlock);
        held.depth = i;
        held.curr_chain_key = hlock.prev_chain_key;

        for j in i + 1..depth {
            let later = held.locks[j];
            self.__acquire(task, held, AcquireRequest::replay(&later))?;
        }

        if held.depth != depth - 1 {
            return Err(LockdepError::DepthMismatch {
                expected: depth - 1,
                found: held.depth,
            });
        }
        if self.config.check_chain_key {
            verify_chain_key(held)?;
        }
        Ok(())
    }

    /// Whether `task` holds `lock`
    ///
    /// Always true once validation is off, so assertions built on it stay
    /// quiet.
    pub fn is_held(&self, task: &TaskLockState, lock: &LockMap) -> bool {
        if !self.is_enabled() {
            return true;
        }
        let instance = lock.instance();
        task.held
            .read(|h| h.as_slice().iter().any(|l| l.instance == instance))
    }

    /// Recompute the chain key of `task` from scratch
    pub fn check_chain_key(&self, task: &TaskLockState) {
        let Some(_entry) = self.enter(task) else {
            return;
        };
        let held = task.held.write();
        if let Err(err) = verify_chain_key(&held) {
            self.fail(Some(task), Some(&*held), err);
        }
    }

    /// `task` is exiting; it must hold no locks
    ///
    /// Any locks still held are reported and forgotten.
    pub fn task_exit(&self, task: &TaskLockState) {
        let _irq = self.irq_guard();
        let mut held = task.held.write();
        if held.depth != 0 {
            if self.is_enabled() && !task.in_validator() {
                self.fail(Some(task), Some(&*held), LockdepError::HeldAtExit { depth: held.depth });
            }
            held.clear();
        }
    }

    /// Memory `[start, start + len)` is being freed; no lock held by
    /// `task` may live in it
    pub fn check_no_locks_freed(&self, task: &TaskLockState, start: usize, len: usize) {
        if !self.is_enabled() || task.in_validator() {
            return;
        }
        let _irq = self.irq_guard();
        let held = task.held.write();
        let end = start.saturating_add(len);
        let freed = held.as_slice().iter().find(|h| {
            let lock_end = h.instance.saturating_add(size_of::<LockMap>());
            h.instance < end && lock_end > start
        });
        if let Some(hlock) = freed {
            let err = LockdepError::HeldLockFreed {
                lock: *hlock,
                start,
                len,
            };
            self.fail(Some(task), Some(&*held), err);
        }
    }
}

/// Recompute the chain key of a held stack and compare it with the
/// incrementally maintained one
pub(crate) fn verify_chain_key(held: &HeldLocks) -> LockdepResult<()> {
    let mut chain_key = 0;
    let mut prev: Option<&HeldLock> = None;
    for hlock in held.as_slice() {
        if hlock.prev_chain_key != chain_key {
            return Err(LockdepError::ChainKeyMismatch {
                expected: chain_key,
                found: hlock.prev_chain_key,
            });
        }
        if prev.is_some_and(|p| p.irq_context != hlock.irq_context) {
            chain_key = 0;
        }
        chain_key = iterate_chain_key(chain_key, hlock.class.chain_id());
        prev = Some(hlock);
    }
    if chain_key != held.curr_chain_key {
        return Err(LockdepError::ChainKeyMismatch {
            expected: chain_key,
            found: held.curr_chain_key,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LockdepConfig;
    use crate::lockdep::graph::Direction;
    use crate::lockdep::key::LockClassKey;
    use crate::platform::HOST_PLATFORM;

    static KEY_1: LockClassKey = LockClassKey::new();
    static KEY_2: LockClassKey = LockClassKey::new();
    static KEY_3: LockClassKey = LockClassKey::new();
    static L1: LockMap = LockMap::new("l1", &KEY_1);
    static L2: LockMap = LockMap::new("l2", &KEY_2);
    static L3: LockMap = LockMap::new("l3", &KEY_3);

    fn lockdep() -> Lockdep {
        let mut config = LockdepConfig::new();
        config.max_lock_classes = 16;
        config.max_list_entries = 64;
        config.max_lock_chains = 64;
        config.max_chain_hlocks = 256;
        config.max_stack_trace_entries = 64;
        config.check_chain_key = true;
        Lockdep::new(&HOST_PLATFORM, config)
    }

    fn lock(ld: &Lockdep, task: &TaskLockState, map: &LockMap) {
        ld.acquire(task, map, 0, false, ReadMode::Write, true, 0x1000);
    }

    #[test]
    fn test_nested_acquire_release() {
        let ld = lockdep();
        let task = TaskLockState::new(1, "t");
        lock(&ld, &task, &L1);
        let key1 = task.chain_key();
        lock(&ld, &task, &L2);
        assert_eq!(task.depth(), 2);
        assert!(ld.is_held(&task, &L2));

        ld.release(&task, &L2, true, 0x2000);
        assert_eq!(task.chain_key(), key1);
        ld.release(&task, &L1, true, 0x2000);
        assert_eq!(task.depth(), 0);
        assert_eq!(task.chain_key(), 0);
        assert!(!ld.is_held(&task, &L1));

        let c1 = ld.find_class(&KEY_1, 0).unwrap();
        let c2 = ld.find_class(&KEY_2, 0).unwrap();
        assert_eq!(ld.dependency_distance(c1, c2), Some(1));
        assert_eq!(ld.dependency_count(c2, Direction::Backwards), 1);
        assert!(ld.is_enabled());
    }

    #[test]
    fn test_out_of_order_release_replays() {
        let ld = lockdep();
        let task = TaskLockState::new(1, "t");
        lock(&ld, &task, &L1);
        lock(&ld, &task, &L2);
        lock(&ld, &task, &L3);
        ld.release(&task, &L2, false, 0x2000);

        let held = task.held_locks();
        let order: alloc::vec::Vec<usize> = held.as_slice().iter().map(|h| h.instance()).collect();
        assert_eq!(order, [L1.instance(), L3.instance()]);

        let c1 = ld.find_class(&KEY_1, 0).unwrap();
        let c3 = ld.find_class(&KEY_3, 0).unwrap();
        let fresh = iterate_chain_key(iterate_chain_key(0, c1.chain_id()), c3.chain_id());
        assert_eq!(task.chain_key(), fresh);
        assert_eq!(ld.dependency_distance(c1, c3), Some(1));
        assert!(ld.is_enabled());
    }

    /// Takes `map` inside a hard interrupt that arrived while `task` held
    /// its current locks
    fn lock_in_hardirq(ld: &Lockdep, task: &TaskLockState, map: &LockMap) {
        ld.disable_hardirqs(task, 0x3000);
        ld.hardirq_enter(task);
        lock(ld, task, map);
    }

    #[test]
    fn test_hardirq_starts_a_new_chain() {
        let ld = lockdep();
        let task = TaskLockState::new(1, "t");
        lock(&ld, &task, &L1);
        let process_key = task.chain_key();

        lock_in_hardirq(&ld, &task, &L2);
        assert!(ld.is_enabled());
        assert_eq!(task.depth(), 2);
        let c1 = ld.find_class(&KEY_1, 0).unwrap();
        let c2 = ld.find_class(&KEY_2, 0).unwrap();
        assert_eq!(task.chain_key(), iterate_chain_key(0, c2.chain_id()));
        assert_eq!(verify_chain_key(&task.held_locks()), Ok(()));

        // Nothing orders process context against the interrupt
        assert_eq!(ld.dependency_distance(c1, c2), None);
        assert_eq!(ld.nr_list_entries(), 0);

        ld.release(&task, &L2, true, 0x2000);
        ld.hardirq_exit(&task);
        ld.enable_hardirqs(&task, 0x2010);
        assert_eq!(task.chain_key(), process_key);
        ld.release(&task, &L1, true, 0x2020);
        assert_eq!(task.depth(), 0);
        assert!(ld.is_enabled());
    }

    #[test]
    fn test_release_across_irq_boundary() {
        let ld = lockdep();
        let task = TaskLockState::new(1, "t");
        lock(&ld, &task, &L1);
        lock_in_hardirq(&ld, &task, &L2);
        assert!(ld.is_enabled());

        ld.release(&task, &L1, false, 0x2000);
        assert!(!ld.is_enabled());
        assert!(matches!(
            ld.last_report().unwrap().error,
            LockdepError::UnbalancedUnlock { ip: 0x2000, .. }
        ));
        assert_eq!(task.depth(), 2);
    }

    #[test]
    fn test_release_of_unheld_lock() {
        let ld = lockdep();
        let task = TaskLockState::new(1, "t");
        ld.release(&task, &L1, true, 0x2000);
        assert!(!ld.is_enabled());
        assert!(matches!(
            ld.last_report().unwrap().error,
            LockdepError::UnbalancedUnlock { ip: 0x2000, .. }
        ));
    }

    #[test]
    fn test_recursive_locking() {
        let ld = lockdep();
        let task = TaskLockState::new(1, "t");
        lock(&ld, &task, &L1);
        lock(&ld, &task, &L1);
        assert!(!ld.is_enabled());
        assert!(matches!(
            ld.last_report().unwrap().error,
            LockdepError::RecursiveLocking { .. }
        ));
    }

    #[test]
    fn test_trylock_creates_no_dependency() {
        let ld = lockdep();
        let task = TaskLockState::new(1, "t");
        lock(&ld, &task, &L1);
        ld.acquire(&task, &L2, 0, true, ReadMode::Write, true, 0x1000);
        let c1 = ld.find_class(&KEY_1, 0).unwrap();
        let c2 = ld.find_class(&KEY_2, 0).unwrap();
        assert_eq!(ld.dependency_distance(c1, c2), None);

        // A lock taken after the trylock depends on both
        lock(&ld, &task, &L3);
        let c3 = ld.find_class(&KEY_3, 0).unwrap();
        assert_eq!(ld.dependency_distance(c2, c3), Some(1));
        assert_eq!(ld.dependency_distance(c1, c3), Some(2));
    }

    #[test]
    fn test_depth_limit() {
        let mut config = LockdepConfig::new();
        config.max_lock_classes = 16;
        config.max_list_entries = 64;
        config.max_lock_chains = 64;
        config.max_chain_hlocks = 256;
        config.max_stack_trace_entries = 64;
        config.max_lock_depth = 2;
        let ld = Lockdep::new(&HOST_PLATFORM, config);
        let task = TaskLockState::new(1, "t");
        lock(&ld, &task, &L1);
        lock(&ld, &task, &L2);
        lock(&ld, &task, &L3);
        assert!(matches!(
            ld.last_report().unwrap().error,
            LockdepError::LockDepthExceeded { depth: 2 }
        ));
        assert_eq!(task.depth(), 2);
    }

    #[test]
    fn test_task_exit_with_locks_held() {
        let ld = lockdep();
        let task = TaskLockState::new(1, "t");
        lock(&ld, &task, &L1);
        ld.task_exit(&task);
        assert_eq!(task.depth(), 0);
        assert!(matches!(
            ld.last_report().unwrap().error,
            LockdepError::HeldAtExit { depth: 1 }
        ));
    }

    #[test]
    fn test_freeing_held_lock() {
        let ld = lockdep();
        let task = TaskLockState::new(1, "t");
        lock(&ld, &task, &L1);
        ld.check_no_locks_freed(&task, L2.instance(), size_of::<LockMap>());
        assert!(ld.is_enabled());
        ld.check_no_locks_freed(&task, L1.instance() + 1, 1);
        assert!(matches!(
            ld.last_report().unwrap().error,
            LockdepError::HeldLockFreed { .. }
        ));
    }

    #[test]
    fn test_verify_chain_key_detects_corruption() {
        let ld = lockdep();
        let task = TaskLockState::new(1, "t");
        lock(&ld, &task, &L1);
        lock(&ld, &task, &L2);
        let mut held = task.held_locks();
        assert_eq!(verify_chain_key(&held), Ok(()));
        held.curr_chain_key ^= 1;
        assert!(matches!(
            verify_chain_key(&held),
            Err(LockdepError::ChainKeyMismatch { .. })
        ));
    }
}

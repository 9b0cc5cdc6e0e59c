//! Lock validator scenario tests
//!
//! Drives the public API the way lock primitives would and checks what the
//! validator proves: ordering cycles across tasks, class identity, the
//! chain cache, recursive reads, out-of-order release, interrupt usage
//! conflicts and graceful degradation when a table fills up.

#![cfg(test)]

use std::thread;

use mellos_lockdep::lockdep::UsageBit;
use mellos_lockdep::{
    Direction, LockClassKey, LockMap, Lockdep, LockdepConfig, LockdepError, ReadMode, TaskLockState,
    HOST_PLATFORM,
};

fn small_config() -> LockdepConfig {
    let mut config = LockdepConfig::new();
    config.max_lock_classes = 64;
    config.max_list_entries = 256;
    config.max_lock_chains = 128;
    config.max_chain_hlocks = 512;
    config.max_stack_trace_entries = 256;
    config.check_chain_key = true;
    config
}

fn lockdep() -> Lockdep {
    Lockdep::new(&HOST_PLATFORM, small_config())
}

fn lock(ld: &Lockdep, task: &TaskLockState, map: &LockMap, ip: usize) {
    ld.acquire(task, map, 0, false, ReadMode::Write, true, ip);
}

fn unlock(ld: &Lockdep, task: &TaskLockState, map: &LockMap, ip: usize) {
    ld.release(task, map, true, ip);
}

mod abba {
    use super::*;

    static NET_KEY: LockClassKey = LockClassKey::new();
    static DISK_KEY: LockClassKey = LockClassKey::new();
    static NET: LockMap = LockMap::new("net", &NET_KEY);
    static DISK: LockMap = LockMap::new("disk", &DISK_KEY);

    /// T1 takes net then disk; later T2 takes disk then net
    #[test]
    fn test_abba_across_tasks_is_reported() {
        let ld = lockdep();

        thread::scope(|s| {
            s.spawn(|| {
                let t1 = TaskLockState::new(1, "t1");
                lock(&ld, &t1, &NET, 0x100);
                lock(&ld, &t1, &DISK, 0x110);
                unlock(&ld, &t1, &DISK, 0x120);
                unlock(&ld, &t1, &NET, 0x130);
                assert_eq!(t1.depth(), 0);
            });
        });
        assert!(ld.is_enabled());

        let net = ld.find_class(&NET_KEY, 0).unwrap();
        let disk = ld.find_class(&DISK_KEY, 0).unwrap();
        assert_eq!(ld.dependency_distance(net, disk), Some(1));
        assert!(ld.depends_on(net, disk));

        thread::scope(|s| {
            s.spawn(|| {
                let t2 = TaskLockState::new(2, "t2");
                lock(&ld, &t2, &DISK, 0x200);
                lock(&ld, &t2, &NET, 0x210);
            });
        });

        assert!(!ld.is_enabled());
        let report = ld.last_report().unwrap();
        assert_eq!(report.task_id, Some(2));
        match report.error {
            LockdepError::CircularDependency { prev, next, path } => {
                assert_eq!(prev.class(), disk);
                assert_eq!(next.class(), net);
                let walked: Vec<_> = ld.path_classes(&path).collect();
                assert_eq!(walked, [disk]);
            }
            other => panic!("unexpected report: {:?}", other),
        }

        // The cycle was never recorded
        assert_eq!(ld.dependency_distance(disk, net), None);

        let mut text = String::new();
        report.render(&ld, &mut text).unwrap();
        assert!(text.contains("possible circular locking dependency detected"));
        assert!(text.contains(" (net){"));
        assert!(text.contains(" (disk){"));
    }

    /// Only the first problem is reported
    #[test]
    fn test_second_problem_is_not_reported() {
        let ld = lockdep();
        let t = TaskLockState::new(3, "t3");
        unlock(&ld, &t, &NET, 0x10);
        let first = ld.last_report().unwrap();
        assert!(matches!(first.error, LockdepError::UnbalancedUnlock { .. }));

        unlock(&ld, &t, &DISK, 0x20);
        let still = ld.last_report().unwrap();
        assert!(matches!(
            still.error,
            LockdepError::UnbalancedUnlock { name: "net", .. }
        ));
    }
}

mod classes {
    use super::*;

    static SHARED_KEY: LockClassKey = LockClassKey::new();

    #[test]
    fn test_concurrent_registration_is_idempotent() {
        let ld = lockdep();

        let ids: Vec<Vec<_>> = thread::scope(|s| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    s.spawn(|| {
                        (0..4u32)
                            .map(|sub| ld.register_or_lookup_class(&SHARED_KEY, "shared", sub).unwrap())
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for other in &ids[1..] {
            assert_eq!(other, &ids[0]);
        }
        assert_eq!(ld.nr_lock_classes(), 4);
        for (sub, &id) in ids[0].iter().enumerate() {
            assert_eq!(ld.class_subclass(id), Some(sub as u32));
            assert_eq!(ld.find_class(&SHARED_KEY, sub as u32), Some(id));
        }
        assert!(ld.is_enabled());
    }

    static NAMED_KEY: LockClassKey = LockClassKey::new();

    #[test]
    fn test_find_class_by_name() {
        let ld = lockdep();
        let named = ld.register_or_lookup_class(&NAMED_KEY, "named", 0).unwrap();
        ld.register_or_lookup_class(&NAMED_KEY, "named", 1).unwrap();
        assert_eq!(ld.find_class_by_name("named"), Some(named));
        assert_eq!(ld.find_class_by_name("missing"), None);
    }

    #[test]
    fn test_invalid_subclass_is_reported() {
        let ld = lockdep();
        let sub = LockClassKey::span() as u32;
        assert!(ld.register_or_lookup_class(&SHARED_KEY, "shared", sub).is_none());
        assert!(!ld.is_enabled());
        assert!(matches!(
            ld.last_report().unwrap().error,
            LockdepError::InvalidSubclass { .. }
        ));
    }
}

mod distance {
    use super::*;

    static A_KEY: LockClassKey = LockClassKey::new();
    static T1_KEY: LockClassKey = LockClassKey::new();
    static T2_KEY: LockClassKey = LockClassKey::new();
    static B_KEY: LockClassKey = LockClassKey::new();
    static A: LockMap = LockMap::new("a", &A_KEY);
    static T1: LockMap = LockMap::new("try1", &T1_KEY);
    static T2: LockMap = LockMap::new("try2", &T2_KEY);
    static B: LockMap = LockMap::new("b", &B_KEY);

    fn through_trylocks(ld: &Lockdep, task: &TaskLockState) {
        lock(ld, task, &A, 0x10);
        ld.acquire(task, &T1, 0, true, ReadMode::Write, true, 0x20);
        ld.acquire(task, &T2, 0, true, ReadMode::Write, true, 0x30);
        lock(ld, task, &B, 0x40);
        unlock(ld, task, &B, 0x50);
        unlock(ld, task, &T2, 0x60);
        unlock(ld, task, &T1, 0x70);
        unlock(ld, task, &A, 0x80);
    }

    #[test]
    fn test_distance_keeps_the_minimum() {
        let ld = lockdep();
        let task = TaskLockState::new(1, "dist");

        through_trylocks(&ld, &task);
        let a = ld.find_class(&A_KEY, 0).unwrap();
        let b = ld.find_class(&B_KEY, 0).unwrap();
        let t1 = ld.find_class(&T1_KEY, 0).unwrap();
        assert_eq!(ld.dependency_distance(a, b), Some(3));
        // Trylocks are never the target of a new dependency
        assert_eq!(ld.dependency_distance(a, t1), None);

        lock(&ld, &task, &A, 0x110);
        lock(&ld, &task, &B, 0x120);
        unlock(&ld, &task, &B, 0x130);
        unlock(&ld, &task, &A, 0x140);
        assert_eq!(ld.dependency_distance(a, b), Some(1));

        through_trylocks(&ld, &task);
        assert_eq!(ld.dependency_distance(a, b), Some(1));
        assert_eq!(ld.dependency_count(a, Direction::Forwards), 1);
        assert_eq!(ld.dependency_count(b, Direction::Backwards), 3);
        assert!(ld.is_enabled());
    }
}

mod cache {
    use super::*;

    static A_KEY: LockClassKey = LockClassKey::new();
    static B_KEY: LockClassKey = LockClassKey::new();
    static A: LockMap = LockMap::new("cache_a", &A_KEY);
    static B: LockMap = LockMap::new("cache_b", &B_KEY);

    fn pair(ld: &Lockdep, task: &TaskLockState) -> u64 {
        lock(ld, task, &A, 0x10);
        lock(ld, task, &B, 0x20);
        let key = task.chain_key();
        unlock(ld, task, &B, 0x30);
        unlock(ld, task, &A, 0x40);
        key
    }

    #[test]
    fn test_repeated_chain_hits_the_cache() {
        let ld = lockdep();
        let t1 = TaskLockState::new(1, "c1");

        let key = pair(&ld, &t1);
        let first = ld.stats();
        assert_eq!(first.chain_lookup_misses, 2);
        assert!(ld.is_chain_cached(key));
        let a = ld.find_class(&A_KEY, 0).unwrap();
        let b = ld.find_class(&B_KEY, 0).unwrap();
        assert_eq!(ld.chain_classes(key), [a, b]);

        // Another task taking the same locks reuses the proof
        let again = thread::scope(|s| {
            s.spawn(|| {
                let t2 = TaskLockState::new(2, "c2");
                pair(&ld, &t2)
            })
            .join()
            .unwrap()
        });
        assert_eq!(again, key);

        let second = ld.stats();
        assert_eq!(second.chain_lookup_misses, first.chain_lookup_misses);
        assert_eq!(second.chain_lookup_hits, first.chain_lookup_hits + 2);
        assert_eq!(second.cyclic_checks, first.cyclic_checks);
        assert_eq!(ld.nr_lock_chains(), 2);
        assert!(ld.is_enabled());
    }
}

mod recursive_read {
    use super::*;

    static KEY: LockClassKey = LockClassKey::new();
    static RW: LockMap = LockMap::new("rw", &KEY);

    #[test]
    fn test_recursive_read_nests() {
        let ld = lockdep();
        let task = TaskLockState::new(1, "reader");
        ld.acquire(&task, &RW, 0, false, ReadMode::Recursive, true, 0x10);
        ld.acquire(&task, &RW, 0, false, ReadMode::Recursive, true, 0x20);
        assert!(ld.is_enabled());
        assert_eq!(task.depth(), 2);
        assert_eq!(ld.nr_list_entries(), 0);

        unlock(&ld, &task, &RW, 0x30);
        unlock(&ld, &task, &RW, 0x40);
        assert_eq!(task.depth(), 0);
        assert!(ld.is_enabled());
    }

    static OUTER_KEY: LockClassKey = LockClassKey::new();
    static INNER_KEY: LockClassKey = LockClassKey::new();
    static OUTER: LockMap = LockMap::new("outer", &OUTER_KEY);
    static INNER: LockMap = LockMap::new("inner", &INNER_KEY);

    /// A lock taken under a recursive read still depends on what was held
    /// below the read
    #[test]
    fn test_dependency_reaches_past_recursive_read() {
        let ld = lockdep();
        let t1 = TaskLockState::new(1, "t1");
        lock(&ld, &t1, &OUTER, 0x10);
        ld.acquire(&t1, &RW, 0, false, ReadMode::Recursive, true, 0x20);
        lock(&ld, &t1, &INNER, 0x30);
        unlock(&ld, &t1, &INNER, 0x40);
        unlock(&ld, &t1, &RW, 0x50);
        unlock(&ld, &t1, &OUTER, 0x60);
        assert!(ld.is_enabled());

        let outer = ld.find_class(&OUTER_KEY, 0).unwrap();
        let rw = ld.find_class(&KEY, 0).unwrap();
        let inner = ld.find_class(&INNER_KEY, 0).unwrap();
        assert_eq!(ld.dependency_distance(outer, inner), Some(2));
        assert_eq!(ld.dependency_distance(outer, rw), None);
        assert_eq!(ld.dependency_distance(rw, inner), None);
        assert_eq!(ld.nr_list_entries(), 2);

        let t2 = TaskLockState::new(2, "t2");
        lock(&ld, &t2, &INNER, 0x70);
        lock(&ld, &t2, &OUTER, 0x80);
        assert!(!ld.is_enabled());
        match ld.last_report().unwrap().error {
            LockdepError::CircularDependency { prev, next, .. } => {
                assert_eq!(prev.class(), inner);
                assert_eq!(next.class(), outer);
            }
            other => panic!("unexpected report: {:?}", other),
        }
    }

    #[test]
    fn test_write_under_recursive_read_is_reported() {
        let ld = lockdep();
        let task = TaskLockState::new(1, "reader");
        ld.acquire(&task, &RW, 0, false, ReadMode::Recursive, true, 0x10);
        ld.acquire(&task, &RW, 0, false, ReadMode::Write, true, 0x20);
        assert!(!ld.is_enabled());
        assert!(matches!(
            ld.last_report().unwrap().error,
            LockdepError::RecursiveLocking { .. }
        ));
    }
}

mod replay {
    use super::*;

    static L1_KEY: LockClassKey = LockClassKey::new();
    static L2_KEY: LockClassKey = LockClassKey::new();
    static L3_KEY: LockClassKey = LockClassKey::new();
    static L1: LockMap = LockMap::new("l1", &L1_KEY);
    static L2: LockMap = LockMap::new("l2", &L2_KEY);
    static L3: LockMap = LockMap::new("l3", &L3_KEY);

    #[test]
    fn test_out_of_order_release_matches_direct_nesting() {
        let ld = lockdep();
        let task = TaskLockState::new(1, "replay");
        lock(&ld, &task, &L1, 0x10);
        lock(&ld, &task, &L2, 0x20);
        lock(&ld, &task, &L3, 0x30);
        let before = ld.nr_list_entries();

        ld.release(&task, &L2, false, 0x40);
        assert!(ld.is_enabled());
        assert!(ld.is_held(&task, &L1));
        assert!(!ld.is_held(&task, &L2));
        assert!(ld.is_held(&task, &L3));

        let direct = TaskLockState::new(2, "direct");
        lock(&ld, &direct, &L1, 0x50);
        lock(&ld, &direct, &L3, 0x60);
        assert_eq!(task.chain_key(), direct.chain_key());

        let l1 = ld.find_class(&L1_KEY, 0).unwrap();
        let l2 = ld.find_class(&L2_KEY, 0).unwrap();
        let l3 = ld.find_class(&L3_KEY, 0).unwrap();
        assert_eq!(ld.dependency_distance(l1, l3), Some(1));
        // Only the new l1 -> l3 pair was added; nothing new involves l2
        assert_eq!(ld.nr_list_entries(), before + 2);
        assert_eq!(ld.dependency_count(l2, Direction::Forwards), 1);
        assert_eq!(ld.dependency_count(l2, Direction::Backwards), 1);

        unlock(&ld, &direct, &L3, 0x70);
        unlock(&ld, &direct, &L1, 0x80);
        unlock(&ld, &task, &L3, 0x90);
        unlock(&ld, &task, &L1, 0xa0);
        assert!(ld.is_enabled());
    }
}

mod irq {
    use super::*;

    static A_KEY: LockClassKey = LockClassKey::new();
    static B_KEY: LockClassKey = LockClassKey::new();
    static A: LockMap = LockMap::new("irq_safe", &A_KEY);
    static B: LockMap = LockMap::new("irq_unsafe", &B_KEY);

    fn take_in_hardirq(ld: &Lockdep, task: &TaskLockState, map: &LockMap) {
        ld.disable_hardirqs(task, 0x1000);
        ld.hardirq_enter(task);
        lock(ld, task, map, 0x1010);
        unlock(ld, task, map, 0x1020);
        ld.hardirq_exit(task);
        ld.enable_hardirqs(task, 0x1030);
    }

    fn take_with_irqs_on(ld: &Lockdep, task: &TaskLockState, map: &LockMap) {
        lock(ld, task, map, 0x2000);
        unlock(ld, task, map, 0x2010);
    }

    fn nest_with_irqs_off(ld: &Lockdep, task: &TaskLockState) {
        ld.disable_hardirqs(task, 0x3000);
        lock(ld, task, &A, 0x3010);
        lock(ld, task, &B, 0x3020);
        unlock(ld, task, &B, 0x3030);
        unlock(ld, task, &A, 0x3040);
        ld.enable_hardirqs(task, 0x3050);
    }

    /// Safe usage first, then the dependency, then the unsafe usage
    #[test]
    fn test_unsafe_usage_after_dependency() {
        let ld = lockdep();
        let task = TaskLockState::new(1, "irq");
        take_in_hardirq(&ld, &task, &A);
        nest_with_irqs_off(&ld, &task);
        assert!(ld.is_enabled());

        take_with_irqs_on(&ld, &task, &B);
        assert!(!ld.is_enabled());
        let a = ld.find_class(&A_KEY, 0).unwrap();
        match ld.last_report().unwrap().error {
            LockdepError::IrqInversion {
                lock,
                new_bit,
                bad_bit,
                other,
                path,
                forwards,
            } => {
                assert_eq!(lock.name(), "irq_unsafe");
                assert_eq!(new_bit, UsageBit::EnabledHardirq);
                assert_eq!(bad_bit, UsageBit::UsedInHardirq);
                assert_eq!(other, a);
                assert!(!forwards);
                assert!(!path.is_empty());
            }
            other => panic!("unexpected report: {:?}", other),
        }
    }

    /// Unsafe usage first, then the dependency, then the safe usage
    #[test]
    fn test_safe_usage_after_dependency() {
        let ld = lockdep();
        let task = TaskLockState::new(1, "irq");
        take_with_irqs_on(&ld, &task, &B);
        nest_with_irqs_off(&ld, &task);
        assert!(ld.is_enabled());

        take_in_hardirq(&ld, &task, &A);
        assert!(!ld.is_enabled());
        let b = ld.find_class(&B_KEY, 0).unwrap();
        match ld.last_report().unwrap().error {
            LockdepError::IrqInversion {
                new_bit,
                bad_bit,
                other,
                forwards,
                ..
            } => {
                assert_eq!(new_bit, UsageBit::UsedInHardirq);
                assert_eq!(bad_bit, UsageBit::EnabledHardirq);
                assert_eq!(other, b);
                assert!(forwards);
            }
            other => panic!("unexpected report: {:?}", other),
        }
    }

    /// Both usages first, then the dependency between them
    #[test]
    fn test_dependency_between_safe_and_unsafe() {
        let ld = lockdep();
        let task = TaskLockState::new(1, "irq");
        take_in_hardirq(&ld, &task, &A);
        take_with_irqs_on(&ld, &task, &B);
        assert!(ld.is_enabled());

        nest_with_irqs_off(&ld, &task);
        assert!(!ld.is_enabled());
        let a = ld.find_class(&A_KEY, 0).unwrap();
        let b = ld.find_class(&B_KEY, 0).unwrap();
        match ld.last_report().unwrap().error {
            LockdepError::BadIrqDependency {
                safe_class,
                unsafe_class,
                safe_bit,
                unsafe_bit,
                ..
            } => {
                assert_eq!(safe_class, a);
                assert_eq!(unsafe_class, b);
                assert_eq!(safe_bit, UsageBit::UsedInHardirq);
                assert_eq!(unsafe_bit, UsageBit::EnabledHardirq);
            }
            other => panic!("unexpected report: {:?}", other),
        }
        assert_eq!(ld.dependency_distance(a, b), None);
    }
}

mod softirq {
    use super::*;

    static S_KEY: LockClassKey = LockClassKey::new();
    static U_KEY: LockClassKey = LockClassKey::new();
    static S: LockMap = LockMap::new("softirq_safe", &S_KEY);
    static U: LockMap = LockMap::new("softirq_unsafe", &U_KEY);

    fn take_in_softirq(ld: &Lockdep, task: &TaskLockState, map: &LockMap) {
        ld.disable_softirqs(task, 0x1000);
        ld.softirq_enter(task);
        assert_eq!(task.irq_context(), 1);
        lock(ld, task, map, 0x1010);
        unlock(ld, task, map, 0x1020);
        ld.softirq_exit(task);
        ld.enable_softirqs(task, 0x1030);
    }

    #[test]
    fn test_softirq_safe_then_unsafe_is_inconsistent() {
        let ld = lockdep();
        let task = TaskLockState::new(1, "bh");
        take_in_softirq(&ld, &task, &S);
        assert!(ld.is_enabled());
        let s = ld.find_class(&S_KEY, 0).unwrap();
        assert!(ld.class_usage(s).has(UsageBit::UsedInSoftirq));
        assert!(!ld.class_usage(s).has(UsageBit::EnabledSoftirq));

        lock(&ld, &task, &S, 0x2000);
        assert!(!ld.is_enabled());
        match ld.last_report().unwrap().error {
            LockdepError::InconsistentLockState { lock, new_bit, bad_bit } => {
                assert_eq!(lock.name(), "softirq_safe");
                assert_eq!(new_bit, UsageBit::EnabledSoftirq);
                assert_eq!(bad_bit, UsageBit::UsedInSoftirq);
            }
            other => panic!("unexpected report: {:?}", other),
        }
    }

    #[test]
    fn test_softirq_dependency_between_safe_and_unsafe() {
        let ld = lockdep();
        let task = TaskLockState::new(1, "bh");
        take_in_softirq(&ld, &task, &S);
        lock(&ld, &task, &U, 0x2000);
        unlock(&ld, &task, &U, 0x2010);
        assert!(ld.is_enabled());

        ld.disable_softirqs(&task, 0x3000);
        lock(&ld, &task, &S, 0x3010);
        lock(&ld, &task, &U, 0x3020);
        assert!(!ld.is_enabled());
        let s = ld.find_class(&S_KEY, 0).unwrap();
        let u = ld.find_class(&U_KEY, 0).unwrap();
        match ld.last_report().unwrap().error {
            LockdepError::BadIrqDependency {
                safe_class,
                unsafe_class,
                safe_bit,
                unsafe_bit,
                ..
            } => {
                assert_eq!(safe_class, s);
                assert_eq!(unsafe_class, u);
                assert_eq!(safe_bit, UsageBit::UsedInSoftirq);
                assert_eq!(unsafe_bit, UsageBit::EnabledSoftirq);
            }
            other => panic!("unexpected report: {:?}", other),
        }
        assert_eq!(ld.dependency_distance(s, u), None);
    }
}

mod keys {
    use super::*;
    use mellos_lockdep::Platform;

    /// Treats every address as dynamically allocated
    struct HeapOnlyPlatform;

    impl Platform for HeapOnlyPlatform {
        fn irq_save(&self) -> usize {
            0
        }

        fn irq_restore(&self, _flags: usize) {}

        fn is_static_object(&self, _addr: usize) -> bool {
            false
        }
    }

    static HEAP_ONLY: HeapOnlyPlatform = HeapOnlyPlatform;
    static KEY: LockClassKey = LockClassKey::new();
    static HEAP: LockMap = LockMap::new("heap", &KEY);

    #[test]
    fn test_non_static_key_is_rejected() {
        let ld = Lockdep::new(&HEAP_ONLY, small_config());
        let task = TaskLockState::new(1, "keys");
        lock(&ld, &task, &HEAP, 0x10);

        assert!(!ld.is_enabled());
        assert!(matches!(
            ld.last_report().unwrap().error,
            LockdepError::NonStaticKey { name: "heap", .. }
        ));
        assert_eq!(ld.nr_lock_classes(), 0);
        assert_eq!(task.depth(), 0);
        assert_eq!(ld.find_class(&KEY, 0), None);
    }
}

mod capacity {
    use super::*;

    static K0: LockClassKey = LockClassKey::new();
    static K1: LockClassKey = LockClassKey::new();
    static K2: LockClassKey = LockClassKey::new();
    static K3: LockClassKey = LockClassKey::new();
    static L0: LockMap = LockMap::new("cap0", &K0);
    static L1: LockMap = LockMap::new("cap1", &K1);
    static L2: LockMap = LockMap::new("cap2", &K2);
    static L3: LockMap = LockMap::new("cap3", &K3);

    #[test]
    fn test_class_table_exhaustion_degrades() {
        let mut config = small_config();
        config.max_lock_classes = 3;
        let ld = Lockdep::new(&HOST_PLATFORM, config);
        let task = TaskLockState::new(1, "cap");

        for (i, map) in [&L0, &L1, &L2].into_iter().enumerate() {
            lock(&ld, &task, map, 0x10 * (i + 1));
            unlock(&ld, &task, map, 0x100);
        }
        assert!(ld.is_enabled());
        assert_eq!(ld.nr_lock_classes(), 3);

        lock(&ld, &task, &L3, 0x40);
        assert!(!ld.is_enabled());
        assert_eq!(ld.last_report().unwrap().error, LockdepError::ClassTableFull);
        assert_eq!(ld.nr_lock_classes(), 3);
        assert_eq!(task.depth(), 0);

        // Nothing grows once validation is off
        let entries = ld.nr_list_entries();
        let chains = ld.nr_lock_chains();
        lock(&ld, &task, &L0, 0x50);
        lock(&ld, &task, &L3, 0x60);
        unlock(&ld, &task, &L3, 0x70);
        unlock(&ld, &task, &L0, 0x80);
        assert_eq!(ld.nr_lock_classes(), 3);
        assert_eq!(ld.nr_list_entries(), entries);
        assert_eq!(ld.nr_lock_chains(), chains);
        assert_eq!(ld.last_report().unwrap().error, LockdepError::ClassTableFull);
    }

    #[test]
    fn test_dependency_pool_exhaustion_degrades() {
        let mut config = small_config();
        config.max_list_entries = 2;
        let ld = Lockdep::new(&HOST_PLATFORM, config);
        let task = TaskLockState::new(1, "cap");

        lock(&ld, &task, &L0, 0x10);
        lock(&ld, &task, &L1, 0x20);
        unlock(&ld, &task, &L1, 0x30);
        assert!(ld.is_enabled());
        assert_eq!(ld.nr_list_entries(), 2);

        lock(&ld, &task, &L2, 0x40);
        assert!(!ld.is_enabled());
        assert_eq!(ld.last_report().unwrap().error, LockdepError::EdgeTableFull);
        assert_eq!(ld.nr_list_entries(), 2);
    }

    #[test]
    fn test_chain_cache_exhaustion_degrades() {
        let mut config = small_config();
        config.max_lock_chains = 1;
        let ld = Lockdep::new(&HOST_PLATFORM, config);
        let task = TaskLockState::new(1, "cap");

        lock(&ld, &task, &L0, 0x10);
        assert!(ld.is_enabled());
        lock(&ld, &task, &L1, 0x20);
        assert!(!ld.is_enabled());
        assert_eq!(ld.last_report().unwrap().error, LockdepError::ChainTableFull);
        assert_eq!(ld.nr_lock_chains(), 1);
    }
}

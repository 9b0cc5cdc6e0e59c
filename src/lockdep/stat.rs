//! Lock statistics
//!
//! Wait and hold times, contention points and cross-CPU bounces per class.
//! Everything here is observational and only runs when `lock_stat` is
//! configured.

use super::class::ClassId;
use super::error::{LockdepError, LockdepResult};
use super::key::LockMap;
use super::task::{HeldLock, HeldLocks, TaskLockState};
use super::Lockdep;
use crate::config::LOCKSTAT_POINTS;
use crate::sync::SpinLock;

/// Accumulated durations
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockTime {
    pub nr: u64,
    pub min: u64,
    pub max: u64,
    pub total: u64,
}

impl LockTime {
    fn add(&mut self, time: u64) {
        if time > self.max {
            self.max = time;
        }
        if time < self.min || self.nr == 0 {
            self.min = time;
        }
        self.total += time;
        self.nr += 1;
    }

    /// Mean duration, zero when nothing was recorded
    pub fn avg(&self) -> u64 {
        if self.nr == 0 {
            0
        } else {
            self.total / self.nr
        }
    }
}

/// Bounce counter slots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bounce {
    AcquiredWrite = 0,
    AcquiredRead = 1,
    ContendedWrite = 2,
    ContendedRead = 3,
}

/// Statistics of one class
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockClassStats {
    /// Call sites that contended, in first-seen order
    pub contention_point: [usize; LOCKSTAT_POINTS],
    /// Contentions per call site
    pub contentions: [u64; LOCKSTAT_POINTS],
    pub read_waittime: LockTime,
    pub write_waittime: LockTime,
    pub read_holdtime: LockTime,
    pub write_holdtime: LockTime,
    /// Indexed by [`Bounce`]
    pub bounces: [u64; 4],
}

impl LockClassStats {
    pub fn bounce(&self, which: Bounce) -> u64 {
        self.bounces[which as usize]
    }

    /// Slot of `ip` among the contention points; `LOCKSTAT_POINTS` when
    /// every slot is taken by other sites
    fn contention_point(&mut self, ip: usize) -> usize {
        for i in 0..LOCKSTAT_POINTS {
            if self.contention_point[i] == 0 {
                self.contention_point[i] = ip;
                return i;
            }
            if self.contention_point[i] == ip {
                return i;
            }
        }
        LOCKSTAT_POINTS
    }
}

/// Per-class statistics storage
pub(crate) struct ClassLockStats {
    inner: SpinLock<LockClassStats>,
}

impl ClassLockStats {
    pub(crate) fn new() -> Self {
        Self {
            inner: SpinLock::new(LockClassStats::default()),
        }
    }

    pub(crate) fn snapshot(&self) -> LockClassStats {
        *self.inner.lock()
    }

    fn clear(&self) {
        *self.inner.lock() = LockClassStats::default();
    }
}

/// Topmost held lock of `instance` within the current context run
fn find_held(held: &HeldLocks, instance: usize) -> Option<usize> {
    let locks = held.as_slice();
    let top_context = locks.last()?.irq_context;
    locks
        .iter()
        .rposition(|h| h.instance == instance)
        .filter(|&i| locks[i..].iter().all(|h| h.irq_context == top_context))
}

impl Lockdep {
    /// The task is about to wait for `lock`, which it already acquired in
    /// the validator
    pub fn contended(&self, task: &TaskLockState, lock: &LockMap, ip: usize) {
        if !self.config.lock_stat {
            return;
        }
        let _irq = self.irq_guard();
        let Some(_recursion) = task.enter() else {
            return;
        };

        let mut held = task.held.write();
        if let Err(err) = self.lock_contended(&mut held, lock, ip) {
            self.fail(Some(task), Some(&*held), err);
        }
    }

    /// The task obtained `lock` after contending for it
    pub fn acquired(&self, task: &TaskLockState, lock: &LockMap) {
        if !self.config.lock_stat {
            return;
        }
        let _irq = self.irq_guard();
        let Some(_recursion) = task.enter() else {
            return;
        };

        let mut held = task.held.write();
        if let Err(err) = self.lock_acquired(&mut held, lock) {
            self.fail(Some(task), Some(&*held), err);
        }
    }

    fn lock_contended(&self, held: &mut HeldLocks, lock: &LockMap, ip: usize) -> LockdepResult<()> {
        let Some(i) = find_held(held, lock.instance()) else {
            return Err(LockdepError::BadContention {
                instance: lock.instance(),
                name: lock.name(),
                ip,
            });
        };

        let hlock = &mut held.locks[i];
        hlock.waittime_stamp = self.platform.clock();

        let mut stats = self.classes.class(hlock.class).stats.inner.lock();
        let point = stats.contention_point(ip);
        if point < LOCKSTAT_POINTS {
            stats.contentions[point] += 1;
        }
        if lock.last_cpu() != self.platform.cpu_id() {
            let bounce = if hlock.read.is_read() {
                Bounce::ContendedRead
            } else {
                Bounce::ContendedWrite
            };
            stats.bounces[bounce as usize] += 1;
        }
        Ok(())
    }

    fn lock_acquired(&self, held: &mut HeldLocks, lock: &LockMap) -> LockdepResult<()> {
        let Some(i) = find_held(held, lock.instance()) else {
            return Err(LockdepError::BadContention {
                instance: lock.instance(),
                name: lock.name(),
                ip: 0,
            });
        };

        let cpu = self.platform.cpu_id();
        let hlock = &mut held.locks[i];
        let mut waittime = 0;
        if hlock.waittime_stamp != 0 {
            let now = self.platform.clock();
            waittime = now.saturating_sub(hlock.waittime_stamp);
            hlock.holdtime_stamp = now;
        }

        let mut stats = self.classes.class(hlock.class).stats.inner.lock();
        if waittime != 0 {
            if hlock.read.is_read() {
                stats.read_waittime.add(waittime);
            } else {
                stats.write_waittime.add(waittime);
            }
        }
        if lock.last_cpu() != cpu {
            let bounce = if hlock.read.is_read() {
                Bounce::AcquiredRead
            } else {
                Bounce::AcquiredWrite
            };
            stats.bounces[bounce as usize] += 1;
        }
        lock.set_last_cpu(cpu);
        Ok(())
    }

    /// Account the hold time of a lock being released
    pub(crate) fn record_hold_time(&self, hlock: &HeldLock) {
        if !self.config.lock_stat {
            return;
        }
        let holdtime = self.platform.clock().saturating_sub(hlock.holdtime_stamp);
        let mut stats = self.classes.class(hlock.class).stats.inner.lock();
        if hlock.read.is_read() {
            stats.read_holdtime.add(holdtime);
        } else {
            stats.write_holdtime.add(holdtime);
        }
    }

    /// Statistics of one class
    pub fn class_stats(&self, class: ClassId) -> Option<LockClassStats> {
        self.classes.get(class).map(|c| c.stats.snapshot())
    }

    /// Reset the statistics of every class
    pub fn clear_lock_stats(&self) {
        for id in 0..self.classes.len() as u32 {
            self.classes.class(ClassId(id)).stats.clear();
        }
    }
}

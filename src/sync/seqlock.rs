//! Sequence lock for held-lock stacks
//!
//! Every task publishes its held-lock stack through a [`SeqLock`]. The task
//! itself is the writer; diagnostic dumps and reports on other CPUs copy the
//! stack out and retry when the sequence moved underneath them, so a reader
//! never delays the task it is looking at.
//!
//! Writers still exclude each other, because a quiescent task's stack may be
//! cleared from outside (test resets).

use core::cell::UnsafeCell;
use core::fmt;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{fence, AtomicUsize, Ordering};

/// Data published under a sequence counter
///
/// The counter is odd while a writer is active. A read is consistent when
/// it saw the same even value before and after copying the data.
pub struct SeqLock<T> {
    seq: AtomicUsize,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Sync for SeqLock<T> {}
unsafe impl<T: Send> Send for SeqLock<T> {}

impl<T> SeqLock<T> {
    pub const fn new(data: T) -> Self {
        Self {
            seq: AtomicUsize::new(0),
            data: UnsafeCell::new(data),
        }
    }

    /// One read attempt; `None` if a writer was active or interfered
    ///
    /// `f` may observe a torn value on a failed attempt, so it must only
    /// copy data out.
    pub fn try_read<F, R>(&self, f: F) -> Option<R>
    where
        F: Fn(&T) -> R,
    {
        let start = self.seq.load(Ordering::Acquire);
        if start & 1 != 0 {
            return None;
        }
        let result = f(unsafe { &*self.data.get() });
        fence(Ordering::Acquire);
        (self.seq.load(Ordering::Relaxed) == start).then_some(result)
    }

    /// Read until a consistent copy is obtained
    ///
    /// Only for callers that know the writer will make progress (the owner
    /// itself, or a quiescent task).
    pub fn read<F, R>(&self, f: F) -> R
    where
        F: Fn(&T) -> R,
    {
        loop {
            if let Some(result) = self.try_read(&f) {
                return result;
            }
            core::hint::spin_loop();
        }
    }

    /// Read with at most `attempts` tries
    ///
    /// Dumps use this so a task that keeps its stack busy is skipped rather
    /// than waited for.
    pub fn read_bounded<F, R>(&self, attempts: usize, f: F) -> Option<R>
    where
        F: Fn(&T) -> R,
    {
        for _ in 0..attempts {
            if let Some(result) = self.try_read(&f) {
                return Some(result);
            }
            core::hint::spin_loop();
        }
        None
    }

    /// Exclusive access; the counter stays odd until the guard drops
    pub fn write(&self) -> SeqLockWriteGuard<'_, T> {
        let mut seq = self.seq.load(Ordering::Relaxed);
        loop {
            if seq & 1 != 0 {
                core::hint::spin_loop();
                seq = self.seq.load(Ordering::Relaxed);
                continue;
            }
            match self
                .seq
                .compare_exchange_weak(seq, seq + 1, Ordering::Acquire, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(now) => seq = now,
            }
        }
        // Readers that see the odd value must not see the data change first
        fence(Ordering::Release);
        SeqLockWriteGuard { lock: self, seq: seq + 1 }
    }
}

impl<T> fmt::Debug for SeqLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SeqLock")
            .field("seq", &self.seq.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Write access to a [`SeqLock`]
pub struct SeqLockWriteGuard<'a, T> {
    lock: &'a SeqLock<T>,
    seq: usize,
}

impl<T> Deref for SeqLockWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SeqLockWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for SeqLockWriteGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.seq.store(self.seq + 1, Ordering::Release);
    }
}

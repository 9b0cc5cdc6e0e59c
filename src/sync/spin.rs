/// SpinLock implementation for the validator's own serialization
///
/// These locks are deliberately invisible to the lock validator: they are
/// what the validator uses to protect its graph, so tracking them would
/// recurse forever.
use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

use crate::platform::Platform;

/// A mutual exclusion primitive useful for protecting shared data
///
/// This spinlock will spin until the lock becomes available.
/// The lock is automatically released when the guard goes out of scope.
///
/// # Examples
///
/// ```
/// use mellos_lockdep::sync::SpinLock;
///
/// let lock = SpinLock::new(5);
/// {
///     let mut data = lock.lock();
///     *data += 1;
/// } // lock is released here
/// assert_eq!(*lock.lock(), 6);
/// ```
pub struct SpinLock<T> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

/// A guard that provides mutable access to the data protected by a SpinLock
///
/// When the guard is dropped, the lock is automatically released.
pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

unsafe impl<T: Send> Sync for SpinLock<T> {}
unsafe impl<T: Send> Send for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// Creates a new spinlock wrapping the supplied data
    pub const fn new(data: T) -> Self {
        SpinLock {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(data),
        }
    }

    /// Acquires the lock, spinning until it is available
    ///
    /// Uses exponential backoff to reduce bus contention when multiple
    /// cores are competing for the same lock.
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let mut backoff = 1;
        const MAX_BACKOFF: usize = 256;

        loop {
            // Acquire ordering: subsequent reads see the previous holder's writes
            if self
                .locked
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return SpinLockGuard { lock: self };
            }

            for _ in 0..backoff {
                core::hint::spin_loop();
            }

            if backoff < MAX_BACKOFF {
                backoff *= 2;
            }
        }
    }

    /// Attempts to acquire the lock without spinning
    ///
    /// Returns `None` if the lock is currently held.
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        if self
            .locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Some(SpinLockGuard { lock: self })
        } else {
            None
        }
    }
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        // Release ordering: our writes are visible to the next holder
        self.lock.locked.store(false, Ordering::Release);
    }
}

impl<T: core::fmt::Debug> core::fmt::Debug for SpinLock<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self.try_lock() {
            Some(guard) => write!(f, "SpinLock {{ data: {:?} }}", &*guard),
            None => write!(f, "SpinLock {{ <locked> }}"),
        }
    }
}

/// An IRQ-safe spinlock that disables interrupts while the lock is held
///
/// Interrupt masking goes through the [`Platform`], which saves the local
/// interrupt state before the lock is taken and restores it after release.
/// This keeps an interrupt on the same core from re-entering code that
/// already holds the lock.
pub struct IrqSpinLock<T> {
    inner: SpinLock<T>,
}

/// A guard that provides mutable access to data protected by an IrqSpinLock
///
/// When the guard is dropped, the lock is released and the saved interrupt
/// state is restored.
pub struct IrqSpinLockGuard<'a, T> {
    guard: Option<SpinLockGuard<'a, T>>,
    platform: &'a dyn Platform,
    flags: usize,
}

unsafe impl<T: Send> Sync for IrqSpinLock<T> {}
unsafe impl<T: Send> Send for IrqSpinLock<T> {}

impl<T> IrqSpinLock<T> {
    /// Creates a new IRQ-safe spinlock wrapping the supplied data
    pub const fn new(data: T) -> Self {
        IrqSpinLock {
            inner: SpinLock::new(data),
        }
    }

    /// Acquires the lock with interrupts disabled
    pub fn lock<'a>(&'a self, platform: &'a dyn Platform) -> IrqSpinLockGuard<'a, T> {
        let flags = platform.irq_save();
        let guard = self.inner.lock();

        IrqSpinLockGuard {
            guard: Some(guard),
            platform,
            flags,
        }
    }

    /// Attempts to acquire the lock without spinning
    ///
    /// If the lock cannot be acquired the interrupt state is restored.
    pub fn try_lock<'a>(&'a self, platform: &'a dyn Platform) -> Option<IrqSpinLockGuard<'a, T>> {
        let flags = platform.irq_save();

        match self.inner.try_lock() {
            Some(guard) => Some(IrqSpinLockGuard {
                guard: Some(guard),
                platform,
                flags,
            }),
            None => {
                platform.irq_restore(flags);
                None
            }
        }
    }
}

impl<T> Deref for IrqSpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.guard {
            Some(guard) => &**guard,
            None => unreachable!("guard is only taken in drop"),
        }
    }
}

impl<T> DerefMut for IrqSpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.guard {
            Some(guard) => &mut **guard,
            None => unreachable!("guard is only taken in drop"),
        }
    }
}

impl<T> Drop for IrqSpinLockGuard<'_, T> {
    fn drop(&mut self) {
        // Unlock first, then let interrupts back in
        drop(self.guard.take());
        self.platform.irq_restore(self.flags);
    }
}

//! Lock class keys and lock instances
//!
//! A [`LockClassKey`] is a static object whose address names a class of
//! locks; every lock initialized at the same site shares it. A [`LockMap`]
//! is the per-instance record embedded in each lock primitive.

use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use super::class::ClassId;
use crate::config::MAX_LOCKDEP_SUBCLASSES;

/// Static key naming a lock class
///
/// The key must live in static storage: class identity is derived from its
/// address. It spans one byte per sub-class, so `(key, subclass)` maps to
/// the distinct address `key + subclass`.
///
/// ```
/// use mellos_lockdep::lockdep::{LockClassKey, LockMap};
///
/// static RUNQUEUE_KEY: LockClassKey = LockClassKey::new();
/// static RUNQUEUE_LOCK: LockMap = LockMap::new("runqueue", &RUNQUEUE_KEY);
/// assert_eq!(RUNQUEUE_LOCK.name(), "runqueue");
/// ```
#[derive(Debug)]
pub struct LockClassKey {
    subkeys: [u8; MAX_LOCKDEP_SUBCLASSES],
}

impl LockClassKey {
    /// Create a key
    pub const fn new() -> Self {
        Self {
            subkeys: [0; MAX_LOCKDEP_SUBCLASSES],
        }
    }

    /// Base address of the key
    pub fn addr(&self) -> usize {
        self.subkeys.as_ptr() as usize
    }

    /// Address identifying `(self, subclass)`
    pub fn subkey(&self, subclass: u32) -> usize {
        self.addr() + subclass as usize
    }

    /// Bytes of address space covered by the key
    pub const fn span() -> usize {
        MAX_LOCKDEP_SUBCLASSES
    }
}

impl Default for LockClassKey {
    fn default() -> Self {
        Self::new()
    }
}

/// Class cache value meaning "not resolved yet"
const NO_CLASS: u32 = u32::MAX;

/// Per-instance validator record of one lock
///
/// The address of the `LockMap` identifies the lock instance, so a lock
/// must not move while it is held.
#[derive(Debug)]
pub struct LockMap {
    name: &'static str,
    key: &'static LockClassKey,
    /// Class of subclass 0, resolved on first acquisition
    class_cache: AtomicU32,
    /// CPU that last acquired the lock (contention bounce accounting)
    cpu: AtomicUsize,
}

impl LockMap {
    /// Create the record for a lock named `name` of the class `key`
    pub const fn new(name: &'static str, key: &'static LockClassKey) -> Self {
        Self {
            name,
            key,
            class_cache: AtomicU32::new(NO_CLASS),
            cpu: AtomicUsize::new(0),
        }
    }

    /// Display name of the lock
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Class key of the lock
    pub fn key(&self) -> &'static LockClassKey {
        self.key
    }

    /// Identity of this instance
    pub fn instance(&self) -> usize {
        self as *const Self as usize
    }

    pub(crate) fn cached_class(&self) -> Option<ClassId> {
        match self.class_cache.load(Ordering::Relaxed) {
            NO_CLASS => None,
            idx => Some(ClassId(idx)),
        }
    }

    pub(crate) fn set_cached_class(&self, class: ClassId) {
        self.class_cache.store(class.0, Ordering::Relaxed);
    }

    pub(crate) fn clear_cached_class(&self) {
        self.class_cache.store(NO_CLASS, Ordering::Relaxed);
    }

    pub(crate) fn last_cpu(&self) -> usize {
        self.cpu.load(Ordering::Relaxed)
    }

    pub(crate) fn set_last_cpu(&self, cpu: usize) {
        self.cpu.store(cpu, Ordering::Relaxed);
    }
}

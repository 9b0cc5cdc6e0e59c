//! MelloOS lock validator
//!
//! A runtime lock-dependency validator for the MelloOS kernel. Lock
//! primitives report every acquisition and release; the validator proves
//! that no lock ordering seen so far can deadlock, including orderings that
//! only deadlock when an interrupt handler takes a lock its own CPU already
//! holds.
//!
//! The crate is `no_std` with `alloc`. Host builds only link `std` for the
//! test harness.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod config;
pub mod console;
pub mod log;
pub mod metrics;
pub mod platform;
pub mod sync;

pub mod lockdep;

pub use config::LockdepConfig;
pub use lockdep::{
    init, lockdep, ClassId, Direction, LockClassKey, LockMap, Lockdep, LockdepError, ReadMode, Report,
    TaskLockState,
};
pub use platform::{HostPlatform, Platform, HOST_PLATFORM};

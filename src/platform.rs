//! Platform Collaborators
//!
//! The validator needs a handful of services from the kernel it runs in:
//! local interrupt masking, stack-trace capture, a notion of which addresses
//! are long-lived, a clock and the current CPU. They are gathered in the
//! [`Platform`] trait so the validator itself stays architecture-neutral.

use core::sync::atomic::{AtomicU64, Ordering};

/// Services the validator borrows from its host kernel
///
/// Every method must be callable with interrupts disabled and must never
/// take a lock that is itself tracked by the validator.
pub trait Platform: Sync {
    /// Save the local interrupt state and disable interrupts
    ///
    /// Returns an opaque flags word handed back to [`Platform::irq_restore`].
    fn irq_save(&self) -> usize;

    /// Restore the local interrupt state saved by [`Platform::irq_save`]
    fn irq_restore(&self, flags: usize);

    /// Capture the caller's stack, skipping the innermost `skip` frames
    ///
    /// Returns the number of frames written to `frames`.
    fn save_stack_trace(&self, skip: usize, frames: &mut [usize]) -> usize {
        let _ = (skip, frames);
        0
    }

    /// Whether `addr` lies in storage that lives as long as the kernel image
    /// (static data, per-CPU areas or a loaded module)
    fn is_static_object(&self, addr: usize) -> bool {
        let _ = addr;
        true
    }

    /// Monotonic timestamp in nanoseconds
    fn clock(&self) -> u64 {
        0
    }

    /// Logical id of the CPU executing the caller
    fn cpu_id(&self) -> usize {
        0
    }
}

/// Platform for hosted builds and kernels without an interrupt model
///
/// Interrupt masking is a no-op, no stack traces are produced, every address
/// is considered static and the clock is a monotonic tick counter.
pub struct HostPlatform {
    ticks: AtomicU64,
}

impl HostPlatform {
    /// Create a host platform
    pub const fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
        }
    }
}

impl Default for HostPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for HostPlatform {
    fn irq_save(&self) -> usize {
        0
    }

    fn irq_restore(&self, _flags: usize) {}

    fn clock(&self) -> u64 {
        self.ticks.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Shared host platform instance
pub static HOST_PLATFORM: HostPlatform = HostPlatform::new();

/// Synchronization primitives used by the validator itself
/// None of these are tracked by the validator: they protect its own state.

mod spin;
pub mod seqlock;

pub use self::spin::{IrqSpinLock, IrqSpinLockGuard, SpinLock, SpinLockGuard};
pub use seqlock::{SeqLock, SeqLockWriteGuard};

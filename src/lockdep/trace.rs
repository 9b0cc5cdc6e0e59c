//! Stack-trace storage
//!
//! Traces captured for usage bits and dependencies share one flat frame
//! array. Frames are appended under the graph lock and never rewritten, so
//! a published trace handle stays valid for the life of the validator.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use super::error::{LockdepError, LockdepResult};
use super::GraphState;
use crate::config::{MAX_TRACE_FRAMES, TRACE_SKIP};
use crate::metrics::LockdepStats;
use crate::platform::Platform;

/// Handle to a captured stack trace
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StackTrace {
    offset: u32,
    len: u32,
}

impl StackTrace {
    /// Trace with no frames
    pub const EMPTY: StackTrace = StackTrace { offset: 0, len: 0 };

    /// Number of frames
    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn pack(self) -> u64 {
        ((self.offset as u64) << 32) | self.len as u64
    }

    pub(crate) fn unpack(raw: u64) -> Self {
        Self {
            offset: (raw >> 32) as u32,
            len: raw as u32,
        }
    }
}

/// Trace handle stored in an atomic slot
pub(crate) struct TraceSlot(AtomicU64);

impl TraceSlot {
    pub(crate) const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub(crate) fn get(&self) -> StackTrace {
        StackTrace::unpack(self.0.load(Ordering::Relaxed))
    }

    pub(crate) fn set(&self, trace: StackTrace) {
        self.0.store(trace.pack(), Ordering::Relaxed);
    }
}

/// Flat frame storage
pub(crate) struct TraceStore {
    frames: Box<[AtomicUsize]>,
    len: AtomicUsize,
}

impl TraceStore {
    pub(crate) fn new(capacity: usize) -> Self {
        let frames: Vec<AtomicUsize> = (0..capacity).map(|_| AtomicUsize::new(0)).collect();
        Self {
            frames: frames.into_boxed_slice(),
            len: AtomicUsize::new(0),
        }
    }

    /// Capture the caller's stack
    ///
    /// The graph guard is required: frames are only ever appended by its
    /// holder.
    pub(crate) fn save(
        &self,
        _graph: &mut GraphState,
        platform: &dyn Platform,
        stats: &LockdepStats,
    ) -> LockdepResult<StackTrace> {
        let mut buf = [0usize; MAX_TRACE_FRAMES];
        let n = platform.save_stack_trace(TRACE_SKIP, &mut buf).min(MAX_TRACE_FRAMES);

        let start = self.len.load(Ordering::Relaxed);
        if start + n > self.frames.len() {
            return Err(LockdepError::StackTraceFull);
        }
        for (slot, frame) in self.frames[start..start + n].iter().zip(&buf[..n]) {
            slot.store(*frame, Ordering::Relaxed);
        }
        self.len.store(start + n, Ordering::Release);
        LockdepStats::add(&stats.stack_trace_entries, n as u64);

        Ok(StackTrace {
            offset: start as u32,
            len: n as u32,
        })
    }

    /// Frames of a trace
    pub(crate) fn frames(&self, trace: StackTrace) -> impl Iterator<Item = usize> + '_ {
        let start = (trace.offset as usize).min(self.frames.len());
        let end = (start + trace.len as usize).min(self.frames.len());
        self.frames[start..end].iter().map(|f| f.load(Ordering::Relaxed))
    }

    /// Frames stored so far
    pub(crate) fn used(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }
}

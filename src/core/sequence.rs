//! # Sequence Allocators
//!
//! Correlation-id and definition-id generation.
//!
//! Each connection direction owns one [`SequenceId`]: ids issued by the
//! local side correlate only against responses from the remote side, so the
//! two namespaces never collide. The allocator wraps from `u32::MAX` back
//! around; reusing an id that is still pending would be an invariant
//! violation in the peer, which guards against it with a debug assertion on
//! insert.
//!
//! [`DefinitionId`] allocates the 64-bit ids that identify published
//! contexts. It is monotone for the lifetime of the owning Netron instance,
//! so a live id is never reused after detach/re-attach.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Wrap-safe u32 allocator for packet correlation ids and stream ids
#[derive(Debug)]
pub struct SequenceId {
    next: AtomicU32,
}

impl SequenceId {
    pub fn new() -> Self {
        // 0 is skipped so a zeroed header never aliases a real request
        Self {
            next: AtomicU32::new(1),
        }
    }

    pub fn next(&self) -> u32 {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        if id == 0 {
            // Landed on the wrap point, take the next one
            self.next.fetch_add(1, Ordering::Relaxed)
        } else {
            id
        }
    }
}

impl Default for SequenceId {
    fn default() -> Self {
        Self::new()
    }
}

/// Monotone u64 allocator for definition ids
#[derive(Debug)]
pub struct DefinitionId {
    next: AtomicU64,
}

impl DefinitionId {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for DefinitionId {
    fn default() -> Self {
        Self::new()
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-file lock queue
//!
//! The queue is an ordered list of acquisitions. Granted entries always
//! form a prefix, and that prefix is homogeneous: either all shared, or
//! exactly one exclusive. This module holds the queue structure and the
//! grant decisions; the machine applies the side effects (callbacks,
//! update events, reference counting).

use isle_core::{LockFn, LockMode, LockToken, TimerId};

pub(crate) struct LockEntry {
    pub token: LockToken,
    pub mode: LockMode,
    pub manual: bool,
    pub granted: bool,
    /// Taken out exactly once, for grant or cancellation.
    pub cb: Option<LockFn>,
    /// Deadline timer armed while the entry is queued.
    pub deadline: Option<TimerId>,
}

#[derive(Default)]
pub(crate) struct LockQueue {
    pub entries: Vec<LockEntry>,
}

impl LockQueue {
    /// Appends an acquisition; returns true when it is granted
    /// immediately (empty queue, or shared joining an all-shared queue).
    pub fn append(&mut self, token: LockToken, mode: LockMode, manual: bool, cb: LockFn) -> bool {
        let immediate = self.entries.is_empty()
            || (mode == LockMode::Shared && self.entries.iter().all(|e| e.mode == LockMode::Shared));
        self.entries.push(LockEntry {
            token,
            mode,
            manual,
            granted: immediate,
            cb: Some(cb),
            deadline: None,
        });
        immediate
    }

    pub fn position(&self, token: LockToken) -> Option<usize> {
        self.entries.iter().position(|e| e.token == token)
    }

    /// Length of the granted prefix.
    pub fn granted_prefix(&self) -> usize {
        let n = self.entries.iter().take_while(|e| e.granted).count();
        debug_assert!(
            self.entries.iter().skip(n).all(|e| !e.granted),
            "granted entries must form a prefix"
        );
        debug_assert!(
            n <= 1 || self.entries[..n].iter().all(|e| e.mode == LockMode::Shared),
            "granted prefix must be homogeneous"
        );
        n
    }

    /// Whether the entry at `idx` may be granted now.
    pub fn grantable(&self, idx: usize) -> bool {
        if idx != self.granted_prefix() {
            return false;
        }
        match self.entries[idx].mode {
            LockMode::Exclusive => idx == 0,
            LockMode::Shared => self.entries[..idx].iter().all(|e| e.mode == LockMode::Shared),
        }
    }

    pub fn remove(&mut self, idx: usize) -> LockEntry {
        self.entries.remove(idx)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
#[path = "locks_tests.rs"]
mod tests;

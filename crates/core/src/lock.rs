// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Advisory lock envelopes
//!
//! A lock is a pending or granted shared/exclusive acquisition on one
//! file. It never blocks the loop: the grant (or cancellation) arrives
//! through the callback, with `ok` telling which of the two it is.

use crate::file::FileId;
use crate::host::Host;

/// Deadline applied to queued acquisitions that do not specify one.
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 10_000;

/// Desired sharing discipline of an acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    Shared,
    Exclusive,
}

impl LockMode {
    pub fn is_exclusive(self) -> bool {
        matches!(self, LockMode::Exclusive)
    }
}

/// Identifies one acquisition from grant to release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockToken(pub u64);

/// Outcome delivered to a lock callback.
///
/// `ok == false` means the acquisition was cancelled (timeout, a
/// predecessor's cancellation cascade, or file teardown) and must not be
/// released again.
#[derive(Debug, Clone, Copy)]
pub struct LockGrant {
    pub token: LockToken,
    pub file: FileId,
    pub ok: bool,
}

pub type LockFn = Box<dyn FnOnce(&mut dyn Host, LockGrant)>;

/// A lock acquisition to submit through [`Host::lock`].
pub struct LockRequest {
    pub file: FileId,
    pub mode: LockMode,
    /// `None` applies [`DEFAULT_LOCK_TIMEOUT_MS`]. An explicit 0 cancels
    /// the acquisition unless it is granted immediately.
    pub timeout_ms: Option<u64>,
    /// When false the scheduler releases the lock as soon as the grant
    /// callback returns.
    pub manual: bool,
    pub cb: LockFn,
}

impl LockRequest {
    pub fn new(
        file: FileId,
        mode: LockMode,
        cb: impl FnOnce(&mut dyn Host, LockGrant) + 'static,
    ) -> Self {
        Self {
            file,
            mode,
            timeout_ms: None,
            manual: false,
            cb: Box::new(cb),
        }
    }

    pub fn manual(mut self) -> Self {
        self.manual = true;
        self
    }

    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }
}

impl std::fmt::Debug for LockRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockRequest")
            .field("file", &self.file)
            .field("mode", &self.mode)
            .field("timeout_ms", &self.timeout_ms)
            .field("manual", &self.manual)
            .finish_non_exhaustive()
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! File lifecycle and update events
//!
//! One event shape for every notification a watcher can receive. The
//! source tag distinguishes runtime-driven transitions from ones observed
//! on the native side and from events a driver raises about itself, so a
//! single `Update` kind covers what used to be separate internal and
//! native variants.

use serde::{Deserialize, Serialize};

/// What happened to the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// The file is being destroyed; fires at most once, after the last
    /// reference is released and before the file leaves the registry.
    Delete,
    /// The file's content or children changed.
    Update,
    /// The machine asks the owner to shed cached bytes.
    Uncache,
    /// A coalesced cross-thread signal; the watcher polls its own state.
    Async,
    /// A per-file timer armed with `trigger_timer` elapsed.
    Timer,
    /// A driver-defined processing bracket.
    Process(ProcessPhase),
}

/// Phase tag for [`EventKind::Process`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessPhase {
    Pre,
    Post,
}

/// Where the event originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    /// Emitted by the machine itself (lock transitions, lifecycle).
    Runtime,
    /// Observed on the native side (filesystem change, device state).
    Native,
    /// Raised by the file's own driver.
    Driver,
}

/// An event delivered to a file's watchers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEvent {
    pub kind: EventKind,
    pub source: EventSource,
}

impl FileEvent {
    pub const fn runtime(kind: EventKind) -> Self {
        Self {
            kind,
            source: EventSource::Runtime,
        }
    }

    pub const fn native(kind: EventKind) -> Self {
        Self {
            kind,
            source: EventSource::Native,
        }
    }

    pub const fn driver(kind: EventKind) -> Self {
        Self {
            kind,
            source: EventSource::Driver,
        }
    }

    pub fn name(&self) -> &'static str {
        match (self.kind, self.source) {
            (EventKind::Delete, EventSource::Native) => "delete:native",
            (EventKind::Delete, _) => "delete",
            (EventKind::Update, EventSource::Native) => "update:native",
            (EventKind::Update, EventSource::Driver) => "update:driver",
            (EventKind::Update, EventSource::Runtime) => "update",
            (EventKind::Uncache, _) => "uncache",
            (EventKind::Async, _) => "async",
            (EventKind::Timer, _) => "timer",
            (EventKind::Process(ProcessPhase::Pre), _) => "process:pre",
            (EventKind::Process(ProcessPhase::Post), _) => "process:post",
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;

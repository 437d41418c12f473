// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Host ABI
//!
//! The machine exposes its services to drivers through the object-safe
//! [`Host`] trait: one method per entry of the former host function table,
//! each taking the machine handle explicitly. Driver packs are matched
//! against [`crate::ABI_VERSION`] at install time; a mismatch rejects the
//! whole pack.

use crate::driver::DriverSpec;
use crate::event::FileEvent;
use crate::file::{FileId, FileInfo, FileInit};
use crate::lock::{LockRequest, LockToken};
use crate::req::Request;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// A closure run on the loop thread during a later turn.
pub type DeferFn = Box<dyn FnOnce(&mut dyn Host)>;

/// A deferred closure injectable from another thread.
pub type SendDeferFn = Box<dyn FnOnce(&mut dyn Host) + Send>;

/// A timer callback; repeating timers see it once per firing.
pub type TimerFn = Box<dyn FnMut(&mut dyn Host)>;

/// Type-erased payload a work closure returns to its completion.
pub type WorkOutput = Box<dyn Any + Send>;

/// A blocking closure executed on the worker pool, off the loop thread.
///
/// It must not touch files, locks, or the registry; only its own captures
/// and value-typed inputs prepared by the loop thread.
pub type WorkFn = Box<dyn FnOnce() -> WorkOutput + Send>;

/// A completion closure, run back on the loop thread. Completions are
/// retained loop-side, so they need not be `Send`.
pub type CompleteFn = Box<dyn FnOnce(&mut dyn Host, WorkOutput)>;

/// Entry point of a long-lived thread. Its sole way back into the loop is
/// an [`AsyncTrigger`] moved in at spawn time.
pub type ThreadFn = Box<dyn FnOnce() + Send>;

/// A watch callback.
pub type WatchFn = Box<dyn FnMut(&mut dyn Host, WatchNote)>;

/// Event delivery to one watcher.
#[derive(Debug, Clone, Copy)]
pub struct WatchNote {
    pub file: FileId,
    pub event: FileEvent,
}

/// Identifies a watch subscription; removal is idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(pub u64);

/// Identifies a timer; cancellation is idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub u64);

/// Why the machine stopped running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Shutdown,
    Reboot,
    Panic,
}

/// Where a frame's bytes live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOrigin {
    /// Inside the machine's bump strip.
    Strip,
    /// Heap fallback, keyed by allocation id.
    Heap(u64),
}

/// Token for one arena allocation.
///
/// Deliberately neither `Clone` nor `Copy`: a frame is released by handing
/// the token back to [`Host::unstack`] exactly once.
#[derive(Debug, PartialEq, Eq)]
pub struct Frame {
    pub origin: FrameOrigin,
    pub offset: usize,
    pub len: usize,
}

/// Errors surfaced by host entry points.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("no such file: {0}")]
    NoSuchFile(FileId),
    #[error("no such driver: {0}")]
    NoSuchDriver(String),
    #[error("driver '{0}' is already registered")]
    DriverExists(String),
    #[error("driver pack ABI mismatch: host {host}, pack {pack}")]
    AbiMismatch { host: u32, pack: u32 },
    #[error("driver init failure for '{0}'")]
    InitFailed(String),
    #[error("the root directory already exists")]
    RootExists,
    #[error("worker pool is closed")]
    PoolClosed,
    #[error("thread spawn failure: {0}")]
    ThreadSpawn(String),
}

/// Thread-safe handle that schedules a coalesced async event for one file.
///
/// At most one delivery is pending per file at any time; firing while one
/// is pending is absorbed. The watcher observes "something changed" and
/// polls its own state.
#[derive(Clone)]
pub struct AsyncTrigger {
    inner: Arc<dyn Fn() -> bool + Send + Sync>,
}

impl AsyncTrigger {
    pub fn new(fire: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(fire),
        }
    }

    /// Returns false once the owning machine is gone.
    pub fn fire(&self) -> bool {
        (self.inner)()
    }
}

impl fmt::Debug for AsyncTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AsyncTrigger")
    }
}

/// The machine services available to drivers and continuations.
///
/// All methods must be called from the loop thread; [`AsyncTrigger`] and
/// the engine's cross-thread handle are the only ways in from outside.
pub trait Host {
    // ---- machine ----

    /// Monotonic milliseconds since the machine started.
    fn now(&self) -> u64;

    /// Queues a diagnostic message to the machine's single output sink.
    fn msg(&mut self, text: &str);

    /// Runs `task` on the next turn.
    fn defer(&mut self, task: DeferFn);

    /// Allocates a short-lived frame from the arena stack.
    fn stack(&mut self, len: usize) -> Frame;

    /// Releases a frame obtained from [`Host::stack`].
    fn unstack(&mut self, frame: Frame);

    /// The bytes backing a frame.
    fn frame(&mut self, frame: &Frame) -> &mut [u8];

    /// Arms a timer. `period_ms` makes it repeat until cancelled.
    fn set_timer(&mut self, delay_ms: u64, period_ms: Option<u64>, cb: TimerFn) -> TimerId;

    fn cancel_timer(&mut self, id: TimerId);

    /// Submits blocking work to the thread pool; `complete` runs on the
    /// loop thread with the work's output. Submission failure is
    /// synchronous and leaves `complete` unrun.
    fn start_work(&mut self, work: WorkFn, complete: CompleteFn) -> Result<(), HostError>;

    /// Spawns a dedicated long-lived thread.
    fn start_thread(&mut self, main: ThreadFn) -> Result<(), HostError>;

    /// Requests machine exit with the given status.
    fn exit(&mut self, status: ExitStatus);

    // ---- drivers ----

    fn driver_lookup(&self, name: &str) -> Option<DriverSpec>;

    // ---- files ----

    fn file_new(&mut self, driver: &str, init: FileInit) -> Result<FileId, HostError>;

    fn file_get(&self, id: FileId) -> Option<FileInfo>;

    /// Adds a counted reference; false when the id is dead.
    fn file_ref(&mut self, id: FileId) -> bool;

    /// Drops a counted reference; the last release destroys the file.
    fn file_unref(&mut self, id: FileId);

    fn set_mimetype(&mut self, id: FileId, mimetype: &str);

    /// Publishes the number of cached bytes the file's owner could shed.
    fn set_cache_hint(&mut self, id: FileId, bytes: u64);

    fn watch(&mut self, id: FileId, cb: WatchFn) -> Result<WatchId, HostError>;

    fn unwatch(&mut self, id: WatchId);

    /// Synchronously invokes each watcher of `id` in registration order.
    fn trigger(&mut self, id: FileId, event: FileEvent);

    /// Builds a thread-safe trigger delivering coalesced async events.
    fn async_trigger(&mut self, id: FileId) -> Result<AsyncTrigger, HostError>;

    /// Delivers a timer event to the file after `delay_ms`.
    fn trigger_timer(&mut self, id: FileId, delay_ms: u64) -> Result<(), HostError>;

    fn lock(&mut self, req: LockRequest) -> Result<LockToken, HostError>;

    /// Releases or cancels an acquisition. Idempotent.
    fn unlock(&mut self, token: LockToken);

    /// Dispatches a request through the file's driver. `Err` hands the
    /// rejected request back to the caller; its callback will not fire.
    fn request(&mut self, req: Request) -> Result<(), Request>;
}

/// Typed conveniences layered over the erased [`Host`] entry points.
pub trait HostExt: Host {
    /// [`Host::start_work`] with typed work output.
    fn start_work_with<T, W, F>(&mut self, work: W, complete: F) -> Result<(), HostError>
    where
        T: Send + 'static,
        W: FnOnce() -> T + Send + 'static,
        F: FnOnce(&mut dyn Host, T) + 'static,
    {
        self.start_work(
            Box::new(move || Box::new(work()) as WorkOutput),
            Box::new(move |host, out| {
                if let Ok(v) = out.downcast::<T>() {
                    complete(host, *v);
                }
            }),
        )
    }
}

impl<H: Host + ?Sized> HostExt for H {}

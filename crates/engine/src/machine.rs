// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The isolated machine
//!
//! Single-threaded cooperative scheduler multiplexing timers, deferred
//! closures, worker completions and cross-thread signals over one inbound
//! channel. All file state lives here and is only touched on the loop
//! thread; workers and long-lived threads come back in through
//! [`MachineHandle`] or an async trigger.

use crate::arena::Arena;
use crate::locks::LockEntry;
use crate::registry::{Registry, WatchSlot};
use crate::scheduler::Scheduler;
use crate::worker::WorkerPool;
use isle_core::{
    AsyncTrigger, Clock, CompleteFn, DeferFn, Driver, DriverPack, DriverSpec, EventKind,
    ExitStatus, FileEvent, FileId, FileInfo, FileInit, Frame, Host, HostError, LockGrant,
    LockMode, LockRequest, LockToken, ReqResult, Request, SendDeferFn, SystemClock, ThreadFn,
    TimerFn, TimerId, WatchFn, WatchId, WatchNote, WorkFn, WorkOutput, ABI_VERSION,
    DEFAULT_LOCK_TIMEOUT_MS,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Cache-eviction policy for the walker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UncachePolicy {
    /// Total cached bytes tolerated across all files.
    pub budget: u64,
    /// Walker period; a file is nudged at most once per period.
    pub period_ms: u64,
}

impl Default for UncachePolicy {
    fn default() -> Self {
        Self {
            budget: 64 * 1024 * 1024,
            period_ms: 1_000,
        }
    }
}

/// Construction parameters of a machine.
#[derive(Debug, Clone, Copy)]
pub struct MachineConfig {
    pub arena_size: usize,
    pub workers: usize,
    pub uncache: Option<UncachePolicy>,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            arena_size: 8 * 1024 * 1024,
            workers: 4,
            uncache: None,
        }
    }
}

/// What other threads may inject into the loop.
enum Inbound {
    Defer(SendDeferFn),
    Async(FileId),
    WorkDone(u64, WorkOutput),
}

/// What a fired timer does.
enum TimerAction {
    Task(TimerFn),
    FileTimer(FileId),
    LockDeadline(LockToken),
    Walker,
}

/// Cross-thread handle to a running machine.
#[derive(Clone)]
pub struct MachineHandle {
    tx: mpsc::Sender<Inbound>,
}

impl MachineHandle {
    /// Schedules a closure on the loop thread. Fails once the machine is
    /// gone.
    pub fn defer(
        &self,
        task: impl FnOnce(&mut dyn Host) + Send + 'static,
    ) -> Result<(), HostError> {
        self.tx
            .send(Inbound::Defer(Box::new(task)))
            .map_err(|_| HostError::PoolClosed)
    }
}

impl std::fmt::Debug for MachineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MachineHandle")
    }
}

/// The isolated machine: one loop, one registry, one arena, one driver
/// table.
pub struct Machine<C: Clock = SystemClock> {
    clock: C,
    started: Instant,
    status: Option<ExitStatus>,

    arena: Arena,
    scheduler: Scheduler,
    timer_actions: HashMap<TimerId, TimerAction>,
    next_timer: u64,

    registry: Registry,
    drivers: HashMap<String, DriverSpec>,
    watch_owner: HashMap<WatchId, FileId>,
    lock_owner: HashMap<LockToken, FileId>,
    next_watch: u64,
    next_lock: u64,

    deferred: VecDeque<DeferFn>,
    inbound_tx: mpsc::Sender<Inbound>,
    inbound_rx: mpsc::Receiver<Inbound>,

    pool: WorkerPool,
    completions: HashMap<u64, CompleteFn>,
    next_work: u64,
    outstanding_work: usize,

    uncache: Option<UncachePolicy>,
    msg_capture: Option<Vec<String>>,
}

impl Machine<SystemClock> {
    pub fn new(config: MachineConfig) -> Self {
        Self::with_clock(SystemClock, config)
    }
}

impl<C: Clock> Machine<C> {
    pub fn with_clock(clock: C, config: MachineConfig) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel();
        let started = clock.now();
        let mut machine = Self {
            clock,
            started,
            status: None,
            arena: Arena::new(config.arena_size),
            scheduler: Scheduler::new(),
            timer_actions: HashMap::new(),
            next_timer: 1,
            registry: Registry::default(),
            drivers: HashMap::new(),
            watch_owner: HashMap::new(),
            lock_owner: HashMap::new(),
            next_watch: 1,
            next_lock: 1,
            deferred: VecDeque::new(),
            inbound_tx,
            inbound_rx,
            pool: WorkerPool::new(config.workers),
            completions: HashMap::new(),
            next_work: 1,
            outstanding_work: 0,
            uncache: config.uncache,
            msg_capture: None,
        };
        if let Some(policy) = machine.uncache {
            machine.arm_timer(policy.period_ms, Some(policy.period_ms), TimerAction::Walker);
        }
        machine
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// A handle other threads use to reach the loop.
    pub fn handle(&self) -> MachineHandle {
        MachineHandle {
            tx: self.inbound_tx.clone(),
        }
    }

    /// Registers one driver.
    pub fn register_driver(&mut self, spec: DriverSpec) -> Result<(), HostError> {
        if self.drivers.contains_key(spec.name) {
            return Err(HostError::DriverExists(spec.name.to_string()));
        }
        self.drivers.insert(spec.name.to_string(), spec);
        Ok(())
    }

    /// Installs a driver pack after checking its ABI tag. Rejected packs
    /// install nothing.
    pub fn install_pack(&mut self, pack: DriverPack) -> Result<(), HostError> {
        if pack.abi != ABI_VERSION {
            return Err(HostError::AbiMismatch {
                host: ABI_VERSION,
                pack: pack.abi,
            });
        }
        for spec in &pack.drivers {
            if self.drivers.contains_key(spec.name) {
                return Err(HostError::DriverExists(spec.name.to_string()));
            }
        }
        for spec in pack.drivers {
            debug!(target: "isle::machine", driver = spec.name, "driver registered");
            self.drivers.insert(spec.name.to_string(), spec);
        }
        Ok(())
    }

    /// Creates the root directory file. Must run before any other file is
    /// minted so the root receives identifier 0.
    pub fn create_root(&mut self, driver: &str) -> Result<FileId, HostError> {
        if self.registry.next_id() != 0 {
            return Err(HostError::RootExists);
        }
        let id = self.file_new(driver, FileInit::default())?;
        debug_assert_eq!(id, FileId::ROOT);
        Ok(id)
    }

    /// Runs until an exit status is set.
    pub fn run(&mut self) -> ExitStatus {
        loop {
            loop {
                if let Some(status) = self.status.take() {
                    return status;
                }
                if !self.turn() {
                    break;
                }
            }
            if let Some(status) = self.status.take() {
                return status;
            }
            let park = self
                .scheduler
                .next_deadline()
                .map(|at| at.saturating_duration_since(self.clock.now()));
            let park = match park {
                Some(d) if d.is_zero() => continue,
                Some(d) => d,
                None => Duration::from_millis(500),
            };
            if let Ok(ev) = self.inbound_rx.recv_timeout(park) {
                self.dispatch_inbound(ev);
            }
        }
    }

    /// Runs until nothing is immediately runnable and no work is in
    /// flight on the pool. Future timer deadlines do not hold it; tests
    /// advance the clock and call it again.
    pub fn run_until_idle(&mut self) {
        loop {
            while self.turn() {}
            if self.status.is_some() || self.outstanding_work == 0 {
                return;
            }
            if let Ok(ev) = self.inbound_rx.recv_timeout(Duration::from_millis(10)) {
                self.dispatch_inbound(ev);
            }
        }
    }

    /// One dispatch pass: inbound, due timers, then the deferred closures
    /// registered before this turn. Returns whether anything ran.
    pub fn turn(&mut self) -> bool {
        let mut progressed = false;
        while let Ok(ev) = self.inbound_rx.try_recv() {
            progressed = true;
            self.dispatch_inbound(ev);
        }
        for tid in self.scheduler.fired(self.clock.now()) {
            progressed = true;
            self.fire_timer(tid);
        }
        for _ in 0..self.deferred.len() {
            match self.deferred.pop_front() {
                Some(task) => {
                    progressed = true;
                    task(self);
                }
                None => break,
            }
        }
        progressed
    }

    /// Exit status observed without consuming it.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.status
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn file_count(&self) -> usize {
        self.registry.len()
    }

    /// Records every `msg` for later inspection.
    pub fn capture_messages(&mut self) {
        self.msg_capture = Some(Vec::new());
    }

    pub fn captured_messages(&self) -> &[String] {
        self.msg_capture.as_deref().unwrap_or(&[])
    }

    // ---- internals ----

    fn dispatch_inbound(&mut self, ev: Inbound) {
        match ev {
            Inbound::Defer(task) => task(self),
            Inbound::Async(id) => self.deliver_async(id),
            Inbound::WorkDone(wid, out) => {
                self.outstanding_work = self.outstanding_work.saturating_sub(1);
                if let Some(complete) = self.completions.remove(&wid) {
                    complete(self, out);
                }
            }
        }
    }

    fn fire_timer(&mut self, tid: TimerId) {
        match self.timer_actions.remove(&tid) {
            Some(TimerAction::Task(mut cb)) => {
                cb(self);
                if self.scheduler.contains(tid) {
                    self.timer_actions.insert(tid, TimerAction::Task(cb));
                }
            }
            Some(TimerAction::FileTimer(id)) => {
                self.trigger(id, FileEvent::runtime(EventKind::Timer));
            }
            Some(TimerAction::LockDeadline(token)) => self.lock_deadline(token),
            Some(TimerAction::Walker) => {
                self.walk_uncache();
                if self.scheduler.contains(tid) {
                    self.timer_actions.insert(tid, TimerAction::Walker);
                }
            }
            None => {}
        }
    }

    fn arm_timer(&mut self, delay_ms: u64, period_ms: Option<u64>, action: TimerAction) -> TimerId {
        let tid = TimerId(self.next_timer);
        self.next_timer += 1;
        let fires_at = self.clock.now() + Duration::from_millis(delay_ms);
        self.scheduler
            .arm(tid, fires_at, period_ms.map(Duration::from_millis));
        self.timer_actions.insert(tid, action);
        tid
    }

    fn deliver_async(&mut self, id: FileId) {
        match self.registry.get_mut(id) {
            Some(slot) => {
                if let Some(gate) = &slot.async_gate {
                    gate.store(false, Ordering::Release);
                }
            }
            None => return,
        }
        self.trigger(id, FileEvent::runtime(EventKind::Async));
    }

    /// Drops one reference; returns true when that destroyed the file.
    fn unref_internal(&mut self, id: FileId) -> bool {
        {
            let Some(slot) = self.registry.get_mut(id) else {
                return false;
            };
            debug_assert!(slot.refcnt > 0, "refcount underflow for file {id}");
            slot.refcnt = slot.refcnt.saturating_sub(1);
            if slot.refcnt > 0 || slot.dying {
                return false;
            }
            slot.dying = true;
        }

        self.trigger(id, FileEvent::runtime(EventKind::Delete));

        if let Some(slot) = self.registry.get_mut(id) {
            for w in slot.watches.drain(..) {
                self.watch_owner.remove(&w.id);
            }
        }

        let instance = self.registry.get_mut(id).and_then(|s| s.instance.take());
        match instance {
            Some(mut instance) => {
                instance.deinit(self, id);
                if let Some(slot) = self.registry.get(id) {
                    debug_assert!(slot.locks.is_empty(), "file {id} deleted with live locks");
                }
                self.registry.remove(id);
            }
            None => {
                // A dispatch is in flight; it finishes the teardown.
                if let Some(slot) = self.registry.get_mut(id) {
                    slot.doomed = true;
                }
            }
        }
        true
    }

    /// Tears down a file whose driver init failed: pending acquisitions
    /// are cancelled, nothing else ever saw the id.
    fn scrap_failed_init(&mut self, id: FileId) {
        let Some(mut slot) = self.registry.remove(id) else {
            return;
        };
        for w in slot.watches.drain(..) {
            self.watch_owner.remove(&w.id);
        }
        let entries: Vec<LockEntry> = std::mem::take(&mut slot.locks.entries);
        drop(slot);
        for mut entry in entries {
            if let Some(t) = entry.deadline.take() {
                self.cancel_timer(t);
            }
            self.lock_owner.remove(&entry.token);
            if let Some(cb) = entry.cb.take() {
                cb(
                    self,
                    LockGrant {
                        token: entry.token,
                        file: id,
                        ok: false,
                    },
                );
            }
        }
    }

    /// Delivers the grant callback of an already-granted entry, honoring
    /// auto-release.
    fn deliver_grant(&mut self, file: FileId, token: LockToken) {
        let taken = {
            let Some(slot) = self.registry.get_mut(file) else {
                return;
            };
            let Some(idx) = slot.locks.position(token) else {
                return;
            };
            let entry = &mut slot.locks.entries[idx];
            (entry.cb.take(), entry.manual)
        };
        let (cb, manual) = taken;
        if let Some(cb) = cb {
            cb(self, LockGrant {
                token,
                file,
                ok: true,
            });
        }
        if !manual {
            self.unlock(token);
        }
    }

    /// Grants the maximal homogeneous prefix of the queue.
    fn wake(&mut self, file: FileId) {
        loop {
            let next = {
                let Some(slot) = self.registry.get_mut(file) else {
                    return;
                };
                let g = slot.locks.granted_prefix();
                if g >= slot.locks.len() || !slot.locks.grantable(g) {
                    return;
                }
                let entry = &mut slot.locks.entries[g];
                entry.granted = true;
                (
                    entry.token,
                    entry.manual,
                    entry.mode == LockMode::Exclusive,
                    entry.cb.take(),
                    entry.deadline.take(),
                )
            };
            let (token, manual, exclusive, cb, deadline) = next;
            if let Some(t) = deadline {
                self.cancel_timer(t);
            }
            if let Some(cb) = cb {
                cb(self, LockGrant {
                    token,
                    file,
                    ok: true,
                });
            }
            if !manual {
                self.unlock(token);
            }
            if exclusive {
                return;
            }
        }
    }

    /// Cancels every queued entry behind a granted exclusive.
    fn cancel_blocked_tail(&mut self, file: FileId) {
        loop {
            let taken = {
                let Some(slot) = self.registry.get_mut(file) else {
                    return;
                };
                let g = slot.locks.granted_prefix();
                if g >= slot.locks.len() {
                    return;
                }
                let mut entry = slot.locks.remove(g);
                (entry.token, entry.cb.take(), entry.deadline.take())
            };
            let (token, cb, deadline) = taken;
            self.lock_owner.remove(&token);
            if let Some(t) = deadline {
                self.cancel_timer(t);
            }
            if let Some(cb) = cb {
                cb(self, LockGrant {
                    token,
                    file,
                    ok: false,
                });
            }
            self.unref_internal(file);
        }
    }

    /// A queued entry's deadline elapsed.
    fn lock_deadline(&mut self, token: LockToken) {
        let Some(&file) = self.lock_owner.get(&token) else {
            return;
        };
        let cb = {
            let Some(slot) = self.registry.get_mut(file) else {
                return;
            };
            let Some(idx) = slot.locks.position(token) else {
                return;
            };
            if slot.locks.entries[idx].granted {
                return;
            }
            let mut entry = slot.locks.remove(idx);
            entry.cb.take()
        };
        self.lock_owner.remove(&token);
        if let Some(cb) = cb {
            cb(self, LockGrant {
                token,
                file,
                ok: false,
            });
        }
        self.unref_internal(file);
        self.wake(file);
    }

    fn walk_uncache(&mut self) {
        let Some(policy) = self.uncache else {
            return;
        };
        let now = self.now();
        let mut candidates: Vec<(FileId, u64, u64, u64)> = self
            .registry
            .iter()
            .filter(|s| s.cache_hint > 0 && !s.dying)
            .map(|s| (s.id, s.cache_hint, s.last_request, s.last_uncache))
            .collect();
        let mut total: u64 = candidates.iter().map(|c| c.1).sum();
        if total <= policy.budget {
            return;
        }
        candidates.sort_by_key(|&(id, _, last_request, _)| (last_request, id));
        for (id, hint, _, last_uncache) in candidates {
            if total <= policy.budget {
                break;
            }
            if last_uncache != 0 && now.saturating_sub(last_uncache) < policy.period_ms {
                continue;
            }
            self.trigger(id, FileEvent::runtime(EventKind::Uncache));
            total = total.saturating_sub(hint);
        }
    }
}

impl<C: Clock> Host for Machine<C> {
    fn now(&self) -> u64 {
        self.clock
            .now()
            .saturating_duration_since(self.started)
            .as_millis() as u64
    }

    fn msg(&mut self, text: &str) {
        // Staged through the arena so the sink sees a stable copy, the
        // same way every other continuation frame travels.
        let frame = self.arena.stack(text.len());
        self.arena.bytes_mut(&frame).copy_from_slice(text.as_bytes());
        let staged = String::from_utf8_lossy(self.arena.bytes_mut(&frame)).into_owned();
        tracing::info!(target: "isle::msg", "{}", staged.trim_end());
        if let Some(capture) = &mut self.msg_capture {
            capture.push(staged);
        }
        self.arena.unstack(frame);
    }

    fn defer(&mut self, task: DeferFn) {
        self.deferred.push_back(task);
    }

    fn stack(&mut self, len: usize) -> Frame {
        self.arena.stack(len)
    }

    fn unstack(&mut self, frame: Frame) {
        self.arena.unstack(frame);
    }

    fn frame(&mut self, frame: &Frame) -> &mut [u8] {
        self.arena.bytes_mut(frame)
    }

    fn set_timer(&mut self, delay_ms: u64, period_ms: Option<u64>, cb: TimerFn) -> TimerId {
        self.arm_timer(delay_ms, period_ms, TimerAction::Task(cb))
    }

    fn cancel_timer(&mut self, id: TimerId) {
        self.scheduler.cancel(id);
        self.timer_actions.remove(&id);
    }

    fn start_work(&mut self, work: WorkFn, complete: CompleteFn) -> Result<(), HostError> {
        let wid = self.next_work;
        self.next_work += 1;
        self.completions.insert(wid, complete);
        let tx = self.inbound_tx.clone();
        let job = Box::new(move || {
            let out = work();
            let _ = tx.send(Inbound::WorkDone(wid, out));
        });
        match self.pool.submit(job) {
            Ok(()) => {
                self.outstanding_work += 1;
                Ok(())
            }
            Err(_) => {
                self.completions.remove(&wid);
                Err(HostError::PoolClosed)
            }
        }
    }

    fn start_thread(&mut self, main: ThreadFn) -> Result<(), HostError> {
        std::thread::Builder::new()
            .name("isle-thread".to_string())
            .spawn(main)
            .map(|_| ())
            .map_err(|e| HostError::ThreadSpawn(e.to_string()))
    }

    fn exit(&mut self, status: ExitStatus) {
        self.status = Some(status);
    }

    fn driver_lookup(&self, name: &str) -> Option<DriverSpec> {
        self.drivers.get(name).cloned()
    }

    fn file_new(&mut self, driver: &str, init: FileInit) -> Result<FileId, HostError> {
        let spec = self
            .drivers
            .get(driver)
            .cloned()
            .ok_or_else(|| HostError::NoSuchDriver(driver.to_string()))?;
        let name = spec.name;
        let mut instance: Box<dyn Driver> = (spec.make)();
        let id = self.registry.insert(spec);
        if let Some(slot) = self.registry.get_mut(id) {
            slot.npath = init.npath;
            slot.param = init.param;
        }
        let ok = instance.init(self, id);
        match self.registry.get_mut(id) {
            Some(slot) if ok => {
                slot.instance = Some(instance);
                Ok(id)
            }
            Some(_) => {
                self.scrap_failed_init(id);
                Err(HostError::InitFailed(name.to_string()))
            }
            None => Err(HostError::InitFailed(name.to_string())),
        }
    }

    fn file_get(&self, id: FileId) -> Option<FileInfo> {
        self.registry.get(id).map(|slot| slot.info())
    }

    fn file_ref(&mut self, id: FileId) -> bool {
        match self.registry.get_mut(id) {
            Some(slot) => {
                slot.refcnt += 1;
                true
            }
            None => false,
        }
    }

    fn file_unref(&mut self, id: FileId) {
        self.unref_internal(id);
    }

    fn set_mimetype(&mut self, id: FileId, mimetype: &str) {
        if let Some(slot) = self.registry.get_mut(id) {
            slot.mimetype = Some(mimetype.to_string());
        }
    }

    fn set_cache_hint(&mut self, id: FileId, bytes: u64) {
        if let Some(slot) = self.registry.get_mut(id) {
            slot.cache_hint = bytes;
        }
    }

    fn watch(&mut self, id: FileId, cb: WatchFn) -> Result<WatchId, HostError> {
        let wid = WatchId(self.next_watch);
        let Some(slot) = self.registry.get_mut(id) else {
            return Err(HostError::NoSuchFile(id));
        };
        self.next_watch += 1;
        slot.watches.push(WatchSlot { id: wid, cb: Some(cb) });
        self.watch_owner.insert(wid, id);
        Ok(wid)
    }

    fn unwatch(&mut self, id: WatchId) {
        let Some(fid) = self.watch_owner.remove(&id) else {
            return;
        };
        if let Some(slot) = self.registry.get_mut(fid) {
            slot.watches.retain(|w| w.id != id);
        }
    }

    fn trigger(&mut self, id: FileId, event: FileEvent) {
        let now = self.now();
        let watch_ids: Vec<WatchId> = {
            let Some(slot) = self.registry.get_mut(id) else {
                return;
            };
            match event.kind {
                EventKind::Update => slot.last_update = now,
                EventKind::Uncache => slot.last_uncache = now,
                _ => {}
            }
            slot.watches.iter().map(|w| w.id).collect()
        };
        for wid in watch_ids {
            let cb = match self.registry.get_mut(id) {
                Some(slot) => match slot.watches.iter_mut().find(|w| w.id == wid) {
                    Some(w) => w.cb.take(),
                    None => continue,
                },
                None => return,
            };
            // An absent callback is one already running further up the
            // stack; reentrant triggers skip it.
            let Some(mut cb) = cb else { continue };
            cb(self, WatchNote { file: id, event });
            if let Some(slot) = self.registry.get_mut(id) {
                if let Some(w) = slot.watches.iter_mut().find(|w| w.id == wid) {
                    if w.cb.is_none() {
                        w.cb = Some(cb);
                    }
                }
            }
        }
    }

    fn async_trigger(&mut self, id: FileId) -> Result<AsyncTrigger, HostError> {
        let Some(slot) = self.registry.get_mut(id) else {
            return Err(HostError::NoSuchFile(id));
        };
        let gate = Arc::clone(
            slot.async_gate
                .get_or_insert_with(|| Arc::new(AtomicBool::new(false))),
        );
        let tx = self.inbound_tx.clone();
        Ok(AsyncTrigger::new(move || {
            if gate.swap(true, Ordering::AcqRel) {
                return true;
            }
            if tx.send(Inbound::Async(id)).is_ok() {
                true
            } else {
                gate.store(false, Ordering::Release);
                false
            }
        }))
    }

    fn trigger_timer(&mut self, id: FileId, delay_ms: u64) -> Result<(), HostError> {
        if self.registry.get(id).is_none() {
            return Err(HostError::NoSuchFile(id));
        }
        self.arm_timer(delay_ms, None, TimerAction::FileTimer(id));
        Ok(())
    }

    fn lock(&mut self, req: LockRequest) -> Result<LockToken, HostError> {
        let LockRequest {
            file,
            mode,
            timeout_ms,
            manual,
            cb,
        } = req;
        if self.registry.get(file).is_none() {
            return Err(HostError::NoSuchFile(file));
        }
        let token = LockToken(self.next_lock);
        self.next_lock += 1;
        self.lock_owner.insert(token, file);
        self.file_ref(file);
        let immediate = match self.registry.get_mut(file) {
            Some(slot) => slot.locks.append(token, mode, manual, cb),
            None => false,
        };
        if immediate {
            self.deliver_grant(file, token);
        } else {
            let ms = timeout_ms.unwrap_or(DEFAULT_LOCK_TIMEOUT_MS);
            let tid = self.arm_timer(ms, None, TimerAction::LockDeadline(token));
            if let Some(slot) = self.registry.get_mut(file) {
                if let Some(idx) = slot.locks.position(token) {
                    slot.locks.entries[idx].deadline = Some(tid);
                }
            }
        }
        Ok(token)
    }

    fn unlock(&mut self, token: LockToken) {
        let Some(&file) = self.lock_owner.get(&token) else {
            return;
        };
        self.lock_owner.remove(&token);
        let removed = {
            let Some(slot) = self.registry.get_mut(file) else {
                return;
            };
            let Some(idx) = slot.locks.position(token) else {
                return;
            };
            let granted = slot.locks.entries[idx].granted;
            let exclusive = slot.locks.entries[idx].mode == LockMode::Exclusive;
            let next_exclusive = slot
                .locks
                .entries
                .get(idx + 1)
                .map_or(false, |e| e.mode == LockMode::Exclusive);
            let update = (granted && exclusive) || (idx == 0 && next_exclusive);
            let cascade = !granted
                && idx >= 1
                && slot.locks.entries[idx - 1].granted
                && slot.locks.entries[idx - 1].mode == LockMode::Exclusive;
            let mut entry = slot.locks.remove(idx);
            (granted, update, cascade, entry.cb.take(), entry.deadline.take())
        };
        let (granted, update, cascade, cb, deadline) = removed;
        if let Some(t) = deadline {
            self.cancel_timer(t);
        }

        if !granted {
            // Cancelled while still queued.
            if let Some(cb) = cb {
                cb(self, LockGrant {
                    token,
                    file,
                    ok: false,
                });
            }
            self.unref_internal(file);
            if cascade {
                self.cancel_blocked_tail(file);
            } else {
                self.wake(file);
            }
            return;
        }

        if self.unref_internal(file) {
            return;
        }
        if update {
            self.trigger(file, FileEvent::runtime(EventKind::Update));
        }
        self.wake(file);
    }

    fn request(&mut self, mut req: Request) -> Result<(), Request> {
        let id = req.file;
        let now = self.now();
        let cat = req.payload.category();
        let instance = match self.registry.get_mut(id) {
            Some(slot) => {
                slot.last_request = now;
                if !slot.spec.cats.contains(&cat) {
                    req.result = ReqResult::Invalid;
                    return Err(req);
                }
                match slot.instance.take() {
                    Some(instance) => instance,
                    None => {
                        // The driver is mid-dispatch; synchronous
                        // re-entry is not served.
                        warn!(target: "isle::machine", file = %id, "request re-entered a dispatching driver");
                        req.result = ReqResult::Aborted;
                        return Err(req);
                    }
                }
            }
            None => {
                req.result = ReqResult::Invalid;
                return Err(req);
            }
        };
        let mut instance = instance;
        let flow = instance.handle(self, id, req);
        let mut instance = Some(instance);
        let doomed = match self.registry.get_mut(id) {
            Some(slot) if slot.doomed => true,
            Some(slot) => {
                slot.instance = instance.take();
                false
            }
            None => false,
        };
        if doomed {
            if let Some(mut inst) = instance.take() {
                inst.deinit(self, id);
            }
            self.registry.remove(id);
        }
        match flow {
            isle_core::Flow::Accepted => Ok(()),
            isle_core::Flow::Rejected(r) => Err(r),
        }
    }
}

#[cfg(test)]
#[path = "machine_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Native-file byte stream driver (`isle.bin`)
//!
//! Every native I/O operation runs on the worker pool; the loop thread
//! only queues tasks and completes requests. Tasks are chained one at a
//! time so operations on the same file never interleave on disk. A small
//! read cache is kept per file and advertised through the cache hint; the
//! uncache nudge drops it under a short exclusive lock so active work is
//! not disturbed.

use isle_core::{
    Driver, DriverFlags, DriverSpec, EventKind, FileId, Flow, Host, HostExt, LockMode,
    LockRequest, Payload, ReqCategory, ReqResult, Request, StreamAccess, StreamOp,
};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Single-read ceiling, matching the largest block the cache will hold.
const READ_MAX: u64 = 8 * 1024 * 1024;

/// How long the uncache response waits for an exclusive lock.
const UNCACHE_LOCK_TIMEOUT_MS: u64 = 100;

pub fn spec() -> DriverSpec {
    DriverSpec {
        name: "isle.bin",
        cats: &[ReqCategory::Stream],
        flags: DriverFlags {
            npoll: true,
            suspend: true,
            ..DriverFlags::default()
        },
        make: || Box::new(BinDriver::new(Preset::Param)),
    }
}

pub fn spec_read_only() -> DriverSpec {
    DriverSpec {
        name: "isle.bin.r",
        cats: &[ReqCategory::Stream],
        flags: DriverFlags {
            npoll: true,
            suspend: true,
            ..DriverFlags::default()
        },
        make: || Box::new(BinDriver::new(Preset::ReadOnly)),
    }
}

pub fn spec_write_only() -> DriverSpec {
    DriverSpec {
        name: "isle.bin.w",
        cats: &[ReqCategory::Stream],
        flags: DriverFlags {
            npoll: true,
            suspend: true,
            ..DriverFlags::default()
        },
        make: || Box::new(BinDriver::new(Preset::WriteOnly)),
    }
}

#[derive(Clone, Copy)]
enum Preset {
    /// Access comes from the file's `param` (`r`, `w`, `rw`).
    Param,
    ReadOnly,
    WriteOnly,
}

enum TaskOp {
    Read { offset: u64, size: u64 },
    Write { offset: u64, buf: Vec<u8> },
    Truncate { size: u64 },
}

struct Task {
    req: Request,
    op: TaskOp,
}

struct CacheBlock {
    offset: u64,
    bytes: Vec<u8>,
    file_len: u64,
}

struct BinState {
    npath: PathBuf,
    read: bool,
    write: bool,
    busy: bool,
    queue: VecDeque<Task>,
    cache: Option<CacheBlock>,
}

pub struct BinDriver {
    preset: Preset,
    st: Option<Rc<RefCell<BinState>>>,
}

impl BinDriver {
    fn new(preset: Preset) -> Self {
        Self { preset, st: None }
    }
}

impl Driver for BinDriver {
    fn init(&mut self, host: &mut dyn Host, file: FileId) -> bool {
        let Some(info) = host.file_get(file) else {
            return false;
        };
        let Some(npath) = info.npath else {
            host.msg("isle.bin: a native path is required\n");
            return false;
        };
        let (read, write) = match self.preset {
            Preset::ReadOnly => (true, false),
            Preset::WriteOnly => (false, true),
            Preset::Param => match info.param.as_deref() {
                None | Some("rw") | Some("wr") => (true, true),
                Some("r") => (true, false),
                Some("w") => (false, true),
                Some(other) => {
                    host.msg(&format!("isle.bin: unknown access param '{other}'\n"));
                    return false;
                }
            },
        };
        let st = Rc::new(RefCell::new(BinState {
            npath,
            read,
            write,
            busy: false,
            queue: VecDeque::new(),
            cache: None,
        }));
        host.set_mimetype(file, "application/octet-stream");

        // Drop the cache when the machine asks, without disturbing
        // in-flight work: short-timeout exclusive lock, auto-released.
        let watched = Rc::clone(&st);
        let _ = host.watch(
            file,
            Box::new(move |host, note| {
                if note.event.kind != EventKind::Uncache {
                    return;
                }
                let st = Rc::clone(&watched);
                let _ = host.lock(
                    LockRequest::new(note.file, LockMode::Exclusive, move |host, grant| {
                        if grant.ok {
                            st.borrow_mut().cache = None;
                            host.set_cache_hint(grant.file, 0);
                        }
                    })
                    .timeout_ms(UNCACHE_LOCK_TIMEOUT_MS),
                );
            }),
        );

        self.st = Some(st);
        true
    }

    fn deinit(&mut self, host: &mut dyn Host, _file: FileId) {
        if let Some(st) = self.st.take() {
            let mut st = st.borrow_mut();
            while let Some(task) = st.queue.pop_front() {
                task.req.finish(host, ReqResult::Aborted);
            }
        }
    }

    fn handle(&mut self, host: &mut dyn Host, file: FileId, mut req: Request) -> Flow {
        let Some(st) = self.st.clone() else {
            req.result = ReqResult::Aborted;
            return Flow::Rejected(req);
        };
        let op = match &mut req.payload {
            Payload::Stream(StreamOp::Access { out }) => {
                let s = st.borrow();
                *out = StreamAccess {
                    read: s.read,
                    write: s.write,
                };
                drop(s);
                req.finish(host, ReqResult::Ok);
                return Flow::Accepted;
            }
            Payload::Stream(StreamOp::Read { offset, size, out, tail }) => {
                if !st.borrow().read {
                    req.finish(host, ReqResult::Aborted);
                    return Flow::Accepted;
                }
                let (offset, size) = (*offset, (*size).min(READ_MAX));
                let hit = {
                    let s = st.borrow();
                    s.cache.as_ref().and_then(|cache| {
                        let end = offset.saturating_add(size);
                        let cache_end = cache.offset + cache.bytes.len() as u64;
                        (offset >= cache.offset && end <= cache_end).then(|| {
                            let lo = (offset - cache.offset) as usize;
                            let hi = (end - cache.offset) as usize;
                            (cache.bytes[lo..hi].to_vec(), end >= cache.file_len)
                        })
                    })
                };
                if let Some((bytes, at_end)) = hit {
                    out.extend_from_slice(&bytes);
                    *tail = at_end;
                    req.finish(host, ReqResult::Ok);
                    return Flow::Accepted;
                }
                TaskOp::Read { offset, size }
            }
            Payload::Stream(StreamOp::Write { offset, buf, .. }) => {
                if !st.borrow().write {
                    req.finish(host, ReqResult::Aborted);
                    return Flow::Accepted;
                }
                TaskOp::Write {
                    offset: *offset,
                    buf: std::mem::take(buf),
                }
            }
            Payload::Stream(StreamOp::Truncate { size }) => {
                if !st.borrow().write {
                    req.finish(host, ReqResult::Aborted);
                    return Flow::Accepted;
                }
                TaskOp::Truncate { size: *size }
            }
            _ => {
                req.result = ReqResult::Invalid;
                return Flow::Rejected(req);
            }
        };
        st.borrow_mut().queue.push_back(Task { req, op });
        start_next(host, file, &st);
        Flow::Accepted
    }
}

/// Starts the next queued task unless one is already on the pool.
fn start_next(host: &mut dyn Host, file: FileId, st: &Rc<RefCell<BinState>>) {
    let (task, npath) = {
        let mut s = st.borrow_mut();
        if s.busy {
            return;
        }
        let Some(task) = s.queue.pop_front() else {
            return;
        };
        s.busy = true;
        (task, s.npath.clone())
    };
    let Task { req, op } = task;
    match op {
        TaskOp::Read { offset, size } => submit(
            host,
            st,
            file,
            req,
            move || read_block(&npath, offset, size),
            move |host, st, file, req, (bytes, file_len): (Vec<u8>, u64)| {
                if let Payload::Stream(StreamOp::Read { out, tail, .. }) = &mut req.payload {
                    out.extend_from_slice(&bytes);
                    *tail = offset + bytes.len() as u64 >= file_len;
                }
                st.borrow_mut().cache = Some(CacheBlock {
                    offset,
                    bytes,
                    file_len,
                });
                let cached = st.borrow().cache.as_ref().map_or(0, |c| c.bytes.len());
                host.set_cache_hint(file, cached as u64);
                ReqResult::Ok
            },
        ),
        TaskOp::Write { offset, buf } => submit(
            host,
            st,
            file,
            req,
            move || write_block(&npath, offset, &buf).map(|()| buf.len() as u64),
            move |host, st, file, req, written: u64| {
                if let Payload::Stream(StreamOp::Write { consumed, .. }) = &mut req.payload {
                    *consumed = written;
                }
                st.borrow_mut().cache = None;
                host.set_cache_hint(file, 0);
                ReqResult::Ok
            },
        ),
        TaskOp::Truncate { size } => submit(
            host,
            st,
            file,
            req,
            move || truncate_file(&npath, size),
            move |host, st, file, _req, (): ()| {
                st.borrow_mut().cache = None;
                host.set_cache_hint(file, 0);
                ReqResult::Ok
            },
        ),
    }
}

/// Runs one native operation off-loop and completes the request on the
/// loop thread, then chains the next task.
fn submit<T: Send + 'static>(
    host: &mut dyn Host,
    st: &Rc<RefCell<BinState>>,
    file: FileId,
    req: Request,
    work: impl FnOnce() -> io::Result<T> + Send + 'static,
    apply: impl FnOnce(&mut dyn Host, &Rc<RefCell<BinState>>, FileId, &mut Request, T) -> ReqResult
        + 'static,
) {
    let parked = Rc::new(RefCell::new(Some(req)));
    let in_cb = Rc::clone(&parked);
    let st_cb = Rc::clone(st);
    let outcome = host.start_work_with(work, move |host, result: io::Result<T>| {
        let Some(mut req) = in_cb.borrow_mut().take() else {
            return;
        };
        let verdict = match result {
            Ok(value) => apply(host, &st_cb, file, &mut req, value),
            Err(e) => {
                host.msg(&format!("isle.bin: native i/o failure: {e}\n"));
                ReqResult::Aborted
            }
        };
        req.finish(host, verdict);
        st_cb.borrow_mut().busy = false;
        start_next(host, file, &st_cb);
    });
    if outcome.is_err() {
        if let Some(req) = parked.borrow_mut().take() {
            req.finish(host, ReqResult::Aborted);
        }
        st.borrow_mut().busy = false;
    }
}

fn read_block(path: &Path, offset: u64, size: u64) -> io::Result<(Vec<u8>, u64)> {
    let mut f = File::open(path)?;
    let file_len = f.metadata()?.len();
    f.seek(SeekFrom::Start(offset))?;
    let mut buf = Vec::with_capacity(size as usize);
    f.take(size).read_to_end(&mut buf)?;
    Ok((buf, file_len))
}

fn write_block(path: &Path, offset: u64, buf: &[u8]) -> io::Result<()> {
    let mut f = OpenOptions::new().write(true).create(true).open(path)?;
    f.seek(SeekFrom::Start(offset))?;
    f.write_all(buf)
}

fn truncate_file(path: &Path, size: u64) -> io::Result<()> {
    let f = OpenOptions::new().write(true).create(true).open(path)?;
    f.set_len(size)
}

#[cfg(test)]
#[path = "bin_tests.rs"]
mod tests;

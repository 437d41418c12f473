// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Hierarchical name resolution over directory files
//!
//! One segment per round: shared-lock the base, ask it to find the name,
//! descend (creating a directory child first when asked to), and release
//! the lock before the next round so no two locks are ever held at once.
//! The path bytes live in an arena frame for the duration of the walk.

use isle_core::{
    path, DirEntry, DirOp, FileId, FileInit, Frame, Host, LockMode, LockRequest, LockToken,
    Payload, Request, DIR_DRIVER,
};
use std::cell::RefCell;
use std::rc::Rc;

/// A resolution to run with [`pathfind`].
#[derive(Debug, Clone)]
pub struct PathFind {
    /// Starting directory; `None` (and any absolute path) means the root.
    pub base: Option<FileId>,
    pub path: String,
    /// Create missing intermediate directories.
    pub create: bool,
}

impl PathFind {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            base: None,
            path: path.into(),
            create: false,
        }
    }

    pub fn create(mut self) -> Self {
        self.create = true;
        self
    }

    pub fn rooted_at(mut self, base: FileId) -> Self {
        self.base = Some(base);
        self
    }
}

/// Terminal state of a resolution.
///
/// An empty remainder means fully resolved and `base` holds the final
/// file; otherwise `base` is the deepest directory reached and
/// `remainder` starts at the first unresolved segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathResult {
    pub base: FileId,
    pub remainder: String,
}

impl PathResult {
    pub fn resolved(&self) -> bool {
        self.remainder.is_empty()
    }
}

type PathFindFn = Box<dyn FnOnce(&mut dyn Host, PathResult)>;

struct Walk {
    frame: Frame,
    off: usize,
    len: usize,
    base: FileId,
    create: bool,
    cb: PathFindFn,
}

/// Resolves `spec` and calls `cb` with the terminal state.
pub fn pathfind(
    host: &mut dyn Host,
    spec: PathFind,
    cb: impl FnOnce(&mut dyn Host, PathResult) + 'static,
) {
    let normalized = path::normalize(&spec.path);
    let base = if normalized.starts_with('/') {
        FileId::ROOT
    } else {
        spec.base.unwrap_or(FileId::ROOT)
    };
    let frame = host.stack(normalized.len());
    host.frame(&frame).copy_from_slice(normalized.as_bytes());
    let walk = Walk {
        frame,
        off: 0,
        len: normalized.len(),
        base,
        create: spec.create,
        cb: Box::new(cb),
    };
    step(host, walk);
}

fn remainder(host: &mut dyn Host, w: &Walk) -> String {
    let bytes = host.frame(&w.frame);
    String::from_utf8_lossy(&bytes[w.off..w.len]).into_owned()
}

fn finish(host: &mut dyn Host, w: Walk) {
    let rest = remainder(host, &w);
    let Walk { frame, base, cb, .. } = w;
    host.unstack(frame);
    cb(host, PathResult {
        base,
        remainder: rest,
    });
}

fn step(host: &mut dyn Host, mut w: Walk) {
    loop {
        let bytes = host.frame(&w.frame);
        if w.off < w.len && bytes[w.off] == b'/' {
            w.off += 1;
        } else {
            break;
        }
    }
    if w.off >= w.len {
        finish(host, w);
        return;
    }
    let name = {
        let bytes = host.frame(&w.frame);
        let mut end = w.off;
        while end < w.len && bytes[end] != b'/' {
            end += 1;
        }
        String::from_utf8_lossy(&bytes[w.off..end]).into_owned()
    };

    let base = w.base;
    if host.file_get(base).is_none() {
        finish(host, w);
        return;
    }
    let lock = LockRequest::new(base, LockMode::Shared, move |host, grant| {
        if !grant.ok {
            finish(host, w);
            return;
        }
        find_segment(host, w, grant.token, name);
    })
    .manual();
    let _ = host.lock(lock);
}

fn find_segment(host: &mut dyn Host, w: Walk, token: LockToken, name: String) {
    let base = w.base;
    let parked = Rc::new(RefCell::new(Some(w)));
    let st = Rc::clone(&parked);
    let req = Request::new(
        base,
        Payload::Dir(DirOp::Find {
            name: name.clone(),
            out: None,
        }),
        move |host, reply| {
            let Some(w) = st.borrow_mut().take() else {
                return;
            };
            let found = match reply.payload {
                Payload::Dir(DirOp::Find { out, .. }) => out,
                _ => None,
            };
            match found {
                Some(entry) if reply.result.is_ok() => {
                    host.unlock(token);
                    descend(host, w, entry.file, name.len());
                }
                _ if w.create => add_segment(host, w, token, name),
                _ => {
                    host.unlock(token);
                    finish(host, w);
                }
            }
        },
    );
    if host.request(req).is_err() {
        if let Some(w) = parked.borrow_mut().take() {
            host.unlock(token);
            finish(host, w);
        }
    }
}

fn add_segment(host: &mut dyn Host, w: Walk, token: LockToken, name: String) {
    let base = w.base;
    let child = match host.file_new(DIR_DRIVER, FileInit::default()) {
        Ok(id) => id,
        Err(_) => {
            host.unlock(token);
            finish(host, w);
            return;
        }
    };
    let seg = name.len();
    let parked = Rc::new(RefCell::new(Some(w)));
    let st = Rc::clone(&parked);
    let req = Request::new(
        base,
        Payload::Dir(DirOp::Add {
            entry: DirEntry {
                name,
                file: child,
                weak: false,
            },
            done: false,
        }),
        move |host, reply| {
            let Some(w) = st.borrow_mut().take() else {
                return;
            };
            host.unlock(token);
            let attached = reply.result.is_ok()
                && matches!(reply.payload, Payload::Dir(DirOp::Add { done: true, .. }));
            // Drop the creation reference; an attached child is kept
            // alive by its directory.
            host.file_unref(child);
            if attached {
                descend(host, w, child, seg);
            } else {
                finish(host, w);
            }
        },
    );
    if host.request(req).is_err() {
        if let Some(w) = parked.borrow_mut().take() {
            host.unlock(token);
            host.file_unref(child);
            finish(host, w);
        }
    }
}

fn descend(host: &mut dyn Host, mut w: Walk, child: FileId, seg: usize) {
    w.off += seg;
    w.base = child;
    step(host, w);
}

#[cfg(test)]
#[path = "pathfind_tests.rs"]
mod tests;

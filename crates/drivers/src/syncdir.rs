// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Native directory mirror (`isle.syncdir`)
//!
//! Presents one native directory as a machine directory. Children are
//! minted on scan: subdirectories become nested mirrors, plain files get
//! a driver chosen by extension rules (`isle.bin` by default). Scans run
//! on the worker pool and are throttled; a filesystem watcher nudges the
//! mirror through the async trigger so native changes surface as
//! `Native`-sourced update and delete events. The mirror is read-only
//! toward the machine side.

use indexmap::IndexMap;
use isle_core::{
    AsyncTrigger, DirAccess, DirEntry, DirOp, Driver, DriverFlags, DriverSpec, EventKind,
    FileEvent, FileId, FileInit, Flow, Host, HostExt, Payload, ReqCategory, ReqResult, Request,
};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Scans newer than this are served as-is.
const SCAN_FRESH_MS: u64 = 1_500;

/// Driver for plain files with no matching extension rule.
const DEFAULT_CHILD_DRIVER: &str = "isle.bin";

pub fn spec() -> DriverSpec {
    DriverSpec {
        name: "isle.syncdir",
        cats: &[ReqCategory::Dir],
        flags: DriverFlags {
            npoll: true,
            suspend: true,
            ..DriverFlags::default()
        },
        make: || Box::<SyncDirDriver>::default(),
    }
}

/// One extension→driver binding, e.g. `png` → `isle.png`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtRule {
    pub ext: String,
    pub driver: String,
}

/// Parses `ext=driver` bindings separated by commas.
pub fn parse_rules(param: &str) -> Vec<ExtRule> {
    param
        .split(',')
        .filter_map(|pair| {
            let (ext, driver) = pair.split_once('=')?;
            let (ext, driver) = (ext.trim(), driver.trim());
            if ext.is_empty() || driver.is_empty() {
                return None;
            }
            Some(ExtRule {
                ext: ext.to_string(),
                driver: driver.to_string(),
            })
        })
        .collect()
}

/// Picks a driver for `name` by its extension.
pub fn select_driver(rules: &[ExtRule], name: &str) -> Option<String> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    rules
        .iter()
        .find(|r| r.ext == ext)
        .map(|r| r.driver.clone())
}

struct ScanEntry {
    name: String,
    is_dir: bool,
}

struct SyncState {
    npath: PathBuf,
    param: Option<String>,
    rules: Vec<ExtRule>,
    children: IndexMap<String, FileId>,
    scanning: bool,
    scanned_once: bool,
    last_scan: u64,
    pending: VecDeque<Request>,
    _watcher: Option<RecommendedWatcher>,
}

#[derive(Default)]
pub struct SyncDirDriver {
    st: Option<Rc<RefCell<SyncState>>>,
}

impl Driver for SyncDirDriver {
    fn init(&mut self, host: &mut dyn Host, file: FileId) -> bool {
        let Some(info) = host.file_get(file) else {
            return false;
        };
        let Some(npath) = info.npath else {
            host.msg("isle.syncdir: a native path is required\n");
            return false;
        };
        let rules = info.param.as_deref().map(parse_rules).unwrap_or_default();
        let st = Rc::new(RefCell::new(SyncState {
            npath: npath.clone(),
            param: info.param,
            rules,
            children: IndexMap::new(),
            scanning: false,
            scanned_once: false,
            last_scan: 0,
            pending: VecDeque::new(),
            _watcher: None,
        }));

        if let Ok(trigger) = host.async_trigger(file) {
            st.borrow_mut()._watcher = native_watcher(&npath, trigger);
        }

        // Native changes arrive as coalesced async events; each one
        // forces a rescan.
        let watched = Rc::clone(&st);
        let _ = host.watch(
            file,
            Box::new(move |host, note| {
                if note.event.kind == EventKind::Async {
                    watched.borrow_mut().last_scan = 0;
                    start_scan(host, note.file, &watched);
                }
            }),
        );

        self.st = Some(st);
        true
    }

    fn deinit(&mut self, host: &mut dyn Host, _file: FileId) {
        let Some(st) = self.st.take() else {
            return;
        };
        let (children, pending) = {
            let mut s = st.borrow_mut();
            let children: Vec<FileId> = s.children.drain(..).map(|(_, id)| id).collect();
            let pending: Vec<Request> = s.pending.drain(..).collect();
            (children, pending)
        };
        for req in pending {
            req.finish(host, ReqResult::Aborted);
        }
        for child in children {
            host.file_unref(child);
        }
    }

    fn handle(&mut self, host: &mut dyn Host, file: FileId, mut req: Request) -> Flow {
        let Some(st) = self.st.clone() else {
            req.result = ReqResult::Aborted;
            return Flow::Rejected(req);
        };
        if !matches!(req.payload, Payload::Dir(_)) {
            req.result = ReqResult::Invalid;
            return Flow::Rejected(req);
        }
        let now = host.now();
        let busy = {
            let s = st.borrow();
            s.scanning || !s.scanned_once || now.saturating_sub(s.last_scan) > SCAN_FRESH_MS
        };
        if busy {
            st.borrow_mut().pending.push_back(req);
            start_scan(host, file, &st);
        } else {
            serve(host, &st, req);
        }
        Flow::Accepted
    }
}

fn native_watcher(npath: &Path, trigger: AsyncTrigger) -> Option<RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(
        move |_event: Result<notify::Event, notify::Error>| {
            let _ = trigger.fire();
        },
    )
    .ok()?;
    watcher.watch(npath, RecursiveMode::NonRecursive).ok()?;
    Some(watcher)
}

fn serve(host: &mut dyn Host, st: &Rc<RefCell<SyncState>>, mut req: Request) {
    let result = match &mut req.payload {
        Payload::Dir(DirOp::Access { out }) => {
            *out = DirAccess {
                list: true,
                find: true,
                ..DirAccess::default()
            };
            ReqResult::Ok
        }
        Payload::Dir(DirOp::List { out }) => {
            *out = st
                .borrow()
                .children
                .iter()
                .map(|(name, &file)| DirEntry {
                    name: name.clone(),
                    file,
                    weak: true,
                })
                .collect();
            ReqResult::Ok
        }
        Payload::Dir(DirOp::Find { name, out }) => {
            *out = st.borrow().children.get(name.as_str()).map(|&file| DirEntry {
                name: name.clone(),
                file,
                weak: true,
            });
            ReqResult::Ok
        }
        // The mirror reflects the native side; machine-side mutation is
        // refused.
        Payload::Dir(_) => ReqResult::Aborted,
        _ => ReqResult::Invalid,
    };
    req.finish(host, result);
}

fn start_scan(host: &mut dyn Host, file: FileId, st: &Rc<RefCell<SyncState>>) {
    {
        let mut s = st.borrow_mut();
        if s.scanning {
            return;
        }
        s.scanning = true;
    }
    let npath = st.borrow().npath.clone();
    let on_loop = Rc::clone(st);
    let submitted = host.start_work_with(
        move || scan_native(&npath),
        move |host, outcome: io::Result<Vec<ScanEntry>>| {
            reconcile(host, file, &on_loop, outcome);
        },
    );
    if submitted.is_err() {
        let pending: Vec<Request> = {
            let mut s = st.borrow_mut();
            s.scanning = false;
            s.pending.drain(..).collect()
        };
        for req in pending {
            req.finish(host, ReqResult::Aborted);
        }
    }
}

fn scan_native(path: &Path) -> io::Result<Vec<ScanEntry>> {
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        entries.push(ScanEntry {
            is_dir: entry.file_type()?.is_dir(),
            name,
        });
    }
    Ok(entries)
}

fn reconcile(
    host: &mut dyn Host,
    file: FileId,
    st: &Rc<RefCell<SyncState>>,
    outcome: io::Result<Vec<ScanEntry>>,
) {
    match outcome {
        Ok(entries) => {
            let mut changed = false;
            let native: HashSet<&str> = entries.iter().map(|e| e.name.as_str()).collect();

            let vanished: Vec<(String, FileId)> = st
                .borrow()
                .children
                .iter()
                .filter(|(name, _)| !native.contains(name.as_str()))
                .map(|(name, &id)| (name.clone(), id))
                .collect();
            for (name, child) in vanished {
                st.borrow_mut().children.shift_remove(&name);
                host.trigger(child, FileEvent::native(EventKind::Delete));
                host.file_unref(child);
                changed = true;
            }

            for entry in &entries {
                if st.borrow().children.contains_key(&entry.name) {
                    continue;
                }
                let (driver, init) = {
                    let s = st.borrow();
                    let npath = s.npath.join(&entry.name);
                    if entry.is_dir {
                        (
                            "isle.syncdir".to_string(),
                            FileInit {
                                npath: Some(npath),
                                param: s.param.clone(),
                            },
                        )
                    } else {
                        (
                            select_driver(&s.rules, &entry.name)
                                .unwrap_or_else(|| DEFAULT_CHILD_DRIVER.to_string()),
                            FileInit {
                                npath: Some(npath),
                                param: None,
                            },
                        )
                    }
                };
                match host.file_new(&driver, init) {
                    Ok(child) => {
                        st.borrow_mut().children.insert(entry.name.clone(), child);
                        changed = true;
                    }
                    Err(err) => {
                        host.msg(&format!(
                            "isle.syncdir: cannot mirror '{}': {err}\n",
                            entry.name
                        ));
                    }
                }
            }

            if changed {
                tracing::debug!(target: "isle.syncdir", file = %file, "native tree changed");
                host.trigger(file, FileEvent::native(EventKind::Update));
            }
        }
        Err(err) => host.msg(&format!("isle.syncdir: scan failure: {err}\n")),
    }

    let now = host.now();
    {
        let mut s = st.borrow_mut();
        s.scanning = false;
        s.scanned_once = true;
        s.last_scan = now;
    }
    loop {
        let next = st.borrow_mut().pending.pop_front();
        let Some(req) = next else { break };
        serve(host, st, req);
    }
}

#[cfg(test)]
#[path = "syncdir_tests.rs"]
mod tests;

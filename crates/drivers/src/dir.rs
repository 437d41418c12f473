// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory directory driver (`isle.dir`)
//!
//! Children are name→file bindings kept in insertion order. The
//! directory owns one reference to every strongly attached child and
//! drops it on removal or teardown; weak attachments and listings leave
//! the refcount alone.

use indexmap::IndexMap;
use isle_core::{
    path, DirAccess, DirEntry, DirOp, Driver, DriverFlags, DriverSpec, EventKind, FileEvent,
    FileId, FileInit, Flow, Host, Payload, ProcessPhase, ReqCategory, ReqResult, Request,
    DIR_DRIVER,
};

pub fn spec() -> DriverSpec {
    DriverSpec {
        name: DIR_DRIVER,
        cats: &[ReqCategory::Dir],
        flags: DriverFlags {
            process: true,
            ..DriverFlags::default()
        },
        make: || Box::<DirDriver>::default(),
    }
}

struct Child {
    file: FileId,
    weak: bool,
}

#[derive(Default)]
pub struct DirDriver {
    children: IndexMap<String, Child>,
}

impl Driver for DirDriver {
    fn init(&mut self, _host: &mut dyn Host, _file: FileId) -> bool {
        true
    }

    fn deinit(&mut self, host: &mut dyn Host, _file: FileId) {
        for (_, child) in self.children.drain(..) {
            if !child.weak {
                host.file_unref(child.file);
            }
        }
    }

    fn handle(&mut self, host: &mut dyn Host, file: FileId, mut req: Request) -> Flow {
        let result = match &mut req.payload {
            Payload::Dir(op) => self.exec(host, file, op),
            _ => {
                req.result = ReqResult::Invalid;
                return Flow::Rejected(req);
            }
        };
        req.finish(host, result);
        Flow::Accepted
    }
}

impl DirDriver {
    fn exec(&mut self, host: &mut dyn Host, file: FileId, op: &mut DirOp) -> ReqResult {
        match op {
            DirOp::Access { out } => {
                *out = DirAccess {
                    list: true,
                    find: true,
                    add: true,
                    new: true,
                    newdir: true,
                    rm: true,
                };
                ReqResult::Ok
            }
            DirOp::List { out } => {
                *out = self
                    .children
                    .iter()
                    .map(|(name, child)| DirEntry {
                        name: name.clone(),
                        file: child.file,
                        weak: true,
                    })
                    .collect();
                ReqResult::Ok
            }
            DirOp::Find { name, out } => {
                *out = self.children.get(name.as_str()).map(|child| DirEntry {
                    name: name.clone(),
                    file: child.file,
                    weak: true,
                });
                ReqResult::Ok
            }
            DirOp::Add { entry, done } => {
                if !path::validate_name(&entry.name) || self.children.contains_key(&entry.name) {
                    return ReqResult::Aborted;
                }
                host.trigger(file, FileEvent::driver(EventKind::Process(ProcessPhase::Pre)));
                if !entry.weak && !host.file_ref(entry.file) {
                    host.trigger(file, FileEvent::driver(EventKind::Process(ProcessPhase::Post)));
                    return ReqResult::Aborted;
                }
                self.children.insert(
                    entry.name.clone(),
                    Child {
                        file: entry.file,
                        weak: entry.weak,
                    },
                );
                *done = true;
                host.trigger(file, FileEvent::driver(EventKind::Process(ProcessPhase::Post)));
                ReqResult::Ok
            }
            DirOp::New { name, driver, out } => {
                let driver = driver.clone();
                self.attach_new(host, file, name, &driver, out)
            }
            DirOp::NewDir { name, out } => self.attach_new(host, file, name, DIR_DRIVER, out),
            DirOp::Rm { name, out } => {
                let Some(child) = self.children.shift_remove(name.as_str()) else {
                    return ReqResult::Aborted;
                };
                host.trigger(file, FileEvent::driver(EventKind::Process(ProcessPhase::Pre)));
                *out = Some(child.file);
                if !child.weak {
                    host.file_unref(child.file);
                }
                host.trigger(file, FileEvent::driver(EventKind::Process(ProcessPhase::Post)));
                ReqResult::Ok
            }
        }
    }

    fn attach_new(
        &mut self,
        host: &mut dyn Host,
        file: FileId,
        name: &str,
        driver: &str,
        out: &mut Option<FileId>,
    ) -> ReqResult {
        if !path::validate_name(name) || self.children.contains_key(name) {
            return ReqResult::Aborted;
        }
        host.trigger(file, FileEvent::driver(EventKind::Process(ProcessPhase::Pre)));
        let created = host.file_new(driver, FileInit::default());
        let result = match created {
            Ok(child) => {
                // The creation reference becomes the directory's
                // ownership reference.
                self.children.insert(
                    name.to_string(),
                    Child {
                        file: child,
                        weak: false,
                    },
                );
                *out = Some(child);
                ReqResult::Ok
            }
            Err(_) => ReqResult::Aborted,
        };
        host.trigger(file, FileEvent::driver(EventKind::Process(ProcessPhase::Post)));
        result
    }
}

#[cfg(test)]
#[path = "dir_tests.rs"]
mod tests;

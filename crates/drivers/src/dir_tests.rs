// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use isle_core::FakeClock;
use isle_engine::{Machine, MachineConfig};
use std::cell::RefCell;
use std::rc::Rc;

fn machine() -> Machine<FakeClock> {
    let mut m = Machine::with_clock(FakeClock::new(), MachineConfig {
        arena_size: 4096,
        workers: 1,
        uncache: None,
    });
    m.install_pack(crate::pack()).unwrap();
    m.create_root(DIR_DRIVER).unwrap();
    m
}

fn dir_request(m: &mut Machine<FakeClock>, file: FileId, op: DirOp) -> (ReqResult, DirOp) {
    let out: Rc<RefCell<Option<(ReqResult, DirOp)>>> = Rc::new(RefCell::new(None));
    let sink = Rc::clone(&out);
    let req = Request::new(file, Payload::Dir(op), move |_, reply| {
        if let Payload::Dir(op) = reply.payload {
            *sink.borrow_mut() = Some((reply.result, op));
        }
    });
    m.request(req).unwrap_or_else(|r| panic!("rejected: {r:?}"));
    let reply = out.borrow_mut().take();
    reply.unwrap_or_else(|| panic!("no reply"))
}

#[test]
fn access_reports_full_directory_surface() {
    let mut m = machine();
    let (result, op) = dir_request(
        &mut m,
        FileId::ROOT,
        DirOp::Access {
            out: DirAccess::default(),
        },
    );
    assert_eq!(result, ReqResult::Ok);
    let DirOp::Access { out } = op else { panic!() };
    assert!(out.list && out.find && out.add && out.new && out.newdir && out.rm);
}

#[test]
fn add_then_find_round_trips_the_same_file() {
    let mut m = machine();
    let f = m.file_new("isle.pipe", FileInit::default()).unwrap();

    let (result, op) = dir_request(
        &mut m,
        FileId::ROOT,
        DirOp::Add {
            entry: DirEntry {
                name: "n".into(),
                file: f,
                weak: false,
            },
            done: false,
        },
    );
    assert_eq!(result, ReqResult::Ok);
    assert!(matches!(op, DirOp::Add { done: true, .. }));
    assert_eq!(m.file_get(f).unwrap().refcnt, 2, "directory took a reference");

    let (result, op) = dir_request(
        &mut m,
        FileId::ROOT,
        DirOp::Find {
            name: "n".into(),
            out: None,
        },
    );
    assert_eq!(result, ReqResult::Ok);
    let DirOp::Find { out: Some(entry), .. } = op else {
        panic!("find missed");
    };
    assert_eq!(entry.file, f);
    assert!(entry.weak, "lookups hand out weak references");
    m.file_unref(f);
}

#[test]
fn find_misses_cleanly() {
    let mut m = machine();
    let (result, op) = dir_request(
        &mut m,
        FileId::ROOT,
        DirOp::Find {
            name: "ghost".into(),
            out: None,
        },
    );
    assert_eq!(result, ReqResult::Ok);
    assert!(matches!(op, DirOp::Find { out: None, .. }));
}

#[test]
fn duplicate_and_invalid_names_are_refused() {
    let mut m = machine();
    let f = m.file_new("isle.pipe", FileInit::default()).unwrap();
    let add = |name: &str| DirOp::Add {
        entry: DirEntry {
            name: name.into(),
            file: f,
            weak: true,
        },
        done: false,
    };

    let (result, _) = dir_request(&mut m, FileId::ROOT, add("ok"));
    assert_eq!(result, ReqResult::Ok);
    let (result, _) = dir_request(&mut m, FileId::ROOT, add("ok"));
    assert_eq!(result, ReqResult::Aborted, "duplicate name");
    let (result, _) = dir_request(&mut m, FileId::ROOT, add("a/b"));
    assert_eq!(result, ReqResult::Aborted, "slash in name");
    let (result, _) = dir_request(&mut m, FileId::ROOT, add(""));
    assert_eq!(result, ReqResult::Aborted, "empty name");
    m.file_unref(f);
}

#[test]
fn list_preserves_insertion_order() {
    let mut m = machine();
    for name in ["zeta", "alpha", "mid"] {
        let (result, _) = dir_request(
            &mut m,
            FileId::ROOT,
            DirOp::NewDir {
                name: name.into(),
                out: None,
            },
        );
        assert_eq!(result, ReqResult::Ok);
    }
    let (result, op) = dir_request(&mut m, FileId::ROOT, DirOp::List { out: Vec::new() });
    assert_eq!(result, ReqResult::Ok);
    let DirOp::List { out } = op else { panic!() };
    let names: Vec<&str> = out.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, ["zeta", "alpha", "mid"]);
    assert!(out.iter().all(|e| e.weak));
}

#[test]
fn new_creates_with_named_driver() {
    let mut m = machine();
    let (result, op) = dir_request(
        &mut m,
        FileId::ROOT,
        DirOp::New {
            name: "queue".into(),
            driver: "isle.pipe".into(),
            out: None,
        },
    );
    assert_eq!(result, ReqResult::Ok);
    let DirOp::New { out: Some(id), .. } = op else { panic!() };
    assert_eq!(m.file_get(id).unwrap().driver, "isle.pipe");
    assert_eq!(m.file_get(id).unwrap().refcnt, 1, "directory holds the only ref");
}

#[test]
fn new_with_unknown_driver_aborts() {
    let mut m = machine();
    let (result, _) = dir_request(
        &mut m,
        FileId::ROOT,
        DirOp::New {
            name: "x".into(),
            driver: "no.such".into(),
            out: None,
        },
    );
    assert_eq!(result, ReqResult::Aborted);
}

#[test]
fn rm_detaches_and_releases_ownership() {
    let mut m = machine();
    let (_, op) = dir_request(
        &mut m,
        FileId::ROOT,
        DirOp::NewDir {
            name: "gone".into(),
            out: None,
        },
    );
    let DirOp::NewDir { out: Some(id), .. } = op else { panic!() };

    let (result, op) = dir_request(
        &mut m,
        FileId::ROOT,
        DirOp::Rm {
            name: "gone".into(),
            out: None,
        },
    );
    assert_eq!(result, ReqResult::Ok);
    assert!(matches!(op, DirOp::Rm { out: Some(i), .. } if i == id));
    assert!(m.file_get(id).is_none(), "last reference dropped");

    let (result, _) = dir_request(
        &mut m,
        FileId::ROOT,
        DirOp::Rm {
            name: "gone".into(),
            out: None,
        },
    );
    assert_eq!(result, ReqResult::Aborted);
}

#[test]
fn mutations_emit_process_brackets() {
    let mut m = machine();
    let phases: Rc<RefCell<Vec<ProcessPhase>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&phases);
    m.watch(
        FileId::ROOT,
        Box::new(move |_, note| {
            if let EventKind::Process(phase) = note.event.kind {
                sink.borrow_mut().push(phase);
            }
        }),
    )
    .unwrap();

    let (_, _) = dir_request(
        &mut m,
        FileId::ROOT,
        DirOp::NewDir {
            name: "d".into(),
            out: None,
        },
    );
    assert_eq!(*phases.borrow(), vec![ProcessPhase::Pre, ProcessPhase::Post]);
}

#[test]
fn teardown_releases_children() {
    let mut m = machine();
    let parent = m.file_new(DIR_DRIVER, FileInit::default()).unwrap();
    let (_, op) = dir_request(
        &mut m,
        parent,
        DirOp::NewDir {
            name: "inner".into(),
            out: None,
        },
    );
    let DirOp::NewDir { out: Some(inner), .. } = op else { panic!() };

    m.file_unref(parent);
    assert!(m.file_get(parent).is_none());
    assert!(m.file_get(inner).is_none(), "child went with its directory");
}

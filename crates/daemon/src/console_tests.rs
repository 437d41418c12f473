// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::boot::{self};
use crate::config::Mount;
use isle_core::{FileInit, DIR_DRIVER};
use isle_engine::{Machine, MachineConfig};
use std::sync::mpsc;

fn machine() -> Machine {
    let mut m = Machine::new(MachineConfig {
        arena_size: 16 * 1024,
        workers: 2,
        uncache: None,
    });
    m.install_pack(isle_drivers::pack()).unwrap();
    m.create_root(DIR_DRIVER).unwrap();
    m
}

fn run(m: &mut Machine, cmd: Command) -> Response {
    let (tx, rx) = mpsc::channel();
    execute(
        m,
        cmd,
        Box::new(move |response| {
            let _ = tx.send(response);
        }),
    );
    m.run_until_idle();
    rx.try_recv()
        .unwrap_or_else(|_| panic!("command produced no response"))
}

#[test]
fn ls_lists_the_root() {
    let mut m = machine();
    boot::boot(
        &mut m,
        &[
            Mount {
                path: "/alpha".into(),
                driver: "isle.pipe".into(),
                npath: None,
                param: None,
            },
            Mount {
                path: "/beta".into(),
                driver: "isle.prog.echo".into(),
                npath: None,
                param: None,
            },
        ],
    );
    m.run_until_idle();

    let response = run(&mut m, Command::Ls { path: "/".into() });
    let Response::Entries { entries } = response else {
        panic!("unexpected response: {response:?}");
    };
    let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, ["alpha", "beta"]);
}

#[test]
fn stat_reports_metadata() {
    let mut m = machine();
    let response = run(&mut m, Command::Stat { path: "/".into() });
    let Response::Stat { info } = response else {
        panic!("unexpected response: {response:?}");
    };
    assert_eq!(info.id.raw(), 0);
    assert_eq!(info.driver, DIR_DRIVER);
}

#[test]
fn missing_paths_answer_with_an_error() {
    let mut m = machine();
    let response = run(&mut m, Command::Stat {
        path: "/no/such/file".into(),
    });
    assert!(matches!(response, Response::Error { .. }));
}

#[test]
fn write_then_read_through_a_bin_file() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("note.txt"), b"").unwrap();

    let mut m = machine();
    let f = m
        .file_new(
            "isle.bin",
            FileInit::with_npath(dir.path().join("note.txt")),
        )
        .unwrap();
    // Attach under a name so the console can address it.
    let attach = Request::new(
        isle_core::FileId::ROOT,
        Payload::Dir(DirOp::Add {
            entry: isle_core::DirEntry {
                name: "note".into(),
                file: f,
                weak: false,
            },
            done: false,
        }),
        |_, _| {},
    );
    m.request(attach).unwrap();
    m.file_unref(f);

    let response = run(&mut m, Command::Write {
        path: "/note".into(),
        data: "console was here".into(),
        offset: 0,
    });
    assert_eq!(response, Response::Written { consumed: 16 });

    let response = run(&mut m, Command::Read {
        path: "/note".into(),
        offset: 8,
        size: 64,
    });
    assert_eq!(response, Response::Data {
        data: "was here".into(),
        tail: true,
    });
}

#[test]
fn shutdown_sets_the_exit_status() {
    let mut m = machine();
    let response = run(&mut m, Command::Shutdown);
    assert_eq!(response, Response::Done);
    assert_eq!(m.exit_status(), Some(isle_core::ExitStatus::Shutdown));
}

#[test]
fn command_wire_format_round_trips() {
    let cmd: Command = serde_json::from_str(
        r#"{"type":"read","path":"/note","offset":8,"size":64}"#,
    )
    .unwrap();
    assert_eq!(cmd, Command::Read {
        path: "/note".into(),
        offset: 8,
        size: 64,
    });

    let cmd: Command = serde_json::from_str(r#"{"type":"ls","path":"/"}"#).unwrap();
    assert_eq!(cmd, Command::Ls { path: "/".into() });

    let encoded = serde_json::to_string(&Response::Written { consumed: 3 }).unwrap();
    assert_eq!(encoded, r#"{"type":"written","consumed":3}"#);
    let back: Response = serde_json::from_str(&encoded).unwrap();
    assert_eq!(back, Response::Written { consumed: 3 });
}

#[test]
fn read_size_defaults_on_the_wire() {
    let cmd: Command = serde_json::from_str(r#"{"type":"read","path":"/x"}"#).unwrap();
    assert_eq!(cmd, Command::Read {
        path: "/x".into(),
        offset: 0,
        size: 4096,
    });
}

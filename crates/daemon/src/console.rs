// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! TCP console
//!
//! Newline-delimited JSON commands over TCP. Each connection is a
//! session; every command is deferred onto the machine loop and the
//! response travels back over a oneshot channel. The console never
//! touches file state from the tokio side.

use isle_core::{
    DirOp, ExitStatus, FileId, FileInfo, Host, LockMode, LockRequest, Payload, Request, StreamOp,
};
use isle_engine::{pathfind, MachineHandle, PathFind};
use serde::{Deserialize, Serialize};
use std::io;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};
use uuid::Uuid;

/// What a console client may ask for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// List a directory.
    Ls { path: String },
    /// File metadata snapshot.
    Stat { path: String },
    /// Read a byte range from a stream file.
    Read {
        path: String,
        #[serde(default)]
        offset: u64,
        #[serde(default = "default_read_size")]
        size: u64,
    },
    /// Write bytes into a stream file.
    Write {
        path: String,
        data: String,
        #[serde(default)]
        offset: u64,
    },
    Shutdown,
    Reboot,
}

fn default_read_size() -> u64 {
    4096
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Entries { entries: Vec<EntryInfo> },
    Stat { info: FileInfo },
    Data { data: String, tail: bool },
    Written { consumed: u64 },
    Done,
    Error { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryInfo {
    pub name: String,
    pub id: u64,
}

type ReplyFn = Box<dyn FnOnce(Response) + Send>;

/// Runs one command against the machine. Must be called on the loop
/// thread; `reply` fires exactly once.
pub fn execute(host: &mut dyn Host, cmd: Command, reply: ReplyFn) {
    match cmd {
        Command::Ls { path } => with_file(host, path, reply, |host, file, reply| {
            locked_request(
                host,
                file,
                LockMode::Shared,
                Payload::Dir(DirOp::List { out: Vec::new() }),
                reply,
                |_, payload, reply| match payload {
                    Payload::Dir(DirOp::List { out }) => {
                        let entries = out
                            .into_iter()
                            .map(|e| EntryInfo {
                                name: e.name,
                                id: e.file.raw(),
                            })
                            .collect();
                        reply(Response::Entries { entries });
                    }
                    _ => reply(fail("listing came back malformed")),
                },
            );
        }),
        Command::Stat { path } => with_file(host, path, reply, |host, file, reply| {
            match host.file_get(file) {
                Some(info) => reply(Response::Stat { info }),
                None => reply(fail("file vanished")),
            }
        }),
        Command::Read { path, offset, size } => {
            with_file(host, path, reply, move |host, file, reply| {
                locked_request(
                    host,
                    file,
                    LockMode::Shared,
                    Payload::Stream(StreamOp::Read {
                        offset,
                        size,
                        out: Vec::new(),
                        tail: false,
                    }),
                    reply,
                    |_, payload, reply| match payload {
                        Payload::Stream(StreamOp::Read { out, tail, .. }) => {
                            reply(Response::Data {
                                data: String::from_utf8_lossy(&out).into_owned(),
                                tail,
                            });
                        }
                        _ => reply(fail("read came back malformed")),
                    },
                );
            })
        }
        Command::Write { path, data, offset } => {
            with_file(host, path, reply, move |host, file, reply| {
                locked_request(
                    host,
                    file,
                    LockMode::Exclusive,
                    Payload::Stream(StreamOp::Write {
                        offset,
                        buf: data.into_bytes(),
                        consumed: 0,
                    }),
                    reply,
                    |_, payload, reply| match payload {
                        Payload::Stream(StreamOp::Write { consumed, .. }) => {
                            reply(Response::Written { consumed });
                        }
                        _ => reply(fail("write came back malformed")),
                    },
                );
            })
        }
        Command::Shutdown => {
            host.exit(ExitStatus::Shutdown);
            reply(Response::Done);
        }
        Command::Reboot => {
            host.exit(ExitStatus::Reboot);
            reply(Response::Done);
        }
    }
}

fn fail(message: impl Into<String>) -> Response {
    Response::Error {
        message: message.into(),
    }
}

/// Resolves a path and hands the file on; unresolved paths answer with
/// an error.
fn with_file(
    host: &mut dyn Host,
    path: String,
    reply: ReplyFn,
    then: impl FnOnce(&mut dyn Host, FileId, ReplyFn) + 'static,
) {
    pathfind(host, PathFind::new(path), move |host, result| {
        if result.resolved() {
            then(host, result.base, reply);
        } else {
            reply(fail(format!("not found: '{}' unresolved", result.remainder)));
        }
    });
}

/// Takes a lock, runs one request under it, releases, and maps the
/// completed payload to a response.
fn locked_request(
    host: &mut dyn Host,
    file: FileId,
    mode: LockMode,
    payload: Payload,
    reply: ReplyFn,
    then: impl FnOnce(&mut dyn Host, Payload, ReplyFn) + 'static,
) {
    let lock = LockRequest::new(file, mode, move |host, grant| {
        if !grant.ok {
            reply(fail("lock was cancelled"));
            return;
        }
        let token = grant.token;
        let req = Request::new(file, payload, move |host, reply_env| {
            host.unlock(token);
            if reply_env.result.is_ok() {
                then(host, reply_env.payload, reply);
            } else {
                reply(fail(format!("request failed: {:?}", reply_env.result)));
            }
        });
        if let Err(rejected) = host.request(req) {
            host.unlock(token);
            // The rejected envelope still owns our closures; answering
            // here would double-reply, so only the result is reported.
            debug!(result = ?rejected.result, "console request rejected");
        }
    })
    .manual();
    let _ = host.lock(lock);
}

/// Accept loop for the console listener.
pub async fn serve(listener: TcpListener, handle: MachineHandle) -> io::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let handle = handle.clone();
        tokio::spawn(async move {
            let session = Uuid::new_v4();
            info!(%session, %peer, "console session opened");
            if let Err(err) = serve_conn(stream, handle).await {
                debug!(%session, %err, "console session error");
            }
            info!(%session, "console session closed");
        });
    }
}

async fn serve_conn(stream: TcpStream, handle: MachineHandle) -> io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Command>(&line) {
            Ok(cmd) => run_on_machine(&handle, cmd).await,
            Err(err) => fail(format!("bad command: {err}")),
        };
        let mut encoded = serde_json::to_string(&response)
            .unwrap_or_else(|_| r#"{"type":"error","message":"encoding failure"}"#.to_string());
        encoded.push('\n');
        writer.write_all(encoded.as_bytes()).await?;
    }
    Ok(())
}

async fn run_on_machine(handle: &MachineHandle, cmd: Command) -> Response {
    let (tx, rx) = tokio::sync::oneshot::channel();
    let queued = handle.defer(move |host| {
        execute(
            host,
            cmd,
            Box::new(move |response| {
                let _ = tx.send(response);
            }),
        );
    });
    if queued.is_err() {
        return fail("machine is gone");
    }
    match rx.await {
        Ok(response) => response,
        Err(_) => fail("machine dropped the command"),
    }
}

#[cfg(test)]
#[path = "console_tests.rs"]
mod tests;

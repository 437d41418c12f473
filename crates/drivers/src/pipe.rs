// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory discrete stream driver (`isle.pipe`)
//!
//! Writes enqueue whole frames; each read dequeues exactly one. Offsets
//! are meaningless on a framed stream and are ignored. An empty read
//! completes with no bytes and the tail flag set.

use isle_core::{
    Driver, DriverFlags, DriverSpec, EventKind, FileEvent, FileId, Flow, Host, Payload,
    ReqCategory, ReqResult, Request, StreamAccess, StreamOp,
};
use std::collections::VecDeque;

pub fn spec() -> DriverSpec {
    DriverSpec {
        name: "isle.pipe",
        cats: &[ReqCategory::DStream],
        flags: DriverFlags::default(),
        make: || Box::<PipeDriver>::default(),
    }
}

#[derive(Default)]
pub struct PipeDriver {
    frames: VecDeque<Vec<u8>>,
}

impl Driver for PipeDriver {
    fn init(&mut self, _host: &mut dyn Host, _file: FileId) -> bool {
        true
    }

    fn deinit(&mut self, _host: &mut dyn Host, _file: FileId) {}

    fn handle(&mut self, host: &mut dyn Host, file: FileId, mut req: Request) -> Flow {
        let mut wrote = false;
        let result = match &mut req.payload {
            Payload::DStream(StreamOp::Access { out }) => {
                *out = StreamAccess {
                    read: true,
                    write: true,
                };
                ReqResult::Ok
            }
            Payload::DStream(StreamOp::Read { out, tail, .. }) => {
                if let Some(frame) = self.frames.pop_front() {
                    *out = frame;
                }
                *tail = self.frames.is_empty();
                ReqResult::Ok
            }
            Payload::DStream(StreamOp::Write { buf, consumed, .. }) => {
                *consumed = buf.len() as u64;
                self.frames.push_back(std::mem::take(buf));
                wrote = true;
                ReqResult::Ok
            }
            Payload::DStream(StreamOp::Truncate { .. }) => {
                self.frames.clear();
                ReqResult::Ok
            }
            _ => {
                req.result = ReqResult::Invalid;
                return Flow::Rejected(req);
            }
        };
        req.finish(host, result);
        if wrote {
            // Wake watchers so framed readers poll again.
            host.trigger(file, FileEvent::driver(EventKind::Update));
        }
        Flow::Accepted
    }
}

#[cfg(test)]
#[path = "pipe_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Echo program driver (`isle.prog.echo`)
//!
//! The smallest complete program: compilation is an idempotent no-op and
//! each execution spawns a fresh pipe file as its instance. The caller
//! owns the instance; releasing the last reference ends the execution.

use isle_core::{
    Driver, DriverFlags, DriverSpec, FileId, FileInit, Flow, Host, Payload, ProgAccess, ProgOp,
    ReqCategory, ReqResult, Request,
};

pub fn spec() -> DriverSpec {
    DriverSpec {
        name: "isle.prog.echo",
        cats: &[ReqCategory::Prog],
        flags: DriverFlags::default(),
        make: || Box::<EchoProg>::default(),
    }
}

#[derive(Default)]
pub struct EchoProg {
    compiled: bool,
}

impl Driver for EchoProg {
    fn init(&mut self, _host: &mut dyn Host, _file: FileId) -> bool {
        true
    }

    fn deinit(&mut self, _host: &mut dyn Host, _file: FileId) {}

    fn handle(&mut self, host: &mut dyn Host, _file: FileId, mut req: Request) -> Flow {
        let result = match &mut req.payload {
            Payload::Prog(ProgOp::Access { out }) => {
                *out = ProgAccess {
                    compile: true,
                    exec: true,
                };
                ReqResult::Ok
            }
            Payload::Prog(ProgOp::Compile) => {
                self.compiled = true;
                ReqResult::Ok
            }
            Payload::Prog(ProgOp::Exec { out }) => {
                if !self.compiled {
                    ReqResult::Aborted
                } else {
                    match host.file_new("isle.pipe", FileInit::default()) {
                        Ok(instance) => {
                            *out = Some(instance);
                            ReqResult::Ok
                        }
                        Err(_) => ReqResult::Aborted,
                    }
                }
            }
            _ => {
                req.result = ReqResult::Invalid;
                return Flow::Rejected(req);
            }
        };
        req.finish(host, result);
        Flow::Accepted
    }
}

#[cfg(test)]
#[path = "prog_tests.rs"]
mod tests;

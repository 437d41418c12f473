// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test helpers exported behind the `test-support` feature

use crate::driver::{Driver, DriverFlags, DriverSpec, Flow};
use crate::file::FileId;
use crate::host::Host;
use crate::req::{ReqResult, Request};

/// A driver that serves no category and rejects every request.
///
/// Useful for exercising registry and lock behavior without any driver
/// semantics in the way.
#[derive(Debug, Default)]
pub struct NullDriver;

impl Driver for NullDriver {
    fn init(&mut self, _host: &mut dyn Host, _file: FileId) -> bool {
        true
    }

    fn deinit(&mut self, _host: &mut dyn Host, _file: FileId) {}

    fn handle(&mut self, _host: &mut dyn Host, _file: FileId, mut req: Request) -> Flow {
        req.result = ReqResult::Invalid;
        Flow::Rejected(req)
    }
}

/// Descriptor for [`NullDriver`], registered as `isle.test.null`.
pub fn null_driver() -> DriverSpec {
    DriverSpec {
        name: "isle.test.null",
        cats: &[],
        flags: DriverFlags::default(),
        make: || Box::new(NullDriver),
    }
}

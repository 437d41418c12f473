// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request envelopes
//!
//! A request is a tagged operation delivered through a file's driver. Each
//! payload variant carries both the operation inputs and the slots the
//! driver fills before completing. Requests do not own their file; the
//! caller is expected to hold whatever lock the operation needs.

use crate::file::FileId;
use crate::host::Host;
use serde::{Deserialize, Serialize};

/// Operation category a driver can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReqCategory {
    Dir,
    Prog,
    Stream,
    DStream,
    Tensor,
}

/// Terminal result of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReqResult {
    Ok,
    /// Structural allocation failure.
    NoMem,
    /// Semantic failure or cancellation.
    Aborted,
    /// Unsupported request type or malformed arguments.
    Invalid,
}

impl ReqResult {
    pub fn is_ok(self) -> bool {
        matches!(self, ReqResult::Ok)
    }
}

/// One directory slot: a name bound to a file.
///
/// `weak` entries do not contribute to the child's reference count; a
/// directory listing always hands out weak references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub file: FileId,
    pub weak: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DirAccess {
    pub list: bool,
    pub find: bool,
    pub add: bool,
    pub new: bool,
    pub newdir: bool,
    pub rm: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProgAccess {
    pub compile: bool,
    pub exec: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StreamAccess {
    pub read: bool,
    pub write: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TensorAccess {
    pub meta: bool,
    pub data: bool,
    pub fetch: bool,
    pub flush: bool,
}

/// Directory operations.
#[derive(Debug)]
pub enum DirOp {
    Access {
        out: DirAccess,
    },
    /// Lists children as weak references, in insertion order.
    List {
        out: Vec<DirEntry>,
    },
    /// Finds one child; `out` stays `None` when the name is unbound.
    Find {
        name: String,
        out: Option<DirEntry>,
    },
    /// Attaches an existing file under a name. `done` reports success.
    Add {
        entry: DirEntry,
        done: bool,
    },
    /// Creates a file with the named driver and attaches it.
    New {
        name: String,
        driver: String,
        out: Option<FileId>,
    },
    /// Creates and attaches a subdirectory.
    NewDir {
        name: String,
        out: Option<FileId>,
    },
    /// Detaches a child, returning its id.
    Rm {
        name: String,
        out: Option<FileId>,
    },
}

/// Byte / discrete stream operations.
#[derive(Debug)]
pub enum StreamOp {
    Access {
        out: StreamAccess,
    },
    /// Reads up to `size` bytes from `offset`. `tail` is set when the
    /// returned bytes reach the end of the stream. Discrete streams
    /// ignore `offset` and return exactly one frame.
    Read {
        offset: u64,
        size: u64,
        out: Vec<u8>,
        tail: bool,
    },
    /// Writes `buf` at `offset`; `consumed` reports accepted bytes.
    Write {
        offset: u64,
        buf: Vec<u8>,
        consumed: u64,
    },
    Truncate {
        size: u64,
    },
}

/// Program operations.
#[derive(Debug)]
pub enum ProgOp {
    Access {
        out: ProgAccess,
    },
    Compile,
    /// Produces a new file whose lifetime is the execution instance.
    Exec {
        out: Option<FileId>,
    },
}

/// Element type of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TensorType {
    U8,
    U16,
    F32,
    F64,
}

impl TensorType {
    pub fn size_of(self) -> usize {
        match self {
            TensorType::U8 => 1,
            TensorType::U16 => 2,
            TensorType::F32 => 4,
            TensorType::F64 => 8,
        }
    }
}

/// Rank, element type, and per-axis resolution of a tensor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorMeta {
    pub ty: TensorType,
    pub reso: Vec<u32>,
}

impl TensorMeta {
    pub fn rank(&self) -> u8 {
        self.reso.len() as u8
    }

    /// Total byte size of a dense buffer with this shape.
    pub fn byte_len(&self) -> usize {
        self.reso
            .iter()
            .map(|&r| r as usize)
            .product::<usize>()
            .saturating_mul(self.ty.size_of())
    }
}

/// An owned tensor buffer with its shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorData {
    pub meta: TensorMeta,
    pub bytes: Vec<u8>,
}

/// Tensor operations.
#[derive(Debug)]
pub enum TensorOp {
    Access {
        out: TensorAccess,
    },
    Meta {
        out: Option<TensorMeta>,
    },
    /// Snapshot of the current buffer; callers mutating through it must
    /// hold an exclusive lock.
    Data {
        out: Option<TensorData>,
    },
    /// Moves the buffer out of the driver until the matching `Flush`.
    Fetch {
        out: Option<TensorData>,
    },
    /// Moves a buffer back into the driver.
    Flush {
        data: Option<TensorData>,
    },
}

/// Operation payload, tagged by category.
#[derive(Debug)]
pub enum Payload {
    Dir(DirOp),
    Prog(ProgOp),
    Stream(StreamOp),
    DStream(StreamOp),
    Tensor(TensorOp),
}

impl Payload {
    pub fn category(&self) -> ReqCategory {
        match self {
            Payload::Dir(_) => ReqCategory::Dir,
            Payload::Prog(_) => ReqCategory::Prog,
            Payload::Stream(_) => ReqCategory::Stream,
            Payload::DStream(_) => ReqCategory::DStream,
            Payload::Tensor(_) => ReqCategory::Tensor,
        }
    }
}

pub type ReqFn = Box<dyn FnOnce(&mut dyn Host, Reply)>;

/// The completed form of a request, handed to its callback.
#[derive(Debug)]
pub struct Reply {
    pub file: FileId,
    pub result: ReqResult,
    pub payload: Payload,
}

/// A pending operation on one file.
pub struct Request {
    pub file: FileId,
    pub payload: Payload,
    /// Result a driver reports when handing a rejected request back.
    pub result: ReqResult,
    cb: Option<ReqFn>,
}

impl Request {
    pub fn new(
        file: FileId,
        payload: Payload,
        cb: impl FnOnce(&mut dyn Host, Reply) + 'static,
    ) -> Self {
        Self {
            file,
            payload,
            result: ReqResult::Ok,
            cb: Some(Box::new(cb)),
        }
    }

    /// A request whose completion nobody observes.
    pub fn fire_and_forget(file: FileId, payload: Payload) -> Self {
        Self {
            file,
            payload,
            result: ReqResult::Ok,
            cb: None,
        }
    }

    /// Completes the request: records the result and invokes the callback
    /// exactly once.
    pub fn finish(mut self, host: &mut dyn Host, result: ReqResult) {
        self.result = result;
        let reply = Reply {
            file: self.file,
            result,
            payload: self.payload,
        };
        if let Some(cb) = self.cb.take() {
            cb(host, reply);
        }
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("file", &self.file)
            .field("payload", &self.payload)
            .field("result", &self.result)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "req_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! File identity and metadata
//!
//! A file is a uniformly addressable node hosted by one machine; it is not
//! necessarily backed by storage. Identifiers are minted from a
//! monotonically increasing counter and never recycled within a machine's
//! lifetime.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Identifier of a file within one machine.
///
/// Identifier 0 is reserved for the root directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FileId(pub u64);

impl FileId {
    /// The root directory of the machine.
    pub const ROOT: FileId = FileId(0);

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Creation-time attributes of a file.
///
/// `npath` points at a native filesystem resource for drivers that bridge
/// one; `param` is a driver-interpreted configuration string.
#[derive(Debug, Default, Clone)]
pub struct FileInit {
    pub npath: Option<PathBuf>,
    pub param: Option<String>,
}

impl FileInit {
    pub fn with_npath(npath: impl Into<PathBuf>) -> Self {
        Self {
            npath: Some(npath.into()),
            param: None,
        }
    }

    pub fn with_param(param: impl Into<String>) -> Self {
        Self {
            npath: None,
            param: Some(param.into()),
        }
    }
}

/// Snapshot of a file's registry metadata.
///
/// Timestamps are machine-monotonic milliseconds; zero means "never".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub id: FileId,
    pub driver: String,
    pub npath: Option<PathBuf>,
    pub param: Option<String>,
    pub mimetype: Option<String>,
    pub refcnt: u64,
    pub last_update: u64,
    pub last_request: u64,
    pub last_uncache: u64,
    pub cache_hint: u64,
}

#[cfg(test)]
#[path = "file_tests.rs"]
mod tests;

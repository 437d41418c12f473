// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! File registry
//!
//! Process-wide table of live files for one machine. Identifiers come
//! from a monotonic counter and are never recycled, so the backing vector
//! stays sorted and lookup is a binary search.

use crate::locks::LockQueue;
use isle_core::{Driver, DriverSpec, FileId, FileInfo, WatchFn, WatchId};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// One watch subscription slot.
///
/// The callback is taken out while it runs so reentrant triggers cannot
/// invoke it recursively.
pub(crate) struct WatchSlot {
    pub id: WatchId,
    pub cb: Option<WatchFn>,
}

/// A live file.
pub(crate) struct FileSlot {
    pub id: FileId,
    pub spec: DriverSpec,
    /// Taken out for the duration of a dispatch.
    pub instance: Option<Box<dyn Driver>>,
    pub npath: Option<PathBuf>,
    pub param: Option<String>,
    pub mimetype: Option<String>,
    pub refcnt: u64,
    pub last_update: u64,
    pub last_request: u64,
    pub last_uncache: u64,
    pub cache_hint: u64,
    pub watches: Vec<WatchSlot>,
    pub locks: LockQueue,
    pub async_gate: Option<Arc<AtomicBool>>,
    /// Set while the deletion sequence runs; the delete event fires at
    /// most once.
    pub dying: bool,
    /// Deletion reached a file whose driver was mid-dispatch; the
    /// dispatcher finishes the teardown.
    pub doomed: bool,
}

impl FileSlot {
    pub fn new(id: FileId, spec: DriverSpec) -> Self {
        Self {
            id,
            spec,
            instance: None,
            npath: None,
            param: None,
            mimetype: None,
            refcnt: 1,
            last_update: 0,
            last_request: 0,
            last_uncache: 0,
            cache_hint: 0,
            watches: Vec::new(),
            locks: LockQueue::default(),
            async_gate: None,
            dying: false,
            doomed: false,
        }
    }

    pub fn info(&self) -> FileInfo {
        FileInfo {
            id: self.id,
            driver: self.spec.name.to_string(),
            npath: self.npath.clone(),
            param: self.param.clone(),
            mimetype: self.mimetype.clone(),
            refcnt: self.refcnt,
            last_update: self.last_update,
            last_request: self.last_request,
            last_uncache: self.last_uncache,
            cache_hint: self.cache_hint,
        }
    }
}

#[derive(Default)]
pub(crate) struct Registry {
    files: Vec<FileSlot>,
    next_id: u64,
}

impl Registry {
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    /// Mints the next identifier and inserts a fresh slot for it.
    pub fn insert(&mut self, spec: DriverSpec) -> FileId {
        let id = FileId(self.next_id);
        self.next_id += 1;
        self.files.push(FileSlot::new(id, spec));
        id
    }

    fn index_of(&self, id: FileId) -> Option<usize> {
        self.files.binary_search_by_key(&id, |slot| slot.id).ok()
    }

    pub fn get(&self, id: FileId) -> Option<&FileSlot> {
        self.index_of(id).map(|i| &self.files[i])
    }

    pub fn get_mut(&mut self, id: FileId) -> Option<&mut FileSlot> {
        match self.index_of(id) {
            Some(i) => Some(&mut self.files[i]),
            None => None,
        }
    }

    pub fn remove(&mut self, id: FileId) -> Option<FileSlot> {
        self.index_of(id).map(|i| self.files.remove(i))
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileSlot> {
        self.files.iter()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;

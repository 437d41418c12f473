// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker thread pool
//!
//! Fixed pool of threads draining a shared injector channel. Jobs are
//! opaque closures; the machine wraps each submission so the result
//! travels back to the loop thread through its inbound channel.

use parking_lot::Mutex;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

pub(crate) type Job = Box<dyn FnOnce() + Send>;

pub struct WorkerPool {
    tx: Option<mpsc::Sender<Job>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let (tx, rx) = mpsc::channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));
        let handles = (0..size.max(1))
            .map(|i| {
                let rx = Arc::clone(&rx);
                std::thread::Builder::new()
                    .name(format!("isle-work-{i}"))
                    .spawn(move || loop {
                        let job = rx.lock().recv();
                        match job {
                            Ok(job) => job(),
                            Err(_) => break,
                        }
                    })
            })
            .filter_map(Result::ok)
            .collect();
        Self {
            tx: Some(tx),
            handles,
        }
    }

    pub fn threads(&self) -> usize {
        self.handles.len()
    }

    /// Submits a job; fails synchronously once the pool is shut down or
    /// no worker thread could be spawned.
    pub(crate) fn submit(&self, job: Job) -> Result<(), Job> {
        if self.handles.is_empty() {
            return Err(job);
        }
        match &self.tx {
            Some(tx) => tx.send(job).map_err(|e| e.0),
            None => Err(job),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.tx.take();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;

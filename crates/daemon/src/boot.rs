// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Boot-tree construction
//!
//! Walks the configured mounts: resolve (and create) the parent
//! directory, mint the mount's file, then attach it under an exclusive
//! lock. Failures are reported through the machine's message sink and
//! never abort the remaining mounts.

use crate::config::Mount;
use isle_core::{
    path as isle_path, DirEntry, DirOp, FileId, FileInit, Host, LockMode, LockRequest, Payload,
    Request,
};
use isle_engine::{pathfind, PathFind};

/// Attaches every mount to the tree. The root must already exist.
pub fn boot(host: &mut dyn Host, mounts: &[Mount]) {
    host.msg(&format!("isled: building the boot tree ({} mounts)\n", mounts.len()));
    for mount in mounts {
        mount_one(host, mount.clone());
    }
}

fn mount_one(host: &mut dyn Host, mount: Mount) {
    let full = isle_path::normalize(&mount.path);
    let dir = isle_path::dirname(&full).to_string();
    let name = isle_path::basename(&full).to_string();
    if !isle_path::validate_name(&name) {
        host.msg(&format!("isled: mount '{}' has no attachable name\n", mount.path));
        return;
    }
    pathfind(host, PathFind::new(dir).create(), move |host, result| {
        if !result.resolved() {
            host.msg(&format!(
                "isled: cannot prepare directory for mount '{}'\n",
                mount.path
            ));
            return;
        }
        attach(host, result.base, name, mount);
    });
}

fn attach(host: &mut dyn Host, parent: FileId, name: String, mount: Mount) {
    let init = FileInit {
        npath: mount.npath.clone(),
        param: mount.param.clone(),
    };
    let file = match host.file_new(&mount.driver, init) {
        Ok(file) => file,
        Err(err) => {
            host.msg(&format!("isled: mount '{}' failed: {err}\n", mount.path));
            return;
        }
    };
    let lock = LockRequest::new(parent, LockMode::Exclusive, move |host, grant| {
        if !grant.ok {
            host.file_unref(file);
            host.msg(&format!(
                "isled: lost the directory lock for mount '{}'\n",
                mount.path
            ));
            return;
        }
        let label = mount.path.clone();
        let req = Request::new(
            parent,
            Payload::Dir(DirOp::Add {
                entry: DirEntry {
                    name,
                    file,
                    weak: false,
                },
                done: false,
            }),
            move |host, reply| {
                // The directory owns its reference now; drop ours either way.
                host.file_unref(file);
                let attached = reply.result.is_ok()
                    && matches!(reply.payload, Payload::Dir(DirOp::Add { done: true, .. }));
                if attached {
                    host.msg(&format!(
                        "isled: mounted '{}' ({})\n",
                        mount.path, mount.driver
                    ));
                } else {
                    host.msg(&format!("isled: mount '{}' was refused\n", mount.path));
                }
            },
        );
        if host.request(req).is_err() {
            host.file_unref(file);
            host.msg(&format!("isled: mount '{label}' was rejected\n"));
        }
    });
    let _ = host.lock(lock);
}

#[cfg(test)]
#[path = "boot_tests.rs"]
mod tests;

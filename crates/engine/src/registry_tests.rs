// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use isle_core::test_support::null_driver;

#[test]
fn ids_are_monotonic_and_never_recycled() {
    let mut reg = Registry::default();
    let a = reg.insert(null_driver());
    let b = reg.insert(null_driver());
    assert_eq!(a, FileId(0));
    assert_eq!(b, FileId(1));

    reg.remove(a);
    let c = reg.insert(null_driver());
    assert_eq!(c, FileId(2), "removed ids are not reissued");
}

#[test]
fn lookup_is_by_id() {
    let mut reg = Registry::default();
    let ids: Vec<FileId> = (0..16).map(|_| reg.insert(null_driver())).collect();

    // Punch holes to make sure binary search handles gaps
    reg.remove(ids[3]);
    reg.remove(ids[9]);
    reg.remove(ids[15]);

    for (i, id) in ids.iter().enumerate() {
        let hit = reg.get(*id).is_some();
        assert_eq!(hit, !matches!(i, 3 | 9 | 15), "lookup of {id}");
    }
    assert!(reg.get(FileId(999)).is_none());
    assert_eq!(reg.len(), 13);
}

#[test]
fn fresh_slot_has_one_reference_and_no_state() {
    let mut reg = Registry::default();
    let id = reg.insert(null_driver());
    let slot = reg.get(id).unwrap();
    assert_eq!(slot.refcnt, 1);
    assert!(slot.instance.is_none());
    assert!(slot.watches.is_empty());
    assert!(slot.locks.is_empty());
    assert!(!slot.dying);
}

#[test]
fn info_snapshot_reflects_slot() {
    let mut reg = Registry::default();
    let id = reg.insert(null_driver());
    {
        let slot = reg.get_mut(id).unwrap();
        slot.mimetype = Some("application/octet-stream".into());
        slot.cache_hint = 4096;
        slot.last_request = 17;
    }
    let info = reg.get(id).unwrap().info();
    assert_eq!(info.id, id);
    assert_eq!(info.driver, "isle.test.null");
    assert_eq!(info.mimetype.as_deref(), Some("application/octet-stream"));
    assert_eq!(info.cache_hint, 4096);
    assert_eq!(info.last_request, 17);
}

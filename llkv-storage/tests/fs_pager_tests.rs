use std::path::Path;

use llkv_result::Result;
use llkv_storage::pager::fs_pager::FsPager;

use pager_harness::{
    Persistence, run_crud_roundtrip, run_enumerate_keys, run_put_if_absent_race,
    run_reopen_behavior,
};

fn make_fs(path: &Path) -> Result<FsPager> {
    FsPager::open(path)
}

#[test]
fn fs_crud_roundtrip() {
    run_crud_roundtrip::<FsPager, _>(make_fs);
}

#[test]
fn fs_put_if_absent_has_one_winner() {
    run_put_if_absent_race::<FsPager, _>(make_fs);
}

#[test]
fn fs_enumerate_keys() {
    run_enumerate_keys::<FsPager, _>(make_fs);
}

#[test]
fn fs_reopen_behavior_is_persistent() {
    run_reopen_behavior::<FsPager, _>(make_fs, Persistence::Persistent);
}

//! # guestrs Remote Process Handle Integration Tests
//!
//! File: engine/tests/process.rs
//!
//! Kill-tree fallback and idempotency, child enumeration and handle identity.
//!
mod common;

use common::{pid, FakeGuest, FakeKiller, FakeQuery, GuestRun, KillScript, MemoryTransfer};
use guestrs_engine::core::error::GuestError;
use guestrs_engine::remote::RemoteProcessHandle;
use std::collections::HashSet;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::test]
async fn test_kill_tree_uses_direct_kill_first() {
    let guest = FakeGuest::new(MemoryTransfer::new(), |_| GuestRun::exit(0));
    let killer = FakeKiller::new(vec![KillScript::Killed]);
    let handle = RemoteProcessHandle::new(
        pid("4242"),
        common::control(guest.clone(), FakeQuery::new("6.1"), killer.clone()),
    );

    handle.kill_tree(TIMEOUT).await.unwrap();
    assert_eq!(killer.killed(), vec!["4242".to_string()]);
    assert!(guest.commands().is_empty());
}

#[tokio::test]
async fn test_kill_tree_falls_back_to_elevated_taskkill() {
    let guest = FakeGuest::new(MemoryTransfer::new(), |_| GuestRun::exit(0));
    let killer = FakeKiller::new(vec![KillScript::Fail]);
    let handle = RemoteProcessHandle::new(
        pid("4242"),
        common::control(guest.clone(), FakeQuery::new("6.1"), killer.clone()),
    );

    handle.kill_tree(TIMEOUT).await.unwrap();
    assert_eq!(guest.commands(), vec!["taskkill /PID 4242 /T /F".to_string()]);
}

#[tokio::test]
async fn test_kill_tree_is_idempotent_for_exited_process() {
    // Direct kill fails, and the guest-side taskkill reports "not found".
    let guest = FakeGuest::new(MemoryTransfer::new(), |_| GuestRun::exit(128));
    let killer = FakeKiller::new(vec![KillScript::Killed, KillScript::Absent, KillScript::Fail]);
    let handle = RemoteProcessHandle::new(
        pid("4242"),
        common::control(guest.clone(), FakeQuery::new("6.1"), killer),
    );

    handle.kill_tree(TIMEOUT).await.unwrap();
    handle.kill_tree(TIMEOUT).await.unwrap();
    handle.kill_tree(TIMEOUT).await.unwrap();
    assert_eq!(guest.commands().len(), 1);
}

#[tokio::test]
async fn test_kill_tree_surfaces_unexpected_failures() {
    let guest = FakeGuest::new(MemoryTransfer::new(), |_| GuestRun::exit(1));
    let killer = FakeKiller::new(vec![KillScript::Fail]);
    let handle = RemoteProcessHandle::new(
        pid("4242"),
        common::control(guest, FakeQuery::new("6.1"), killer),
    );

    let err = handle.kill_tree(TIMEOUT).await.unwrap_err();
    assert!(matches!(err, GuestError::ToolFailed { exit_code: Some(1), .. }));
}

#[tokio::test]
async fn test_children_are_lazy_handles() {
    let guest = FakeGuest::new(MemoryTransfer::new(), |_| GuestRun::exit(0));
    let query = FakeQuery::scripted("6.1", vec![None], vec![vec!["10", "11", "12"]]);
    let control = common::control(guest, query, FakeKiller::new(vec![]));
    let parent = RemoteProcessHandle::new(pid("1"), control);

    let mut children = parent.children().await.unwrap();
    assert_eq!(children.len(), 3);
    assert_eq!(children.next().unwrap().pid().as_str(), "10");
    let rest: Vec<String> = children.map(|h| h.to_string()).collect();
    assert_eq!(rest, vec!["11".to_string(), "12".to_string()]);
}

#[tokio::test]
async fn test_handles_compare_by_pid() {
    let guest = FakeGuest::new(MemoryTransfer::new(), |_| GuestRun::exit(0));
    let first = common::control(guest.clone(), FakeQuery::new("6.1"), FakeKiller::new(vec![]));
    let second = common::control(guest, FakeQuery::new("6.1"), FakeKiller::new(vec![]));

    let a = RemoteProcessHandle::new(pid("42"), first.clone());
    let b = RemoteProcessHandle::new(pid("42"), second);
    let c = RemoteProcessHandle::new(pid("43"), first);
    assert_eq!(a, b);
    assert_ne!(a, c);

    let set: HashSet<_> = [a, b, c].into_iter().collect();
    assert_eq!(set.len(), 2);
}

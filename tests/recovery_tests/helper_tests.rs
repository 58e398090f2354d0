//! Tests for the recovery helper
//!
//! These tests verify:
//! - The StartScan / NoFlags / EndScan sequence
//! - Foreign and duplicate branches are filtered
//! - How heuristic answers resolve a single branch

use xacoord::recovery::helper;
use xacoord::resource::RecoverFlag;
use xacoord::uid::UidGenerator;
use xacoord::{CoordError, Uid, XaErrorCode, Xid};

use crate::common::{new_log, Call, MockResource, SERVER_ID};

fn our_xid(uids: &UidGenerator) -> Xid {
    uids.generate_xid(&uids.generate_uid())
}

// =============================================================================
// Scan Tests
// =============================================================================

#[test]
fn test_scan_sequence() {
    let log = new_log();
    let db = MockResource::new("db1", &log);
    let uids = UidGenerator::new(SERVER_ID);
    let first = our_xid(&uids);
    let second = our_xid(&uids);
    db.add_in_doubt(first.clone());
    db.add_in_doubt(second.clone());

    let xids = helper::recover(db.as_ref(), "db1", None).unwrap();

    assert_eq!(xids, vec![first, second]);
    assert_eq!(
        db.calls(),
        vec![
            Call::Recover(RecoverFlag::StartScan),
            Call::Recover(RecoverFlag::NoFlags),
            Call::Recover(RecoverFlag::EndScan),
        ]
    );
}

#[test]
fn test_repeated_branches_reported_once() {
    let log = new_log();
    let db = MockResource::new("db1", &log);
    let uids = UidGenerator::new(SERVER_ID);
    db.add_in_doubt(our_xid(&uids));
    db.repeat_on_scan();

    let xids = helper::recover(db.as_ref(), "db1", None).unwrap();

    assert_eq!(xids.len(), 1);
    // nothing new on the first NoFlags call ends the loop
    assert_eq!(db.calls().len(), 3);
}

#[test]
fn test_foreign_format_ignored() {
    let log = new_log();
    let db = MockResource::new("db1", &log);
    let uids = UidGenerator::new(SERVER_ID);
    let ours = our_xid(&uids);
    db.add_in_doubt(Xid::with_format(0x1234, Uid::new(b"gtrid".to_vec()), Uid::new(b"bq".to_vec())));
    db.add_in_doubt(ours.clone());

    let xids = helper::recover(db.as_ref(), "db1", None).unwrap();
    assert_eq!(xids, vec![ours]);
}

#[test]
fn test_other_servers_branches_filtered_when_asked() {
    let log = new_log();
    let db = MockResource::new("db1", &log);
    let ours = our_xid(&UidGenerator::new(SERVER_ID));
    let theirs = our_xid(&UidGenerator::new("other-node"));
    db.add_in_doubt(ours.clone());
    db.add_in_doubt(theirs.clone());

    let xids = helper::recover(db.as_ref(), "db1", Some(SERVER_ID.as_bytes())).unwrap();
    assert_eq!(xids, vec![ours.clone()]);

    let xids = helper::recover(db.as_ref(), "db1", None).unwrap();
    assert_eq!(xids, vec![ours, theirs]);
}

#[test]
fn test_scan_failure_is_error() {
    let log = new_log();
    let db = MockResource::new("db1", &log);
    db.fail_recover(XaErrorCode::ResourceFailure);

    let result = helper::recover(db.as_ref(), "db1", None);
    assert!(matches!(result, Err(CoordError::Resource { .. })));
}

// =============================================================================
// Resolution Tests
// =============================================================================

#[test]
fn test_commit_resolves_branch() {
    let log = new_log();
    let db = MockResource::new("db1", &log);
    let xid = our_xid(&UidGenerator::new(SERVER_ID));

    assert!(helper::commit(db.as_ref(), "db1", &xid).unwrap());
    assert_eq!(db.calls(), vec![Call::Commit { one_phase: false }]);
}

#[test]
fn test_heuristic_commit_is_resolved_and_forgotten() {
    let log = new_log();
    let db = MockResource::new("db1", &log);
    db.fail_commit(XaErrorCode::HeuristicCommit);
    let xid = our_xid(&UidGenerator::new(SERVER_ID));

    assert!(helper::commit(db.as_ref(), "db1", &xid).unwrap());
    assert_eq!(db.calls().last(), Some(&Call::Forget));
}

#[test]
fn test_incompatible_heuristic_is_unresolved() {
    let log = new_log();
    let db = MockResource::new("db1", &log);
    let xid = our_xid(&UidGenerator::new(SERVER_ID));

    db.fail_commit(XaErrorCode::HeuristicRollback);
    assert!(!helper::commit(db.as_ref(), "db1", &xid).unwrap());
    assert_eq!(db.calls().last(), Some(&Call::Forget));

    db.fail_rollback(XaErrorCode::HeuristicMixed);
    assert!(!helper::rollback(db.as_ref(), "db1", &xid).unwrap());
    assert_eq!(db.calls().last(), Some(&Call::Forget));
}

#[test]
fn test_unknown_branch_is_unresolved_without_forget() {
    let log = new_log();
    let db = MockResource::new("db1", &log);
    db.fail_commit(XaErrorCode::NoTransaction);
    let xid = our_xid(&UidGenerator::new(SERVER_ID));

    assert!(!helper::commit(db.as_ref(), "db1", &xid).unwrap());
    assert!(!db.calls().contains(&Call::Forget));
}

#[test]
fn test_rollback_family_counts_as_rolled_back() {
    let log = new_log();
    let db = MockResource::new("db1", &log);
    db.fail_rollback(XaErrorCode::from_code(103));
    let xid = our_xid(&UidGenerator::new(SERVER_ID));

    assert!(helper::rollback(db.as_ref(), "db1", &xid).unwrap());
}

#[test]
fn test_unreachable_resource_is_error() {
    let log = new_log();
    let db = MockResource::new("db1", &log);
    db.fail_commit(XaErrorCode::ResourceFailure);
    let xid = our_xid(&UidGenerator::new(SERVER_ID));

    match helper::commit(db.as_ref(), "db1", &xid) {
        Err(CoordError::Resource { unique_name, source, .. }) => {
            assert_eq!(unique_name, "db1");
            assert_eq!(source.code, XaErrorCode::ResourceFailure);
        }
        other => panic!("expected resource error, got {:?}", other),
    }
}

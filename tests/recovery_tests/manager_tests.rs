//! Tests for recovery driven by a manager
//!
//! These tests verify:
//! - Cold-start recovery against a pre-existing journal
//! - Producers registered after start are recovered before use
//! - Full passes close dangling entries and report failures
//! - A crash between commit decision and completion is repaired on restart

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;
use xacoord::journal::{InMemoryJournal, Journal};
use xacoord::uid::UidGenerator;
use xacoord::{CoordError, JournalKind, Status, TmConfig, TransactionManager, XaErrorCode};

use crate::common::{new_log, start_manager, test_config, Call, MockProducer, MockResource, SERVER_ID};

// =============================================================================
// Helper Functions
// =============================================================================

fn names(list: &[&str]) -> BTreeSet<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn disk_config(dir: &TempDir) -> TmConfig {
    TmConfig::builder()
        .server_id(SERVER_ID)
        .journal(JournalKind::Disk)
        .log_files(dir.path().join("part1.tlog"), dir.path().join("part2.tlog"))
        .background_recovery_interval_secs(0)
        .build()
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_recover_now_requires_running_manager() {
    let manager = TransactionManager::new(test_config()).unwrap();
    assert!(matches!(manager.recover_now(), Err(CoordError::IllegalState(_))));
}

#[test]
fn test_shutdown_is_idempotent() {
    let (manager, _journal) = start_manager(test_config());
    assert!(manager.is_running());

    manager.shutdown();
    manager.shutdown();

    assert!(!manager.is_running());
    assert!(matches!(manager.begin(), Err(CoordError::IllegalState(_))));
}

// =============================================================================
// Cold Start Tests
// =============================================================================

#[test]
fn test_cold_start_finishes_decided_transaction() {
    let journal = Arc::new(InMemoryJournal::new());
    journal.open().unwrap();

    let uids = UidGenerator::new(SERVER_ID);
    let decided = uids.generate_uid();
    journal.log(Status::Committing, &decided, &names(&["db1", "db2"])).unwrap();
    let orphan = uids.generate_uid();

    let log = new_log();
    let db1 = MockResource::new("db1", &log);
    let db2 = MockResource::new("db2", &log);
    db1.add_in_doubt(uids.generate_xid(&decided));
    db1.add_in_doubt(uids.generate_xid(&orphan));

    let manager =
        TransactionManager::with_journal(test_config(), Arc::clone(&journal) as Arc<dyn Journal>).unwrap();
    manager.registry().register(MockProducer::new(&db1)).unwrap();
    manager.registry().register(MockProducer::new(&db2)).unwrap();
    manager.start().unwrap();

    assert!(db1.in_doubt().is_empty());
    assert_eq!(names_of(&db1.calls()), vec!["commit", "rollback"]);
    // db2 held nothing, so its name is closed without a call
    assert!(db2.calls().iter().all(|call| matches!(call, Call::Recover(_))));
    assert!(journal.collect_dangling_records().unwrap().is_empty());

    let stats = manager.recovery_stats();
    assert_eq!(stats.committed, 1);
    assert_eq!(stats.rolled_back, 1);
    assert_eq!(stats.executions, 1);
}

fn names_of(calls: &[Call]) -> Vec<&'static str> {
    calls
        .iter()
        .filter_map(|call| match call {
            Call::Commit { .. } => Some("commit"),
            Call::Rollback => Some("rollback"),
            _ => None,
        })
        .collect()
}

// =============================================================================
// Registration Tests
// =============================================================================

#[test]
fn test_registration_after_start_recovers_producer() {
    let (manager, journal) = start_manager(test_config());
    let log = new_log();
    let db = MockResource::new("db1", &log);
    let uids = UidGenerator::new(SERVER_ID);
    let orphan = uids.generate_xid(&uids.generate_uid());
    db.add_in_doubt(orphan.clone());

    let producer = MockProducer::new(&db);
    let entry = manager.registry().register(Arc::clone(&producer) as Arc<dyn xacoord::ResourceProducer>).unwrap();

    assert!(!entry.is_failed());
    assert_eq!(producer.start_recovery_calls(), 1);
    assert!(db.in_doubt().is_empty());
    assert_eq!(journal.records_for(orphan.gtrid())[0].status(), Status::RolledBack);
}

#[test]
fn test_failed_recovery_blocks_enlistment_until_next_pass() {
    let (manager, _journal) = start_manager(test_config());
    let log = new_log();
    let db = MockResource::new("db1", &log);
    let producer = MockProducer::new(&db);
    producer.fail_start_recovery(true);

    let entry = manager.registry().register(Arc::clone(&producer) as Arc<dyn xacoord::ResourceProducer>).unwrap();
    assert!(entry.is_failed());

    let tx = manager.begin().unwrap();
    assert!(matches!(tx.enlist_resource(&entry), Err(CoordError::ResourceUnavailable(_))));

    let pass = manager.recover_now().unwrap().unwrap();
    assert_eq!(pass.failed_resources, vec!["db1"]);

    producer.fail_start_recovery(false);
    let pass = manager.recover_now().unwrap().unwrap();
    assert!(pass.failed_resources.is_empty());
    assert!(!entry.is_failed());
    assert!(tx.enlist_resource(&entry).is_ok());
}

#[test]
fn test_running_transaction_survives_recovery_pass() {
    let (manager, _journal) = start_manager(test_config());
    let log = new_log();
    let db = MockResource::new("db1", &log);
    manager.registry().register(MockProducer::new(&db)).unwrap();

    let tx = manager.begin().unwrap();
    let xid = tx.enlist("db1", db.clone(), 0).unwrap();
    db.add_in_doubt(xid);

    let pass = manager.recover_now().unwrap().unwrap();
    assert_eq!(pass.rolled_back, 0);
    assert!(!db.calls().contains(&Call::Rollback));

    tx.commit().unwrap();
}

#[test]
fn test_transaction_finishing_during_pass_keeps_failed_branch_dangling() {
    let (manager, journal) = start_manager(test_config());
    let log = new_log();
    let a = MockResource::new("a", &log);
    let b = MockResource::new("b", &log);
    let zz = MockResource::new("zz", &log);
    manager.registry().register(MockProducer::new(&a)).unwrap();
    manager.registry().register(MockProducer::new(&b)).unwrap();
    let last = MockProducer::new(&zz);
    manager.registry().register(Arc::clone(&last) as Arc<dyn xacoord::ResourceProducer>).unwrap();

    let tx = manager.begin().unwrap();
    tx.enlist("a", a.clone(), 0).unwrap();
    let b_xid = tx.enlist("b", b.clone(), 0).unwrap();
    b.fail_commit(XaErrorCode::ResourceFailure);

    // The commit runs after a and b were scanned, inside zz's scan
    {
        let tx = Arc::clone(&tx);
        let b = b.clone();
        let b_xid = b_xid.clone();
        last.on_start_recovery(move || {
            if tx.status() != Status::Active {
                return;
            }
            let result = tx.commit();
            assert!(matches!(result, Err(CoordError::HeuristicMixed { hazard: false, .. })));
            b.add_in_doubt(b_xid.clone());
        });
    }

    let pass = manager.recover_now().unwrap().unwrap();
    assert_eq!(pass.closed_dangling, 0);
    assert_eq!(pass.rolled_back, 0);

    let dangling = journal.collect_dangling_records().unwrap();
    assert_eq!(dangling[tx.gtrid()].unique_names(), &names(&["b"]));
    assert!(!b.calls().contains(&Call::Rollback));

    // the next pass finishes the commit on b
    last.clear_start_recovery_hook();
    b.heal();
    let pass = manager.recover_now().unwrap().unwrap();
    assert_eq!(pass.committed, 1);
    assert_eq!(pass.rolled_back, 0);
    assert!(b.in_doubt().is_empty());
    assert!(!b.calls().contains(&Call::Rollback));
    assert!(journal.collect_dangling_records().unwrap().is_empty());
    assert_eq!(journal.records_for(tx.gtrid()).last().unwrap().status(), Status::Committed);
}

// =============================================================================
// Full Pass Tests
// =============================================================================

#[test]
fn test_pass_closes_names_no_resource_holds() {
    let (manager, journal) = start_manager(test_config());
    let log = new_log();
    let db = MockResource::new("db1", &log);
    manager.registry().register(MockProducer::new(&db)).unwrap();

    let gtrid = UidGenerator::new(SERVER_ID).generate_uid();
    journal.log(Status::Committing, &gtrid, &names(&["db1", "gone"])).unwrap();

    let pass = manager.recover_now().unwrap().unwrap();
    assert_eq!(pass.resources, 1);
    assert_eq!(pass.closed_dangling, 1);

    // "gone" is not registered, so it stays dangling
    let dangling = journal.collect_dangling_records().unwrap();
    assert_eq!(dangling[&gtrid].unique_names(), &names(&["gone"]));
}

#[test]
fn test_background_recovery_runs() {
    let config = TmConfig {
        background_recovery_interval_secs: 1,
        ..test_config()
    };
    let (manager, _journal) = start_manager(config);

    let deadline = Instant::now() + Duration::from_secs(10);
    while manager.recovery_stats().executions < 2 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(50));
    }
    assert!(manager.recovery_stats().executions >= 2);

    manager.shutdown();
}

// =============================================================================
// Crash Tests
// =============================================================================

#[test]
fn test_restart_completes_interrupted_commit() {
    let dir = TempDir::new().unwrap();
    let log = new_log();
    let a = MockResource::new("a", &log);
    let b = MockResource::new("b", &log);
    b.fail_commit(XaErrorCode::ResourceFailure);

    let first = TransactionManager::new(disk_config(&dir)).unwrap();
    first.start().unwrap();
    let tx = first.begin().unwrap();
    tx.enlist("a", a.clone(), 0).unwrap();
    let b_xid = tx.enlist("b", b.clone(), 0).unwrap();
    assert!(matches!(
        tx.commit(),
        Err(CoordError::HeuristicMixed { hazard: false, .. })
    ));
    assert_eq!(first.journal_stats().unwrap().dangling, 1);
    first.shutdown();

    // b comes back still holding its prepared branch
    b.heal();
    b.add_in_doubt(b_xid);

    let second = TransactionManager::new(disk_config(&dir)).unwrap();
    second.registry().register(MockProducer::new(&a)).unwrap();
    second.registry().register(MockProducer::new(&b)).unwrap();
    second.start().unwrap();

    assert!(b.in_doubt().is_empty());
    assert_eq!(b.calls().iter().filter(|c| **c == Call::Commit { one_phase: false }).count(), 2);
    assert_eq!(second.journal_stats().unwrap().dangling, 0);
    assert_eq!(second.recovery_stats().committed, 1);
    second.shutdown();
}

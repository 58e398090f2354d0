//! Tests for the dual-file disk journal
//!
//! These tests verify:
//! - Opening creates both files and locks them
//! - Dangling transactions survive a restart
//! - Rollover carries dangling records into the other file
//! - Corrupted records fail startup unless skipping is enabled

use std::collections::HashSet;

use tempfile::TempDir;
use xacoord::journal::{DiskJournal, DiskJournalConfig, Journal, Status, HEADER_LENGTH};
use xacoord::uid::UidGenerator;
use xacoord::{CoordError, TmConfig};

use super::{names, overwrite};

// =============================================================================
// Helper Functions
// =============================================================================

fn journal_config(dir: &TempDir, max_file_length: u64) -> DiskJournalConfig {
    DiskJournalConfig {
        part1: dir.path().join("logs").join("part1.tlog"),
        part2: dir.path().join("logs").join("part2.tlog"),
        max_file_length,
        forced_write_enabled: true,
        skip_corrupted_logs: false,
    }
}

fn open_journal(config: &DiskJournalConfig) -> DiskJournal {
    let journal = DiskJournal::new(config.clone());
    journal.open().unwrap();
    journal
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_open_creates_both_files() {
    let temp = TempDir::new().unwrap();
    let config = journal_config(&temp, 64 * 1024);
    let journal = open_journal(&config);

    assert!(journal.is_open());
    assert!(config.part1.exists());
    assert!(config.part2.exists());
    let active = journal.active_path().unwrap();
    assert!(active == config.part1 || active == config.part2);
}

#[test]
fn test_log_requires_open() {
    let temp = TempDir::new().unwrap();
    let journal = DiskJournal::new(journal_config(&temp, 64 * 1024));
    let gtrid = UidGenerator::new("disk").generate_uid();

    let result = journal.log(Status::Committing, &gtrid, &names(&["db1"]));
    assert!(matches!(result, Err(CoordError::IllegalState(_))));
}

#[test]
fn test_second_instance_is_locked_out() {
    let temp = TempDir::new().unwrap();
    let config = journal_config(&temp, 64 * 1024);
    let _first = open_journal(&config);

    let second = DiskJournal::new(config);
    assert!(matches!(second.open(), Err(CoordError::JournalLocked { .. })));
}

#[test]
fn test_config_derived_from_tm_config() {
    let temp = TempDir::new().unwrap();
    let tm = TmConfig::builder()
        .journal_dir(temp.path())
        .max_log_size_mb(3)
        .forced_write_enabled(false)
        .build();

    let config = DiskJournalConfig::from(&tm);
    assert_eq!(config.part1, temp.path().join("part1.tlog"));
    assert_eq!(config.part2, temp.path().join("part2.tlog"));
    assert_eq!(config.max_file_length, 3 * 1024 * 1024);
    assert!(!config.forced_write_enabled);
}

#[test]
fn test_force_without_forced_writes_is_noop() {
    let temp = TempDir::new().unwrap();
    let mut config = journal_config(&temp, 64 * 1024);
    config.forced_write_enabled = false;
    let journal = open_journal(&config);

    let gtrid = UidGenerator::new("disk").generate_uid();
    journal.log(Status::Committing, &gtrid, &names(&["db1"])).unwrap();
    journal.force().unwrap();
}

// =============================================================================
// Restart Tests
// =============================================================================

#[test]
fn test_dangling_transactions_survive_restart() {
    let temp = TempDir::new().unwrap();
    let config = journal_config(&temp, 64 * 1024);
    let uids = UidGenerator::new("disk");
    let finished = uids.generate_uid();
    let in_doubt = uids.generate_uid();

    {
        let journal = open_journal(&config);
        journal.log(Status::Committing, &finished, &names(&["db1", "db2"])).unwrap();
        journal.log(Status::Committing, &in_doubt, &names(&["db1", "db2"])).unwrap();
        journal.force().unwrap();
        journal.log(Status::Committed, &finished, &names(&["db1", "db2"])).unwrap();
        journal.log(Status::Committed, &in_doubt, &names(&["db1"])).unwrap();
        journal.close().unwrap();
    }

    let journal = open_journal(&config);
    let dangling = journal.collect_dangling_records().unwrap();
    assert_eq!(dangling.len(), 1);
    assert_eq!(dangling[&in_doubt].unique_names(), &names(&["db2"]));
}

#[test]
fn test_restart_after_crash_keeps_records() {
    let temp = TempDir::new().unwrap();
    let config = journal_config(&temp, 64 * 1024);
    let gtrid = UidGenerator::new("disk").generate_uid();

    {
        let journal = open_journal(&config);
        journal.log(Status::Committing, &gtrid, &names(&["db1"])).unwrap();
        journal.force().unwrap();
        // dropped without close
    }

    let journal = open_journal(&config);
    assert!(journal.collect_dangling_records().unwrap().contains_key(&gtrid));
}

#[test]
fn test_stats_report_active_file() {
    let temp = TempDir::new().unwrap();
    let config = journal_config(&temp, 64 * 1024);
    let journal = open_journal(&config);
    let gtrid = UidGenerator::new("disk").generate_uid();
    journal.log(Status::Committing, &gtrid, &names(&["db1"])).unwrap();

    let stats = journal.stats().unwrap();
    assert_eq!(stats.active_file, journal.active_path());
    assert_eq!(stats.max_file_length, 64 * 1024);
    assert!(stats.position > HEADER_LENGTH);
    assert_eq!(stats.dangling, 1);
}

// =============================================================================
// Rollover Tests
// =============================================================================

#[test]
fn test_rollover_carries_dangling_records() {
    let temp = TempDir::new().unwrap();
    let config = journal_config(&temp, 1024);
    let uids = UidGenerator::new("disk");
    let in_doubt = uids.generate_uid();

    let journal = open_journal(&config);
    journal.log(Status::Committing, &in_doubt, &names(&["db1", "db2"])).unwrap();

    let mut active_files = HashSet::new();
    for _ in 0..40 {
        let gtrid = uids.generate_uid();
        journal.log(Status::Committing, &gtrid, &names(&["db1", "db2"])).unwrap();
        journal.log(Status::Committed, &gtrid, &names(&["db1", "db2"])).unwrap();
        active_files.insert(journal.active_path().unwrap());
    }

    assert_eq!(active_files.len(), 2, "journal never rolled over");
    let dangling = journal.collect_dangling_records().unwrap();
    assert_eq!(dangling.len(), 1);
    assert_eq!(dangling[&in_doubt].unique_names(), &names(&["db1", "db2"]));

    let active = journal.active_path().unwrap();
    journal.close().unwrap();

    // the newest header timestamp decides which file is active on restart
    let reopened = open_journal(&config);
    assert_eq!(reopened.active_path().unwrap(), active);
    let dangling = reopened.collect_dangling_records().unwrap();
    assert_eq!(dangling.len(), 1);
    assert!(dangling.contains_key(&in_doubt));
}

#[test]
fn test_record_larger_than_file_fails() {
    let temp = TempDir::new().unwrap();
    let config = journal_config(&temp, HEADER_LENGTH + 64);
    let journal = open_journal(&config);
    let gtrid = UidGenerator::new("disk").generate_uid();

    let long_name = "x".repeat(200);
    let result = journal.log(Status::Committing, &gtrid, &names(&[long_name.as_str()]));
    assert!(matches!(result, Err(CoordError::JournalWrite(_))));
}

// =============================================================================
// Corruption Tests
// =============================================================================

#[test]
fn test_corrupted_record_fails_startup_unless_skipped() {
    let temp = TempDir::new().unwrap();
    let mut config = journal_config(&temp, 64 * 1024);
    let uids = UidGenerator::new("disk");
    let damaged = uids.generate_uid();
    let intact = uids.generate_uid();

    let active = {
        let journal = open_journal(&config);
        journal.log(Status::Committing, &damaged, &names(&["db1"])).unwrap();
        journal.log(Status::Committing, &intact, &names(&["db1"])).unwrap();
        let active = journal.active_path().unwrap();
        journal.close().unwrap();
        active
    };
    // time field of the first record
    overwrite(&active, HEADER_LENGTH + 12, &[0xff]);

    let strict = DiskJournal::new(config.clone());
    assert!(matches!(strict.open(), Err(CoordError::Corruption(_))));
    drop(strict);

    config.skip_corrupted_logs = true;
    let lenient = open_journal(&config);
    let dangling = lenient.collect_dangling_records().unwrap();
    assert!(!dangling.contains_key(&damaged));
    assert!(dangling.contains_key(&intact));
}

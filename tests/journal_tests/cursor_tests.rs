//! Tests for journal replay
//!
//! These tests verify:
//! - Records come back in write order
//! - Bytes past the header's write position are never read
//! - CRC, length and truncation damage is reported with its offset
//! - Skip-corrupted versus fail-fast iteration

use std::path::Path;

use xacoord::error::CorruptionKind;
use xacoord::journal::{
    JournalAppender, JournalCursor, JournalIterator, LogRecord, Status, HEADER_LENGTH,
};
use xacoord::uid::UidGenerator;
use xacoord::CoordError;

use super::{names, overwrite, setup_temp_journal};

const MAX_LENGTH: u64 = 64 * 1024;

/// Offset of the time field inside a record
const TIME_OFFSET: u64 = 12;

// =============================================================================
// Helper Functions
// =============================================================================

/// Write `count` records and return them with their file offsets
fn write_records(path: &Path, count: i32) -> Vec<(u64, LogRecord)> {
    let uids = UidGenerator::new("cursor");
    let appender = JournalAppender::open(path, MAX_LENGTH).unwrap();
    let mut written = Vec::new();
    for seq in 0..count {
        let record = LogRecord::new(Status::Committing, uids.generate_uid(), names(&["db1"]), seq);
        let offset = appender.position();
        appender.append(&record).unwrap();
        written.push((offset, record));
    }
    appender.close().unwrap();
    written
}

fn corruption_kind(error: CoordError) -> CorruptionKind {
    match error {
        CoordError::Corruption(e) => e.kind,
        other => panic!("expected corruption, got {}", other),
    }
}

// =============================================================================
// Reading Tests
// =============================================================================

#[test]
fn test_reads_records_in_write_order() {
    let (_temp, path) = setup_temp_journal();
    let written = write_records(&path, 5);

    let mut cursor = JournalCursor::open(&path).unwrap();
    for (_, expected) in &written {
        let record = cursor.read_next(false).unwrap().unwrap();
        assert_eq!(&record, expected);
    }
    assert!(cursor.read_next(false).unwrap().is_none());
    assert_eq!(cursor.position(), cursor.end_position());
}

#[test]
fn test_empty_journal_has_no_records() {
    let (_temp, path) = setup_temp_journal();
    write_records(&path, 0);

    let mut cursor = JournalCursor::open(&path).unwrap();
    assert_eq!(cursor.end_position(), HEADER_LENGTH);
    assert!(cursor.read_next(false).unwrap().is_none());
}

#[test]
fn test_ignores_bytes_past_write_position() {
    let (_temp, path) = setup_temp_journal();
    write_records(&path, 2);

    let end = JournalCursor::open(&path).unwrap().end_position();
    // a record that was being written when the process died
    let partial = LogRecord::new(
        Status::Committed,
        UidGenerator::new("cursor").generate_uid(),
        names(&["db1"]),
        99,
    )
    .to_bytes();
    overwrite(&path, end, &partial[..partial.len() / 2]);

    let records: Vec<_> = JournalIterator::new(JournalCursor::open(&path).unwrap(), false, false)
        .map(|r| r.unwrap())
        .collect();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.status() == Status::Committing));
}

// =============================================================================
// Corruption Tests
// =============================================================================

#[test]
fn test_crc_mismatch_reported_at_record_offset() {
    let (_temp, path) = setup_temp_journal();
    let written = write_records(&path, 3);
    let (offset, _) = written[1];
    overwrite(&path, offset + TIME_OFFSET, &[0xff]);

    let mut cursor = JournalCursor::open(&path).unwrap();
    assert!(cursor.read_next(false).unwrap().is_some());

    match cursor.read_next(false) {
        Err(CoordError::Corruption(e)) => {
            assert_eq!(e.position, offset);
            assert!(matches!(e.kind, CorruptionKind::CrcMismatch { .. }));
        }
        other => panic!("expected a CRC mismatch, got {:?}", other.map(|_| ())),
    }

    // the damaged record's length was intact, so reading resumes after it
    let third = cursor.read_next(false).unwrap().unwrap();
    assert_eq!(third, written[2].1);
}

#[test]
fn test_skip_crc_check_accepts_damaged_checksum() {
    let (_temp, path) = setup_temp_journal();
    let written = write_records(&path, 1);
    overwrite(&path, written[0].0 + TIME_OFFSET, &[0xff]);

    let mut cursor = JournalCursor::open(&path).unwrap();
    let record = cursor.read_next(true).unwrap().unwrap();
    assert!(!record.is_valid());
    assert_eq!(record.gtrid(), written[0].1.gtrid());
}

#[test]
fn test_bad_record_length_stops_replay() {
    let (_temp, path) = setup_temp_journal();
    let written = write_records(&path, 3);
    let (offset, _) = written[1];
    overwrite(&path, offset + 4, &i32::MAX.to_be_bytes());

    let mut cursor = JournalCursor::open(&path).unwrap();
    assert!(cursor.read_next(false).unwrap().is_some());

    let kind = corruption_kind(cursor.read_next(false).unwrap_err());
    assert_eq!(kind, CorruptionKind::BadRecordLength(i32::MAX));
    // nothing after an untrustworthy length can be located
    assert!(cursor.read_next(false).unwrap().is_none());
}

#[test]
fn test_truncated_tail_reported() {
    let (_temp, path) = setup_temp_journal();
    let written = write_records(&path, 2);
    let (offset, _) = written[1];
    // header claims only part of the second record was written
    overwrite(&path, 13, &((offset + 4) as i64).to_be_bytes());

    let mut cursor = JournalCursor::open(&path).unwrap();
    assert!(cursor.read_next(false).unwrap().is_some());

    let kind = corruption_kind(cursor.read_next(false).unwrap_err());
    assert!(matches!(kind, CorruptionKind::Truncated { .. }));
}

#[test]
fn test_bad_end_marker_reported() {
    let (_temp, path) = setup_temp_journal();
    let written = write_records(&path, 1);
    let (offset, record) = &written[0];
    let end_marker = offset + record.calculate_total_size() as u64 - 4;
    overwrite(&path, end_marker, &[0, 0, 0, 0]);

    let mut cursor = JournalCursor::open(&path).unwrap();
    let kind = corruption_kind(cursor.read_next(false).unwrap_err());
    assert_eq!(kind, CorruptionKind::BadEndMarker(0));
}

// =============================================================================
// Iterator Tests
// =============================================================================

#[test]
fn test_iterator_skips_corrupted_records_when_asked() {
    let (_temp, path) = setup_temp_journal();
    let written = write_records(&path, 3);
    overwrite(&path, written[1].0 + TIME_OFFSET, &[0xff]);

    let mut iter = JournalIterator::new(JournalCursor::open(&path).unwrap(), false, true);
    let records: Vec<_> = iter.by_ref().map(|r| r.unwrap()).collect();

    assert_eq!(records, vec![written[0].1.clone(), written[2].1.clone()]);
    assert_eq!(iter.corrupted_count(), 1);
}

#[test]
fn test_iterator_stops_at_first_corruption() {
    let (_temp, path) = setup_temp_journal();
    let written = write_records(&path, 3);
    overwrite(&path, written[1].0 + TIME_OFFSET, &[0xff]);

    let mut iter = JournalIterator::new(JournalCursor::open(&path).unwrap(), false, false);
    assert!(iter.next().unwrap().is_ok());
    assert!(matches!(iter.next(), Some(Err(CoordError::Corruption(_)))));
    assert!(iter.next().is_none());
}

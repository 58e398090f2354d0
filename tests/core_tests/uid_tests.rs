//! Tests for transaction identifiers

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use xacoord::uid::{current_time_millis, Uid, UidGenerator, MAX_SERVER_ID_LENGTH, UID_SUFFIX_LENGTH};
use xacoord::Xid;

// =============================================================================
// Layout Tests
// =============================================================================

#[test]
fn test_uid_embeds_server_id_time_and_sequence() {
    let before = current_time_millis();
    let uids = UidGenerator::new("node-a");
    let uid = uids.generate_uid();
    let after = current_time_millis();

    assert_eq!(uid.len(), "node-a".len() + UID_SUFFIX_LENGTH);
    assert_eq!(uid.extract_server_id(), Some(&b"node-a"[..]));
    assert_eq!(uid.extract_sequence(), Some(1));

    let timestamp = uid.extract_timestamp().unwrap();
    assert!(timestamp >= before && timestamp <= after);
}

#[test]
fn test_sequence_increments_per_generator() {
    let first = UidGenerator::new("node-a");
    let second = UidGenerator::new("node-b");

    assert_eq!(first.generate_uid().extract_sequence(), Some(1));
    assert_eq!(first.generate_uid().extract_sequence(), Some(2));
    assert_eq!(second.generate_uid().extract_sequence(), Some(1));
}

#[test]
fn test_short_uid_has_no_parts() {
    let uid = Uid::new(vec![1u8, 2, 3]);
    assert_eq!(uid.extract_server_id(), None);
    assert_eq!(uid.extract_timestamp(), None);
    assert_eq!(uid.extract_sequence(), None);
}

#[test]
fn test_long_server_id_truncated() {
    let long_id = "s".repeat(80);
    let uids = UidGenerator::new(long_id);

    assert_eq!(uids.server_id().len(), MAX_SERVER_ID_LENGTH);
    assert_eq!(uids.generate_uid().len(), MAX_SERVER_ID_LENGTH + UID_SUFFIX_LENGTH);
}

// =============================================================================
// Identity Tests
// =============================================================================

#[test]
fn test_equal_bytes_mean_equal_uids() {
    let a = Uid::new(b"same-bytes".to_vec());
    let b = Uid::new(b"same-bytes".to_vec());
    let c = Uid::new(b"other-bytes".to_vec());

    assert_eq!(a, b);
    assert_ne!(a, c);

    let set: HashSet<Uid> = [a, b, c].into_iter().collect();
    assert_eq!(set.len(), 2);
}

#[test]
fn test_hex_rendering_is_upper_case() {
    let uid = Uid::new(vec![0x0a, 0xff, 0x00, 0x7b]);
    assert_eq!(uid.as_hex(), "0AFF007B");
    assert_eq!(uid.to_string(), "0AFF007B");
}

#[test]
fn test_uids_unique_across_threads() {
    let uids = Arc::new(UidGenerator::new("node-a"));
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let uids = Arc::clone(&uids);
            thread::spawn(move || (0..2_500).map(|_| uids.generate_uid()).collect::<Vec<_>>())
        })
        .collect();

    let mut all = HashSet::new();
    for handle in handles {
        for uid in handle.join().unwrap() {
            assert!(all.insert(uid), "duplicate uid generated");
        }
    }
    assert_eq!(all.len(), 10_000);
}

// =============================================================================
// Xid Tests
// =============================================================================

#[test]
fn test_generated_xid_carries_gtrid_and_fresh_bqual() {
    let uids = UidGenerator::new("node-a");
    let gtrid = uids.generate_uid();

    let first = uids.generate_xid(&gtrid);
    let second = uids.generate_xid(&gtrid);

    assert_eq!(first.format_id(), Xid::FORMAT_ID);
    assert!(first.is_ours());
    assert_eq!(first.gtrid(), &gtrid);
    assert_eq!(second.gtrid(), &gtrid);
    assert_ne!(first.bqual(), second.bqual());
    assert_ne!(first, second);
}

#[test]
fn test_foreign_format_is_not_ours() {
    let uids = UidGenerator::new("node-a");
    let xid = Xid::with_format(0x1234, uids.generate_uid(), uids.generate_uid());
    assert!(!xid.is_ours());
}

//! Global transaction identifiers
//!
//! A [`Uid`] is an immutable byte string laid out as
//!
//! ```text
//! ┌──────────────────────┬────────────────────┬──────────────────┐
//! │ server id (variable) │ timestamp i64 (BE) │ sequence i32 (BE)│
//! └──────────────────────┴────────────────────┴──────────────────┘
//! ```
//!
//! Hash and hex rendering are computed once at construction.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::resource::Xid;

/// Timestamp (8) + sequence (4)
pub const UID_SUFFIX_LENGTH: usize = 12;

/// XA limits a gtrid to 64 bytes; the suffix takes 12 and one byte is kept spare.
pub const MAX_SERVER_ID_LENGTH: usize = 51;

/// An immutable transaction or branch identifier
#[derive(Clone)]
pub struct Uid {
    bytes: Box<[u8]>,
    hash: u32,
    hex: String,
}

impl Uid {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        let bytes = bytes.into().into_boxed_slice();
        let hash = crc32fast::hash(&bytes);
        let hex = encode_hex(&bytes);
        Self { bytes, hash, hex }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Upper-case hex rendering, cached
    pub fn as_hex(&self) -> &str {
        &self.hex
    }

    /// Server id prefix, or `None` when the uid is too short to carry one
    pub fn extract_server_id(&self) -> Option<&[u8]> {
        let len = self.bytes.len().checked_sub(UID_SUFFIX_LENGTH)?;
        Some(&self.bytes[..len])
    }

    /// Creation time in unix milliseconds
    pub fn extract_timestamp(&self) -> Option<i64> {
        let start = self.bytes.len().checked_sub(UID_SUFFIX_LENGTH)?;
        let raw: [u8; 8] = self.bytes[start..start + 8].try_into().ok()?;
        Some(i64::from_be_bytes(raw))
    }

    pub fn extract_sequence(&self) -> Option<i32> {
        if self.bytes.len() < UID_SUFFIX_LENGTH {
            return None;
        }
        let raw: [u8; 4] = self.bytes[self.bytes.len() - 4..].try_into().ok()?;
        Some(i32::from_be_bytes(raw))
    }
}

impl PartialEq for Uid {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.bytes == other.bytes
    }
}

impl Eq for Uid {}

impl Hash for Uid {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u32(self.hash);
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex)
    }
}

impl fmt::Debug for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uid({})", self.hex)
    }
}

fn encode_hex(bytes: &[u8]) -> String {
    const DIGITS: &[u8; 16] = b"0123456789ABCDEF";
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push(DIGITS[(b >> 4) as usize] as char);
        out.push(DIGITS[(b & 0x0f) as usize] as char);
    }
    out
}

// =============================================================================
// Generator
// =============================================================================

/// Generates uids for one coordinator instance.
///
/// The sequence counter is owned by the generator, so two managers in one
/// process never share state.
#[derive(Debug)]
pub struct UidGenerator {
    server_id: Vec<u8>,
    sequence: AtomicI32,
}

impl UidGenerator {
    pub fn new(server_id: impl Into<Vec<u8>>) -> Self {
        let mut server_id = server_id.into();
        server_id.truncate(MAX_SERVER_ID_LENGTH);
        Self {
            server_id,
            sequence: AtomicI32::new(0),
        }
    }

    pub fn server_id(&self) -> &[u8] {
        &self.server_id
    }

    /// Generate a fresh uid: server id, current time, next sequence number
    pub fn generate_uid(&self) -> Uid {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst).wrapping_add(1);
        let mut bytes = Vec::with_capacity(self.server_id.len() + UID_SUFFIX_LENGTH);
        bytes.extend_from_slice(&self.server_id);
        bytes.extend_from_slice(&current_time_millis().to_be_bytes());
        bytes.extend_from_slice(&sequence.to_be_bytes());
        Uid::new(bytes)
    }

    /// Generate a branch id for `gtrid` with a fresh branch qualifier
    pub fn generate_xid(&self, gtrid: &Uid) -> Xid {
        Xid::new(gtrid.clone(), self.generate_uid())
    }
}

/// Wall clock in unix milliseconds
pub fn current_time_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

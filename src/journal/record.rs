//! Journal record definitions
//!
//! One [`LogRecord`] is written for each journaled status transition.
//!
//! ## Wire Format (big-endian)
//! ```text
//! ┌────────────┬────────────────┬────────────────┬──────────┬────────────┬───────────┐
//! │ status i32 │ recordLength   │ headerLength   │ time i64 │ seqNum i32 │ crc32 i32 │
//! │            │ i32            │ i32            │          │            │           │
//! ├────────────┴────────────────┴────────────────┴──────────┴────────────┴───────────┤
//! │ gtridLength u8 │ gtrid │ nameCount i32 │ (nameLength i16, name)* │ endMarker i32 │
//! └──────────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `recordLength` counts everything after itself. `headerLength` counts the
//! fixed fields from `headerLength` through `crc32`; a reader skips any extra
//! header bytes a newer writer put there. The CRC covers every field except
//! `crc32` and the end marker.

use std::collections::BTreeSet;
use std::fmt;

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

use crate::error::CorruptionKind;
use crate::uid::{current_time_millis, Uid};

/// Trailing marker of every record
pub const END_RECORD: i32 = 0x786e_7442;

/// headerLength (4) + time (8) + sequenceNumber (4) + crc32 (4)
pub const RECORD_HEADER_LENGTH: i32 = 20;

/// status (4) + recordLength (4)
pub const RECORD_PREFIX_LENGTH: usize = 8;

/// Header, empty gtrid, zero names, end marker
pub const MIN_RECORD_LENGTH: i32 = RECORD_HEADER_LENGTH + 1 + 4 + 4;

/// Transaction status codes, numbered as in JTA's `Status`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Active,
    MarkedRollback,
    Prepared,
    Committed,
    RolledBack,
    Unknown,
    NoTransaction,
    Preparing,
    Committing,
    RollingBack,
}

impl Status {
    pub fn code(&self) -> i32 {
        match self {
            Status::Active => 0,
            Status::MarkedRollback => 1,
            Status::Prepared => 2,
            Status::Committed => 3,
            Status::RolledBack => 4,
            Status::Unknown => 5,
            Status::NoTransaction => 6,
            Status::Preparing => 7,
            Status::Committing => 8,
            Status::RollingBack => 9,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        let status = match code {
            0 => Status::Active,
            1 => Status::MarkedRollback,
            2 => Status::Prepared,
            3 => Status::Committed,
            4 => Status::RolledBack,
            5 => Status::Unknown,
            6 => Status::NoTransaction,
            7 => Status::Preparing,
            8 => Status::Committing,
            9 => Status::RollingBack,
            _ => return None,
        };
        Some(status)
    }

    /// Statuses that resolve names out of the dangling index
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Committed | Status::RolledBack | Status::Unknown)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Status::Active => "ACTIVE",
            Status::MarkedRollback => "MARKED_ROLLBACK",
            Status::Prepared => "PREPARED",
            Status::Committed => "COMMITTED",
            Status::RolledBack => "ROLLEDBACK",
            Status::Unknown => "UNKNOWN",
            Status::NoTransaction => "NO_TRANSACTION",
            Status::Preparing => "PREPARING",
            Status::Committing => "COMMITTING",
            Status::RollingBack => "ROLLING_BACK",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Log Record
// =============================================================================

/// A single journal record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    status: Status,
    record_length: i32,
    header_length: i32,
    /// Unix millis when the record was created
    time: i64,
    sequence_number: i32,
    crc32: u32,
    gtrid: Uid,
    unique_names: BTreeSet<String>,
    end_record: i32,
}

impl LogRecord {
    /// Build a fresh record; length and CRC are computed here
    pub fn new(status: Status, gtrid: Uid, unique_names: BTreeSet<String>, sequence_number: i32) -> Self {
        Self::with_time(status, gtrid, unique_names, sequence_number, current_time_millis())
    }

    pub fn with_time(
        status: Status,
        gtrid: Uid,
        unique_names: BTreeSet<String>,
        sequence_number: i32,
        time: i64,
    ) -> Self {
        let mut record = Self {
            status,
            record_length: 0,
            header_length: RECORD_HEADER_LENGTH,
            time,
            sequence_number,
            crc32: 0,
            gtrid,
            unique_names,
            end_record: END_RECORD,
        };
        record.refresh();
        record
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn record_length(&self) -> i32 {
        self.record_length
    }

    pub fn header_length(&self) -> i32 {
        self.header_length
    }

    pub fn time(&self) -> i64 {
        self.time
    }

    pub fn sequence_number(&self) -> i32 {
        self.sequence_number
    }

    pub fn crc32(&self) -> u32 {
        self.crc32
    }

    pub fn gtrid(&self) -> &Uid {
        &self.gtrid
    }

    pub fn unique_names(&self) -> &BTreeSet<String> {
        &self.unique_names
    }

    pub fn end_record(&self) -> i32 {
        self.end_record
    }

    /// Drop `names` from this record; returns whether anything changed
    pub fn remove_unique_names<'a>(&mut self, names: impl IntoIterator<Item = &'a String>) -> bool {
        let mut changed = false;
        for name in names {
            changed |= self.unique_names.remove(name);
        }
        if changed {
            self.refresh();
        }
        changed
    }

    /// Merge `names` into this record; returns whether anything changed
    pub fn add_unique_names<'a>(&mut self, names: impl IntoIterator<Item = &'a String>) -> bool {
        let mut changed = false;
        for name in names {
            changed |= self.unique_names.insert(name.clone());
        }
        if changed {
            self.refresh();
        }
        changed
    }

    /// Recompute record length and CRC together
    pub fn refresh(&mut self) {
        self.record_length = self.calculate_record_length();
        self.crc32 = self.calculate_crc32();
    }

    /// A record is trustworthy iff its CRC and end marker check out
    pub fn is_valid(&self) -> bool {
        self.crc32 == self.calculate_crc32() && self.end_record == END_RECORD
    }

    pub fn calculate_record_length(&self) -> i32 {
        let names: usize = self.unique_names.iter().map(|n| 2 + n.len()).sum();
        self.header_length + 1 + self.gtrid.len() as i32 + 4 + names as i32 + 4
    }

    /// Serialized size including the status and recordLength prefix
    pub fn calculate_total_size(&self) -> usize {
        RECORD_PREFIX_LENGTH + self.record_length as usize
    }

    pub fn calculate_crc32(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.status.code().to_be_bytes());
        hasher.update(&self.record_length.to_be_bytes());
        hasher.update(&self.header_length.to_be_bytes());
        hasher.update(&self.time.to_be_bytes());
        hasher.update(&self.sequence_number.to_be_bytes());
        hasher.update(&[self.gtrid.len() as u8]);
        hasher.update(self.gtrid.as_bytes());
        hasher.update(&(self.unique_names.len() as i32).to_be_bytes());
        for name in &self.unique_names {
            hasher.update(&(name.len() as i16).to_be_bytes());
            hasher.update(name.as_bytes());
        }
        hasher.finalize()
    }

    // =========================================================================
    // Encoding
    // =========================================================================

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_i32(self.status.code());
        buf.put_i32(self.record_length);
        buf.put_i32(self.header_length);
        buf.put_i64(self.time);
        buf.put_i32(self.sequence_number);
        buf.put_u32(self.crc32);
        // extension bytes of a newer header layout are not retained
        buf.put_bytes(0, (self.header_length - RECORD_HEADER_LENGTH) as usize);
        buf.put_u8(self.gtrid.len() as u8);
        buf.put_slice(self.gtrid.as_bytes());
        buf.put_i32(self.unique_names.len() as i32);
        for name in &self.unique_names {
            buf.put_i16(name.len() as i16);
            buf.put_slice(name.as_bytes());
        }
        buf.put_i32(self.end_record);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.calculate_total_size());
        self.encode(&mut buf);
        buf
    }

    /// Parse exactly one serialized record. The CRC is not checked here;
    /// use [`LogRecord::is_valid`].
    pub fn decode(bytes: &[u8]) -> std::result::Result<Self, CorruptionKind> {
        let mut buf = bytes;
        need(&buf, RECORD_PREFIX_LENGTH)?;
        let status_code = buf.get_i32();
        let record_length = buf.get_i32();
        if record_length < MIN_RECORD_LENGTH {
            return Err(CorruptionKind::BadRecordLength(record_length));
        }
        need(&buf, record_length as usize)?;
        if buf.remaining() > record_length as usize {
            return Err(CorruptionKind::TrailingBytes(buf.remaining() - record_length as usize));
        }
        Self::decode_payload(status_code, record_length, buf)
    }

    /// Parse the bytes following the status and recordLength fields
    pub(crate) fn decode_payload(
        status_code: i32,
        record_length: i32,
        payload: &[u8],
    ) -> std::result::Result<Self, CorruptionKind> {
        let status = Status::from_code(status_code).ok_or(CorruptionKind::UnknownStatus(status_code))?;
        let mut buf = payload;

        need(&buf, RECORD_HEADER_LENGTH as usize)?;
        let header_length = buf.get_i32();
        if header_length < RECORD_HEADER_LENGTH || header_length > record_length - 9 {
            return Err(CorruptionKind::BadHeaderLength(header_length));
        }
        let time = buf.get_i64();
        let sequence_number = buf.get_i32();
        let crc32 = buf.get_u32();

        let extension = (header_length - RECORD_HEADER_LENGTH) as usize;
        need(&buf, extension)?;
        buf.advance(extension);

        need(&buf, 1)?;
        let gtrid_length = buf.get_u8() as usize;
        need(&buf, gtrid_length)?;
        let gtrid = Uid::new(&buf[..gtrid_length]);
        buf.advance(gtrid_length);

        need(&buf, 4)?;
        let name_count = buf.get_i32();
        if name_count < 0 || (name_count as usize).saturating_mul(2) > buf.remaining() {
            return Err(CorruptionKind::BadRecordLength(record_length));
        }

        let mut unique_names = BTreeSet::new();
        for _ in 0..name_count {
            need(&buf, 2)?;
            let name_length = buf.get_i16();
            if name_length < 0 {
                return Err(CorruptionKind::BadRecordLength(record_length));
            }
            let name_length = name_length as usize;
            need(&buf, name_length)?;
            let name = std::str::from_utf8(&buf[..name_length])
                .map_err(|_| CorruptionKind::InvalidUniqueName)?
                .to_string();
            buf.advance(name_length);
            unique_names.insert(name);
        }

        need(&buf, 4)?;
        let end_record = buf.get_i32();
        if buf.has_remaining() {
            return Err(CorruptionKind::TrailingBytes(buf.remaining()));
        }
        if end_record != END_RECORD {
            return Err(CorruptionKind::BadEndMarker(end_record));
        }

        Ok(Self {
            status,
            record_length,
            header_length,
            time,
            sequence_number,
            crc32,
            gtrid,
            unique_names,
            end_record,
        })
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} seq={} time={} gtrid={} names={:?}",
            self.status, self.sequence_number, self.time, self.gtrid, self.unique_names
        )
    }
}

fn need(buf: &&[u8], n: usize) -> std::result::Result<(), CorruptionKind> {
    if buf.remaining() < n {
        return Err(CorruptionKind::Truncated {
            needed: n as u64,
            available: buf.remaining() as u64,
        });
    }
    Ok(())
}

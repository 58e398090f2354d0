//! Journal file header
//!
//! ```text
//! ┌───────────────┬────────────────┬──────────┬──────────────────┐
//! │ formatId i32  │ timestamp i64  │ state i8 │ position i64     │
//! │ (0)           │ (4)            │ (12)     │ (13)             │
//! └───────────────┴────────────────┴──────────┴──────────────────┘
//! ```
//!
//! `position` is the logical end of data. Bytes past it are left over from an
//! earlier, longer run and are never read.

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use bytes::{Buf, BufMut};

use crate::error::{CoordError, Result};

/// Magic number at offset 0 ("XAJL")
pub const FORMAT_ID: i32 = 0x5841_4a4c;

pub const FORMAT_ID_OFFSET: u64 = 0;
pub const TIMESTAMP_OFFSET: u64 = 4;
pub const STATE_OFFSET: u64 = 12;
pub const POSITION_OFFSET: u64 = 13;

/// Total header size; the first record starts here
pub const HEADER_LENGTH: u64 = 21;

/// Whether the journal was closed properly
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogState {
    Clean,
    Unclean,
}

impl LogState {
    fn to_byte(self) -> i8 {
        match self {
            LogState::Clean => 0,
            LogState::Unclean => -1,
        }
    }

    fn from_byte(byte: i8) -> Self {
        if byte == 0 {
            LogState::Clean
        } else {
            LogState::Unclean
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JournalHeader {
    pub format_id: i32,
    pub timestamp: i64,
    pub state: LogState,
    pub position: u64,
}

impl JournalHeader {
    /// Header of an empty journal
    pub fn new(timestamp: i64) -> Self {
        Self {
            format_id: FORMAT_ID,
            timestamp,
            state: LogState::Clean,
            position: HEADER_LENGTH,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_LENGTH as usize] {
        let mut out = [0u8; HEADER_LENGTH as usize];
        let mut buf = &mut out[..];
        buf.put_i32(self.format_id);
        buf.put_i64(self.timestamp);
        buf.put_i8(self.state.to_byte());
        buf.put_i64(self.position as i64);
        out
    }

    pub fn decode(bytes: &[u8; HEADER_LENGTH as usize]) -> Self {
        let mut buf = &bytes[..];
        let format_id = buf.get_i32();
        let timestamp = buf.get_i64();
        let state = LogState::from_byte(buf.get_i8());
        let position = buf.get_i64();
        Self {
            format_id,
            timestamp,
            state,
            // a negative position can never pass validation below
            position: if position < 0 { 0 } else { position as u64 },
        }
    }

    /// Read and validate the header of `file`
    pub fn read_from<F: Read + Seek>(file: &mut F, path: &Path) -> Result<Self> {
        let mut raw = [0u8; HEADER_LENGTH as usize];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut raw).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => CoordError::InvalidJournal {
                path: path.to_path_buf(),
                reason: "file is shorter than the journal header".to_string(),
            },
            _ => CoordError::Io(e),
        })?;

        let header = Self::decode(&raw);
        if header.format_id != FORMAT_ID {
            return Err(CoordError::InvalidJournal {
                path: path.to_path_buf(),
                reason: format!("bad format id {:#010x}", header.format_id),
            });
        }
        if header.position < HEADER_LENGTH {
            return Err(CoordError::InvalidJournal {
                path: path.to_path_buf(),
                reason: format!("write position {} is inside the header", header.position),
            });
        }
        Ok(header)
    }

    /// Overwrite the whole header
    pub fn write_to<F: Write + Seek>(&self, file: &mut F) -> Result<()> {
        file.seek(SeekFrom::Start(FORMAT_ID_OFFSET))?;
        file.write_all(&self.encode())?;
        Ok(())
    }

    pub fn write_state<F: Write + Seek>(file: &mut F, state: LogState) -> Result<()> {
        file.seek(SeekFrom::Start(STATE_OFFSET))?;
        file.write_all(&[state.to_byte() as u8])?;
        Ok(())
    }

    pub fn write_position<F: Write + Seek>(file: &mut F, position: u64) -> Result<()> {
        file.seek(SeekFrom::Start(POSITION_OFFSET))?;
        file.write_all(&(position as i64).to_be_bytes())?;
        Ok(())
    }

    pub fn write_timestamp<F: Write + Seek>(file: &mut F, timestamp: i64) -> Result<()> {
        file.seek(SeekFrom::Start(TIMESTAMP_OFFSET))?;
        file.write_all(&timestamp.to_be_bytes())?;
        Ok(())
    }
}

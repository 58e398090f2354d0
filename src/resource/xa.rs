//! XA branch identifiers and resource-reported errors

use std::fmt;

use thiserror::Error;

use crate::uid::Uid;

/// Result type for calls into a resource
pub type XaResult<T> = std::result::Result<T, XaError>;

/// An X/Open branch identifier: format tag, global id, branch qualifier
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Xid {
    format_id: i32,
    gtrid: Uid,
    bqual: Uid,
}

impl Xid {
    /// Format tag stamped on every branch this coordinator creates ("XACD")
    pub const FORMAT_ID: i32 = 0x5841_4344;

    pub fn new(gtrid: Uid, bqual: Uid) -> Self {
        Self::with_format(Self::FORMAT_ID, gtrid, bqual)
    }

    /// Build an xid with an arbitrary format tag, as reported by a resource
    pub fn with_format(format_id: i32, gtrid: Uid, bqual: Uid) -> Self {
        Self {
            format_id,
            gtrid,
            bqual,
        }
    }

    pub fn format_id(&self) -> i32 {
        self.format_id
    }

    pub fn gtrid(&self) -> &Uid {
        &self.gtrid
    }

    pub fn bqual(&self) -> &Uid {
        &self.bqual
    }

    /// True when this branch was created by a coordinator of our kind
    pub fn is_ours(&self) -> bool {
        self.format_id == Self::FORMAT_ID
    }
}

impl fmt::Display for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}:{}:{}", self.format_id, self.gtrid, self.bqual)
    }
}

impl fmt::Debug for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Xid({})", self)
    }
}

// =============================================================================
// Errors
// =============================================================================

/// An error reported by a resource, tagged with its XA category
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct XaError {
    pub code: XaErrorCode,
    pub message: String,
}

impl XaError {
    pub fn new(code: XaErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<XaErrorCode> for XaError {
    fn from(code: XaErrorCode) -> Self {
        Self {
            code,
            message: String::new(),
        }
    }
}

/// Closed set of XA error categories.
///
/// `from_code`/`code` convert to and from the numeric X/Open values so
/// adapters for concrete resources can pass raw codes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum XaErrorCode {
    /// XA_RB* family: the branch was rolled back. Carries the raw code (100..=107).
    RolledBack(i32),
    /// XA_HEURCOM
    HeuristicCommit,
    /// XA_HEURRB
    HeuristicRollback,
    /// XA_HEURMIX
    HeuristicMixed,
    /// XA_HEURHAZ
    HeuristicHazard,
    /// XA_RETRY
    Retry,
    /// XAER_ASYNC
    Async,
    /// XAER_RMERR
    ResourceError,
    /// XAER_NOTA
    NoTransaction,
    /// XAER_INVAL
    InvalidArguments,
    /// XAER_PROTO
    Protocol,
    /// XAER_RMFAIL
    ResourceFailure,
    /// XAER_DUPID
    DuplicateId,
    /// XAER_OUTSIDE
    Outside,
    /// Anything a resource invents outside the standard range
    Other(i32),
}

impl XaErrorCode {
    pub fn from_code(code: i32) -> Self {
        match code {
            100..=107 => XaErrorCode::RolledBack(code),
            7 => XaErrorCode::HeuristicCommit,
            6 => XaErrorCode::HeuristicRollback,
            5 => XaErrorCode::HeuristicMixed,
            8 => XaErrorCode::HeuristicHazard,
            4 => XaErrorCode::Retry,
            -2 => XaErrorCode::Async,
            -3 => XaErrorCode::ResourceError,
            -4 => XaErrorCode::NoTransaction,
            -5 => XaErrorCode::InvalidArguments,
            -6 => XaErrorCode::Protocol,
            -7 => XaErrorCode::ResourceFailure,
            -8 => XaErrorCode::DuplicateId,
            -9 => XaErrorCode::Outside,
            other => XaErrorCode::Other(other),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            XaErrorCode::RolledBack(code) => *code,
            XaErrorCode::HeuristicCommit => 7,
            XaErrorCode::HeuristicRollback => 6,
            XaErrorCode::HeuristicMixed => 5,
            XaErrorCode::HeuristicHazard => 8,
            XaErrorCode::Retry => 4,
            XaErrorCode::Async => -2,
            XaErrorCode::ResourceError => -3,
            XaErrorCode::NoTransaction => -4,
            XaErrorCode::InvalidArguments => -5,
            XaErrorCode::Protocol => -6,
            XaErrorCode::ResourceFailure => -7,
            XaErrorCode::DuplicateId => -8,
            XaErrorCode::Outside => -9,
            XaErrorCode::Other(code) => *code,
        }
    }

    /// Plain rollback vote, XA_RBROLLBACK
    pub fn rollback() -> Self {
        XaErrorCode::RolledBack(100)
    }
}

impl fmt::Display for XaErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            XaErrorCode::RolledBack(_) => "XA_RB",
            XaErrorCode::HeuristicCommit => "XA_HEURCOM",
            XaErrorCode::HeuristicRollback => "XA_HEURRB",
            XaErrorCode::HeuristicMixed => "XA_HEURMIX",
            XaErrorCode::HeuristicHazard => "XA_HEURHAZ",
            XaErrorCode::Retry => "XA_RETRY",
            XaErrorCode::Async => "XAER_ASYNC",
            XaErrorCode::ResourceError => "XAER_RMERR",
            XaErrorCode::NoTransaction => "XAER_NOTA",
            XaErrorCode::InvalidArguments => "XAER_INVAL",
            XaErrorCode::Protocol => "XAER_PROTO",
            XaErrorCode::ResourceFailure => "XAER_RMFAIL",
            XaErrorCode::DuplicateId => "XAER_DUPID",
            XaErrorCode::Outside => "XAER_OUTSIDE",
            XaErrorCode::Other(_) => "XA_UNKNOWN",
        };
        write!(f, "{} ({})", name, self.code())
    }
}

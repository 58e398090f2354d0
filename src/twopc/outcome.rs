//! Classification of resource errors into 2PC outcomes

use crate::error::CoordError;
use crate::resource::{XaError, XaErrorCode};

/// What a resource error means for the branch it was raised on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Ok,
    /// Resource unreachable; the branch stays prepared and recovery retries
    TransientFailure,
    HeuristicCommit,
    HeuristicRollback,
    HeuristicMixed,
    /// Outcome cannot be proven consistent with the global decision
    HeuristicHazard,
    /// The resource does not know the branch
    UnknownBranch,
}

impl Outcome {
    /// True for outcomes a resource decided on its own
    pub fn is_heuristic(&self) -> bool {
        matches!(
            self,
            Outcome::HeuristicCommit
                | Outcome::HeuristicRollback
                | Outcome::HeuristicMixed
                | Outcome::HeuristicHazard
        )
    }
}

/// Map an XA error code to its outcome category
pub fn classify(error: &XaError) -> Outcome {
    match error.code {
        XaErrorCode::HeuristicCommit => Outcome::HeuristicCommit,
        XaErrorCode::HeuristicRollback | XaErrorCode::RolledBack(_) => Outcome::HeuristicRollback,
        XaErrorCode::HeuristicMixed => Outcome::HeuristicMixed,
        XaErrorCode::HeuristicHazard => Outcome::HeuristicHazard,
        XaErrorCode::ResourceFailure | XaErrorCode::Retry | XaErrorCode::Async => {
            Outcome::TransientFailure
        }
        XaErrorCode::NoTransaction => Outcome::UnknownBranch,
        XaErrorCode::ResourceError
        | XaErrorCode::Protocol
        | XaErrorCode::InvalidArguments
        | XaErrorCode::DuplicateId
        | XaErrorCode::Outside
        | XaErrorCode::Other(_) => Outcome::HeuristicHazard,
    }
}

/// Outcome carried by a coordinator error raised for a single branch
pub fn outcome_of(error: &CoordError) -> Outcome {
    match error {
        CoordError::Resource { source, .. } | CoordError::TransientFailure { source, .. } => {
            classify(source)
        }
        CoordError::HeuristicHazard { outcome, .. } => *outcome,
        CoordError::PhaseTimeout { .. } => Outcome::TransientFailure,
        _ => Outcome::HeuristicHazard,
    }
}

/// True when the code names a heuristic decision the resource still
/// remembers and expects to be told to forget
pub(crate) fn needs_forget(code: XaErrorCode) -> bool {
    matches!(
        code,
        XaErrorCode::HeuristicCommit
            | XaErrorCode::HeuristicRollback
            | XaErrorCode::HeuristicMixed
            | XaErrorCode::HeuristicHazard
    )
}


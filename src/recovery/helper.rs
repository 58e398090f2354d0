//! Recovery Helper
//!
//! Scans one resource for in-doubt branches and resolves single branches,
//! classifying the heuristic answers a resource may give.

use std::collections::HashSet;

use crate::error::{CoordError, Result};
use crate::resource::{RecoverFlag, XaError, XaErrorCode, XaResource, Xid};

/// Upper bound on `NoFlags` continuation calls in one scan
pub const MAX_SCAN_ROUNDS: usize = 1024;

/// List the branches `resource` holds in doubt that belong to us.
///
/// Runs the StartScan / NoFlags... / EndScan sequence. Branches with a
/// foreign format tag are dropped; so are branches generated by another
/// server id when `server_id` is given. Repeated branches are logged and
/// skipped.
pub fn recover(resource: &dyn XaResource, unique_name: &str, server_id: Option<&[u8]>) -> Result<Vec<Xid>> {
    let mut seen = HashSet::new();
    let mut xids = Vec::new();

    let batch = scan(resource, unique_name, RecoverFlag::StartScan)?;
    collect(batch, unique_name, server_id, &mut seen, &mut xids);

    let mut rounds = 0;
    loop {
        let batch = scan(resource, unique_name, RecoverFlag::NoFlags)?;
        if collect(batch, unique_name, server_id, &mut seen, &mut xids) == 0 {
            break;
        }
        rounds += 1;
        if rounds >= MAX_SCAN_ROUNDS {
            tracing::warn!(unique_name, rounds, "resource keeps reporting new branches, ending scan");
            break;
        }
    }

    let batch = scan(resource, unique_name, RecoverFlag::EndScan)?;
    collect(batch, unique_name, server_id, &mut seen, &mut xids);

    tracing::debug!(unique_name, in_doubt = xids.len(), "recovery scan complete");
    Ok(xids)
}

/// Commit an in-doubt branch.
///
/// `Ok(false)` means the branch could not be resolved as asked (an
/// incompatible heuristic or an unknown branch) and needs an operator.
pub fn commit(resource: &dyn XaResource, unique_name: &str, xid: &Xid) -> Result<bool> {
    let error = match resource.commit(xid, false) {
        Ok(()) => return Ok(true),
        Err(error) => error,
    };

    match error.code {
        XaErrorCode::HeuristicCommit => {
            forget(resource, unique_name, xid);
            Ok(true)
        }
        XaErrorCode::HeuristicRollback | XaErrorCode::HeuristicMixed | XaErrorCode::HeuristicHazard => {
            tracing::error!(
                unique_name,
                branch = %xid,
                "heuristic outcome incompatible with commit: {}",
                error
            );
            forget(resource, unique_name, xid);
            Ok(false)
        }
        XaErrorCode::NoTransaction => {
            tracing::error!(
                unique_name,
                branch = %xid,
                "resource does not know in-doubt branch on commit, it may have been forgotten heuristically"
            );
            Ok(false)
        }
        _ => Err(resource_error(unique_name, xid, error)),
    }
}

/// Roll back an in-doubt branch; see [`commit`] for the meaning of `Ok(false)`
pub fn rollback(resource: &dyn XaResource, unique_name: &str, xid: &Xid) -> Result<bool> {
    let error = match resource.rollback(xid) {
        Ok(()) => return Ok(true),
        Err(error) => error,
    };

    match error.code {
        XaErrorCode::HeuristicRollback => {
            forget(resource, unique_name, xid);
            Ok(true)
        }
        XaErrorCode::RolledBack(_) => Ok(true),
        XaErrorCode::HeuristicCommit | XaErrorCode::HeuristicMixed | XaErrorCode::HeuristicHazard => {
            tracing::error!(
                unique_name,
                branch = %xid,
                "heuristic outcome incompatible with rollback: {}",
                error
            );
            forget(resource, unique_name, xid);
            Ok(false)
        }
        XaErrorCode::NoTransaction => {
            tracing::error!(
                unique_name,
                branch = %xid,
                "resource does not know in-doubt branch on rollback, it may have been forgotten heuristically"
            );
            Ok(false)
        }
        _ => Err(resource_error(unique_name, xid, error)),
    }
}

fn scan(resource: &dyn XaResource, unique_name: &str, flag: RecoverFlag) -> Result<Vec<Xid>> {
    resource.recover(flag).map_err(|source| CoordError::Resource {
        unique_name: unique_name.to_string(),
        branch: format!("{:?}", flag),
        source,
    })
}

/// Append the new branches of `batch`; returns how many were new
fn collect(
    batch: Vec<Xid>,
    unique_name: &str,
    server_id: Option<&[u8]>,
    seen: &mut HashSet<Xid>,
    xids: &mut Vec<Xid>,
) -> usize {
    let mut added = 0;
    for xid in batch {
        if !xid.is_ours() {
            tracing::trace!(unique_name, branch = %xid, "ignoring branch with foreign format id");
            continue;
        }
        if let Some(server_id) = server_id {
            if xid.gtrid().extract_server_id() != Some(server_id) {
                tracing::trace!(unique_name, branch = %xid, "ignoring branch of another server");
                continue;
            }
        }
        if !seen.insert(xid.clone()) {
            tracing::debug!(unique_name, branch = %xid, "branch reported twice in one scan, ignoring");
            continue;
        }
        xids.push(xid);
        added += 1;
    }
    added
}

fn forget(resource: &dyn XaResource, unique_name: &str, xid: &Xid) {
    if let Err(e) = resource.forget(xid) {
        tracing::warn!(unique_name, branch = %xid, "forget failed: {}", e);
    }
}

fn resource_error(unique_name: &str, xid: &Xid, source: XaError) -> CoordError {
    CoordError::Resource {
        unique_name: unique_name.to_string(),
        branch: xid.to_string(),
        source,
    }
}

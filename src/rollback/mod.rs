use crate::git::{Git, Result};
use std::fmt;
use tracing::debug;

/// Commit captured before the first mutation of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestorePoint(String);

impl RestorePoint {
    pub fn new(sha: impl Into<String>) -> Self {
        Self(sha.into())
    }

    pub fn sha(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(8)]
    }
}

impl fmt::Display for RestorePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short())
    }
}

/// Whether a failed run can be undone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackCapability {
    Available(RestorePoint),
    /// Diffs read from a file have no commit they were taken against.
    Unavailable,
}

impl RollbackCapability {
    pub fn point(&self) -> Option<&RestorePoint> {
        match self {
            RollbackCapability::Available(point) => Some(point),
            RollbackCapability::Unavailable => None,
        }
    }
}

pub struct RollbackManager;

impl RollbackManager {
    /// Record HEAD as the restore point.
    pub fn capture(git: &Git) -> Result<RestorePoint> {
        let point = RestorePoint::new(git.head_sha()?);
        debug!(restore_point = point.sha(), "restore point captured");
        Ok(point)
    }

    /// Move the branch back to `point`, keeping every file's content as
    /// uncommitted changes, and leave the index matching `point`.
    pub fn rollback_to(git: &Git, point: &RestorePoint) -> Result<()> {
        git.reset_soft(point.sha())?;
        git.reset_index()?;
        debug!(restore_point = point.sha(), "rolled back");
        Ok(())
    }
}

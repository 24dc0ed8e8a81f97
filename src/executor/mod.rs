//! Turning a finalized plan into commits.
//!
//! Both executors end every run in one of three states: `Done`, `RolledBack`
//! to the restore point, or `Halted` for manual resolution. No partial commit
//! set survives a failure when a restore point exists.

pub mod decision;
pub mod isolation;
pub mod normal;

use crate::context::ExecutionContext;
use crate::git::GitError;
use crate::plan::Plan;
use crate::rollback::{RestorePoint, RollbackManager};
use crate::{CommitEntry, EntryId};
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("commit {entry} ({message}) does not apply cleanly: {detail}")]
    ApplyConflict {
        entry: EntryId,
        message: String,
        detail: String,
    },
    #[error("git failed{}: {source}", at(.entry))]
    Git {
        entry: Option<EntryId>,
        #[source]
        source: GitError,
    },
    #[error("verification command `{command}` failed ({status})")]
    TestFailure {
        command: String,
        status: String,
        output: String,
    },
    #[error("aborted at commit {0}")]
    UserAbort(EntryId),
    #[error("restoring hidden changes after commit {entry} failed: {detail}")]
    IsolationRestoreConflict { entry: EntryId, detail: String },
    #[error("interrupted{}", at(.entry))]
    Interrupted { entry: Option<EntryId> },
}

fn at(entry: &Option<EntryId>) -> String {
    match entry {
        Some(id) => format!(" at commit {}", id),
        None => String::new(),
    }
}

impl ExecError {
    pub fn git(entry: Option<EntryId>, source: GitError) -> Self {
        ExecError::Git { entry, source }
    }

    /// The entry the run failed on, if any.
    pub fn entry(&self) -> Option<EntryId> {
        match self {
            ExecError::ApplyConflict { entry, .. }
            | ExecError::IsolationRestoreConflict { entry, .. } => Some(*entry),
            ExecError::Git { entry, .. } | ExecError::Interrupted { entry } => *entry,
            ExecError::UserAbort(entry) => Some(*entry),
            ExecError::TestFailure { .. } => None,
        }
    }
}

/// Stage an entry's fragments, classifying a rejected patch as a conflict.
pub(crate) fn stage_entry(
    ctx: &ExecutionContext,
    plan: &Plan,
    entry: &CommitEntry,
) -> Result<(), ExecError> {
    let git = ctx.git();
    git.reset_index()
        .map_err(|e| ExecError::git(Some(entry.id), e))?;
    match git.apply_cached(&plan.entry_patch(entry)) {
        Ok(()) => Ok(()),
        Err(GitError::CommandFailed { stderr, .. }) => Err(ExecError::ApplyConflict {
            entry: entry.id,
            message: entry.message.clone(),
            detail: stderr,
        }),
        Err(e) => Err(ExecError::git(Some(entry.id), e)),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedCommit {
    pub entry: EntryId,
    pub sha: String,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionSummary {
    pub commits: Vec<CreatedCommit>,
    pub skipped: Vec<EntryId>,
    pub tested: bool,
}

/// Final state of a run.
#[derive(Debug)]
pub enum RunOutcome {
    Done(ExecutionSummary),
    RolledBack {
        error: ExecError,
        restore_point: RestorePoint,
    },
    Halted {
        error: ExecError,
        /// Commits from this run still on the branch.
        commits: Vec<CreatedCommit>,
    },
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Done(_))
    }

    pub fn error(&self) -> Option<&ExecError> {
        match self {
            RunOutcome::Done(_) => None,
            RunOutcome::RolledBack { error, .. } | RunOutcome::Halted { error, .. } => Some(error),
        }
    }

    /// Label stored in the run journal.
    pub fn status(&self) -> &'static str {
        match self {
            RunOutcome::Done(_) => "done",
            RunOutcome::RolledBack { .. } => "rolled_back",
            RunOutcome::Halted { .. } => "halted",
        }
    }
}

/// Executor states, shared by both strategies for status output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Ready,
    Applying(EntryId),
    Committed(EntryId),
    AllCommitted,
    Testing,
    Preparing(EntryId),
    AwaitingDecision(EntryId),
    Done,
    RolledBack,
    Halted,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Ready => write!(f, "ready"),
            Stage::Applying(id) => write!(f, "applying({})", id),
            Stage::Committed(id) => write!(f, "committed({})", id),
            Stage::AllCommitted => write!(f, "all-committed"),
            Stage::Testing => write!(f, "testing"),
            Stage::Preparing(id) => write!(f, "preparing({})", id),
            Stage::AwaitingDecision(id) => write!(f, "awaiting-decision({})", id),
            Stage::Done => write!(f, "done"),
            Stage::RolledBack => write!(f, "rolled-back"),
            Stage::Halted => write!(f, "halted"),
        }
    }
}

pub(crate) fn transition(stage: Stage) {
    debug!(%stage, "executor transition");
}

/// Close a failed run: roll back when a restore point exists, otherwise halt.
///
/// An isolation restore conflict always halts; the working tree is left as is.
pub(crate) fn fail(
    ctx: &ExecutionContext,
    error: ExecError,
    commits: Vec<CreatedCommit>,
) -> RunOutcome {
    eprintln!("✗ {}", error);
    let point = match (&error, ctx.restore_point()) {
        (ExecError::IsolationRestoreConflict { .. }, _) | (_, None) => {
            transition(Stage::Halted);
            return RunOutcome::Halted { error, commits };
        }
        (_, Some(point)) => point.clone(),
    };

    match RollbackManager::rollback_to(ctx.git(), &point) {
        Ok(()) => {
            transition(Stage::RolledBack);
            println!("✓ Rolled back to {}", point);
            RunOutcome::RolledBack {
                error,
                restore_point: point,
            }
        }
        Err(e) => {
            warn!(error = %e, restore_point = point.sha(), "rollback failed");
            eprintln!(
                "✗ Rollback to {} failed: {}\n  Run `git reset --soft {}` to restore manually",
                point,
                e,
                point.sha()
            );
            transition(Stage::Halted);
            RunOutcome::Halted { error, commits }
        }
    }
}

/// Entries that will actually be materialized, in plan order.
pub(crate) fn runnable(plan: &Plan) -> Vec<EntryId> {
    plan.live_entries().map(|entry| entry.id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_name_the_failing_entry() {
        let err = ExecError::ApplyConflict {
            entry: EntryId(3),
            message: "Fix parser".into(),
            detail: "patch does not apply".into(),
        };
        assert_eq!(err.entry(), Some(EntryId(3)));
        assert_eq!(
            err.to_string(),
            "commit 3 (Fix parser) does not apply cleanly: patch does not apply"
        );
        assert_eq!(ExecError::Interrupted { entry: None }.to_string(), "interrupted");
        assert_eq!(
            ExecError::Interrupted { entry: Some(EntryId(2)) }.to_string(),
            "interrupted at commit 2"
        );
    }
}

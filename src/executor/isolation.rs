//! Step-isolated execution: one commit at a time, with everything else
//! hidden from the working tree while the user decides.

use super::decision::{Decision, DecisionSource, PendingCommit};
use super::{
    CreatedCommit, ExecError, ExecutionSummary, RunOutcome, Stage, fail, runnable, stage_entry,
    transition,
};
use crate::context::ExecutionContext;
use crate::git::{Git, GitError, StashPop, StashPush};
use crate::guard::unique_suffix;
use crate::interrupt;
use crate::plan::Plan;
use crate::{EntryId, EntryState};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Marker in the message of every isolation stash entry.
pub const STASH_LABEL: &str = "git-split-isolation";

/// Directory under the state dir where untracked files are parked.
pub const HIDDEN_DIR: &str = "hidden";

/// Hidden working-tree content, in two resource classes.
///
/// Tracked changes go into a `--keep-index` stash entry. Untracked files are
/// not covered by that primitive and are moved into a holding directory.
/// Dropping an unrestored session restores on a best-effort basis.
#[derive(Debug)]
pub struct IsolationSession {
    git: Git,
    tracked: Option<String>,
    holding: PathBuf,
    restored: bool,
}

impl IsolationSession {
    /// Hide every change except what is staged.
    pub fn hide(git: &Git) -> Result<Self, GitError> {
        let id = unique_suffix();
        let holding = git.state_dir()?.join(HIDDEN_DIR).join(&id);

        let tracked = match git.stash_keep_index(&format!("{} {}", STASH_LABEL, id))? {
            StashPush::Saved(sha) => Some(sha),
            StashPush::NothingToSave => None,
        };
        let mut session = Self {
            git: git.clone(),
            tracked,
            holding,
            restored: false,
        };

        let untracked = git.untracked_files()?;
        for rel in &untracked {
            park(&git.root().join(rel), &session.holding.join(rel))?;
        }
        debug!(
            tracked = session.tracked.is_some(),
            untracked = untracked.len(),
            holding = %session.holding.display(),
            "working tree isolated"
        );
        if session.tracked.is_none() && untracked.is_empty() {
            session.restored = true;
        }
        Ok(session)
    }

    /// Whether tracked changes are held in a stash entry.
    pub fn holds_tracked(&self) -> bool {
        self.tracked.is_some()
    }

    /// Bring hidden content back.
    ///
    /// A conflict is never resolved here: the stash entry stays in the list
    /// and colliding untracked files stay in the holding directory.
    pub fn restore(mut self) -> Result<(), String> {
        self.restored = true;
        let mut problems = Vec::new();

        if let Some(sha) = &self.tracked {
            match self.git.stash_ref(sha) {
                Ok(Some(reference)) => match self.git.stash_pop(&reference) {
                    Ok(StashPop::Restored) => {}
                    Ok(StashPop::Conflict(detail)) => problems.push(format!(
                        "tracked changes conflict ({} kept):\n{}",
                        reference, detail
                    )),
                    Err(e) => problems.push(format!("could not pop {}: {}", reference, e)),
                },
                Ok(None) => problems.push(format!("isolation stash {} is missing", sha)),
                Err(e) => problems.push(e.to_string()),
            }
        }

        match restore_untracked(self.git.root(), &self.holding) {
            Ok(conflicts) if conflicts.is_empty() => {}
            Ok(conflicts) => problems.push(format!(
                "untracked files exist again and were left in {}: {}",
                self.holding.display(),
                conflicts
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
            Err(e) => problems.push(format!("could not restore untracked files: {}", e)),
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems.join("\n"))
        }
    }
}

impl Drop for IsolationSession {
    fn drop(&mut self) {
        if self.restored {
            return;
        }
        let session = IsolationSession {
            git: self.git.clone(),
            tracked: self.tracked.take(),
            holding: self.holding.clone(),
            restored: false,
        };
        self.restored = true;
        if let Err(detail) = session.restore() {
            warn!(%detail, "best-effort isolation restore failed");
            eprintln!("⚠ Hidden changes could not be fully restored:\n{}", detail);
        }
    }
}

fn park(from: &Path, to: &Path) -> io::Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    if fs::rename(from, to).is_err() {
        fs::copy(from, to)?;
        fs::remove_file(from)?;
    }
    Ok(())
}

/// Move every file under `holding` back into `root`, never overwriting.
///
/// Returns the paths (relative to `root`) left behind because something
/// already exists there. The holding directory is removed once empty.
pub fn restore_untracked(root: &Path, holding: &Path) -> io::Result<Vec<PathBuf>> {
    let mut conflicts = Vec::new();
    if !holding.exists() {
        return Ok(conflicts);
    }
    let mut files = Vec::new();
    collect_files(holding, &mut files)?;
    files.sort();

    for parked in files {
        let Ok(rel) = parked.strip_prefix(holding) else { continue };
        let target = root.join(rel);
        if target.symlink_metadata().is_ok() {
            conflicts.push(rel.to_path_buf());
            continue;
        }
        park(&parked, &target)?;
    }

    if conflicts.is_empty() {
        fs::remove_dir_all(holding)?;
    }
    Ok(conflicts)
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_files(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

/// Apply entries one at a time, asking for a decision on each.
pub fn execute(
    ctx: &ExecutionContext,
    plan: &mut Plan,
    decisions: &mut dyn DecisionSource,
) -> RunOutcome {
    transition(Stage::Ready);
    let mut summary = ExecutionSummary::default();

    if interrupt::interrupted() {
        return fail(ctx, ExecError::Interrupted { entry: None }, summary.commits);
    }
    if let Err(e) = ctx.prepare_base() {
        return fail(ctx, ExecError::git(None, e), summary.commits);
    }

    let ids = runnable(plan);
    let total = ids.len();
    for (i, id) in ids.into_iter().enumerate() {
        if interrupt::interrupted() {
            return fail(ctx, ExecError::Interrupted { entry: Some(id) }, summary.commits);
        }
        if let Err(e) = step(ctx, plan, decisions, &mut summary, id, i + 1, total) {
            return fail(ctx, e, summary.commits);
        }
    }

    transition(Stage::Done);
    RunOutcome::Done(summary)
}

/// Prepare, await a decision and act on it for one entry.
///
/// A commit lands in `summary` as soon as it exists, so a restore conflict
/// afterwards still reports it.
fn step(
    ctx: &ExecutionContext,
    plan: &mut Plan,
    decisions: &mut dyn DecisionSource,
    summary: &mut ExecutionSummary,
    id: EntryId,
    position: usize,
    total: usize,
) -> Result<(), ExecError> {
    let git = ctx.git();
    let Some(entry) = plan.entry(id).cloned() else {
        return Ok(());
    };

    transition(Stage::Preparing(id));
    stage_entry(ctx, plan, &entry)?;
    let session = IsolationSession::hide(git).map_err(|e| ExecError::git(Some(id), e))?;

    transition(Stage::AwaitingDecision(id));
    let pending = PendingCommit {
        position,
        total,
        entry: &entry,
        files: plan.files_of(&entry).into_iter().map(|(path, _)| path).collect(),
    };
    let decision = match decisions.decide(&pending) {
        Ok(decision) => decision,
        Err(e) if e.kind() == io::ErrorKind::Interrupted || interrupt::interrupted() => {
            discard_staged(git, &session, id)?;
            restore(session, id)?;
            return Err(ExecError::Interrupted { entry: Some(id) });
        }
        Err(e) => {
            debug!(error = %e, "no decision available, aborting");
            Decision::Abort
        }
    };
    debug!(entry = %id, ?decision, "decision");

    match decision {
        Decision::Confirm => {
            let sha = match git.commit(&entry.message) {
                Ok(sha) => sha,
                Err(e) => {
                    discard_staged(git, &session, id)?;
                    restore(session, id)?;
                    return Err(ExecError::git(Some(id), e));
                }
            };
            transition(Stage::Committed(id));
            println!("✓ Committed {} {}", &sha[..sha.len().min(8)], entry.message);
            plan.mark_applied(id);
            summary.commits.push(CreatedCommit {
                entry: id,
                sha,
                message: entry.message,
            });
            restore(session, id)
        }
        Decision::Skip => {
            discard_staged(git, &session, id)?;
            plan.release_entry(id, EntryState::Skipped);
            summary.skipped.push(id);
            println!("⚠ Skipped commit {}: {} (its changes stay uncommitted)", id, entry.message);
            restore(session, id)
        }
        Decision::Abort => {
            discard_staged(git, &session, id)?;
            restore(session, id)?;
            Err(ExecError::UserAbort(id))
        }
    }
}

/// Drop the staged entry from index and working tree. The stash entry still
/// holds that content, so nothing is lost once it is popped.
fn discard_staged(git: &Git, session: &IsolationSession, id: EntryId) -> Result<(), ExecError> {
    let result = if session.holds_tracked() {
        git.reset_hard()
    } else {
        git.reset_index()
    };
    result.map_err(|e| ExecError::git(Some(id), e))
}

fn restore(session: IsolationSession, id: EntryId) -> Result<(), ExecError> {
    session
        .restore()
        .map_err(|detail| ExecError::IsolationRestoreConflict { entry: id, detail })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untracked_restore_never_overwrites() {
        let root = tempfile::tempdir().unwrap();
        let holding = tempfile::tempdir().unwrap();
        let held = holding.path().join("held");
        fs::create_dir_all(held.join("nested")).unwrap();
        fs::write(held.join("nested/a.txt"), "parked a").unwrap();
        fs::write(held.join("b.txt"), "parked b").unwrap();
        fs::write(root.path().join("b.txt"), "new b").unwrap();

        let conflicts = restore_untracked(root.path(), &held).unwrap();
        assert_eq!(conflicts, vec![PathBuf::from("b.txt")]);
        assert_eq!(fs::read_to_string(root.path().join("nested/a.txt")).unwrap(), "parked a");
        assert_eq!(fs::read_to_string(root.path().join("b.txt")).unwrap(), "new b");
        assert_eq!(fs::read_to_string(held.join("b.txt")).unwrap(), "parked b");
    }

    #[test]
    fn untracked_restore_removes_empty_holding_dir() {
        let root = tempfile::tempdir().unwrap();
        let holding = tempfile::tempdir().unwrap();
        let held = holding.path().join("held");
        fs::create_dir_all(&held).unwrap();
        fs::write(held.join("c.txt"), "c").unwrap();

        assert!(restore_untracked(root.path(), &held).unwrap().is_empty());
        assert!(!held.exists());
        assert!(root.path().join("c.txt").exists());
    }
}

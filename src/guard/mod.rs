use crate::git::{Git, Result, StashPop, StashPush};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

pub const EPHEMERAL_PREFIX: &str = "git-split-draft-";
pub const RESULT_PREFIX: &str = "git-split/result-";

/// Marker in the message of the stash entry that carries uncommitted changes
/// back to the original branch.
pub const CARRY_LABEL: &str = "git-split-carry";

/// Scoped hold on an ephemeral work branch.
///
/// Acquired when the current branch is the comparison target, so the run
/// never commits onto the branch the user started from. Releasing switches
/// back to the original branch and removes the ephemeral one; `Drop`
/// releases on every exit path that unwinds or returns. Whatever is still
/// uncommitted at that point (unassigned, discarded or skipped hunks) is
/// stashed across the switch and popped onto the original branch.
#[derive(Debug)]
pub struct BranchGuard {
    git: Git,
    original: Option<String>,
    ephemeral: Option<String>,
    keep_as: Option<String>,
    released: bool,
}

impl BranchGuard {
    /// Create and switch to an ephemeral branch when on `target`; otherwise
    /// hold nothing.
    pub fn acquire(git: &Git, target: &str) -> Result<Self> {
        let original = git.current_branch()?;
        let mut guard = Self {
            git: git.clone(),
            original: original.clone(),
            ephemeral: None,
            keep_as: None,
            released: false,
        };

        if original.as_deref() == Some(target) {
            let suffix = unique_suffix();
            let name = format!("{}{}", EPHEMERAL_PREFIX, suffix);
            git.create_branch(&name)?;
            debug!(branch = %name, original = target, "ephemeral branch acquired");
            println!("✓ On target branch '{}', working on temporary branch '{}'", target, name);
            guard.ephemeral = Some(name);
        }
        Ok(guard)
    }

    /// A guard that holds no branch (diffs read from a file).
    pub fn inactive(git: &Git) -> Result<Self> {
        Ok(Self {
            git: git.clone(),
            original: git.current_branch()?,
            ephemeral: None,
            keep_as: None,
            released: true,
        })
    }

    pub fn original_branch(&self) -> Option<&str> {
        self.original.as_deref()
    }

    pub fn ephemeral_branch(&self) -> Option<&str> {
        self.ephemeral.as_deref()
    }

    /// Keep the commits made on the ephemeral branch under a result name
    /// instead of deleting them. Returns the name, if a branch is held.
    pub fn keep_result(&mut self) -> Option<String> {
        let ephemeral = self.ephemeral.as_deref()?;
        let suffix = ephemeral.strip_prefix(EPHEMERAL_PREFIX).unwrap_or(ephemeral);
        let name = format!("{}{}", RESULT_PREFIX, suffix);
        self.keep_as = Some(name.clone());
        Some(name)
    }

    /// Switch back to the original branch and get rid of the ephemeral name.
    ///
    /// Failing to delete the ephemeral branch is only a warning; failing to
    /// switch back is an error.
    pub fn release(mut self) -> Result<()> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        let (Some(original), Some(ephemeral)) = (self.original.clone(), self.ephemeral.clone())
        else {
            return Ok(());
        };

        if let Some(result) = &self.keep_as {
            self.git.rename_branch(&ephemeral, result)?;
            println!("✓ Commits kept on branch '{}'", result);
        }

        // A file with a committed hunk and an uncommitted one would block
        // the checkout, so leftovers travel in a stash entry.
        let carried = match self.git.stash_everything(&format!("{} {}", CARRY_LABEL, ephemeral))? {
            StashPush::Saved(sha) => Some(sha),
            StashPush::NothingToSave => None,
        };
        if let Err(e) = self.git.switch_branch(&original) {
            if let Some(sha) = &carried {
                self.unstash(sha, self.keep_as.as_deref().unwrap_or(&ephemeral));
            }
            return Err(e);
        }
        println!("✓ Switched back to '{}'", original);
        if let Some(sha) = &carried {
            self.unstash(sha, &original);
        }

        if self.keep_as.is_none()
            && let Err(e) = self.git.delete_branch(&ephemeral)
        {
            warn!(branch = %ephemeral, error = %e, "failed to delete ephemeral branch");
            eprintln!(
                "⚠ Could not delete temporary branch '{}': {}\n  Delete it with `git branch -D {}`",
                ephemeral, e, ephemeral
            );
        }
        Ok(())
    }

    /// Pop the carried stash entry onto `branch`. A conflict leaves the entry
    /// in the stash list and is reported, not raised.
    fn unstash(&self, sha: &str, branch: &str) {
        let reference = match self.git.stash_ref(sha) {
            Ok(Some(reference)) => reference,
            Ok(None) => {
                warn!(stash = sha, "carried stash entry is gone");
                return;
            }
            Err(e) => {
                eprintln!("⚠ Could not find the stash holding uncommitted changes: {}", e);
                return;
            }
        };
        match self.git.stash_pop(&reference) {
            Ok(StashPop::Restored) => debug!(branch, "uncommitted changes carried over"),
            Ok(StashPop::Conflict(detail)) => {
                warn!(%reference, branch, "carried changes conflict");
                eprintln!(
                    "⚠ Uncommitted changes conflict with '{}' and are kept in {}:\n{}",
                    branch, reference, detail
                );
            }
            Err(e) => eprintln!(
                "⚠ Could not restore uncommitted changes from {}: {}\n  Run `git stash pop {}` by hand",
                reference, e, reference
            ),
        }
    }
}

impl Drop for BranchGuard {
    fn drop(&mut self) {
        if let Err(e) = self.release_inner() {
            warn!(error = %e, "branch restore failed");
            eprintln!("✗ Could not restore the original branch: {}", e);
            if let Some(original) = &self.original {
                eprintln!("  Switch back manually with `git checkout {}`", original);
            }
        }
    }
}

/// `<unix seconds>-<8 hex digits>`, random where the OS allows it.
pub fn unique_suffix() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let mut bytes = [0u8; 4];
    if getrandom::getrandom(&mut bytes).is_err() {
        bytes = (now.subsec_nanos() ^ std::process::id()).to_le_bytes();
    }
    format!("{}-{:08x}", now.as_secs(), u32::from_le_bytes(bytes))
}

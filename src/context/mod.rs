use crate::DiffSource;
use crate::git::{Git, GitError, validate_git_ref};
use crate::guard::BranchGuard;
use crate::rollback::{RestorePoint, RollbackCapability, RollbackManager};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ContextError {
    #[error(transparent)]
    Git(#[from] GitError),
    #[error("failed to read diff file {path}: {source}")]
    ReadDiff {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("diff file {0} is empty")]
    EmptyDiff(PathBuf),
    #[error("the repository has no commits yet")]
    NoHead,
}

pub type Result<T> = std::result::Result<T, ContextError>;

/// The commit the plan is applied on top of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyBase {
    /// Current HEAD; the diff is uncommitted or comes from a file.
    Head,
    /// The branch is rewound to its merge base with the target first.
    MergeBase(String),
}

/// Run-scoped state. Owns the branch guard and the restore point and
/// releases the guard when dropped.
#[derive(Debug)]
pub struct ExecutionContext {
    git: Git,
    source: DiffSource,
    base: ApplyBase,
    guard: BranchGuard,
    rollback: RollbackCapability,
}

impl ExecutionContext {
    /// Acquire the branch guard (when needed) and work out the apply base.
    pub fn open(git: &Git, source: DiffSource) -> Result<Self> {
        if git.head_sha().is_err() {
            return Err(ContextError::NoHead);
        }
        let (guard, base) = match &source {
            DiffSource::Branch { target } => {
                validate_git_ref(target)?;
                let guard = BranchGuard::acquire(git, target)?;
                let base = branch_base(git, target, guard.ephemeral_branch().is_some())?;
                (guard, base)
            }
            DiffSource::File { .. } => (BranchGuard::inactive(git)?, ApplyBase::Head),
        };
        debug!(source = source.kind(), ?base, "execution context opened");

        Ok(Self {
            git: git.clone(),
            source,
            base,
            guard,
            rollback: RollbackCapability::Unavailable,
        })
    }

    pub fn git(&self) -> &Git {
        &self.git
    }

    pub fn source(&self) -> &DiffSource {
        &self.source
    }

    pub fn base(&self) -> &ApplyBase {
        &self.base
    }

    pub fn guard(&self) -> &BranchGuard {
        &self.guard
    }

    pub fn rollback(&self) -> &RollbackCapability {
        &self.rollback
    }

    pub fn restore_point(&self) -> Option<&RestorePoint> {
        self.rollback.point()
    }

    /// The diff under analysis, byte for byte.
    pub fn load_diff(&self) -> Result<Vec<u8>> {
        match (&self.source, &self.base) {
            (DiffSource::File { path }, _) => read_diff_file(path),
            (DiffSource::Branch { .. }, ApplyBase::Head) => Ok(self.git.diff_worktree()?),
            (DiffSource::Branch { .. }, ApplyBase::MergeBase(base)) => {
                Ok(self.git.diff_refs(base, "HEAD")?)
            }
        }
    }

    /// Commits the rewind will take off the branch (and put back on rollback).
    pub fn rewound_commits(&self) -> Result<Vec<String>> {
        match &self.base {
            ApplyBase::Head => Ok(Vec::new()),
            ApplyBase::MergeBase(base) => Ok(self.git.commit_subjects(base, "HEAD")?),
        }
    }

    /// Take the restore point. Must run after the guard is acquired and
    /// before the first executor mutation.
    pub fn capture_restore_point(&mut self) -> Result<&RollbackCapability> {
        self.rollback = match self.source {
            DiffSource::Branch { .. } => {
                RollbackCapability::Available(RollbackManager::capture(&self.git)?)
            }
            DiffSource::File { .. } => RollbackCapability::Unavailable,
        };
        Ok(&self.rollback)
    }

    /// First mutation of a run: empty the index and, for branch diffs with
    /// their own commits, rewind to the merge base.
    pub fn prepare_base(&self) -> std::result::Result<(), GitError> {
        if let ApplyBase::MergeBase(base) = &self.base {
            self.git.reset_soft(base)?;
        }
        self.git.reset_index()
    }

    pub fn keep_result(&mut self) -> Option<String> {
        self.guard.keep_result()
    }

    /// Switch back to the original branch.
    pub fn release(self) -> std::result::Result<(), GitError> {
        self.guard.release()
    }
}

fn branch_base(git: &Git, target: &str, on_target: bool) -> Result<ApplyBase> {
    if on_target {
        return Ok(ApplyBase::Head);
    }
    let merge_base = git.merge_base(target, "HEAD")?;
    if git.count_commits(&merge_base, "HEAD")? == 0 {
        // Nothing committed since the target: split the working tree instead.
        Ok(ApplyBase::Head)
    } else {
        Ok(ApplyBase::MergeBase(merge_base))
    }
}

/// The diff `ExecutionContext::open` would load, without touching branches.
pub fn peek_diff(git: &Git, source: &DiffSource) -> Result<Vec<u8>> {
    match source {
        DiffSource::File { path } => read_diff_file(path),
        DiffSource::Branch { target } => {
            validate_git_ref(target)?;
            let on_target = git.current_branch()?.as_deref() == Some(target.as_str());
            match branch_base(git, target, on_target)? {
                ApplyBase::Head => Ok(git.diff_worktree()?),
                ApplyBase::MergeBase(base) => Ok(git.diff_refs(&base, "HEAD")?),
            }
        }
    }
}

/// Read a diff file, expanding a leading `~/`.
pub fn read_diff_file(path: &Path) -> Result<Vec<u8>> {
    let path = expand_home(path);
    let content = std::fs::read(&path).map_err(|source| ContextError::ReadDiff {
        path: path.clone(),
        source,
    })?;
    if content.trim_ascii().is_empty() {
        return Err(ContextError::EmptyDiff(path));
    }
    Ok(content)
}

fn expand_home(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~")
        && let Some(home) = std::env::var_os("HOME")
    {
        return PathBuf::from(home).join(rest);
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn home_is_expanded() {
        let Some(home) = std::env::var_os("HOME") else { return };
        assert_eq!(expand_home(Path::new("~/x.diff")), PathBuf::from(home).join("x.diff"));
        assert_eq!(expand_home(Path::new("/tmp/x.diff")), PathBuf::from("/tmp/x.diff"));
    }

    #[test]
    fn empty_diff_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.diff");
        std::fs::write(&path, "\n  \n").unwrap();
        assert!(matches!(read_diff_file(&path), Err(ContextError::EmptyDiff(_))));
        assert!(matches!(
            read_diff_file(&dir.path().join("missing.diff")),
            Err(ContextError::ReadDiff { .. })
        ));
    }

    #[test]
    fn diff_files_are_read_as_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latin.diff");
        std::fs::write(&path, b"-caf\xe9\r\n").unwrap();
        assert_eq!(read_diff_file(&path).unwrap(), b"-caf\xe9\r\n");
    }
}
